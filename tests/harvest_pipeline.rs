// End-to-end: fake registry → fetcher → stream → resolver → SQLite → CSV

use registry_harvest::{
    check_page_request, export_csv, get_all_persons, get_province_stats, run_harvest,
    setup_database, verify_count, Division, DivisionResolver, DivisionTable, EndpointSettings,
    FetchError, HarvestOptions, PagedFetcher, Transport, TransportError,
};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Serves `total` records, paged by the request's `page`/`pageSize`
struct FakeRegistry {
    total: usize,
    id_prefixes: Vec<&'static str>,
    calls: AtomicUsize,
}

impl FakeRegistry {
    fn new(total: usize, id_prefixes: Vec<&'static str>) -> Self {
        FakeRegistry {
            total,
            id_prefixes,
            calls: AtomicUsize::new(0),
        }
    }

    fn record(&self, n: usize) -> Value {
        let prefix = self.id_prefixes[n % self.id_prefixes.len()];
        json!({
            "xm": format!("被执行人{}", n),
            "fbrq": format!("2019-01-{:02}", n % 28 + 1),
            "sfzh": format!("{}********{:04}", prefix, n),
            "zxfy": "某某人民法院",
        })
    }
}

impl Transport for FakeRegistry {
    fn get(&self, _url: &str, query: &[(&str, String)]) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let param = |key: &str| -> usize {
            query
                .iter()
                .find(|(k, _)| *k == key)
                .and_then(|(_, v)| v.parse().ok())
                .unwrap_or(0)
        };
        let page = param("page");
        let size = param("pageSize");

        let start = (page - 1) * size;
        let end = (start + size).min(self.total);
        let list: Vec<Value> = (start.min(end)..end).map(|n| self.record(n)).collect();

        Ok(json!({"status": 1, "message": "成功", "data": {"list": list}}).to_string())
    }
}

fn code_table() -> Arc<DivisionTable> {
    Arc::new(
        DivisionTable::new()
            .with_current(
                Division::new("110101", "北京市")
                    .with_city("市辖区")
                    .with_county("东城区"),
            )
            .with_revision(
                "2015",
                Division::new("320811", "江苏省")
                    .with_city("淮安市")
                    .with_county("清河区"),
            )
            .with_revision(
                "GB2260-2018",
                Division::new("320811", "江苏省")
                    .with_city("淮安市")
                    .with_county("清江浦区"),
            ),
    )
}

#[test]
fn capacity_check_at_the_boundary() {
    assert_eq!(check_page_request(5, 2000).unwrap(), 10_000);
    assert!(matches!(
        check_page_request(5, 2001),
        Err(FetchError::CapacityExceeded { offset: 10_005, .. })
    ));
}

#[test]
fn resolver_prefers_newest_revision_and_reports_absent_codes() {
    let resolver = DivisionResolver::new(code_table());

    let moved = resolver.resolve("320811").unwrap().unwrap();
    assert_eq!(moved.county.as_deref(), Some("清江浦区"));
    assert_eq!(moved.revision.as_deref(), Some("GB2260-2018"));

    let current = resolver.resolve("110101").unwrap().unwrap();
    assert_eq!(current.revision, None);

    assert_eq!(resolver.resolve("999999").unwrap(), None);
    assert!(resolver.resolve("11010").is_err());
}

#[test]
fn harvest_stores_every_record_once() {
    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();

    let registry = FakeRegistry::new(25, vec!["110101", "320811", "999999"]);
    let fetcher = PagedFetcher::new(&registry, EndpointSettings::default());
    let resolver = DivisionResolver::new(code_table());
    let options = HarvestOptions {
        page_size: 10,
        ..HarvestOptions::default()
    };

    let run = run_harvest(&conn, &fetcher, &resolver, &options).unwrap();

    assert_eq!(run.status, "completed");
    assert_eq!(run.inserted, 25);
    assert_eq!(run.pages_fetched, 3);
    assert_eq!(registry.calls.load(Ordering::SeqCst), 3);
    assert_eq!(verify_count(&conn).unwrap(), 25);

    // Re-running the same harvest only finds duplicates
    let again = run_harvest(&conn, &fetcher, &resolver, &options).unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(again.duplicates, 25);

    let stats = get_province_stats(&conn).unwrap();
    let jiangsu = stats
        .iter()
        .find(|s| s.province.as_deref() == Some("江苏省"))
        .unwrap();
    assert_eq!(jiangsu.historical_count, jiangsu.person_count);
    assert!(stats.iter().any(|s| s.province.is_none()));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persons.csv");
    let persons = get_all_persons(&conn).unwrap();
    assert_eq!(export_csv(&path, &persons).unwrap(), 25);
}
