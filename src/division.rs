// 🗺️ Division Resolution - historical administrative-division code tables
//
// A 6-digit geographic code encodes the region at the time an identifier was
// issued. Regions get renamed, merged and split, so a code that vanished
// from the current table may still exist in an older revision.

use crate::error::DivisionError;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Length of the geographic code prefix of an identifier
pub const CODE_LEN: usize = 6;

/// File stem holding the current revision inside a code-table directory
pub const CURRENT_STEM: &str = "current";

// ============================================================================
// DIVISION
// ============================================================================

/// Administrative division as recorded in one revision of the code table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Division {
    pub code: String,
    pub province: String,
    pub city: Option<String>,
    pub county: Option<String>,

    /// Revision key the division was found under (`None` = current revision)
    pub revision: Option<String>,
}

impl Division {
    pub fn new(code: &str, province: &str) -> Self {
        Division {
            code: code.to_string(),
            province: province.to_string(),
            city: None,
            county: None,
            revision: None,
        }
    }

    /// Builder pattern: add city
    pub fn with_city(mut self, city: &str) -> Self {
        self.city = Some(city.to_string());
        self
    }

    /// Builder pattern: add county / district
    pub fn with_county(mut self, county: &str) -> Self {
        self.county = Some(county.to_string());
        self
    }

    /// "Province City County", skipping missing levels
    pub fn full_name(&self) -> String {
        let mut parts = vec![self.province.as_str()];
        parts.extend(self.city.as_deref());
        parts.extend(self.county.as_deref());
        parts.join(" ")
    }

    /// Whether the match came from a historical revision
    pub fn is_historical(&self) -> bool {
        self.revision.is_some()
    }
}

// ============================================================================
// CODE TABLE COLLABORATOR
// ============================================================================

/// Which revision a lookup targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision<'a> {
    Current,
    Historical(&'a str),
}

/// Read-only, multi-revision code table.
///
/// `lookup` answers "absent" with `None`, so callers can walk revisions as a
/// plain loop over outcomes.
pub trait CodeTable {
    fn lookup(&self, code: &str, revision: Revision<'_>) -> Option<Division>;

    /// Every available revision key. `None` is the sentinel for the current revision.
    fn revision_keys(&self) -> Vec<Option<String>>;
}

impl<T: CodeTable + ?Sized> CodeTable for &T {
    fn lookup(&self, code: &str, revision: Revision<'_>) -> Option<Division> {
        (**self).lookup(code, revision)
    }

    fn revision_keys(&self) -> Vec<Option<String>> {
        (**self).revision_keys()
    }
}

impl<T: CodeTable + ?Sized> CodeTable for Arc<T> {
    fn lookup(&self, code: &str, revision: Revision<'_>) -> Option<Division> {
        (**self).lookup(code, revision)
    }

    fn revision_keys(&self) -> Vec<Option<String>> {
        (**self).revision_keys()
    }
}

// ============================================================================
// IN-MEMORY TABLE
// ============================================================================

/// One row of a revision CSV file: `code,province,city,county`
#[derive(Debug, Deserialize)]
struct CodeRow {
    code: String,
    province: String,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    county: Option<String>,
}

impl CodeRow {
    fn into_division(self) -> Division {
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        Division {
            code: self.code.trim().to_string(),
            province: self.province,
            city: non_empty(self.city),
            county: non_empty(self.county),
            revision: None,
        }
    }
}

/// Code table held in memory, immutable once built
#[derive(Debug, Clone, Default)]
pub struct DivisionTable {
    current: HashMap<String, Division>,
    revisions: BTreeMap<String, HashMap<String, Division>>,
}

impl DivisionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: add a division to the current revision
    pub fn with_current(mut self, division: Division) -> Self {
        self.current.insert(division.code.clone(), division);
        self
    }

    /// Builder pattern: add a division to a historical revision
    pub fn with_revision(mut self, key: &str, division: Division) -> Self {
        self.revisions
            .entry(key.to_string())
            .or_default()
            .insert(division.code.clone(), division);
        self
    }

    /// Load `current.csv` plus one `<revision>.csv` per historical revision
    ///
    /// # Example layout:
    /// ```text
    /// codes/current.csv
    /// codes/2015.csv
    /// codes/2018.csv
    /// ```
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut table = DivisionTable::new();

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read code-table directory: {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }

            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };

            let divisions = load_revision_csv(&path)?;
            debug!(revision = %stem, codes = divisions.len(), "loaded code-table revision");

            let target = if stem == CURRENT_STEM {
                &mut table.current
            } else {
                table.revisions.entry(stem).or_default()
            };
            for division in divisions {
                target.insert(division.code.clone(), division);
            }
        }

        Ok(table)
    }

    /// Number of codes in the current revision
    pub fn current_len(&self) -> usize {
        self.current.len()
    }

    /// Number of historical revisions
    pub fn revision_count(&self) -> usize {
        self.revisions.len()
    }
}

fn load_revision_csv(path: &Path) -> Result<Vec<Division>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open code-table file: {}", path.display()))?;

    let mut divisions = Vec::new();
    for (line_num, result) in rdr.deserialize::<CodeRow>().enumerate() {
        let row = result.with_context(|| {
            format!("Failed to parse line {} in {}", line_num + 2, path.display())
        })?;
        divisions.push(row.into_division());
    }

    Ok(divisions)
}

impl CodeTable for DivisionTable {
    fn lookup(&self, code: &str, revision: Revision<'_>) -> Option<Division> {
        match revision {
            Revision::Current => self.current.get(code).cloned(),
            Revision::Historical(key) => self
                .revisions
                .get(key)
                .and_then(|codes| codes.get(code))
                .map(|division| Division {
                    revision: Some(key.to_string()),
                    ..division.clone()
                }),
        }
    }

    fn revision_keys(&self) -> Vec<Option<String>> {
        std::iter::once(None)
            .chain(self.revisions.keys().cloned().map(Some))
            .collect()
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Extract the 4-digit year of a revision key.
///
/// Within a digit run the leftmost four digits forming a year in
/// 1900..=2099 count ("20180601" and "r12018" both yield 2018). Across
/// runs the last one carrying a year wins, so a range key such as
/// "1999-2018" sorts by its end year and "GB2260-2018" yields 2018.
pub fn revision_year(key: &str) -> Option<u16> {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    let digits = DIGITS.get_or_init(|| Regex::new(r"[0-9]+").expect("static regex"));

    digits
        .find_iter(key)
        .filter_map(|m| year_in_run(m.as_str()))
        .last()
}

fn year_in_run(run: &str) -> Option<u16> {
    run.as_bytes()
        .windows(4)
        .filter_map(|w| std::str::from_utf8(w).ok()?.parse::<u16>().ok())
        .find(|year| (1900..=2099).contains(year))
}

/// Six ASCII digits, nothing else
pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}

/// Finds the division of a geographic code, falling back through history.
///
/// Holds no mutable state: the same code against the same table always
/// resolves to the same answer.
#[derive(Debug, Clone)]
pub struct DivisionResolver<C: CodeTable> {
    table: C,
}

impl<C: CodeTable> DivisionResolver<C> {
    pub fn new(table: C) -> Self {
        DivisionResolver { table }
    }

    /// Historical revision keys in search order: year descending, sentinel
    /// and year-less keys dropped
    pub fn fallback_order(&self) -> Vec<String> {
        let mut keyed: Vec<(u16, String)> = self
            .table
            .revision_keys()
            .into_iter()
            .flatten()
            .filter_map(|key| match revision_year(&key) {
                Some(year) => Some((year, key)),
                None => {
                    debug!(revision = %key, "skipping revision key without a year");
                    None
                }
            })
            .collect();

        keyed.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        keyed.into_iter().map(|(_, key)| key).collect()
    }

    /// Resolve a 6-digit geographic code.
    ///
    /// # Returns
    /// * `Ok(Some(division))` - found in the current or a historical revision
    /// * `Ok(None)` - no revision knows the code
    /// * `Err(MalformedCode)` - prefix is not six ASCII digits
    pub fn resolve(&self, code_prefix: &str) -> Result<Option<Division>, DivisionError> {
        if !is_well_formed(code_prefix) {
            return Err(DivisionError::MalformedCode(code_prefix.to_string()));
        }

        if let Some(division) = self.table.lookup(code_prefix, Revision::Current) {
            return Ok(Some(division));
        }

        for key in self.fallback_order() {
            if let Some(division) = self.table.lookup(code_prefix, Revision::Historical(&key)) {
                debug!(code = code_prefix, revision = %key, "resolved from historical revision");
                return Ok(Some(division));
            }
        }

        debug!(code = code_prefix, "code absent from every revision");
        Ok(None)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn sample_table() -> DivisionTable {
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
                "2018",
                Division::new("320811", "江苏省")
                    .with_city("淮安市")
                    .with_county("清江浦区"),
            )
            .with_revision("2010", Division::new("420000", "湖北省"))
    }

    #[test]
    fn test_current_revision_fast_path() {
        let resolver = DivisionResolver::new(sample_table());

        let division = resolver.resolve("110101").unwrap().unwrap();

        assert_eq!(division.province, "北京市");
        assert_eq!(division.county.as_deref(), Some("东城区"));
        assert!(!division.is_historical());
    }

    #[test]
    fn test_current_revision_wins_over_history() {
        let table = sample_table()
            .with_current(
                Division::new("320811", "江苏省")
                    .with_city("淮安市")
                    .with_county("清江浦区（现行）"),
            )
            .with_revision(
                "2016",
                Division::new("110101", "北京市")
                    .with_city("市辖区")
                    .with_county("东城区（旧）"),
            );
        let resolver = DivisionResolver::new(table);

        let moved = resolver.resolve("320811").unwrap().unwrap();
        assert_eq!(moved.revision, None);
        assert_eq!(moved.county.as_deref(), Some("清江浦区（现行）"));

        let beijing = resolver.resolve("110101").unwrap().unwrap();
        assert_eq!(beijing.revision, None);
        assert_eq!(beijing.county.as_deref(), Some("东城区"));
    }

    #[test]
    fn test_fallback_prefers_most_recent_revision() {
        let resolver = DivisionResolver::new(sample_table());

        let division = resolver.resolve("320811").unwrap().unwrap();

        assert_eq!(division.revision.as_deref(), Some("2018"));
        assert_eq!(division.county.as_deref(), Some("清江浦区"));
    }

    #[test]
    fn test_older_revision_still_found() {
        let resolver = DivisionResolver::new(sample_table());

        let division = resolver.resolve("420000").unwrap().unwrap();

        assert_eq!(division.revision.as_deref(), Some("2010"));
        assert_eq!(division.full_name(), "湖北省");
    }

    #[test]
    fn test_unknown_code_is_absent_not_error() {
        let resolver = DivisionResolver::new(sample_table());
        assert_eq!(resolver.resolve("999999").unwrap(), None);
    }

    #[test]
    fn test_malformed_code_is_error() {
        let resolver = DivisionResolver::new(sample_table());

        assert_eq!(
            resolver.resolve("11010"),
            Err(DivisionError::MalformedCode("11010".to_string()))
        );
        assert!(resolver.resolve("11010X").is_err());
        assert!(resolver.resolve("１１０１０１").is_err());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver = DivisionResolver::new(sample_table());

        let first = resolver.resolve("320811").unwrap();
        for _ in 0..10 {
            assert_eq!(resolver.resolve("320811").unwrap(), first);
        }
    }

    #[test]
    fn test_fallback_order_skips_sentinel_and_yearless_keys() {
        let table = sample_table()
            .with_revision("GB2260-2020", Division::new("100000", "测试"))
            .with_revision("legacy", Division::new("100000", "测试"));
        let resolver = DivisionResolver::new(table);

        assert_eq!(
            resolver.fallback_order(),
            vec!["GB2260-2020", "2018", "2015", "2010"]
        );
    }

    #[test]
    fn test_revision_year() {
        assert_eq!(revision_year("2015"), Some(2015));
        assert_eq!(revision_year("GB2260-2018"), Some(2018));
        assert_eq!(revision_year("20180601"), Some(2018));
        assert_eq!(revision_year("v1"), None);
        assert_eq!(revision_year("latest"), None);
    }

    #[test]
    fn test_revision_year_ranges_and_embedded_years() {
        assert_eq!(revision_year("1999-2018"), Some(2018));
        assert_eq!(revision_year("r12018"), Some(2018));
        assert_eq!(revision_year("20191231"), Some(2019));
        assert_eq!(revision_year("2015-v2"), Some(2015));
    }

    #[test]
    fn test_range_key_sorts_by_end_year() {
        let table = sample_table().with_revision(
            "1999-2016",
            Division::new("320811", "江苏省")
                .with_city("淮安市")
                .with_county("清浦区"),
        );
        let resolver = DivisionResolver::new(table);

        assert_eq!(
            resolver.fallback_order(),
            vec!["2018", "1999-2016", "2015", "2010"]
        );
    }

    #[test]
    fn test_revision_keys_include_sentinel() {
        let keys = sample_table().revision_keys();
        assert_eq!(keys[0], None);
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();

        let mut current = std::fs::File::create(dir.path().join("current.csv")).unwrap();
        writeln!(current, "code,province,city,county").unwrap();
        writeln!(current, "110101,北京市,市辖区,东城区").unwrap();
        writeln!(current, "110000,北京市,,").unwrap();

        let mut old = std::fs::File::create(dir.path().join("2015.csv")).unwrap();
        writeln!(old, "code,province,city,county").unwrap();
        writeln!(old, "320811,江苏省,淮安市,清河区").unwrap();

        std::fs::write(dir.path().join("README.txt"), "ignored").unwrap();

        let table = DivisionTable::load_dir(dir.path()).unwrap();

        assert_eq!(table.current_len(), 2);
        assert_eq!(table.revision_count(), 1);

        let top = table.lookup("110000", Revision::Current).unwrap();
        assert_eq!(top.city, None);
        assert_eq!(top.county, None);

        let resolver = DivisionResolver::new(&table);
        let old_code = resolver.resolve("320811").unwrap().unwrap();
        assert_eq!(old_code.revision.as_deref(), Some("2015"));
    }

    #[test]
    fn test_load_dir_missing_directory() {
        let result = DivisionTable::load_dir(Path::new("/definitely/not/here"));
        assert!(result.is_err());
    }
}
