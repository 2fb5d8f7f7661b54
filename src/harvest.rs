// 🚜 Harvest Pipeline - stream → batches → SQLite, with a run record
//
// Drives a RecordStream to its end (or first error), storing persons one
// page-sized batch at a time.

use crate::db::{insert_persons, insert_run, HarvestRun};
use crate::division::{CodeTable, DivisionResolver};
use crate::fetcher::PagedFetcher;
use crate::stream::{produce_entities, CancelToken, ExhaustionPolicy};
use crate::transport::Transport;
use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub page_size: u32,
    pub step_over_pages: u32,
    pub policy: ExhaustionPolicy,
    /// First page to request
    pub start_page: u32,
    /// Stop after this many persons
    pub max_records: Option<usize>,
    pub cancel: CancelToken,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        HarvestOptions {
            page_size: 200,
            step_over_pages: 1,
            policy: ExhaustionPolicy::default(),
            start_page: 1,
            max_records: None,
            cancel: CancelToken::new(),
        }
    }
}

/// Run a harvest and record it in `harvest_runs`.
///
/// Stream errors do not make this function fail: they end the run with
/// status "failed" and the message in `HarvestRun::error`. Only storage
/// errors are returned as `Err`.
pub fn run_harvest<T: Transport, C: CodeTable>(
    conn: &Connection,
    fetcher: &PagedFetcher<T>,
    resolver: &DivisionResolver<C>,
    options: &HarvestOptions,
) -> Result<HarvestRun> {
    let mut run = HarvestRun::new(options.page_size, options.step_over_pages);
    insert_run(conn, &run)?;

    info!(
        run_id = %run.run_id,
        page_size = options.page_size,
        step_over_pages = options.step_over_pages,
        "harvest started"
    );

    let mut stream = produce_entities(fetcher, resolver, options.page_size, options.step_over_pages)?
        .with_policy(options.policy)
        .with_cancel_token(options.cancel.clone())
        .starting_at(options.start_page);

    let batch_size = options.page_size as usize;
    let mut batch = Vec::with_capacity(batch_size);
    let mut failure: Option<String> = None;
    let mut seen = 0usize;

    for item in stream.by_ref() {
        match item {
            Ok(person) => {
                batch.push(person);
                seen += 1;
            }
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "harvest stream failed");
                failure = Some(e.to_string());
                break;
            }
        }

        if batch.len() >= batch_size {
            let stats = insert_persons(conn, &batch, &run.run_id)?;
            run.inserted += stats.inserted;
            run.duplicates += stats.duplicates;
            batch.clear();
        }

        if options.max_records.map_or(false, |max| seen >= max) {
            info!(run_id = %run.run_id, seen, "record limit reached");
            break;
        }
    }

    if !batch.is_empty() {
        let stats = insert_persons(conn, &batch, &run.run_id)?;
        run.inserted += stats.inserted;
        run.duplicates += stats.duplicates;
    }

    run.pages_fetched = stream.pages_fetched();
    info!(
        run_id = %run.run_id,
        pages = run.pages_fetched,
        persons = stream.persons_yielded(),
        inserted = run.inserted,
        duplicates = run.duplicates,
        "harvest finished"
    );

    let status = if failure.is_some() {
        "failed"
    } else if options.cancel.is_cancelled() {
        "cancelled"
    } else {
        "completed"
    };
    run.finish(status, failure);
    insert_run(conn, &run)?;

    Ok(run)
}
