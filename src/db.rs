// 🗄️ Storage - harvested persons in SQLite (WAL)
//
// The stream never deduplicates, so the idempotency hash is what keeps
// overlapping or re-harvested pages from producing duplicate rows.

use crate::division::Division;
use crate::person::{Person, DATE_FORMAT};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// HARVEST RUN
// ============================================================================

/// One execution of the harvester (audit trail)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub page_size: u32,
    pub step_over_pages: u32,
    pub pages_fetched: u32,
    pub inserted: usize,
    pub duplicates: usize,
    /// "running", "completed", "failed" or "cancelled"
    pub status: String,
    pub error: Option<String>,
}

impl HarvestRun {
    pub fn new(page_size: u32, step_over_pages: u32) -> Self {
        HarvestRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            page_size,
            step_over_pages,
            pages_fetched: 0,
            inserted: 0,
            duplicates: 0,
            status: "running".to_string(),
            error: None,
        }
    }

    /// Close the run with a final status
    pub fn finish(&mut self, status: &str, error: Option<String>) {
        self.finished_at = Some(Utc::now());
        self.status = status.to_string();
        self.error = error;
    }
}

/// Result of one batch insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertStats {
    pub inserted: usize,
    pub duplicates: usize,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Persons Table
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS persons (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_hash TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            listed_date TEXT NOT NULL,
            id_code TEXT NOT NULL,
            department TEXT NOT NULL,
            division_code TEXT,
            province TEXT,
            city TEXT,
            county TEXT,
            division_revision TEXT,
            run_id TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Harvest Runs Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS harvest_runs (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            page_size INTEGER NOT NULL,
            step_over_pages INTEGER NOT NULL,
            pages_fetched INTEGER NOT NULL DEFAULT 0,
            inserted INTEGER NOT NULL DEFAULT 0,
            duplicates INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            error TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_listed_date ON persons(listed_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_province ON persons(province)",
        [],
    )?;

    Ok(())
}

/// Insert persons, skipping rows whose idempotency hash is already stored
pub fn insert_persons(conn: &Connection, persons: &[Person], run_id: &str) -> Result<InsertStats> {
    let mut stats = InsertStats::default();

    for person in persons {
        let hash = person.compute_idempotency_hash();
        let division = person.division.as_ref();

        let result = conn.execute(
            "INSERT INTO persons (
                idempotency_hash, name, listed_date, id_code, department,
                division_code, province, city, county, division_revision, run_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                hash,
                person.name,
                person.listed_date.format(DATE_FORMAT).to_string(),
                person.id_code,
                person.department,
                division.map(|d| &d.code),
                division.map(|d| &d.province),
                division.and_then(|d| d.city.as_ref()),
                division.and_then(|d| d.county.as_ref()),
                division.and_then(|d| d.revision.as_ref()),
                run_id,
            ],
        );

        match result {
            Ok(_) => stats.inserted += 1,
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                stats.duplicates += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(stats)
}

pub fn insert_run(conn: &Connection, run: &HarvestRun) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO harvest_runs (
            run_id, started_at, finished_at, page_size, step_over_pages,
            pages_fetched, inserted, duplicates, status, error
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            run.run_id,
            run.started_at.to_rfc3339(),
            run.finished_at.map(|dt| dt.to_rfc3339()),
            run.page_size,
            run.step_over_pages,
            run.pages_fetched,
            run.inserted as i64,
            run.duplicates as i64,
            run.status,
            run.error,
        ],
    )?;

    info!(
        run_id = %run.run_id,
        status = %run.status,
        inserted = run.inserted,
        duplicates = run.duplicates,
        "harvest run recorded"
    );
    Ok(())
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// All runs, most recent first
pub fn get_runs(conn: &Connection) -> Result<Vec<HarvestRun>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, started_at, finished_at, page_size, step_over_pages,
                pages_fetched, inserted, duplicates, status, error
         FROM harvest_runs
         ORDER BY started_at DESC",
    )?;

    let runs = stmt
        .query_map([], |row| {
            let started_at: String = row.get(1)?;
            let finished_at: Option<String> = row.get(2)?;
            let inserted: i64 = row.get(6)?;
            let duplicates: i64 = row.get(7)?;

            Ok(HarvestRun {
                run_id: row.get(0)?,
                started_at: parse_rfc3339(&started_at).unwrap_or_default(),
                finished_at: finished_at.as_deref().and_then(parse_rfc3339),
                page_size: row.get(3)?,
                step_over_pages: row.get(4)?,
                pages_fetched: row.get(5)?,
                inserted: inserted as usize,
                duplicates: duplicates as usize,
                status: row.get(8)?,
                error: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(runs)
}

pub fn get_all_persons(conn: &Connection) -> Result<Vec<Person>> {
    let mut stmt = conn.prepare(
        "SELECT name, listed_date, id_code, department,
                division_code, province, city, county, division_revision
         FROM persons
         ORDER BY listed_date DESC, id",
    )?;

    let persons = stmt
        .query_map([], |row| {
            let date_str: String = row.get(1)?;
            let listed_date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
            })?;

            let division_code: Option<String> = row.get(4)?;
            let province: Option<String> = row.get(5)?;
            let division = match (division_code, province) {
                (Some(code), Some(province)) => Some(Division {
                    code,
                    province,
                    city: row.get(6)?,
                    county: row.get(7)?,
                    revision: row.get(8)?,
                }),
                _ => None,
            };

            Ok(Person {
                name: row.get(0)?,
                listed_date,
                id_code: row.get(2)?,
                department: row.get(3)?,
                division,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(persons)
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM persons", [], |row| row.get(0))?;

    Ok(count)
}

/// Province statistics
#[derive(Debug, Clone, PartialEq)]
pub struct ProvinceStat {
    /// `None` groups persons whose division could not be resolved
    pub province: Option<String>,
    pub person_count: i64,
    /// Persons resolved through a historical revision
    pub historical_count: i64,
    pub date_range: String,
}

/// Get statistics grouped by province
pub fn get_province_stats(conn: &Connection) -> Result<Vec<ProvinceStat>> {
    let mut stmt = conn.prepare(
        "SELECT
            province,
            COUNT(*) as count,
            SUM(CASE WHEN division_revision IS NOT NULL THEN 1 ELSE 0 END) as historical,
            MIN(listed_date) || ' - ' || MAX(listed_date) as date_range
         FROM persons
         GROUP BY province
         ORDER BY count DESC, province",
    )?;

    let stats = stmt
        .query_map([], |row| {
            Ok(ProvinceStat {
                province: row.get(0)?,
                person_count: row.get(1)?,
                historical_count: row.get(2)?,
                date_range: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(stats)
}

// ============================================================================
// TESTS
// ============================================================================
