use crate::pipeline::YearOutput;
use crate::weights::REPLICATE_COUNT;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// One stored run of one processing year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub year: i32,
    pub fingerprint: String,
    pub households: i64,
    pub expenditures: i64,
    pub categories: i64,
    pub quality_issues: i64,
    pub recorded_at: DateTime<Utc>,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Runs (one row per processing year, replaced on re-run)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            year INTEGER PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            households INTEGER NOT NULL,
            expenditures INTEGER NOT NULL,
            categories INTEGER NOT NULL,
            quality_issues INTEGER NOT NULL,
            quality_report TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Unified households
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS households (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            year INTEGER NOT NULL,
            newid TEXT NOT NULL,
            source TEXT NOT NULL,
            scope INTEGER NOT NULL,
            final_weight REAL NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Aggregated costs (long format: one row per household, code, replicate)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS aggregated_costs (
            year INTEGER NOT NULL,
            newid TEXT NOT NULL,
            code TEXT NOT NULL,
            replicate INTEGER NOT NULL,
            value REAL NOT NULL,
            PRIMARY KEY (year, newid, code, replicate)
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_households_year ON households(year, newid)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_costs_code ON aggregated_costs(year, code)",
        [],
    )?;

    Ok(())
}

/// Store a year's outputs, replacing whatever an earlier run stored for it.
///
/// Zero aggregated values are not written; a missing row reads as zero.
pub fn record_year(conn: &mut Connection, output: &YearOutput) -> Result<RunSummary> {
    let tx = conn.transaction().context("Failed to open transaction")?;
    let year = output.year;

    tx.execute("DELETE FROM runs WHERE year = ?1", params![year])?;
    tx.execute("DELETE FROM households WHERE year = ?1", params![year])?;
    tx.execute("DELETE FROM aggregated_costs WHERE year = ?1", params![year])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO households (year, newid, source, scope, final_weight)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for record in &output.households.records {
            stmt.execute(params![
                year,
                record.newid,
                record.source.code(),
                record.scope,
                record.weights.final_weight(),
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO aggregated_costs (year, newid, code, replicate, value)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for record in output.aggregated.records() {
            for (i, value) in record.values.iter().enumerate() {
                if *value == 0.0 {
                    continue;
                }
                stmt.execute(params![
                    year,
                    record.household_id,
                    record.category_code,
                    (i + 1) as i64,
                    value
                ])?;
            }
        }
    }

    let summary = RunSummary {
        year,
        fingerprint: output.hierarchy.fingerprint(),
        households: output.households.len() as i64,
        expenditures: output.expenditures.len() as i64,
        categories: output.aggregated.codes().len() as i64,
        quality_issues: output.quality.issues.len() as i64,
        recorded_at: Utc::now(),
    };
    let report_json = serde_json::to_string(&output.quality)?;

    tx.execute(
        "INSERT INTO runs (
            year, fingerprint, households, expenditures, categories,
            quality_issues, quality_report, recorded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            summary.year,
            summary.fingerprint,
            summary.households,
            summary.expenditures,
            summary.categories,
            summary.quality_issues,
            report_json,
            summary.recorded_at.to_rfc3339(),
        ],
    )?;

    tx.commit().context("Failed to commit year")?;
    Ok(summary)
}

pub fn get_runs(conn: &Connection) -> Result<Vec<RunSummary>> {
    let mut stmt = conn.prepare(
        "SELECT year, fingerprint, households, expenditures, categories,
                quality_issues, recorded_at
         FROM runs
         ORDER BY year",
    )?;

    let runs = stmt
        .query_map([], |row| {
            let recorded_at: String = row.get(6)?;
            Ok(RunSummary {
                year: row.get(0)?,
                fingerprint: row.get(1)?,
                households: row.get(2)?,
                expenditures: row.get(3)?,
                categories: row.get(4)?,
                quality_issues: row.get(5)?,
                recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(runs)
}

/// Stored replicate values of one household and code; absent rows read as zero
pub fn get_aggregated_values(
    conn: &Connection,
    year: i32,
    newid: &str,
    code: &str,
) -> Result<Vec<f64>> {
    let mut values = vec![0.0; REPLICATE_COUNT];
    let mut stmt = conn.prepare(
        "SELECT replicate, value FROM aggregated_costs
         WHERE year = ?1 AND newid = ?2 AND code = ?3",
    )?;
    let rows = stmt.query_map(params![year, newid, code], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
    })?;
    for row in rows {
        let (replicate, value) = row?;
        if let Some(slot) = values.get_mut((replicate - 1) as usize) {
            *slot = value;
        }
    }
    Ok(values)
}

/// Weighted total of one code across households (final weight column)
pub fn get_code_total(conn: &Connection, year: i32, code: &str) -> Result<f64> {
    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(value), 0.0) FROM aggregated_costs
         WHERE year = ?1 AND code = ?2 AND replicate = ?3",
        params![year, code, REPLICATE_COUNT as i64],
        |row| row.get(0),
    )?;
    Ok(total)
}

pub fn verify_count(conn: &Connection, year: i32) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM households WHERE year = ?1",
        params![year],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================
