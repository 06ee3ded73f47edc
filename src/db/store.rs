//! SQLite statistics store.
//!
//! Samples live in one table per granularity, named `statistics<period>`.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result as SqlResult, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use super::models::*;
use super::query::{LowerBound, Query, QueryError, Selector, UpperBound};

const SCHEMA_TEMPLATE: &str = include_str!("../../migrations/000001_statistics.up.sql");

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Sort and range key of a row. Rows written by other ingestion paths may use
/// any SQLite time string (`T` separator, `Z` suffix), so text order is not
/// time order.
const TIMESTAMP_KEY: &str = "julianday(timestamp)";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("invalid collection name {0}")]
    InvalidCollection(String),
    #[error("invalid aggregate JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Name of the collection holding samples of the given granularity.
pub fn collection_name(period: u32) -> String {
    format!("statistics{}", period)
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open the store at `url`: `sqlite://path`, `sqlite::memory:` or a plain path.
    pub fn open(url: &str) -> Result<Self, DbError> {
        let conn = match url.strip_prefix("sqlite://").unwrap_or(url) {
            ":memory:" | "sqlite::memory:" => Connection::open_in_memory()?,
            path => Connection::open(path)?,
        };
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the collection for `period` if it does not exist yet.
    pub fn ensure_collection(&self, period: u32) -> Result<(), DbError> {
        let coll = collection_name(period);
        let conn = self.conn();
        conn.execute_batch(&SCHEMA_TEMPLATE.replace("{coll}", &coll))
            .map_err(|e| DbError::Migration(format!("creating {} failed: {}", coll, e)))?;
        Ok(())
    }

    pub fn has_collection(&self, coll: &str) -> Result<bool, DbError> {
        let conn = self.conn();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![coll],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Add statistics rows in batch to the collection for `period`.
    pub fn add_statistics(&self, period: u32, rows: &[StatisticsRow]) -> Result<(), DbError> {
        if rows.is_empty() {
            return Ok(());
        }
        self.ensure_collection(period)?;

        let coll = collection_name(period);
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (resource_id, counter_name, timestamp, unit, period, period_start, period_end,
                                 duration, min, max, avg, sum, count, aggregate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                coll
            ))?;

            for r in rows {
                let aggregate = r.aggregate.as_ref().map(serde_json::to_string).transpose()?;
                stmt.execute(params![
                    r.resource_id,
                    r.counter_name,
                    format_db_time(r.timestamp),
                    r.unit,
                    r.period,
                    format_db_time(r.period_start),
                    format_db_time(r.period_end),
                    r.duration,
                    r.min,
                    r.max,
                    r.avg,
                    r.sum,
                    r.count,
                    aggregate,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Rows of `coll` matching `query`, newest first.
    ///
    /// A collection that does not exist yields no rows.
    pub fn find_statistics(&self, coll: &str, query: &Query, limit: Option<usize>) -> Result<Vec<Statistics>, DbError> {
        if !coll.starts_with("statistics") || !coll["statistics".len()..].chars().all(|c| c.is_ascii_digit()) {
            return Err(DbError::InvalidCollection(coll.to_string()));
        }
        if !self.has_collection(coll)? {
            tracing::debug!("Collection {} does not exist", coll);
            return Ok(Vec::new());
        }

        let (where_clause, mut values) = where_clause(query);
        let mut sql = format!(
            "SELECT resource_id, unit, period, period_start, period_end, duration, min, max, avg, sum, count, aggregate
             FROM {}{} ORDER BY {} DESC",
            coll, where_clause, TIMESTAMP_KEY
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT ?{}", values.len() + 1));
            values.push(SqlValue::Integer(limit as i64));
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), row_to_statistics)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }
}

/// Render `query` as a SQL `WHERE` clause plus its positional parameters.
fn where_clause(query: &Query) -> (String, Vec<SqlValue>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    for (column, selector) in [
        ("counter_name", &query.counter_name),
        ("resource_id", &query.resource_id),
    ] {
        match selector {
            Some(Selector::One(v)) => {
                values.push(SqlValue::Text(v.clone()));
                clauses.push(format!("{} = ?{}", column, values.len()));
            }
            Some(Selector::Many(vs)) => {
                let mut placeholders = Vec::with_capacity(vs.len());
                for v in vs {
                    values.push(SqlValue::Text(v.clone()));
                    placeholders.push(format!("?{}", values.len()));
                }
                if placeholders.is_empty() {
                    clauses.push("0".to_string());
                } else {
                    clauses.push(format!("{} IN ({})", column, placeholders.join(", ")));
                }
            }
            None => {}
        }
    }

    let (op, bound) = match query.timestamp.lower {
        Some(LowerBound::Inclusive(t)) => (">=", Some(t)),
        Some(LowerBound::Exclusive(t)) => (">", Some(t)),
        None => ("", None),
    };
    if let Some(t) = bound {
        values.push(SqlValue::Text(format_db_time(t)));
        clauses.push(format!("{} {} julianday(?{})", TIMESTAMP_KEY, op, values.len()));
    }

    let (op, bound) = match query.timestamp.upper {
        Some(UpperBound::Inclusive(t)) => ("<=", Some(t)),
        Some(UpperBound::Exclusive(t)) => ("<", Some(t)),
        None => ("", None),
    };
    if let Some(t) = bound {
        values.push(SqlValue::Text(format_db_time(t)));
        clauses.push(format!("{} {} julianday(?{})", TIMESTAMP_KEY, op, values.len()));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

fn row_to_statistics(row: &Row<'_>) -> SqlResult<Statistics> {
    let period: u32 = row.get(2)?;
    let period_start = get_time(row, 3)?;
    let period_end = get_time(row, 4)?;
    let duration: Option<f64> = row.get(5)?;
    let aggregate: Option<String> = row.get(11)?;
    let aggregate = match aggregate {
        Some(json) => Some(serde_json::from_str::<HashMap<String, f64>>(&json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };

    Ok(Statistics {
        resource_id: row.get(0)?,
        unit: row.get(1)?,
        period,
        period_start,
        period_end,
        duration: duration.unwrap_or(period as f64),
        duration_start: period_start,
        duration_end: period_end,
        groupby: None,
        min: row.get(6)?,
        max: row.get(7)?,
        avg: row.get(8)?,
        sum: row.get(9)?,
        count: row.get(10)?,
        aggregate,
    })
}

fn get_time(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_db_time(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp {:?}", s).into(),
        )
    })
}

/// Format a timestamp so that text order matches time order.
pub fn format_db_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
pub fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}
