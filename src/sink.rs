//! Append-only loading of canonical batches into SQLite.
//!
//! [`load`] runs inside a savepoint of the caller's transaction. A failed batch
//! rolls its savepoint back and leaves nothing behind; a successful one is
//! released into the transaction, which only the caller commits.

use std::sync::OnceLock;

use log::{debug, info};
use regex::Regex;
use rusqlite::{
    Transaction, params_from_iter,
    types::{ToSql, ToSqlOutput},
};

use crate::{data::Value, error::LoadError, transform::CanonicalBatch};

/// Terminal outcome of one [`load`] call. `code()` is 0 on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded { rows: usize },
    Failed { reason: String },
}

impl LoadStatus {
    pub fn code(&self) -> i32 {
        match self {
            LoadStatus::Loaded { .. } => 0,
            LoadStatus::Failed { .. } => 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code() == 0
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::String(s) => ToSqlOutput::from(s.as_str()),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Decimal(d) => ToSqlOutput::from(d.to_string()),
            Value::Boolean(b) => ToSqlOutput::from(*b),
            Value::Date(d) => ToSqlOutput::from(d.format("%Y-%m-%d").to_string()),
            Value::Timestamp(ts) => ToSqlOutput::from(ts.to_rfc3339()),
        })
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

/// Quotes `table` or `schema.table`; each part must be a plain identifier.
pub fn quote_table_name(destination: &str) -> Result<String, LoadError> {
    let parts = destination.trim().split('.').collect::<Vec<_>>();
    if parts.len() > 2 || parts.iter().any(|part| !identifier_pattern().is_match(part)) {
        return Err(LoadError::InvalidDestination(destination.to_string()));
    }
    Ok(parts
        .iter()
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join("."))
}

pub fn insert_statement(table: &str, columns: &[String]) -> String {
    let names = columns
        .iter()
        .map(|column| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {table} ({names}) VALUES ({placeholders})")
}

/// Inserts every row of `batch` or none of them.
pub fn try_load(
    tx: &mut Transaction<'_>,
    destination: &str,
    batch: &CanonicalBatch,
) -> Result<usize, LoadError> {
    let table = quote_table_name(destination)?;
    if batch.is_empty() {
        return Ok(0);
    }
    let insert_error = |source: rusqlite::Error| LoadError::Insert {
        table: destination.to_string(),
        source,
    };
    let savepoint = tx.savepoint().map_err(insert_error)?;
    {
        let mut statement = savepoint
            .prepare(&insert_statement(&table, &batch.columns))
            .map_err(insert_error)?;
        for row in &batch.rows {
            statement
                .execute(params_from_iter(row.iter()))
                .map_err(insert_error)?;
        }
    }
    savepoint.commit().map_err(insert_error)?;
    Ok(batch.len())
}

pub fn load(tx: &mut Transaction<'_>, destination: &str, batch: &CanonicalBatch) -> LoadStatus {
    match try_load(tx, destination, batch) {
        Ok(rows) => {
            info!("Load finished: {rows} row(s) appended to {destination}");
            LoadStatus::Loaded { rows }
        }
        Err(err) => {
            let reason = match std::error::Error::source(&err) {
                Some(source) => format!("{err}: {source}"),
                None => err.to_string(),
            };
            debug!("Load into {destination} rolled back: {reason}");
            LoadStatus::Failed { reason }
        }
    }
}
