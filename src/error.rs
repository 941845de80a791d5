//! Error taxonomy for the extract/transform/load layers.
//!
//! Each pipeline stage owns one error enum so callers can tell a broken source
//! apart from a stale descriptor or a destination failure. [`Error`] unifies them
//! for the scheduler and the CLI, which are the only places that log and move on.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Opening source {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Requesting {url}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Source {url} answered with HTTP status {status}")]
    Status { url: String, status: u16 },
    #[error("Unsupported source scheme in '{locator}'")]
    UnsupportedScheme { locator: String },
    #[error("Unknown encoding '{0}'")]
    Encoding(String),
    #[error("Delimiter '{0}' must be an ASCII character")]
    Delimiter(char),
    #[error("Template '{template}' references unknown placeholder '{placeholder}'")]
    Template {
        template: String,
        placeholder: String,
    },
    #[error("Decoding record {record} of {locator}")]
    Decode {
        locator: String,
        record: u64,
        #[source]
        source: csv::Error,
    },
    #[error("Reading header of {locator}")]
    Header {
        locator: String,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("Dataset '{dataset}' has no mapping for raw column(s): {}", .columns.join(", "))]
    UnmappedColumns {
        dataset: String,
        columns: Vec<String>,
    },
    #[error("Dataset '{dataset}' is missing mandatory raw column(s): {}", .columns.join(", "))]
    MissingColumns {
        dataset: String,
        columns: Vec<String>,
    },
    #[error("Dataset '{dataset}' maps column(s) without a declared type: {}", .columns.join(", "))]
    Untyped {
        dataset: String,
        columns: Vec<String>,
    },
    #[error("Dataset '{dataset}' declares type(s) for unmapped column(s): {}", .columns.join(", "))]
    Orphaned {
        dataset: String,
        columns: Vec<String>,
    },
    #[error("Dataset '{dataset}' declares {what} '{name}' more than once")]
    Duplicate {
        dataset: String,
        what: &'static str,
        name: String,
    },
    #[error("Dataset '{dataset}' uses invalid canonical column name '{name}'")]
    InvalidName { dataset: String, name: String },
    #[error("Dataset '{dataset}' column '{column}': {reason}")]
    InvalidDecoding {
        dataset: String,
        column: String,
        reason: String,
    },
    #[error("Parsing descriptor: {0}")]
    Parse(String),
    #[error("Unknown dataset '{0}'")]
    UnknownDataset(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformationError {
    #[error("Row {row}: required column '{column}' is empty")]
    MissingValue { row: usize, column: String },
    #[error("Row {row}: cannot read '{value}' in column '{column}' as {expected}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
        expected: &'static str,
    },
    #[error("Row {row}: cannot derive a period from {detail}")]
    InvalidPeriod { row: usize, detail: String },
    #[error("Row {row}: no period contains {date}")]
    UnresolvedPeriod { row: usize, date: chrono::NaiveDate },
    #[error("Row {row}: geography code '{code}' is unknown")]
    UnresolvedGeography { row: usize, code: String },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Invalid destination table name '{0}'")]
    InvalidDestination(String),
    #[error("Inserting into {table}")]
    Insert {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Loading into {table} finished with status {code}: {reason}")]
    Status {
        table: String,
        code: i32,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Opening configuration {path:?}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parsing configuration {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Operation '{operation}' refers to unknown dataset '{dataset}'")]
    UnknownDataset { operation: String, dataset: String },
    #[error("Operation '{0}' is configured more than once")]
    DuplicateOperation(String),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Transformation(#[from] TransformationError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Database error")]
    Store(#[from] rusqlite::Error),
}

impl Error {
    /// Short label used when summarizing failed captures.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Extraction(_) => "extraction",
            Error::Mapping(_) => "mapping",
            Error::Transformation(_) => "transformation",
            Error::Load(_) => "load",
            Error::Config(_) => "config",
            Error::Store(_) => "store",
        }
    }

    /// Renders the error followed by its chain of sources, `outer: inner: root`.
    pub fn chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            let text = cause.to_string();
            if !rendered.ends_with(&text) {
                rendered.push_str(": ");
                rendered.push_str(&text);
            }
            current = cause.source();
        }
        rendered
    }
}
