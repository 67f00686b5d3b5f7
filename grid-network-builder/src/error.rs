//! Error types for the grid network builder.
//!
//! Fatal conditions are `Err` values. Per-window insert failures and index
//! failures are recoverable and travel inside the reports instead.

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the relational store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot read {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Configuration that cannot be used as given.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{field} must be {expected}, got {value}")]
    InvalidValue {
        field: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A table name that would not be safe to interpolate into SQL.
    #[error("invalid table name `{0}`: expected [A-Za-z_][A-Za-z0-9_]*, at most 63 chars")]
    InvalidIdentifier(String),
}

/// Conditions that abort a build before or outside the batch loop.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The grid table has no rows, so there is no `max_id` to walk to.
    #[error("grid table `{table}` is empty; nothing to build")]
    EmptyInput { table: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
