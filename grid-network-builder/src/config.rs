//! Run configuration.
//!
//! Values come from three layers, later ones winning: built-in defaults, an
//! optional TOML file, and command-line flags. The result is a pair of plain
//! values (`DatabaseConfig`, `BuilderConfig`) built once in `main` and passed
//! by reference from there on.
//!
//! ```toml
//! [database]
//! path = "thesis.db"
//! grid_table = "grid_voyage"
//! network_table = "grid_voyage_network"
//!
//! [builder]
//! batch_size = 10
//! distance_threshold = 11500.0
//! max_neighbors = 6
//! ```

use serde::Deserialize;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_DATABASE: &str = "grid_network.db";
pub const DEFAULT_GRID_TABLE: &str = "grid_voyage";
pub const DEFAULT_NETWORK_TABLE: &str = "grid_voyage_network";
pub const DEFAULT_BATCH_SIZE: u32 = 10;
/// Slightly above the grid spacing so float slack never drops a true neighbour.
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 11_500.0;
pub const DEFAULT_MAX_NEIGHBORS: u32 = 6;

const MAX_IDENTIFIER_LEN: usize = 63;

// ---------------------------------------------------------------------------
// TableName
// ---------------------------------------------------------------------------

/// A table name that is safe to splice into SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: &str) -> Result<Self, ConfigError> {
        let mut chars = name.chars();
        let head_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if head_ok && tail_ok && name.len() <= MAX_IDENTIFIER_LEN {
            Ok(Self(name.to_string()))
        } else {
            Err(ConfigError::InvalidIdentifier(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Where the grid and the network live.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub grid_table: TableName,
    pub network_table: TableName,
}

/// Tuning for one `build_adjacency` run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuilderConfig {
    /// First source id to process. Set past the last committed window to resume.
    pub start_id: i64,
    pub batch_size: NonZeroU32,
    pub distance_threshold: f64,
    pub max_neighbors: NonZeroU32,
}

impl BuilderConfig {
    pub fn new(
        start_id: i64,
        batch_size: u32,
        distance_threshold: f64,
        max_neighbors: u32,
    ) -> Result<Self, ConfigError> {
        let batch_size = NonZeroU32::new(batch_size).ok_or(ConfigError::InvalidValue {
            field: "batch_size",
            expected: "at least 1",
            value: batch_size.to_string(),
        })?;
        let max_neighbors = NonZeroU32::new(max_neighbors).ok_or(ConfigError::InvalidValue {
            field: "max_neighbors",
            expected: "at least 1",
            value: max_neighbors.to_string(),
        })?;
        if !distance_threshold.is_finite() || distance_threshold < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "distance_threshold",
                expected: "a finite, non-negative distance",
                value: distance_threshold.to_string(),
            });
        }
        Ok(Self { start_id, batch_size, distance_threshold, max_neighbors })
    }

    /// Defaults for everything but the mandatory start id.
    pub fn with_defaults(start_id: i64) -> Self {
        Self {
            start_id,
            batch_size: NonZeroU32::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroU32::MIN),
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            max_neighbors: NonZeroU32::new(DEFAULT_MAX_NEIGHBORS).unwrap_or(NonZeroU32::MIN),
        }
    }
}

// ---------------------------------------------------------------------------
// TOML file
// ---------------------------------------------------------------------------

/// Contents of the optional `--config` file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub builder: BuilderSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    pub path: Option<PathBuf>,
    pub grid_table: Option<String>,
    pub network_table: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuilderSection {
    pub batch_size: Option<u32>,
    pub distance_threshold: Option<f64>,
    pub max_neighbors: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Layering
// ---------------------------------------------------------------------------

/// Command-line values for the `[database]` section.
#[derive(Debug, Default, Clone)]
pub struct DatabaseOverrides {
    pub path: Option<PathBuf>,
    pub grid_table: Option<String>,
    pub network_table: Option<String>,
}

/// Command-line values for the `[builder]` section.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuilderOverrides {
    pub batch_size: Option<u32>,
    pub distance_threshold: Option<f64>,
    pub max_neighbors: Option<u32>,
}

impl DatabaseConfig {
    pub fn resolve(file: &FileConfig, cli: DatabaseOverrides) -> Result<Self, ConfigError> {
        let db = &file.database;
        let path = cli
            .path
            .or_else(|| db.path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));
        let grid = cli
            .grid_table
            .or_else(|| db.grid_table.clone())
            .unwrap_or_else(|| DEFAULT_GRID_TABLE.to_string());
        let network = cli
            .network_table
            .or_else(|| db.network_table.clone())
            .unwrap_or_else(|| DEFAULT_NETWORK_TABLE.to_string());

        Ok(Self {
            path,
            grid_table: TableName::new(&grid)?,
            network_table: TableName::new(&network)?,
        })
    }
}

impl BuilderConfig {
    pub fn resolve(
        file: &FileConfig,
        start_id: i64,
        cli: BuilderOverrides,
    ) -> Result<Self, ConfigError> {
        let b = &file.builder;
        Self::new(
            start_id,
            cli.batch_size.or(b.batch_size).unwrap_or(DEFAULT_BATCH_SIZE),
            cli.distance_threshold
                .or(b.distance_threshold)
                .unwrap_or(DEFAULT_DISTANCE_THRESHOLD),
            cli.max_neighbors.or(b.max_neighbors).unwrap_or(DEFAULT_MAX_NEIGHBORS),
        )
    }
}
