//! Builds the nearest-neighbour adjacency network between precomputed grid
//! cells, for shortest-path queries over maritime trajectories.
//!
//! The binary in `main.rs` wires these modules together; the library split
//! exists so the integration tests can drive a real on-disk store.

pub mod builder;
pub mod config;
pub mod error;
pub mod grid_import;
pub mod indexes;
pub mod spatial;
pub mod store;

pub use builder::{build_adjacency, BuildReport, WindowFailure};
pub use config::{BuilderConfig, DatabaseConfig, TableName};
pub use error::{BuildError, ConfigError, StoreError};
pub use indexes::{create_network_indexes, IndexReport, NetworkIndex};
pub use store::{NeighborQuery, SpatialStore, SqliteStore};
