// grid-network-builder/src/indexes.rs
// Supporting indexes on the network table, created once after the batch loop.
// Each index is attempted on its own; one failure never skips the others.

use tracing::{error, info};

use crate::config::TableName;
use crate::error::StoreError;
use crate::store::SpatialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkIndex {
    /// R-tree over each track's bounding box, keyed by `edge_id` and kept
    /// current by triggers on the network table.
    Track,
    Source,
    Target,
}

impl NetworkIndex {
    pub const ALL: [NetworkIndex; 3] = [Self::Track, Self::Source, Self::Target];

    pub fn name(&self, network: &TableName) -> String {
        let suffix = match self {
            Self::Track => "track",
            Self::Source => "source",
            Self::Target => "target",
        };
        format!("idx_{network}_{suffix}")
    }

    /// Statements that create the index. No `IF NOT EXISTS`, so an index
    /// that is already there shows up as a failure.
    pub(crate) fn ddl(&self, network: &TableName) -> String {
        let name = self.name(network);
        match self {
            Self::Track => format!(
                "CREATE VIRTUAL TABLE {name} USING rtree(id, min_lon, max_lon, min_lat, max_lat);
                 INSERT INTO {name} (id, min_lon, max_lon, min_lat, max_lat)
                 SELECT edge_id, st_xmin(track), st_xmax(track), st_ymin(track), st_ymax(track)
                 FROM {network};
                 CREATE TRIGGER {name}_insert AFTER INSERT ON {network} BEGIN
                     INSERT INTO {name} (id, min_lon, max_lon, min_lat, max_lat)
                     VALUES (NEW.edge_id, st_xmin(NEW.track), st_xmax(NEW.track),
                             st_ymin(NEW.track), st_ymax(NEW.track));
                 END;
                 CREATE TRIGGER {name}_update AFTER UPDATE OF track ON {network} BEGIN
                     UPDATE {name}
                     SET min_lon = st_xmin(NEW.track), max_lon = st_xmax(NEW.track),
                         min_lat = st_ymin(NEW.track), max_lat = st_ymax(NEW.track)
                     WHERE id = NEW.edge_id;
                 END;
                 CREATE TRIGGER {name}_delete AFTER DELETE ON {network} BEGIN
                     DELETE FROM {name} WHERE id = OLD.edge_id;
                 END;"
            ),
            Self::Source => format!("CREATE INDEX {name} ON {network}(source_grid_id);"),
            Self::Target => format!("CREATE INDEX {name} ON {network}(target_grid_id);"),
        }
    }
}

/// Result of one index attempt.
#[derive(Debug)]
pub struct IndexOutcome {
    pub index: NetworkIndex,
    pub name: String,
    pub error: Option<StoreError>,
}

impl IndexOutcome {
    pub fn created(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct IndexReport {
    pub outcomes: Vec<IndexOutcome>,
}

impl IndexReport {
    pub fn all_created(&self) -> bool {
        self.outcomes.iter().all(IndexOutcome::created)
    }

    pub fn failed(&self) -> impl Iterator<Item = &IndexOutcome> {
        self.outcomes.iter().filter(|o| !o.created())
    }
}

/// Attempts every index in [`NetworkIndex::ALL`] and reports each by name.
pub fn create_network_indexes<S: SpatialStore>(store: &mut S) -> IndexReport {
    let mut report = IndexReport::default();
    for index in NetworkIndex::ALL {
        let name = index.name(store.network_table());
        let error = match store.create_index(index) {
            Ok(()) => {
                info!(index = %name, "index created");
                None
            }
            Err(e) => {
                error!(index = %name, error = %e, "index creation failed");
                Some(e)
            }
        };
        report.outcomes.push(IndexOutcome { index, name, error });
    }
    report
}
