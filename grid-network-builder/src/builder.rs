// grid-network-builder/src/builder.rs
// Grid-adjacency builder: walks the grid ids in fixed-size windows and asks the
// store to insert each window's nearest-neighbour edges as one transaction.
// A failed window is logged, recorded and skipped; later windows still run.

use grid_schema::{BatchWindow, BatchWindows};
use tracing::{error, info, warn};

use crate::config::BuilderConfig;
use crate::error::{BuildError, StoreError};
use crate::store::{NeighborQuery, SpatialStore};

/// A window whose insert was rolled back.
#[derive(Debug)]
pub struct WindowFailure {
    pub window: BatchWindow,
    pub error: StoreError,
}

/// Outcome of one `build_adjacency` run.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Highest grid id seen when the run started.
    pub max_id: i64,
    pub windows_committed: usize,
    pub edges_inserted: usize,
    pub failed_windows: Vec<WindowFailure>,
}

impl BuildReport {
    pub fn is_complete(&self) -> bool {
        self.failed_windows.is_empty()
    }

    /// `start_id` that re-processes the earliest failed window.
    pub fn resume_hint(&self) -> Option<i64> {
        self.failed_windows.first().map(|f| f.window.start_id)
    }
}

/// Populates the network table for source ids `config.start_id ..= MAX(id)`.
///
/// Fails only when the grid table is empty or `MAX(id)` cannot be read;
/// insert failures are per window and end up in [`BuildReport::failed_windows`].
pub fn build_adjacency<S: SpatialStore>(
    store: &mut S,
    config: &BuilderConfig,
) -> Result<BuildReport, BuildError> {
    let max_id = store.max_grid_id()?.ok_or_else(|| BuildError::EmptyInput {
        table: store.grid_table().to_string(),
    })?;
    info!(max_id, start_id = config.start_id, "grid table scanned");

    let query = NeighborQuery::from(config);
    let mut report = BuildReport { max_id, ..Default::default() };

    for window in BatchWindows::new(config.start_id, max_id, config.batch_size) {
        info!(%window, "processing batch");
        match store.insert_window(window, &query) {
            Ok(edges) => {
                info!(%window, edges, "batch committed");
                report.windows_committed += 1;
                report.edges_inserted += edges;
            }
            Err(e) => {
                error!(%window, error = %e, "batch rolled back");
                report.failed_windows.push(WindowFailure { window, error: e });
            }
        }
    }

    if report.is_complete() {
        info!(
            windows = report.windows_committed,
            edges = report.edges_inserted,
            "build finished"
        );
    } else {
        warn!(
            windows = report.windows_committed,
            failed = report.failed_windows.len(),
            edges = report.edges_inserted,
            resume_from = report.resume_hint(),
            "build finished with failed batches"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableName;
    use crate::indexes::NetworkIndex;
    use grid_schema::{AdjacencyEdge, GridCell};

    /// In-memory store that computes neighbours by brute force and records calls.
    struct RecordingStore {
        grid: TableName,
        network: TableName,
        cells: Vec<GridCell>,
        edges: Vec<AdjacencyEdge>,
        calls: Vec<BatchWindow>,
        fail_on: Vec<BatchWindow>,
    }

    impl RecordingStore {
        fn new(cells: Vec<GridCell>) -> Self {
            Self {
                grid: TableName::new("grid").unwrap(),
                network: TableName::new("net").unwrap(),
                cells,
                edges: Vec::new(),
                calls: Vec::new(),
                fail_on: Vec::new(),
            }
        }
    }

    impl SpatialStore for RecordingStore {
        fn grid_table(&self) -> &TableName {
            &self.grid
        }

        fn network_table(&self) -> &TableName {
            &self.network
        }

        fn max_grid_id(&self) -> Result<Option<i64>, StoreError> {
            Ok(self.cells.iter().map(|c| c.id).max())
        }

        fn insert_window(
            &mut self,
            window: BatchWindow,
            q: &NeighborQuery,
        ) -> Result<usize, StoreError> {
            self.calls.push(window);
            if self.fail_on.contains(&window) {
                return Err(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows));
            }
            let mut batch = Vec::new();
            for v1 in self.cells.iter().filter(|c| window.contains(c.id)) {
                let mut near: Vec<AdjacencyEdge> = self
                    .cells
                    .iter()
                    .filter_map(|v2| AdjacencyEdge::between(v1, v2))
                    .filter(|e| e.cost <= q.distance_threshold)
                    .collect();
                near.sort_by(|a, b| {
                    a.cost.total_cmp(&b.cost).then(a.target_grid_id.cmp(&b.target_grid_id))
                });
                near.truncate(q.max_neighbors.get() as usize);
                batch.extend(near);
            }
            let n = batch.len();
            self.edges.extend(batch);
            Ok(n)
        }

        fn create_index(&mut self, _index: NetworkIndex) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn line_of_cells(n: i64, spacing: f64) -> Vec<GridCell> {
        (1..=n).map(|i| GridCell::new(i, i as f64 * spacing, 0.0)).collect()
    }

    fn config(start_id: i64, batch: u32, threshold: f64, max: u32) -> BuilderConfig {
        BuilderConfig::new(start_id, batch, threshold, max).unwrap()
    }

    #[test]
    fn empty_grid_aborts_without_inserts() {
        let mut store = RecordingStore::new(Vec::new());
        let res = build_adjacency(&mut store, &BuilderConfig::with_defaults(1));
        assert!(matches!(res, Err(BuildError::EmptyInput { ref table }) if table == "grid"));
        assert!(store.calls.is_empty());
    }

    #[test]
    fn windows_are_visited_in_ascending_order() {
        let mut store = RecordingStore::new(line_of_cells(25, 10_000.0));
        build_adjacency(&mut store, &config(1, 10, 11_500.0, 6)).unwrap();
        assert_eq!(store.calls, vec![
            BatchWindow { start_id: 1, end_id: 10 },
            BatchWindow { start_id: 11, end_id: 20 },
            BatchWindow { start_id: 21, end_id: 25 },
        ]);
    }

    #[test]
    fn start_past_max_is_an_empty_success() {
        let mut store = RecordingStore::new(line_of_cells(5, 10_000.0));
        let report = build_adjacency(&mut store, &config(6, 10, 11_500.0, 6)).unwrap();
        assert!(store.calls.is_empty());
        assert_eq!(report.max_id, 5);
        assert_eq!(report.windows_committed, 0);
    }

    #[test]
    fn failed_window_does_not_stop_the_run() {
        let mut store = RecordingStore::new(line_of_cells(9, 10_000.0));
        let bad = BatchWindow { start_id: 4, end_id: 6 };
        store.fail_on.push(bad);

        let report = build_adjacency(&mut store, &config(1, 3, 11_500.0, 6)).unwrap();
        assert_eq!(store.calls.len(), 3);
        assert_eq!(report.windows_committed, 2);
        assert_eq!(report.failed_windows.len(), 1);
        assert_eq!(report.failed_windows[0].window, bad);
        assert_eq!(report.resume_hint(), Some(4));
        assert!(!report.is_complete());

        let sources: Vec<i64> = store.edges.iter().map(|e| e.source_grid_id).collect();
        assert_eq!(sources, vec![1, 2, 3, 7, 8]);
    }

    #[test]
    fn neighbour_cap_is_respected() {
        // Dense 5x5 block at 1 km spacing; every cell sees many candidates.
        let cells: Vec<GridCell> = (0..25)
            .map(|i| GridCell::new(i + 1, (i % 5) as f64 * 1000.0, (i / 5) as f64 * 1000.0))
            .collect();
        let mut store = RecordingStore::new(cells);
        let report = build_adjacency(&mut store, &config(1, 4, 2_500.0, 3)).unwrap();
        assert!(report.is_complete());

        for source in 1..=25 {
            let n = store.edges.iter().filter(|e| e.source_grid_id == source).count();
            assert!(n <= 3, "source {source} has {n} edges");
        }
        assert_eq!(report.edges_inserted, store.edges.len());
    }
}
