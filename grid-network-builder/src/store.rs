// grid-network-builder/src/store.rs
// Relational store holding the grid cells and the adjacency network.
// SQLite with the spatial functions from `spatial.rs` and R-tree search indexes.

use grid_schema::{AdjacencyEdge, BatchWindow, GridCell, Track};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::num::NonZeroU32;
use tracing::debug;

use crate::config::{BuilderConfig, DatabaseConfig, TableName};
use crate::error::StoreError;
use crate::indexes::NetworkIndex;
use crate::spatial::register_spatial_functions;

// ---------------------------------------------------------------------------
// Store abstraction
// ---------------------------------------------------------------------------

/// Neighbour selection rule applied to every source cell of a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborQuery {
    pub distance_threshold: f64,
    pub max_neighbors: NonZeroU32,
}

impl From<&BuilderConfig> for NeighborQuery {
    fn from(cfg: &BuilderConfig) -> Self {
        Self {
            distance_threshold: cfg.distance_threshold,
            max_neighbors: cfg.max_neighbors,
        }
    }
}

/// Operations the builder and the index step need from the store.
///
/// `SqliteStore` is the production implementation; tests substitute
/// recording fakes to drive failure paths.
pub trait SpatialStore {
    fn grid_table(&self) -> &TableName;
    fn network_table(&self) -> &TableName;
    /// Highest grid id, `None` when the grid table is empty.
    fn max_grid_id(&self) -> Result<Option<i64>, StoreError>;
    /// Inserts every edge of `window` atomically. Returns the edge count.
    /// On error nothing from the window is left behind.
    fn insert_window(
        &mut self,
        window: BatchWindow,
        query: &NeighborQuery,
    ) -> Result<usize, StoreError>;
    fn create_index(&mut self, index: NetworkIndex) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

fn migrations(grid: &TableName, network: &TableName) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {grid} (
    id           INTEGER PRIMARY KEY NOT NULL,
    centr_3857_x REAL NOT NULL,
    centr_3857_y REAL NOT NULL
);
CREATE VIRTUAL TABLE IF NOT EXISTS {grid}_rtree USING rtree(
    id, min_x, max_x, min_y, max_y
);
CREATE TABLE IF NOT EXISTS {network} (
    edge_id        INTEGER PRIMARY KEY,
    source_grid_id INTEGER NOT NULL,
    target_grid_id INTEGER NOT NULL,
    track          TEXT NOT NULL,
    cost           REAL NOT NULL,
    UNIQUE (source_grid_id, target_grid_id),
    CHECK (source_grid_id < target_grid_id)
);
"#
    )
}

// The R-tree join narrows candidates to the threshold's bounding square;
// st_dwithin then applies the exact circle. ?1..?2 window, ?3 threshold, ?4 limit.
fn window_insert_sql(grid: &TableName, network: &TableName) -> String {
    format!(
        r#"
WITH candidates AS (
    SELECT v1.id           AS source_grid_id,
           v2.id           AS target_grid_id,
           v1.centr_3857_x AS sx,
           v1.centr_3857_y AS sy,
           v2.centr_3857_x AS tx,
           v2.centr_3857_y AS ty,
           st_distance(v1.centr_3857_x, v1.centr_3857_y,
                       v2.centr_3857_x, v2.centr_3857_y) AS cost
    FROM {grid} v1
    JOIN {grid}_rtree r
      ON r.min_x <= v1.centr_3857_x + ?3 AND r.max_x >= v1.centr_3857_x - ?3
     AND r.min_y <= v1.centr_3857_y + ?3 AND r.max_y >= v1.centr_3857_y - ?3
    JOIN {grid} v2 ON v2.id = r.id
    WHERE v1.id BETWEEN ?1 AND ?2
      AND v1.id < v2.id
      AND st_dwithin(v1.centr_3857_x, v1.centr_3857_y,
                     v2.centr_3857_x, v2.centr_3857_y, ?3)
),
ranked AS (
    SELECT source_grid_id, target_grid_id, sx, sy, tx, ty, cost,
           ROW_NUMBER() OVER (
               PARTITION BY source_grid_id ORDER BY cost, target_grid_id
           ) AS nearest_rank
    FROM candidates
)
INSERT INTO {network} (source_grid_id, target_grid_id, track, cost)
SELECT source_grid_id, target_grid_id, st_makeline_4326(sx, sy, tx, ty), cost
FROM ranked
WHERE nearest_rank <= ?4
"#
    )
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// Row counts for the `stats` summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCounts {
    pub grid_cells: i64,
    pub edges: i64,
}

pub struct SqliteStore {
    conn: Connection,
    grid: TableName,
    network: TableName,
    insert_sql: String,
}

impl SqliteStore {
    /// Opens (creating if needed) the database and applies the schema.
    pub fn open(db: &DatabaseConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(&db.path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn, db.grid_table.clone(), db.network_table.clone())
    }

    /// Private database that disappears with the store.
    pub fn open_in_memory(grid: TableName, network: TableName) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, grid, network)
    }

    fn with_connection(
        conn: Connection,
        grid: TableName,
        network: TableName,
    ) -> Result<Self, StoreError> {
        register_spatial_functions(&conn)?;
        conn.execute_batch(&migrations(&grid, &network))?;
        let insert_sql = window_insert_sql(&grid, &network);
        Ok(Self { conn, grid, network, insert_sql })
    }

    /// Replaces or adds grid cells and their search-index entries in one transaction.
    pub fn insert_cells<I>(&mut self, cells: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = GridCell>,
    {
        let tx = self.conn.transaction()?;
        let mut written = 0;
        {
            let mut cell_stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO {} (id, centr_3857_x, centr_3857_y) VALUES (?1, ?2, ?3)",
                self.grid
            ))?;
            let mut rtree_stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO {}_rtree (id, min_x, max_x, min_y, max_y)
                 VALUES (?1, ?2, ?2, ?3, ?3)",
                self.grid
            ))?;
            for cell in cells {
                let GridCell { id, centroid } = cell;
                cell_stmt.execute(params![id, centroid.x, centroid.y])?;
                rtree_stmt.execute(params![id, centroid.x, centroid.y])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Rebuilds the grid search index from the grid table, for grids that were
    /// populated without going through `insert_cells`.
    pub fn sync_grid_index(&mut self) -> Result<usize, StoreError> {
        let grid = &self.grid;
        let tx = self.conn.transaction()?;
        tx.execute(
            &format!("DELETE FROM {grid}_rtree WHERE id NOT IN (SELECT id FROM {grid})"),
            [],
        )?;
        let synced = tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {grid}_rtree (id, min_x, max_x, min_y, max_y)
                 SELECT id, centr_3857_x, centr_3857_x, centr_3857_y, centr_3857_y FROM {grid}"
            ),
            [],
        )?;
        tx.commit()?;
        Ok(synced)
    }

    /// All stored edges ordered by (source, target).
    pub fn edges(&self) -> Result<Vec<AdjacencyEdge>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT source_grid_id, target_grid_id, track, cost FROM {}
             ORDER BY source_grid_id, target_grid_id",
            self.network
        ))?;
        let rows = stmt.query_map([], |r| {
            let text: String = r.get(2)?;
            let track = Track::from_geojson(&text).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
            })?;
            Ok(AdjacencyEdge {
                source_grid_id: r.get(0)?,
                target_grid_id: r.get(1)?,
                track,
                cost: r.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn row_counts(&self) -> Result<RowCounts, StoreError> {
        let count = |table: &TableName| -> Result<i64, StoreError> {
            Ok(self.conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
        };
        Ok(RowCounts {
            grid_cells: count(&self.grid)?,
            edges: count(&self.network)?,
        })
    }

    /// Raw access for callers that need statements outside this API.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl SpatialStore for SqliteStore {
    fn grid_table(&self) -> &TableName {
        &self.grid
    }

    fn network_table(&self) -> &TableName {
        &self.network
    }

    fn max_grid_id(&self) -> Result<Option<i64>, StoreError> {
        let max = self
            .conn
            .query_row(&format!("SELECT MAX(id) FROM {}", self.grid), [], |r| {
                r.get::<_, Option<i64>>(0)
            })
            .optional()?
            .flatten();
        Ok(max)
    }

    fn insert_window(
        &mut self,
        window: BatchWindow,
        query: &NeighborQuery,
    ) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let inserted = tx.execute(
            &self.insert_sql,
            params![
                window.start_id,
                window.end_id,
                query.distance_threshold,
                i64::from(query.max_neighbors.get()),
            ],
        )?;
        tx.commit()?;
        debug!(%window, inserted, "window transaction committed");
        Ok(inserted)
    }

    fn create_index(&mut self, index: NetworkIndex) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(&index.ddl(&self.network))?;
        tx.commit()?;
        Ok(())
    }
}
