// grid-network-builder/src/grid_import.rs
// Loads precomputed grid cells from CSV into the grid table and its R-tree.
//
// grid.csv: id,x,y   (x/y = centroid in EPSG:3857 metres, header row required)

use grid_schema::GridCell;
use std::path::Path;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::store::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub loaded: usize,
    pub skipped: usize,
}

/// Parses `path` and writes every valid row in one transaction.
/// Rows with a missing or unparseable field are skipped and counted.
pub fn load_grid_csv(store: &mut SqliteStore, path: &Path) -> Result<ImportSummary, StoreError> {
    let csv_err = |source| StoreError::Csv { path: path.to_path_buf(), source };
    let mut rdr = csv::Reader::from_path(path).map_err(csv_err)?;

    let mut cells = Vec::new();
    let mut skipped = 0;
    for (line, rec) in rdr.records().enumerate() {
        let r = rec.map_err(csv_err)?;
        match parse_cell(&r) {
            Some(cell) => cells.push(cell),
            None => {
                // +2: header row and 1-based lines
                warn!(line = line + 2, record = ?r, "skipping malformed grid row");
                skipped += 1;
            }
        }
    }

    let loaded = store.insert_cells(cells)?;
    info!(path = %path.display(), loaded, skipped, "grid cells imported");
    Ok(ImportSummary { loaded, skipped })
}

fn parse_cell(r: &csv::StringRecord) -> Option<GridCell> {
    let id: i64 = r.get(0)?.trim().parse().ok()?;
    let x: f64 = r.get(1)?.trim().parse().ok()?;
    let y: f64 = r.get(2)?.trim().parse().ok()?;
    (x.is_finite() && y.is_finite()).then(|| GridCell::new(id, x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableName;
    use crate::store::SpatialStore;
    use std::io::Write;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(
            TableName::new("grid_voyage").unwrap(),
            TableName::new("grid_voyage_network").unwrap(),
        )
        .unwrap()
    }

    fn csv_file(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_valid_rows_and_skips_bad_ones() {
        let f = csv_file(
            "id,x,y\n\
             1,0.0,0.0\n\
             2, 10000.5 ,-20.25\n\
             x,1,1\n\
             4,NaN,1\n\
             5,3.0,\n",
        );
        let mut s = store();
        let summary = load_grid_csv(&mut s, f.path()).unwrap();
        assert_eq!(summary, ImportSummary { loaded: 2, skipped: 3 });
        assert_eq!(s.max_grid_id().unwrap(), Some(2));

        let rtree_rows: i64 = s
            .connection()
            .query_row("SELECT COUNT(*) FROM grid_voyage_rtree", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rtree_rows, 2);
    }

    #[test]
    fn reimport_replaces_existing_ids() {
        let mut s = store();
        load_grid_csv(&mut s, csv_file("id,x,y\n1,0,0\n").path()).unwrap();
        load_grid_csv(&mut s, csv_file("id,x,y\n1,5,5\n").path()).unwrap();
        let x: f64 = s
            .connection()
            .query_row("SELECT centr_3857_x FROM grid_voyage WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(x, 5.0);
        assert_eq!(s.row_counts().unwrap().grid_cells, 1);
    }

    #[test]
    fn missing_file_is_a_csv_error() {
        let mut s = store();
        let res = load_grid_csv(&mut s, Path::new("/nonexistent/grid.csv"));
        assert!(matches!(res, Err(StoreError::Csv { .. })));
    }
}
