#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Read-only payload stores keyed by census block id.
//!
//! When the dataset keeps only ids and coordinates resident, the query
//! engine fetches the demographic payload of each matched block from a
//! [`RecordStore`]. Stores are opened once at startup and never written
//! afterwards, so any number of queries may read them concurrently.
//!
//! Every id the spatial index hands out comes from the same census
//! extract the store was built from, so a miss is a data-integrity
//! violation ([`StoreError::NotFound`]) rather than an empty result.

#[cfg(feature = "duckdb")]
pub mod duckdb_store;
pub mod memory;

use std::path::Path;
use std::sync::Arc;

use census_radius_census_models::DemographicRecord;

pub use memory::MemoryRecordStore;

#[cfg(feature = "duckdb")]
pub use duckdb_store::DuckDbRecordStore;

/// Errors from payload store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be opened.
    #[error("Record store unavailable at {path}: {message}")]
    Unavailable {
        /// Path that was requested.
        path: String,
        /// Why it could not be opened.
        message: String,
    },

    /// The id is not in the store.
    #[error("Block {0} not found in record store")]
    NotFound(String),

    /// A stored payload could not be decoded.
    #[error("Corrupt payload for block {id}: {message}")]
    Corrupt {
        /// Block id.
        id: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The backend failed to serve a lookup.
    #[error("Record store backend error: {0}")]
    Backend(String),

    /// `DuckDB` error.
    #[cfg(feature = "duckdb")]
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

/// A read-only map from block id to demographic payload.
pub trait RecordStore: Send + Sync {
    /// Fetches the payload for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the id is absent, or another
    /// [`StoreError`] if the backend fails.
    fn get(&self, id: &str) -> Result<DemographicRecord, StoreError>;

    /// Number of stored payloads.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Opens the payload store at `path`, choosing the backend by extension:
/// `.duckdb` files open as a [`DuckDbRecordStore`] with `pool_size`
/// connections, anything else is read as a payload CSV.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the store cannot be opened, or
/// if `path` names a `DuckDB` file and the `duckdb` feature is disabled.
pub fn open(path: &Path, pool_size: usize) -> Result<Arc<dyn RecordStore>, StoreError> {
    if path.extension().is_some_and(|ext| ext == "duckdb") {
        #[cfg(feature = "duckdb")]
        return Ok(Arc::new(DuckDbRecordStore::open(path, pool_size)?));

        #[cfg(not(feature = "duckdb"))]
        {
            let _ = pool_size;
            return Err(StoreError::Unavailable {
                path: path.display().to_string(),
                message: "built without the `duckdb` feature".to_string(),
            });
        }
    }

    Ok(Arc::new(MemoryRecordStore::open_csv(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_csv_store_is_unavailable() {
        let path = std::env::temp_dir().join("census_radius_store_open_missing.csv");
        assert!(matches!(open(&path, 1), Err(StoreError::Unavailable { .. })));
    }

    #[test]
    fn duckdb_extension_selects_duckdb_backend() {
        let path = std::env::temp_dir().join("census_radius_store_open_missing.duckdb");
        let err = open(&path, 1).err().unwrap();
        assert!(matches!(err, StoreError::Unavailable { .. }), "{err}");
    }
}
