//! Embedded `DuckDB` payload store.
//!
//! Payloads live in a single table keyed by block id:
//!
//! ```sql
//! CREATE TABLE block_demographics (
//!     id TEXT PRIMARY KEY,
//!     population BIGINT NOT NULL,
//!     male_population BIGINT NOT NULL,
//!     female_population BIGINT NOT NULL,
//!     male_ages TEXT NOT NULL,   -- 23 comma-separated bracket counts
//!     female_ages TEXT NOT NULL
//! );
//! ```
//!
//! The file is built offline with [`DuckDbRecordStore::create`] and opened
//! read-only by the server.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use census_radius_census_models::{AGE_BRACKET_COUNT, DemographicRecord};
use duckdb::{AccessMode, Config, Connection, params};

use crate::{RecordStore, StoreError};

const TABLE: &str = "block_demographics";

/// Round-robin pool of read-only connections.
///
/// `duckdb::Connection` is `Send` but not `Sync`, so each connection is
/// wrapped in a `Mutex` and lookups spread across them via an atomic
/// counter.
struct ConnectionPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ConnectionPool {
    fn open(path: &Path, size: usize) -> Result<Self, StoreError> {
        let unavailable = |e: duckdb::Error| StoreError::Unavailable {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        let connections = (0..size.max(1))
            .map(|_| {
                let config = Config::default()
                    .access_mode(AccessMode::ReadOnly)
                    .map_err(unavailable)?;
                Connection::open_with_flags(path, config)
                    .map(Mutex::new)
                    .map_err(unavailable)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
        })
    }

    fn acquire(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[idx]
            .lock()
            .map_err(|_| StoreError::Backend("DuckDB pool mutex poisoned".to_string()))
    }
}

/// Payloads served from a read-only `DuckDB` file.
pub struct DuckDbRecordStore {
    pool: ConnectionPool,
    len: usize,
}

impl DuckDbRecordStore {
    /// Opens `pool_size` read-only connections to the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the file cannot be opened or
    /// has no payload table.
    pub fn open(path: &Path, pool_size: usize) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::Unavailable {
                path: path.display().to_string(),
                message: "file does not exist".to_string(),
            });
        }

        let pool = ConnectionPool::open(path, pool_size)?;
        let count: i64 = {
            let conn = pool.acquire()?;
            conn.prepare(&format!("SELECT COUNT(*) FROM {TABLE}"))
                .and_then(|mut stmt| stmt.query_row([], |row| row.get(0)))
                .map_err(|e| StoreError::Unavailable {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?
        };

        let len = usize::try_from(count).unwrap_or(0);
        log::info!(
            "Opened DuckDB payload store {} ({len} blocks, {} connections)",
            path.display(),
            pool.connections.len()
        );

        Ok(Self { pool, len })
    }

    /// Writes a new store at `path` from `(id, payload)` pairs.
    ///
    /// Returns the number of payloads written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if `path` already exists, and
    /// [`StoreError::DuckDb`] if any insert fails (for example a duplicate
    /// id).
    pub fn create(path: &Path, payloads: &[(String, DemographicRecord)]) -> Result<u64, StoreError> {
        if path.exists() {
            return Err(StoreError::Backend(format!(
                "{} already exists",
                path.display()
            )));
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(&format!(
            "CREATE TABLE {TABLE} (
                id TEXT PRIMARY KEY,
                population BIGINT NOT NULL,
                male_population BIGINT NOT NULL,
                female_population BIGINT NOT NULL,
                male_ages TEXT NOT NULL,
                female_ages TEXT NOT NULL
            );"
        ))?;

        conn.execute_batch("BEGIN TRANSACTION;")?;
        {
            let mut stmt = conn.prepare(&format!(
                "INSERT INTO {TABLE} VALUES (?, ?, ?, ?, ?, ?)"
            ))?;
            for (id, payload) in payloads {
                stmt.execute(params![
                    id,
                    i64::from(payload.population),
                    i64::from(payload.male_population),
                    i64::from(payload.female_population),
                    join_ages(&payload.male_ages),
                    join_ages(&payload.female_ages),
                ])?;
            }
        }
        conn.execute_batch("COMMIT;")?;

        log::info!(
            "Wrote {} block payloads to {}",
            payloads.len(),
            path.display()
        );
        Ok(payloads.len() as u64)
    }
}

impl RecordStore for DuckDbRecordStore {
    fn get(&self, id: &str) -> Result<DemographicRecord, StoreError> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT population, male_population, female_population, male_ages, female_ages
             FROM {TABLE} WHERE id = ?"
        ))?;

        let row = stmt.query_row([id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        });

        let (population, male, female, male_ages, female_ages) = match row {
            Ok(values) => values,
            Err(duckdb::Error::QueryReturnedNoRows) => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(e) => return Err(StoreError::DuckDb(e)),
        };

        Ok(DemographicRecord {
            population: count(id, "population", population)?,
            male_population: count(id, "male_population", male)?,
            female_population: count(id, "female_population", female)?,
            male_ages: split_ages(id, &male_ages)?,
            female_ages: split_ages(id, &female_ages)?,
        })
    }

    fn len(&self) -> usize {
        self.len
    }

    fn backend(&self) -> &'static str {
        "duckdb"
    }
}

fn count(id: &str, column: &str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt {
        id: id.to_string(),
        message: format!("{column} = {value} is not a valid count"),
    })
}

fn join_ages(ages: &[u32; AGE_BRACKET_COUNT]) -> String {
    ages.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn split_ages(id: &str, raw: &str) -> Result<[u32; AGE_BRACKET_COUNT], StoreError> {
    let corrupt = |message: String| StoreError::Corrupt {
        id: id.to_string(),
        message,
    };

    let values = raw
        .split(',')
        .map(|v| v.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| corrupt(format!("age list {raw:?}: {e}")))?;

    values.try_into().map_err(|v: Vec<u32>| {
        corrupt(format!(
            "age list has {} brackets, expected {AGE_BRACKET_COUNT}",
            v.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(population: u32) -> DemographicRecord {
        let mut female_ages = [0; AGE_BRACKET_COUNT];
        female_ages[22] = population;
        DemographicRecord {
            population,
            male_population: 0,
            female_population: population,
            male_ages: [0; AGE_BRACKET_COUNT],
            female_ages,
        }
    }

    #[test]
    fn create_then_read_back() {
        let path = std::env::temp_dir().join("census_radius_store_roundtrip.duckdb");
        let _ = std::fs::remove_file(&path);

        let payloads = vec![("A".to_string(), payload(3)), ("B".to_string(), payload(8))];
        assert_eq!(DuckDbRecordStore::create(&path, &payloads).unwrap(), 2);

        let store = DuckDbRecordStore::open(&path, 2).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.backend(), "duckdb");
        assert_eq!(store.get("B").unwrap(), payload(8));
        assert_eq!(store.get("A").unwrap(), payload(3));
        assert!(matches!(store.get("C"), Err(StoreError::NotFound(_))));

        drop(store);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn create_refuses_to_overwrite() {
        let path = std::env::temp_dir().join("census_radius_store_exists.duckdb");
        let _ = std::fs::remove_file(&path);
        DuckDbRecordStore::create(&path, &[]).unwrap();
        assert!(matches!(
            DuckDbRecordStore::create(&path, &[]),
            Err(StoreError::Backend(_))
        ));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn open_missing_file_is_unavailable() {
        let path = std::env::temp_dir().join("census_radius_store_missing.duckdb");
        assert!(matches!(
            DuckDbRecordStore::open(&path, 1),
            Err(StoreError::Unavailable { .. })
        ));
    }

    #[test]
    fn malformed_age_lists_are_corrupt() {
        assert!(split_ages("A", "1,2,3").is_err());
        assert!(split_ages("A", &vec!["x"; AGE_BRACKET_COUNT].join(",")).is_err());
        let ok = split_ages("A", &join_ages(&payload(4).female_ages)).unwrap();
        assert_eq!(ok[22], 4);
    }
}
