//! Flat in-memory payload table.

use std::collections::BTreeMap;
use std::path::Path;

use census_radius_census_models::DemographicRecord;
use census_radius_dataset::{Dataset, LoadError, text};

use crate::{RecordStore, StoreError};

/// Payloads held in a sorted in-memory map.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: BTreeMap<String, DemographicRecord>,
}

impl MemoryRecordStore {
    /// Builds a store from `(id, payload)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if an id appears twice.
    pub fn from_payloads<I>(payloads: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (String, DemographicRecord)>,
    {
        let mut records = BTreeMap::new();
        for (id, payload) in payloads {
            if records.contains_key(&id) {
                return Err(StoreError::Corrupt {
                    id,
                    message: "duplicate block id".to_string(),
                });
            }
            records.insert(id, payload);
        }
        Ok(Self { records })
    }

    /// Copies the resident payloads out of an extended-layout dataset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if any record has no payload.
    pub fn from_dataset(dataset: &Dataset) -> Result<Self, StoreError> {
        let payloads = dataset
            .records()
            .iter()
            .map(|record| {
                record
                    .demographics
                    .clone()
                    .map(|payload| (record.id.clone(), payload))
                    .ok_or_else(|| StoreError::Unavailable {
                        path: format!("{} dataset", dataset.layout()),
                        message: format!("block {} has no demographic payload", record.id),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_payloads(payloads)
    }

    /// Reads a payload CSV file (see [`census_radius_dataset::text`]).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the file is missing or holds
    /// any malformed row.
    pub fn open_csv(path: &Path) -> Result<Self, StoreError> {
        let unavailable = |message: String| StoreError::Unavailable {
            path: path.display().to_string(),
            message,
        };

        let file = std::fs::File::open(path).map_err(|e| unavailable(e.to_string()))?;
        let payloads = text::read_payloads(std::io::BufReader::new(file))
            .map_err(|e: LoadError| unavailable(e.to_string()))?;
        let store = Self::from_payloads(payloads).map_err(|e| unavailable(e.to_string()))?;

        log::info!(
            "Loaded {} block payloads from {}",
            store.len(),
            path.display()
        );
        Ok(store)
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, id: &str) -> Result<DemographicRecord, StoreError> {
        self.records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use census_radius_census_models::AGE_BRACKET_COUNT;
    use census_radius_dataset::{DatasetLayout, DatasetLoader};
    use census_radius_geodesy::Wgs84;

    fn payload(population: u32) -> DemographicRecord {
        let mut male_ages = [0; AGE_BRACKET_COUNT];
        male_ages[1] = population;
        DemographicRecord {
            population,
            male_population: population,
            female_population: 0,
            male_ages,
            female_ages: [0; AGE_BRACKET_COUNT],
        }
    }

    #[test]
    fn get_returns_stored_payload() {
        let store =
            MemoryRecordStore::from_payloads(vec![("A".to_string(), payload(3))]).unwrap();
        assert_eq!(store.get("A").unwrap(), payload(3));
        assert_eq!(store.len(), 1);
        assert_eq!(store.backend(), "memory");
    }

    #[test]
    fn missing_id_is_not_found() {
        let store = MemoryRecordStore::default();
        assert!(store.is_empty());
        assert!(matches!(store.get("nope"), Err(StoreError::NotFound(id)) if id == "nope"));
    }

    #[test]
    fn duplicate_ids_are_corrupt() {
        let err = MemoryRecordStore::from_payloads(vec![
            ("A".to_string(), payload(1)),
            ("A".to_string(), payload(2)),
        ])
        .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn builds_from_extended_dataset() {
        let loader = DatasetLoader::new(Arc::new(Wgs84::new()));
        let dataset = loader
            .build(
                vec![loader.locate("A", 1.0, 2.0, 4, Some(payload(4)))],
                DatasetLayout::Extended,
            )
            .unwrap();
        let store = MemoryRecordStore::from_dataset(&dataset).unwrap();
        assert_eq!(store.get("A").unwrap().population, 4);
    }

    #[test]
    fn compact_dataset_has_no_payloads() {
        let loader = DatasetLoader::new(Arc::new(Wgs84::new()));
        let dataset = loader
            .build(
                vec![loader.locate("A", 1.0, 2.0, 4, None)],
                DatasetLayout::Compact,
            )
            .unwrap();
        assert!(matches!(
            MemoryRecordStore::from_dataset(&dataset),
            Err(StoreError::Unavailable { .. })
        ));
    }

    #[test]
    fn opens_payload_csv() {
        let path = std::env::temp_dir().join("census_radius_store_payloads.csv");
        let body = format!(
            "{}\n{}\n",
            text::format_payload("A", &payload(2)),
            text::format_payload("B", &payload(5))
        );
        std::fs::write(&path, body).unwrap();

        let store = MemoryRecordStore::open_csv(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("B").unwrap(), payload(5));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_csv_is_unavailable() {
        let path = std::env::temp_dir().join("census_radius_store_missing.csv");
        assert!(matches!(
            MemoryRecordStore::open_csv(&path),
            Err(StoreError::Unavailable { .. })
        ));
    }
}
