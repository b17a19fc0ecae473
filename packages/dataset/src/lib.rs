#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Loads the census block dataset into an immutable in-memory index.
//!
//! The dataset is read once at startup from one of three layouts (compact
//! binary, extended binary, or delimited text), validated record by record,
//! and then shared read-only by every query for the life of the process.
//! Any missing, truncated, or malformed input fails the whole load; the
//! server refuses to start rather than serve a partial dataset.

pub mod binary;
pub mod cursor;
pub mod progress;
pub mod schema;
pub mod text;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use census_radius_census_models::{DemographicRecord, LocationRecord};
use census_radius_geodesy::GeodesyModel;
use geo::Point;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::progress::{ProgressCallback, null_progress};
use crate::schema::RecordSchema;

/// Maximum per-axis difference in meters between a stored geocentric
/// coordinate and the transform of the stored latitude/longitude.
pub const GEOCENTRIC_TOLERANCE_METERS: i64 = 2;

/// Errors that can occur while loading or encoding the dataset.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The source file does not exist.
    #[error("Dataset unavailable at {path}: {source}")]
    Unavailable {
        /// Path that was requested.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The source file exists but could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Delimited-text parsing error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A record layout is internally inconsistent.
    #[error("Invalid {schema} record schema: {message}")]
    Schema {
        /// Layout name.
        schema: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The input ends partway through a record.
    #[error(
        "{len} bytes is not a whole number of {record_len}-byte {schema} records \
         ({remainder} trailing bytes)"
    )]
    TrailingPartialRecord {
        /// Layout name.
        schema: &'static str,
        /// Total input length.
        len: usize,
        /// Fixed record length of the layout.
        record_len: usize,
        /// Bytes left over after the last whole record.
        remainder: usize,
    },

    /// A field read would run past the end of the record buffer.
    #[error("Record {index}: field `{field}` ({width} bytes at offset {offset}) exceeds the {len}-byte buffer")]
    OutOfBounds {
        /// Record position in the input.
        index: usize,
        /// Field name.
        field: &'static str,
        /// Field offset.
        offset: usize,
        /// Field width.
        width: usize,
        /// Available bytes.
        len: usize,
    },

    /// A record decoded but holds invalid values.
    #[error("Record {index}: {message}")]
    Malformed {
        /// Record position in the input.
        index: usize,
        /// Description of what went wrong.
        message: String,
    },

    /// Two records share a block id.
    #[error("Record {index}: duplicate block id {id}")]
    DuplicateId {
        /// Record position in the input.
        index: usize,
        /// The repeated id.
        id: String,
    },

    /// A record cannot be represented in the target layout.
    #[error("Record {index} ({id}) cannot be encoded: {message}")]
    Encode {
        /// Record position in the input.
        index: usize,
        /// Block id.
        id: String,
        /// Description of what went wrong.
        message: String,
    },
}

impl LoadError {
    fn from_io(path: &Path, source: std::io::Error) -> Self {
        let path = path.display().to_string();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::Unavailable { path, source }
        } else {
            Self::Io { path, source }
        }
    }
}

/// On-disk layout of the dataset file.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DatasetLayout {
    /// Fixed 53-byte records: id, population, coordinates.
    Compact,
    /// Fixed 153-byte records: compact fields plus demographics.
    Extended,
    /// Headerless CSV: `id,population,lat,lon,x,y,z`.
    Text,
}

impl DatasetLayout {
    /// The binary schema for this layout, if it is fixed-width.
    #[must_use]
    pub const fn schema(self) -> Option<&'static RecordSchema> {
        match self {
            Self::Compact => Some(&schema::COMPACT),
            Self::Extended => Some(&schema::EXTENDED),
            Self::Text => None,
        }
    }

    /// Whether records in this layout carry their demographic payload.
    #[must_use]
    pub const fn has_demographics(self) -> bool {
        matches!(self, Self::Extended)
    }
}

/// Where to load the dataset from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSource {
    pub path: PathBuf,
    pub layout: DatasetLayout,
}

/// Validation knobs for a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Reject records whose gender totals or age pyramids do not add up.
    /// When `false` such records are kept and a warning is logged, which
    /// accommodates known rounding exceptions in the source data.
    pub strict_totals: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            strict_totals: true,
        }
    }
}

/// The immutable set of census blocks queried by the engine.
#[derive(Debug)]
pub struct Dataset {
    layout: DatasetLayout,
    records: Vec<LocationRecord>,
    resident_demographics: bool,
}

impl Dataset {
    #[must_use]
    pub const fn layout(&self) -> DatasetLayout {
        self.layout
    }

    #[must_use]
    pub fn records(&self) -> &[LocationRecord] {
        &self.records
    }

    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&LocationRecord> {
        self.records.get(slot)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether every record carries its demographic payload, so queries
    /// can aggregate without a payload store.
    #[must_use]
    pub const fn has_demographics(&self) -> bool {
        self.resident_demographics
    }

    /// Sum of all block populations.
    #[must_use]
    pub fn total_population(&self) -> u64 {
        self.records.iter().map(|r| u64::from(r.population)).sum()
    }
}

/// Reads and validates datasets against a fixed Earth model.
pub struct DatasetLoader {
    model: Arc<dyn GeodesyModel>,
    options: LoadOptions,
    progress: Arc<dyn ProgressCallback>,
}

impl DatasetLoader {
    /// Creates a loader with strict validation and no progress reporting.
    #[must_use]
    pub fn new(model: Arc<dyn GeodesyModel>) -> Self {
        Self {
            model,
            options: LoadOptions::default(),
            progress: null_progress(),
        }
    }

    #[must_use]
    pub const fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Reads the whole source file and builds the dataset.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Unavailable`] if the file does not exist, and
    /// another [`LoadError`] if it cannot be read or holds any invalid
    /// record.
    pub fn load(&self, source: &DatasetSource) -> Result<Dataset, LoadError> {
        log::info!(
            "Loading {} dataset from {}",
            source.layout,
            source.path.display()
        );
        let start = Instant::now();

        let bytes = std::fs::read(&source.path).map_err(|e| LoadError::from_io(&source.path, e))?;
        let dataset = self.decode(&bytes, source.layout)?;

        log::info!(
            "Loaded {} census blocks (population {}) in {:.2?}",
            dataset.len(),
            dataset.total_population(),
            start.elapsed()
        );
        self.progress
            .finish(format!("Loaded {} census blocks", dataset.len()));

        Ok(dataset)
    }

    /// Decodes an in-memory copy of a dataset file.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the bytes do not form a valid dataset.
    pub fn decode(&self, bytes: &[u8], layout: DatasetLayout) -> Result<Dataset, LoadError> {
        let records = match layout.schema() {
            Some(schema) => binary::decode(bytes, schema, &self.progress)?,
            None => text::read_locations(bytes, &self.progress)?,
        };
        self.build(records, layout)
    }

    /// Validates already-decoded records and wraps them in a [`Dataset`].
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] on duplicate ids, out-of-range coordinates,
    /// geocentric coordinates inconsistent with the latitude/longitude, or
    /// (with strict totals) inconsistent demographic sums.
    pub fn build(
        &self,
        records: Vec<LocationRecord>,
        layout: DatasetLayout,
    ) -> Result<Dataset, LoadError> {
        let mut ids = BTreeSet::new();
        let mut tolerated = 0usize;

        for (index, record) in records.iter().enumerate() {
            if !ids.insert(record.id.as_str()) {
                return Err(LoadError::DuplicateId {
                    index,
                    id: record.id.clone(),
                });
            }
            self.check_position(index, record)?;
            if let Some(demographics) = &record.demographics
                && !self.check_demographics(index, record, demographics)?
            {
                tolerated += 1;
            }
        }

        if tolerated > 0 {
            log::warn!("{tolerated} census blocks have demographic totals that do not add up");
        }
        if records.is_empty() {
            log::warn!("Dataset contains no census blocks");
        }

        let resident_demographics = records.iter().all(|r| r.demographics.is_some());

        Ok(Dataset {
            layout,
            records,
            resident_demographics,
        })
    }

    /// Builds a record whose geocentric coordinates come from this
    /// loader's Earth model.
    #[must_use]
    pub fn locate(
        &self,
        id: &str,
        lat: f64,
        lon: f64,
        population: u32,
        demographics: Option<DemographicRecord>,
    ) -> LocationRecord {
        LocationRecord {
            id: id.to_string(),
            lat,
            lon,
            position: self.model.to_geocentric_rounded(Point::new(lon, lat)),
            population,
            demographics,
        }
    }

    fn check_position(&self, index: usize, record: &LocationRecord) -> Result<(), LoadError> {
        let malformed = |message: String| LoadError::Malformed { index, message };

        if !record.lat.is_finite() || !(-90.0..=90.0).contains(&record.lat) {
            return Err(malformed(format!("latitude {} out of range", record.lat)));
        }
        if !record.lon.is_finite() || !(-180.0..=180.0).contains(&record.lon) {
            return Err(malformed(format!("longitude {} out of range", record.lon)));
        }

        let expected = self
            .model
            .to_geocentric_rounded(Point::new(record.lon, record.lat));
        for (axis, (stored, derived)) in record.position.iter().zip(&expected).enumerate() {
            if stored.abs_diff(*derived) > GEOCENTRIC_TOLERANCE_METERS.unsigned_abs() {
                return Err(malformed(format!(
                    "block {}: geocentric axis {axis} is {stored} but ({}, {}) transforms to {derived}",
                    record.id, record.lat, record.lon
                )));
            }
        }

        Ok(())
    }

    /// Returns `false` if the record was kept despite inconsistent totals.
    fn check_demographics(
        &self,
        index: usize,
        record: &LocationRecord,
        demographics: &DemographicRecord,
    ) -> Result<bool, LoadError> {
        if demographics.population != record.population {
            return Err(LoadError::Malformed {
                index,
                message: format!(
                    "block {}: payload population {} differs from record population {}",
                    record.id, demographics.population, record.population
                ),
            });
        }

        match demographics.check_totals() {
            Ok(()) => Ok(true),
            Err(mismatch) if self.options.strict_totals => Err(LoadError::Malformed {
                index,
                message: format!("block {}: {mismatch}", record.id),
            }),
            Err(mismatch) => {
                log::warn!("Keeping block {}: {mismatch}", record.id);
                Ok(false)
            }
        }
    }
}

/// Lifecycle of the process-wide dataset.
///
/// A state starts [`Uninitialized`](Self::Uninitialized) and moves exactly
/// once, to [`Ready`](Self::Ready) or [`Failed`](Self::Failed). Both are
/// terminal.
#[derive(Debug, Default)]
pub enum DatasetState {
    #[default]
    Uninitialized,
    Ready(Arc<Dataset>),
    Failed(Arc<LoadError>),
}

/// Returned when a dataset is requested from a state that is not ready.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DatasetUnavailable {
    /// No load has been attempted.
    #[error("Dataset has not been loaded")]
    Uninitialized,

    /// The load failed.
    #[error("Dataset failed to load: {0}")]
    Failed(Arc<LoadError>),
}

impl DatasetState {
    /// Performs the one-time load. A state that has already left
    /// `Uninitialized` is returned unchanged.
    #[must_use]
    pub fn load(self, loader: &DatasetLoader, source: &DatasetSource) -> Self {
        match self {
            Self::Uninitialized => match loader.load(source) {
                Ok(dataset) => Self::Ready(Arc::new(dataset)),
                Err(e) => {
                    log::error!("Dataset load failed: {e}");
                    Self::Failed(Arc::new(e))
                }
            },
            terminal => {
                log::warn!("Dataset is already {}, ignoring load", terminal.label());
                terminal
            }
        }
    }

    /// Returns the dataset if the load succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetUnavailable`] if the state is not `Ready`.
    pub fn ready(&self) -> Result<Arc<Dataset>, DatasetUnavailable> {
        match self {
            Self::Ready(dataset) => Ok(Arc::clone(dataset)),
            Self::Uninitialized => Err(DatasetUnavailable::Uninitialized),
            Self::Failed(e) => Err(DatasetUnavailable::Failed(Arc::clone(e))),
        }
    }

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
        }
    }
}
