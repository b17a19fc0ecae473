#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Radius queries over the census block dataset.
//!
//! A [`QueryEngine`] owns the read-only [`Dataset`], a [`SpatialFilter`]
//! over it, and the source of demographic payloads. Each
//! [`QueryEngine::query`] call culls the dataset with a conservative
//! geocentric cube, checks every survivor with the exact WGS84 geodesic
//! distance, and sums the matched blocks' demographics. Queries share no
//! mutable state, so any number may run at once.

pub mod aggregate;
pub mod cube;
pub mod filter;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use census_radius_census_models::AggregateResult;
use census_radius_dataset::{Dataset, DatasetUnavailable};
use census_radius_geodesy::{GeodesyModel, Wgs84};
use census_radius_store::{RecordStore, StoreError};
use geo::Point;

pub use aggregate::{PopulationTotals, aggregate_ids, aggregate_sharded};
pub use cube::BoundingCube;
pub use filter::{FilterStats, FilterStrategy, SpatialFilter};

/// Smallest accepted search radius in meters.
pub const MIN_RADIUS_METERS: i64 = 1;

/// Largest accepted search radius in meters.
pub const MAX_RADIUS_METERS: i64 = 1_000_000;

/// Candidates examined between deadline checks within a shard.
const DEADLINE_CHECK_INTERVAL: usize = 4096;

/// Fewest candidates worth handing to their own worker thread.
const MIN_SHARD_LEN: usize = 512;

/// Errors returned by a radius query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The query is outside the accepted domain.
    #[error("Invalid query: {0}")]
    Validation(String),

    /// The dataset or payload store is not available.
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// Reading backing storage failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// The spatial index and the payload source disagree.
    #[error("Data integrity violation for block {id}: {message}")]
    DataIntegrity {
        /// Block id the index matched.
        id: String,
        /// What the payload source reported.
        message: String,
    },

    /// The query ran past its deadline and was abandoned.
    #[error("Query abandoned after {elapsed:.2?} (deadline {budget:.2?})")]
    DeadlineExceeded {
        /// Time spent before giving up.
        elapsed: Duration,
        /// Configured deadline.
        budget: Duration,
    },
}

impl QueryError {
    /// Whether the caller is at fault (HTTP 400) rather than the server
    /// (HTTP 500).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Classifies a payload fetch failure for `id`.
    #[must_use]
    pub fn from_fetch(id: &str, error: StoreError) -> Self {
        match error {
            StoreError::NotFound(_) | StoreError::Corrupt { .. } => Self::DataIntegrity {
                id: id.to_string(),
                message: error.to_string(),
            },
            other => Self::Io(format!("fetching block {id}: {other}")),
        }
    }
}

impl From<DatasetUnavailable> for QueryError {
    fn from(value: DatasetUnavailable) -> Self {
        Self::DataUnavailable(value.to_string())
    }
}

/// A validated radius query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Query {
    lat: f64,
    lon: f64,
    radius_meters: u32,
}

impl Query {
    /// Validates `lat` in `[-90, 90]`, `lon` in `[-180, 180]` and
    /// `radius_meters` in `[1, 1_000_000]`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Validation`] for any out-of-domain or
    /// non-finite input.
    pub fn new(lat: f64, lon: f64, radius_meters: i64) -> Result<Self, QueryError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(QueryError::Validation(format!(
                "latitude {lat} is outside [-90, 90]"
            )));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(QueryError::Validation(format!(
                "longitude {lon} is outside [-180, 180]"
            )));
        }
        let radius_meters = u32::try_from(radius_meters)
            .ok()
            .filter(|r| (MIN_RADIUS_METERS..=MAX_RADIUS_METERS).contains(&i64::from(*r)))
            .ok_or_else(|| {
                QueryError::Validation(format!(
                    "distance {radius_meters} is outside [{MIN_RADIUS_METERS}, {MAX_RADIUS_METERS}] meters"
                ))
            })?;

        Ok(Self {
            lat,
            lon,
            radius_meters,
        })
    }

    #[must_use]
    pub const fn lat(&self) -> f64 {
        self.lat
    }

    #[must_use]
    pub const fn lon(&self) -> f64 {
        self.lon
    }

    #[must_use]
    pub const fn radius_meters(&self) -> u32 {
        self.radius_meters
    }

    /// The query location as `(x = lon, y = lat)`.
    #[must_use]
    pub fn point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

/// Optional time budget for a single query.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    /// A deadline that never expires.
    #[must_use]
    pub fn none() -> Self {
        Self::after(None)
    }

    /// Starts the clock now.
    #[must_use]
    pub fn after(budget: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// # Errors
    ///
    /// Returns [`QueryError::DeadlineExceeded`] once the budget is spent.
    pub fn check(&self) -> Result<(), QueryError> {
        match self.budget {
            Some(budget) if self.start.elapsed() >= budget => Err(QueryError::DeadlineExceeded {
                elapsed: self.start.elapsed(),
                budget,
            }),
            _ => Ok(()),
        }
    }
}

/// Where matched blocks' demographics come from.
#[derive(Clone)]
pub enum PayloadSource {
    /// Carried by the dataset records (extended layout).
    Resident,
    /// Fetched per match from a payload store.
    Store(Arc<dyn RecordStore>),
}

impl PayloadSource {
    /// Short name for logs and health output.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Resident => "resident",
            Self::Store(store) => store.backend(),
        }
    }
}

/// Tuning knobs for query execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Upper bound on worker threads per query. `1` keeps every query on
    /// the calling thread.
    pub workers: usize,
    /// Abandon a query that runs longer than this.
    pub deadline: Option<Duration>,
    pub strategy: FilterStrategy,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            deadline: None,
            strategy: FilterStrategy::default(),
        }
    }
}

/// Answers radius queries against one loaded dataset.
pub struct QueryEngine {
    filter: SpatialFilter,
    payloads: PayloadSource,
    options: QueryOptions,
}

impl QueryEngine {
    /// Builds the spatial filter for `dataset` and binds the payload
    /// source.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::DataUnavailable`] if resident payloads are
    /// requested for a dataset that does not carry them.
    pub fn new(
        dataset: Arc<Dataset>,
        payloads: PayloadSource,
        options: QueryOptions,
    ) -> Result<Self, QueryError> {
        Self::with_model(dataset, Arc::new(Wgs84::new()), payloads, options)
    }

    /// Like [`Self::new`] with an explicit Earth model. The model must be
    /// the one the dataset's geocentric positions were derived with.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn with_model(
        dataset: Arc<Dataset>,
        model: Arc<dyn GeodesyModel>,
        payloads: PayloadSource,
        options: QueryOptions,
    ) -> Result<Self, QueryError> {
        match &payloads {
            PayloadSource::Resident if !dataset.has_demographics() => {
                return Err(QueryError::DataUnavailable(format!(
                    "the {} dataset does not carry demographic payloads; configure a payload store",
                    dataset.layout()
                )));
            }
            PayloadSource::Store(store) if store.len() < dataset.len() => {
                log::warn!(
                    "Payload store ({}) holds {} blocks but the dataset has {}",
                    store.backend(),
                    store.len(),
                    dataset.len()
                );
            }
            _ => {}
        }

        log::info!(
            "Query engine ready: {} blocks, {} filter, {} payloads, up to {} workers",
            dataset.len(),
            options.strategy,
            payloads.label(),
            options.workers
        );

        Ok(Self {
            filter: SpatialFilter::new(dataset, model, options.strategy),
            payloads,
            options,
        })
    }

    #[must_use]
    pub fn dataset(&self) -> &Arc<Dataset> {
        self.filter.dataset()
    }

    #[must_use]
    pub const fn options(&self) -> &QueryOptions {
        &self.options
    }

    #[must_use]
    pub const fn payloads(&self) -> &PayloadSource {
        &self.payloads
    }

    /// Totals over every block within the query radius.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::DataIntegrity`] or [`QueryError::Io`] if a
    /// matched block's payload cannot be read, and
    /// [`QueryError::DeadlineExceeded`] if the configured deadline passes.
    pub fn query(&self, query: &Query) -> Result<AggregateResult, QueryError> {
        let start = Instant::now();
        let deadline = Deadline::after(self.options.deadline);

        let (candidates, scanned) = self.filter.candidates(&self.filter.cube(query));
        deadline.check()?;

        let shards = self
            .options
            .workers
            .min(candidates.len().div_ceil(MIN_SHARD_LEN));
        let totals = aggregate_sharded(&candidates, shards, &deadline, |chunk| {
            self.reduce_shard(query, chunk, &deadline)
        })?;

        let stats = FilterStats {
            scanned,
            candidates: candidates.len(),
            matched: usize::try_from(totals.blocks()).unwrap_or(usize::MAX),
        };
        log::debug!(
            "pop2010 ({}, {}) r={}m: {stats:?}, {shards} shards, {:.2?}",
            query.lat(),
            query.lon(),
            query.radius_meters(),
            start.elapsed()
        );

        Ok(totals.into_result())
    }

    fn reduce_shard(
        &self,
        query: &Query,
        slots: &[usize],
        deadline: &Deadline,
    ) -> Result<PopulationTotals, QueryError> {
        let records = self.dataset().records();
        let mut totals = PopulationTotals::new();
        let mut fetch_ids = Vec::new();

        for (i, &slot) in slots.iter().enumerate() {
            if i > 0 && i % DEADLINE_CHECK_INTERVAL == 0 {
                deadline.check()?;
            }
            if !self.filter.is_within(query, slot) {
                continue;
            }
            let record = &records[slot];
            match &self.payloads {
                PayloadSource::Resident => {
                    let payload = record.demographics.as_ref().ok_or_else(|| {
                        QueryError::DataIntegrity {
                            id: record.id.clone(),
                            message: "record has no resident payload".to_string(),
                        }
                    })?;
                    totals.add(payload);
                }
                PayloadSource::Store(_) => fetch_ids.push(record.id.as_str()),
            }
        }

        if let PayloadSource::Store(store) = &self.payloads {
            totals.merge(&aggregate_ids(fetch_ids, |id| store.get(id))?);
        }
        Ok(totals)
    }
}
