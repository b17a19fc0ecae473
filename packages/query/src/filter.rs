//! Two-phase spatial filter.
//!
//! Phase one culls the dataset to the blocks whose stored geocentric
//! position lies in the query's [`BoundingCube`]. Phase two runs the exact
//! ellipsoidal distance on each survivor. Phase one never drops a true
//! match and phase two is exact, so the result is exactly the set of
//! blocks within the radius whichever [`FilterStrategy`] finds the
//! candidates.

use std::sync::Arc;
use std::time::Instant;

use census_radius_dataset::Dataset;
use census_radius_geodesy::GeodesyModel;
use rstar::{AABB, RTree, RTreeObject};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::Query;
use crate::cube::BoundingCube;

/// How phase one finds the blocks inside the cube.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum FilterStrategy {
    /// Visit every record and compare its position against the cube.
    #[serde(rename = "linear")]
    #[strum(serialize = "linear")]
    LinearScan,
    /// Ask an R-tree over the stored positions for the cube's contents.
    #[default]
    #[serde(rename = "rtree")]
    #[strum(serialize = "rtree")]
    RTree,
}

/// Counters from one filter pass, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Records examined by the cube phase. Equal to the dataset size for
    /// a linear scan; the R-tree only touches the candidates.
    pub scanned: usize,
    /// Records inside the cube.
    pub candidates: usize,
    /// Candidates within the exact distance.
    pub matched: usize,
}

/// A block's stored position in the R-tree.
struct IndexedBlock {
    position: [i64; 3],
    slot: usize,
}

impl RTreeObject for IndexedBlock {
    type Envelope = AABB<[i64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

enum CandidateIndex {
    LinearScan,
    RTree(RTree<IndexedBlock>),
}

/// Finds the blocks of a dataset within a query radius.
pub struct SpatialFilter {
    dataset: Arc<Dataset>,
    model: Arc<dyn GeodesyModel>,
    index: CandidateIndex,
}

impl SpatialFilter {
    /// Builds the filter, bulk-loading an R-tree if `strategy` asks for
    /// one.
    #[must_use]
    pub fn new(
        dataset: Arc<Dataset>,
        model: Arc<dyn GeodesyModel>,
        strategy: FilterStrategy,
    ) -> Self {
        let index = match strategy {
            FilterStrategy::LinearScan => CandidateIndex::LinearScan,
            FilterStrategy::RTree => {
                let start = Instant::now();
                let entries = dataset
                    .records()
                    .iter()
                    .enumerate()
                    .map(|(slot, record)| IndexedBlock {
                        position: record.position,
                        slot,
                    })
                    .collect();
                let tree = RTree::bulk_load(entries);
                log::info!(
                    "Built R-tree over {} census blocks in {:.2?}",
                    tree.size(),
                    start.elapsed()
                );
                CandidateIndex::RTree(tree)
            }
        };

        Self {
            dataset,
            model,
            index,
        }
    }

    #[must_use]
    pub const fn strategy(&self) -> FilterStrategy {
        match self.index {
            CandidateIndex::LinearScan => FilterStrategy::LinearScan,
            CandidateIndex::RTree(_) => FilterStrategy::RTree,
        }
    }

    #[must_use]
    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    /// The culling cube for `query`.
    #[must_use]
    pub fn cube(&self, query: &Query) -> BoundingCube {
        BoundingCube::around(
            self.model.to_geocentric(query.point()),
            f64::from(query.radius_meters()),
        )
    }

    /// Phase one: slots of every record inside `cube`, in ascending order,
    /// and the number of records examined.
    #[must_use]
    pub fn candidates(&self, cube: &BoundingCube) -> (Vec<usize>, usize) {
        match &self.index {
            CandidateIndex::LinearScan => {
                let records = self.dataset.records();
                let slots = records
                    .iter()
                    .enumerate()
                    .filter(|(_, record)| cube.contains(&record.position))
                    .map(|(slot, _)| slot)
                    .collect();
                (slots, records.len())
            }
            CandidateIndex::RTree(tree) => {
                let envelope = AABB::from_corners(cube.min, cube.max);
                let mut slots: Vec<usize> = tree
                    .locate_in_envelope(&envelope)
                    .map(|block| block.slot)
                    .collect();
                slots.sort_unstable();
                let scanned = slots.len();
                (slots, scanned)
            }
        }
    }

    /// Phase two: whether the record at `slot` is within the radius.
    #[must_use]
    pub fn is_within(&self, query: &Query, slot: usize) -> bool {
        self.dataset.get(slot).is_some_and(|record| {
            let distance = self
                .model
                .ellipsoidal_distance(query.point(), geo::Point::new(record.lon, record.lat));
            distance <= f64::from(query.radius_meters())
        })
    }

    /// Runs both phases on the calling thread.
    #[must_use]
    pub fn matches(&self, query: &Query) -> (Vec<usize>, FilterStats) {
        let (candidates, scanned) = self.candidates(&self.cube(query));
        let candidate_count = candidates.len();
        let matched: Vec<usize> = candidates
            .into_iter()
            .filter(|&slot| self.is_within(query, slot))
            .collect();

        let stats = FilterStats {
            scanned,
            candidates: candidate_count,
            matched: matched.len(),
        };
        (matched, stats)
    }
}
