//! Order-independent reduction of matched blocks into population totals.
//!
//! [`PopulationTotals`] is a plain sum, so shards can be reduced on any
//! thread in any order and merged afterwards with the same result as a
//! single pass.

use census_radius_census_models::{AgePyramid, AggregateResult, DemographicRecord};
use census_radius_store::StoreError;

use crate::{Deadline, QueryError};

/// Running totals over a set of blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulationTotals {
    blocks: u64,
    population: u64,
    male_population: u64,
    female_population: u64,
    male_ages: AgePyramid,
    female_ages: AgePyramid,
}

impl PopulationTotals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one block.
    pub fn add(&mut self, record: &DemographicRecord) {
        self.blocks += 1;
        self.population += u64::from(record.population);
        self.male_population += u64::from(record.male_population);
        self.female_population += u64::from(record.female_population);
        self.male_ages.add_counts(&record.male_ages);
        self.female_ages.add_counts(&record.female_ages);
    }

    /// Folds another partial total into this one.
    pub fn merge(&mut self, other: &Self) {
        self.blocks += other.blocks;
        self.population += other.population;
        self.male_population += other.male_population;
        self.female_population += other.female_population;
        self.male_ages.merge(&other.male_ages);
        self.female_ages.merge(&other.female_ages);
    }

    #[must_use]
    pub const fn blocks(&self) -> u64 {
        self.blocks
    }

    #[must_use]
    pub const fn into_result(self) -> AggregateResult {
        AggregateResult {
            blocks: self.blocks,
            population: self.population,
            male_population: self.male_population,
            female_population: self.female_population,
            male_ages: self.male_ages,
            female_ages: self.female_ages,
        }
    }
}

impl<'a> FromIterator<&'a DemographicRecord> for PopulationTotals {
    fn from_iter<I: IntoIterator<Item = &'a DemographicRecord>>(iter: I) -> Self {
        let mut totals = Self::new();
        for record in iter {
            totals.add(record);
        }
        totals
    }
}

/// Sums the payloads of `ids`, fetched one at a time.
///
/// # Errors
///
/// A missing or corrupt payload is a [`QueryError::DataIntegrity`]; any
/// other fetch failure is a [`QueryError::Io`]. Nothing is skipped.
pub fn aggregate_ids<'a, I, F>(ids: I, fetch: F) -> Result<PopulationTotals, QueryError>
where
    I: IntoIterator<Item = &'a str>,
    F: Fn(&str) -> Result<DemographicRecord, StoreError>,
{
    let mut totals = PopulationTotals::new();
    for id in ids {
        let record = fetch(id).map_err(|e| QueryError::from_fetch(id, e))?;
        totals.add(&record);
    }
    Ok(totals)
}

/// Splits `items` into at most `shards` contiguous chunks, reduces each on
/// its own scoped thread with `reduce`, and merges the partial totals.
///
/// With one shard (or one item) everything runs on the calling thread.
/// The deadline is checked after each shard is joined.
///
/// # Errors
///
/// Returns the first error reported by a shard (in shard order), or
/// [`QueryError::DeadlineExceeded`] if the deadline passed.
pub fn aggregate_sharded<T, F>(
    items: &[T],
    shards: usize,
    deadline: &Deadline,
    reduce: F,
) -> Result<PopulationTotals, QueryError>
where
    T: Sync,
    F: Fn(&[T]) -> Result<PopulationTotals, QueryError> + Sync,
{
    let shards = shards.clamp(1, items.len().max(1));
    if shards == 1 {
        let totals = reduce(items)?;
        deadline.check()?;
        return Ok(totals);
    }

    let chunk_len = items.len().div_ceil(shards);
    let reduce = &reduce;

    std::thread::scope(|s| {
        let handles: Vec<_> = items
            .chunks(chunk_len)
            .map(|chunk| s.spawn(move || reduce(chunk)))
            .collect();

        let mut totals = PopulationTotals::new();
        for handle in handles {
            let partial = match handle.join() {
                Ok(partial) => partial?,
                Err(panic) => std::panic::resume_unwind(panic),
            };
            totals.merge(&partial);
            deadline.check()?;
        }
        Ok(totals)
    })
}
