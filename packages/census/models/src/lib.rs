#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Census block types shared by the loader, the payload store, and the
//! query engine.
//!
//! A census block is the smallest geographic unit in the 2010 population
//! dataset. Each block has a position, a total population, and an optional
//! demographic payload (gender totals plus a 23-bracket age pyramid per
//! gender).

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use strum_macros::{AsRefStr, Display, EnumString};

/// Number of age brackets in a pyramid.
pub const AGE_BRACKET_COUNT: usize = 23;

/// Number of persisted age slots per gender. Slot 0 is reserved and slots
/// 1..=23 map to [`AgeBracket::all()`] in order.
pub const AGE_SLOT_COUNT: usize = AGE_BRACKET_COUNT + 1;

/// An age bracket of the 2010 census age pyramid.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum AgeBracket {
    #[serde(rename = "age_under5")]
    #[strum(serialize = "age_under5")]
    Under5,
    #[serde(rename = "age_5to9")]
    #[strum(serialize = "age_5to9")]
    From5To9,
    #[serde(rename = "age_10to14")]
    #[strum(serialize = "age_10to14")]
    From10To14,
    #[serde(rename = "age_15to17")]
    #[strum(serialize = "age_15to17")]
    From15To17,
    #[serde(rename = "age_18to19")]
    #[strum(serialize = "age_18to19")]
    From18To19,
    #[serde(rename = "age_20")]
    #[strum(serialize = "age_20")]
    Age20,
    #[serde(rename = "age_21")]
    #[strum(serialize = "age_21")]
    Age21,
    #[serde(rename = "age_22to24")]
    #[strum(serialize = "age_22to24")]
    From22To24,
    #[serde(rename = "age_25to29")]
    #[strum(serialize = "age_25to29")]
    From25To29,
    #[serde(rename = "age_30to34")]
    #[strum(serialize = "age_30to34")]
    From30To34,
    #[serde(rename = "age_35to39")]
    #[strum(serialize = "age_35to39")]
    From35To39,
    #[serde(rename = "age_40to44")]
    #[strum(serialize = "age_40to44")]
    From40To44,
    #[serde(rename = "age_45to49")]
    #[strum(serialize = "age_45to49")]
    From45To49,
    #[serde(rename = "age_50to54")]
    #[strum(serialize = "age_50to54")]
    From50To54,
    #[serde(rename = "age_55to59")]
    #[strum(serialize = "age_55to59")]
    From55To59,
    #[serde(rename = "age_60to61")]
    #[strum(serialize = "age_60to61")]
    From60To61,
    #[serde(rename = "age_62to64")]
    #[strum(serialize = "age_62to64")]
    From62To64,
    #[serde(rename = "age_65to66")]
    #[strum(serialize = "age_65to66")]
    From65To66,
    #[serde(rename = "age_67to69")]
    #[strum(serialize = "age_67to69")]
    From67To69,
    #[serde(rename = "age_70to74")]
    #[strum(serialize = "age_70to74")]
    From70To74,
    #[serde(rename = "age_75to79")]
    #[strum(serialize = "age_75to79")]
    From75To79,
    #[serde(rename = "age_80to84")]
    #[strum(serialize = "age_80to84")]
    From80To84,
    #[serde(rename = "age_85over")]
    #[strum(serialize = "age_85over")]
    Over85,
}

impl AgeBracket {
    /// Returns all brackets, youngest first.
    #[must_use]
    pub const fn all() -> &'static [Self; AGE_BRACKET_COUNT] {
        &[
            Self::Under5,
            Self::From5To9,
            Self::From10To14,
            Self::From15To17,
            Self::From18To19,
            Self::Age20,
            Self::Age21,
            Self::From22To24,
            Self::From25To29,
            Self::From30To34,
            Self::From35To39,
            Self::From40To44,
            Self::From45To49,
            Self::From50To54,
            Self::From55To59,
            Self::From60To61,
            Self::From62To64,
            Self::From65To66,
            Self::From67To69,
            Self::From70To74,
            Self::From75To79,
            Self::From80To84,
            Self::Over85,
        ]
    }

    /// Position of this bracket within a pyramid (0-based).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// The demographic payload of one census block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemographicRecord {
    /// Total population.
    pub population: u32,
    /// Male population.
    pub male_population: u32,
    /// Female population.
    pub female_population: u32,
    /// Male counts per [`AgeBracket`].
    pub male_ages: [u32; AGE_BRACKET_COUNT],
    /// Female counts per [`AgeBracket`].
    pub female_ages: [u32; AGE_BRACKET_COUNT],
}

impl DemographicRecord {
    /// A payload with only a total population and no breakdown.
    #[must_use]
    pub const fn empty(population: u32) -> Self {
        Self {
            population,
            male_population: 0,
            female_population: 0,
            male_ages: [0; AGE_BRACKET_COUNT],
            female_ages: [0; AGE_BRACKET_COUNT],
        }
    }

    /// Checks that the gender totals add up to the population and that
    /// each pyramid adds up to its gender total.
    ///
    /// # Errors
    ///
    /// Returns the first [`TotalsMismatch`] found.
    pub fn check_totals(&self) -> Result<(), TotalsMismatch> {
        let genders = u64::from(self.male_population) + u64::from(self.female_population);
        if genders != u64::from(self.population) {
            return Err(TotalsMismatch {
                what: "male + female population",
                expected: u64::from(self.population),
                actual: genders,
            });
        }

        let male: u64 = self.male_ages.iter().copied().map(u64::from).sum();
        if male != u64::from(self.male_population) {
            return Err(TotalsMismatch {
                what: "male age pyramid",
                expected: u64::from(self.male_population),
                actual: male,
            });
        }

        let female: u64 = self.female_ages.iter().copied().map(u64::from).sum();
        if female != u64::from(self.female_population) {
            return Err(TotalsMismatch {
                what: "female age pyramid",
                expected: u64::from(self.female_population),
                actual: female,
            });
        }

        Ok(())
    }
}

/// A demographic sum that does not match its declared total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalsMismatch {
    /// Which sum was checked.
    pub what: &'static str,
    /// The declared total.
    pub expected: u64,
    /// The computed sum.
    pub actual: u64,
}

impl std::fmt::Display for TotalsMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} sums to {} but the declared total is {}",
            self.what, self.actual, self.expected
        )
    }
}

impl std::error::Error for TotalsMismatch {}

/// One census block as held by the in-memory dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
    /// Census block identifier, unique across the dataset.
    pub id: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Geocentric `(x, y, z)` in whole meters, derived from `(lat, lon)`.
    pub position: [i64; 3],
    /// Total population.
    pub population: u32,
    /// Full demographic payload, when the dataset keeps it resident.
    pub demographics: Option<DemographicRecord>,
}

/// Aggregated counts for one age pyramid.
///
/// Serializes as an object keyed by bracket name (`age_under5`, ...,
/// `age_85over`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgePyramid {
    counts: [u64; AGE_BRACKET_COUNT],
}

impl AgePyramid {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counts: [0; AGE_BRACKET_COUNT],
        }
    }

    /// Count for a single bracket.
    #[must_use]
    pub const fn get(&self, bracket: AgeBracket) -> u64 {
        self.counts[bracket.index()]
    }

    /// Adds one block's bracket counts.
    pub fn add_counts(&mut self, counts: &[u32; AGE_BRACKET_COUNT]) {
        for (total, count) in self.counts.iter_mut().zip(counts) {
            *total += u64::from(*count);
        }
    }

    /// Adds another pyramid element-wise.
    pub fn merge(&mut self, other: &Self) {
        for (total, count) in self.counts.iter_mut().zip(&other.counts) {
            *total += count;
        }
    }

    /// Sum of all brackets.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Brackets paired with their counts, youngest first.
    pub fn iter(&self) -> impl Iterator<Item = (AgeBracket, u64)> + '_ {
        AgeBracket::all().iter().copied().zip(self.counts.iter().copied())
    }

    #[must_use]
    pub const fn counts(&self) -> &[u64; AGE_BRACKET_COUNT] {
        &self.counts
    }
}

impl Serialize for AgePyramid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(AGE_BRACKET_COUNT))?;
        for (bracket, count) in self.iter() {
            map.serialize_entry(bracket.as_ref(), &count)?;
        }
        map.end()
    }
}

/// Totals over the blocks matched by a radius query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    /// Number of matched census blocks.
    pub blocks: u64,
    /// Total population.
    pub population: u64,
    /// Male population.
    pub male_population: u64,
    /// Female population.
    pub female_population: u64,
    /// Male age pyramid.
    pub male_ages: AgePyramid,
    /// Female age pyramid.
    pub female_ages: AgePyramid,
}
