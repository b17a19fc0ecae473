#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API response types for the census radius server.
//!
//! Field names follow the published `/api/pop2010` contract (snake case,
//! `pop2010*` totals), which predates this server, so they are spelled out
//! per field rather than derived from the Rust names.

use std::time::Duration;

use census_radius_census_models::{AgePyramid, AggregateResult};
use serde::{Deserialize, Serialize};

/// Plain-text usage document served at `GET /api/pop2010`.
pub const POP2010_USAGE: &str = r#"
/api/pop2010/{distance}/lat/{lat}/lon/{lon} -- returns the population (US Census 2010) within the given distance from the given location.

Input:
{distance} -- the search radius in meters, must be in [1,1000000]
{lat} -- the geographic latitude, must be in [-90,90]
{lon} -- the geographic longitude, must be in [-180,180]

Output:
{
 "duration_msec":___,
 "distance":___,
 "lat":___,
 "lon":___,
 "blocks":___,
 "pop2010":___,
 "pop2010_female":___,
 "pop2010_male":___,
 "ages_female":{"age_under5":___,"age_5to9":___,...,"age_85over":___},
 "ages_male":{"age_under5":___,"age_5to9":___,...,"age_85over":___}
}

{blocks} -- US Census block count within the given distance
"#;

/// Result of a radius query as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct ApiPopulation {
    /// Server-side time spent on the request, in whole milliseconds.
    pub duration_msec: u64,
    /// Search radius in meters, echoed back.
    pub distance: i64,
    pub lat: f64,
    pub lon: f64,
    /// Number of census blocks within the radius.
    pub blocks: u64,
    #[serde(rename = "pop2010")]
    pub population: u64,
    #[serde(rename = "pop2010_female")]
    pub female_population: u64,
    #[serde(rename = "pop2010_male")]
    pub male_population: u64,
    #[serde(rename = "ages_female")]
    pub female_ages: AgePyramid,
    #[serde(rename = "ages_male")]
    pub male_ages: AgePyramid,
}

impl ApiPopulation {
    #[must_use]
    pub fn new(
        result: &AggregateResult,
        distance: i64,
        lat: f64,
        lon: f64,
        elapsed: Duration,
    ) -> Self {
        Self {
            duration_msec: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            distance,
            lat,
            lon,
            blocks: result.blocks,
            population: result.population,
            female_population: result.female_population,
            male_population: result.male_population,
            female_ages: result.female_ages,
            male_ages: result.male_ages,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
    /// Census blocks loaded.
    pub blocks: usize,
    /// Dataset layout the blocks were loaded from.
    pub layout: String,
    /// Where demographic payloads are read from.
    pub payloads: String,
}
