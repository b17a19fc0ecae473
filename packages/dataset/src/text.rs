//! Delimited-text layouts.
//!
//! Location rows have no header and seven fields:
//! `id,population,lat,lon,x,y,z`.
//!
//! Payload rows have no header and fifty fields: the block id, the total
//! population, 24 male slots, then 24 female slots. Slot 0 of each gender
//! carries that gender's total and slots 1..=23 are the age brackets.

use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;

use census_radius_census_models::{
    AGE_BRACKET_COUNT, AGE_SLOT_COUNT, DemographicRecord, LocationRecord,
};

use crate::LoadError;
use crate::progress::ProgressCallback;

/// Fields per location row.
pub const LOCATION_FIELDS: usize = 7;

/// Fields per payload row.
pub const PAYLOAD_FIELDS: usize = 2 + 2 * AGE_SLOT_COUNT;

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input)
}

fn parse<T: FromStr>(row: &csv::StringRecord, index: usize, column: usize, name: &str) -> Result<T, LoadError>
where
    T::Err: std::fmt::Display,
{
    let raw = row.get(column).unwrap_or_default();
    raw.parse().map_err(|e| LoadError::Malformed {
        index,
        message: format!("column {column} (`{name}`) = {raw:?}: {e}"),
    })
}

fn expect_width(row: &csv::StringRecord, index: usize, expected: usize) -> Result<(), LoadError> {
    if row.len() == expected {
        Ok(())
    } else {
        Err(LoadError::Malformed {
            index,
            message: format!("expected {expected} fields, found {}", row.len()),
        })
    }
}

fn block_id(row: &csv::StringRecord, index: usize) -> Result<String, LoadError> {
    match row.get(0) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(LoadError::Malformed {
            index,
            message: "empty block id".to_string(),
        }),
    }
}

/// Reads location rows.
///
/// # Errors
///
/// Returns [`LoadError`] if the input cannot be read or any row is
/// malformed.
pub fn read_locations<R: Read>(
    input: R,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<Vec<LocationRecord>, LoadError> {
    let mut records = Vec::new();

    for (index, row) in reader(input).records().enumerate() {
        let row = row?;
        expect_width(&row, index, LOCATION_FIELDS)?;

        records.push(LocationRecord {
            id: block_id(&row, index)?,
            population: parse(&row, index, 1, "population")?,
            lat: parse(&row, index, 2, "lat")?,
            lon: parse(&row, index, 3, "lon")?,
            position: [
                parse(&row, index, 4, "x")?,
                parse(&row, index, 5, "y")?,
                parse(&row, index, 6, "z")?,
            ],
            demographics: None,
        });
        progress.inc(1);
    }

    Ok(records)
}

/// Reads payload rows as `(block id, payload)` pairs.
///
/// # Errors
///
/// Returns [`LoadError`] if the input cannot be read or any row is
/// malformed.
pub fn read_payloads<R: Read>(input: R) -> Result<Vec<(String, DemographicRecord)>, LoadError> {
    let mut payloads = Vec::new();

    for (index, row) in reader(input).records().enumerate() {
        let row = row?;
        expect_width(&row, index, PAYLOAD_FIELDS)?;

        let id = block_id(&row, index)?;
        let population = parse(&row, index, 1, "population")?;

        let male_base = 2;
        let female_base = male_base + AGE_SLOT_COUNT;

        let mut male_ages = [0u32; AGE_BRACKET_COUNT];
        let mut female_ages = [0u32; AGE_BRACKET_COUNT];
        for bracket in 0..AGE_BRACKET_COUNT {
            male_ages[bracket] = parse(&row, index, male_base + 1 + bracket, "male_ages")?;
            female_ages[bracket] = parse(&row, index, female_base + 1 + bracket, "female_ages")?;
        }

        payloads.push((
            id,
            DemographicRecord {
                population,
                male_population: parse(&row, index, male_base, "male_population")?,
                female_population: parse(&row, index, female_base, "female_population")?,
                male_ages,
                female_ages,
            },
        ));
    }

    Ok(payloads)
}

/// Formats a payload as a row accepted by [`read_payloads`].
#[must_use]
pub fn format_payload(id: &str, record: &DemographicRecord) -> String {
    let mut fields = Vec::with_capacity(PAYLOAD_FIELDS);
    fields.push(id.to_string());
    fields.push(record.population.to_string());
    fields.push(record.male_population.to_string());
    fields.extend(record.male_ages.iter().map(ToString::to_string));
    fields.push(record.female_population.to_string());
    fields.extend(record.female_ages.iter().map(ToString::to_string));
    fields.join(",")
}
