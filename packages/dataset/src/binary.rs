//! Decoders and encoders for the fixed-width binary layouts.

use std::sync::Arc;

use census_radius_census_models::{
    AGE_BRACKET_COUNT, AGE_SLOT_COUNT, DemographicRecord, LocationRecord,
};

use crate::LoadError;
use crate::cursor::{RecordCursor, RecordWriter};
use crate::progress::ProgressCallback;
use crate::schema::{
    COMPACT, EXTENDED, FEMALE_AGES, FEMALE_POPULATION, ID, LAT, LON, MALE_AGES, MALE_POPULATION,
    POPULATION, RecordSchema, X, Y, Z,
};

/// Records between progress updates.
const PROGRESS_STEP: usize = 10_000;

/// Decodes every record in `bytes` using `schema`.
///
/// The total length must be an exact multiple of the record length; a
/// trailing partial record is an error, never silently dropped.
///
/// # Errors
///
/// Returns [`LoadError`] if the schema is inconsistent, the buffer holds a
/// partial record, or any record is malformed.
pub fn decode(
    bytes: &[u8],
    schema: &RecordSchema,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<Vec<LocationRecord>, LoadError> {
    schema.validate()?;

    let remainder = bytes.len() % schema.record_len;
    if remainder != 0 {
        return Err(LoadError::TrailingPartialRecord {
            schema: schema.name,
            len: bytes.len(),
            record_len: schema.record_len,
            remainder,
        });
    }

    let count = bytes.len() / schema.record_len;
    progress.set_total(count as u64);

    let extended = schema.field(MALE_AGES.name).is_some();
    let mut records = Vec::with_capacity(count);

    for (index, chunk) in bytes.chunks_exact(schema.record_len).enumerate() {
        let cursor = RecordCursor::new(chunk, index);
        let mut record = decode_location(&cursor)?;
        if extended {
            record.demographics = Some(decode_demographics(&cursor, record.population)?);
        }
        records.push(record);

        if (index + 1) % PROGRESS_STEP == 0 {
            progress.set_position((index + 1) as u64);
        }
    }

    progress.set_position(count as u64);
    Ok(records)
}

fn decode_location(cursor: &RecordCursor<'_>) -> Result<LocationRecord, LoadError> {
    let id = cursor.ascii(&ID)?;
    if id.is_empty() {
        return Err(cursor.malformed("empty block id".to_string()));
    }

    let population = cursor.i32(&POPULATION)?;
    let population = u32::try_from(population)
        .map_err(|_| cursor.malformed(format!("negative population {population}")))?;

    Ok(LocationRecord {
        id: id.to_string(),
        lat: cursor.f64(&LAT)?,
        lon: cursor.f64(&LON)?,
        position: [cursor.i64(&X)?, cursor.i64(&Y)?, cursor.i64(&Z)?],
        population,
        demographics: None,
    })
}

fn decode_demographics(
    cursor: &RecordCursor<'_>,
    population: u32,
) -> Result<DemographicRecord, LoadError> {
    let male_population = non_negative(cursor, MALE_POPULATION.name, cursor.i16(&MALE_POPULATION)?)?;
    let female_population =
        non_negative(cursor, FEMALE_POPULATION.name, cursor.i16(&FEMALE_POPULATION)?)?;

    let male_slots: [i16; AGE_SLOT_COUNT] = cursor.i16_array(&MALE_AGES)?;
    let female_slots: [i16; AGE_SLOT_COUNT] = cursor.i16_array(&FEMALE_AGES)?;

    Ok(DemographicRecord {
        population,
        male_population,
        female_population,
        male_ages: brackets(cursor, MALE_AGES.name, &male_slots)?,
        female_ages: brackets(cursor, FEMALE_AGES.name, &female_slots)?,
    })
}

/// Drops the reserved slot 0 and converts the bracket slots to counts.
fn brackets(
    cursor: &RecordCursor<'_>,
    field: &str,
    slots: &[i16; AGE_SLOT_COUNT],
) -> Result<[u32; AGE_BRACKET_COUNT], LoadError> {
    let mut counts = [0u32; AGE_BRACKET_COUNT];
    for (count, slot) in counts.iter_mut().zip(&slots[1..]) {
        *count = non_negative(cursor, field, *slot)?;
    }
    Ok(counts)
}

fn non_negative(cursor: &RecordCursor<'_>, field: &str, value: i16) -> Result<u32, LoadError> {
    u32::try_from(value).map_err(|_| cursor.malformed(format!("negative `{field}` count {value}")))
}

/// Encodes records in the compact layout.
///
/// # Errors
///
/// Returns [`LoadError::Encode`] if a value does not fit its field.
pub fn encode_compact(records: &[LocationRecord]) -> Result<Vec<u8>, LoadError> {
    encode(records, &COMPACT, |_, _| Ok(()))
}

/// Encodes records in the extended layout. Every record must carry its
/// demographic payload.
///
/// # Errors
///
/// Returns [`LoadError::Encode`] if a record has no demographics or a value
/// does not fit its field.
pub fn encode_extended(records: &[LocationRecord]) -> Result<Vec<u8>, LoadError> {
    encode(records, &EXTENDED, |writer, record| {
        let demographics = record
            .demographics
            .as_ref()
            .ok_or_else(|| "missing demographic payload".to_string())?;

        let male_total = narrow(demographics.male_population)?;
        let female_total = narrow(demographics.female_population)?;
        writer.i16(&MALE_POPULATION, male_total)?;
        writer.i16_array(&MALE_AGES, &slots(male_total, &demographics.male_ages)?)?;
        writer.i16(&FEMALE_POPULATION, female_total)?;
        writer.i16_array(&FEMALE_AGES, &slots(female_total, &demographics.female_ages)?)?;
        Ok(())
    })
}

fn encode<F>(records: &[LocationRecord], schema: &RecordSchema, extra: F) -> Result<Vec<u8>, LoadError>
where
    F: Fn(&mut RecordWriter<'_>, &LocationRecord) -> Result<(), String>,
{
    schema.validate()?;

    let mut bytes = vec![0u8; records.len() * schema.record_len];

    for (index, (record, chunk)) in records
        .iter()
        .zip(bytes.chunks_exact_mut(schema.record_len))
        .enumerate()
    {
        let mut writer = RecordWriter::new(chunk);
        write_location(&mut writer, record)
            .and_then(|()| extra(&mut writer, record))
            .map_err(|message| LoadError::Encode {
                index,
                id: record.id.clone(),
                message,
            })?;
    }

    Ok(bytes)
}

fn write_location(writer: &mut RecordWriter<'_>, record: &LocationRecord) -> Result<(), String> {
    let population = i32::try_from(record.population)
        .map_err(|_| format!("population {} does not fit i32", record.population))?;
    writer.ascii(&ID, &record.id)?;
    writer.i32(&POPULATION, population)?;
    writer.f64(&LAT, record.lat)?;
    writer.f64(&LON, record.lon)?;
    writer.i64(&X, record.position[0])?;
    writer.i64(&Y, record.position[1])?;
    writer.i64(&Z, record.position[2])
}

fn narrow(value: u32) -> Result<i16, String> {
    i16::try_from(value).map_err(|_| format!("count {value} does not fit i16"))
}

/// Slot 0 carries the gender total; slots 1..=23 the brackets.
fn slots(total: i16, counts: &[u32; AGE_BRACKET_COUNT]) -> Result<[i16; AGE_SLOT_COUNT], String> {
    let mut slots = [0i16; AGE_SLOT_COUNT];
    slots[0] = total;
    for (slot, count) in slots[1..].iter_mut().zip(counts) {
        *slot = narrow(*count)?;
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::null_progress;

    fn record(id: &str, population: u32) -> LocationRecord {
        let mut male_ages = [0; AGE_BRACKET_COUNT];
        male_ages[0] = population / 2;
        let mut female_ages = [0; AGE_BRACKET_COUNT];
        female_ages[22] = population - population / 2;
        LocationRecord {
            id: id.to_string(),
            lat: 38.9,
            lon: -77.03,
            position: [1_115_000, -4_843_000, 3_983_000],
            population,
            demographics: Some(DemographicRecord {
                population,
                male_population: population / 2,
                female_population: population - population / 2,
                male_ages,
                female_ages,
            }),
        }
    }

    #[test]
    fn compact_records_decode_without_demographics() {
        let bytes = encode_compact(&[record("A", 10), record("B", 20)]).unwrap();
        assert_eq!(bytes.len(), 2 * COMPACT.record_len);

        let decoded = decode(&bytes, &COMPACT, &null_progress()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].id, "B");
        assert_eq!(decoded[1].population, 20);
        assert_eq!(decoded[1].position, [1_115_000, -4_843_000, 3_983_000]);
        assert!(decoded[0].demographics.is_none());
    }

    #[test]
    fn extended_records_keep_demographics_and_drop_reserved_slot() {
        let original = record("110010001", 7);
        let bytes = encode_extended(std::slice::from_ref(&original)).unwrap();
        assert_eq!(bytes.len(), EXTENDED.record_len);

        // Reserved slot 0 holds the male total as written.
        let slot0 = i16::from_le_bytes([bytes[MALE_AGES.offset], bytes[MALE_AGES.offset + 1]]);
        assert_eq!(slot0, 3);

        let decoded = decode(&bytes, &EXTENDED, &null_progress()).unwrap();
        assert_eq!(decoded, vec![original]);
    }

    #[test]
    fn reserved_slot_contents_are_ignored() {
        let mut bytes = encode_extended(&[record("X", 4)]).unwrap();
        bytes[FEMALE_AGES.offset..FEMALE_AGES.offset + 2].copy_from_slice(&999i16.to_le_bytes());
        let decoded = decode(&bytes, &EXTENDED, &null_progress()).unwrap();
        assert_eq!(decoded[0].demographics.as_ref().unwrap().female_population, 2);
    }

    #[test]
    fn trailing_partial_record_is_an_error() {
        let mut bytes = encode_compact(&[record("A", 1)]).unwrap();
        bytes.extend_from_slice(&[0u8; 10]);
        let err = decode(&bytes, &COMPACT, &null_progress()).unwrap_err();
        assert!(matches!(
            err,
            LoadError::TrailingPartialRecord {
                remainder: 10,
                record_len: 53,
                ..
            }
        ));
    }

    #[test]
    fn compact_bytes_read_as_extended_fail_on_length() {
        let bytes = encode_compact(&[record("A", 1), record("B", 1)]).unwrap();
        assert!(decode(&bytes, &EXTENDED, &null_progress()).is_err());
    }

    #[test]
    fn negative_population_is_malformed() {
        let mut bytes = encode_compact(&[record("A", 1), record("B", 1)]).unwrap();
        let at = COMPACT.record_len + POPULATION.offset;
        bytes[at..at + 4].copy_from_slice(&(-5i32).to_le_bytes());
        let err = decode(&bytes, &COMPACT, &null_progress()).unwrap_err();
        assert!(matches!(err, LoadError::Malformed { index: 1, .. }));
    }

    #[test]
    fn blank_id_is_malformed() {
        let mut bytes = encode_compact(&[record("A", 1)]).unwrap();
        bytes[0] = b' ';
        assert!(decode(&bytes, &COMPACT, &null_progress()).is_err());
    }

    #[test]
    fn extended_encode_requires_demographics() {
        let mut r = record("A", 1);
        r.demographics = None;
        let err = encode_extended(&[r]).unwrap_err();
        assert!(matches!(err, LoadError::Encode { index: 0, .. }));
    }

    #[test]
    fn counts_beyond_i16_cannot_be_encoded() {
        let r = record("A", 70_000);
        assert!(encode_extended(&[r]).is_err());
    }

    #[test]
    fn empty_buffer_decodes_to_no_records() {
        assert!(decode(&[], &EXTENDED, &null_progress()).unwrap().is_empty());
    }
}
