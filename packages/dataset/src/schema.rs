//! Fixed-width record layouts.
//!
//! Each binary layout is described by a [`RecordSchema`]: an ordered list
//! of [`FieldSpec`]s giving the name, byte offset, width, and decode rule
//! of every field. All integers and floats are little-endian.
//!
//! Compact layout (53 bytes):
//!
//! | field        | offset | width | rule   |
//! |--------------|--------|-------|--------|
//! | `id`         | 0      | 9     | ASCII  |
//! | `population` | 9      | 4     | i32 LE |
//! | `lat`        | 13     | 8     | f64 LE |
//! | `lon`        | 21     | 8     | f64 LE |
//! | `x`          | 29     | 8     | i64 LE |
//! | `y`          | 37     | 8     | i64 LE |
//! | `z`          | 45     | 8     | i64 LE |
//!
//! Extended layout (153 bytes): the compact fields, then
//!
//! | field               | offset | width | rule        |
//! |---------------------|--------|-------|-------------|
//! | `male_population`   | 53     | 2     | i16 LE      |
//! | `male_ages`         | 55     | 48    | 24 × i16 LE |
//! | `female_population` | 103    | 2     | i16 LE      |
//! | `female_ages`       | 105    | 48    | 24 × i16 LE |
//!
//! Age slot 0 is reserved (writers store the gender total there); slots
//! 1..=23 are the age brackets in order.

use census_radius_census_models::AGE_SLOT_COUNT;

use crate::LoadError;

/// How the bytes of a field are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeRule {
    /// ASCII text padded on the right with spaces or NULs.
    Ascii,
    I16Le,
    I32Le,
    I64Le,
    F64Le,
    /// A run of `n` consecutive little-endian `i16` values.
    I16LeArray(usize),
}

impl DecodeRule {
    /// Width in bytes implied by the rule, or `None` for variable-width
    /// text.
    #[must_use]
    pub const fn width(self) -> Option<usize> {
        match self {
            Self::Ascii => None,
            Self::I16Le => Some(2),
            Self::I32Le => Some(4),
            Self::I64Le | Self::F64Le => Some(8),
            Self::I16LeArray(n) => Some(2 * n),
        }
    }
}

/// One field of a fixed-width record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub offset: usize,
    pub width: usize,
    pub rule: DecodeRule,
}

impl FieldSpec {
    const fn new(name: &'static str, offset: usize, width: usize, rule: DecodeRule) -> Self {
        Self {
            name,
            offset,
            width,
            rule,
        }
    }

    /// Offset one past the last byte of this field.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.width
    }
}

/// Width of the block identifier field.
pub const ID_WIDTH: usize = 9;

pub const ID: FieldSpec = FieldSpec::new("id", 0, ID_WIDTH, DecodeRule::Ascii);
pub const POPULATION: FieldSpec = FieldSpec::new("population", 9, 4, DecodeRule::I32Le);
pub const LAT: FieldSpec = FieldSpec::new("lat", 13, 8, DecodeRule::F64Le);
pub const LON: FieldSpec = FieldSpec::new("lon", 21, 8, DecodeRule::F64Le);
pub const X: FieldSpec = FieldSpec::new("x", 29, 8, DecodeRule::I64Le);
pub const Y: FieldSpec = FieldSpec::new("y", 37, 8, DecodeRule::I64Le);
pub const Z: FieldSpec = FieldSpec::new("z", 45, 8, DecodeRule::I64Le);
pub const MALE_POPULATION: FieldSpec =
    FieldSpec::new("male_population", 53, 2, DecodeRule::I16Le);
pub const MALE_AGES: FieldSpec = FieldSpec::new(
    "male_ages",
    55,
    2 * AGE_SLOT_COUNT,
    DecodeRule::I16LeArray(AGE_SLOT_COUNT),
);
pub const FEMALE_POPULATION: FieldSpec =
    FieldSpec::new("female_population", 103, 2, DecodeRule::I16Le);
pub const FEMALE_AGES: FieldSpec = FieldSpec::new(
    "female_ages",
    105,
    2 * AGE_SLOT_COUNT,
    DecodeRule::I16LeArray(AGE_SLOT_COUNT),
);

/// A fixed-width record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSchema {
    pub name: &'static str,
    pub record_len: usize,
    pub fields: &'static [FieldSpec],
}

pub const COMPACT: RecordSchema = RecordSchema {
    name: "compact",
    record_len: 53,
    fields: &[ID, POPULATION, LAT, LON, X, Y, Z],
};

pub const EXTENDED: RecordSchema = RecordSchema {
    name: "extended",
    record_len: 153,
    fields: &[
        ID,
        POPULATION,
        LAT,
        LON,
        X,
        Y,
        Z,
        MALE_POPULATION,
        MALE_AGES,
        FEMALE_POPULATION,
        FEMALE_AGES,
    ],
};

impl RecordSchema {
    /// Checks that fields are contiguous starting at offset 0, that each
    /// width agrees with its rule, and that the fields fill the record
    /// exactly.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Schema`] describing the first inconsistency.
    pub fn validate(&self) -> Result<(), LoadError> {
        let mut expected_offset = 0;

        for field in self.fields {
            if field.width == 0 {
                return Err(self.invalid(format!("field `{}` has zero width", field.name)));
            }
            if field.offset != expected_offset {
                return Err(self.invalid(format!(
                    "field `{}` starts at {} but the previous field ends at {expected_offset}",
                    field.name, field.offset
                )));
            }
            if let Some(width) = field.rule.width()
                && width != field.width
            {
                return Err(self.invalid(format!(
                    "field `{}` is {} bytes wide but its rule needs {width}",
                    field.name, field.width
                )));
            }
            expected_offset = field.end();
        }

        if expected_offset != self.record_len {
            return Err(self.invalid(format!(
                "fields cover {expected_offset} bytes of a {}-byte record",
                self.record_len
            )));
        }

        Ok(())
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn invalid(&self, message: String) -> LoadError {
        LoadError::Schema {
            schema: self.name,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_schemas_are_valid() {
        COMPACT.validate().unwrap();
        EXTENDED.validate().unwrap();
    }

    #[test]
    fn extended_is_compact_plus_demographics() {
        assert_eq!(&EXTENDED.fields[..COMPACT.fields.len()], COMPACT.fields);
        assert_eq!(EXTENDED.field("female_ages").unwrap().end(), 153);
        assert!(COMPACT.field("male_population").is_none());
    }

    #[test]
    fn gap_between_fields_is_rejected() {
        let schema = RecordSchema {
            name: "gappy",
            record_len: 14,
            fields: &[ID, LAT],
        };
        let err = schema.validate().unwrap_err();
        assert!(matches!(err, LoadError::Schema { schema: "gappy", .. }));
    }

    #[test]
    fn rule_width_mismatch_is_rejected() {
        const BAD: FieldSpec = FieldSpec::new("population", 9, 2, DecodeRule::I32Le);
        let schema = RecordSchema {
            name: "narrow",
            record_len: 11,
            fields: &[ID, BAD],
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn short_record_length_is_rejected() {
        let schema = RecordSchema {
            name: "short",
            record_len: 60,
            fields: COMPACT.fields,
        };
        assert!(schema.validate().is_err());
    }
}
