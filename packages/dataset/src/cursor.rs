//! Length-checked field access over a single fixed-width record.

use crate::LoadError;
use crate::schema::{DecodeRule, FieldSpec};

/// Reads typed fields out of one record's bytes.
///
/// Every read is bounds-checked against the record buffer and the field's
/// declared rule; nothing is ever read past the end of the buffer.
pub struct RecordCursor<'a> {
    bytes: &'a [u8],
    index: usize,
}

impl<'a> RecordCursor<'a> {
    /// `index` is the record's position in the file, used in errors.
    #[must_use]
    pub const fn new(bytes: &'a [u8], index: usize) -> Self {
        Self { bytes, index }
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    fn slice(&self, field: &FieldSpec, rule: DecodeRule) -> Result<&'a [u8], LoadError> {
        if field.rule != rule {
            return Err(self.malformed(format!(
                "field `{}` is declared {:?}, read as {rule:?}",
                field.name, field.rule
            )));
        }

        field
            .offset
            .checked_add(field.width)
            .and_then(|end| self.bytes.get(field.offset..end))
            .ok_or(LoadError::OutOfBounds {
                index: self.index,
                field: field.name,
                offset: field.offset,
                width: field.width,
                len: self.bytes.len(),
            })
    }

    fn fixed<const N: usize>(&self, field: &FieldSpec, rule: DecodeRule) -> Result<[u8; N], LoadError> {
        let bytes = self.slice(field, rule)?;
        bytes.try_into().map_err(|_| {
            self.malformed(format!(
                "field `{}` is {} bytes, expected {N}",
                field.name,
                bytes.len()
            ))
        })
    }

    /// Reads an ASCII field with trailing spaces and NULs removed.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Malformed`] if the bytes are not ASCII.
    pub fn ascii(&self, field: &FieldSpec) -> Result<&'a str, LoadError> {
        let bytes = self.slice(field, DecodeRule::Ascii)?;
        if !bytes.is_ascii() {
            return Err(self.malformed(format!("field `{}` is not ASCII", field.name)));
        }
        let end = bytes
            .iter()
            .rposition(|b| *b != b' ' && *b != 0)
            .map_or(0, |i| i + 1);
        std::str::from_utf8(&bytes[..end])
            .map_err(|e| self.malformed(format!("field `{}`: {e}", field.name)))
    }

    /// # Errors
    ///
    /// Returns an error if the field is out of bounds or not an `i16`.
    pub fn i16(&self, field: &FieldSpec) -> Result<i16, LoadError> {
        Ok(i16::from_le_bytes(self.fixed(field, DecodeRule::I16Le)?))
    }

    /// # Errors
    ///
    /// Returns an error if the field is out of bounds or not an `i32`.
    pub fn i32(&self, field: &FieldSpec) -> Result<i32, LoadError> {
        Ok(i32::from_le_bytes(self.fixed(field, DecodeRule::I32Le)?))
    }

    /// # Errors
    ///
    /// Returns an error if the field is out of bounds or not an `i64`.
    pub fn i64(&self, field: &FieldSpec) -> Result<i64, LoadError> {
        Ok(i64::from_le_bytes(self.fixed(field, DecodeRule::I64Le)?))
    }

    /// # Errors
    ///
    /// Returns an error if the field is out of bounds or not an `f64`.
    pub fn f64(&self, field: &FieldSpec) -> Result<f64, LoadError> {
        Ok(f64::from_le_bytes(self.fixed(field, DecodeRule::F64Le)?))
    }

    /// Reads `N` consecutive little-endian `i16` values.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is out of bounds or does not hold
    /// exactly `N` values.
    pub fn i16_array<const N: usize>(&self, field: &FieldSpec) -> Result<[i16; N], LoadError> {
        let bytes = self.slice(field, DecodeRule::I16LeArray(N))?;
        if bytes.len() != 2 * N {
            return Err(self.malformed(format!(
                "field `{}` is {} bytes, expected {}",
                field.name,
                bytes.len(),
                2 * N
            )));
        }

        let mut values = [0i16; N];
        for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(2)) {
            *value = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Ok(values)
    }

    /// Builds a [`LoadError::Malformed`] for this record.
    #[must_use]
    pub fn malformed(&self, message: String) -> LoadError {
        LoadError::Malformed {
            index: self.index,
            message,
        }
    }
}

/// Writes typed fields into one record's bytes. The counterpart of
/// [`RecordCursor`], used by the layout encoders.
pub struct RecordWriter<'a> {
    bytes: &'a mut [u8],
}

impl<'a> RecordWriter<'a> {
    pub const fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    fn put(&mut self, field: &FieldSpec, value: &[u8]) -> Result<(), String> {
        let len = self.bytes.len();
        let target = field
            .offset
            .checked_add(field.width)
            .and_then(|end| self.bytes.get_mut(field.offset..end))
            .ok_or_else(|| format!("field `{}` exceeds the {len}-byte record", field.name))?;
        if value.len() > target.len() {
            return Err(format!(
                "field `{}` holds {} bytes, got {}",
                field.name,
                target.len(),
                value.len()
            ));
        }
        target[..value.len()].copy_from_slice(value);
        target[value.len()..].fill(b' ');
        Ok(())
    }

    /// Writes ASCII text, padding with spaces.
    ///
    /// # Errors
    ///
    /// Returns a message if the text is not ASCII or is too long.
    pub fn ascii(&mut self, field: &FieldSpec, value: &str) -> Result<(), String> {
        if !value.is_ascii() {
            return Err(format!("field `{}` must be ASCII", field.name));
        }
        self.put(field, value.as_bytes())
    }

    /// # Errors
    ///
    /// Returns a message if the field does not fit the record.
    pub fn i16(&mut self, field: &FieldSpec, value: i16) -> Result<(), String> {
        self.put(field, &value.to_le_bytes())
    }

    /// # Errors
    ///
    /// Returns a message if the field does not fit the record.
    pub fn i32(&mut self, field: &FieldSpec, value: i32) -> Result<(), String> {
        self.put(field, &value.to_le_bytes())
    }

    /// # Errors
    ///
    /// Returns a message if the field does not fit the record.
    pub fn i64(&mut self, field: &FieldSpec, value: i64) -> Result<(), String> {
        self.put(field, &value.to_le_bytes())
    }

    /// # Errors
    ///
    /// Returns a message if the field does not fit the record.
    pub fn f64(&mut self, field: &FieldSpec, value: f64) -> Result<(), String> {
        self.put(field, &value.to_le_bytes())
    }

    /// # Errors
    ///
    /// Returns a message if the field does not fit the record.
    pub fn i16_array(&mut self, field: &FieldSpec, values: &[i16]) -> Result<(), String> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.put(field, &bytes)
    }
}
