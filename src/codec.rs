//! Record codecs.
//!
//! The journal is parameterized over a [`Codec`] so that correctness is
//! keyed on an in-code type rather than re-parsing a descriptor string on
//! every access; the descriptor is still persisted to `fmt` for
//! documentation and as a sanity check on reopen.
//!
//! [`Format`] is the one codec this crate ships: a struct-pack-style
//! dynamic schema, read off a short descriptor string such as `"iiLf"` or
//! `"dI"` (one character per fixed-width field).

use crate::error::{CorruptRecord, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// A fixed-width record codec.
///
/// Implementors own both the wire format and the comparison order of
/// `Record` (ordering is defined on the decoded tuple, per the journal's
/// "natural lexicographic ordering" contract — not on the encoded bytes).
pub trait Codec: Clone + Send + Sync + 'static {
    /// The decoded record type. Must be totally ordered: the journal is
    /// a sorted multiset, so incomparable records have no defined place.
    type Record: Ord + Clone + Send + Sync + std::fmt::Debug + 'static;

    /// Constant encoded size in bytes for any record under this codec.
    fn record_size(&self) -> usize;

    /// Encodes `record`, appending exactly `record_size()` bytes to `out`.
    fn encode(&self, record: &Self::Record, out: &mut Vec<u8>);

    /// Decodes exactly `record_size()` bytes into a record.
    ///
    /// # Errors
    /// Returns [`CorruptRecord::WrongLength`] if `bytes.len() !=
    /// record_size()`.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Record>;

    /// The descriptor string persisted to `fmt` at journal creation.
    fn descriptor(&self) -> String;

    /// Reconstructs a codec from a persisted descriptor string.
    ///
    /// # Errors
    /// Returns [`CorruptRecord::InvalidDescriptor`] if the string cannot
    /// be parsed.
    fn from_descriptor(descriptor: &str) -> Result<Self>
    where
        Self: Sized;
}

/// One scalar field kind recognized by [`Format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl Kind {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(Self::I32),
            'I' => Some(Self::U32),
            'l' => Some(Self::I64),
            'L' => Some(Self::U64),
            'f' => Some(Self::F32),
            'd' => Some(Self::F64),
            _ => None,
        }
    }

    fn to_char(self) -> char {
        match self {
            Self::I32 => 'i',
            Self::U32 => 'I',
            Self::I64 => 'l',
            Self::U64 => 'L',
            Self::F32 => 'f',
            Self::F64 => 'd',
        }
    }

    fn width(self) -> usize {
        match self {
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }
}

/// One decoded scalar value.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

// `Ord` compares floats via `total_cmp`, so `PartialEq`/`Eq` are defined
// in terms of it too rather than derived — derived `PartialEq` would use
// IEEE754 equality for floats, where `NaN != NaN` violates `Eq`'s
// reflexivity and disagrees with `Ord::cmp` reporting `Equal`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for Value {}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Value::I32(a), Value::I32(b)) => a.cmp(b),
            (Value::U32(a), Value::U32(b)) => a.cmp(b),
            (Value::I64(a), Value::I64(b)) => a.cmp(b),
            (Value::U64(a), Value::U64(b)) => a.cmp(b),
            (Value::F32(a), Value::F32(b)) => a.total_cmp(b),
            (Value::F64(a), Value::F64(b)) => a.total_cmp(b),
            // Records of a single journal all share one schema, so two
            // values at the same tuple position are always the same
            // variant; a mismatch here means the caller built a `Tuple`
            // by hand against the wrong `Format`.
            _ => panic!("comparing values of different kinds: {self:?} vs {other:?}"),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A decoded record under [`Format`]: an ordered tuple of [`Value`]s,
/// compared lexicographically field-by-field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tuple(pub Vec<Value>);

impl Tuple {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// A struct-pack-style dynamic schema: one character per field.
///
/// | char | type  | width |
/// |------|-------|-------|
/// | `i`  | i32   | 4     |
/// | `I`  | u32   | 4     |
/// | `l`  | i64   | 8     |
/// | `L`  | u64   | 8     |
/// | `f`  | f32   | 4     |
/// | `d`  | f64   | 8     |
#[derive(Debug, Clone)]
pub struct Format {
    fields: Vec<Kind>,
    size: usize,
}

impl Format {
    /// Parses a descriptor such as `"iiLf"` into a [`Format`].
    ///
    /// # Errors
    /// Returns [`CorruptRecord::InvalidDescriptor`] on any unrecognized
    /// character, or if `descriptor` is empty.
    pub fn parse(descriptor: &str) -> Result<Self> {
        if descriptor.is_empty() {
            return Err(CorruptRecord::InvalidDescriptor(descriptor.to_owned()).into());
        }

        let mut fields = Vec::with_capacity(descriptor.len());
        for c in descriptor.chars() {
            let kind = Kind::from_char(c)
                .ok_or_else(|| CorruptRecord::InvalidDescriptor(descriptor.to_owned()))?;
            fields.push(kind);
        }
        let size = fields.iter().map(|k| k.width()).sum();

        Ok(Self { fields, size })
    }
}

impl Codec for Format {
    type Record = Tuple;

    fn record_size(&self) -> usize {
        self.size
    }

    fn encode(&self, record: &Self::Record, out: &mut Vec<u8>) {
        debug_assert_eq!(record.0.len(), self.fields.len());
        for value in &record.0 {
            match *value {
                Value::I32(v) => out.write_i32::<LittleEndian>(v).expect("vec write"),
                Value::U32(v) => out.write_u32::<LittleEndian>(v).expect("vec write"),
                Value::I64(v) => out.write_i64::<LittleEndian>(v).expect("vec write"),
                Value::U64(v) => out.write_u64::<LittleEndian>(v).expect("vec write"),
                Value::F32(v) => out.write_f32::<LittleEndian>(v).expect("vec write"),
                Value::F64(v) => out.write_f64::<LittleEndian>(v).expect("vec write"),
            }
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Self::Record> {
        if bytes.len() != self.size {
            return Err(CorruptRecord::WrongLength {
                expected: self.size,
                got: bytes.len(),
            }
            .into());
        }

        let mut cursor = bytes;
        let mut values = Vec::with_capacity(self.fields.len());
        for kind in &self.fields {
            let value = match kind {
                Kind::I32 => Value::I32(cursor.read_i32::<LittleEndian>()?),
                Kind::U32 => Value::U32(cursor.read_u32::<LittleEndian>()?),
                Kind::I64 => Value::I64(cursor.read_i64::<LittleEndian>()?),
                Kind::U64 => Value::U64(cursor.read_u64::<LittleEndian>()?),
                Kind::F32 => Value::F32(cursor.read_f32::<LittleEndian>()?),
                Kind::F64 => Value::F64(cursor.read_f64::<LittleEndian>()?),
            };
            values.push(value);
        }

        Ok(Tuple(values))
    }

    fn descriptor(&self) -> String {
        self.fields.iter().map(|k| k.to_char()).collect()
    }

    fn from_descriptor(descriptor: &str) -> Result<Self> {
        Self::parse(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn roundtrip_iilf() -> Result<()> {
        let format = Format::parse("iiLf")?;
        assert_eq!(format.record_size(), 4 + 4 + 8 + 4);

        let record = Tuple::new(vec![
            Value::I32(2),
            Value::I32(3),
            Value::U64(5),
            Value::F32(-0.1),
        ]);

        let mut bytes = Vec::new();
        format.encode(&record, &mut bytes);
        assert_eq!(bytes.len(), format.record_size());

        let decoded = format.decode(&bytes)?;
        assert_eq!(decoded, record);

        Ok(())
    }

    #[test]
    fn decode_wrong_length_is_corrupt_record() {
        let format = Format::parse("i").unwrap();
        let err = format.decode(&[0, 0, 0]).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::CorruptRecord(CorruptRecord::WrongLength { expected: 4, got: 3 })
        ));
    }

    #[test]
    fn invalid_descriptor_rejected() {
        assert!(Format::parse("").is_err());
        assert!(Format::parse("z").is_err());
    }

    #[test]
    fn descriptor_roundtrips() -> Result<()> {
        for descriptor in ["i", "If", "dI", "iiLf"] {
            let format = Format::parse(descriptor)?;
            assert_eq!(format.descriptor(), descriptor);
        }
        Ok(())
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = Tuple::new(vec![Value::I32(1), Value::F32(0.0)]);
        let b = Tuple::new(vec![Value::I32(1), Value::F32(1.0)]);
        let c = Tuple::new(vec![Value::I32(2), Value::F32(-5.0)]);
        assert!(a < b);
        assert!(b < c);
    }
}
