//! Schema-directed value codec.
//!
//! A [`Schema`] describes the shape of a value — the same closed set of
//! shapes the engine uses both for typed user values and for snapshotting a
//! whole database (the database module encodes its own page/database
//! records through this module). [`Value`] is the runtime, dynamically-typed
//! counterpart: the thing you actually hold in memory and pass to
//! [`encode`]/[`decode`].
//!
//! The wire format is fixed and implementation-independent: little-endian
//! scalars, 8-byte length-prefixed sequences, fields concatenated in
//! declaration order. One recursive function driven by a schema value
//! handles every shape, rather than one encoder per concrete Rust type,
//! since the schema set (fixed arrays, variable sequences, records) is
//! closed and known up front.
//!
//! Rust's ownership model frees decoded [`Value`]s automatically on drop;
//! there is no separate "release" step to call.

use crate::error::{ShimmerError, ShimmerResult};

/// The closed set of shapes a [`Value`] can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    Void,
    Bool,
    /// Unsigned integer of the given bit width (8, 16, 32, 64, or 128).
    /// A host `usize` is always widened to `UInt(64)`.
    UInt(u8),
    /// Signed integer of the given bit width.
    Int(u8),
    /// IEEE-754-shaped bit pattern of the given width (16, 32, 64, 80, or
    /// 128). Only 32 and 64 round-trip through native Rust floats; the
    /// others are carried as raw bits.
    Float(u8),
    /// A fixed number of consecutive encodings of the element schema.
    Array(Box<Schema>, usize),
    /// An 8-byte length followed by that many encodings of the element
    /// schema. A `Seq(UInt(8))` is the byte-blob case and is represented by
    /// [`Value::Bytes`] rather than a `Vec` of a million `Value::UInt(_)`.
    Seq(Box<Schema>),
    /// Named fields, encoded in declaration order.
    Record(Vec<(String, Schema)>),
    /// A single-owner reference to the inner schema; encodes as the
    /// referent with no extra framing.
    Ref(Box<Schema>),
    /// Rejected at encode/decode time with `InvalidDataType` — modeled so a
    /// caller reflecting off a host type system that has these shapes gets
    /// a typed error instead of nothing to map to.
    ManyPointer(Box<Schema>),
    CString,
    Union(Vec<Schema>),
}

/// A runtime value matching some [`Schema`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    UInt(u128),
    Int(i128),
    /// Raw bit pattern of a float, width carried by the schema at
    /// encode/decode time.
    FloatBits(u128),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Seq(Vec<Value>),
    Record(Vec<(String, Value)>),
    Ref(Box<Value>),
}

impl Value {
    pub fn from_bool(v: bool) -> Self {
        Value::Bool(v)
    }

    pub fn from_u32(v: u32) -> Self {
        Value::UInt(v as u128)
    }

    pub fn from_u64(v: u64) -> Self {
        Value::UInt(v as u128)
    }

    pub fn from_i32(v: i32) -> Self {
        Value::Int(v as i128)
    }

    pub fn from_i64(v: i64) -> Self {
        Value::Int(v as i128)
    }

    pub fn from_f32(v: f32) -> Self {
        Value::FloatBits(v.to_bits() as u128)
    }

    pub fn from_f64(v: f64) -> Self {
        Value::FloatBits(v.to_bits() as u128)
    }

    pub fn from_bytes(v: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(v.into())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::FloatBits(bits) => Some(f32::from_bits(*bits as u32)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::FloatBits(bits) => Some(f64::from_bits(*bits as u64)),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

fn uint_byte_width(bits: u8) -> ShimmerResult<usize> {
    match bits {
        8 | 16 | 32 | 64 | 128 => Ok(bits as usize / 8),
        _ => Err(ShimmerError::InvalidDataType {
            schema: format!("UInt({})", bits),
            reason: "unsupported integer width".to_string(),
        }),
    }
}

fn float_byte_width(bits: u8) -> ShimmerResult<usize> {
    match bits {
        16 | 32 | 64 | 80 | 128 => Ok(bits as usize / 8),
        _ => Err(ShimmerError::InvalidDataType {
            schema: format!("Float({})", bits),
            reason: "unsupported float width".to_string(),
        }),
    }
}

/// Encode `value` according to `schema` into its wire representation.
pub fn encode(schema: &Schema, value: &Value) -> ShimmerResult<Vec<u8>> {
    let mut buf = Vec::new();
    encode_into(schema, value, &mut buf)?;
    Ok(buf)
}

fn encode_into(schema: &Schema, value: &Value, buf: &mut Vec<u8>) -> ShimmerResult<()> {
    match (schema, value) {
        (Schema::Void, Value::Void) => Ok(()),
        (Schema::Bool, Value::Bool(v)) => {
            buf.push(if *v { 1 } else { 0 });
            Ok(())
        }
        (Schema::UInt(bits), Value::UInt(v)) => {
            let width = uint_byte_width(*bits)?;
            buf.extend_from_slice(&v.to_le_bytes()[..width]);
            Ok(())
        }
        (Schema::Int(bits), Value::Int(v)) => {
            let width = uint_byte_width(*bits)?;
            buf.extend_from_slice(&v.to_le_bytes()[..width]);
            Ok(())
        }
        (Schema::Float(bits), Value::FloatBits(v)) => {
            let width = float_byte_width(*bits)?;
            buf.extend_from_slice(&v.to_le_bytes()[..width]);
            Ok(())
        }
        (Schema::Array(elem, n), Value::Array(items)) => {
            if items.len() != *n {
                return Err(ShimmerError::InvalidSize {
                    expected: *n,
                    actual: items.len(),
                });
            }
            for item in items {
                encode_into(elem, item, buf)?;
            }
            Ok(())
        }
        (Schema::Seq(elem), Value::Bytes(bytes)) if **elem == Schema::UInt(8) => {
            buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
            buf.extend_from_slice(bytes);
            Ok(())
        }
        (Schema::Seq(elem), Value::Seq(items)) => {
            buf.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for item in items {
                encode_into(elem, item, buf)?;
            }
            Ok(())
        }
        (Schema::Record(fields), Value::Record(values)) => {
            if fields.len() != values.len() {
                return Err(ShimmerError::InvalidSize {
                    expected: fields.len(),
                    actual: values.len(),
                });
            }
            for ((_, field_schema), (_, field_value)) in fields.iter().zip(values.iter()) {
                encode_into(field_schema, field_value, buf)?;
            }
            Ok(())
        }
        (Schema::Ref(inner), Value::Ref(v)) => encode_into(inner, v, buf),
        (Schema::ManyPointer(_), _) => Err(ShimmerError::InvalidDataType {
            schema: "ManyPointer".to_string(),
            reason: "many-pointers have no wire representation".to_string(),
        }),
        (Schema::CString, _) => Err(ShimmerError::InvalidDataType {
            schema: "CString".to_string(),
            reason: "C-style null-terminated pointers have no wire representation".to_string(),
        }),
        (Schema::Union(_), _) => Err(ShimmerError::InvalidDataType {
            schema: "Union".to_string(),
            reason: "unions have no wire representation".to_string(),
        }),
        (schema, _) => Err(ShimmerError::InvalidDataType {
            schema: format!("{:?}", schema),
            reason: "value does not match schema shape".to_string(),
        }),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> ShimmerResult<&'a [u8]> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(ShimmerError::InvalidSize {
                expected: end,
                actual: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Decode `bytes` according to `schema`, requiring the whole buffer to be
/// consumed.
pub fn decode(schema: &Schema, bytes: &[u8]) -> ShimmerResult<Value> {
    let mut reader = Reader::new(bytes);
    let value = decode_from(schema, &mut reader)?;
    if reader.remaining() != 0 {
        return Err(ShimmerError::InvalidSize {
            expected: reader.pos,
            actual: bytes.len(),
        });
    }
    Ok(value)
}

fn decode_from(schema: &Schema, reader: &mut Reader) -> ShimmerResult<Value> {
    match schema {
        Schema::Void => Ok(Value::Void),
        Schema::Bool => {
            let b = reader.take(1)?;
            Ok(Value::Bool(b[0] != 0))
        }
        Schema::UInt(bits) => {
            let width = uint_byte_width(*bits)?;
            let b = reader.take(width)?;
            let mut padded = [0u8; 16];
            padded[..width].copy_from_slice(b);
            Ok(Value::UInt(u128::from_le_bytes(padded)))
        }
        Schema::Int(bits) => {
            let width = uint_byte_width(*bits)?;
            let b = reader.take(width)?;
            let sign_extend = b[width - 1] & 0x80 != 0;
            let mut padded = [if sign_extend { 0xff } else { 0 }; 16];
            padded[..width].copy_from_slice(b);
            Ok(Value::Int(i128::from_le_bytes(padded)))
        }
        Schema::Float(bits) => {
            let width = float_byte_width(*bits)?;
            let b = reader.take(width)?;
            let mut padded = [0u8; 16];
            padded[..width].copy_from_slice(b);
            Ok(Value::FloatBits(u128::from_le_bytes(padded)))
        }
        Schema::Array(elem, n) => {
            let mut items = Vec::with_capacity(*n);
            for _ in 0..*n {
                items.push(decode_from(elem, reader)?);
            }
            Ok(Value::Array(items))
        }
        Schema::Seq(elem) if **elem == Schema::UInt(8) => {
            let len = decode_len(reader)?;
            let bytes = reader.take(len)?;
            Ok(Value::Bytes(bytes.to_vec()))
        }
        Schema::Seq(elem) => {
            let len = decode_len(reader)?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_from(elem, reader)?);
            }
            Ok(Value::Seq(items))
        }
        Schema::Record(fields) => {
            let mut values = Vec::with_capacity(fields.len());
            for (name, field_schema) in fields {
                values.push((name.clone(), decode_from(field_schema, reader)?));
            }
            Ok(Value::Record(values))
        }
        Schema::Ref(inner) => Ok(Value::Ref(Box::new(decode_from(inner, reader)?))),
        Schema::ManyPointer(_) => Err(ShimmerError::InvalidDataType {
            schema: "ManyPointer".to_string(),
            reason: "many-pointers have no wire representation".to_string(),
        }),
        Schema::CString => Err(ShimmerError::InvalidDataType {
            schema: "CString".to_string(),
            reason: "C-style null-terminated pointers have no wire representation".to_string(),
        }),
        Schema::Union(_) => Err(ShimmerError::InvalidDataType {
            schema: "Union".to_string(),
            reason: "unions have no wire representation".to_string(),
        }),
    }
}

fn decode_len(reader: &mut Reader) -> ShimmerResult<usize> {
    let b = reader.take(8)?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(b);
    Ok(u64::from_le_bytes(arr) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalars() {
        let cases: Vec<(Schema, Value)> = vec![
            (Schema::Void, Value::Void),
            (Schema::Bool, Value::Bool(true)),
            (Schema::UInt(32), Value::from_u32(42)),
            (Schema::UInt(64), Value::from_u64(u64::MAX)),
            (Schema::Int(32), Value::from_i32(-7)),
            (Schema::Float(32), Value::from_f32(3.25)),
            (Schema::Float(64), Value::from_f64(3.14159)),
        ];
        for (schema, value) in cases {
            let bytes = encode(&schema, &value).unwrap();
            let decoded = decode(&schema, &bytes).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn uint_widths_are_little_endian() {
        let bytes = encode(&Schema::UInt(32), &Value::from_u32(1)).unwrap();
        assert_eq!(bytes, vec![1, 0, 0, 0]);
    }

    #[test]
    fn negative_int_round_trips() {
        let schema = Schema::Int(16);
        let value = Value::Int(-1);
        let bytes = encode(&schema, &value).unwrap();
        assert_eq!(bytes, vec![0xff, 0xff]);
        assert_eq!(decode(&schema, &bytes).unwrap(), value);
    }

    #[test]
    fn bytes_sequence_round_trips() {
        let schema = Schema::Seq(Box::new(Schema::UInt(8)));
        let value = Value::from_bytes(b"hello".to_vec());
        let bytes = encode(&schema, &value).unwrap();
        assert_eq!(&bytes[0..8], &5u64.to_le_bytes());
        assert_eq!(decode(&schema, &bytes).unwrap(), value);
    }

    #[test]
    fn fixed_array_round_trips() {
        let schema = Schema::Array(Box::new(Schema::UInt(32)), 3);
        let value = Value::Array(vec![
            Value::from_u32(1),
            Value::from_u32(2),
            Value::from_u32(3),
        ]);
        let bytes = encode(&schema, &value).unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode(&schema, &bytes).unwrap(), value);
    }

    #[test]
    fn array_wrong_length_is_rejected() {
        let schema = Schema::Array(Box::new(Schema::UInt(8)), 3);
        let value = Value::Array(vec![Value::from_u32(1)]);
        assert!(encode(&schema, &value).is_err());
    }

    #[test]
    fn record_fields_are_concatenated_in_order() {
        let schema = Schema::Record(vec![
            ("id".to_string(), Schema::UInt(32)),
            ("name".to_string(), Schema::Seq(Box::new(Schema::UInt(8)))),
        ]);
        let value = Value::Record(vec![
            ("id".to_string(), Value::from_u32(7)),
            ("name".to_string(), Value::from_bytes(b"abc".to_vec())),
        ]);
        let bytes = encode(&schema, &value).unwrap();
        assert_eq!(decode(&schema, &bytes).unwrap(), value);
    }

    #[test]
    fn decoding_with_wrong_schema_does_not_panic() {
        let bytes = encode(&Schema::UInt(32), &Value::from_u32(1)).unwrap();
        // Decoding 4 bytes as a 64-bit integer under-reads the buffer and
        // must fail cleanly, not corrupt memory or panic.
        let result = decode(&Schema::UInt(64), &bytes);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_many_pointer_and_union_shapes() {
        assert!(encode(
            &Schema::ManyPointer(Box::new(Schema::UInt(8))),
            &Value::Bytes(vec![])
        )
        .is_err());
        assert!(encode(&Schema::Union(vec![Schema::Bool]), &Value::Bool(true)).is_err());
        assert!(decode(&Schema::CString, &[0]).is_err());
    }
}
