//! Typed values and their wire representation in target memory.
//!
//! [`Value::to_bytes`] and [`ValueKind::decode`] are the single source of
//! truth for the size and encoding of every supported kind. Adding a kind
//! means adding one arm to each table.

use encoding_rs::SHIFT_JIS;
use strum::{Display, EnumString, IntoStaticStr};

/// Byte encoding used by the text value kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum TextEncoding {
    Utf8,
    Utf16,
    #[strum(serialize = "sjis")]
    ShiftJis,
}

impl TextEncoding {
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            // encoding_rs only decodes UTF-16, so encode by hand.
            TextEncoding::Utf16 => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            TextEncoding::ShiftJis => SHIFT_JIS.encode(text).0.into_owned(),
        }
    }

    /// Decode up to the first NUL terminator, lossily.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => {
                let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                String::from_utf8_lossy(&bytes[..len]).into_owned()
            }
            TextEncoding::Utf16 => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                let len = units.iter().position(|&u| u == 0).unwrap_or(units.len());
                String::from_utf16_lossy(&units[..len])
            }
            TextEncoding::ShiftJis => {
                let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                let (decoded, _, _) = SHIFT_JIS.decode(&bytes[..len]);
                decoded.into_owned()
            }
        }
    }
}

/// A typed value to write into (or read out of) target memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Text(String, TextEncoding),
    Bytes(Vec<u8>),
}

impl Value {
    /// Serialize to the target's native little-endian representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Value::Bool(v) => vec![u8::from(*v)],
            Value::Byte(v) => vec![*v],
            Value::Int16(v) => v.to_le_bytes().to_vec(),
            Value::Int32(v) => v.to_le_bytes().to_vec(),
            Value::Int64(v) => v.to_le_bytes().to_vec(),
            Value::Float(v) => v.to_le_bytes().to_vec(),
            Value::Double(v) => v.to_le_bytes().to_vec(),
            Value::Vec2(v) => v.iter().flat_map(|c| c.to_le_bytes()).collect(),
            Value::Vec3(v) => v.iter().flat_map(|c| c.to_le_bytes()).collect(),
            Value::Vec4(v) => v.iter().flat_map(|c| c.to_le_bytes()).collect(),
            Value::Text(s, encoding) => encoding.encode(s),
            Value::Bytes(b) => b.clone(),
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            Value::Text(..) | Value::Bytes(_) => self.to_bytes().len(),
            _ => self.kind().byte_len(),
        }
    }

    /// The kind describing this value's layout, suitable for reading it back.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Byte(_) => ValueKind::Byte,
            Value::Int16(_) => ValueKind::Int16,
            Value::Int32(_) => ValueKind::Int32,
            Value::Int64(_) => ValueKind::Int64,
            Value::Float(_) => ValueKind::Float,
            Value::Double(_) => ValueKind::Double,
            Value::Vec2(_) => ValueKind::Vec2,
            Value::Vec3(_) => ValueKind::Vec3,
            Value::Vec4(_) => ValueKind::Vec4,
            Value::Text(s, encoding) => ValueKind::Text {
                len: encoding.encode(s).len(),
                encoding: *encoding,
            },
            Value::Bytes(b) => ValueKind::Bytes { len: b.len() },
        }
    }
}

/// Layout of a value to read from target memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Byte,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Vec2,
    Vec3,
    Vec4,
    Text { len: usize, encoding: TextEncoding },
    Bytes { len: usize },
}

impl ValueKind {
    /// Number of bytes this kind occupies in target memory.
    pub fn byte_len(&self) -> usize {
        match self {
            ValueKind::Bool | ValueKind::Byte => 1,
            ValueKind::Int16 => 2,
            ValueKind::Int32 | ValueKind::Float => 4,
            ValueKind::Int64 | ValueKind::Double => 8,
            ValueKind::Vec2 => 8,
            ValueKind::Vec3 => 12,
            ValueKind::Vec4 => 16,
            ValueKind::Text { len, .. } | ValueKind::Bytes { len } => *len,
        }
    }

    /// Decode bytes read from target memory.
    ///
    /// `bytes` must hold at least [`ValueKind::byte_len`] bytes.
    pub fn decode(&self, bytes: &[u8]) -> Value {
        fn f32_at(bytes: &[u8], i: usize) -> f32 {
            f32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap())
        }

        match self {
            ValueKind::Bool => Value::Bool(bytes[0] != 0),
            ValueKind::Byte => Value::Byte(bytes[0]),
            ValueKind::Int16 => Value::Int16(i16::from_le_bytes(bytes[..2].try_into().unwrap())),
            ValueKind::Int32 => Value::Int32(i32::from_le_bytes(bytes[..4].try_into().unwrap())),
            ValueKind::Int64 => Value::Int64(i64::from_le_bytes(bytes[..8].try_into().unwrap())),
            ValueKind::Float => Value::Float(f32::from_le_bytes(bytes[..4].try_into().unwrap())),
            ValueKind::Double => Value::Double(f64::from_le_bytes(bytes[..8].try_into().unwrap())),
            ValueKind::Vec2 => Value::Vec2([f32_at(bytes, 0), f32_at(bytes, 1)]),
            ValueKind::Vec3 => Value::Vec3([f32_at(bytes, 0), f32_at(bytes, 1), f32_at(bytes, 2)]),
            ValueKind::Vec4 => Value::Vec4([
                f32_at(bytes, 0),
                f32_at(bytes, 1),
                f32_at(bytes, 2),
                f32_at(bytes, 3),
            ]),
            ValueKind::Text { len, encoding } => {
                Value::Text(encoding.decode(&bytes[..*len]), *encoding)
            }
            ValueKind::Bytes { len } => Value::Bytes(bytes[..*len].to_vec()),
        }
    }
}
