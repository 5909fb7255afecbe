//! CLI command implementations.
//!
//! Shared argument parsing (typed values, hex strings) lives here; each
//! command is one module with a `run` function generic over the target.

pub mod detour_calc;
pub mod dump;
pub mod freeze;
pub mod read;
pub mod resolve;
pub mod write;

use anyhow::{Context, Result, bail};
use memkit_core::{TextEncoding, Value, ValueKind};

/// Parse a `--kind` argument into a layout.
///
/// `text` and `bytes` need an explicit `--len`; the encoding only applies to
/// `text`.
pub fn parse_kind(kind: &str, len: Option<usize>, encoding: TextEncoding) -> Result<ValueKind> {
    let kind = match kind.to_ascii_lowercase().as_str() {
        "bool" => ValueKind::Bool,
        "byte" => ValueKind::Byte,
        "int16" => ValueKind::Int16,
        "int32" => ValueKind::Int32,
        "int64" => ValueKind::Int64,
        "float" => ValueKind::Float,
        "double" => ValueKind::Double,
        "vec2" => ValueKind::Vec2,
        "vec3" => ValueKind::Vec3,
        "vec4" => ValueKind::Vec4,
        "text" => ValueKind::Text {
            len: len.context("--len is required for text")?,
            encoding,
        },
        "bytes" => ValueKind::Bytes {
            len: len.context("--len is required for bytes")?,
        },
        other => bail!("unknown value kind {other:?}"),
    };
    Ok(kind)
}

/// Parse a raw CLI string into a value of the given kind. Integers accept a
/// `0x` prefix, vectors are comma-separated floats, bytes are a hex string.
pub fn parse_value(kind: &ValueKind, raw: &str) -> Result<Value> {
    let value = match kind {
        ValueKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            other => bail!("expected a boolean, got {other:?}"),
        },
        ValueKind::Byte => Value::Byte(parse_int(raw)? as u8),
        ValueKind::Int16 => Value::Int16(parse_int(raw)? as i16),
        ValueKind::Int32 => Value::Int32(parse_int(raw)? as i32),
        ValueKind::Int64 => Value::Int64(parse_int(raw)?),
        ValueKind::Float => Value::Float(raw.parse().context("expected a float")?),
        ValueKind::Double => Value::Double(raw.parse().context("expected a double")?),
        ValueKind::Vec2 => Value::Vec2(parse_floats::<2>(raw)?),
        ValueKind::Vec3 => Value::Vec3(parse_floats::<3>(raw)?),
        ValueKind::Vec4 => Value::Vec4(parse_floats::<4>(raw)?),
        ValueKind::Text { encoding, .. } => Value::Text(raw.to_string(), *encoding),
        ValueKind::Bytes { .. } => Value::Bytes(parse_hex_bytes(raw)?),
    };
    Ok(value)
}

fn parse_int(raw: &str) -> Result<i64> {
    let (negative, raw) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let value = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => raw.parse(),
    }
    .with_context(|| format!("expected an integer, got {raw:?}"))?;
    Ok(if negative { -value } else { value })
}

fn parse_floats<const N: usize>(raw: &str) -> Result<[f32; N]> {
    let parts: Vec<f32> = raw
        .split(',')
        .map(|p| p.trim().parse().context("expected a float component"))
        .collect::<Result<_>>()?;
    parts
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected {N} comma-separated components"))
}

/// Parse a hex byte string, with or without spaces: `"E9 00 10"` or `"e90010"`.
pub fn parse_hex_bytes(raw: &str) -> Result<Vec<u8>> {
    let digits: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        bail!("hex string has an odd number of digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte {:?}", &digits[i..i + 2]))
        })
        .collect()
}

/// Hex address argument, with or without a `0x` prefix.
pub fn parse_hex_addr(raw: &str) -> std::result::Result<u64, String> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex address {raw:?}: {e}"))
}

/// Render a value for terminal output.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Bool(v) => v.to_string(),
        Value::Byte(v) => format!("{v} ({v:#04x})"),
        Value::Int16(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Vec2(v) => format_floats(v),
        Value::Vec3(v) => format_floats(v),
        Value::Vec4(v) => format_floats(v),
        Value::Text(s, _) => s.clone(),
        Value::Bytes(b) => b
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn format_floats(components: &[f32]) -> String {
    components
        .iter()
        .map(f32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
