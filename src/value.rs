//! Runtime values.
//!
//! Every evaluation produces one of these tagged variants. Keeping the
//! sum explicit lets coercion and operator dispatch be checked
//! exhaustively instead of through downcasts.

use std::fmt;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::{Error, EvalResult};

// =====================================================================
// Colors
// =====================================================================

/// An RGBA color with channels stored in the 0.0..=1.0 range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Color {
    pub fn rgb(r: f64, g: f64, b: f64) -> Color {
        Color { r, g, b, a: 1.0 }
    }

    pub fn rgba(r: f64, g: f64, b: f64, a: f64) -> Color {
        Color { r, g, b, a }
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` hex notation.
    pub fn from_hex(text: &str) -> Option<Color> {
        let hex = text.strip_prefix('#')?;
        let channel = |s: &str| u8::from_str_radix(s, 16).ok().map(|v| v as f64 / 255.0);
        match hex.len() {
            3 => {
                let mut it = hex.chars();
                let (r, g, b) = (it.next()?, it.next()?, it.next()?);
                let expand = |c: char| channel(&format!("{c}{c}"));
                Some(Color::rgb(expand(r)?, expand(g)?, expand(b)?))
            }
            6 => Some(Color::rgb(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            8 => Some(Color::rgba(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
                channel(&hex[6..8])?,
            )),
            _ => None,
        }
    }

    /// Lower-case `#rrggbb` form, with an alpha pair appended when the
    /// color is not fully opaque.
    pub fn to_hex(&self) -> String {
        let q = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        if (self.a - 1.0).abs() < f64::EPSILON {
            format!("#{:02x}{:02x}{:02x}", q(self.r), q(self.g), q(self.b))
        } else {
            format!(
                "#{:02x}{:02x}{:02x}{:02x}",
                q(self.r),
                q(self.g),
                q(self.b),
                q(self.a)
            )
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// =====================================================================
// Values
// =====================================================================

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The absent value: open slice bounds, null-coalescing probes.
    #[default]
    Empty,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point.
    Float(f64),
    /// Non-negative floating point.
    UFloat(f64),
    /// Text.
    Str(String),
    /// RGBA color.
    Color(Color),
    /// A symbol drawn from some enumeration; the data is its name.
    Enum(String),
    /// Homogeneous, variable-length sequence.
    Array(Vec<Value>),
    /// Homogeneous, fixed-length sequence.
    Tuple(Vec<Value>),
}

impl Value {
    /// Human-readable name of the variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Empty => "empty",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::UFloat(_) => "ufloat",
            Value::Str(_) => "string",
            Value::Color(_) => "color",
            Value::Enum(_) => "enum",
            Value::Array(_) => "array",
            Value::Tuple(_) => "tuple",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int(_) | Value::UInt(_) | Value::Float(_) | Value::UFloat(_)
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, Value::Int(_) | Value::UInt(_))
    }

    pub fn as_bool(&self) -> EvalResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::calculation(format!(
                "expected bool, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_f64(&self) -> EvalResult<f64> {
        match self {
            Value::Int(v) => Ok(*v as f64),
            Value::UInt(v) => Ok(*v as f64),
            Value::Float(v) | Value::UFloat(v) => Ok(*v),
            other => Err(Error::calculation(format!(
                "expected a number, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_i64(&self) -> EvalResult<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::UInt(v) => i64::try_from(*v)
                .map_err(|_| Error::calculation(format!("integer {} is out of range", v))),
            other => Err(Error::calculation(format!(
                "expected an integer, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_str(&self) -> EvalResult<&str> {
        match self {
            Value::Str(s) | Value::Enum(s) => Ok(s),
            other => Err(Error::calculation(format!(
                "expected a string, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_color(&self) -> EvalResult<Color> {
        match self {
            Value::Color(c) => Ok(*c),
            other => Err(Error::calculation(format!(
                "expected a color, found {}",
                other.kind_name()
            ))),
        }
    }

    /// Sequence items of an array or tuple.
    pub fn items(&self) -> EvalResult<&[Value]> {
        match self {
            Value::Array(items) | Value::Tuple(items) => Ok(items),
            other => Err(Error::calculation(format!(
                "expected an array or tuple, found {}",
                other.kind_name()
            ))),
        }
    }

    /// Render the value as expression source text. Constant trees print
    /// through this so that the result parses back to the same value;
    /// `Empty` has no literal form and renders as a bare `empty`.
    pub fn to_source(&self) -> String {
        match self {
            Value::Empty => "empty".to_string(),
            Value::Str(s) => quote(s),
            Value::Enum(s) => quote(s),
            Value::Color(c) => format!("color(\"{}\")", c.to_hex()),
            Value::Array(items) => {
                let inner: Vec<String> = items.iter().map(Value::to_source).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(Value::to_source).collect();
                format!("{{{}}}", inner.join(", "))
            }
            other => other.to_string(),
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Print a float so that it re-parses as a float: a trailing `.0` is kept
/// on round values.
fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) | Value::UFloat(v) => f.write_str(&format_float(*v)),
            Value::Str(s) | Value::Enum(s) => f.write_str(s),
            Value::Color(c) => write!(f, "{}", c),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Tuple(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Empty => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::UInt(v) => serializer.serialize_u64(*v),
            Value::Float(v) | Value::UFloat(v) => serializer.serialize_f64(*v),
            Value::Str(s) | Value::Enum(s) => serializer.serialize_str(s),
            Value::Color(c) => serializer.serialize_str(&c.to_hex()),
            Value::Array(items) | Value::Tuple(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("null, a bool, a number, a string or an array")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Empty)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Empty)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::UInt(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        if v.starts_with('#') {
            if let Some(color) = Color::from_hex(v) {
                return Ok(Value::Color(color));
            }
        }
        Ok(Value::Str(v.to_string()))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_hex_round_trip() {
        let c = Color::from_hex("#3366ff").unwrap();
        assert_eq!(c.to_hex(), "#3366ff");
        let short = Color::from_hex("#f0a").unwrap();
        assert_eq!(short.to_hex(), "#ff00aa");
        let alpha = Color::from_hex("#10203040").unwrap();
        assert_eq!(alpha.to_hex(), "#10203040");
        assert!(Color::from_hex("#12").is_none());
        assert!(Color::from_hex("3366ff").is_none());
    }

    #[test]
    fn test_display_keeps_float_dot() {
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Int(-3).to_string(), "-3");
    }

    #[test]
    fn test_to_source_quotes_strings() {
        assert_eq!(Value::Str("a\"b".into()).to_source(), "\"a\\\"b\"");
        assert_eq!(
            Value::Array(vec![Value::UInt(1), Value::UInt(2)]).to_source(),
            "[1, 2]"
        );
        assert_eq!(
            Value::Tuple(vec![Value::Float(1.0), Value::Float(2.5)]).to_source(),
            "{1.0, 2.5}"
        );
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::UInt(3).as_i64().unwrap(), 3);
        assert_eq!(Value::Int(-2).as_f64().unwrap(), -2.0);
        assert_eq!(Value::Enum("left".into()).as_str().unwrap(), "left");
        assert!(Value::Str("x".into()).as_bool().is_err());
        assert!(Value::UInt(u64::MAX).as_i64().is_err());
    }

    #[test]
    fn test_serde_json_values() {
        let v: Value = serde_json::from_str("[1, -2, 2.5, true, \"x\"]").unwrap();
        assert_eq!(
            v,
            Value::Array(vec![
                Value::UInt(1),
                Value::Int(-2),
                Value::Float(2.5),
                Value::Bool(true),
                Value::Str("x".into()),
            ])
        );
        let c: Value = serde_json::from_str("\"#ff0000\"").unwrap();
        assert_eq!(c, Value::Color(Color::rgb(1.0, 0.0, 0.0)));
    }
}
