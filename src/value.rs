//! Tag value type and storage codec.
//!
//! Controllers expose tags of varying native kinds. [`TagValue`] is the
//! closed set the rest of the pipeline works with, and [`encode`] /
//! [`decode`] convert between native values and the JSON form persisted in
//! the `tag_value` column.
//!
//! Primitive values are wrapped as `{"value": ..., "type": "..."}` so the
//! original kind survives storage; structured (mapping/sequence) values pass
//! through unchanged, without per-field type tags.

use serde_json::{Value as Json, json};
use strum_macros::{AsRefStr, Display, EnumString};

/// Kind tag recorded alongside primitive values in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ValueKind {
    Integer,
    Float,
    Boolean,
    String,
    Null,
    Structured,
}

/// A tag value as read from (or written to) a device.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Null,
    /// Mapping or sequence value (UDTs, arrays). Stored as-is.
    Structured(Json),
}

impl TagValue {
    /// The kind tag used for this value in storage.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Integer(_) => ValueKind::Integer,
            Self::Float(_) => ValueKind::Float,
            Self::Bool(_) => ValueKind::Boolean,
            Self::Text(_) => ValueKind::String,
            Self::Null => ValueKind::Null,
            Self::Structured(_) => ValueKind::Structured,
        }
    }

    /// Convert plain JSON into the closest tag value.
    ///
    /// Whole numbers become integers, other numbers floats; objects and
    /// arrays become structured values.
    pub fn from_json(value: Json) -> Self {
        match value {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Self::Text(s),
            v @ (Json::Array(_) | Json::Object(_)) => Self::Structured(v),
        }
    }

    /// Plain (untagged) JSON form, used by the status API.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Integer(i) => json!(i),
            Self::Float(f) => json!(f),
            Self::Bool(b) => json!(b),
            Self::Text(s) => json!(s),
            Self::Null => Json::Null,
            Self::Structured(v) => v.clone(),
        }
    }
}

impl serde::Serialize for TagValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Encode a tag value into its storage form.
///
/// Structured values pass through unchanged; everything else (null
/// included) is wrapped with its kind tag.
pub fn encode(value: &TagValue) -> Json {
    match value {
        TagValue::Structured(v) => v.clone(),
        other => json!({
            "value": other.to_json(),
            "type": other.kind().as_ref(),
        }),
    }
}

/// Decode a storage-form value back to a tag value.
///
/// Inputs carrying both `value` and `type` fields are coerced back to the
/// named primitive kind; unknown kinds fall back to the inner value as-is.
/// Anything else is returned unchanged (the structured pass-through case).
pub fn decode(stored: Json) -> TagValue {
    let tagged = match &stored {
        Json::Object(map) => match (map.get("value"), map.get("type").and_then(Json::as_str)) {
            (Some(value), Some(kind)) => Some((value.clone(), kind.to_string())),
            _ => None,
        },
        _ => None,
    };

    let Some((value, kind)) = tagged else {
        return TagValue::from_json(stored);
    };

    match kind.parse::<ValueKind>() {
        Ok(ValueKind::Integer) => match coerce_integer(&value) {
            Some(i) => TagValue::Integer(i),
            None => TagValue::from_json(value),
        },
        Ok(ValueKind::Float) => match coerce_float(&value) {
            Some(f) => TagValue::Float(f),
            None => TagValue::from_json(value),
        },
        Ok(ValueKind::Boolean) => match value.as_bool() {
            Some(b) => TagValue::Bool(b),
            None => TagValue::from_json(value),
        },
        Ok(ValueKind::String) => match value {
            Json::String(s) => TagValue::Text(s),
            other => TagValue::from_json(other),
        },
        Ok(ValueKind::Null) => TagValue::Null,
        _ => TagValue::from_json(value),
    }
}

fn coerce_integer(value: &Json) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn coerce_float(value: &Json) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}
