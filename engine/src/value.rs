//! Scalar cell values and their compact textual encoding.
//!
//! Every value carries a two-character tag:
//!
//! | Variant | Encoding        |
//! |---------|-----------------|
//! | Null    | `0:`            |
//! | Number  | `N:` + decimal  |
//! | Text    | `S:` + raw text |
//!
//! Text is not escaped. The tag is only ever read once, so the payload may
//! itself contain `:` or look like another tag.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use std::fmt;

const NULL_TAG: &str = "0:";
const NUMBER_TAG: &str = "N:";
const TEXT_TAG: &str = "S:";

/// A scalar stored in one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Number(f64),
    Text(String),
}

impl Value {
    /// Encode to the tagged textual form.
    pub fn encode(&self) -> String {
        match self {
            Value::Null => NULL_TAG.to_string(),
            Value::Number(n) => format!("{NUMBER_TAG}{n}"),
            Value::Text(s) => {
                let mut out = String::with_capacity(TEXT_TAG.len() + s.len());
                out.push_str(TEXT_TAG);
                out.push_str(s);
                out
            }
        }
    }

    /// Decode from the tagged textual form.
    pub fn decode(encoded: &str) -> Result<Self> {
        if encoded == NULL_TAG {
            return Ok(Value::Null);
        }
        if let Some(rest) = encoded.strip_prefix(NUMBER_TAG) {
            return rest
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| Error::MalformedValue(format!("bad number payload '{rest}'")));
        }
        if let Some(rest) = encoded.strip_prefix(TEXT_TAG) {
            return Ok(Value::Text(rest.to_string()));
        }
        if encoded.starts_with(NULL_TAG) {
            return Err(Error::MalformedValue("null tag carries a payload".into()));
        }

        let tag: String = encoded.chars().take(2).collect();
        Err(Error::MalformedValue(format!("unrecognized tag '{tag}'")))
    }

    /// Name of the variant, used in type mismatch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Number(_) => "Number",
            Value::Text(_) => "Text",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Number(if b { 1.0 } else { 0.0 })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
