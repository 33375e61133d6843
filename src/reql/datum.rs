//! Datum - the driver's native value model.
//!
//! A `Datum` is what a caller hands to the query builder and what a query
//! result decodes into. It is JSON-like, plus native forms for the wire's
//! pseudo-types:
//!
//! - **Null**, **Boolean**, **Number** (f64), **String**
//! - **Array**: ordered list of datums
//! - **Object**: string-keyed map
//! - **Time**: a `TIME` pseudo-type, kept with its original UTC offset
//! - **Binary**: a `BINARY` pseudo-type (base64 on the wire)
//! - **Grouped**: a `GROUPED_DATA` pseudo-type, `(group, reduction)` pairs
//!
//! Conversions to and from `serde_json::Value` live here; the pseudo-type
//! aware decoding lives in [`super::codec`].
//!
//! # Example
//!
//! ```rust,ignore
//! use reql_driver::reql::Datum;
//! use std::collections::BTreeMap;
//!
//! let mut obj = BTreeMap::new();
//! obj.insert("name".to_string(), Datum::from("Alice"));
//! obj.insert("age".to_string(), Datum::from(30));
//! let doc = Datum::Object(obj);
//! ```

use chrono::{DateTime, FixedOffset};
use std::collections::{BTreeMap, HashMap};

/// A value sent to or received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<Datum>),
    Object(BTreeMap<String, Datum>),
    Time(DateTime<FixedOffset>),
    Binary(Vec<u8>),
    Grouped(Vec<(Datum, Datum)>),
}

impl Datum {
    /// Check if datum is null
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Get as string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Datum::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&Vec<Datum>> {
        match self {
            Datum::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as object
    pub fn as_object(&self) -> Option<&BTreeMap<String, Datum>> {
        match self {
            Datum::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Datum::Time(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Datum::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_grouped(&self) -> Option<&[(Datum, Datum)]> {
        match self {
            Datum::Grouped(g) => Some(g),
            _ => None,
        }
    }

    /// Field lookup on an object datum.
    pub fn get(&self, key: &str) -> Option<&Datum> {
        self.as_object().and_then(|obj| obj.get(key))
    }

    /// Name of the value's kind, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Null => "NULL",
            Datum::Boolean(_) => "BOOL",
            Datum::Number(_) => "NUMBER",
            Datum::String(_) => "STRING",
            Datum::Array(_) => "ARRAY",
            Datum::Object(_) => "OBJECT",
            Datum::Time(_) => "PTYPE<TIME>",
            Datum::Binary(_) => "PTYPE<BINARY>",
            Datum::Grouped(_) => "GROUPED_DATA",
        }
    }
}

// Conversions
impl From<bool> for Datum {
    fn from(b: bool) -> Self {
        Datum::Boolean(b)
    }
}

impl From<i32> for Datum {
    fn from(n: i32) -> Self {
        Datum::Number(n as f64)
    }
}

impl From<i64> for Datum {
    fn from(n: i64) -> Self {
        Datum::Number(n as f64)
    }
}

impl From<u64> for Datum {
    fn from(n: u64) -> Self {
        Datum::Number(n as f64)
    }
}

impl From<f64> for Datum {
    fn from(n: f64) -> Self {
        Datum::Number(n)
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Self {
        Datum::String(s)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Datum::String(s.to_string())
    }
}

impl<T: Into<Datum>> From<Vec<T>> for Datum {
    fn from(items: Vec<T>) -> Self {
        Datum::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Datum>> From<BTreeMap<String, T>> for Datum {
    fn from(map: BTreeMap<String, T>) -> Self {
        Datum::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Datum>> From<HashMap<String, T>> for Datum {
    fn from(map: HashMap<String, T>) -> Self {
        Datum::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<DateTime<FixedOffset>> for Datum {
    fn from(t: DateTime<FixedOffset>) -> Self {
        Datum::Time(t)
    }
}

impl From<DateTime<chrono::Utc>> for Datum {
    fn from(t: DateTime<chrono::Utc>) -> Self {
        Datum::Time(t.fixed_offset())
    }
}

/// Plain structural conversion. Pseudo-type objects stay objects; use
/// [`super::codec::decode`] to turn them into native values.
impl From<serde_json::Value> for Datum {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Datum::Null,
            serde_json::Value::Bool(b) => Datum::Boolean(b),
            serde_json::Value::Number(n) => Datum::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Datum::String(s),
            serde_json::Value::Array(arr) => {
                Datum::Array(arr.into_iter().map(Datum::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Datum::Object(obj.into_iter().map(|(k, v)| (k, Datum::from(v))).collect())
            }
        }
    }
}

/// Encodes native pseudo-types back into their wire objects.
impl From<Datum> for serde_json::Value {
    fn from(datum: Datum) -> Self {
        super::codec::encode(&datum)
    }
}

impl std::fmt::Display for Datum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Datum::Null => write!(f, "null"),
            Datum::Boolean(b) => write!(f, "{}", b),
            Datum::Number(n) => write!(f, "{}", n),
            Datum::String(s) => write!(f, "{}", serde_json::Value::String(s.clone())),
            Datum::Array(arr) => {
                write!(f, "[")?;
                for (i, item) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Datum::Object(obj) => {
                write!(f, "{{")?;
                for (i, (key, value)) in obj.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", serde_json::Value::String(key.clone()), value)?;
                }
                write!(f, "}}")
            }
            Datum::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Datum::Binary(b) => write!(f, "<binary, {} bytes>", b.len()),
            Datum::Grouped(groups) => {
                write!(f, "<grouped")?;
                for (group, reduction) in groups {
                    write!(f, " {} => {};", group, reduction)?;
                }
                write!(f, ">")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors() {
        assert!(Datum::Null.is_null());
        assert_eq!(Datum::from("x").as_string(), Some("x"));
        assert_eq!(Datum::from(3).as_number(), Some(3.0));
        assert_eq!(Datum::from(true).as_bool(), Some(true));
        assert_eq!(Datum::from(vec![1, 2]).as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_from_json_is_structural() {
        let value = json!({"$reql_type$": "TIME", "epoch_time": 0, "timezone": "+00:00"});
        let datum = Datum::from(value);
        assert_eq!(datum.get("$reql_type$").and_then(Datum::as_string), Some("TIME"));
    }

    #[test]
    fn test_display() {
        let datum = Datum::from(json!({"a": [1, "two", null]}));
        assert_eq!(datum.to_string(), r#"{"a": [1, "two", null]}"#);
        assert_eq!(Datum::Binary(vec![1, 2, 3]).to_string(), "<binary, 3 bytes>");
    }
}
