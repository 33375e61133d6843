//! Pseudo-type codec.
//!
//! The wire marks richer values with a reserved key:
//!
//! ```json
//! {"$reql_type$": "TIME", "epoch_time": 1376436769.923, "timezone": "+00:00"}
//! {"$reql_type$": "GROUPED_DATA", "data": [[group, reduction], ...]}
//! {"$reql_type$": "BINARY", "data": "<base64>"}
//! ```
//!
//! [`decode`] walks a received value bottom-up, so a `TIME` nested inside a
//! `GROUPED_DATA` payload is converted before its parent is examined.
//! [`encode`] is the reverse direction for native values a caller sends.

use super::datum::Datum;
use crate::error::{ReqlError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, FixedOffset, Offset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Reserved key marking a pseudo-type object.
pub const REQL_TYPE_KEY: &str = "$reql_type$";

/// Whether a pseudo-type is converted to its native form or left as the raw object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PseudoFormat {
    #[default]
    Native,
    Raw,
}

impl PseudoFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PseudoFormat::Native => "native",
            PseudoFormat::Raw => "raw",
        }
    }
}

impl FromStr for PseudoFormat {
    type Err = ReqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "native" => Ok(PseudoFormat::Native),
            "raw" => Ok(PseudoFormat::Raw),
            other => Err(ReqlError::driver(format!(
                "Unknown pseudo-type format \"{}\", expected \"native\" or \"raw\".",
                other
            ))),
        }
    }
}

/// Per-query decoding options (`time_format`, `group_format`, `binary_format`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    pub time_format: PseudoFormat,
    pub group_format: PseudoFormat,
    pub binary_format: PseudoFormat,
}

impl FormatOptions {
    /// Leave every pseudo-type as its wire object.
    pub fn raw() -> Self {
        Self {
            time_format: PseudoFormat::Raw,
            group_format: PseudoFormat::Raw,
            binary_format: PseudoFormat::Raw,
        }
    }
}

/// Decode a received wire value into a [`Datum`], converting pseudo-types
/// according to `opts`.
pub fn decode(value: Value, opts: &FormatOptions) -> Result<Datum> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| decode(item, opts))
            .collect::<Result<Vec<_>>>()
            .map(Datum::Array),
        Value::Object(map) => {
            let mut obj = BTreeMap::new();
            for (key, item) in map {
                obj.insert(key, decode(item, opts)?);
            }
            convert_pseudotype(obj, opts)
        }
        scalar => Ok(Datum::from(scalar)),
    }
}

fn convert_pseudotype(obj: BTreeMap<String, Datum>, opts: &FormatOptions) -> Result<Datum> {
    let reql_type = match obj.get(REQL_TYPE_KEY) {
        Some(Datum::String(t)) => t.clone(),
        _ => return Ok(Datum::Object(obj)),
    };

    match reql_type.as_str() {
        "TIME" => match opts.time_format {
            PseudoFormat::Native => decode_time(&obj).map(Datum::Time),
            PseudoFormat::Raw => Ok(Datum::Object(obj)),
        },
        "GROUPED_DATA" => match opts.group_format {
            PseudoFormat::Native => decode_grouped(obj),
            PseudoFormat::Raw => Ok(Datum::Object(obj)),
        },
        "BINARY" => match opts.binary_format {
            PseudoFormat::Native => decode_binary(&obj),
            PseudoFormat::Raw => Ok(Datum::Object(obj)),
        },
        "GEOMETRY" => Ok(Datum::Object(obj)),
        other => Err(ReqlError::driver(format!("Unknown pseudo-type {}", other))),
    }
}

fn decode_time(obj: &BTreeMap<String, Datum>) -> Result<DateTime<FixedOffset>> {
    let epoch_time = obj
        .get("epoch_time")
        .and_then(Datum::as_number)
        .ok_or_else(|| {
            ReqlError::driver(format!(
                "pseudo-type TIME object {} does not have expected field 'epoch_time'.",
                Datum::Object(obj.clone())
            ))
        })?;

    let offset = match obj.get("timezone").and_then(Datum::as_string) {
        Some(tz) => parse_timezone(tz)?,
        None => chrono::Utc.fix(),
    };

    let micros = (epoch_time * 1_000_000.0).round() as i64;
    let utc = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        ReqlError::driver(format!("TIME epoch_time {} is out of range.", epoch_time))
    })?;
    Ok(utc.with_timezone(&offset))
}

/// Parses `"+HH:MM"` / `"-HH:MM"` (and the bare `"Z"`).
fn parse_timezone(tz: &str) -> Result<FixedOffset> {
    let invalid = || ReqlError::driver(format!("Invalid timezone in TIME pseudo-type: {}", tz));
    if tz == "Z" {
        return Ok(chrono::Utc.fix());
    }

    let (sign, rest) = if let Some(rest) = tz.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = tz.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(invalid());
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn format_timezone(offset: FixedOffset) -> String {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let secs = secs.abs();
    format!("{}{:02}:{:02}", sign, secs / 3600, (secs % 3600) / 60)
}

fn decode_grouped(mut obj: BTreeMap<String, Datum>) -> Result<Datum> {
    let missing = || ReqlError::driver("pseudo-type GROUPED_DATA object does not have expected field 'data'.");
    let data = match obj.remove("data") {
        Some(Datum::Array(data)) => data,
        _ => return Err(missing()),
    };

    data.into_iter()
        .map(|pair| match pair {
            Datum::Array(mut kv) if kv.len() == 2 => {
                let reduction = kv.pop().unwrap_or(Datum::Null);
                let group = kv.pop().unwrap_or(Datum::Null);
                Ok((group, reduction))
            }
            other => Err(ReqlError::driver(format!(
                "GROUPED_DATA entry {} is not a [group, reduction] pair.",
                other
            ))),
        })
        .collect::<Result<Vec<_>>>()
        .map(Datum::Grouped)
}

fn decode_binary(obj: &BTreeMap<String, Datum>) -> Result<Datum> {
    let data = obj.get("data").and_then(Datum::as_string).ok_or_else(|| {
        ReqlError::driver("pseudo-type BINARY object does not have expected field 'data'.")
    })?;
    BASE64
        .decode(data)
        .map(Datum::Binary)
        .map_err(|e| ReqlError::driver(format!("Invalid base64 in BINARY pseudo-type: {}", e)))
}

/// Encode a native number, keeping integral values integral on the wire.
pub fn encode_number(n: f64) -> Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Encode a native datum as plain wire data (arrays as JSON arrays,
/// pseudo-types as their reserved-key objects).
pub fn encode(datum: &Datum) -> Value {
    match datum {
        Datum::Null => Value::Null,
        Datum::Boolean(b) => Value::Bool(*b),
        Datum::Number(n) => encode_number(*n),
        Datum::String(s) => Value::String(s.clone()),
        Datum::Array(items) => Value::Array(items.iter().map(encode).collect()),
        Datum::Object(obj) => {
            Value::Object(obj.iter().map(|(k, v)| (k.clone(), encode(v))).collect())
        }
        Datum::Time(_) | Datum::Binary(_) | Datum::Grouped(_) => {
            encode_pseudotype(datum, encode).unwrap_or(Value::Null)
        }
    }
}

/// Builds the reserved-key object for a native pseudo-type, encoding nested
/// values with `inner`. Returns `None` for non pseudo-type datums.
pub(crate) fn encode_pseudotype(datum: &Datum, inner: impl Fn(&Datum) -> Value) -> Option<Value> {
    let mut obj = Map::new();
    match datum {
        Datum::Time(t) => {
            obj.insert(REQL_TYPE_KEY.into(), Value::from("TIME"));
            obj.insert(
                "epoch_time".into(),
                encode_number(t.timestamp_micros() as f64 / 1_000_000.0),
            );
            obj.insert("timezone".into(), Value::from(format_timezone(t.offset().fix())));
        }
        Datum::Binary(bytes) => {
            obj.insert(REQL_TYPE_KEY.into(), Value::from("BINARY"));
            obj.insert("data".into(), Value::from(BASE64.encode(bytes)));
        }
        Datum::Grouped(groups) => {
            obj.insert(REQL_TYPE_KEY.into(), Value::from("GROUPED_DATA"));
            let data = groups
                .iter()
                .map(|(g, r)| Value::Array(vec![inner(g), inner(r)]))
                .collect();
            obj.insert("data".into(), Value::Array(data));
        }
        _ => return None,
    }
    Some(Value::Object(obj))
}
