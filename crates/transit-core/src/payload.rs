//! Read-only, path-addressable view over a decoded message body.
//!
//! Lookups never fail. A missing path yields a payload for which
//! [`Payload::exists`] is false and every scalar accessor returns its zero
//! value, so callers only check existence where absence is meaningful.
//!
//! Scalar accessors coerce leniently: numeric strings read as numbers,
//! `"true"`/`"1"` read as booleans, and objects or arrays read as their JSON
//! text through [`Payload::string`].

use crate::error::PayloadError;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A decoded message, or one node of it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload {
    value: Option<Value>,
}

impl Payload {
    /// Wrap a decoded value.
    pub fn new(value: Value) -> Self {
        Self { value: Some(value) }
    }

    /// The non-existent payload.
    pub fn missing() -> Self {
        Self { value: None }
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self::new(Value::Object(map))
    }

    /// Look up a dotted path such as `meta.user.id` or `items.0`.
    ///
    /// A literal dot inside a key is written as `\.`.
    pub fn get(&self, path: &str) -> Payload {
        let Some(mut current) = self.value.as_ref() else {
            return Payload::missing();
        };
        if path.is_empty() {
            return self.clone();
        }
        for segment in split_path(path) {
            let next = match current {
                Value::Object(map) => map.get(&segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Payload::missing(),
            }
        }
        Payload::new(current.clone())
    }

    /// False for a path that matched nothing.
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    /// The raw dynamic value; `Null` when missing.
    pub fn value(&self) -> Value {
        self.value.clone().unwrap_or(Value::Null)
    }

    /// Borrow the raw value, if any.
    pub fn as_value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Take the raw value; `Null` when missing.
    pub fn into_value(self) -> Value {
        self.value.unwrap_or(Value::Null)
    }

    /// Text of a string, or the JSON text of any other value; empty when missing.
    pub fn string(&self) -> String {
        match &self.value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => other.to_string(),
        }
    }

    /// 32-bit integer, saturating at the bounds.
    pub fn int(&self) -> i32 {
        self.int64().clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }

    /// Signed integer; floats truncate and numeric strings parse.
    pub fn int64(&self) -> i64 {
        match &self.value {
            Some(Value::Number(n)) => number_to_i64(n),
            Some(Value::String(s)) => parse_i64(s),
            Some(Value::Bool(true)) => 1,
            _ => 0,
        }
    }

    /// Unsigned integer; negative values read as 0.
    pub fn uint(&self) -> u64 {
        match &self.value {
            Some(Value::Number(n)) => number_to_u64(n),
            Some(Value::String(s)) => parse_u64(s),
            Some(Value::Bool(true)) => 1,
            _ => 0,
        }
    }

    /// Floating point value with the same string and boolean coercions.
    pub fn float(&self) -> f64 {
        match &self.value {
            Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
            Some(Value::Bool(true)) => 1.0,
            _ => 0.0,
        }
    }

    pub fn float32(&self) -> f32 {
        self.float() as f32
    }

    /// `true`, a non-zero number, or one of the usual true spellings.
    pub fn bool(&self) -> bool {
        match &self.value {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::String(s)) => {
                matches!(s.as_str(), "1" | "t" | "T" | "true" | "TRUE" | "True")
            }
            _ => false,
        }
    }

    /// Time encoded as Unix seconds (integer or fractional) or as an RFC 3339
    /// string with optional fractional seconds; the epoch otherwise.
    pub fn time(&self) -> SystemTime {
        if let Some(Value::String(text)) = &self.value {
            if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(text.trim()) {
                return parsed.into();
            }
        }
        let seconds = self.float();
        let Ok(offset) = Duration::try_from_secs_f64(seconds.abs()) else {
            return UNIX_EPOCH;
        };
        let time = if seconds >= 0.0 {
            UNIX_EPOCH.checked_add(offset)
        } else {
            UNIX_EPOCH.checked_sub(offset)
        };
        time.unwrap_or(UNIX_EPOCH)
    }

    /// True for a JSON array.
    pub fn is_array(&self) -> bool {
        matches!(self.value, Some(Value::Array(_)))
    }

    /// True for a JSON object.
    pub fn is_map(&self) -> bool {
        matches!(self.value, Some(Value::Object(_)))
    }

    /// Element views, or `None` when this is not an array.
    pub fn array(&self) -> Option<Vec<Payload>> {
        self.map_array(Payload::clone)
    }

    /// Raw elements, or `None` when this is not an array.
    pub fn value_array(&self) -> Option<Vec<Value>> {
        self.map_array(Payload::value)
    }

    /// Elements read with [`Payload::string`].
    pub fn string_array(&self) -> Option<Vec<String>> {
        self.map_array(Payload::string)
    }

    /// Elements read with [`Payload::int`].
    pub fn int_array(&self) -> Option<Vec<i32>> {
        self.map_array(Payload::int)
    }

    /// Elements read with [`Payload::int64`].
    pub fn int64_array(&self) -> Option<Vec<i64>> {
        self.map_array(Payload::int64)
    }

    /// Elements read with [`Payload::uint`].
    pub fn uint_array(&self) -> Option<Vec<u64>> {
        self.map_array(Payload::uint)
    }

    /// Elements read with [`Payload::float`].
    pub fn float_array(&self) -> Option<Vec<f64>> {
        self.map_array(Payload::float)
    }

    /// Elements read with [`Payload::float32`].
    pub fn float32_array(&self) -> Option<Vec<f32>> {
        self.map_array(Payload::float32)
    }

    /// Elements read with [`Payload::bool`].
    pub fn bool_array(&self) -> Option<Vec<bool>> {
        self.map_array(Payload::bool)
    }

    /// Elements read with [`Payload::time`].
    pub fn time_array(&self) -> Option<Vec<SystemTime>> {
        self.map_array(Payload::time)
    }

    fn map_array<T>(&self, f: impl Fn(&Payload) -> T) -> Option<Vec<T>> {
        match &self.value {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| f(&Payload::new(item.clone())))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Field views, or `None` when this is not a map.
    pub fn map(&self) -> Option<HashMap<String, Payload>> {
        match &self.value {
            Some(Value::Object(map)) => Some(
                map.iter()
                    .map(|(k, v)| (k.clone(), Payload::new(v.clone())))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// The plain decoded map, or `None` when this is not a map.
    pub fn raw_map(&self) -> Option<Map<String, Value>> {
        match &self.value {
            Some(Value::Object(map)) => Some(map.clone()),
            _ => None,
        }
    }

    /// Visit each entry until `iterator` returns false.
    ///
    /// Map keys are passed as strings and array keys as their index. A
    /// scalar is visited once with a `Null` key.
    pub fn for_each<F>(&self, mut iterator: F)
    where
        F: FnMut(Value, Payload) -> bool,
    {
        match &self.value {
            None => {}
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    if !iterator(Value::String(key.clone()), Payload::new(value.clone())) {
                        break;
                    }
                }
            }
            Some(Value::Array(items)) => {
                for (index, value) in items.iter().enumerate() {
                    if !iterator(Value::from(index), Payload::new(value.clone())) {
                        break;
                    }
                }
            }
            Some(_) => {
                iterator(Value::Null, self.clone());
            }
        }
    }

    /// A map carrying an `error` field.
    pub fn is_error(&self) -> bool {
        self.is_map() && self.get("error").exists()
    }

    /// The error described by the `error` field, if any.
    pub fn error(&self) -> Option<PayloadError> {
        if !self.is_error() {
            return None;
        }
        let error = self.get("error");
        let message = error.get("message");
        if error.is_map() && message.exists() {
            Some(PayloadError(message.string()))
        } else {
            Some(PayloadError(error.string()))
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::new(value)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string())
    }
}

/// Encode a time the way [`Payload::time`] reads it back.
pub fn time_to_value(time: SystemTime) -> Value {
    let (negative, offset) = match time.duration_since(UNIX_EPOCH) {
        Ok(d) => (false, d),
        Err(e) => (true, e.duration()),
    };
    if offset.subsec_nanos() == 0 {
        let secs = offset.as_secs() as i64;
        Value::from(if negative { -secs } else { secs })
    } else {
        let secs = offset.as_secs_f64();
        Number::from_f64(if negative { -secs } else { secs })
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '.' => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

fn number_to_i64(n: &Number) -> i64 {
    if let Some(i) = n.as_i64() {
        i
    } else if n.as_u64().is_some() {
        i64::MAX
    } else {
        n.as_f64().map(|f| f as i64).unwrap_or_default()
    }
}

fn number_to_u64(n: &Number) -> u64 {
    if let Some(u) = n.as_u64() {
        u
    } else if n.as_i64().is_some() {
        0
    } else {
        n.as_f64().map(|f| f as u64).unwrap_or_default()
    }
}

fn parse_i64(s: &str) -> i64 {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        .unwrap_or_default()
}

fn parse_u64(s: &str) -> u64 {
    let s = s.trim();
    s.parse::<u64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|f| f as u64))
        .unwrap_or_default()
}
