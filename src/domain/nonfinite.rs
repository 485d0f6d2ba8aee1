//! Serde helpers for floats that may be `NaN` or infinite.
//!
//! JSON has no representation for non-finite numbers and serde_json writes them
//! as `null`, which a plain `f64` field refuses to read back. Fields that can
//! legitimately be non-finite (undefined contrasts, `C = inf`, infinite SMDs)
//! use `#[serde(with = "crate::domain::nonfinite")]` instead:
//!
//! - finite values are written as JSON numbers
//! - `NaN`, `inf`, `-inf` are written as the strings `"NaN"`, `"inf"`, `"-inf"`
//! - on read, numbers, those strings, and `null` (as `NaN`) are accepted

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else if value.is_nan() {
        serializer.serialize_str("NaN")
    } else if value.is_sign_positive() {
        serializer.serialize_str("inf")
    } else {
        serializer.serialize_str("-inf")
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Lossless::deserialize(deserializer)?.0)
}

/// `f64` wrapper carrying the encoding above, for use inside containers.
#[derive(Debug, Clone, Copy)]
struct Lossless(f64);

#[derive(Deserialize)]
#[serde(untagged)]
enum Wire {
    Number(f64),
    Text(String),
}

impl Serialize for Lossless {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Lossless {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<Wire>::deserialize(deserializer)? {
            None => Ok(Lossless(f64::NAN)),
            Some(Wire::Number(v)) => Ok(Lossless(v)),
            Some(Wire::Text(text)) => text
                .trim()
                .parse::<f64>()
                .map(Lossless)
                .map_err(|_| D::Error::custom(format!("invalid float `{text}`"))),
        }
    }
}

/// The same encoding for the values of a map (`BTreeMap<K, f64>`).
pub mod map {
    use super::*;

    pub fn serialize<K, S>(values: &BTreeMap<K, f64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize,
        S: Serializer,
    {
        serializer.collect_map(values.iter().map(|(k, v)| (k, Lossless(*v))))
    }

    pub fn deserialize<'de, K, D>(deserializer: D) -> Result<BTreeMap<K, f64>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<K, Lossless>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|(k, v)| (k, v.0)).collect())
    }
}
