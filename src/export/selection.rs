//! Which keys an export covers.
//!
//! On the wire `keyIds` is an array. A single falsy element (`[null]`,
//! `[0]`, `[""]`, `[false]`) selects every key in the vault; anything else
//! is an explicit list of ids, given as strings or numbers.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelection {
    /// Every key in the vault, resolved from the paginated listing
    All,
    /// Explicit ids, in request order, not deduplicated
    Specific(Vec<String>),
}

impl KeySelection {
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

impl<'de> Deserialize<'de> for KeySelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<Value>::deserialize(deserializer)?;

        if values.len() == 1 && is_falsy(&values[0]) {
            return Ok(Self::All);
        }

        values
            .into_iter()
            .map(|value| match value {
                Value::String(s) => Ok(s),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(de::Error::custom(format!(
                    "key ids must be strings or numbers, got {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::Specific)
    }
}

impl Serialize for KeySelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => [Value::Null].serialize(serializer),
            Self::Specific(ids) => ids.serialize(serializer),
        }
    }
}
