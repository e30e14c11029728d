use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Errors reading typed values out of a [`LeasePayload`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("missing key `{0}`")]
    MissingKey(String),
    #[error("key `{key}` holds a {found}, expected a {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("key `{key}` is `{found}`, expected `{expected}`")]
    UnexpectedValue {
        key: String,
        expected: String,
        found: String,
    },
}

/// A single value in a lease payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadValue {
    Str(String),
    Int(i32),
}

impl PayloadValue {
    fn kind(&self) -> &'static str {
        match self {
            PayloadValue::Str(_) => "string",
            PayloadValue::Int(_) => "integer",
        }
    }
}

/// Flat key/value record attached to a lease and carried through world save/reload.
///
/// Keys iterate in sorted order, so two payloads with the same entries always
/// serialize to the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeasePayload {
    entries: BTreeMap<String, PayloadValue>,
}

impl LeasePayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(key.to_owned(), PayloadValue::Str(value.into()));
    }

    pub fn set_int(&mut self, key: &str, value: i32) {
        self.entries.insert(key.to_owned(), PayloadValue::Int(value));
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.entries.get(key)
    }

    pub fn get_str(&self, key: &str) -> Result<&str, PayloadError> {
        match self.entries.get(key) {
            Some(PayloadValue::Str(s)) => Ok(s),
            Some(other) => Err(PayloadError::WrongType {
                key: key.to_owned(),
                expected: "string",
                found: other.kind(),
            }),
            None => Err(PayloadError::MissingKey(key.to_owned())),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i32, PayloadError> {
        match self.entries.get(key) {
            Some(PayloadValue::Int(v)) => Ok(*v),
            Some(other) => Err(PayloadError::WrongType {
                key: key.to_owned(),
                expected: "integer",
                found: other.kind(),
            }),
            None => Err(PayloadError::MissingKey(key.to_owned())),
        }
    }

    /// Fails unless `key` holds exactly the string `expected`.
    pub fn expect_str(&self, key: &str, expected: &str) -> Result<(), PayloadError> {
        let found = self.get_str(key)?;
        if found == expected {
            Ok(())
        } else {
            Err(PayloadError::UnexpectedValue {
                key: key.to_owned(),
                expected: expected.to_owned(),
                found: found.to_owned(),
            })
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PayloadValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
