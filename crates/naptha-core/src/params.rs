//! Run input parameters and their command-line forms.

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

static KEY_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^([A-Za-z_][A-Za-z0-9_.\-]*)=(?:"([^"]*)"|'([^']*)'|(\S*))"#).unwrap()
});

/// Ordered parameter mapping. Keys are unique by construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }

    /// Build from a JSON value; only objects are accepted.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map.into_iter().collect())),
            Value::Null => Ok(Self::new()),
            other => Err(Error::InvalidInput(format!(
                "parameters must be an object, got {}",
                other
            ))),
        }
    }

    /// Parse the `-p` argument: a JSON object, or whitespace separated
    /// `key=value` pairs where values may be single or double quoted.
    pub fn parse_cli(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.starts_with('{') {
            let value: Value = serde_json::from_str(trimmed)?;
            return Self::from_value(value);
        }

        let mut params = Self::new();
        let mut rest = trimmed;
        while !rest.is_empty() {
            let caps = KEY_VALUE_RE.captures(rest).ok_or_else(|| {
                Error::InvalidInput(format!("expected key=value, got {:?}", rest))
            })?;
            let key = caps[1].to_string();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            if params.insert(key.clone(), value).is_some() {
                return Err(Error::InvalidInput(format!("duplicate parameter: {}", key)));
            }
            let consumed = caps.get(0).map(|m| m.end()).unwrap_or(rest.len());
            rest = rest[consumed..].trim_start();
        }
        Ok(params)
    }

    /// Load parameters from a YAML (or JSON) file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let value: Value = serde_yaml::from_str(&text)
            .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
        Self::from_value(value)
    }
}

impl FromIterator<(String, Value)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
