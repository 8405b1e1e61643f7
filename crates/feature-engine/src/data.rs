//! Feature data bag
//!
//! Data providers store values under string keys; templates and actions read
//! them back as typed values. Values are kept as JSON so templates can render
//! them directly.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use feature_common::{Error, Result};

/// String-keyed store of heterogeneous values
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataBag {
    values: Map<String, Value>,
}

impl DataBag {
    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous value under the key
    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<()> {
        let key = key.into();
        let value = serde_json::to_value(value)
            .map_err(|e| Error::data(key.clone(), format!("value is not serializable: {}", e)))?;
        self.values.insert(key, value);
        Ok(())
    }

    /// Read a value as `T`
    ///
    /// Fails when the key is missing or the stored value does not convert.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| Error::data(key, "no value stored under this key"))?;
        T::deserialize(value).map_err(|e| {
            Error::data(
                key,
                format!("expected {}: {}", std::any::type_name::<T>(), e),
            )
        })
    }

    /// Returns true if a value is stored under the key
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Remove and return the raw value under the key
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All values as a map, used as template context
    pub fn as_template_context(&self) -> &Map<String, Value> {
        &self.values
    }
}
