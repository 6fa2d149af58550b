//! Document snapshots
//!
//! Documents are stored as JSON field maps. Reads hand out owned snapshots
//! with typed accessors, so callers convert values at the edge instead of
//! casting.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Field name to value map of a single document
pub type Fields = Map<String, Value>;

/// Snapshot of a collection, keyed by document ID
pub type Collection = HashMap<String, Fields>;

/// Snapshot of one document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    /// Document ID
    pub id: String,
    /// Document fields at the time of the read
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Raw field value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_array(&self, name: &str) -> Option<&Vec<Value>> {
        self.get(name).and_then(Value::as_array)
    }

    pub fn get_object(&self, name: &str) -> Option<&Fields> {
        self.get(name).and_then(Value::as_object)
    }

    /// Objects of an array field such as `emails: [{...}, {...}]`
    ///
    /// Elements that are not objects are skipped.
    pub fn array_of_objects(&self, name: &str) -> Vec<&Fields> {
        self.get_array(name)
            .map(|items| items.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default()
    }

    /// Deserialize a field into any serde type
    ///
    /// Returns `None` when the field is absent.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Option<Result<T, serde_json::Error>> {
        self.get(name)
            .map(|value| serde_json::from_value(value.clone()))
    }
}
