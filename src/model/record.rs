//! A model instance: one row's values, keyed by column name.

use crate::case::value_keys_to_camel_case;
use crate::error::DataError;
use crate::schema::model::ModelDef;
use serde_json::{Map, Value};

/// Row values for one model instance. The model definition travels
/// separately (callers pass it to every store operation), so a record is
/// just the data.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    values: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Map<String, Value>) -> Self {
        Record { values }
    }

    pub fn from_json(value: Value) -> Result<Self, DataError> {
        match value {
            Value::Object(values) => Ok(Record { values }),
            _ => Err(DataError::BadRequest("record must be a JSON object".into())),
        }
    }

    pub fn id(&self) -> Option<&Value> {
        self.values.get("id").filter(|v| !v.is_null())
    }

    /// A record without an id has never been saved.
    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn clear_id(&mut self) {
        self.values.remove("id");
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.values
    }

    pub fn into_values(self) -> Map<String, Value> {
        self.values
    }

    /// Merge new values into the record. Unprivileged assignment silently
    /// drops `id`, read-only, and computed keys so client payloads cannot
    /// reach protected columns; privileged assignment only drops unknown
    /// keys.
    pub fn assign(&mut self, model: &ModelDef, new_values: &Map<String, Value>, privileged: bool) {
        for (key, value) in new_values {
            if key == "id" && !privileged {
                continue;
            }
            if key != "id" && model.field_def(key).is_none() {
                continue;
            }
            if !privileged && (model.read_only.contains(key) || model.computed.contains(key)) {
                continue;
            }
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Client-facing view: write-only columns stripped, keys camelCased
    /// (including embedded records).
    pub fn to_public(&self, model: &ModelDef) -> Value {
        let mut map = self.values.clone();
        for name in &model.write_only {
            map.remove(name);
        }
        let mut value = Value::Object(map);
        value_keys_to_camel_case(&mut value);
        value
    }
}
