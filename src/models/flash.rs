use std::collections::HashMap;

use crate::codec;
use crate::error::Result;
use crate::models::value::Value;

pub(crate) type FlashValues = HashMap<String, Vec<Value>>;

/// One-shot messages that survive exactly one subsequent request.
///
/// Reads consume: `get` removes the first value for a key, `values` removes
/// them all. Any mutation, including a consuming read, marks the bag changed
/// so the owning session gets persisted.
#[derive(Debug, Default, Clone)]
pub struct Flash {
    values: FlashValues,
    changed: bool,
}

impl Flash {
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            values: codec::decode_flash(bytes)?,
            changed: false,
        })
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        codec::encode_flash(&self.values)
    }

    /// Replaces every value for `key` with `value`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.changed = true;
        self.values.insert(key.into(), vec![value.into()]);
    }

    /// Appends `value` to the values for `key`.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.changed = true;
        self.values.entry(key.into()).or_default().push(value.into());
    }

    /// Removes and returns the first value for `key`.
    ///
    /// Values queued after the first one stay for later reads.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let queue = self.values.get_mut(key)?;
        if queue.is_empty() {
            return None;
        }
        self.changed = true;
        let value = queue.remove(0);
        if queue.is_empty() {
            self.values.remove(key);
        }
        Some(value)
    }

    pub fn get_string(&mut self, key: &str) -> String {
        self.get(key).map(Value::into_string).unwrap_or_default()
    }

    pub fn get_int(&mut self, key: &str) -> i64 {
        self.get(key).and_then(|v| v.as_int()).unwrap_or_default()
    }

    pub fn get_float(&mut self, key: &str) -> f64 {
        self.get(key).and_then(|v| v.as_float()).unwrap_or_default()
    }

    pub fn get_bool(&mut self, key: &str) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or_default()
    }

    /// Removes and returns every value for `key`.
    pub fn values(&mut self, key: &str) -> Vec<Value> {
        match self.values.remove(key) {
            Some(values) => {
                self.changed = true;
                values
            }
            None => Vec::new(),
        }
    }

    pub fn del(&mut self, key: &str) {
        if self.values.remove(key).is_some() {
            self.changed = true;
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| !v.is_empty())
    }

    pub fn clear(&mut self) {
        if !self.values.is_empty() {
            self.changed = true;
        }
        self.values.clear();
    }

    /// Number of keys holding at least one value.
    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn changed(&self) -> bool {
        self.changed
    }
}
