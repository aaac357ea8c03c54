use serde_json::{Map, Value};

/// Typed lookups over a decoded JSON object.
///
/// Every accessor returns `None` when the key is missing or holds a value of
/// another type, so callers pick their own default instead of failing the record.
pub trait FieldsExt {
    fn get_u64(&self, key: &str) -> Option<u64>;
    fn get_str(&self, key: &str) -> Option<&str>;
    fn get_array(&self, key: &str) -> Option<&Vec<Value>>;
}

impl FieldsExt for Map<String, Value> {
    fn get_u64(&self, key: &str) -> Option<u64> {
        as_u64(self.get(key)?)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.get(key)?.as_array()
    }
}

/// Reads a non-negative integer, accepting integral floats such as `3.0`.
pub fn as_u64(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}
