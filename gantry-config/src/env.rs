// Environment variable overlay

use serde_json::{Map, Value};
use std::env;
use std::ffi::OsString;

/// Reads `<PREFIX>_SECTION__KEY=value` variables into a nested tree
///
/// `GANTRY_PIPELINE__HANDLER_TIMEOUT_MS=250` becomes
/// `{"pipeline": {"handler_timeout_ms": 250}}`.
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Overlay built from the process environment
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    pub fn load(&self) -> Value {
        self.load_from_os(env::vars_os())
    }

    /// Like [`EnvLoader::load_from`], skipping entries that are not UTF-8
    pub fn load_from_os<I>(&self, vars: I) -> Value
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        self.load_from(vars.into_iter().filter_map(|(key, value)| {
            Some((key.into_string().ok()?, value.into_string().ok()?))
        }))
    }

    /// Overlay built from an explicit variable list
    pub fn load_from<I, K, V>(&self, vars: I) -> Value
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let marker = format!("{}_", self.prefix);
        let mut root = Value::Object(Map::new());
        for (key, value) in vars {
            let Some(rest) = key.as_ref().strip_prefix(&marker) else {
                continue;
            };
            // Single-segment keys belong to the log crate (GANTRY_DEBUG etc.)
            if !rest.contains("__") {
                continue;
            }
            gantry_log::trace!(target: "gantry::config", "Environment override {}", key.as_ref());
            insert_path(&mut root, &key_path(rest), typed(value.as_ref()));
        }
        root
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new("GANTRY")
    }
}

pub(crate) fn key_path(key: &str) -> Vec<String> {
    key.split("__")
        .filter(|segment| !segment.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Interpret a raw string as bool, integer, float or string
pub(crate) fn typed(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed.to_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if let Some(n) = trimmed.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(raw.to_string())
}

pub(crate) fn insert_path(root: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        map.insert(last.clone(), value);
    }
}
