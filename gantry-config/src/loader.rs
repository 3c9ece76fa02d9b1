// Configuration file loaders

use crate::{ConfigError, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }

    /// Detect the format from a path; `.env` files have no extension
    pub fn detect(path: &Path) -> Option<Self> {
        if path.file_name().and_then(|n| n.to_str()) == Some(".env") {
            return Some(FileFormat::Env);
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// Reads one configuration source into a JSON tree
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Pick the loader from the file name
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = FileFormat::detect(path).ok_or_else(|| {
            ConfigError::LoadError(format!("Unsupported config file: {}", path.display()))
        })?;
        Ok(Self::new(format))
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::LoadError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        gantry_log::debug!(target: "gantry::config", "Read {} bytes from {}", content.len(), path.display());
        self.parse(&content)
    }

    pub fn parse(&self, content: &str) -> Result<Value> {
        match self.format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e))),
            FileFormat::Toml => {
                let parsed: toml::Value = toml::from_str(content)
                    .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;
                serde_json::to_value(parsed).map_err(|e| {
                    ConfigError::ParseError(format!("TOML to JSON conversion error: {}", e))
                })
            }
            FileFormat::Env => parse_env(content),
        }
    }
}

// `.env` files go through dotenvy so quoting and escapes match the
// environment loader; keys become nested paths on `__`.
fn parse_env(content: &str) -> Result<Value> {
    let mut root = Value::Object(serde_json::Map::new());
    for item in dotenvy::from_read_iter(content.as_bytes()) {
        let (key, value) = item.map_err(|e| ConfigError::ParseError(format!(".env parse error: {}", e)))?;
        crate::env::insert_path(&mut root, &crate::env::key_path(&key), crate::env::typed(&value));
    }
    Ok(root)
}

/// Deep-merge `overlay` into `base`; objects merge key by key, anything
/// else is replaced
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_toml_sections() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let value = loader
            .parse(
                r#"
                [pipeline]
                production_mode = false
                handler_timeout_ms = 500
            "#,
            )
            .unwrap();
        assert_eq!(value["pipeline"]["production_mode"], json!(false));
        assert_eq!(value["pipeline"]["handler_timeout_ms"], json!(500));
    }

    #[test]
    fn test_parse_env_nests_keys() {
        let loader = ConfigLoader::new(FileFormat::Env);
        let value = loader
            .parse("# comment\nPIPELINE__LOG_REQUESTS=true\nLOGGING__LEVEL=\"debug\"\n")
            .unwrap();
        assert_eq!(value["pipeline"]["log_requests"], json!(true));
        assert_eq!(value["logging"]["level"], json!("debug"));
    }

    #[test]
    fn test_invalid_json_reported() {
        let loader = ConfigLoader::new(FileFormat::Json);
        assert!(matches!(loader.parse("{nope"), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::detect(Path::new("gantry.toml")), Some(FileFormat::Toml));
        assert_eq!(FileFormat::detect(Path::new("conf/.env")), Some(FileFormat::Env));
        assert_eq!(FileFormat::detect(Path::new("settings.yaml")), None);
        assert!(ConfigLoader::auto("settings.yaml").is_err());
    }

    #[test]
    fn test_merge_is_deep() {
        let mut base = json!({"pipeline": {"production_mode": true, "log_requests": false}});
        merge(&mut base, json!({"pipeline": {"log_requests": true}, "extra": 1}));
        assert_eq!(
            base,
            json!({"pipeline": {"production_mode": true, "log_requests": true}, "extra": 1})
        );
    }
}
