//! Integration tests for gantry-config

use gantry_config::*;
use gantry_core::{ModuleDescriptor, ModuleGraph, Token};
use serde_json::json;
use std::fs;
use std::path::PathBuf;

fn scratch_file(name: &str, content: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("gantry-config-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_toml_then_dotenv_layering() {
    let toml = scratch_file(
        "layered.toml",
        r#"
        [pipeline]
        production_mode = false
        handler_timeout_ms = 1500

        [logging]
        level = "warn"
        format = "compact"
        "#,
    );
    let dotenv = scratch_file(".env", "PIPELINE__HANDLER_TIMEOUT_MS=250\n");

    let config = GantryConfig::builder().file(&toml).file(&dotenv).build().unwrap();

    assert!(!config.pipeline.production_mode);
    assert_eq!(config.pipeline.handler_timeout_ms, Some(250));
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.logging.format, "compact");
}

#[test]
fn test_json_file() {
    let path = scratch_file(
        "settings.json",
        r#"{"pipeline": {"instantiate_eagerly": false, "log_requests": true}}"#,
    );
    let config = GantryConfig::builder().file(&path).build().unwrap();
    let options = config.pipeline_options();
    assert!(!options.instantiate_eagerly);
    assert!(options.log_requests);
    assert!(options.production_mode);
}

#[test]
fn test_malformed_toml_reported() {
    let path = scratch_file("broken.toml", "[pipeline\nproduction_mode = ");
    let result = GantryConfig::builder().file(&path).build();
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn test_wrong_type_reported() {
    let result = GantryConfig::builder()
        .value(json!({"pipeline": {"production_mode": "sometimes"}}))
        .build();
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn test_config_error_becomes_configuration_error() {
    let err: gantry_core::Error = ConfigError::ValidationError("bad".into()).into();
    assert!(matches!(err, gantry_core::Error::Configuration(_)));
    assert!(err.is_startup());
}

#[test]
fn test_config_injectable_as_provider() {
    let config = GantryConfig::builder()
        .value(json!({"logging": {"level": "debug"}}))
        .build()
        .unwrap();

    let graph = ModuleGraph::build(vec![
        ModuleDescriptor::new("ConfigModule")
            .global()
            .provider(config.provider())
            .export(CONFIG_TOKEN),
    ])
    .unwrap();

    let resolved = graph
        .registry()
        .resolve_as::<GantryConfig>(&Token::from(CONFIG_TOKEN), None)
        .unwrap();
    assert_eq!(resolved.logging.level, "debug");
}
