use std::path::PathBuf;

use knowledge_graph::config::*;
use knowledge_graph::errors::KnowledgeGraphError;
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = GatewayConfig::default();
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 8080);
    assert_eq!(config.db_path, PathBuf::from("kg.db"));
    assert!(config.enable_stdio);
    assert!(config.enable_http);
    assert_eq!(config.log_level, "info");
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gateway.toml");
    std::fs::write(&path, "port = 7070\ndb_path = \"/tmp/graph.db\"\n").unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.port, 7070);
    assert_eq!(config.db_path, PathBuf::from("/tmp/graph.db"));
    assert_eq!(config.host, "0.0.0.0");
    assert!(config.enable_stdio);
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, KnowledgeGraphError::Config { .. }));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn test_invalid_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "port = \"not a number\"\n").unwrap();

    let err = load_config(&path).unwrap_err();
    assert!(matches!(err, KnowledgeGraphError::Config { .. }));
}

#[test]
fn test_cli_overrides_file_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gateway.toml");
    std::fs::write(&path, "port = 7070\nenable_stdio = false\n").unwrap();

    let mut config = load_config(&path).unwrap();
    config.apply_overrides(ConfigOverrides {
        port: Some(8181),
        log_level: Some("debug".to_string()),
        ..ConfigOverrides::default()
    });

    assert_eq!(config.port, 8181);
    assert!(!config.enable_stdio);
    assert_eq!(config.log_level, "debug");
}
