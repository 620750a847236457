//! Configuration files on disk and their validation at engine start.

use crate::helpers::idle_services;
use fieldvoice::{DialogueOrchestrator, EngineConfig, EngineError};
use std::fs;
use tempfile::TempDir;

#[test]
fn partial_file_keeps_defaults() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
# Quiet site: commit sooner, barge in less eagerly.
[turn]
silence_ms = 1800

[barge_in]
floor = 40.0

[service]
base_url = "https://kb.example.test"
"#,
    )
    .unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config.turn.silence_ms, 1_800);
    assert_eq!(config.barge_in.floor, 40.0);
    assert_eq!(config.service.base_url, "https://kb.example.test");

    let defaults = EngineConfig::default();
    assert_eq!(config.echo.tail_ms, defaults.echo.tail_ms);
    assert_eq!(config.barge_in.multiplier, defaults.barge_in.multiplier);
    assert_eq!(
        config.intents.strong_closing,
        defaults.intents.strong_closing
    );
    assert_eq!(config.prompts.proposal, defaults.prompts.proposal);
    config.validate().unwrap();
}

#[test]
fn saved_file_loads_back_with_japanese_phrases() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = EngineConfig::default();
    config.intents.soft_closing.push("助かりました".to_owned());
    config.prompts.published = "登録完了です。".to_owned();
    config
        .registration
        .aliases
        .insert("設備".to_owned(), "maintenance".to_owned());
    config.save_to_file(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("助かりました"));

    let loaded = EngineConfig::from_file(&path).unwrap();
    assert!(
        loaded
            .intents
            .soft_closing
            .contains(&"助かりました".to_owned())
    );
    assert_eq!(loaded.prompts.published, "登録完了です。");
    assert_eq!(
        loaded.registration.aliases.get("設備").map(String::as_str),
        Some("maintenance")
    );
}

#[test]
fn malformed_file_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[turn]\nsilence_ms = \"soon\"\n").unwrap();

    assert!(matches!(
        EngineConfig::from_file(&path),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        EngineConfig::from_file(&dir.path().join("absent.toml")),
        Err(EngineError::Io(_))
    ));
}

#[tokio::test]
async fn orchestrator_rejects_invalid_config() {
    let mut config = EngineConfig::default();
    config.registration.default_category = "gardening".to_owned();
    assert!(matches!(
        DialogueOrchestrator::new(config, idle_services()),
        Err(EngineError::Config(_))
    ));

    let mut config = EngineConfig::default();
    config.turn.silence_ms = 0;
    assert!(matches!(
        DialogueOrchestrator::new(config, idle_services()),
        Err(EngineError::Config(_))
    ));

    assert!(DialogueOrchestrator::new(EngineConfig::default(), idle_services()).is_ok());
}
