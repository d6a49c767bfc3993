use std::fs;

use promptbench_cli::config::{config_dir, load_registry, ConfigError, PROVIDERS_FILE_NAME};
use promptbench_llm::ProviderKind;

#[test]
fn missing_file_falls_back_to_builtin_registry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = load_registry(dir.path()).expect("load registry");
    assert_eq!(registry.log_level, "warn");
    assert_eq!(
        registry
            .providers
            .get("anthropic")
            .map(|entry| entry.base_url.as_str()),
        Some("https://api.anthropic.com")
    );
}

#[test]
fn providers_file_in_conf_dir_is_loaded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let home = config_dir(Some(dir.path()));
    fs::write(
        home.join(PROVIDERS_FILE_NAME),
        r#"
default_provider = "work"

[providers.work]
kind = "openai-compatible"
base_url = "https://llm.internal.example/v1"
api_key_env = "WORK_LLM_KEY"
"#,
    )
    .expect("write providers file");

    let registry = load_registry(&home).expect("load registry");
    let entry = registry.select(None).expect("default provider");
    assert_eq!(entry.kind, ProviderKind::OpenAICompatible);
    assert_eq!(entry.base_url, "https://llm.internal.example/v1");
    assert!(!registry.providers.contains_key("openai"));
}

#[test]
fn malformed_file_reports_its_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(PROVIDERS_FILE_NAME);
    fs::write(&path, "default_provider = [").expect("write providers file");

    let error = load_registry(dir.path()).expect_err("parse failure");
    match error {
        ConfigError::Parse { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("expected parse error, got {other}"),
    }
}
