//! Configuration precedence: defaults < file < environment

use serial_test::serial;
use sheetwise_config::{AppConfig, ConfigManager, ConfigManagerTrait};
use tempfile::TempDir;

const VARS: &[&str] = &[
    "SWTEST__JOBS__BATCH_SIZE",
    "SWTEST__AZURE__DEPLOYMENT",
    "SWTEST__AZURE__API_VERSION",
    "AZURE_OPENAI_API_BASE",
    "AZURE_OPENAI_API_KEY",
    "AZURE_OPENAI_API_VERSION",
    "AZURE_OPENAI_DEPLOYMENT",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

fn manager_for(dir: &TempDir) -> ConfigManager {
    ConfigManager::with_path(dir.path().join("config.toml"))
        .with_env_prefix("SWTEST")
        .without_dotenv()
}

#[test]
#[serial]
fn test_missing_file_yields_defaults() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let config = manager_for(&dir).load().unwrap();
    assert_eq!(config, AppConfig::default());
}

#[test]
#[serial]
fn test_file_overrides_defaults() {
    clear_env();
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[jobs]\nbatch_size = 5\nmax_concurrency = 8\n\n[templates]\nmax_input_tokens = 2000\n",
    )
    .unwrap();

    let config = manager_for(&dir).load().unwrap();
    assert_eq!(config.jobs.batch_size, 5);
    assert_eq!(config.jobs.max_concurrency, 8);
    assert_eq!(config.templates.max_input_tokens, 2000);
    assert_eq!(config.jobs.max_cells_per_write, 100);
}

#[test]
#[serial]
fn test_env_overrides_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.toml"), "[jobs]\nbatch_size = 5\n").unwrap();
    std::env::set_var("SWTEST__JOBS__BATCH_SIZE", "25");
    std::env::set_var("SWTEST__AZURE__DEPLOYMENT", "gpt-4o");

    let config = manager_for(&dir).load().unwrap();
    clear_env();

    assert_eq!(config.jobs.batch_size, 25);
    assert_eq!(config.azure.deployment, "gpt-4o");
}

#[test]
#[serial]
fn test_conventional_azure_variables_fill_empty_fields() {
    clear_env();
    let dir = TempDir::new().unwrap();
    std::env::set_var("AZURE_OPENAI_API_BASE", "https://example.openai.azure.com");
    std::env::set_var("AZURE_OPENAI_API_KEY", "secret");
    std::env::set_var("AZURE_OPENAI_DEPLOYMENT", "legacy-deployment");
    std::env::set_var("AZURE_OPENAI_API_VERSION", "2023-05-15");
    std::env::set_var("SWTEST__AZURE__DEPLOYMENT", "prefixed-deployment");

    let config = manager_for(&dir).load().unwrap();
    clear_env();

    assert_eq!(config.azure.endpoint, "https://example.openai.azure.com");
    assert_eq!(config.azure.api_key, "secret");
    assert_eq!(config.azure.api_version, "2023-05-15");
    // prefixed variable wins over the conventional one
    assert_eq!(config.azure.deployment, "prefixed-deployment");
    assert!(config.azure.is_configured());
}

#[test]
#[serial]
fn test_invalid_file_value_fails_validation() {
    clear_env();
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.toml"), "[jobs]\nbatch_size = 0\n").unwrap();

    assert!(manager_for(&dir).load().is_err());
}

#[test]
#[serial]
fn test_save_then_load() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let mut manager = manager_for(&dir);

    let mut config = AppConfig::default();
    config.jobs.batch_size = 42;
    config.logging.level = "debug".to_string();
    manager.save_config(&config).unwrap();

    let loaded = manager.load().unwrap();
    assert_eq!(loaded.jobs.batch_size, 42);
    assert_eq!(loaded.logging.level, "debug");
}
