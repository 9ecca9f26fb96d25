//! Configuration loading: file, then environment, then command line

mod common;

use chatbridge::cli::Cli;
use chatbridge::config::Config;
use clap::Parser;
use common::temp_config_file;
use serial_test::serial;

const CONFIG: &str = r#"
server:
  bind: "127.0.0.1:9100"
auth:
  secret: "from-file"
providers:
  zhipu:
    api_key: "file-kid.file-secret"
    fragment_delay_ms: 25
  coze:
    client_id: "1234"
    bot_id: "bot-1"
models:
  - name: glm-4
    display_name: GLM-4
    provider: zhipu
    is_default: true
  - name: travel-bot
    display_name: Travel Bot
    provider: coze
    class: bot
    class_id: "7391"
"#;

const ENV_VARS: [&str; 4] = [
    "CHATBRIDGE_BIND",
    "ZHIPU_API_KEY",
    "CHATBRIDGE_JWT_SECRET",
    "CHATBRIDGE_DB",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

fn cli(args: &[&str]) -> Cli {
    let mut argv = vec!["chatbridge"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    clear_env();
    let config = Config::load("/nonexistent/chatbridge.yaml", &cli(&["serve"])).unwrap();
    assert_eq!(config.server.bind, "127.0.0.1:8080");
    assert!(config.models.is_empty());
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_file_values_are_loaded() {
    clear_env();
    let (_dir, path) = temp_config_file(CONFIG);
    let config = Config::load(path.to_str().unwrap(), &cli(&["serve"])).unwrap();

    assert_eq!(config.server.bind, "127.0.0.1:9100");
    assert_eq!(config.auth.secret, "from-file");
    assert_eq!(config.providers.zhipu.fragment_delay_ms, 25);
    assert_eq!(config.providers.coze.bot_id.as_deref(), Some("bot-1"));
    assert_eq!(config.models.len(), 2);
    assert_eq!(config.models[1].class.as_deref(), Some("bot"));
    assert_eq!(config.models[1].model_type, "chat");
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let (_dir, path) = temp_config_file(CONFIG);
    std::env::set_var("CHATBRIDGE_BIND", "0.0.0.0:7000");
    std::env::set_var("ZHIPU_API_KEY", "env-kid.env-secret");
    std::env::set_var("CHATBRIDGE_JWT_SECRET", "from-env");

    let config = Config::load(path.to_str().unwrap(), &cli(&["serve"])).unwrap();
    clear_env();

    assert_eq!(config.server.bind, "0.0.0.0:7000");
    assert_eq!(
        config.providers.zhipu.api_key.as_deref(),
        Some("env-kid.env-secret")
    );
    assert_eq!(config.auth.secret, "from-env");
}

#[test]
#[serial]
fn test_command_line_overrides_environment() {
    clear_env();
    let (_dir, path) = temp_config_file(CONFIG);
    std::env::set_var("CHATBRIDGE_BIND", "0.0.0.0:7000");

    let config = Config::load(
        path.to_str().unwrap(),
        &cli(&["--storage-path", "/tmp/cli.db", "serve", "--bind", "127.0.0.1:7001"]),
    )
    .unwrap();
    clear_env();

    assert_eq!(config.server.bind, "127.0.0.1:7001");
    assert_eq!(
        config.storage.path.as_deref(),
        Some(std::path::Path::new("/tmp/cli.db"))
    );
}

#[test]
#[serial]
fn test_malformed_file_is_an_error() {
    clear_env();
    let (_dir, path) = temp_config_file("server: [not, a, map");
    assert!(Config::load(path.to_str().unwrap(), &cli(&["serve"])).is_err());
}
