use chatbridge::commands::serve::build_state;
use chatbridge::config::{Config, ModelSeed, ZhipuConfig};
use chatbridge::server::AppState;
use chatbridge::storage::SqliteStorage;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[allow(dead_code)]
pub const COMPLETIONS_PATH: &str = "/api/paas/v4/chat/completions";

#[allow(dead_code)]
pub const TEST_SECRET: &str = "integration-secret";

#[allow(dead_code)]
pub fn create_temp_storage() -> (SqliteStorage, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("chat.db");
    let storage =
        SqliteStorage::new_with_path(db_path).expect("failed to create sqlite storage with path");
    (storage, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Two Zhipu models, `glm-4` (id 1, default) and `glm-4-air` (id 2), pointed at `server`
#[allow(dead_code)]
pub fn test_config(server: &MockServer) -> Config {
    let mut default = ModelSeed::new("glm-4", "zhipu");
    default.display_name = "GLM-4".to_string();
    default.is_default = true;

    let mut config = Config::default();
    config.auth.secret = TEST_SECRET.to_string();
    config.providers.zhipu = ZhipuConfig {
        api_key: Some("test-kid.test-secret".to_string()),
        base_url: format!("{}{}", server.uri(), COMPLETIONS_PATH),
        ..ZhipuConfig::default()
    };
    config.models = vec![default, ModelSeed::new("glm-4-air", "zhipu")];
    config
}

/// Handler state over a fresh database and a mock Zhipu endpoint
#[allow(dead_code)]
pub async fn test_state(server: &MockServer) -> (AppState, TempDir) {
    let (storage, tmp) = create_temp_storage();
    let state = build_state(&test_config(server), storage)
        .await
        .expect("failed to build state");
    (state, tmp)
}

/// Render payload lines as an SSE body, one event per line
#[allow(dead_code)]
pub fn sse_body(lines: &[&str]) -> String {
    lines.iter().map(|l| format!("{}\n\n", l)).collect()
}

/// A streamed completion of `fragments` ending with `[DONE]`
#[allow(dead_code)]
pub fn completion_stream(fragments: &[&str]) -> String {
    let mut lines: Vec<String> = fragments
        .iter()
        .map(|f| {
            format!(
                "data: {}",
                serde_json::json!({"choices": [{"index": 0, "delta": {"content": f}}]})
            )
        })
        .collect();
    lines.push("data: [DONE]".to_string());
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    sse_body(&refs)
}

#[allow(dead_code)]
pub async fn mount_stream(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}
