use chat4o_relay::config::Config;
use std::collections::HashMap;
use std::time::Duration;

fn load(vars: &[(&str, &str)]) -> Result<Config, chat4o_relay::error::AppError> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_lookup(|key| vars.get(key).cloned())
}

#[test]
fn defaults_apply_when_only_token_is_set() {
    let config = load(&[("CHAT4O_UPSTREAM_TOKEN", "Bearer eyJ.token")]).expect("config");
    assert_eq!(config.listen, "0.0.0.0:8080");
    assert_eq!(config.upstream.base_url, "https://api2.tap4.ai");
    assert_eq!(config.upstream.token, "eyJ.token");
    assert_eq!(config.upstream.chat_log_num, "6");
    assert_eq!(config.models, vec!["gemini-2.0-flash-001".to_string()]);
    assert_eq!(config.default_model, "gemini-2.0-flash-001");
    assert_eq!(config.upstream.session_timeout, Duration::from_secs(30));
    assert_eq!(config.upstream.read_timeout, Duration::from_secs(60));
    assert_eq!(config.stream_buffer, 64);
    assert!(!config.auth_enabled());
}

#[test]
fn missing_upstream_token_fails_startup() {
    let err = load(&[("CHAT4O_UPSTREAM_TOKEN", "   ")]).unwrap_err();
    assert_eq!(err.code, "config_invalid");
    assert!(err.message.contains("CHAT4O_UPSTREAM_TOKEN"));
}

#[test]
fn master_key_placeholder_disables_auth() {
    let open = load(&[
        ("CHAT4O_UPSTREAM_TOKEN", "t"),
        ("CHAT4O_API_MASTER_KEY", "1"),
    ])
    .unwrap();
    assert!(!open.auth_enabled());

    let locked = load(&[
        ("CHAT4O_UPSTREAM_TOKEN", "t"),
        ("CHAT4O_API_MASTER_KEY", "sk-secret"),
    ])
    .unwrap();
    assert_eq!(locked.master_key.as_deref(), Some("sk-secret"));
}

#[test]
fn model_list_and_default_model_are_validated() {
    let config = load(&[
        ("CHAT4O_UPSTREAM_TOKEN", "t"),
        ("CHAT4O_MODELS", "m1, m2"),
        ("CHAT4O_DEFAULT_MODEL", "m2"),
    ])
    .unwrap();
    assert_eq!(config.models, vec!["m1".to_string(), "m2".to_string()]);
    assert_eq!(config.default_model, "m2");

    let first = load(&[("CHAT4O_UPSTREAM_TOKEN", "t"), ("CHAT4O_MODELS", "m1,m2")]).unwrap();
    assert_eq!(first.default_model, "m1");

    assert!(load(&[("CHAT4O_UPSTREAM_TOKEN", "t"), ("CHAT4O_MODELS", " , ")]).is_err());
    assert!(
        load(&[
            ("CHAT4O_UPSTREAM_TOKEN", "t"),
            ("CHAT4O_MODELS", "m1"),
            ("CHAT4O_DEFAULT_MODEL", "m9"),
        ])
        .is_err()
    );
}

#[test]
fn numeric_settings_are_parsed_and_checked() {
    let config = load(&[
        ("CHAT4O_UPSTREAM_TOKEN", "t"),
        ("CHAT4O_SESSION_TIMEOUT_MS", "1500"),
        ("CHAT4O_READ_TIMEOUT_MS", "2500"),
        ("CHAT4O_STREAM_BUFFER", "8"),
    ])
    .unwrap();
    assert_eq!(config.upstream.session_timeout, Duration::from_millis(1500));
    assert_eq!(config.upstream.read_timeout, Duration::from_millis(2500));
    assert_eq!(config.stream_buffer, 8);

    for (key, value) in [
        ("CHAT4O_SESSION_TIMEOUT_MS", "soon"),
        ("CHAT4O_READ_TIMEOUT_MS", "0"),
        ("CHAT4O_STREAM_BUFFER", "-1"),
    ] {
        let err = load(&[("CHAT4O_UPSTREAM_TOKEN", "t"), (key, value)]).unwrap_err();
        assert!(err.message.contains(key), "{key}");
    }
}

#[test]
fn metrics_path_is_validated() {
    let config = load(&[
        ("CHAT4O_UPSTREAM_TOKEN", "t"),
        ("CHAT4O_METRICS_PATH", "/internal/metrics"),
    ])
    .unwrap();
    assert_eq!(config.metrics_path, "/internal/metrics");

    for path in ["metrics", "/", "/v1/models", "/v1/metrics", "/metrics/{id}"] {
        let err = load(&[
            ("CHAT4O_UPSTREAM_TOKEN", "t"),
            ("CHAT4O_METRICS_PATH", path),
        ])
        .unwrap_err();
        assert_eq!(err.code, "config_invalid", "{path}");
        assert!(err.message.contains("CHAT4O_METRICS_PATH"), "{path}");
    }
}

#[tokio::test]
async fn state_builds_from_loaded_config() {
    let config = load(&[("CHAT4O_UPSTREAM_TOKEN", "t")]).unwrap();
    let state = chat4o_relay::app::load_state_with_config(config).expect("state");
    assert_eq!(state.config.models.len(), 1);
}
