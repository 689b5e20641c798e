use crate::error::{AppError, AppResult};
use std::time::Duration;

pub const PROJECT_NAME: &str = "chat4o-relay";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Process-wide settings, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub metrics_path: String,
    /// Inbound bearer key. `None` leaves `/v1/*` open.
    pub master_key: Option<String>,
    pub upstream: UpstreamConfig,
    pub models: Vec<String>,
    pub default_model: String,
    pub stream_buffer: usize,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Bare credential; any `Bearer ` prefix is stripped on load.
    pub token: String,
    pub site: String,
    pub origin: String,
    pub referer: String,
    pub user_agent: String,
    pub chat_log_num: String,
    pub session_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api2.tap4.ai".to_string(),
            token: String::new(),
            site: "chat4o.ai".to_string(),
            origin: "https://chat4o.ai".to_string(),
            referer: "https://chat4o.ai/".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            chat_log_num: "6".to_string(),
            session_timeout: Duration::from_millis(30_000),
            read_timeout: Duration::from_millis(60_000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let default_model = "gemini-2.0-flash-001".to_string();
        Self {
            listen: "0.0.0.0:8080".to_string(),
            metrics_path: "/metrics".to_string(),
            master_key: None,
            upstream: UpstreamConfig::default(),
            models: vec![default_model.clone()],
            default_model,
            stream_buffer: 64,
        }
    }
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `CHAT4O_*` keys resolved through `lookup`.
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Config::default();
        let upstream_defaults = UpstreamConfig::default();

        let token = get("CHAT4O_UPSTREAM_TOKEN")
            .map(|v| strip_bearer(&v).to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::config("CHAT4O_UPSTREAM_TOKEN must be set"))?;

        let models = match get("CHAT4O_MODELS") {
            Some(raw) => parse_model_list(&raw),
            None => defaults.models,
        };
        let Some(first_model) = models.first().cloned() else {
            return Err(AppError::config("CHAT4O_MODELS lists no models"));
        };
        let default_model = get("CHAT4O_DEFAULT_MODEL").unwrap_or(first_model);
        if !models.contains(&default_model) {
            return Err(AppError::config(format!(
                "default model {default_model} is not in CHAT4O_MODELS"
            )));
        }

        let config = Self {
            listen: get("CHAT4O_LISTEN").unwrap_or(defaults.listen),
            metrics_path: match get("CHAT4O_METRICS_PATH") {
                Some(raw) => validate_metrics_path(raw)?,
                None => defaults.metrics_path,
            },
            master_key: normalize_master_key(get("CHAT4O_API_MASTER_KEY")),
            upstream: UpstreamConfig {
                base_url: get("CHAT4O_UPSTREAM_BASE").unwrap_or(upstream_defaults.base_url),
                token,
                site: get("CHAT4O_SITE").unwrap_or(upstream_defaults.site),
                origin: get("CHAT4O_ORIGIN").unwrap_or(upstream_defaults.origin),
                referer: get("CHAT4O_REFERER").unwrap_or(upstream_defaults.referer),
                user_agent: get("CHAT4O_USER_AGENT").unwrap_or(upstream_defaults.user_agent),
                chat_log_num: get("CHAT4O_CHAT_LOG_NUM")
                    .unwrap_or(upstream_defaults.chat_log_num),
                session_timeout: parse_millis(
                    "CHAT4O_SESSION_TIMEOUT_MS",
                    get("CHAT4O_SESSION_TIMEOUT_MS"),
                    upstream_defaults.session_timeout,
                )?,
                read_timeout: parse_millis(
                    "CHAT4O_READ_TIMEOUT_MS",
                    get("CHAT4O_READ_TIMEOUT_MS"),
                    upstream_defaults.read_timeout,
                )?,
            },
            models,
            default_model,
            stream_buffer: match get("CHAT4O_STREAM_BUFFER") {
                Some(raw) => raw
                    .parse::<usize>()
                    .ok()
                    .filter(|v| *v > 0)
                    .ok_or_else(|| {
                        AppError::config(format!("CHAT4O_STREAM_BUFFER is invalid: {raw}"))
                    })?,
                None => defaults.stream_buffer,
            },
        };
        Ok(config)
    }

    pub fn auth_enabled(&self) -> bool {
        self.master_key.is_some()
    }
}

/// `1` is the placeholder key shipped with the console; it means "no auth".
pub fn normalize_master_key(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "1")
}

/// Paths the router already owns; the metrics route must not shadow them.
const RESERVED_PATHS: [&str; 3] = ["/", "/v1/models", "/v1/chat/completions"];

fn validate_metrics_path(raw: String) -> AppResult<String> {
    let invalid = |reason: &str| {
        AppError::config(format!("CHAT4O_METRICS_PATH is invalid: {raw} ({reason})"))
    };
    if !raw.starts_with('/') {
        return Err(invalid("must start with /"));
    }
    if raw.contains(['{', '}']) {
        return Err(invalid("must not contain path parameters"));
    }
    if raw.starts_with("/v1/") || RESERVED_PATHS.contains(&raw.as_str()) {
        return Err(invalid("collides with an API route"));
    }
    Ok(raw)
}

fn strip_bearer(raw: &str) -> &str {
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .unwrap_or(raw)
        .trim()
}

fn parse_model_list(raw: &str) -> Vec<String> {
    let mut models: Vec<String> = Vec::new();
    for model in raw.split(',').map(str::trim).filter(|m| !m.is_empty()) {
        if !models.iter().any(|m| m == model) {
            models.push(model.to_string());
        }
    }
    models
}

fn parse_millis(key: &str, raw: Option<String>, default: Duration) -> AppResult<Duration> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|v| *v > 0)
            .map(Duration::from_millis)
            .ok_or_else(|| AppError::config(format!("{key} is invalid: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_master_key, parse_model_list, strip_bearer};

    #[test]
    fn placeholder_master_key_disables_auth() {
        assert_eq!(normalize_master_key(Some("1".to_string())), None);
        assert_eq!(normalize_master_key(Some("   ".to_string())), None);
        assert_eq!(normalize_master_key(None), None);
        assert_eq!(
            normalize_master_key(Some(" sk-real ".to_string())),
            Some("sk-real".to_string())
        );
    }

    #[test]
    fn model_list_is_trimmed_and_deduplicated() {
        assert_eq!(
            parse_model_list(" a, b ,,a, c "),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn bearer_prefix_is_stripped() {
        assert_eq!(strip_bearer("Bearer abc.def"), "abc.def");
        assert_eq!(strip_bearer("abc.def"), "abc.def");
    }
}
