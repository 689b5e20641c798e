use crate::config::UpstreamConfig;
use crate::error::AppError;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const SESSION_PATH: &str = "/chatbotSession/addV3";
const CHAT_STREAM_PATH: &str = "/chatbotLog/chat/stream/creditV2";
const SUCCESS_CODE: i64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream status {status}: {body}")]
    Unavailable { status: StatusCode, body: String },
    #[error("upstream returned invalid session data: {0}")]
    AuthOrProtocol(String),
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

impl UpstreamError {
    pub fn kind_label(&self) -> &'static str {
        match self {
            UpstreamError::Unavailable { .. } => "unavailable",
            UpstreamError::AuthOrProtocol(_) => "auth_or_protocol",
            UpstreamError::Transport(_) => "transport",
            UpstreamError::Timeout(_) => "timeout",
        }
    }

    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout(timeout)
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        AppError::internal(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSession {
    pub session_id: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload<'a> {
    site: &'a str,
    first_content: &'a str,
    chat_log_num: &'a str,
    llm_model_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatPayload<'a> {
    site: &'a str,
    chat_log_num: &'a str,
    content: &'a str,
    model_grade: &'a str,
    session_id: &'a str,
    user_message_temp_id: String,
    assistant_message_temp_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    data: Option<SessionData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionData {
    #[serde(default)]
    session_id: Option<Value>,
}

/// Header set the upstream's abuse filter expects from a browser tab.
pub fn browser_headers(config: &UpstreamConfig) -> Result<HeaderMap, AppError> {
    let pairs: [(&'static str, &str); 11] = [
        ("accept", "*/*"),
        ("accept-language", "zh-CN,zh;q=0.9,en;q=0.8"),
        ("origin", &config.origin),
        ("referer", &config.referer),
        ("user-agent", &config.user_agent),
        (
            "sec-ch-ua",
            "\"Chromium\";v=\"142\", \"Google Chrome\";v=\"142\", \"Not_A Brand\";v=\"99\"",
        ),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"Windows\""),
        ("sec-fetch-dest", "empty"),
        ("sec-fetch-mode", "cors"),
        ("sec-fetch-site", "cross-site"),
    ];
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let value = HeaderValue::from_str(value)
            .map_err(|err| AppError::config(format!("invalid header {name}: {err}")))?;
        headers.insert(HeaderName::from_static(name), value);
    }
    Ok(headers)
}

/// Opens a fresh upstream conversation seeded with `prompt`.
pub async fn init_session(
    client: &reqwest::Client,
    config: &UpstreamConfig,
    model: &str,
    prompt: &str,
) -> Result<UpstreamSession, UpstreamError> {
    let payload = SessionPayload {
        site: &config.site,
        first_content: prompt,
        chat_log_num: &config.chat_log_num,
        llm_model_name: model,
    };
    let resp = client
        .post(join_url(&config.base_url, SESSION_PATH))
        .timeout(config.session_timeout)
        .bearer_auth(&config.token)
        .json(&payload)
        .send()
        .await
        .map_err(|err| UpstreamError::from_reqwest(err, config.session_timeout))?;
    let resp = ensure_success(resp).await?;
    let text = resp
        .text()
        .await
        .map_err(|err| UpstreamError::from_reqwest(err, config.session_timeout))?;
    let session_id = parse_session_id(&text)?;
    tracing::debug!(session_id = %session_id, model, "upstream session opened");
    Ok(UpstreamSession {
        session_id,
        model: model.to_string(),
    })
}

/// Posts `prompt` into `session` and hands back the unread streaming response.
pub async fn send_chat(
    client: &reqwest::Client,
    config: &UpstreamConfig,
    session: &UpstreamSession,
    prompt: &str,
) -> Result<reqwest::Response, UpstreamError> {
    let payload = ChatPayload {
        site: &config.site,
        chat_log_num: &config.chat_log_num,
        content: prompt,
        model_grade: "common",
        session_id: &session.session_id,
        user_message_temp_id: temp_message_id(),
        assistant_message_temp_id: temp_message_id(),
    };
    // Bound the response head only; reqwest's request timeout also covers the body.
    let send = client
        .post(join_url(&config.base_url, CHAT_STREAM_PATH))
        .bearer_auth(&config.token)
        .json(&payload)
        .send();
    let resp = tokio::time::timeout(config.session_timeout, send)
        .await
        .map_err(|_| UpstreamError::Timeout(config.session_timeout))?
        .map_err(|err| UpstreamError::from_reqwest(err, config.session_timeout))?;
    tracing::debug!(
        session_id = %session.session_id,
        model = %session.model,
        user_message_temp_id = %payload.user_message_temp_id,
        "upstream chat stream opened"
    );
    ensure_success(resp).await
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(UpstreamError::Unavailable { status, body });
    }
    Ok(resp)
}

fn parse_session_id(text: &str) -> Result<String, UpstreamError> {
    let envelope: SessionEnvelope = serde_json::from_str(text)
        .map_err(|_| UpstreamError::AuthOrProtocol(text.to_string()))?;
    if envelope.code != Some(SUCCESS_CODE) {
        return Err(UpstreamError::AuthOrProtocol(text.to_string()));
    }
    let session_id = envelope
        .data
        .and_then(|d| d.session_id)
        .and_then(|id| match id {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|id| !id.is_empty());
    session_id.ok_or_else(|| UpstreamError::AuthOrProtocol(text.to_string()))
}

/// `<unix millis>-<8 random hex chars>`, unique within a session.
pub fn temp_message_id() -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect();
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), suffix)
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
