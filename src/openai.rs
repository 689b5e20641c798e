//! OpenAI chat-completion wire types, inbound and outbound.

use crate::error::{AppError, AppResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const CHUNK_OBJECT: &str = "chat.completion.chunk";
pub const COMPLETION_OBJECT: &str = "chat.completion";
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub part_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageContent {
    pub fn to_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|p| p.part_type.as_deref().is_none_or(|t| t == "text"))
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl ChatRequest {
    /// The text of the most recent `user` message.
    pub fn prompt(&self) -> AppResult<String> {
        if self.messages.is_empty() {
            return Err(AppError::invalid_request("messages must not be empty"));
        }
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_ref().map(MessageContent::to_text).unwrap_or_default())
            .ok_or_else(|| AppError::invalid_request("messages contain no user message"))
    }

    pub fn resolve_model(&self, default_model: &str) -> String {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(default_model)
            .to_string()
    }

    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.delta.content.as_deref()
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first()?.finish_reason.as_deref()
    }

    /// Encodes the chunk as one `data: <json>\n\n` frame.
    pub fn to_sse_frame(&self) -> Bytes {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Bytes::from(format!("data: {json}\n\n"))
    }
}

/// Stamps every chunk of one request with the same id and model.
#[derive(Debug, Clone)]
pub struct ChunkFactory {
    request_id: String,
    model: String,
}

impl ChunkFactory {
    pub fn new(request_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            model: model.into(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn content(&self, text: &str) -> ChatCompletionChunk {
        self.build(
            ChunkDelta {
                content: Some(text.to_string()),
            },
            None,
        )
    }

    pub fn stop(&self) -> ChatCompletionChunk {
        self.build(ChunkDelta::default(), Some("stop"))
    }

    pub fn error(&self, message: &str) -> ChatCompletionChunk {
        self.build(
            ChunkDelta {
                content: Some(format!("\n\n[Error: {message}]")),
            },
            Some("stop"),
        )
    }

    /// Non-streaming response assembled from the concatenated deltas.
    pub fn completion(&self, content: &str) -> Value {
        json!({
            "id": self.request_id,
            "object": COMPLETION_OBJECT,
            "created": now_ts(),
            "model": self.model,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    fn build(&self, delta: ChunkDelta, finish_reason: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.request_id.clone(),
            object: CHUNK_OBJECT.to_string(),
            created: now_ts(),
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
        }
    }
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::{ChatRequest, ChunkFactory};
    use serde_json::{Value, json};

    fn request(body: Value) -> ChatRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn prompt_is_last_user_message() {
        let req = request(json!({
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": "second"},
                {"role": "assistant", "content": "trailing"}
            ]
        }));
        assert_eq!(req.prompt().unwrap(), "second");
    }

    #[test]
    fn prompt_joins_text_parts() {
        let req = request(json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "look"},
                    {"type": "image_url", "image_url": {"url": "http://x"}},
                    {"type": "text", "text": "here"}
                ]
            }]
        }));
        assert_eq!(req.prompt().unwrap(), "look\nhere");
    }

    #[test]
    fn prompt_rejects_empty_and_userless_lists() {
        let empty = request(json!({ "messages": [] }));
        assert_eq!(empty.prompt().unwrap_err().code, "invalid_request");

        let userless = request(json!({
            "messages": [{"role": "system", "content": "be brief"}]
        }));
        assert_eq!(userless.prompt().unwrap_err().code, "invalid_request");
    }

    #[test]
    fn null_content_is_empty_prompt() {
        let req = request(json!({ "messages": [{"role": "user", "content": null}] }));
        assert_eq!(req.prompt().unwrap(), "");
    }

    #[test]
    fn model_falls_back_to_default() {
        let req = request(json!({ "model": "  ", "messages": [] }));
        assert_eq!(req.resolve_model("gemini-2.0-flash-001"), "gemini-2.0-flash-001");
        let req = request(json!({ "model": "custom", "messages": [] }));
        assert_eq!(req.resolve_model("gemini-2.0-flash-001"), "custom");
    }

    #[test]
    fn content_chunk_serializes_null_finish_reason() {
        let factory = ChunkFactory::new("req-1", "m");
        let frame = factory.content("Hi").to_sse_frame();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(text.ends_with("}\n\n"));
        let value: Value = serde_json::from_str(&text[6..text.len() - 2]).unwrap();
        assert_eq!(value["id"], "req-1");
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["choices"][0]["delta"]["content"], "Hi");
        assert!(value["choices"][0]["finish_reason"].is_null());
    }

    #[test]
    fn stop_chunk_has_empty_delta() {
        let chunk = ChunkFactory::new("req-1", "m").stop();
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["choices"][0]["delta"], json!({}));
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
    }
}
