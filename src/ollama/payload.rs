//! Message and payload construction shared by the blocking, async and
//! streaming call paths, plus the interpretation of a finished reply.

use tracing::warn;

use super::bias::apply_precision_bias;
use super::types::{ChatChunk, ChatMessage, ChatOptions, ChatPayload, ChatReply, Role};
use crate::config::DecodingParams;

/// One chat completion request, independent of how it is executed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub user_content: String,
    pub system_content: Option<String>,
    pub decoding: DecodingParams,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, user_content: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            user_content: user_content.into(),
            system_content: None,
            decoding: DecodingParams::default(),
        }
    }

    pub fn with_system(mut self, system_content: impl Into<String>) -> Self {
        let system = system_content.into();
        self.system_content = if system.trim().is_empty() {
            None
        } else {
            Some(system)
        };
        self
    }

    pub fn with_decoding(mut self, decoding: DecodingParams) -> Self {
        self.decoding = decoding;
        self
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref system) = self.system_content {
            messages.push(ChatMessage {
                role: Role::System,
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: Role::User,
            content: self.user_content.clone(),
        });
        messages
    }

    pub fn payload(&self, stream: bool, keep_alive: &str) -> ChatPayload {
        ChatPayload {
            model: self.model.clone(),
            messages: self.messages(),
            stream,
            keep_alive: Some(keep_alive.to_string()),
            options: ChatOptions {
                temperature: Some(self.decoding.temperature),
                top_p: Some(self.decoding.top_p),
                num_predict: None,
            },
        }
    }
}

/// Minimal one-token request used by the availability probe.
pub fn probe_payload(model: &str) -> ChatPayload {
    ChatPayload {
        model: model.to_string(),
        messages: vec![ChatMessage {
            role: Role::User,
            content: "test".to_string(),
        }],
        stream: false,
        keep_alive: None,
        options: ChatOptions {
            temperature: None,
            top_p: None,
            num_predict: Some(1),
        },
    }
}

/// Turn a 2xx body into a reply. A body without `message.content` is not an
/// error: it yields an empty reply and a warning, because retrying will not
/// change its shape.
pub fn interpret_reply(model: &str, raw: serde_json::Value, precision_bias: f64) -> ChatReply {
    let content = serde_json::from_value::<ChatChunk>(raw.clone())
        .ok()
        .and_then(|chunk| chunk.content().map(str::to_string));

    match content {
        Some(text) => ChatReply {
            content: apply_precision_bias(&text, precision_bias),
            raw,
            well_formed: true,
        },
        None => {
            warn!(model = %model, "Reply has no message.content, returning empty reply");
            ChatReply {
                content: String::new(),
                raw,
                well_formed: false,
            }
        }
    }
}

/// Truncate an error body for logs and diagnostics without splitting a
/// multi-byte character.
pub(crate) fn excerpt(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_messages_with_system() {
        let req = ChatRequest::new("m", "hello").with_system("be terse");
        let messages = req.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "hello");
    }

    #[test]
    fn test_blank_system_is_dropped() {
        let req = ChatRequest::new("m", "hello").with_system("   ");
        assert_eq!(req.messages().len(), 1);
    }

    #[test]
    fn test_payload_carries_decoding_but_not_bias() {
        let req = ChatRequest::new("m", "hi").with_decoding(DecodingParams {
            temperature: 0.2,
            top_p: 0.5,
            precision_bias: 0.9,
        });
        let body = serde_json::to_value(req.payload(true, "5m")).expect("should serialize");
        assert_eq!(body["stream"], true);
        assert_eq!(body["options"]["temperature"], 0.2);
        assert_eq!(body["options"]["top_p"], 0.5);
        assert!(!body.to_string().contains("precision"));
    }

    #[test]
    fn test_probe_payload_requests_one_token() {
        let body = serde_json::to_value(probe_payload("m")).expect("should serialize");
        assert_eq!(body["options"]["num_predict"], 1);
        assert_eq!(body["messages"][0]["content"], "test");
        assert!(body.get("keep_alive").is_none());
    }

    #[test]
    fn test_interpret_reply_extracts_content() {
        let reply = interpret_reply(
            "m",
            json!({"message": {"role": "assistant", "content": "{\"has_command\": true}"}}),
            0.0,
        );
        assert!(reply.well_formed);
        assert_eq!(reply.content, "{\"has_command\": true}");
    }

    #[test]
    fn test_interpret_reply_malformed_is_empty() {
        let reply = interpret_reply("m", json!({"unexpected": 1}), 0.0);
        assert!(!reply.well_formed);
        assert!(reply.content.is_empty());
        assert_eq!(reply.raw["unexpected"], 1);
    }

    #[test]
    fn test_interpret_reply_applies_bias() {
        let reply = interpret_reply(
            "m",
            json!({"message": {"content": "{\"has_command\": true}"}}),
            0.9,
        );
        assert_eq!(reply.content, "{\"has_command\":false}");
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("模型不可用", 2), "模型");
        assert_eq!(excerpt("ok", 10), "ok");
    }
}
