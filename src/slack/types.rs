//! Inbound payload model.
//!
//! Everything the webhook endpoint receives is classified exactly once,
//! at the boundary, into a tagged variant; handlers dispatch on the
//! variant instead of probing fields.

use serde::Deserialize;

/// A classified inbound payload.
#[derive(Debug, Clone)]
pub enum InboundPayload {
    /// Endpoint verification handshake; the challenge must be echoed back.
    Handshake { challenge: String },
    /// Slash command (form-encoded, synchronous response).
    Command(SlashCommand),
    /// Platform event callback (asynchronous dispatch).
    Event(EventEnvelope),
    /// Anything else; logged and acknowledged without processing.
    Unknown(Option<String>),
}

impl InboundPayload {
    /// Classify a raw request body.
    ///
    /// JSON bodies are event envelopes or handshakes discriminated by
    /// their `type` field; form-encoded bodies are slash commands.
    pub fn parse(body: &[u8]) -> InboundPayload {
        if body.first() == Some(&b'{') {
            let value: serde_json::Value = match serde_json::from_slice(body) {
                Ok(value) => value,
                Err(_) => return InboundPayload::Unknown(None),
            };
            let kind = value
                .get("type")
                .and_then(|t| t.as_str())
                .map(str::to_string);
            return match kind.as_deref() {
                Some("url_verification") => {
                    let challenge = value
                        .get("challenge")
                        .and_then(|c| c.as_str())
                        .unwrap_or_default()
                        .to_string();
                    InboundPayload::Handshake { challenge }
                }
                Some("event_callback") => match serde_json::from_value(value) {
                    Ok(envelope) => InboundPayload::Event(envelope),
                    Err(_) => InboundPayload::Unknown(Some("event_callback".to_string())),
                },
                _ => InboundPayload::Unknown(kind.clone()),
            };
        }

        InboundPayload::Command(SlashCommand::from_form(body))
    }
}

/// Slash command payload, decoded from a form-encoded body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlashCommand {
    /// The invocation name as typed, e.g. `/bridge`.
    pub command: String,
    /// Everything after the invocation name.
    pub text: String,
    pub user_id: String,
    pub channel_id: String,
    /// Channel name, or `directmessage` for DM conversations.
    pub channel_name: String,
    pub team_domain: String,
}

impl SlashCommand {
    /// Decode from form-encoded key/value pairs; absent keys are empty.
    pub fn from_form(body: &[u8]) -> SlashCommand {
        let mut command = SlashCommand::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            let value = value.into_owned();
            match key.as_ref() {
                "command" => command.command = value,
                "text" => command.text = value,
                "user_id" => command.user_id = value,
                "channel_id" => command.channel_id = value,
                "channel_name" => command.channel_name = value,
                "team_domain" => command.team_domain = value,
                _ => {}
            }
        }
        command
    }
}

/// Envelope wrapping a platform event callback.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    #[serde(default)]
    pub event: Option<Event>,
}

/// A platform event.
///
/// One permissive shape for every event type; handlers pick the fields
/// their discriminant guarantees and treat the rest as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Event {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    /// Thread ancestor timestamp for threaded replies.
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    /// `im` for direct-message conversations, `channel` otherwise.
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    /// Set when the author is a bot (including this bridge).
    #[serde(default)]
    pub bot_id: Option<String>,
    /// Timestamp of the removed message (`message_deleted`).
    #[serde(default)]
    pub deleted_ts: Option<String>,
    /// The edited message (`message_changed`).
    #[serde(default)]
    pub message: Option<NestedMessage>,
    /// The reacted-to item (`reaction_added`).
    #[serde(default)]
    pub item: Option<ReactionItem>,
}

/// Nested message carried by `message_changed` events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NestedMessage {
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

/// Item referenced by a `reaction_added` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReactionItem {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_handshake() {
        let body = br#"{"type":"url_verification","challenge":"abc123"}"#;
        match InboundPayload::parse(body) {
            InboundPayload::Handshake { challenge } => assert_eq!(challenge, "abc123"),
            other => panic!("expected handshake, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_event() {
        let body = br#"{"type":"event_callback","event":{"type":"message","text":"hi","ts":"1.0","channel":"C1","team":"T1","user":"U1"}}"#;
        match InboundPayload::parse(body) {
            InboundPayload::Event(envelope) => {
                let event = envelope.event.unwrap();
                assert_eq!(event.kind, "message");
                assert_eq!(event.text.as_deref(), Some("hi"));
                assert_eq!(event.channel.as_deref(), Some("C1"));
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_command() {
        let body = b"command=%2Fbridge&text=list+general&user_id=U1&channel_id=C1&channel_name=general&team_domain=acme";
        match InboundPayload::parse(body) {
            InboundPayload::Command(cmd) => {
                assert_eq!(cmd.command, "/bridge");
                assert_eq!(cmd.text, "list general");
                assert_eq!(cmd.channel_name, "general");
                assert_eq!(cmd.team_domain, "acme");
            }
            other => panic!("expected command, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_unknown_type() {
        let body = br#"{"type":"app_rate_limited"}"#;
        match InboundPayload::parse(body) {
            InboundPayload::Unknown(kind) => assert_eq!(kind.as_deref(), Some("app_rate_limited")),
            other => panic!("expected unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_message_changed_fields() {
        let body = br#"{"type":"event_callback","event":{"type":"message","subtype":"message_changed","channel":"C1","team":"T1","message":{"ts":"2.0","text":"edited","user":"U1"}}}"#;
        match InboundPayload::parse(body) {
            InboundPayload::Event(envelope) => {
                let event = envelope.event.unwrap();
                assert_eq!(event.subtype.as_deref(), Some("message_changed"));
                let nested = event.message.unwrap();
                assert_eq!(nested.ts.as_deref(), Some("2.0"));
                assert_eq!(nested.text.as_deref(), Some("edited"));
            }
            other => panic!("expected event, got {:?}", other),
        }
    }
}
