//! Inbound payload routing.
//!
//! Classifies each request body exactly once and dispatches on the
//! variant. Commands are answered synchronously; platform events are
//! handled in a spawned task so the transport gets its acknowledgement
//! immediately; handshakes echo their challenge; anything else is
//! logged and acknowledged.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use tracing::{info, warn};

use crate::server::{commands, events, App};
use crate::slack::InboundPayload;

/// Handle one webhook delivery.
pub async fn handle(State(app): State<Arc<App>>, body: Bytes) -> String {
    if body.is_empty() {
        warn!("Empty request payload");
        return "Empty request payload".to_string();
    }

    if !app.dedup.insert(&body) {
        info!("Acknowledging duplicate request");
        return String::new();
    }

    match InboundPayload::parse(&body) {
        InboundPayload::Handshake { challenge } => challenge,
        InboundPayload::Command(command) => commands::handle_command(&app, command).await,
        InboundPayload::Event(envelope) => {
            let Some(event) = envelope.event else {
                warn!("event_callback without associated event in payload");
                return "event_callback without associated event".to_string();
            };
            let app = Arc::clone(&app);
            tokio::spawn(async move {
                events::handle_event(app, event).await;
            });
            String::new()
        }
        InboundPayload::Unknown(kind) => {
            let kind = kind.unwrap_or_default();
            warn!("Unhandled request type in payload: '{}'", kind);
            format!("Unhandled request type: '{}'", kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::bridge::MemoryStore;
    use crate::config::Config;

    fn make_app() -> Arc<App> {
        let config = Config {
            port: 0,
            credentials: Vec::new(),
            lines: HashMap::new(),
            database_url: None,
        };
        Arc::new(App::new(config, Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn test_handshake_echoes_challenge() {
        let app = make_app();
        let body = Bytes::from_static(br#"{"type":"url_verification","challenge":"tok123"}"#);
        assert_eq!(handle(State(app), body).await, "tok123");
    }

    #[tokio::test]
    async fn test_duplicate_payload_acknowledged_without_reprocessing() {
        let app = make_app();
        let body = Bytes::from_static(br#"{"type":"url_verification","challenge":"tok123"}"#);

        assert_eq!(handle(State(Arc::clone(&app)), body.clone()).await, "tok123");
        // The retried delivery is acknowledged, not re-answered.
        assert_eq!(handle(State(app), body).await, "");
    }

    #[tokio::test]
    async fn test_unknown_type_acknowledged_with_text() {
        let app = make_app();
        let body = Bytes::from_static(br#"{"type":"app_rate_limited"}"#);
        let response = handle(State(app), body).await;
        assert!(response.contains("app_rate_limited"));
    }

    #[tokio::test]
    async fn test_help_command_answered_synchronously() {
        let app = make_app();
        let body = Bytes::from_static(
            b"command=%2Fbridge&text=help&user_id=U1&channel_name=directmessage&team_domain=acme",
        );
        let response = handle(State(app), body).await;
        assert!(response.contains("Supported commands:"));
        assert!(response.contains("/bridge dm"));
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let app = make_app();
        assert_eq!(handle(State(app), Bytes::new()).await, "Empty request payload");
    }
}
