//! Inbound webhook server and shared handler state.
//!
//! One POST endpoint takes the raw body (duplicate suppression keys on
//! the exact bytes), classifies it once, and dispatches: commands get a
//! synchronous textual response, platform events are spawned and the
//! response returns immediately.

use std::sync::Arc;

use anyhow::Result;
use axum::routing::post;
use axum::Router;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bridge::{CorrelationStore, DmSessions, MentionRewriter, Topology};
use crate::config::Config;
use crate::directory::{Directory, NameLookup};
use crate::slack::ApiClient;

pub mod commands;
pub mod dedup;
pub mod events;
pub mod router;

pub use dedup::DedupSet;

/// Resolution context shared by every handler: owns the caches, the
/// topology, the correlation store, and the DM session table for the
/// lifetime of the process.
pub struct App {
    pub config: Config,
    pub client: ApiClient,
    pub directory: Directory,
    pub topology: Topology,
    pub correlations: Arc<dyn CorrelationStore>,
    pub sessions: DmSessions,
    pub rewriter: MentionRewriter,
    pub dedup: DedupSet,
}

impl App {
    pub fn new(config: Config, correlations: Arc<dyn CorrelationStore>) -> Self {
        let client = ApiClient::new(&config.credentials);
        let topology = Topology::new(config.lines.clone());
        Self {
            client: client.clone(),
            directory: Directory::new(client),
            topology,
            correlations,
            sessions: DmSessions::new(),
            rewriter: MentionRewriter::new(),
            dedup: DedupSet::default(),
            config,
        }
    }
}

/// Serve the webhook endpoint until the process is shut down.
pub async fn serve(app: Arc<App>, port: u16) -> Result<()> {
    let router = Router::new()
        .route("/", post(router::handle))
        .with_state(app);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Listening on port {}", port);
    axum::serve(listener, router).await?;
    Ok(())
}

/// Pair a user's DM tunnel to a target and confirm it to them.
///
/// Scrubs stale bridge prompts from the initiator's IM history first;
/// the remembered-command hint is only repeated when nothing was
/// scrubbed (a freshly-told user does not need it twice).
pub async fn select_user(
    app: &Arc<App>,
    dmer: &str,
    in_workspace: &str,
    in_channel: &str,
    out_workspace: &str,
    dmee: &str,
    command: Option<&str>,
) {
    app.sessions
        .pair(dmer, dmee, out_workspace, in_channel, command)
        .await;

    let cleaned = clean_channel(app, in_workspace, dmer).await;

    let remote_channel = app
        .topology
        .pair(in_workspace, in_channel, true)
        .map(|pair| pair.channel)
        .unwrap_or_default();
    let name = app
        .directory
        .resolve_user(dmee, &remote_channel, out_workspace, true)
        .await
        .map(|profile| profile.name)
        .unwrap_or_else(|| dmee.to_string());

    let body = serde_json::json!({
        "channel": dmer,
        "text": format!("You are now DM'ing `@{}` from #{}.", name, in_channel),
    });
    if let Err(e) = app.client.post("chat.postMessage", body, in_workspace).await {
        warn!("Failed to confirm DM pairing: {}", e);
    }

    let session = app.sessions.get(dmer).await;
    if !cleaned {
        if let Some(command) = session.command {
            app.client
                .ephemeral(
                    in_workspace,
                    dmer,
                    dmer,
                    &format!("_To change this, use_ *{} dm* _at any time._", command),
                )
                .await;
        }
    }
}

/// Delete the bridge's own trailing prompts from a user's IM history.
///
/// Mirrored messages carry a username override; bare bot messages are
/// the bridge's ephemeral-ish prompts and are removed newest-first
/// until a real message (or the beginning) is reached. Returns whether
/// anything was removed.
pub async fn clean_channel(app: &Arc<App>, workspace: &str, user: &str) -> bool {
    let Some(conversation) = app.directory.im_conversation(user, workspace, None).await else {
        return false;
    };

    let mut modified = false;
    loop {
        let history = match app
            .client
            .get(
                "conversations.history",
                &[("channel", conversation.as_str()), ("limit", "1")],
                workspace,
            )
            .await
        {
            Ok(body) => body,
            Err(e) => {
                debug!("Failed to read IM history for cleanup: {}", e);
                return modified;
            }
        };

        let Some(latest) = history
            .get("messages")
            .and_then(|m| m.as_array())
            .and_then(|m| m.first())
        else {
            return modified;
        };
        if !is_bridge_prompt(latest) {
            return modified;
        }
        let Some(ts) = latest.get("ts").and_then(|t| t.as_str()) else {
            return modified;
        };

        let body = serde_json::json!({ "channel": user, "ts": ts });
        if let Err(e) = app.client.post("chat.delete", body, workspace).await {
            debug!("Failed to scrub bridge prompt: {}", e);
            return modified;
        }
        modified = true;
    }
}

/// The bridged roster of a channel, one backticked name per line.
pub(crate) async fn roster_listing(app: &Arc<App>, workspace: &str, channel: &str) -> String {
    let names = match app.directory.find_by_name("", channel, workspace).await {
        NameLookup::Candidates(names) => names,
        NameLookup::Id(_) => Vec::new(),
    };
    format!("`@{}`", names.join("`\n`@"))
}

/// A message the bridge posted as itself (no username override).
fn is_bridge_prompt(message: &Value) -> bool {
    message.get("bot_id").map_or(false, |b| !b.is_null())
        && message
            .get("username")
            .map_or(true, |u| u.is_null() || u.as_str() == Some(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_bridge_prompt() {
        let prompt = serde_json::json!({"bot_id": "B1", "text": "You are now DM'ing..."});
        assert!(is_bridge_prompt(&prompt));

        let mirrored = serde_json::json!({"bot_id": "B1", "username": "Alice - general"});
        assert!(!is_bridge_prompt(&mirrored));

        let human = serde_json::json!({"user": "U1", "text": "hi"});
        assert!(!is_bridge_prompt(&human));
    }
}
