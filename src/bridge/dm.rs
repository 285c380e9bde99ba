//! Direct-message tunnel sessions.
//!
//! Each initiating user has at most one session. A session is Paired
//! when a target user is set, recording the bridge-channel context that
//! licensed the pairing so reply routing knows which pair to use.
//! Re-pairing replaces the previous target without an explicit unpair
//! step; membership loss of either party invalidates the session.
//! Sessions are ephemeral, in-memory only.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// One user's tunnel state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DmSession {
    /// Remote user the tunnel points at; `None` means Unpaired.
    pub target: Option<String>,
    /// Workspace of the target.
    pub out_workspace: Option<String>,
    /// Local channel whose bridge licensed the pairing.
    pub in_channel: Option<String>,
    /// Invocation command remembered for "to change this, use ..." hints.
    pub command: Option<String>,
}

impl DmSession {
    pub fn is_paired(&self) -> bool {
        self.target.is_some()
    }
}

/// Session table keyed by initiating user id.
#[derive(Default)]
pub struct DmSessions {
    sessions: RwLock<HashMap<String, DmSession>>,
}

impl DmSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session for a user (Unpaired default if none).
    pub async fn get(&self, user: &str) -> DmSession {
        self.sessions.read().await.get(user).cloned().unwrap_or_default()
    }

    /// Pair (or re-pair) a user to a target. The remembered command is
    /// only overwritten when one is supplied.
    pub async fn pair(
        &self,
        user: &str,
        target: &str,
        out_workspace: &str,
        in_channel: &str,
        command: Option<&str>,
    ) {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(user.to_string()).or_default();
        session.target = Some(target.to_string());
        session.out_workspace = Some(out_workspace.to_string());
        session.in_channel = Some(in_channel.to_string());
        if let Some(command) = command {
            session.command = Some(command.to_string());
        }
    }

    /// Invalidate a user's pairing. The licensing channel is kept so a
    /// later command in the same conversation can still infer it.
    pub async fn unpair(&self, user: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(user) {
            session.target = None;
        }
    }

    /// Users whose sessions currently target the given remote user.
    pub async fn partners(&self, target: &str) -> Vec<String> {
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(_, session)| session.target.as_deref() == Some(target))
            .map(|(user, _)| user.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unpaired_by_default() {
        let sessions = DmSessions::new();
        assert!(!sessions.get("U1").await.is_paired());
    }

    #[tokio::test]
    async fn test_pair_and_repair_replaces_target() {
        let sessions = DmSessions::new();
        sessions.pair("U1", "U9", "partner", "general", Some("/bridge")).await;

        let session = sessions.get("U1").await;
        assert_eq!(session.target.as_deref(), Some("U9"));
        assert_eq!(session.in_channel.as_deref(), Some("general"));
        assert_eq!(session.command.as_deref(), Some("/bridge"));

        // Re-pairing replaces the target without an unpair step and
        // keeps the remembered command when none is supplied.
        sessions.pair("U1", "U7", "partner", "dev", None).await;
        let session = sessions.get("U1").await;
        assert_eq!(session.target.as_deref(), Some("U7"));
        assert_eq!(session.in_channel.as_deref(), Some("dev"));
        assert_eq!(session.command.as_deref(), Some("/bridge"));
    }

    #[tokio::test]
    async fn test_unpair_keeps_channel_context() {
        let sessions = DmSessions::new();
        sessions.pair("U1", "U9", "partner", "general", None).await;
        sessions.unpair("U1").await;

        let session = sessions.get("U1").await;
        assert!(!session.is_paired());
        assert_eq!(session.in_channel.as_deref(), Some("general"));
    }

    #[tokio::test]
    async fn test_partners() {
        let sessions = DmSessions::new();
        sessions.pair("U1", "U9", "partner", "general", None).await;
        sessions.pair("U2", "U9", "partner", "general", None).await;
        sessions.pair("U3", "U8", "partner", "general", None).await;

        let mut partners = sessions.partners("U9").await;
        partners.sort();
        assert_eq!(partners, vec!["U1", "U2"]);
    }
}
