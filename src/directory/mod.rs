//! Identity resolution and caching.
//!
//! Resolves opaque platform identifiers (users, channels, workspaces)
//! into stable display names and back. Every attribute cache is
//! memoize-once: an identifier maps to at most one attribute set for the
//! lifetime of the process, with no expiry. The reverse name index is the
//! only mutable-over-time structure, updated on membership events.
//!
//! Lock discipline: guards are never held across an await. Lookups check
//! the cache under a read lock, resolve over the network with no lock
//! held, then insert-if-vacant under a write lock, which preserves
//! memoize-once under concurrent misses.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::bridge::topology::Topology;
use crate::config::WorkspaceCredential;
use crate::slack::ApiClient;

/// Resolved user attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub name: String,
    pub avatar: Option<String>,
}

/// Result of a display-name lookup in a (workspace, channel) scope.
#[derive(Debug, Clone, PartialEq)]
pub enum NameLookup {
    /// Exactly one user in scope has this display name.
    Id(String),
    /// No exact match; the sorted set of known names in scope, for
    /// "did you mean" suggestions.
    Candidates(Vec<String>),
}

/// Reverse-index scope: one bridged channel in one workspace.
type Scope = (String, String);

/// Identity cache and directory client.
pub struct Directory {
    client: ApiClient,
    /// Channel id -> display name.
    channels: RwLock<HashMap<String, String>>,
    /// User id -> resolved profile.
    users: RwLock<HashMap<String, UserProfile>>,
    /// (workspace, channel) -> display name -> user id. BTreeMap keeps
    /// candidate sets sorted.
    names: RwLock<HashMap<Scope, BTreeMap<String, String>>>,
    /// Channel id -> owning workspace (team) id.
    teams: RwLock<HashMap<String, String>>,
    /// Workspace (team) id -> domain.
    workspaces: RwLock<HashMap<String, String>>,
    /// Workspace domain -> remote user id -> IM conversation id.
    ims: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl Directory {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            channels: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
            teams: RwLock::new(HashMap::new()),
            workspaces: RwLock::new(HashMap::new()),
            ims: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a channel's display name, memoized.
    ///
    /// Fails soft: lookup errors are logged and yield `None`.
    pub async fn resolve_channel(&self, id: &str, workspace: &str) -> Option<String> {
        if let Some(name) = self.channels.read().await.get(id) {
            return Some(name.clone());
        }

        let body = match self
            .client
            .get("conversations.info", &[("channel", id)], workspace)
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to resolve channel {}: {}", id, e);
                return None;
            }
        };
        let name = body
            .get("channel")
            .and_then(|c| c.get("name"))
            .and_then(|n| n.as_str())?
            .to_string();

        let mut channels = self.channels.write().await;
        Some(channels.entry(id.to_string()).or_insert(name).clone())
    }

    /// Resolve a user's display name and avatar, memoized.
    ///
    /// With `update`, also registers the (workspace, channel, name) -> id
    /// reverse mapping. Pass `update = false` to look a user up without
    /// assuming channel membership (e.g. a mention of an outsider).
    pub async fn resolve_user(
        &self,
        id: &str,
        channel: &str,
        workspace: &str,
        update: bool,
    ) -> Option<UserProfile> {
        let cached = self.users.read().await.get(id).cloned();
        let profile = match cached {
            Some(profile) => profile,
            None => {
                let body = match self.client.get("users.info", &[("user", id)], workspace).await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Failed to resolve user {}: {}", id, e);
                        return None;
                    }
                };
                let info = body.get("user")?.get("profile")?;
                let profile = UserProfile {
                    name: info.get("real_name")?.as_str()?.to_string(),
                    avatar: info
                        .get("image_512")
                        .and_then(|a| a.as_str())
                        .map(str::to_string),
                };

                let mut users = self.users.write().await;
                users.entry(id.to_string()).or_insert(profile).clone()
            }
        };

        if update {
            self.register_name(workspace, channel, &profile.name, id).await;
        }
        Some(profile)
    }

    /// Register a name -> id mapping in a channel scope.
    pub(crate) async fn register_name(&self, workspace: &str, channel: &str, name: &str, id: &str) {
        let mut names = self.names.write().await;
        names
            .entry((workspace.to_string(), channel.to_string()))
            .or_default()
            .insert(name.to_string(), id.to_string());
    }

    /// Remove the reverse-index entry for a user in a channel scope.
    ///
    /// Uses only the cached profile: a user never resolved in this
    /// process has nothing to forget.
    pub async fn forget_user(&self, id: &str, channel: &str, workspace: &str) {
        let name = match self.users.read().await.get(id) {
            Some(profile) => profile.name.clone(),
            None => return,
        };
        let mut names = self.names.write().await;
        if let Some(scope) = names.get_mut(&(workspace.to_string(), channel.to_string())) {
            scope.remove(&name);
        }
    }

    /// Find a user id by exact display name in a channel scope.
    ///
    /// No exact match returns the sorted set of known names in scope.
    pub async fn find_by_name(&self, name: &str, channel: &str, workspace: &str) -> NameLookup {
        let names = self.names.read().await;
        let scope = names.get(&(workspace.to_string(), channel.to_string()));
        if let Some(id) = scope.and_then(|s| s.get(name)) {
            return NameLookup::Id(id.clone());
        }
        NameLookup::Candidates(
            scope
                .map(|s| s.keys().cloned().collect())
                .unwrap_or_default(),
        )
    }

    /// Whether a user is currently in the roster of a bridged channel.
    pub async fn is_member(&self, workspace: &str, channel: &str, id: &str) -> bool {
        let Some(profile) = self.resolve_user(id, channel, workspace, false).await else {
            return false;
        };
        matches!(
            self.find_by_name(&profile.name, channel, workspace).await,
            NameLookup::Id(_)
        )
    }

    /// Resolve a workspace (team) id to its domain, memoized.
    pub async fn resolve_workspace(&self, team_id: &str) -> Option<String> {
        if let Some(domain) = self.workspaces.read().await.get(team_id) {
            return Some(domain.clone());
        }

        let body = match self.client.get("team.info", &[("team", team_id)], "").await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to resolve workspace {}: {}", team_id, e);
                return None;
            }
        };
        let domain = body
            .get("team")
            .and_then(|t| t.get("domain"))
            .and_then(|d| d.as_str())?
            .to_string();

        let mut workspaces = self.workspaces.write().await;
        Some(workspaces.entry(team_id.to_string()).or_insert(domain).clone())
    }

    /// Workspace (team) id owning a channel, if observed at bootstrap.
    pub async fn resolve_team(&self, channel_id: &str) -> Option<String> {
        self.teams.read().await.get(channel_id).cloned()
    }

    /// Resolve the IM conversation for a remote user.
    ///
    /// With `init`, seeds the index instead of looking it up. On a miss
    /// without `init`, enumerates the workspace's IM conversations and
    /// indexes every previously-unseen one.
    pub async fn im_conversation(
        &self,
        user: &str,
        workspace: &str,
        init: Option<&str>,
    ) -> Option<String> {
        {
            let mut ims = self.ims.write().await;
            let scope = ims.entry(workspace.to_string()).or_default();
            if let Some(id) = scope.get(user) {
                return Some(id.clone());
            }
            if let Some(id) = init {
                scope.insert(user.to_string(), id.to_string());
                return Some(id.to_string());
            }
        }

        let channels = match self
            .client
            .paged("conversations.list", &[("types", "im")], "channels", workspace)
            .await
        {
            Ok(channels) => channels,
            Err(e) => {
                warn!(
                    "Workspace '{}' missing OAuth scope im:read ({})? {}",
                    workspace, user, e
                );
                return None;
            }
        };

        let mut ims = self.ims.write().await;
        let scope = ims.entry(workspace.to_string()).or_default();
        for channel in channels {
            if let (Some(owner), Some(id)) = (
                channel.get("user").and_then(|u| u.as_str()),
                channel.get("id").and_then(|i| i.as_str()),
            ) {
                scope.entry(owner.to_string()).or_insert_with(|| id.to_string());
            }
        }
        scope.get(user).cloned()
    }

    /// Reverse of [`im_conversation`]: the remote user an IM belongs to.
    pub async fn im_user(&self, conversation: &str, workspace: &str) -> Option<String> {
        let ims = self.ims.read().await;
        let scope = ims.get(workspace)?;
        scope
            .iter()
            .find(|(_, id)| id.as_str() == conversation)
            .map(|(user, _)| user.clone())
    }

    /// Bootstrap the directory for one credential: fetch the workspace
    /// identity, enumerate its conversations, and pre-populate rosters of
    /// bridged channels and the IM index.
    ///
    /// Failures degrade: a missing permission scope disables the affected
    /// capability (name resolution stays empty) without halting startup.
    pub async fn bootstrap(&self, credential: &WorkspaceCredential, topology: &Topology) -> bool {
        let identity = match self
            .client
            .get_with_token("team.info", &[], &credential.token)
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to authenticate workspace '{}': {}", credential.workspace, e);
                return false;
            }
        };
        let (Some(team_id), Some(domain)) = (
            identity
                .get("team")
                .and_then(|t| t.get("id"))
                .and_then(|i| i.as_str()),
            identity
                .get("team")
                .and_then(|t| t.get("domain"))
                .and_then(|d| d.as_str()),
        ) else {
            warn!("Workspace identity response missing team id/domain");
            return false;
        };
        self.workspaces
            .write()
            .await
            .entry(team_id.to_string())
            .or_insert_with(|| domain.to_string());

        let channels = match self
            .client
            .paged_with_token(
                "conversations.list",
                &[("types", "public_channel,private_channel,im")],
                "channels",
                &credential.token,
            )
            .await
        {
            Ok(channels) => channels,
            Err(e) => {
                warn!(
                    "Missing OAuth scope channels:read, groups:read, and/or im:read? {}",
                    e
                );
                return false;
            }
        };

        for channel in channels {
            let id = channel.get("id").and_then(|i| i.as_str()).unwrap_or_default();
            let name = channel.get("name").and_then(|n| n.as_str()).unwrap_or_default();
            let is_im = channel.get("is_im").and_then(|i| i.as_bool()).unwrap_or(false);

            if !is_im && topology.pair(domain, name, true).is_none() {
                continue;
            }
            self.teams
                .write()
                .await
                .insert(id.to_string(), team_id.to_string());

            if is_im {
                if let Some(owner) = channel.get("user").and_then(|u| u.as_str()) {
                    self.im_conversation(owner, domain, Some(id)).await;
                }
                continue;
            }

            let members = match self
                .client
                .paged("conversations.members", &[("channel", id)], "members", domain)
                .await
            {
                Ok(members) => members,
                Err(e) => {
                    warn!("Failed to enumerate members of #{}: {}", name, e);
                    continue;
                }
            };
            for member in members.iter().filter_map(|m| m.as_str()) {
                self.resolve_user(member, name, domain, true).await;
            }
            debug!("Indexed {} members of #{} ({})", members.len(), name, domain);
        }

        info!("Bootstrapped workspace '{}' ({})", domain, team_id);
        true
    }

    /// Profile seeding for tests that must avoid the network.
    #[cfg(test)]
    pub(crate) async fn seed_profile(&self, id: &str, name: &str) {
        self.users.write().await.insert(
            id.to_string(),
            UserProfile {
                name: name.to_string(),
                avatar: None,
            },
        );
    }

    /// Workspace seeding for tests that must avoid the network.
    #[cfg(test)]
    pub(crate) async fn seed_workspace(&self, team_id: &str, domain: &str) {
        self.workspaces
            .write()
            .await
            .insert(team_id.to_string(), domain.to_string());
    }

    /// Channel-name seeding for tests that must avoid the network.
    #[cfg(test)]
    pub(crate) async fn seed_channel(&self, id: &str, name: &str) {
        self.channels
            .write()
            .await
            .insert(id.to_string(), name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_directory() -> Directory {
        Directory::new(ApiClient::new(&[]))
    }

    #[tokio::test]
    async fn test_find_by_name_exact() {
        let directory = make_directory();
        directory.register_name("acme", "general", "Alice Adams", "U1").await;
        directory.register_name("acme", "general", "Bob Brown", "U2").await;

        assert_eq!(
            directory.find_by_name("Alice Adams", "general", "acme").await,
            NameLookup::Id("U1".to_string())
        );
    }

    #[tokio::test]
    async fn test_find_by_name_candidates_sorted() {
        let directory = make_directory();
        directory.register_name("acme", "general", "Zoe", "U3").await;
        directory.register_name("acme", "general", "Alice", "U1").await;
        directory.register_name("acme", "general", "Bob", "U2").await;

        match directory.find_by_name("Nobody", "general", "acme").await {
            NameLookup::Candidates(names) => {
                assert_eq!(names, vec!["Alice", "Bob", "Zoe"]);
            }
            other => panic!("expected candidates, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_find_by_name_scoped() {
        let directory = make_directory();
        directory.register_name("acme", "general", "Alice", "U1").await;

        // Same name, different scope: not found there.
        match directory.find_by_name("Alice", "dev", "acme").await {
            NameLookup::Candidates(names) => assert!(names.is_empty()),
            other => panic!("expected empty candidates, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forget_user() {
        let directory = make_directory();
        directory.seed_profile("U1", "Alice").await;
        directory.register_name("acme", "general", "Alice", "U1").await;

        directory.forget_user("U1", "general", "acme").await;
        match directory.find_by_name("Alice", "general", "acme").await {
            NameLookup::Candidates(names) => assert!(names.is_empty()),
            other => panic!("expected candidates, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forget_unknown_user_is_noop() {
        let directory = make_directory();
        directory.register_name("acme", "general", "Alice", "U1").await;

        // U2 was never resolved; the index is untouched.
        directory.forget_user("U2", "general", "acme").await;
        assert_eq!(
            directory.find_by_name("Alice", "general", "acme").await,
            NameLookup::Id("U1".to_string())
        );
    }

    #[tokio::test]
    async fn test_im_index_seed_and_reverse() {
        let directory = make_directory();
        let seeded = directory.im_conversation("U9", "acme", Some("D42")).await;
        assert_eq!(seeded.as_deref(), Some("D42"));

        // Seeding is memoize-once.
        let again = directory.im_conversation("U9", "acme", Some("D43")).await;
        assert_eq!(again.as_deref(), Some("D42"));

        assert_eq!(directory.im_user("D42", "acme").await.as_deref(), Some("U9"));
        assert_eq!(directory.im_user("D42", "partner").await, None);
    }

    #[tokio::test]
    async fn test_resolve_team_unknown() {
        let directory = make_directory();
        assert_eq!(directory.resolve_team("C404").await, None);
    }
}
