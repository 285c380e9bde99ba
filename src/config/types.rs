//! Configuration type definitions.

use std::collections::HashMap;

/// Root configuration structure.
///
/// Loaded once at startup from the environment and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the inbound webhook listener.
    pub port: u16,
    /// One credential per connected workspace, in `TOKEN_<n>` order.
    pub credentials: Vec<WorkspaceCredential>,
    /// Raw bridge declarations keyed by environment variable name
    /// (`LINE_<workspace>_<channel>`), consumed by the topology resolver.
    pub lines: HashMap<String, String>,
    /// Optional database URL selecting the durable correlation store.
    pub database_url: Option<String>,
}

/// Credential for one connected workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceCredential {
    /// Workspace domain the credential belongs to.
    pub workspace: String,
    /// Bearer credential for the platform Web API.
    pub token: String,
}
