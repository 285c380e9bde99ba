//! Bridge topology resolution.
//!
//! The pairing between a (workspace, channel) and its remote counterpart
//! is declared in the environment as `LINE_<workspace>_<channel>` =
//! `<remote-workspace>#<remote-channel>` and immutable after startup.
//! Symmetry is by convention only: each side declares its own half, and
//! an undeclared side simply resolves to "not bridged".

use std::collections::HashMap;

use tracing::warn;

use crate::config::env::LINE_PREFIX;

/// The remote half of a bridge pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgePair {
    pub workspace: String,
    pub channel: String,
}

/// Static lookup of configured bridge pairs. No mutation, no network.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Raw declarations keyed by environment variable name.
    lines: HashMap<String, String>,
}

impl Topology {
    pub fn new(lines: HashMap<String, String>) -> Self {
        Self { lines }
    }

    /// Look up the remote counterpart of a (workspace, channel).
    ///
    /// Absent or malformed declarations yield `None`; absence is logged
    /// unless `quiet` (bootstrap probes every channel this way).
    pub fn pair(&self, workspace: &str, channel: &str, quiet: bool) -> Option<BridgePair> {
        let key = format!("{}{}_{}", LINE_PREFIX, escaped(workspace), escaped(channel));
        let Some(value) = self.lines.get(&key) else {
            if !quiet {
                warn!("Environment is missing ${}", key);
            }
            return None;
        };

        let mut parts = value.splitn(2, '#');
        match (parts.next(), parts.next()) {
            (Some(remote_workspace), Some(remote_channel))
                if !remote_workspace.is_empty()
                    && !remote_channel.is_empty()
                    && !remote_channel.contains('#') =>
            {
                Some(BridgePair {
                    workspace: remote_workspace.to_string(),
                    channel: remote_channel.to_string(),
                })
            }
            _ => {
                warn!("Environment variable ${} is not #-delimited", key);
                None
            }
        }
    }
}

/// Escape a workspace/channel name for use in a variable name.
fn escaped(name: &str) -> String {
    name.replace('-', "__hyphen__")
}
