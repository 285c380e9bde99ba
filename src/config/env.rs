//! Environment variable configuration loading.
//!
//! The deployment surface is environment-based:
//! - `PORT` - inbound webhook listening port (required)
//! - `TOKEN_<n>` - `<workspace-domain>#<credential>`, one per workspace,
//!   numbered from 0; the first gap ends the list
//! - `LINE_<workspace>_<channel>` - `<remote-workspace>#<remote-channel>`
//!   bridge declaration; `-` in names is written as `__hyphen__`
//! - `DATABASE_URL` - optional durable correlation store
//!
//! Logging verbosity is controlled by `RUST_LOG` (tracing env-filter).

use std::collections::HashMap;
use std::env;

use tracing::warn;

use crate::common::error::ConfigError;
use crate::config::types::{Config, WorkspaceCredential};

/// Prefix of bridge declaration variables.
pub const LINE_PREFIX: &str = "LINE_";

/// Load configuration from the process environment.
pub fn load_from_env() -> Result<Config, ConfigError> {
    let port = match env::var("PORT") {
        Ok(value) => value
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort { value })?,
        Err(_) => return Err(ConfigError::MissingPort),
    };

    let mut credentials = Vec::new();
    let mut index = 0;
    while let Ok(raw) = env::var(format!("TOKEN_{}", index)) {
        match parse_credential(&raw) {
            Some(credential) => credentials.push(credential),
            None => warn!("Environment variable $TOKEN_{} is not #-delimited", index),
        }
        index += 1;
    }

    let lines: HashMap<String, String> = env::vars()
        .filter(|(key, _)| key.starts_with(LINE_PREFIX))
        .collect();

    Ok(Config {
        port,
        credentials,
        lines,
        database_url: env::var("DATABASE_URL").ok(),
    })
}

/// Parse a `<workspace>#<token>` credential declaration.
fn parse_credential(raw: &str) -> Option<WorkspaceCredential> {
    let mut parts = raw.splitn(2, '#');
    let workspace = parts.next()?;
    let token = parts.next()?;
    if workspace.is_empty() || token.is_empty() || token.contains('#') {
        return None;
    }
    Some(WorkspaceCredential {
        workspace: workspace.to_string(),
        token: token.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credential() {
        let credential = parse_credential("acme#xoxb-123").unwrap();
        assert_eq!(credential.workspace, "acme");
        assert_eq!(credential.token, "xoxb-123");
    }

    #[test]
    fn test_parse_credential_malformed() {
        assert!(parse_credential("no-delimiter").is_none());
        assert!(parse_credential("too#many#parts").is_none());
        assert!(parse_credential("#empty-workspace").is_none());
        assert!(parse_credential("empty-token#").is_none());
    }
}
