//! Configuration validation.
//!
//! Fatal problems (missing port, unreachable database) are raised by the
//! loader and provisioner; everything here degrades, so validation only
//! collects warnings for startup logging.

use crate::config::types::Config;

/// Collect non-fatal configuration warnings.
pub fn validate_config(config: &Config) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.credentials.is_empty() {
        warnings.push(
            "Environment is missing $TOKEN_0 or it is not #-delimited; \
             only endpoint verification is supported in this configuration"
                .to_string(),
        );
    }

    if config.lines.is_empty() {
        warnings.push("No $LINE_* bridge declarations; no channels are bridged".to_string());
    }

    for (key, value) in &config.lines {
        let mut parts = value.splitn(2, '#');
        let well_formed = matches!(
            (parts.next(), parts.next()),
            (Some(workspace), Some(channel))
                if !workspace.is_empty() && !channel.is_empty() && !channel.contains('#')
        );
        if !well_formed {
            warnings.push(format!("Environment variable ${} is not #-delimited", key));
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_config() -> Config {
        let mut lines = HashMap::new();
        lines.insert("LINE_acme_general".to_string(), "partner#general".to_string());
        Config {
            port: 8080,
            credentials: vec![crate::config::types::WorkspaceCredential {
                workspace: "acme".to_string(),
                token: "xoxb-123".to_string(),
            }],
            lines,
            database_url: None,
        }
    }

    #[test]
    fn test_valid_config_no_warnings() {
        assert!(validate_config(&make_config()).is_empty());
    }

    #[test]
    fn test_missing_credentials_warns() {
        let mut config = make_config();
        config.credentials.clear();
        let warnings = validate_config(&config);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("TOKEN_0"));
    }

    #[test]
    fn test_malformed_line_warns() {
        let mut config = make_config();
        config
            .lines
            .insert("LINE_acme_dev".to_string(), "missing-delimiter".to_string());
        let warnings = validate_config(&config);
        assert!(warnings.iter().any(|w| w.contains("LINE_acme_dev")));
    }
}
