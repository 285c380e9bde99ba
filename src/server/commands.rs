//! Slash-command handling.
//!
//! Synchronous textual request/response: `help`, `manual`,
//! `list [channel]`, `dm <user> [- channel]`. Channel context is
//! inferred from the invoking conversation (or the active DM session)
//! unless the arguments name one.

use std::sync::Arc;

use tracing::warn;

use crate::directory::NameLookup;
use crate::server::{clean_channel, roster_listing, select_user, App};
use crate::slack::SlashCommand;

/// File the `manual` command reads its user documentation from.
const README_FILE: &str = "README.md";

/// Heading of the user-documentation section inside the README.
const MANUAL_HEADING: &str = "User instructions";

/// Handle one slash command, returning the response text.
pub async fn handle_command(app: &Arc<App>, payload: SlashCommand) -> String {
    let (command, rest) = split_command(&payload.text);
    let command = command.to_string();

    let channel = if payload.channel_name == "directmessage" {
        app.sessions.get(&payload.user_id).await.in_channel
    } else {
        app.directory
            .resolve_channel(&payload.channel_id, &payload.team_domain)
            .await
    };

    let (args, channel) = app
        .rewriter
        .normalize_args(&app.directory, &payload.team_domain, channel, rest)
        .await;

    match command.as_str() {
        "dm" | "list" => bridged_command(app, &payload, &command, args, channel).await,
        "manual" => manual().await,
        "help" => help_text(&payload.command),
        other => format!(
            "*Error:* Unrecognized command: '{}'\n{}",
            other,
            help_text(&payload.command)
        ),
    }
}

/// `list` and `dm`: both require a bridged channel the invoker is a
/// member of, then diverge.
async fn bridged_command(
    app: &Arc<App>,
    payload: &SlashCommand,
    command: &str,
    mut args: String,
    mut channel: Option<String>,
) -> String {
    let mut explicit_channel = None;
    if command == "dm" {
        if let Some((target, named_channel)) = split_dm_target(&args) {
            explicit_channel = channel.clone();
            args = target;
            channel = Some(named_channel);
        }
    }
    if command == "list" && !args.is_empty() {
        channel = Some(args.clone());
    }

    let Some(mut channel_name) = channel else {
        return format!(
            "*Error:* You must specify a bridged channel (could not infer it)!\n_See_ *{} help*.",
            payload.command
        );
    };

    let mut paired = app.topology.pair(&payload.team_domain, &channel_name, true);
    if paired.is_none() {
        if let Some(explicit) = explicit_channel {
            // Maybe the target's name contains ' - '; fall back to the
            // inferred channel and restore the split-off half.
            args = format!("{} - {}", args, channel_name);
            channel_name = explicit;
            paired = app.topology.pair(&payload.team_domain, &channel_name, true);
        }
    }

    let Some(paired) = paired else {
        if command == "dm" {
            reset_session(app, &payload.team_domain, &payload.user_id).await;
        }
        return format!("*Error:* The channel '{}' is not bridged!", channel_name);
    };

    if !app
        .directory
        .is_member(&payload.team_domain, &channel_name, &payload.user_id)
        .await
    {
        if command == "dm" {
            reset_session(app, &payload.team_domain, &payload.user_id).await;
        }
        return format!("*Error:* You are not a member of channel '{}'!", channel_name);
    }

    if command == "list" {
        return format!(
            "Members bridged with channel '{}':\n{}",
            channel_name,
            roster_listing(app, &paired.workspace, &paired.channel).await
        );
    }

    if args.is_empty() {
        reset_session(app, &payload.team_domain, &payload.user_id).await;
        return format!(
            "*Error:* You must specify a user to direct message!\n_See_ *{} help* (on the *dm* command).",
            payload.command
        );
    }

    match app
        .directory
        .find_by_name(&args, &paired.channel, &paired.workspace)
        .await
    {
        NameLookup::Candidates(_) => {
            reset_session(app, &payload.team_domain, &payload.user_id).await;
            format!(
                "*Error:* Could not find anyone by the name '{}' bridged with channel '{}'!\n\
                 Maybe you meant one of these people:\n{}",
                args,
                channel_name,
                roster_listing(app, &paired.workspace, &paired.channel).await
            )
        }
        NameLookup::Id(target) => {
            // Pairing posts its own confirmation; the command response
            // itself is empty and immediate.
            let app = Arc::clone(app);
            let payload = payload.clone();
            tokio::spawn(async move {
                select_user(
                    &app,
                    &payload.user_id,
                    &payload.team_domain,
                    &channel_name,
                    &paired.workspace,
                    &target,
                    Some(&payload.command),
                )
                .await;
            });
            String::new()
        }
    }
}

/// Invalidate a DM session and scrub stale bridge prompts.
async fn reset_session(app: &Arc<App>, workspace: &str, user: &str) {
    app.sessions.unpair(user).await;
    clean_channel(app, workspace, user).await;
}

/// Extract the user-documentation section from the README.
async fn manual() -> String {
    match tokio::fs::read_to_string(README_FILE).await {
        Ok(readme) => manual_section(&readme)
            .unwrap_or_else(|| "The user manual is unavailable.".to_string()),
        Err(e) => {
            warn!("Failed to read {}: {}", README_FILE, e);
            "The user manual is unavailable.".to_string()
        }
    }
}

/// The paragraph following the user-instructions heading.
fn manual_section(readme: &str) -> Option<String> {
    let paragraphs: Vec<&str> = readme.split("\n\n").collect();
    let heading = paragraphs
        .iter()
        .position(|p| p.trim_start_matches(['#', ' ']).starts_with(MANUAL_HEADING))?;
    paragraphs.get(heading + 1).map(|p| p.to_string())
}

/// The command summary shown by `help` and after unrecognized commands.
fn help_text(invocation: &str) -> String {
    format!(
        "Supported commands:\
         \n>{0} help\n\tShow this help\
         \n>{0} manual\n\tShow detailed user documentation\
         \n>{0} list [channel]\n\tList bridged members of current channel (or specified [channel])\
         \n>{0} dm <user> [- channel]\n\tDirect message specified <user> (bridged via [channel])\
         \n\n_Note: In the above commands, <word> and [word] are not part of the command; \
         rather, each <word> is a required argument that you must replace, \
         and each [word] is an optional argument that you may either omit or replace._",
        invocation
    )
}

/// Split the command word from its arguments.
fn split_command(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(idx) => (&text[..idx], text[idx..].trim_start()),
        None => (text, ""),
    }
}

/// Split `dm` arguments on their last ` - ` into (target, channel).
fn split_dm_target(args: &str) -> Option<(String, String)> {
    args.rfind(" - ")
        .map(|idx| (args[..idx].to_string(), args[idx + 3..].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("dm Bob Brown - dev"), ("dm", "Bob Brown - dev"));
        assert_eq!(split_command("help"), ("help", ""));
        assert_eq!(split_command(""), ("", ""));
        assert_eq!(split_command("  list  general"), ("list", "general"));
    }

    #[test]
    fn test_split_dm_target() {
        assert_eq!(
            split_dm_target("Bob Brown - dev"),
            Some(("Bob Brown".to_string(), "dev".to_string()))
        );
        // The last separator wins, so names containing ' - ' keep
        // their prefix intact.
        assert_eq!(
            split_dm_target("A - B - dev"),
            Some(("A - B".to_string(), "dev".to_string()))
        );
        assert_eq!(split_dm_target("Bob Brown"), None);
    }

    #[test]
    fn test_manual_section() {
        let readme = "# Bridge\n\nIntro text.\n\n## User instructions\n\nTalk normally; \
                      wrap mentions in backticks.\n\n## Deployment\n\nSet $PORT.";
        assert_eq!(
            manual_section(readme).unwrap(),
            "Talk normally; wrap mentions in backticks."
        );
        assert!(manual_section("No heading here.").is_none());
    }

    #[test]
    fn test_help_text_lists_commands() {
        let help = help_text("/bridge");
        for command in ["help", "manual", "list", "dm"] {
            assert!(help.contains(&format!("/bridge {}", command)));
        }
    }
}
