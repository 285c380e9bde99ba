//! Mention token translation.
//!
//! Outbound (local -> remote), platform mentions `<@ID>` become portable
//! `` `@Display Name` `` tokens; the backtick delimiter keeps the
//! destination platform from re-notifying. Inbound, portable tokens are
//! resolved against the destination's reverse index (a channel roster)
//! or a fixed single-recipient map (a DM tunnel). Names that resolve to
//! zero or several candidates are left verbatim and collected so the
//! sender can be warned once, with suggestions.
//!
//! Also hosts the slash-command argument grammar: `<#C…|name>`,
//! `#name`, `<@U…|name>`, and backticked names all collapse to bare
//! display names.

use std::collections::{HashMap, HashSet};

use fancy_regex::Regex;

use crate::directory::{Directory, NameLookup};

/// Where an inbound portable token resolves.
pub enum Destination<'a> {
    /// A bridged channel: resolve against its full roster.
    Channel { workspace: &'a str, channel: &'a str },
    /// A DM tunnel: a fixed display-name -> id map (one recipient).
    Direct(&'a HashMap<String, String>),
}

/// Result of rewriting a message body.
#[derive(Debug, Clone, Default)]
pub struct RewriteOutcome {
    /// The rewritten body.
    pub text: String,
    /// A mention-like token appeared outside backtick delimiters; the
    /// sender should be told how to tag people across the bridge.
    pub undelimited: bool,
    /// Portable names that resolved to zero or several candidates,
    /// excluding names that already worked as direct platform mentions.
    pub unresolved: Vec<String>,
}

/// Mention rewriter with compiled token patterns.
#[derive(Debug, Clone)]
pub struct MentionRewriter {
    /// Platform user mention: `<@U123>`.
    mention: Regex,
    /// Portable mention: `` `@Name` ``.
    portable: Regex,
    /// `@` not preceded by `<` or a backtick.
    undelimited: Regex,
    /// Channel token with optional label: `<#C123|name>`.
    channel_token: Regex,
    /// Bare `#name` channel reference.
    channel_name: Regex,
    /// User token with optional label: `<@U123|name>`.
    user_token: Regex,
    /// `@name`, optionally backticked.
    bare_name: Regex,
}

impl Default for MentionRewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl MentionRewriter {
    pub fn new() -> Self {
        Self {
            mention: Regex::new(r"<@([A-Z0-9]+)>").unwrap(),
            portable: Regex::new(r"`@([^`]*)`").unwrap(),
            undelimited: Regex::new(r"[^<`]@").unwrap(),
            channel_token: Regex::new(r"<#([^|>]*)(?:\|([^>]*))?>").unwrap(),
            channel_name: Regex::new(r"#(\S*)").unwrap(),
            user_token: Regex::new(r"<@([^|>]*)(?:\|([^>]*))?>").unwrap(),
            bare_name: Regex::new(r"`?@([^`]*)`?").unwrap(),
        }
    }

    /// Rewrite a message body for delivery across the bridge.
    ///
    /// Quiet lookups only: a mention of someone outside the source
    /// channel must not register them into its roster.
    pub async fn rewrite(
        &self,
        directory: &Directory,
        in_workspace: &str,
        in_channel: &str,
        text: &str,
        destination: &Destination<'_>,
    ) -> RewriteOutcome {
        let undelimited =
            text.starts_with('@') || self.undelimited.is_match(text).unwrap_or(false);

        // Platform mentions -> portable tokens, remembering which names
        // resolved locally.
        let mut locals: HashSet<String> = HashSet::new();
        let mut portable_text = String::with_capacity(text.len());
        let mut last = 0;
        for (start, end, id) in capture_spans(&self.mention, text) {
            portable_text.push_str(&text[last..start]);
            match directory.resolve_user(&id, in_channel, in_workspace, false).await {
                Some(profile) => {
                    locals.insert(profile.name.clone());
                    portable_text.push_str(&format!("`@{}`", profile.name));
                }
                None => portable_text.push_str(&text[start..end]),
            }
            last = end;
        }
        portable_text.push_str(&text[last..]);

        // Portable tokens -> destination platform mentions.
        let mut mismatches: Vec<String> = Vec::new();
        let mut out = String::with_capacity(portable_text.len());
        let mut last = 0;
        for (start, end, name) in capture_spans(&self.portable, &portable_text) {
            out.push_str(&portable_text[last..start]);
            let id = match destination {
                Destination::Channel { workspace, channel } => {
                    match directory.find_by_name(&name, channel, workspace).await {
                        NameLookup::Id(id) => Some(id),
                        NameLookup::Candidates(_) => {
                            mismatches.push(name.clone());
                            None
                        }
                    }
                }
                Destination::Direct(recipients) => recipients.get(&name).cloned(),
            };
            match id {
                Some(id) => out.push_str(&format!("<@{}>", id)),
                None => out.push_str(&portable_text[start..end]),
            }
            last = end;
        }
        out.push_str(&portable_text[last..]);

        mismatches.retain(|name| !locals.contains(name));
        mismatches.dedup();

        RewriteOutcome {
            text: out,
            undelimited,
            unresolved: mismatches,
        }
    }

    /// Normalize slash-command arguments to bare names.
    ///
    /// A channel token in the arguments selects the channel context;
    /// returns the normalized text and the (possibly updated) channel.
    pub async fn normalize_args(
        &self,
        directory: &Directory,
        workspace: &str,
        channel: Option<String>,
        args: &str,
    ) -> (String, Option<String>) {
        let mut channel = channel;

        // First channel token: resolve and adopt as the channel context.
        let mut text = args.to_string();
        if let Some((start, end, id, label)) = first_labeled_span(&self.channel_token, &text) {
            let name = match directory.resolve_channel(&id, workspace).await {
                Some(name) => {
                    channel = Some(name.clone());
                    name
                }
                None => label,
            };
            text = format!("{}{}{}", &text[..start], name, &text[end..]);
        }

        // Bare #name reference: adopt and strip the sigil.
        if let Some((start, end, name)) = capture_spans(&self.channel_name, &text).into_iter().next()
        {
            channel = Some(name.clone());
            text = format!("{}{}{}", &text[..start], name, &text[end..]);
        }

        let Some(channel_name) = channel.clone() else {
            return (text, None);
        };

        // User tokens: quiet lookups, label fallback.
        let source = text;
        let mut text = String::with_capacity(source.len());
        let mut last = 0;
        for (start, end, id, label) in labeled_spans(&self.user_token, &source) {
            text.push_str(&source[last..start]);
            match directory.resolve_user(&id, &channel_name, workspace, false).await {
                Some(profile) => text.push_str(&profile.name),
                None => text.push_str(&label),
            }
            last = end;
        }
        text.push_str(&source[last..]);

        // Remaining @names lose their sigils and backticks.
        let text = self
            .bare_name
            .replace_all(&text, |caps: &fancy_regex::Captures| caps[1].to_string())
            .to_string();

        (text, channel)
    }
}

/// Collect `(start, end, group 1)` spans so lookups can await without
/// borrowing the haystack through the regex iterator.
fn capture_spans(regex: &Regex, haystack: &str) -> Vec<(usize, usize, String)> {
    regex
        .captures_iter(haystack)
        .flatten()
        .filter_map(|caps| match (caps.get(0), caps.get(1)) {
            (Some(whole), Some(group)) => {
                Some((whole.start(), whole.end(), group.as_str().to_string()))
            }
            _ => None,
        })
        .collect()
}

/// Like [`capture_spans`] but for two-group tokens `(id, label)`.
fn labeled_spans(regex: &Regex, haystack: &str) -> Vec<(usize, usize, String, String)> {
    regex
        .captures_iter(haystack)
        .flatten()
        .filter_map(|caps| {
            caps.get(0).map(|whole| {
                (
                    whole.start(),
                    whole.end(),
                    caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
                    caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
                )
            })
        })
        .collect()
}

/// First two-group token span, if any.
fn first_labeled_span(regex: &Regex, haystack: &str) -> Option<(usize, usize, String, String)> {
    labeled_spans(regex, haystack).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slack::ApiClient;

    fn make_directory() -> Directory {
        Directory::new(ApiClient::new(&[]))
    }

    async fn seed_roster(directory: &Directory) {
        directory.seed_profile("U1", "Alice Adams").await;
        directory.seed_profile("U2", "Bob Brown").await;
        directory.register_name("partner", "general", "Alice Adams", "U1").await;
        directory.register_name("partner", "general", "Bob Brown", "U2").await;
    }

    #[tokio::test]
    async fn test_round_trip_through_roster() {
        let directory = make_directory();
        seed_roster(&directory).await;
        let rewriter = MentionRewriter::new();
        let destination = Destination::Channel {
            workspace: "partner",
            channel: "general",
        };

        // A mention of a known user survives the full outbound ->
        // inbound cycle as the destination's native mention.
        let outcome = rewriter
            .rewrite(&directory, "acme", "eng", "hello <@U1>", &destination)
            .await;
        assert_eq!(outcome.text, "hello <@U1>");
        assert!(outcome.unresolved.is_empty());
        assert!(!outcome.undelimited);
    }

    #[tokio::test]
    async fn test_portable_token_resolves_at_destination() {
        let directory = make_directory();
        seed_roster(&directory).await;
        let rewriter = MentionRewriter::new();
        let destination = Destination::Channel {
            workspace: "partner",
            channel: "general",
        };

        let outcome = rewriter
            .rewrite(&directory, "acme", "eng", "ping `@Bob Brown`!", &destination)
            .await;
        assert_eq!(outcome.text, "ping <@U2>!");
        assert!(outcome.unresolved.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_name_left_verbatim_and_collected() {
        let directory = make_directory();
        seed_roster(&directory).await;
        let rewriter = MentionRewriter::new();
        let destination = Destination::Channel {
            workspace: "partner",
            channel: "general",
        };

        let outcome = rewriter
            .rewrite(&directory, "acme", "eng", "ping `@Ghost`", &destination)
            .await;
        assert_eq!(outcome.text, "ping `@Ghost`");
        assert_eq!(outcome.unresolved, vec!["Ghost"]);
    }

    #[tokio::test]
    async fn test_locally_resolved_names_not_reported() {
        let directory = make_directory();
        // Alice exists locally but not in the destination roster.
        directory.seed_profile("U1", "Alice Adams").await;
        let rewriter = MentionRewriter::new();
        let destination = Destination::Channel {
            workspace: "partner",
            channel: "general",
        };

        let outcome = rewriter
            .rewrite(&directory, "acme", "eng", "hi <@U1>", &destination)
            .await;
        // The portable token could not resolve remotely, but the name
        // worked as a direct platform mention; no warning.
        assert_eq!(outcome.text, "hi `@Alice Adams`");
        assert!(outcome.unresolved.is_empty());
    }

    #[tokio::test]
    async fn test_direct_destination_map() {
        let directory = make_directory();
        let rewriter = MentionRewriter::new();
        let mut recipients = HashMap::new();
        recipients.insert("Bob Brown".to_string(), "U2".to_string());
        let destination = Destination::Direct(&recipients);

        let outcome = rewriter
            .rewrite(&directory, "acme", "eng", "`@Bob Brown` `@Ghost`", &destination)
            .await;
        assert_eq!(outcome.text, "<@U2> `@Ghost`");
        // DM tunnels have a single recipient; no candidate warnings.
        assert!(outcome.unresolved.is_empty());
    }

    #[tokio::test]
    async fn test_undelimited_mention_detected() {
        let directory = make_directory();
        let rewriter = MentionRewriter::new();
        let destination = Destination::Channel {
            workspace: "partner",
            channel: "general",
        };

        let naked = rewriter
            .rewrite(&directory, "acme", "eng", "hey @Bob look", &destination)
            .await;
        assert!(naked.undelimited);

        let leading = rewriter
            .rewrite(&directory, "acme", "eng", "@Bob look", &destination)
            .await;
        assert!(leading.undelimited);

        let delimited = rewriter
            .rewrite(&directory, "acme", "eng", "hey `@Bob` look", &destination)
            .await;
        assert!(!delimited.undelimited);
    }

    #[tokio::test]
    async fn test_normalize_args_channel_label_fallback() {
        let directory = make_directory();
        let rewriter = MentionRewriter::new();

        // The channel id cannot be resolved (no credentials); the label
        // inside the token is used instead.
        let (text, channel) = rewriter
            .normalize_args(&directory, "acme", None, "<#C123|general> rest")
            .await;
        assert_eq!(text, "general rest");
        assert_eq!(channel, None);
    }

    #[tokio::test]
    async fn test_normalize_args_bare_channel_and_names() {
        let directory = make_directory();
        directory.seed_profile("U1", "Alice Adams").await;
        let rewriter = MentionRewriter::new();

        let (text, channel) = rewriter
            .normalize_args(&directory, "acme", None, "`@Alice Adams` - #dev")
            .await;
        assert_eq!(channel.as_deref(), Some("dev"));
        assert_eq!(text, "Alice Adams - dev");
    }

    #[tokio::test]
    async fn test_normalize_args_without_channel() {
        let directory = make_directory();
        let rewriter = MentionRewriter::new();

        let (text, channel) = rewriter
            .normalize_args(&directory, "acme", None, "just words")
            .await;
        assert_eq!(text, "just words");
        assert!(channel.is_none());
    }
}
