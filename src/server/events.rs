//! Platform event handling.
//!
//! Asynchronous side of the router: message mirroring with correlation
//! recording, edit/delete propagation, membership tracking, DM tunnel
//! routing with thread inference, and unsupported-content warnings.
//! Every degradation logs and returns; one failed event never affects
//! the next.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::bridge::{BridgePair, CorrelationRecord, Destination};
use crate::server::{clean_channel, roster_listing, select_user, App};
use crate::slack::Event;

const REACTION_WARNING: &str = "*Warning:* Emoji reactions are currently unsupported.\n\
     _If you want the other channel to see, send an emoji message!_";

const FILE_WARNING: &str = "*Warning:* File uploads are currently unsupported.\n\
     _If you want the other channel to see, link to cloud storage instead!_";

const BACKTICK_WARNING: &str = "*Warning:* If you want to tag someone in the bridged channel, \
     you must enclose the mention in backticks (e.g., `@Their Name`).\n\
     _Edit your message if you wish to notify people!_";

const UNPAIRED_ERROR: &str = "*Error:* You must either reply in a thread or specify a user \
     to direct message!\n\
     _For help: click my avatar, choose an option beginning with '/', and hit send._";

/// Dispatch one platform event.
pub async fn handle_event(app: Arc<App>, event: Event) {
    match event.kind.as_str() {
        "member_joined_channel" => handle_join(&app, &event).await,
        "member_left_channel" => handle_leave(&app, &event).await,
        "reaction_added" => handle_reaction(&app, &event).await,
        "message" => handle_message(&app, event).await,
        other => debug!("Unhandled type in event: '{}'", other),
    }
}

/// A new member: resolve them into the channel roster.
async fn handle_join(app: &Arc<App>, event: &Event) {
    let (Some(team), Some(channel_id), Some(user)) = (&event.team, &event.channel, &event.user)
    else {
        return;
    };
    let Some(workspace) = app.directory.resolve_workspace(team).await else {
        return;
    };
    let Some(channel) = app.directory.resolve_channel(channel_id, &workspace).await else {
        return;
    };
    app.directory.resolve_user(user, &channel, &workspace, true).await;
}

/// A member left: forget them and invalidate DM tunnels the channel
/// licensed, on both sides.
async fn handle_leave(app: &Arc<App>, event: &Event) {
    let (Some(team), Some(channel_id), Some(user)) = (&event.team, &event.channel, &event.user)
    else {
        return;
    };
    let Some(workspace) = app.directory.resolve_workspace(team).await else {
        return;
    };
    let Some(channel) = app.directory.resolve_channel(channel_id, &workspace).await else {
        return;
    };
    app.directory.forget_user(user, &channel, &workspace).await;

    // The leaver's own tunnel, if this channel licensed it.
    let session = app.sessions.get(user).await;
    if session.is_paired() && session.in_channel.as_deref() == Some(channel.as_str()) {
        app.sessions.unpair(user).await;
        clean_channel(app, &workspace, user).await;
        app.client
            .ephemeral(
                &workspace,
                user,
                user,
                &format!(
                    "You can no longer DM this person because you have been removed from the \
                     '{}' channel.",
                    channel
                ),
            )
            .await;
    }

    // Remote tunnels targeting the leaver.
    let partners = app.sessions.partners(user).await;
    if partners.is_empty() {
        return;
    }
    let Some(paired) = app.topology.pair(&workspace, &channel, false) else {
        return;
    };
    for dmer in partners {
        let stale = app.sessions.get(&dmer).await;
        app.sessions.unpair(&dmer).await;
        clean_channel(app, &paired.workspace, &dmer).await;
        app.client
            .ephemeral(
                &paired.workspace,
                &dmer,
                &dmer,
                &format!(
                    "You can no longer DM this person because they have been unbridged from \
                     the '{}' channel.",
                    stale.in_channel.unwrap_or_default()
                ),
            )
            .await;
    }
}

/// Reactions do not cross the bridge; tell the reactor when the target
/// is a mirrored message.
async fn handle_reaction(app: &Arc<App>, event: &Event) {
    let Some(item) = &event.item else { return };
    let (Some(ts), Some(channel)) = (&item.ts, &item.channel) else {
        return;
    };
    let correlated = match app.correlations.get(ts).await {
        Ok(correlated) => correlated,
        Err(e) => {
            warn!("Correlation lookup failed: {}", e);
            None
        }
    };
    if correlated.is_none() {
        return;
    }
    let Some(user) = &event.user else { return };
    let Some(team) = app.directory.resolve_team(channel).await else {
        return;
    };
    let Some(workspace) = app.directory.resolve_workspace(&team).await else {
        return;
    };
    app.client.ephemeral(&workspace, channel, user, REACTION_WARNING).await;
}

/// Message events: propagate deletes and edits, mirror everything else.
async fn handle_message(app: &Arc<App>, event: Event) {
    // The bridge's own posts come back as bot messages; ignore them.
    if event.bot_id.is_some() || event.message.as_ref().is_some_and(|m| m.bot_id.is_some()) {
        return;
    }

    let subtype = event.subtype.clone().unwrap_or_default();
    match subtype.as_str() {
        "message_deleted" => propagate_delete(app, &event).await,
        "message_changed" => propagate_edit(app, &event).await,
        _ => mirror_message(app, event, &subtype).await,
    }
}

/// Delete the mirrored copy and drop both correlation records.
async fn propagate_delete(app: &Arc<App>, event: &Event) {
    let Some(deleted_ts) = &event.deleted_ts else { return };
    let copy = match app.correlations.get(deleted_ts).await {
        Ok(Some(copy)) => copy,
        Ok(None) => return,
        Err(e) => {
            warn!("Correlation lookup failed: {}", e);
            return;
        }
    };

    let body = json!({ "channel": copy.out_conversation, "ts": copy.out_ts });
    match app.client.post("chat.delete", body, &copy.out_workspace).await {
        Ok(ack) => debug!("Propagated delete: {}", ack),
        Err(e) => warn!("Failed to propagate delete: {}", e),
    }

    if let Err(e) = app.correlations.delete_pair(deleted_ts, &copy.out_ts).await {
        warn!("Failed to drop correlation records: {}", e);
    }
}

/// Update the mirrored copy with the re-rewritten body.
async fn propagate_edit(app: &Arc<App>, event: &Event) {
    let Some(nested) = &event.message else { return };
    let Some(ts) = &nested.ts else { return };
    let copy = match app.correlations.get(ts).await {
        Ok(Some(copy)) => copy,
        Ok(None) => return,
        Err(e) => {
            warn!("Correlation lookup failed: {}", e);
            return;
        }
    };

    if let Some(user) = &nested.user {
        app.directory
            .resolve_user(user, &copy.in_channel, &copy.in_workspace, true)
            .await;
    }

    let text = nested.text.clone().unwrap_or_default();
    let destination = Destination::Channel {
        workspace: &copy.out_workspace,
        channel: &copy.out_channel,
    };
    let outcome = app
        .rewriter
        .rewrite(&app.directory, &copy.in_workspace, &copy.in_channel, &text, &destination)
        .await;

    let body = json!({
        "channel": copy.out_conversation,
        "ts": copy.out_ts,
        "text": outcome.text,
    });
    match app.client.post("chat.update", body, &copy.out_workspace).await {
        Ok(ack) => debug!("Propagated edit: {}", ack),
        Err(e) => warn!("Failed to propagate edit: {}", e),
    }
}

/// Where a DM routes, or why it cannot.
enum DmRouting {
    Route { channel: String, paired: BridgePair },
    Reject(String),
    Ignore,
}

/// Mirror a message to its paired conversation and record the
/// correlation pair.
async fn mirror_message(app: &Arc<App>, event: Event, subtype: &str) {
    let Some(ts) = event.ts.clone() else { return };
    let Some(event_channel) = event.channel.clone() else { return };
    let Some(user) = event.user.clone() else { return };
    let text = event.text.clone().unwrap_or_default();

    // Thread ancestor correlation, if this is a threaded reply.
    let thread = match &event.thread_ts {
        Some(parent) => match app.correlations.get(parent).await {
            Ok(thread) => thread,
            Err(e) => {
                warn!("Correlation lookup failed: {}", e);
                None
            }
        },
        None => None,
    };
    let thread_ts_out = thread.as_ref().map(|t| t.out_ts.clone());
    let reply_broadcast = subtype == "thread_broadcast" && thread.is_some();

    // Some subtypes arrive without a top-level workspace identifier.
    let team = if subtype == "thread_broadcast"
        || subtype.ends_with("_join")
        || subtype.ends_with("_leave")
        || subtype == "file_share"
    {
        app.directory.resolve_team(&event_channel).await
    } else {
        event.team.clone()
    };
    let Some(team) = team else { return };
    let Some(workspace) = app.directory.resolve_workspace(&team).await else {
        return;
    };

    if subtype == "file_share" {
        app.client.ephemeral(&workspace, &event_channel, &user, FILE_WARNING).await;
    }

    let is_im = event.channel_type.as_deref() == Some("im");
    let (channel, paired) = if is_im {
        match route_dm(app, &workspace, &user, thread.as_ref()).await {
            DmRouting::Route { channel, paired } => (channel, paired),
            DmRouting::Reject(error) => {
                // Acknowledge the message so it is not silently lost.
                app.client.react(&workspace, &event_channel, &ts, "warning").await;
                app.client.ephemeral(&workspace, &event_channel, &user, &error).await;
                return;
            }
            DmRouting::Ignore => return,
        }
    } else {
        let Some(channel) = app.directory.resolve_channel(&event_channel, &workspace).await
        else {
            return;
        };
        let Some(paired) = app.topology.pair(&workspace, &channel, false) else {
            return;
        };
        (channel, paired)
    };

    let mut body = json!({ "channel": paired.channel, "text": text });
    if let Some(thread_out) = &thread_ts_out {
        body["thread_ts"] = json!(thread_out);
        if reply_broadcast {
            body["reply_broadcast"] = json!(true);
        }
    }

    // Enrich with the sender's identity and rewrite mentions. A failed
    // profile lookup degrades to an anonymous, unrewritten post.
    if let Some(profile) = app.directory.resolve_user(&user, &channel, &workspace, true).await {
        let mut username = profile.name.clone();
        let mut recipients: Option<HashMap<String, String>> = None;
        if is_im {
            if let Some(line) = app.topology.pair(&workspace, &channel, true) {
                username = format!("{} - {}", username, line.channel);
                if let Some(owner) = conversation_owner(app, &paired.channel, &paired.workspace).await
                {
                    if let Some(owner_profile) = app
                        .directory
                        .resolve_user(&owner, &line.channel, &paired.workspace, true)
                        .await
                    {
                        recipients = Some(HashMap::from([(owner_profile.name, owner)]));
                    }
                }
            }
        }
        body["username"] = json!(username);
        if let Some(avatar) = &profile.avatar {
            body["icon_url"] = json!(avatar);
        }

        let outcome = match &recipients {
            Some(map) => {
                app.rewriter
                    .rewrite(&app.directory, &workspace, &channel, &text, &Destination::Direct(map))
                    .await
            }
            None => {
                let destination = Destination::Channel {
                    workspace: &paired.workspace,
                    channel: &paired.channel,
                };
                app.rewriter
                    .rewrite(&app.directory, &workspace, &channel, &text, &destination)
                    .await
            }
        };
        if outcome.undelimited {
            app.client
                .ephemeral(&workspace, &event_channel, &user, BACKTICK_WARNING)
                .await;
        }
        if !outcome.unresolved.is_empty() {
            let suggestions = roster_listing(app, &paired.workspace, &paired.channel).await;
            app.client
                .ephemeral(
                    &workspace,
                    &event_channel,
                    &user,
                    &format!(
                        "*Warning:* Could not find anyone by the name(s) '{}'!\n\
                         Maybe you meant one of these people:\n{}\n\
                         _If so, edit your message so they will be notified!_",
                        outcome.unresolved.join("', '"),
                        suggestions
                    ),
                )
                .await;
        }
        body["text"] = json!(outcome.text);
    }

    let ack = match app.client.post("chat.postMessage", body, &paired.workspace).await {
        Ok(ack) => ack,
        Err(e) => {
            warn!("Failed to post mirrored message: {}", e);
            return;
        }
    };
    let (Some(out_conversation), Some(out_ts)) = (
        ack.get("channel").and_then(|c| c.as_str()),
        ack.get("ts").and_then(|t| t.as_str()),
    ) else {
        warn!("Post acknowledgement missing channel/ts");
        return;
    };

    // Both directions are recorded before the handler returns, so a
    // near-simultaneous edit or delete sees the pair or nothing.
    let forward = CorrelationRecord {
        in_workspace: workspace.clone(),
        in_channel: channel.clone(),
        out_workspace: paired.workspace.clone(),
        out_channel: paired.channel.clone(),
        out_conversation: out_conversation.to_string(),
        out_ts: out_ts.to_string(),
    };
    let backward = CorrelationRecord {
        in_workspace: paired.workspace,
        in_channel: paired.channel,
        out_workspace: workspace,
        out_channel: channel,
        out_conversation: event_channel,
        out_ts: ts.clone(),
    };
    match app.correlations.put_pair((&ts, forward), (out_ts, backward)).await {
        Ok(true) => {}
        Ok(false) => warn!("Correlation records for {} already exist or are incomplete", ts),
        Err(e) => warn!("Failed to record correlation: {}", e),
    }
}

/// Route a direct message through the sender's tunnel.
///
/// A threaded reply whose ancestor correlates to a different remote
/// conversation than the current session silently re-pairs the session
/// to that conversation's owner, after validating that both parties are
/// still members of the licensing channel.
async fn route_dm(
    app: &Arc<App>,
    workspace: &str,
    user: &str,
    thread: Option<&CorrelationRecord>,
) -> DmRouting {
    let session = app.sessions.get(user).await;
    let mut channel = None;
    let mut paired: Option<BridgePair> = None;
    if let (Some(target), Some(out_workspace)) =
        (session.target.clone(), session.out_workspace.clone())
    {
        channel = session.in_channel.clone();
        if let Some(conversation) = app.directory.im_conversation(&target, &out_workspace, None).await
        {
            paired = Some(BridgePair {
                workspace: out_workspace,
                channel: conversation,
            });
        }
    }

    let mut error = None;
    if let Some(thread) = thread {
        let mismatch = match &paired {
            None => true,
            Some(p) => thread.out_workspace != p.workspace || thread.out_conversation != p.channel,
        };
        if mismatch {
            // The channel whose bridge carried the thread ancestor.
            let licensed = app
                .topology
                .pair(&thread.out_workspace, &thread.out_channel, true)
                .map(|p| p.channel)
                .unwrap_or_else(|| thread.in_channel.clone());
            channel = Some(licensed.clone());

            if !app.directory.is_member(workspace, &licensed, user).await {
                error = Some(format!(
                    "*Error:* You can no longer DM this person because you have been removed \
                     from the '{}' channel!",
                    licensed
                ));
            } else {
                let Some(pair_back) = app.topology.pair(workspace, &licensed, false) else {
                    warn!("Thread ancestor channel '{}' is no longer bridged", licensed);
                    return DmRouting::Ignore;
                };
                let remote_user = app
                    .directory
                    .im_user(&thread.out_conversation, &thread.out_workspace)
                    .await;
                let still_bridged = match &remote_user {
                    Some(remote_user) => {
                        app.directory
                            .is_member(&thread.out_workspace, &pair_back.channel, remote_user)
                            .await
                    }
                    None => false,
                };
                if !still_bridged {
                    error = Some(format!(
                        "*Error:* You can no longer DM this person because they have been \
                         unbridged from the '{}' channel!",
                        licensed
                    ));
                } else {
                    paired = Some(BridgePair {
                        workspace: thread.out_workspace.clone(),
                        channel: thread.out_conversation.clone(),
                    });
                    if let Some(owner) =
                        conversation_owner(app, &thread.out_conversation, &thread.out_workspace)
                            .await
                    {
                        select_user(
                            app,
                            user,
                            workspace,
                            &licensed,
                            &thread.out_workspace,
                            &owner,
                            None,
                        )
                        .await;
                    }
                }
            }
        }
    }

    match (channel, paired) {
        (Some(channel), Some(paired)) if error.is_none() => DmRouting::Route { channel, paired },
        _ => DmRouting::Reject(error.unwrap_or_else(|| UNPAIRED_ERROR.to_string())),
    }
}

/// The remote user an IM conversation belongs to, per the platform.
async fn conversation_owner(app: &Arc<App>, conversation: &str, workspace: &str) -> Option<String> {
    match app
        .client
        .get("conversations.info", &[("channel", conversation)], workspace)
        .await
    {
        Ok(body) => body
            .get("channel")
            .and_then(|c| c.get("user"))
            .and_then(|u| u.as_str())
            .map(str::to_string),
        Err(e) => {
            warn!("Failed to identify IM owner: {}", e);
            None
        }
    }
}
