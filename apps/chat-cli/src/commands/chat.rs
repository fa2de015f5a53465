//! Conversation, message and search commands.

use super::Context;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use chat_api::models::{Conversation, ConversationKind, Message};
use chat_api::{UserSearch, MIN_SEARCH_LENGTH};

/// List conversations.
pub async fn conversations_list(ctx: &Context, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;
    let conversations = ctx.chat.conversations().await?;

    match format {
        OutputFormat::Text => print_conversations(ctx, &conversations),
        OutputFormat::Json => output::print_json(&conversations),
    }
    Ok(())
}

pub(crate) fn print_conversations(ctx: &Context, conversations: &[Conversation]) {
    if conversations.is_empty() {
        println!("No conversations yet");
        return;
    }

    let me = ctx
        .auth
        .cached_user()
        .map(|u| u.username)
        .unwrap_or_default();

    println!("{:<6} {:<20} {:<7} {}", "ID", "With", "Unread", "Last message");
    output::print_divider();
    for conversation in conversations {
        println!(
            "{:<6} {:<20} {:<7} {}",
            conversation.id,
            output::truncate(&conversation_title(conversation, &me), 20),
            conversation.unread_count,
            conversation
                .last_message
                .as_ref()
                .map(|m| output::truncate(&format!("{}: {}", m.sender.username, m.content), 40))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}

fn conversation_title(conversation: &Conversation, me: &str) -> String {
    match conversation.kind {
        ConversationKind::Global => "Global chat".to_string(),
        _ => {
            let peers: Vec<String> = conversation.peers(me).map(|u| u.display_name()).collect();
            if peers.is_empty() {
                conversation
                    .slug
                    .clone()
                    .unwrap_or_else(|| format!("#{}", conversation.id))
            } else {
                peers.join(", ")
            }
        }
    }
}

/// Start or reopen a private conversation.
pub async fn conversations_start(ctx: &Context, username: &str, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;
    let conversation = ctx.chat.start_conversation(username).await?;

    match format {
        OutputFormat::Text => {
            println!("Conversation {} with {}", conversation.id, username.trim());
            if !conversation.messages.is_empty() {
                print_messages(&conversation.messages);
            }
        }
        OutputFormat::Json => output::print_json(&conversation),
    }
    Ok(())
}

pub async fn conversations_hide(ctx: &Context, id: i64, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;
    if ctx.chat.hide_conversation(id).await? {
        output::print_success(&format!("Conversation {} hidden", id), format);
    } else {
        output::print_error(&format!("Conversation {} was not hidden", id), format);
    }
    Ok(())
}

/// List messages, oldest first.
pub async fn messages_list(
    ctx: &Context,
    conversation: i64,
    last: Option<usize>,
    format: &OutputFormat,
) -> Result<()> {
    ctx.require_login()?;
    let mut messages = ctx.chat.messages(conversation).await?;
    if let Some(last) = last {
        let skip = messages.len().saturating_sub(last);
        messages.drain(..skip);
    }

    match format {
        OutputFormat::Text if messages.is_empty() => println!("No messages"),
        OutputFormat::Text => print_messages(&messages),
        OutputFormat::Json => output::print_json(&messages),
    }
    Ok(())
}

pub(crate) fn print_messages(messages: &[Message]) {
    for message in messages {
        print_message(message);
    }
}

pub(crate) fn print_message(message: &Message) {
    println!(
        "[{}] #{} {}: {}",
        message.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
        message.id,
        message.sender.username,
        message.content
    );
}

pub async fn messages_send(
    ctx: &Context,
    conversation: i64,
    text: &str,
    format: &OutputFormat,
) -> Result<()> {
    ctx.require_login()?;
    let message = ctx.chat.send_message(conversation, text).await?;

    match format {
        OutputFormat::Text => print_message(&message),
        OutputFormat::Json => output::print_json(&message),
    }
    Ok(())
}

/// Delete a message for the current user only.
pub async fn messages_delete(ctx: &Context, id: i64, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;
    if ctx.chat.delete_message_for_me(id).await? {
        output::print_success(&format!("Message {} deleted", id), format);
    } else {
        output::print_error(&format!("Message {} was not deleted", id), format);
    }
    Ok(())
}

pub async fn mark_read(ctx: &Context, conversation: i64, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;
    ctx.chat.mark_read(conversation).await?;
    output::print_success(&format!("Conversation {} marked as read", conversation), format);
    Ok(())
}

pub async fn search(ctx: &Context, query: &str, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;
    if query.trim().chars().count() < MIN_SEARCH_LENGTH {
        anyhow::bail!(
            "Search needs at least {} characters",
            MIN_SEARCH_LENGTH
        );
    }

    let users = UserSearch::new(ctx.chat.clone()).search(query).await?;

    match format {
        OutputFormat::Text if users.is_empty() => println!("No users found"),
        OutputFormat::Text => {
            for user in &users {
                println!("{:<6} {}", user.id, user.username);
            }
        }
        OutputFormat::Json => output::print_json(&users),
    }
    Ok(())
}
