//! Follow a chat room over the realtime socket.

use super::chat::{print_conversations, print_message};
use super::Context;
use crate::output::OutputFormat;
use anyhow::Result;
use chat_api::models::Message;
use chat_api::SessionEvent;
use chat_realtime::{
    RealtimeClient, RealtimeConfig, RealtimeEvent, RoomId, ServerMessage, ServerMessageType,
    NORMAL_CLOSURE,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Print events for `room` (the conversation-list channel by default)
/// until Ctrl-C.
pub async fn watch(ctx: &Context, room: Option<String>, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;

    // Any authenticated call refreshes an expired access token first.
    ctx.auth.current_user().await?;
    let Some(token) = ctx.auth.api().tokens().access_token() else {
        anyhow::bail!("Not logged in. Run 'chatapp login' first");
    };

    let room = room.map(RoomId::from).unwrap_or_else(RoomId::list);
    let client = RealtimeClient::new(RealtimeConfig {
        url: ctx.config.ws_url.clone(),
        secure_context: ctx.config.secure_context(),
        ..RealtimeConfig::default()
    });

    // Refreshed tokens feed the socket; `None` means the session is gone.
    let (session_tx, mut session_rx) = mpsc::unbounded_channel();
    ctx.auth
        .api()
        .add_session_observer(Arc::new(move |event: &SessionEvent| {
            let update = match event {
                SessionEvent::Refreshed { access, .. } => Some(access.clone()),
                SessionEvent::Invalidated => None,
            };
            let _ = session_tx.send(update);
        }));

    let mut events = client.subscribe();
    client.connect(&token, room.clone()).await;

    if matches!(format, OutputFormat::Text) {
        println!("Watching room {} (Ctrl-C to stop)", room);
    }

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            update = session_rx.recv() => match update {
                Some(Some(access)) => {
                    info!(room = %room, "access token refreshed, updating socket");
                    client.connect(&access, room.clone()).await;
                }
                Some(None) => break Err(anyhow::anyhow!("Session expired. Run 'chatapp login' again")),
                None => {}
            },
            event = events.recv() => match event {
                Ok(event) => handle_event(ctx, &room, event, format).await,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "watch fell behind, events dropped"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    client.disconnect(true).await;
    outcome
}

async fn handle_event(ctx: &Context, room: &RoomId, event: RealtimeEvent, format: &OutputFormat) {
    match format {
        OutputFormat::Json => print_event_json(room, &event),
        OutputFormat::Text => match &event {
            RealtimeEvent::Open => println!("* connected to {}", room),
            RealtimeEvent::Close { code } => println!("* disconnected (code {})", code),
            RealtimeEvent::Error(e) => eprintln!("* socket error: {}", e),
            RealtimeEvent::Message(message) => print_message_text(message),
        },
    }

    match &event {
        RealtimeEvent::Message(message) if message.requires_list_refresh() => {
            refresh_list(ctx, format).await;
        }
        RealtimeEvent::Close { code } if *code != NORMAL_CLOSURE => {
            // Refreshes an expired token before the reconnect fires; the new
            // token arrives through the session observer.
            if let Err(e) = ctx.auth.current_user().await {
                warn!(error = %e, "session check after socket close failed");
            }
        }
        _ => {}
    }
}

fn print_event_json(room: &RoomId, event: &RealtimeEvent) {
    let line = match event {
        RealtimeEvent::Open => json!({ "event": "open", "room": room }),
        RealtimeEvent::Close { code } => json!({ "event": "close", "room": room, "code": code }),
        RealtimeEvent::Error(e) => json!({ "event": "error", "room": room, "error": e }),
        RealtimeEvent::Message(message) => {
            json!({ "event": "message", "room": room, "data": message.data })
        }
    };
    println!("{}", line);
}

fn print_message_text(message: &ServerMessage) {
    match message.msg_type {
        ServerMessageType::NewMessage => {
            match message.message().cloned().map(serde_json::from_value::<Message>) {
                Some(Ok(chat_message)) => print_message(&chat_message),
                Some(Err(e)) => debug!(error = %e, "new_message payload has an unexpected shape"),
                None => debug!("new_message without a message"),
            }
        }
        ServerMessageType::TypingIndicator => {
            let typing = message.data.get("is_typing").and_then(Value::as_bool);
            let username = message.data.get("username").and_then(Value::as_str);
            if let (Some(true), Some(username)) = (typing, username) {
                println!("* {} is typing…", username);
            }
        }
        ServerMessageType::MessageDeleted => {
            if let Some(id) = message.data.get("message_id") {
                println!("* message {} deleted", id);
            }
        }
        ServerMessageType::Error => {
            eprintln!("* server error: {}", message.text().unwrap_or("unknown error"));
        }
        ServerMessageType::ConnectionEstablished => {
            debug!(greeting = ?message.text(), "connection established");
        }
        ServerMessageType::ConversationUpdated | ServerMessageType::ChatListUpdate => {}
        ServerMessageType::Pong | ServerMessageType::Unknown => {
            debug!(data = %message.data, "unhandled realtime message");
        }
    }
}

async fn refresh_list(ctx: &Context, format: &OutputFormat) {
    match ctx.chat.conversations().await {
        Ok(conversations) => match format {
            OutputFormat::Text => {
                println!("* conversations updated");
                print_conversations(ctx, &conversations);
            }
            OutputFormat::Json => {
                println!("{}", json!({ "event": "conversations", "data": conversations }));
            }
        },
        Err(e) => warn!(error = %e, "failed to refresh conversation list"),
    }
}
