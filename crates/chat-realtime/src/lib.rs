//! Realtime transport for the chat client.
//!
//! This crate provides:
//! - A WebSocket client scoped to one chat room at a time
//! - A single delayed reconnect after an unclean close
//! - Heartbeat pings while the socket is open
//! - Typed client and server messages

mod client;
mod connection_fsm;
mod connector;
mod error;
mod messages;

pub use client::{
    EventKind, Listener, RealtimeClient, RealtimeConfig, RealtimeEvent, ABNORMAL_CLOSURE,
    NORMAL_CLOSURE,
};
pub use connection_fsm::{
    connection_machine, ConnectionMachine, ConnectionMachineInput, ConnectionMachineState,
    ConnectionState,
};
pub use connector::{Connector, Frame, FrameSink, FrameStream, TungsteniteConnector};
pub use error::{RealtimeError, RealtimeResult};
pub use messages::{ClientMessage, RoomId, ServerMessage, ServerMessageType};
