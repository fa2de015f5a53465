//! Connection state machine using rust-fsm.
//!
//! ```text
//!                 Connect
//! Disconnected ───────────► Connecting ──Opened──► Open
//!      ▲                      │    ▲                 │
//!      │ Closed               │    │ ReconnectFired  │ ConnectionLost
//!      └──────────────────────┤    │                 ▼
//!                             └────┴───────── ReconnectPending
//!
//! DisconnectPermanently (any state) ──► PermanentlyClosed
//! ```
//!
//! `Connect` is accepted from every state: an explicit connect always
//! starts over, including after a permanent disconnect.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub connection_machine(Disconnected)

    Disconnected => {
        Connect => Connecting,
        Disconnect => Disconnected,
        DisconnectPermanently => PermanentlyClosed
    },
    Connecting => {
        Connect => Connecting,
        Opened => Open,
        ConnectionLost => ReconnectPending,
        Closed => Disconnected,
        Disconnect => Disconnected,
        DisconnectPermanently => PermanentlyClosed
    },
    Open => {
        Connect => Connecting,
        ConnectionLost => ReconnectPending,
        Closed => Disconnected,
        Disconnect => Disconnected,
        DisconnectPermanently => PermanentlyClosed
    },
    ReconnectPending => {
        Connect => Connecting,
        ReconnectFired => Connecting,
        Disconnect => Disconnected,
        DisconnectPermanently => PermanentlyClosed
    },
    PermanentlyClosed => {
        Connect => Connecting,
        Disconnect => PermanentlyClosed,
        DisconnectPermanently => PermanentlyClosed
    }
}

pub use connection_machine::Input as ConnectionMachineInput;
pub use connection_machine::State as ConnectionMachineState;
pub use connection_machine::StateMachine as ConnectionMachine;

/// Connection state for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    ReconnectPending,
    PermanentlyClosed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl From<&ConnectionMachineState> for ConnectionState {
    fn from(state: &ConnectionMachineState) -> Self {
        match state {
            ConnectionMachineState::Disconnected => ConnectionState::Disconnected,
            ConnectionMachineState::Connecting => ConnectionState::Connecting,
            ConnectionMachineState::Open => ConnectionState::Open,
            ConnectionMachineState::ReconnectPending => ConnectionState::ReconnectPending,
            ConnectionMachineState::PermanentlyClosed => ConnectionState::PermanentlyClosed,
        }
    }
}
