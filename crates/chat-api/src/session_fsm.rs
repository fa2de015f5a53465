//! Session lifecycle as a `rust-fsm` machine.
//!
//! ```text
//! SignedOut --SignInStarted--> SigningIn --SignInSucceeded--> SignedIn
//!     ^                            |                            |  ^
//!     +-------SignInFailed---------+                            |  | TokenRefreshed
//!     +-------SessionInvalidated---------------------------------+--+
//!     +-------SignOutFinished------ SigningOut <--SignOutStarted-+
//! ```
//!
//! `SessionRestored` and `TokenRefreshed` also lead from `SignedOut` to
//! `SignedIn`: a stored session or a refresh performed by the HTTP client
//! proves the user is signed in.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(SignedOut)

    SignedOut => {
        SignInStarted => SigningIn,
        SessionRestored => SignedIn,
        // A refresh from a request made before the state was known.
        TokenRefreshed => SignedIn,
        SessionInvalidated => SignedOut
    },
    SigningIn => {
        SignInSucceeded => SignedIn,
        SignInFailed => SignedOut,
        SessionInvalidated => SignedOut
    },
    SignedIn => {
        SignInStarted => SigningIn,
        TokenRefreshed => SignedIn,
        SessionInvalidated => SignedOut,
        SignOutStarted => SigningOut
    },
    SigningOut => {
        SessionInvalidated => SigningOut,
        SignOutFinished => SignedOut
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    SignedOut,
    SigningIn,
    SignedIn,
    SigningOut,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::SignedIn)
    }

    /// A sign-in or sign-out is in flight.
    pub fn is_pending(&self) -> bool {
        matches!(self, SessionState::SigningIn | SessionState::SigningOut)
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::SignedOut => SessionState::SignedOut,
            SessionMachineState::SigningIn => SessionState::SigningIn,
            SessionMachineState::SignedIn => SessionState::SignedIn,
            SessionMachineState::SigningOut => SessionState::SigningOut,
        }
    }
}
