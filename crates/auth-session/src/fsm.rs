//! Session state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//!                ┌─────────────┐
//!                │  Restoring  │ (initial)
//!                └──────┬──────┘
//!      NoSession        │ SessionValid          SessionExpired
//!     ┌─────────────────┼──────────────────┐
//!     ▼                 ▼                  ▼
//! ┌───────────┐   ┌───────────┐     ┌────────────┐
//! │ SignedOut │   │ SignedIn  │◄───►│ Refreshing │
//! └─────┬─────┘   └───────────┘     └────────────┘
//!       │ SignInStarted   ▲
//!       ▼                 │ SignInSucceeded
//! ┌────────────────┐      │
//! │ Authenticating │──────┘
//! └────────────────┘
//! ```
//!
//! `Authenticating` and `Refreshing` always resolve to `SignedIn` or
//! `SignedOut`. `SignOut` is accepted everywhere.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Restoring)

    Restoring => {
        NoSession => SignedOut,
        SessionValid => SignedIn,
        SessionExpired => Refreshing,
        SignOut => SignedOut
    },
    SignedOut => {
        SignInStarted => Authenticating,
        // A 401 while signed out still gets one refresh attempt
        RefreshStarted => Refreshing,
        SignOut => SignedOut
    },
    Authenticating => {
        SignInSucceeded => SignedIn,
        SignInFailed => SignedOut,
        SignInCancelled => SignedOut,
        SignOut => SignedOut
    },
    SignedIn => {
        RefreshStarted => Refreshing,
        SignOut => SignedOut
    },
    Refreshing => {
        RefreshSucceeded => SignedIn,
        RefreshFailed => SignedOut,
        SignOut => SignedOut
    }
}

pub use session_machine::Input as SessionInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session state for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Restoring,
    SignedOut,
    Authenticating,
    SignedIn,
    Refreshing,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::SignedIn)
    }

    /// Returns true while the state is waiting on I/O.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionState::Restoring | SessionState::Authenticating | SessionState::Refreshing
        )
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Restoring => SessionState::Restoring,
            SessionMachineState::SignedOut => SessionState::SignedOut,
            SessionMachineState::Authenticating => SessionState::Authenticating,
            SessionMachineState::SignedIn => SessionState::SignedIn,
            SessionMachineState::Refreshing => SessionState::Refreshing,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Restoring => "restoring",
            SessionState::SignedOut => "signed_out",
            SessionState::Authenticating => "authenticating",
            SessionState::SignedIn => "signed_in",
            SessionState::Refreshing => "refreshing",
        };
        write!(f, "{s}")
    }
}

/// Payload for session state change notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStateChanged {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_restoring() {
        let machine = SessionMachine::new();
        assert_eq!(*machine.state(), SessionMachineState::Restoring);
    }

    #[test]
    fn test_restore_outcomes() {
        for (input, expected) in [
            (SessionInput::NoSession, SessionMachineState::SignedOut),
            (SessionInput::SessionValid, SessionMachineState::SignedIn),
            (SessionInput::SessionExpired, SessionMachineState::Refreshing),
        ] {
            let mut machine = SessionMachine::new();
            machine.consume(&input).unwrap();
            assert_eq!(*machine.state(), expected);
        }
    }

    #[test]
    fn test_sign_in_flow() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionInput::NoSession).unwrap();

        machine.consume(&SessionInput::SignInStarted).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Authenticating);

        machine.consume(&SessionInput::SignInSucceeded).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::SignedIn);
    }

    #[test]
    fn test_cancelled_sign_in_returns_to_signed_out() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionInput::NoSession).unwrap();
        machine.consume(&SessionInput::SignInStarted).unwrap();

        machine.consume(&SessionInput::SignInCancelled).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::SignedOut);

        // And can start again
        machine.consume(&SessionInput::SignInStarted).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Authenticating);
    }

    #[test]
    fn test_refresh_resolves() {
        let mut machine = SessionMachine::new();
        machine.consume(&SessionInput::SessionValid).unwrap();

        machine.consume(&SessionInput::RefreshStarted).unwrap();
        machine.consume(&SessionInput::RefreshSucceeded).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::SignedIn);

        machine.consume(&SessionInput::RefreshStarted).unwrap();
        machine.consume(&SessionInput::RefreshFailed).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::SignedOut);
    }

    #[test]
    fn test_sign_out_accepted_everywhere() {
        let paths: [&[SessionInput]; 5] = [
            &[],
            &[SessionInput::NoSession],
            &[SessionInput::NoSession, SessionInput::SignInStarted],
            &[SessionInput::SessionValid],
            &[SessionInput::SessionExpired],
        ];
        for path in paths {
            let mut machine = SessionMachine::new();
            for input in path {
                machine.consume(input).unwrap();
            }
            machine.consume(&SessionInput::SignOut).unwrap();
            assert_eq!(*machine.state(), SessionMachineState::SignedOut);
        }
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut machine = SessionMachine::new();
        // Cannot sign in before restore settles
        assert!(machine.consume(&SessionInput::SignInStarted).is_err());

        machine.consume(&SessionInput::SessionValid).unwrap();
        // Already signed in
        assert!(machine.consume(&SessionInput::SignInStarted).is_err());
        assert!(machine.consume(&SessionInput::RefreshSucceeded).is_err());

        machine.consume(&SessionInput::RefreshStarted).unwrap();
        // Only one refresh at a time
        assert!(machine.consume(&SessionInput::RefreshStarted).is_err());
    }

    #[test]
    fn test_state_helpers() {
        assert!(SessionState::SignedIn.is_authenticated());
        assert!(!SessionState::Refreshing.is_authenticated());
        assert!(SessionState::Authenticating.is_transient());
        assert!(!SessionState::SignedOut.is_transient());
        assert_eq!(SessionState::SignedOut.to_string(), "signed_out");
    }

    #[test]
    fn test_changed_payload_serialization() {
        let payload = SessionStateChanged {
            state: SessionState::SignedOut,
            user_id: None,
            email: None,
        };
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"state":"signed_out"}"#
        );
    }
}
