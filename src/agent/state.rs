//! # Session State Machine
//!
//! A session's status is a pair: where the room connection is
//! ([`ConnectionState`]) and where the conversation is ([`TurnState`]).
//! Both change only through [`SessionState::apply`], so the rules tying them
//! together live in one place:
//!
//! - `Listening` is only ever held while `Connected`.
//! - A turn in `Processing` is left alone by connection changes. If it
//!   finishes while the room is away the session rests in `Idle` until the
//!   room comes back.
//! - `Ended` is terminal.
//!
//! ```text
//!            BeginTurn              FinishTurn
//! Listening ───────────► Processing ──────────► Listening | Idle
//!     ▲                      │
//!     │  ResumeListening     │ Interrupt
//!     └──────────── Interrupted ◄┘
//! ```

use crate::error::TransitionError;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Listening,
    Processing,
    Interrupted,
    Ended,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::Listening => "listening",
            TurnState::Processing => "processing",
            TurnState::Interrupted => "interrupted",
            TurnState::Ended => "ended",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connecting,
    Connected,
    ConnectFailed,
    Disconnected,
    Reconnecting,
    Reconnected,
    BeginTurn,
    FinishTurn,
    Interrupt,
    ResumeListening,
    End,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    connection: ConnectionState,
    turn: TurnState,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            turn: TurnState::Idle,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn turn(&self) -> TurnState {
        self.turn
    }

    pub fn is_ended(&self) -> bool {
        self.turn == TurnState::Ended
    }

    /// True when a new turn may start.
    pub fn can_begin_turn(&self) -> bool {
        self.turn == TurnState::Listening && self.connection == ConnectionState::Connected
    }

    /// Apply `transition`, or leave the state untouched and report why not.
    pub fn apply(&mut self, transition: Transition) -> Result<(), TransitionError> {
        use ConnectionState as C;
        use TurnState as T;

        if self.turn == T::Ended {
            return match transition {
                Transition::End => Ok(()),
                _ => Err(self.reject(transition)),
            };
        }

        let (connection, turn) = match (transition, self.connection, self.turn) {
            (Transition::Connecting, C::Disconnected, turn) => (C::Connecting, turn),
            (Transition::ConnectFailed, C::Connecting, turn) => (C::Disconnected, turn),
            (Transition::Connected, C::Connecting, T::Idle) => (C::Connected, T::Listening),
            (Transition::Connected, C::Connecting, turn) => (C::Connected, turn),

            (Transition::Disconnected, _, turn) => (C::Disconnected, settle_offline(turn)),
            (Transition::Reconnecting, C::Connected | C::Disconnected, turn) => {
                (C::Reconnecting, settle_offline(turn))
            }
            (Transition::Reconnected, C::Reconnecting | C::Disconnected, T::Idle) => {
                (C::Connected, T::Listening)
            }
            (Transition::Reconnected, C::Reconnecting | C::Disconnected, turn) => (C::Connected, turn),

            (Transition::BeginTurn, C::Connected, T::Listening) => (C::Connected, T::Processing),
            (Transition::FinishTurn, connection, T::Processing) => (connection, settle(connection)),
            (Transition::Interrupt, connection, T::Processing) => (connection, T::Interrupted),
            (Transition::ResumeListening, connection, T::Interrupted) => (connection, settle(connection)),

            (Transition::End, _, _) => (C::Disconnected, T::Ended),

            _ => return Err(self.reject(transition)),
        };

        self.connection = connection;
        self.turn = turn;
        Ok(())
    }

    fn reject(&self, transition: Transition) -> TransitionError {
        TransitionError {
            state: format!("{}/{}", self.connection, self.turn),
            event: transition.to_string(),
        }
    }
}

/// Where a finished turn lands given the connection.
fn settle(connection: ConnectionState) -> TurnState {
    if connection == ConnectionState::Connected {
        TurnState::Listening
    } else {
        TurnState::Idle
    }
}

/// Turn state after the room goes away. In-flight turns are untouched.
fn settle_offline(turn: TurnState) -> TurnState {
    match turn {
        TurnState::Listening | TurnState::Interrupted => TurnState::Idle,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> SessionState {
        let mut state = SessionState::new();
        state.apply(Transition::Connecting).unwrap();
        state.apply(Transition::Connected).unwrap();
        state
    }

    #[test]
    fn test_connect_starts_listening() {
        let state = connected();
        assert_eq!(state.connection(), ConnectionState::Connected);
        assert_eq!(state.turn(), TurnState::Listening);
        assert!(state.can_begin_turn());
    }

    #[test]
    fn test_failed_connect_returns_to_disconnected() {
        let mut state = SessionState::new();
        state.apply(Transition::Connecting).unwrap();
        state.apply(Transition::ConnectFailed).unwrap();
        assert_eq!(state.connection(), ConnectionState::Disconnected);
        assert_eq!(state.turn(), TurnState::Idle);
    }

    #[test]
    fn test_single_flight() {
        let mut state = connected();
        state.apply(Transition::BeginTurn).unwrap();
        assert!(!state.can_begin_turn());
        assert!(state.apply(Transition::BeginTurn).is_err());
        assert_eq!(state.turn(), TurnState::Processing);
    }

    #[test]
    fn test_listening_requires_connection() {
        let mut state = connected();
        state.apply(Transition::Disconnected).unwrap();
        assert_eq!(state.turn(), TurnState::Idle);
        assert!(state.apply(Transition::BeginTurn).is_err());

        state.apply(Transition::Reconnecting).unwrap();
        assert_eq!(state.turn(), TurnState::Idle);
        state.apply(Transition::Reconnected).unwrap();
        assert_eq!(state.turn(), TurnState::Listening);
    }

    #[test]
    fn test_processing_survives_disconnect() {
        let mut state = connected();
        state.apply(Transition::BeginTurn).unwrap();

        state.apply(Transition::Disconnected).unwrap();
        assert_eq!(state.turn(), TurnState::Processing);

        // Turn ends while offline: rests in Idle, never Listening.
        state.apply(Transition::FinishTurn).unwrap();
        assert_eq!(state.turn(), TurnState::Idle);

        state.apply(Transition::Reconnecting).unwrap();
        state.apply(Transition::Reconnected).unwrap();
        assert_eq!(state.turn(), TurnState::Listening);
    }

    #[test]
    fn test_interrupt_then_resume() {
        let mut state = connected();
        state.apply(Transition::BeginTurn).unwrap();
        state.apply(Transition::Interrupt).unwrap();
        assert_eq!(state.turn(), TurnState::Interrupted);
        state.apply(Transition::ResumeListening).unwrap();
        assert_eq!(state.turn(), TurnState::Listening);

        assert!(state.apply(Transition::Interrupt).is_err());
    }

    #[test]
    fn test_ended_is_terminal() {
        let mut state = connected();
        state.apply(Transition::End).unwrap();
        assert!(state.is_ended());
        assert_eq!(state.connection(), ConnectionState::Disconnected);

        assert!(state.apply(Transition::End).is_ok());
        let err = state.apply(Transition::Reconnected).unwrap_err();
        assert_eq!(err.event, "Reconnected");
        assert_eq!(state.turn(), TurnState::Ended);
    }
}
