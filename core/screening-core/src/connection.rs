//! Self-managed call leg as seen by the telephony subsystem.
//!
//! ## State Machine
//!
//! ```text
//! NEW           incoming()    → RINGING
//! RINGING       accept()      → ACTIVE
//! RINGING       reject()      → DISCONNECTED (rejected)
//! RINGING|ACTIVE disconnect() → DISCONNECTED (local)
//! NEW|RINGING   abort()       → DISCONNECTED (canceled)
//! ```
//!
//! DISCONNECTED is terminal. A connection is single-use: once it reaches
//! DISCONNECTED its owner discards it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ConnectionError;
use crate::types::{CallIdentifier, ConnectionState, DisconnectCause};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionEvent {
    Incoming,
    Accept,
    Reject,
    Disconnect,
    Abort,
}

impl ConnectionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionEvent::Incoming => "incoming",
            ConnectionEvent::Accept => "accept",
            ConnectionEvent::Reject => "reject",
            ConnectionEvent::Disconnect => "disconnect",
            ConnectionEvent::Abort => "abort",
        }
    }
}

/// Pure transition table. `cause` is the fixed cause of an already
/// disconnected connection, used only to report `AlreadyTerminal`.
pub fn transition(
    state: ConnectionState,
    cause: Option<DisconnectCause>,
    event: ConnectionEvent,
) -> Result<(ConnectionState, Option<DisconnectCause>), ConnectionError> {
    use ConnectionEvent as E;
    use ConnectionState as S;

    match (state, event) {
        (S::Disconnected, _) => Err(ConnectionError::AlreadyTerminal {
            cause: cause.unwrap_or(DisconnectCause::Local),
        }),
        (S::New, E::Incoming) => Ok((S::Ringing, None)),
        (S::Ringing, E::Accept) => Ok((S::Active, None)),
        (S::Ringing, E::Reject) => Ok((S::Disconnected, Some(DisconnectCause::Rejected))),
        (S::Ringing | S::Active, E::Disconnect) => {
            Ok((S::Disconnected, Some(DisconnectCause::Local)))
        }
        (S::New | S::Ringing, E::Abort) => Ok((S::Disconnected, Some(DisconnectCause::Canceled))),
        (from, event) => Err(ConnectionError::InvalidTransition {
            from,
            event: event.as_str(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub call_id: CallIdentifier,
    pub state: ConnectionState,
    pub disconnect_cause: Option<DisconnectCause>,
    pub created_at: String,
    pub state_changed_at: String,
}

#[derive(Debug)]
pub struct Connection {
    call_id: CallIdentifier,
    state: ConnectionState,
    disconnect_cause: Option<DisconnectCause>,
    created_at: DateTime<Utc>,
    state_changed_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(call_id: CallIdentifier) -> Self {
        let now = Utc::now();
        tracing::debug!(call_id = %call_id, "Connection created");
        Self {
            call_id,
            state: ConnectionState::New,
            disconnect_cause: None,
            created_at: now,
            state_changed_at: now,
        }
    }

    pub fn call_id(&self) -> &CallIdentifier {
        &self.call_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn disconnect_cause(&self) -> Option<DisconnectCause> {
        self.disconnect_cause
    }

    pub fn is_terminal(&self) -> bool {
        self.state == ConnectionState::Disconnected
    }

    pub fn incoming(&mut self) -> Result<ConnectionState, ConnectionError> {
        self.apply(ConnectionEvent::Incoming)
    }

    pub fn accept(&mut self) -> Result<ConnectionState, ConnectionError> {
        self.apply(ConnectionEvent::Accept)
    }

    pub fn reject(&mut self) -> Result<ConnectionState, ConnectionError> {
        self.apply(ConnectionEvent::Reject)
    }

    pub fn disconnect(&mut self) -> Result<ConnectionState, ConnectionError> {
        self.apply(ConnectionEvent::Disconnect)
    }

    pub fn abort(&mut self) -> Result<ConnectionState, ConnectionError> {
        self.apply(ConnectionEvent::Abort)
    }

    /// Applies one event. On error the connection is left untouched.
    pub fn apply(&mut self, event: ConnectionEvent) -> Result<ConnectionState, ConnectionError> {
        let from = self.state;
        match transition(from, self.disconnect_cause, event) {
            Ok((to, cause)) => {
                self.state = to;
                if cause.is_some() {
                    self.disconnect_cause = cause;
                }
                self.state_changed_at = Utc::now();
                tracing::info!(
                    call_id = %self.call_id,
                    event = event.as_str(),
                    from = from.as_str(),
                    to = to.as_str(),
                    cause = ?self.disconnect_cause,
                    "Connection transition"
                );
                Ok(to)
            }
            Err(err) => {
                tracing::warn!(
                    call_id = %self.call_id,
                    event = event.as_str(),
                    state = from.as_str(),
                    error = %err,
                    "Connection transition refused"
                );
                Err(err)
            }
        }
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            call_id: self.call_id.clone(),
            state: self.state,
            disconnect_cause: self.disconnect_cause,
            created_at: self.created_at.to_rfc3339(),
            state_changed_at: self.state_changed_at.to_rfc3339(),
        }
    }
}
