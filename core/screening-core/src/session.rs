//! Screening Session Controller.
//!
//! Owns the single screening session and, for its lifetime, the call's
//! self-managed connection. This is the only place that requests or releases
//! background-process elevation.
//!
//! ## State Machine
//!
//! ```text
//! IDLE      start(id) → SCREENING   record id, elevate, attach connection
//! SCREENING start(id) → SCREENING   stop old session first, then start
//! SCREENING stop()    → IDLE        disconnect (local), release elevation
//! IDLE      stop()    → IDLE        no-op
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::activity::{ActivityEntry, ActivityKind, ActivityLog};
use crate::connection::{Connection, ConnectionEvent, ConnectionSnapshot};
use crate::error::{ConnectionError, ElevationError, ScreeningError};
use crate::types::{CallIdentifier, ConnectionState, DisconnectCause, ScreeningStatus};

/// Keeps the screening process alive while a session is in flight.
///
/// Both operations must be idempotent: hosts deliver stops redundantly.
pub trait BackgroundHost: Send {
    fn acquire(&mut self, call_id: &CallIdentifier) -> Result<(), ElevationError>;
    fn release(&mut self);
    fn is_held(&self) -> bool;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreeningSession {
    pub active_call_id: Option<CallIdentifier>,
    pub status: ScreeningStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    /// Create the connection as part of `start_screening`. When false the
    /// session screens without one until the host routes the call here.
    pub attach_connection_on_start: bool,
    pub activity_capacity: usize,
}

impl ControllerOptions {
    pub fn new() -> Self {
        Self {
            attach_connection_on_start: true,
            activity_capacity: crate::activity::DEFAULT_ACTIVITY_CAPACITY,
        }
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub call_id: CallIdentifier,
    pub superseded: Option<CallIdentifier>,
    pub connection: Option<ConnectionSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    AlreadyIdle,
    Stopped {
        call_id: CallIdentifier,
        connection: Option<ConnectionSnapshot>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub status: ScreeningStatus,
    pub active_call_id: Option<CallIdentifier>,
    pub display_name: Option<String>,
    pub started_at: Option<String>,
    pub elevated: bool,
    pub connection: Option<ConnectionSnapshot>,
}

pub struct ScreeningController<H> {
    session: ScreeningSession,
    connection: Option<Connection>,
    retired: Option<ConnectionSnapshot>,
    host: H,
    options: ControllerOptions,
    activity: ActivityLog,
}

impl<H: BackgroundHost> ScreeningController<H> {
    pub fn new(host: H, options: ControllerOptions) -> Self {
        Self {
            session: ScreeningSession::default(),
            connection: None,
            retired: None,
            host,
            activity: ActivityLog::with_capacity(options.activity_capacity),
            options,
        }
    }

    pub fn current_status(&self) -> ScreeningStatus {
        self.session.status
    }

    pub fn session(&self) -> &ScreeningSession {
        &self.session
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn recent_activity(&self, limit: usize) -> Vec<ActivityEntry> {
        self.activity.recent(limit)
    }

    pub(crate) fn record(&mut self, call_id: &CallIdentifier, kind: ActivityKind) {
        self.activity.record(call_id, kind);
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.session.status,
            active_call_id: self.session.active_call_id.clone(),
            display_name: self.session.display_name.clone(),
            started_at: self.session.started_at.map(|ts| ts.to_rfc3339()),
            elevated: self.host.is_held(),
            connection: self
                .connection
                .as_ref()
                .map(Connection::snapshot)
                .or_else(|| self.retired.clone()),
        }
    }

    pub fn start_screening(&mut self, call_id: CallIdentifier) -> Result<StartOutcome, ScreeningError> {
        self.start_screening_named(call_id, None)
    }

    /// Starts screening `call_id`, replacing any in-flight session.
    pub fn start_screening_named(
        &mut self,
        call_id: CallIdentifier,
        display_name: Option<String>,
    ) -> Result<StartOutcome, ScreeningError> {
        let superseded = match self.session.active_call_id.clone() {
            Some(previous) if self.session.status == ScreeningStatus::Screening => {
                tracing::warn!(
                    previous = %previous,
                    call_id = %call_id,
                    "Superseding in-flight screening session"
                );
                self.record(
                    &previous,
                    ActivityKind::ScreeningSuperseded {
                        by: call_id.clone(),
                    },
                );
                self.stop_screening();
                Some(previous)
            }
            _ => None,
        };

        self.session = ScreeningSession {
            active_call_id: Some(call_id.clone()),
            status: ScreeningStatus::Screening,
            started_at: Some(Utc::now()),
            display_name,
        };

        if let Err(err) = self.host.acquire(&call_id) {
            tracing::error!(error = %err, call_id = %call_id, "Background elevation refused");
            self.record(
                &call_id,
                ActivityKind::ElevationFailed {
                    reason: err.to_string(),
                },
            );
            self.stop_screening();
            return Err(ScreeningError::Elevation(err));
        }

        tracing::info!(call_id = %call_id, "Started call screening");
        self.record(&call_id, ActivityKind::ScreeningStarted);

        let connection = if self.options.attach_connection_on_start {
            match self.attach_connection() {
                Ok(snapshot) => Some(snapshot),
                Err(err) => {
                    self.stop_screening();
                    return Err(err);
                }
            }
        } else {
            None
        };

        Ok(StartOutcome {
            call_id,
            superseded,
            connection,
        })
    }

    /// Attaches a ringing connection for the active call.
    ///
    /// Returns the existing connection unchanged if one is already live.
    pub fn attach_connection(&mut self) -> Result<ConnectionSnapshot, ScreeningError> {
        let call_id = match (&self.session.status, &self.session.active_call_id) {
            (ScreeningStatus::Screening, Some(call_id)) => call_id.clone(),
            _ => return Err(ScreeningError::NotScreening),
        };

        if let Some(existing) = self.connection.as_ref() {
            return Ok(existing.snapshot());
        }

        let mut connection = Connection::new(call_id.clone());
        connection.incoming()?;
        let snapshot = connection.snapshot();
        self.record(
            &call_id,
            ActivityKind::ConnectionTransition {
                state: snapshot.state,
                cause: None,
            },
        );
        self.retired = None;
        self.connection = Some(connection);
        Ok(snapshot)
    }

    /// Delivers a host connection callback to the live connection.
    ///
    /// A connection that reaches DISCONNECTED is discarded; later actions in
    /// the same session report `AlreadyTerminal`.
    pub fn connection_action(
        &mut self,
        event: ConnectionEvent,
    ) -> Result<ConnectionSnapshot, ScreeningError> {
        let connection = match self.connection.as_mut() {
            Some(connection) => connection,
            None => {
                return Err(match &self.retired {
                    Some(retired) => ConnectionError::AlreadyTerminal {
                        cause: retired.disconnect_cause.unwrap_or(DisconnectCause::Local),
                    }
                    .into(),
                    None => ScreeningError::NoConnection,
                })
            }
        };

        connection.apply(event)?;
        let snapshot = connection.snapshot();
        let call_id = snapshot.call_id.clone();
        self.record(
            &call_id,
            ActivityKind::ConnectionTransition {
                state: snapshot.state,
                cause: snapshot.disconnect_cause,
            },
        );

        if snapshot.state == ConnectionState::Disconnected {
            self.connection = None;
            self.retired = Some(snapshot.clone());
        }
        Ok(snapshot)
    }

    /// Ends the session. Safe in every state; calling it twice is the same
    /// as calling it once.
    pub fn stop_screening(&mut self) -> StopOutcome {
        let connection = self.connection.take().map(|mut connection| {
            if !connection.is_terminal() {
                let result = if connection.state() == ConnectionState::New {
                    connection.abort()
                } else {
                    connection.disconnect()
                };
                if let Err(err) = result {
                    tracing::warn!(error = %err, "Failed to disconnect on stop");
                }
            }
            connection.snapshot()
        });
        self.retired = None;
        self.host.release();

        let session = std::mem::take(&mut self.session);
        match (session.status, session.active_call_id) {
            (ScreeningStatus::Screening, Some(call_id)) => {
                if let Some(snapshot) = connection.as_ref() {
                    self.record(
                        &call_id,
                        ActivityKind::ConnectionTransition {
                            state: snapshot.state,
                            cause: snapshot.disconnect_cause,
                        },
                    );
                }
                self.record(&call_id, ActivityKind::ScreeningStopped);
                tracing::info!(call_id = %call_id, "Stopped call screening");
                StopOutcome::Stopped {
                    call_id,
                    connection,
                }
            }
            _ => {
                tracing::debug!("Stop requested with no active screening session");
                StopOutcome::AlreadyIdle
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::NoopHost;

    #[derive(Default)]
    struct RefusingHost {
        releases: usize,
    }

    impl BackgroundHost for RefusingHost {
        fn acquire(&mut self, _call_id: &CallIdentifier) -> Result<(), ElevationError> {
            Err(ElevationError::HeldByOther { pid: 4242 })
        }

        fn release(&mut self) {
            self.releases += 1;
        }

        fn is_held(&self) -> bool {
            false
        }
    }

    fn id(value: &str) -> CallIdentifier {
        CallIdentifier::parse(Some(value)).expect("id")
    }

    fn controller() -> ScreeningController<NoopHost> {
        ScreeningController::new(NoopHost::default(), ControllerOptions::new())
    }

    #[test]
    fn start_records_call_and_attaches_ringing_connection() {
        let mut controller = controller();
        let outcome = controller
            .start_screening(id("+1234567890"))
            .expect("start");

        assert_eq!(controller.current_status(), ScreeningStatus::Screening);
        assert_eq!(
            controller.session().active_call_id,
            Some(id("+1234567890"))
        );
        assert!(controller.host().is_held());
        assert_eq!(outcome.superseded, None);
        assert_eq!(
            outcome.connection.map(|c| c.state),
            Some(ConnectionState::Ringing)
        );
        assert_eq!(
            controller.connection().map(Connection::state),
            Some(ConnectionState::Ringing)
        );
    }

    #[test]
    fn stop_disconnects_locally_and_releases() {
        let mut controller = controller();
        controller.start_screening(id("+1234567890")).expect("start");

        let outcome = controller.stop_screening();
        match outcome {
            StopOutcome::Stopped {
                call_id,
                connection,
            } => {
                assert_eq!(call_id, id("+1234567890"));
                let connection = connection.expect("connection snapshot");
                assert_eq!(connection.state, ConnectionState::Disconnected);
                assert_eq!(connection.disconnect_cause, Some(DisconnectCause::Local));
            }
            StopOutcome::AlreadyIdle => panic!("expected stopped"),
        }
        assert_eq!(controller.current_status(), ScreeningStatus::Idle);
        assert_eq!(controller.session().active_call_id, None);
        assert!(controller.connection().is_none());
        assert!(!controller.host().is_held());
    }

    #[test]
    fn stop_twice_equals_stop_once() {
        let mut controller = controller();
        controller.start_screening(id("+1234567890")).expect("start");
        controller.stop_screening();
        let after_first = controller.status_snapshot();

        assert_eq!(controller.stop_screening(), StopOutcome::AlreadyIdle);
        assert_eq!(controller.status_snapshot(), after_first);
    }

    #[test]
    fn stop_when_never_started_is_noop() {
        let mut controller = controller();
        assert_eq!(controller.stop_screening(), StopOutcome::AlreadyIdle);
        assert!(controller.activity().is_empty());
    }

    #[test]
    fn second_start_supersedes_first() {
        let mut controller = controller();
        controller.start_screening(id("+1111")).expect("first");
        let outcome = controller.start_screening(id("+2222")).expect("second");

        assert_eq!(outcome.superseded, Some(id("+1111")));
        assert_eq!(controller.session().active_call_id, Some(id("+2222")));
        assert_eq!(
            controller.connection().map(|c| c.call_id().clone()),
            Some(id("+2222"))
        );
        assert!(controller
            .recent_activity(20)
            .iter()
            .any(|entry| matches!(&entry.kind, ActivityKind::ScreeningSuperseded { by } if *by == id("+2222"))));
    }

    #[test]
    fn elevation_failure_stops_and_reports() {
        let mut controller =
            ScreeningController::new(RefusingHost::default(), ControllerOptions::new());
        let err = controller
            .start_screening(id("+1234567890"))
            .expect_err("elevation refused");

        assert!(matches!(err, ScreeningError::Elevation(_)));
        assert_eq!(controller.current_status(), ScreeningStatus::Idle);
        assert_eq!(controller.session().active_call_id, None);
        assert!(controller.connection().is_none());
        assert_eq!(controller.host().releases, 1);
    }

    #[test]
    fn reject_retires_connection_and_blocks_accept() {
        let mut controller = controller();
        controller.start_screening(id("+1234567890")).expect("start");

        let rejected = controller
            .connection_action(ConnectionEvent::Reject)
            .expect("reject");
        assert_eq!(rejected.state, ConnectionState::Disconnected);
        assert_eq!(rejected.disconnect_cause, Some(DisconnectCause::Rejected));
        assert!(controller.connection().is_none());

        let err = controller
            .connection_action(ConnectionEvent::Accept)
            .expect_err("accept after reject");
        assert!(matches!(
            err,
            ScreeningError::Connection(ConnectionError::AlreadyTerminal {
                cause: DisconnectCause::Rejected
            })
        ));
        let status = controller.status_snapshot();
        assert_eq!(
            status.connection.map(|c| c.disconnect_cause),
            Some(Some(DisconnectCause::Rejected))
        );

        // The session stays up until the line goes idle.
        assert_eq!(controller.current_status(), ScreeningStatus::Screening);
        assert!(matches!(
            controller.stop_screening(),
            StopOutcome::Stopped {
                connection: None,
                ..
            }
        ));
    }

    #[test]
    fn deferred_attach_screens_without_connection() {
        let mut controller = ScreeningController::new(
            NoopHost::default(),
            ControllerOptions {
                attach_connection_on_start: false,
                ..ControllerOptions::new()
            },
        );
        let outcome = controller.start_screening(id("+1234567890")).expect("start");
        assert_eq!(outcome.connection, None);
        assert!(matches!(
            controller.connection_action(ConnectionEvent::Accept),
            Err(ScreeningError::NoConnection)
        ));

        let attached = controller.attach_connection().expect("attach");
        assert_eq!(attached.state, ConnectionState::Ringing);
        let again = controller.attach_connection().expect("attach again");
        assert_eq!(again.created_at, attached.created_at);

        assert!(matches!(
            controller.stop_screening(),
            StopOutcome::Stopped {
                connection: Some(_),
                ..
            }
        ));
        assert!(matches!(
            controller.attach_connection(),
            Err(ScreeningError::NotScreening)
        ));
    }

    #[test]
    fn accept_then_stop_disconnects_active_call() {
        let mut controller = controller();
        controller.start_screening(id("+1234567890")).expect("start");
        controller
            .connection_action(ConnectionEvent::Accept)
            .expect("accept");

        match controller.stop_screening() {
            StopOutcome::Stopped { connection, .. } => {
                let connection = connection.expect("connection");
                assert_eq!(connection.state, ConnectionState::Disconnected);
                assert_eq!(connection.disconnect_cause, Some(DisconnectCause::Local));
            }
            StopOutcome::AlreadyIdle => panic!("expected stopped"),
        }
    }
}
