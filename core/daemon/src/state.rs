//! In-memory state managed by the daemon.
//!
//! The daemon owns exactly one router for the line. Every request holds the
//! router lock for its full duration, classifier lookup included, so
//! telephony events are handled one at a time.

use chrono::{DateTime, Utc};
use screening_core::config::ScreeningConfig;
use screening_core::{
    ActivityEntry, CallEventRouter, CallIdentifier, ConnectionEvent, ConnectionSnapshot,
    ContactsDirectory, LeaseHost, RouteOutcome, ScreeningController, ScreeningError,
    StartOutcome, StatusSnapshot, StopOutcome, TelephonyState, TimedClassifier,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

// Redelivered events (client retries) are recognised by id within this window
// and answered with the route they produced the first time.
const RECENT_EVENT_IDS: usize = 64;

pub type DaemonRouter = CallEventRouter<TimedClassifier<ContactsDirectory>, LeaseHost>;

struct LineState {
    router: DaemonRouter,
    recent_events: VecDeque<(String, RouteOutcome)>,
    events_handled: u64,
}

pub struct SharedState {
    line: Mutex<LineState>,
    started_at: DateTime<Utc>,
    contacts_path: PathBuf,
    lookup_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventReceipt {
    pub duplicate: bool,
    pub route: RouteOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub started_at: String,
    pub events_handled: u64,
    pub policy: screening_core::LookupFailurePolicy,
    pub contacts_path: String,
    pub lookup_timeout_ms: u64,
}

impl SharedState {
    pub fn new(base_dir: &Path, config: &ScreeningConfig) -> Self {
        let contacts_path = config.directory.resolve_contacts_path(base_dir);
        let directory = ContactsDirectory::new(contacts_path.clone(), config.directory.number_match);
        let classifier = TimedClassifier::new(directory, config.directory.lookup_timeout());
        let controller = ScreeningController::new(
            LeaseHost::new(base_dir),
            config.session.controller_options(),
        );
        let router = CallEventRouter::new(classifier, controller, config.policy.lookup_failure);

        Self {
            line: Mutex::new(LineState {
                router,
                recent_events: VecDeque::with_capacity(RECENT_EVENT_IDS),
                events_handled: 0,
            }),
            started_at: Utc::now(),
            contacts_path,
            lookup_timeout_ms: config.directory.lookup_timeout().as_millis() as u64,
        }
    }

    // A panic inside a handler must not wedge the line; the router's own
    // state is still consistent between transitions.
    fn line(&self) -> MutexGuard<'_, LineState> {
        self.line.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn telephony_event(
        &self,
        event_id: Option<&str>,
        state: TelephonyState,
        number: Option<&str>,
    ) -> EventReceipt {
        let mut line = self.line();
        if let Some(event_id) = event_id {
            let earlier = line
                .recent_events
                .iter()
                .find(|(seen, _)| seen == event_id)
                .map(|(_, route)| route.clone());
            if let Some(route) = earlier {
                tracing::debug!(event_id = %event_id, "Ignoring redelivered telephony event");
                return EventReceipt {
                    duplicate: true,
                    route,
                };
            }
        }
        line.events_handled += 1;

        let route = line.router.on_telephony_state_changed(state, number);
        if let Some(event_id) = event_id {
            if line.recent_events.len() == RECENT_EVENT_IDS {
                line.recent_events.pop_front();
            }
            line.recent_events
                .push_back((event_id.to_string(), route.clone()));
        }
        tracing::info!(
            event_id = ?event_id,
            state = state.as_str(),
            route = ?route,
            "Telephony event routed"
        );
        EventReceipt {
            duplicate: false,
            route,
        }
    }

    pub fn start_screening(&self, call_id: CallIdentifier) -> Result<StartOutcome, ScreeningError> {
        let mut line = self.line();
        let display_name = {
            use screening_core::DirectoryClassifier;
            line.router.classifier().display_name(&call_id)
        };
        line.router
            .controller_mut()
            .start_screening_named(call_id, display_name)
    }

    pub fn stop_screening(&self) -> StopOutcome {
        self.line().router.controller_mut().stop_screening()
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        self.line().router.controller().status_snapshot()
    }

    pub fn attach_connection(&self) -> Result<ConnectionSnapshot, ScreeningError> {
        self.line().router.controller_mut().attach_connection()
    }

    pub fn connection_action(
        &self,
        event: ConnectionEvent,
    ) -> Result<ConnectionSnapshot, ScreeningError> {
        self.line().router.controller_mut().connection_action(event)
    }

    pub fn activity_snapshot(&self, limit: usize) -> Vec<ActivityEntry> {
        self.line().router.controller().recent_activity(limit)
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        let line = self.line();
        HealthSnapshot {
            started_at: self.started_at.to_rfc3339(),
            events_handled: line.events_handled,
            policy: line.router.policy(),
            contacts_path: self.contacts_path.display().to_string(),
            lookup_timeout_ms: self.lookup_timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screening_core::{ConnectionState, DisconnectCause, ScreeningStatus};

    fn state_with_contacts(contacts: &str) -> (tempfile::TempDir, SharedState) {
        let temp = tempfile::tempdir().expect("temp dir");
        std::fs::write(temp.path().join("contacts.json"), contacts).expect("contacts");
        let state = SharedState::new(temp.path(), &ScreeningConfig::default());
        (temp, state)
    }

    #[test]
    fn unknown_ringing_screens_and_idle_stops() {
        let (temp, state) = state_with_contacts(r#"[{"name": "Mom", "number": "+1555000111"}]"#);

        let receipt = state.telephony_event(Some("evt-1"), TelephonyState::Ringing, Some("+1234567890"));
        assert!(!receipt.duplicate);
        assert!(matches!(
            receipt.route,
            RouteOutcome::ScreeningStarted { .. }
        ));
        assert!(temp.path().join("screening.lease").exists());

        let status = state.status_snapshot();
        assert_eq!(status.status, ScreeningStatus::Screening);
        assert!(status.elevated);
        assert_eq!(
            status.connection.map(|c| c.state),
            Some(ConnectionState::Ringing)
        );

        state.telephony_event(Some("evt-2"), TelephonyState::Idle, None);
        let status = state.status_snapshot();
        assert_eq!(status.status, ScreeningStatus::Idle);
        assert!(!status.elevated);
        assert!(!temp.path().join("screening.lease").exists());
    }

    #[test]
    fn known_caller_is_not_screened() {
        let (_temp, state) = state_with_contacts(r#"[{"number": "+1555000111"}]"#);
        state.telephony_event(Some("evt-1"), TelephonyState::Ringing, Some("+1555000111"));
        assert_eq!(state.status_snapshot().status, ScreeningStatus::Idle);
    }

    #[test]
    fn redelivered_event_is_ignored() {
        let (_temp, state) = state_with_contacts("[]");
        state.telephony_event(Some("evt-1"), TelephonyState::Ringing, Some("+1234567890"));
        let again = state.telephony_event(Some("evt-1"), TelephonyState::Ringing, Some("+1234567890"));
        assert!(again.duplicate);
        assert!(matches!(
            again.route,
            RouteOutcome::ScreeningStarted { .. }
        ));
        assert_eq!(state.health_snapshot().events_handled, 1);
    }

    #[test]
    fn events_without_id_are_always_routed() {
        let (_temp, state) = state_with_contacts("[]");
        let first = state.telephony_event(None, TelephonyState::Ringing, Some("+1234567890"));
        let second = state.telephony_event(None, TelephonyState::Idle, None);
        assert!(!first.duplicate);
        assert!(!second.duplicate);
        assert!(matches!(second.route, RouteOutcome::Stopped { .. }));
        assert_eq!(state.health_snapshot().events_handled, 2);
        assert_eq!(state.status_snapshot().status, ScreeningStatus::Idle);
    }

    #[test]
    fn manual_start_uses_contact_name() {
        let (_temp, state) = state_with_contacts(r#"[{"name": "Dentist", "number": "+1777"}]"#);
        let call_id = CallIdentifier::parse(Some("+1777")).expect("id");
        state.start_screening(call_id).expect("start");
        assert_eq!(
            state.status_snapshot().display_name.as_deref(),
            Some("Dentist")
        );

        let rejected = state
            .connection_action(ConnectionEvent::Reject)
            .expect("reject");
        assert_eq!(rejected.disconnect_cause, Some(DisconnectCause::Rejected));
        assert!(state.connection_action(ConnectionEvent::Accept).is_err());

        assert!(matches!(state.stop_screening(), StopOutcome::Stopped { .. }));
        assert_eq!(state.stop_screening(), StopOutcome::AlreadyIdle);
    }
}
