//! Call Event Router: the single entry point for telephony notifications.
//!
//! ```text
//! RINGING + id   → classify → Unknown       → start screening
//!                           → Known         → pass through
//!                           → LookupFailed  → policy (fail-open: pass through)
//! RINGING, no usable id → pass through (anonymous callers are never screened)
//! ACTIVE         → informational
//! DISCONNECTED   → informational (the line still reports IDLE afterwards)
//! IDLE           → stop screening (idempotent)
//! ```
//!
//! Handlers run to completion, classifier lookup included, before returning.
//! Callers that share a router across threads serialize access to it.

use serde::{Deserialize, Serialize};

use crate::activity::ActivityKind;
use crate::directory::DirectoryClassifier;
use crate::session::{BackgroundHost, ScreeningController, StopOutcome};
use crate::types::{CallIdentifier, ClassificationResult, TelephonyState};

/// What to do when the directory cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupFailurePolicy {
    /// Let the call through unscreened.
    #[default]
    FailOpen,
    /// Screen the call as if the originator were unknown.
    FailClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassThroughReason {
    KnownCaller,
    AnonymousCaller,
    LookupFailedFailOpen,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    PassThrough {
        reason: PassThroughReason,
    },
    ScreeningStarted {
        call_id: CallIdentifier,
        superseded: Option<CallIdentifier>,
    },
    ScreeningFailed {
        call_id: CallIdentifier,
        code: String,
        message: String,
    },
    Stopped {
        stop: StopOutcome,
    },
    Informational {
        state: TelephonyState,
    },
}

pub struct CallEventRouter<C, H> {
    classifier: C,
    controller: ScreeningController<H>,
    policy: LookupFailurePolicy,
}

impl<C, H> CallEventRouter<C, H>
where
    C: DirectoryClassifier,
    H: BackgroundHost,
{
    pub fn new(classifier: C, controller: ScreeningController<H>, policy: LookupFailurePolicy) -> Self {
        tracing::info!(policy = ?policy, "Call event router ready");
        Self {
            classifier,
            controller,
            policy,
        }
    }

    pub fn policy(&self) -> LookupFailurePolicy {
        self.policy
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn controller(&self) -> &ScreeningController<H> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ScreeningController<H> {
        &mut self.controller
    }

    pub fn on_telephony_state_changed(
        &mut self,
        state: TelephonyState,
        id: Option<&str>,
    ) -> RouteOutcome {
        tracing::debug!(state = state.as_str(), number = ?id, "Telephony state changed");

        match state {
            TelephonyState::Ringing => match CallIdentifier::parse(id) {
                Some(call_id) => self.handle_incoming(call_id),
                None => {
                    tracing::debug!("Ringing with no originator; passing through");
                    RouteOutcome::PassThrough {
                        reason: PassThroughReason::AnonymousCaller,
                    }
                }
            },
            TelephonyState::Active => {
                tracing::debug!("Call answered/started");
                RouteOutcome::Informational { state }
            }
            TelephonyState::Disconnected => RouteOutcome::Informational { state },
            TelephonyState::Idle => {
                tracing::debug!("Call ended");
                RouteOutcome::Stopped {
                    stop: self.controller.stop_screening(),
                }
            }
        }
    }

    fn handle_incoming(&mut self, call_id: CallIdentifier) -> RouteOutcome {
        let result = self.classifier.classify(&call_id);
        tracing::info!(call_id = %call_id, result = ?result, "Originator classified");
        self.controller
            .record(&call_id, ActivityKind::Classified { result });

        match (result, self.policy) {
            (ClassificationResult::Known, _) => {
                return RouteOutcome::PassThrough {
                    reason: PassThroughReason::KnownCaller,
                }
            }
            (ClassificationResult::LookupFailed, LookupFailurePolicy::FailOpen) => {
                tracing::warn!(call_id = %call_id, "Directory unavailable; failing open");
                return RouteOutcome::PassThrough {
                    reason: PassThroughReason::LookupFailedFailOpen,
                };
            }
            (ClassificationResult::LookupFailed, LookupFailurePolicy::FailClosed) => {
                tracing::warn!(call_id = %call_id, "Directory unavailable; failing closed");
            }
            (ClassificationResult::Unknown, _) => {}
        }

        // Unknown and unreachable callers have no contact entry to name them.
        match self.controller.start_screening(call_id.clone()) {
            Ok(outcome) => RouteOutcome::ScreeningStarted {
                call_id: outcome.call_id,
                superseded: outcome.superseded,
            },
            Err(err) => RouteOutcome::ScreeningFailed {
                call_id,
                code: err.code().to_string(),
                message: err.to_string(),
            },
        }
    }
}
