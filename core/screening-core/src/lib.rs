//! # screening-core
//!
//! Call admission and screening state machine for PrivacyCall.
//!
//! Incoming calls from originators the directory does not recognise are
//! diverted into a screening session before they reach the user. This crate
//! holds the control plane for that flow:
//!
//! - [`directory`]: "is this originator known?" behind one query
//! - [`connection`]: the self-managed call leg exposed to the telephony host
//! - [`session`]: the single screening session and its background elevation
//! - [`router`]: the entry point for telephony state notifications
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The only slow step, the
//!   directory lookup, is bounded by [`directory::TimedClassifier`].
//! - **Not thread-safe**: One router per line; callers serialize access
//!   (the daemon keeps it behind a `Mutex`).
//! - **No silent drops**: every failure path ends in a terminal connection
//!   and an idle session.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use screening_core::*;
//!
//! let controller = ScreeningController::new(NoopHost::default(), ControllerOptions::new());
//! let mut router = CallEventRouter::new(
//!     StaticDirectory::new(["+1555000111"]),
//!     controller,
//!     LookupFailurePolicy::FailOpen,
//! );
//! router.on_telephony_state_changed(TelephonyState::Ringing, Some("+1234567890"));
//! ```

pub mod activity;
pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod lease;
pub mod router;
pub mod session;
pub mod types;

pub use activity::{ActivityEntry, ActivityKind, ActivityLog};
pub use config::{load_config, ScreeningConfig};
pub use connection::{Connection, ConnectionEvent, ConnectionSnapshot};
pub use directory::{
    ContactsDirectory, DirectoryClassifier, NumberMatch, StaticDirectory, TimedClassifier,
};
pub use error::{ConnectionError, DirectoryError, ElevationError, ScreeningError};
pub use lease::{LeaseHost, NoopHost};
pub use router::{CallEventRouter, LookupFailurePolicy, PassThroughReason, RouteOutcome};
pub use session::{
    BackgroundHost, ControllerOptions, ScreeningController, ScreeningSession, StartOutcome,
    StatusSnapshot, StopOutcome,
};
pub use types::{
    CallIdentifier, ClassificationResult, ConnectionState, DisconnectCause, ScreeningStatus,
    TelephonyState,
};
