//! Core value types shared by the router, the controller and the connection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest originator accepted from the host, in bytes.
pub const MAX_CALL_IDENTIFIER_LEN: usize = 64;

/// Originating phone number of an incoming call.
///
/// Stored exactly as the host reported it. Equality is exact-string; any
/// looser matching is a directory concern (see [`crate::directory::NumberMatch`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallIdentifier(String);

impl CallIdentifier {
    /// Returns `None` for an absent, empty, whitespace-only, or over-long
    /// originator.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw {
            Some(value) if value.len() > MAX_CALL_IDENTIFIER_LEN => {
                tracing::warn!(len = value.len(), "Originator too long; treating as unusable");
                None
            }
            Some(value) if !value.trim().is_empty() => Some(Self(value.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelephonyState {
    Idle,
    Ringing,
    Active,
    Disconnected,
}

impl TelephonyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TelephonyState::Idle => "idle",
            TelephonyState::Ringing => "ringing",
            TelephonyState::Active => "active",
            TelephonyState::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationResult {
    Known,
    Unknown,
    LookupFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreeningStatus {
    #[default]
    Idle,
    Screening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    New,
    Ringing,
    Active,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Ringing => "ringing",
            ConnectionState::Active => "active",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectCause {
    /// Ended from this side (explicit disconnect or session stop).
    Local,
    /// Declined while ringing.
    Rejected,
    /// Torn down before it was answered, e.g. the caller hung up.
    Canceled,
}

impl DisconnectCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectCause::Local => "local",
            DisconnectCause::Rejected => "rejected",
            DisconnectCause::Canceled => "canceled",
        }
    }
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
