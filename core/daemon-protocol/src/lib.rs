//! IPC protocol types and validation for privacycall-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;
pub const MAX_ACTIVITY_LIMIT: usize = 1000;
const MAX_NUMBER_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    TelephonyEvent,
    StartScreening,
    StopScreening,
    GetStatus,
    AttachConnection,
    ConnectionAction,
    GetActivity,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Line state as reported by the host telephony subsystem.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Ringing,
    #[serde(alias = "offhook")]
    Active,
    Disconnected,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionAction {
    Accept,
    Reject,
    Disconnect,
    Abort,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TelephonyEventParams {
    /// Client-chosen id used to recognise redelivery; optional.
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub recorded_at: Option<String>,
    pub state: CallState,
    /// Originator as delivered by the host; absent for anonymous callers.
    #[serde(default)]
    pub number: Option<String>,
}

impl TelephonyEventParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if let Some(event_id) = &self.event_id {
            if event_id.trim().is_empty() {
                return Err(ErrorInfo::new(
                    "invalid_event_id",
                    "event_id must not be empty when present",
                ));
            }
            if event_id.len() > 128 {
                return Err(ErrorInfo::new(
                    "invalid_event_id",
                    "event_id must be 128 characters or fewer",
                ));
            }
        }

        if let Some(recorded_at) = &self.recorded_at {
            if DateTime::parse_from_rfc3339(recorded_at).is_err() {
                return Err(ErrorInfo::new(
                    "invalid_timestamp",
                    "recorded_at must be RFC3339",
                ));
            }
        }

        // The number is never rejected here: an unusable originator on
        // RINGING passes through, and other states ignore it.
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StartScreeningParams {
    pub number: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionActionParams {
    pub action: ConnectionAction,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ActivityParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

pub fn parse_telephony_event(params: Value) -> Result<TelephonyEventParams, ErrorInfo> {
    let event: TelephonyEventParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("telephony event payload is invalid: {}", err),
        )
    })?;
    event.validate()?;
    Ok(event)
}

pub fn parse_start_screening(params: Value) -> Result<StartScreeningParams, ErrorInfo> {
    let parsed: StartScreeningParams = serde_json::from_value(params)
        .map_err(|err| ErrorInfo::new("invalid_params", format!("invalid params: {}", err)))?;
    if parsed.number.trim().is_empty() {
        return Err(ErrorInfo::new(
            "invalid_originator",
            "number must not be empty",
        ));
    }
    check_number_length(&parsed.number)?;
    Ok(parsed)
}

pub fn parse_connection_action(params: Value) -> Result<ConnectionActionParams, ErrorInfo> {
    serde_json::from_value(params)
        .map_err(|err| ErrorInfo::new("invalid_params", format!("invalid params: {}", err)))
}

pub fn parse_activity(params: Option<Value>) -> Result<usize, ErrorInfo> {
    let parsed = match params {
        Some(value) => serde_json::from_value::<ActivityParams>(value)
            .map_err(|err| ErrorInfo::new("invalid_params", format!("invalid params: {}", err)))?,
        None => ActivityParams::default(),
    };
    Ok(parsed.limit.unwrap_or(100).min(MAX_ACTIVITY_LIMIT))
}

fn check_number_length(number: &str) -> Result<(), ErrorInfo> {
    if number.len() > MAX_NUMBER_LEN {
        return Err(ErrorInfo::new(
            "invalid_originator",
            format!("number must be {} characters or fewer", MAX_NUMBER_LEN),
        ));
    }
    Ok(())
}
