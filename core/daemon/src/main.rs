//! PrivacyCall daemon entrypoint.
//!
//! A single-writer service that owns the screening state for one line. The
//! telephony host (or the `call-hook` CLI standing in for it) reports line
//! state changes over a Unix socket; the daemon classifies the originator,
//! runs the screening session, and exposes the self-managed connection.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use privacycall_daemon_protocol::{
    parse_activity, parse_connection_action, parse_start_screening, parse_telephony_event,
    CallState, ConnectionAction, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};
use screening_core::config::{self, ScreeningConfig};
use screening_core::{CallIdentifier, ConnectionEvent, ScreeningError, TelephonyState};
use serde::Serialize;

mod state;

use state::SharedState;

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let base_dir = match config::base_dir() {
        Some(path) => path,
        None => {
            error!("Failed to resolve PrivacyCall base directory");
            std::process::exit(1);
        }
    };
    let socket_path = base_dir.join(SOCKET_NAME);

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "PrivacyCall daemon started");

    let screening_config = match config::load_config(&config::config_path(&base_dir)) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load screening config; using defaults");
            ScreeningConfig::default()
        }
    };
    info!(
        lookup_failure = ?screening_config.policy.lookup_failure,
        number_match = ?screening_config.directory.number_match,
        lookup_timeout_ms = screening_config.directory.lookup_timeout_ms,
        attach_connection_on_start = screening_config.session.attach_connection_on_start,
        "Screening config loaded"
    );
    let shared_state = Arc::new(SharedState::new(&base_dir, &screening_config));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("PRIVACYCALL_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            });
            if let Ok(value) = serde_json::to_value(state.health_snapshot()) {
                data["line"] = value;
            }
            Response::ok(id, data)
        }
        Method::TelephonyEvent => {
            let Some(params) = request.params else {
                return Response::error(id, "invalid_params", "event payload is required");
            };
            let event = match parse_telephony_event(params) {
                Ok(event) => event,
                Err(err) => return Response::error_with_info(id, err),
            };
            info!(
                event_id = ?event.event_id,
                state = ?event.state,
                has_number = event.number.is_some(),
                "Received telephony event"
            );
            let receipt = state.telephony_event(
                event.event_id.as_deref(),
                telephony_state(event.state),
                event.number.as_deref(),
            );
            serialize(id, &receipt, "telephony event outcome")
        }
        Method::StartScreening => {
            let Some(params) = request.params else {
                return Response::error(id, "invalid_params", "number is required");
            };
            let parsed = match parse_start_screening(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            let Some(call_id) = CallIdentifier::parse(Some(&parsed.number)) else {
                return Response::error(id, "invalid_originator", "number must not be empty");
            };
            match state.start_screening(call_id) {
                Ok(outcome) => serialize(id, &outcome, "start outcome"),
                Err(err) => screening_error(id, err),
            }
        }
        Method::StopScreening => serialize(id, &state.stop_screening(), "stop outcome"),
        Method::GetStatus => serialize(id, &state.status_snapshot(), "status"),
        Method::AttachConnection => match state.attach_connection() {
            Ok(snapshot) => serialize(id, &snapshot, "connection"),
            Err(err) => screening_error(id, err),
        },
        Method::ConnectionAction => {
            let Some(params) = request.params else {
                return Response::error(id, "invalid_params", "action is required");
            };
            let parsed = match parse_connection_action(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            match state.connection_action(connection_event(parsed.action)) {
                Ok(snapshot) => serialize(id, &snapshot, "connection"),
                Err(err) => screening_error(id, err),
            }
        }
        Method::GetActivity => {
            let limit = match parse_activity(request.params) {
                Ok(limit) => limit,
                Err(err) => return Response::error_with_info(id, err),
            };
            tracing::debug!(limit, "Activity snapshot request");
            serialize(id, &state.activity_snapshot(limit), "activity")
        }
    }
}

fn telephony_state(state: CallState) -> TelephonyState {
    match state {
        CallState::Idle => TelephonyState::Idle,
        CallState::Ringing => TelephonyState::Ringing,
        CallState::Active => TelephonyState::Active,
        CallState::Disconnected => TelephonyState::Disconnected,
    }
}

fn connection_event(action: ConnectionAction) -> ConnectionEvent {
    match action {
        ConnectionAction::Accept => ConnectionEvent::Accept,
        ConnectionAction::Reject => ConnectionEvent::Reject,
        ConnectionAction::Disconnect => ConnectionEvent::Disconnect,
        ConnectionAction::Abort => ConnectionEvent::Abort,
    }
}

fn screening_error(id: Option<String>, err: ScreeningError) -> Response {
    warn!(code = err.code(), error = %err, "Screening request failed");
    Response::error(id, err.code(), err.to_string())
}

fn serialize<T: Serialize>(id: Option<String>, value: &T, what: &str) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize {}: {}", what, err),
        ),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(method: Method, params: Option<serde_json::Value>) -> Request {
        Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some("req-1".to_string()),
            params,
        }
    }

    fn state() -> (tempfile::TempDir, SharedState) {
        let temp = tempfile::tempdir().expect("temp dir");
        std::fs::write(
            temp.path().join("contacts.json"),
            r#"[{"name": "Mom", "number": "+1555000111"}]"#,
        )
        .expect("contacts");
        let state = SharedState::new(temp.path(), &ScreeningConfig::default());
        (temp, state)
    }

    fn ringing(number: &str) -> serde_json::Value {
        json!({
            "event_id": format!("evt-{}", number),
            "recorded_at": "2026-02-01T09:00:00Z",
            "state": "ringing",
            "number": number,
        })
    }

    #[test]
    fn rejects_protocol_mismatch() {
        let (_temp, state) = state();
        let mut req = request(Method::GetStatus, None);
        req.protocol_version = 99;
        let response = handle_request(req, &state);
        assert!(!response.ok);
        assert_eq!(
            response.error.map(|e| e.code).as_deref(),
            Some("protocol_mismatch")
        );
    }

    #[test]
    fn telephony_event_requires_params() {
        let (_temp, state) = state();
        let response = handle_request(request(Method::TelephonyEvent, None), &state);
        assert_eq!(
            response.error.map(|e| e.code).as_deref(),
            Some("invalid_params")
        );
    }

    #[test]
    fn unknown_caller_routes_to_screening() {
        let (_temp, state) = state();
        let response = handle_request(
            request(Method::TelephonyEvent, Some(ringing("+1234567890"))),
            &state,
        );
        assert!(response.ok);
        let data = response.data.expect("data");
        assert_eq!(data["route"]["outcome"], "screening_started");

        let status = handle_request(request(Method::GetStatus, None), &state);
        let data = status.data.expect("status");
        assert_eq!(data["status"], "screening");
        assert_eq!(data["connection"]["state"], "ringing");
    }

    #[test]
    fn minimal_ringing_event_routes_to_screening() {
        let (_temp, state) = state();
        let response = handle_request(
            request(
                Method::TelephonyEvent,
                Some(json!({"state": "ringing", "number": "+1234567890"})),
            ),
            &state,
        );
        assert!(response.ok, "{:?}", response.error);
        let data = response.data.expect("data");
        assert_eq!(data["duplicate"], false);
        assert_eq!(data["route"]["outcome"], "screening_started");
    }

    #[test]
    fn idle_with_long_number_still_stops_screening() {
        let (_temp, state) = state();
        handle_request(
            request(Method::TelephonyEvent, Some(ringing("+1234567890"))),
            &state,
        );

        let response = handle_request(
            request(
                Method::TelephonyEvent,
                Some(json!({"state": "idle", "number": "9".repeat(200)})),
            ),
            &state,
        );
        assert!(response.ok, "{:?}", response.error);
        assert_eq!(response.data.expect("data")["route"]["outcome"], "stopped");

        let status = handle_request(request(Method::GetStatus, None), &state);
        assert_eq!(status.data.expect("status")["status"], "idle");
    }

    #[test]
    fn second_action_on_terminal_connection_reports_already_terminal() {
        let (_temp, state) = state();
        handle_request(
            request(Method::TelephonyEvent, Some(ringing("+1234567890"))),
            &state,
        );

        let rejected = handle_request(
            request(Method::ConnectionAction, Some(json!({"action": "reject"}))),
            &state,
        );
        assert!(rejected.ok);
        assert_eq!(rejected.data.expect("data")["disconnect_cause"], "rejected");

        let accepted = handle_request(
            request(Method::ConnectionAction, Some(json!({"action": "accept"}))),
            &state,
        );
        assert_eq!(
            accepted.error.map(|e| e.code).as_deref(),
            Some("already_terminal")
        );
    }

    #[test]
    fn attach_without_session_is_not_screening() {
        let (_temp, state) = state();
        let response = handle_request(request(Method::AttachConnection, None), &state);
        assert_eq!(
            response.error.map(|e| e.code).as_deref(),
            Some("not_screening")
        );
    }

    #[test]
    fn start_screening_rejects_blank_number() {
        let (_temp, state) = state();
        let response = handle_request(
            request(Method::StartScreening, Some(json!({"number": "   "}))),
            &state,
        );
        assert_eq!(
            response.error.map(|e| e.code).as_deref(),
            Some("invalid_originator")
        );
    }

    #[test]
    fn activity_lists_newest_first() {
        let (_temp, state) = state();
        handle_request(
            request(Method::TelephonyEvent, Some(ringing("+1234567890"))),
            &state,
        );
        handle_request(request(Method::StopScreening, None), &state);

        let response = handle_request(
            request(Method::GetActivity, Some(json!({"limit": 10}))),
            &state,
        );
        let entries = response.data.expect("data");
        let entries = entries.as_array().expect("array");
        assert!(!entries.is_empty());
        assert_eq!(entries[0]["type"], "screening_stopped");
    }
}
