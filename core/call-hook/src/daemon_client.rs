//! Client helper for sending requests to the privacycall daemon.
//!
//! The daemon is the only writer. Failures are surfaced to the caller; a
//! request that never reached the daemon is retried once.

use chrono::Utc;
use privacycall_daemon_protocol::{
    CallState, ConnectionAction, ErrorInfo, Method, Request, Response, TelephonyEventParams,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use rand::RngCore;
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const SOCKET_ENV: &str = "PRIVACYCALL_DAEMON_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
// Covers the daemon's bounded directory lookup.
const READ_TIMEOUT_MS: u64 = 2000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request could not be delivered or its response was lost.
    #[error("{message}")]
    Transport { message: String, delivered: bool },

    /// The daemon answered with an error.
    #[error("{}: {}", .0.code, .0.message)]
    Daemon(ErrorInfo),
}

pub fn telephony_event(state: CallState, number: Option<String>) -> Result<Value, ClientError> {
    let event_id = make_event_id(std::process::id());
    let params = TelephonyEventParams {
        event_id: Some(event_id.clone()),
        recorded_at: Some(Utc::now().to_rfc3339()),
        state,
        number,
    };
    if let Err(err) = params.validate() {
        return Err(ClientError::Daemon(err));
    }
    let params = serde_json::to_value(&params).map_err(|err| ClientError::Transport {
        message: format!("Failed to serialize event: {}", err),
        delivered: false,
    })?;
    // Same event id on retry, so a redelivery is ignored by the daemon.
    send_with_retry(Method::TelephonyEvent, Some(event_id), Some(params))
}

pub fn start_screening(number: &str) -> Result<Value, ClientError> {
    send_with_retry(
        Method::StartScreening,
        None,
        Some(serde_json::json!({ "number": number })),
    )
}

pub fn connection_action(action: ConnectionAction) -> Result<Value, ClientError> {
    send_with_retry(
        Method::ConnectionAction,
        None,
        Some(serde_json::json!({ "action": action })),
    )
}

pub fn activity(limit: Option<usize>) -> Result<Value, ClientError> {
    let params = limit.map(|limit| serde_json::json!({ "limit": limit }));
    send_with_retry(Method::GetActivity, None, params)
}

pub fn simple(method: Method) -> Result<Value, ClientError> {
    send_with_retry(method, None, None)
}

fn socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let base = screening_core::config::base_dir()
        .ok_or_else(|| "Home directory not found".to_string())?;
    Ok(base.join(SOCKET_NAME))
}

/// Methods the daemon can safely apply twice.
fn retry_after_delivery(method: Method) -> bool {
    !matches!(method, Method::StartScreening | Method::ConnectionAction)
}

fn send_with_retry(
    method: Method,
    id: Option<String>,
    params: Option<Value>,
) -> Result<Value, ClientError> {
    let build = || Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: id.clone(),
        params: params.clone(),
    };

    match send(build()) {
        Err(ClientError::Transport { message, delivered })
            if !delivered || retry_after_delivery(method) =>
        {
            tracing::warn!(error = %message, method = ?method, "Failed to reach daemon; retrying");
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send(build()).map_err(|retry_err| {
                tracing::warn!(error = %retry_err, method = ?method, "Retry failed");
                retry_err
            })
        }
        other => other,
    }
}

fn send(request: Request) -> Result<Value, ClientError> {
    let response = send_request(request)?;
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(ClientError::Daemon(response.error.unwrap_or_else(|| {
            ErrorInfo::new("unknown_error", "Unknown daemon error")
        })))
    }
}

fn send_request(request: Request) -> Result<Response, ClientError> {
    let undelivered = |message: String| ClientError::Transport {
        message,
        delivered: false,
    };

    let socket = socket_path().map_err(undelivered)?;
    let mut stream = UnixStream::connect(&socket)
        .map_err(|err| undelivered(format!("Failed to connect to daemon socket: {}", err)))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| undelivered(format!("Failed to write request: {}", err)))?;
    stream
        .write_all(b"\n")
        .map_err(|err| undelivered(format!("Failed to flush request: {}", err)))?;
    stream.flush().ok();

    read_response(&mut stream).map_err(|message| ClientError::Transport {
        message,
        delivered: true,
    })
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES * 4 {
                    return Err("Response exceeded maximum size".to_string());
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
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}

fn make_event_id(pid: u32) -> String {
    let mut random = rand::thread_rng();
    let rand = random.next_u64();
    format!("evt-{}-{}-{:x}", Utc::now().timestamp_millis(), pid, rand)
}
