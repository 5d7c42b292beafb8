//! call-hook: CLI adapter between the telephony host and privacycall-daemon.
//!
//! The host (or a shell script standing in for it) invokes `call-hook event`
//! on every line state change. The remaining subcommands are the manual
//! session control surface.
//!
//! ## Subcommands
//!
//! - `event <state> [number]`: forward a telephony state change
//! - `start <number>` / `stop`: manual screening control
//! - `status`, `activity`, `health`: read-only views
//! - `attach`, `connection <action>`: self-managed connection callbacks

mod daemon_client;
mod logging;

use clap::{Parser, Subcommand, ValueEnum};
use daemon_client::ClientError;
use privacycall_daemon_protocol::{CallState, ConnectionAction, Method};

#[derive(Parser)]
#[command(name = "call-hook")]
#[command(about = "PrivacyCall telephony hook")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward a telephony state change to the daemon
    Event {
        #[arg(value_enum)]
        state: StateArg,

        /// Originator as delivered by the host; omit for anonymous callers
        #[arg(value_name = "NUMBER")]
        number: Option<String>,
    },

    /// Start screening a call manually
    Start {
        #[arg(value_name = "NUMBER")]
        number: String,
    },

    /// Stop the current screening session
    Stop,

    /// Show the current screening status
    Status,

    /// Attach the self-managed connection for the active call
    Attach,

    /// Deliver a connection callback
    Connection {
        #[arg(value_enum)]
        action: ActionArg,
    },

    /// Show recent screening activity (newest first)
    Activity {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Check that the daemon is running
    Health,
}

#[derive(Clone, Copy, ValueEnum)]
enum StateArg {
    Idle,
    Ringing,
    #[value(alias = "offhook")]
    Active,
    Disconnected,
}

impl From<StateArg> for CallState {
    fn from(value: StateArg) -> Self {
        match value {
            StateArg::Idle => CallState::Idle,
            StateArg::Ringing => CallState::Ringing,
            StateArg::Active => CallState::Active,
            StateArg::Disconnected => CallState::Disconnected,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Accept,
    Reject,
    Disconnect,
    Abort,
}

impl From<ActionArg> for ConnectionAction {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::Accept => ConnectionAction::Accept,
            ActionArg::Reject => ConnectionAction::Reject,
            ActionArg::Disconnect => ConnectionAction::Disconnect,
            ActionArg::Abort => ConnectionAction::Abort,
        }
    }
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let (label, result) = run(cli.command);
    match result {
        Ok(data) => {
            tracing::debug!(command = label, "call-hook command succeeded");
            match serde_json::to_string_pretty(&data) {
                Ok(text) => println!("{}", text),
                Err(err) => {
                    tracing::error!(error = %err, "Failed to render daemon response");
                    std::process::exit(1);
                }
            }
        }
        Err(err) => {
            tracing::error!(command = label, error = %err, "call-hook command failed");
            eprintln!("call-hook {}: {}", label, err);
            std::process::exit(1);
        }
    }
}

fn run(command: Commands) -> (&'static str, Result<serde_json::Value, ClientError>) {
    match command {
        Commands::Event { state, number } => {
            tracing::info!(state = ?CallState::from(state), has_number = number.is_some(), "Forwarding telephony event");
            ("event", daemon_client::telephony_event(state.into(), number))
        }
        Commands::Start { number } => ("start", daemon_client::start_screening(&number)),
        Commands::Stop => ("stop", daemon_client::simple(Method::StopScreening)),
        Commands::Status => ("status", daemon_client::simple(Method::GetStatus)),
        Commands::Attach => ("attach", daemon_client::simple(Method::AttachConnection)),
        Commands::Connection { action } => (
            "connection",
            daemon_client::connection_action(action.into()),
        ),
        Commands::Activity { limit } => ("activity", daemon_client::activity(limit)),
        Commands::Health => ("health", daemon_client::simple(Method::GetHealth)),
    }
}
