//! Background-process lease for an in-flight screening session.
//!
//! Holding the lease tells the host supervisor that this process is running
//! a screening session and must not be reclaimed until it is released.
//!
//! # Lease Directory Structure
//!
//! Location: `{base}/screening.lease/`, one per base directory (single line).
//!
//! ```text
//! screening.lease/
//! ├── pid          # Plain text: the holder's process ID
//! └── meta.json    # { pid, call_id, created }
//! ```
//!
//! The directory is created with a single `mkdir`, so two processes can never
//! both believe they hold it. A lease whose holder PID is gone is stale and
//! is taken over. A lease with no readable PID is treated as mid-claim until
//! it is older than [`CLAIM_GRACE`].

use chrono::Utc;
use fs_err as fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ElevationError;
use crate::session::BackgroundHost;
use crate::types::CallIdentifier;

const LEASE_DIR_NAME: &str = "screening.lease";

/// How long a lease directory without a PID file is left to its creator.
pub const CLAIM_GRACE: Duration = Duration::from_secs(10);

pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // 0 and values past i32::MAX address process groups, not a process.
        let pid = match i32::try_from(pid) {
            Ok(pid) if pid > 0 => pid,
            _ => return false,
        };
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to someone else.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[derive(Debug)]
pub struct LeaseHost {
    lease_dir: PathBuf,
    pid: u32,
    held: bool,
    claim_grace: Duration,
}

impl LeaseHost {
    pub fn new(base_dir: &Path) -> Self {
        Self::with_pid(base_dir, std::process::id())
    }

    pub fn with_pid(base_dir: &Path, pid: u32) -> Self {
        Self {
            lease_dir: base_dir.join(LEASE_DIR_NAME),
            pid,
            held: false,
            claim_grace: CLAIM_GRACE,
        }
    }

    #[cfg(test)]
    fn with_claim_grace(mut self, grace: Duration) -> Self {
        self.claim_grace = grace;
        self
    }

    pub fn lease_dir(&self) -> &Path {
        &self.lease_dir
    }

    /// PID recorded in the lease, if a readable lease exists.
    pub fn current_holder(&self) -> Option<u32> {
        fs::read_to_string(self.lease_dir.join("pid"))
            .ok()
            .and_then(|content| content.trim().parse().ok())
    }

    // A lease directory with no PID yet may belong to a process between its
    // mkdir and its first write.
    fn is_mid_claim(&self) -> bool {
        match fs::metadata(&self.lease_dir).and_then(|meta| meta.modified()) {
            Ok(modified) => modified
                .elapsed()
                .map(|age| age < self.claim_grace)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn write_metadata(&self, call_id: &CallIdentifier) -> std::io::Result<()> {
        fs::write(self.lease_dir.join("pid"), self.pid.to_string())?;
        let meta = serde_json::json!({
            "pid": self.pid,
            "call_id": call_id.as_str(),
            "created": Utc::now().to_rfc3339(),
        });
        let content = serde_json::to_string_pretty(&meta).map_err(std::io::Error::other)?;
        fs::write(self.lease_dir.join("meta.json"), content)
    }

    fn create_fresh(&self, call_id: &CallIdentifier) -> Result<(), ElevationError> {
        fs::create_dir(&self.lease_dir).map_err(|source| ElevationError::Io {
            context: format!("create {}", self.lease_dir.display()),
            source,
        })?;
        self.write_metadata(call_id).map_err(|source| {
            let _ = fs::remove_dir_all(&self.lease_dir);
            ElevationError::Io {
                context: "write lease metadata".to_string(),
                source,
            }
        })
    }
}

impl BackgroundHost for LeaseHost {
    fn acquire(&mut self, call_id: &CallIdentifier) -> Result<(), ElevationError> {
        if let Some(parent) = self.lease_dir.parent() {
            fs::create_dir_all(parent).map_err(|source| ElevationError::Io {
                context: format!("create {}", parent.display()),
                source,
            })?;
        }

        match fs::create_dir(&self.lease_dir) {
            Ok(()) => {
                self.write_metadata(call_id).map_err(|source| {
                    let _ = fs::remove_dir_all(&self.lease_dir);
                    ElevationError::Io {
                        context: "write lease metadata".to_string(),
                        source,
                    }
                })?;
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => match self.current_holder() {
                Some(pid) if pid == self.pid => {
                    self.write_metadata(call_id)
                        .map_err(|source| ElevationError::Io {
                            context: "refresh lease metadata".to_string(),
                            source,
                        })?;
                }
                Some(pid) if is_pid_alive(pid) => {
                    return Err(ElevationError::HeldByOther { pid });
                }
                None if self.is_mid_claim() => {
                    return Err(ElevationError::BeingClaimed);
                }
                stale => {
                    tracing::info!(
                        stale_pid = ?stale,
                        path = %self.lease_dir.display(),
                        "Taking over stale screening lease"
                    );
                    let _ = fs::remove_dir_all(&self.lease_dir);
                    self.create_fresh(call_id)?;
                }
            },
            Err(source) => {
                return Err(ElevationError::Io {
                    context: format!("create {}", self.lease_dir.display()),
                    source,
                })
            }
        }

        self.held = true;
        tracing::debug!(pid = self.pid, call_id = %call_id, "Screening lease acquired");
        Ok(())
    }

    fn release(&mut self) {
        self.held = false;
        match self.current_holder() {
            Some(pid) if pid != self.pid && is_pid_alive(pid) => {
                tracing::warn!(holder = pid, "Screening lease owned by another process; leaving it");
                return;
            }
            None if self.is_mid_claim() => {
                tracing::debug!("Screening lease has no holder yet; leaving it");
                return;
            }
            _ => {}
        }
        if !self.lease_dir.exists() {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.lease_dir) {
            tracing::warn!(error = %err, "Failed to release screening lease");
        } else {
            tracing::debug!(pid = self.pid, "Screening lease released");
        }
    }

    fn is_held(&self) -> bool {
        self.held
    }
}

/// Host that always grants elevation. Used where no supervisor exists.
#[derive(Debug, Default)]
pub struct NoopHost {
    held: bool,
}

impl BackgroundHost for NoopHost {
    fn acquire(&mut self, _call_id: &CallIdentifier) -> Result<(), ElevationError> {
        self.held = true;
        Ok(())
    }

    fn release(&mut self) {
        self.held = false;
    }

    fn is_held(&self) -> bool {
        self.held
    }
}
