//! Bounded in-memory log of screening activity, newest last.

use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;

use crate::types::{CallIdentifier, ClassificationResult, ConnectionState, DisconnectCause};

pub const DEFAULT_ACTIVITY_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityKind {
    Classified {
        result: ClassificationResult,
    },
    ScreeningStarted,
    ScreeningSuperseded {
        by: CallIdentifier,
    },
    ElevationFailed {
        reason: String,
    },
    ConnectionTransition {
        state: ConnectionState,
        cause: Option<DisconnectCause>,
    },
    ScreeningStopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    pub recorded_at: String,
    pub call_id: CallIdentifier,
    #[serde(flatten)]
    pub kind: ActivityKind,
}

#[derive(Debug)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ACTIVITY_CAPACITY)
    }
}

impl ActivityLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_ACTIVITY_CAPACITY)),
            capacity,
        }
    }

    pub fn record(&mut self, call_id: &CallIdentifier, kind: ActivityKind) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ActivityEntry {
            recorded_at: Utc::now().to_rfc3339(),
            call_id: call_id.clone(),
            kind,
        });
    }

    /// Most recent `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
