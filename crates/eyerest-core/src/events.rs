use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::overlay::FinishReason;

/// Which top-level watch a scheduler event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchKind {
    /// Counts down the full work interval.
    Work,
    /// Counts down the shortened retry after a forced cancel.
    Escape,
}

impl std::fmt::Display for WatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchKind::Work => f.write_str("work"),
            WatchKind::Escape => f.write_str("escape"),
        }
    }
}

/// Every scheduler state change produces an Event.
/// Hosts subscribe a single sink (tray tooltip, terminal, log).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    WatchStarted {
        watch: WatchKind,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    /// Remaining time of the running watch; zero after an abort.
    TickChanged {
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    Aborted {
        at: DateTime<Utc>,
    },
    OverlayShown {
        episode: u64,
        at: DateTime<Utc>,
    },
    OverlayFinished {
        episode: u64,
        reason: FinishReason,
        at: DateTime<Utc>,
    },
    /// The overlay could not be shown; watches stay cancelled until restarted.
    OverlayFailed {
        episode: u64,
        message: String,
        at: DateTime<Utc>,
    },
}
