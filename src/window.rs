//! Sliding-window request tracking, per client identity.

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::{AdmissionConfig, HOUR_WINDOW, MINUTE_WINDOW};

/// Ordered log of request timestamps (epoch millis), pruned to a window on
/// every access.
///
/// Timestamps are appended in arrival order, so pruning only ever pops from
/// the front.
#[derive(Debug, Clone, Default)]
pub(crate) struct WindowLog {
    stamps: VecDeque<u64>,
}

impl WindowLog {
    /// Drop every timestamp older than `now - window`. Exact, not
    /// approximate: an entry aged exactly `window` is out.
    pub(crate) fn prune(&mut self, now: u64, window: Duration) {
        let window_millis = window.as_millis() as u64;
        while let Some(&oldest) = self.stamps.front() {
            if now.saturating_sub(oldest) >= window_millis {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    pub(crate) fn record(&mut self, now: u64) {
        self.stamps.push_back(now);
    }

    pub(crate) fn len(&self) -> usize {
        self.stamps.len()
    }

    /// Most recent recorded timestamp, if any.
    pub(crate) fn newest(&self) -> Option<u64> {
        self.stamps.back().copied()
    }
}

/// Per-identity window state plus the running violation count.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClientState {
    pub(crate) minute: WindowLog,
    pub(crate) hour: WindowLog,
    pub(crate) burst: WindowLog,
    pub(crate) uploads: WindowLog,
    /// Breaches across all window checks; never decremented, only discarded
    /// with the whole entry.
    pub(crate) violations: u32,
}

impl ClientState {
    /// Prune all four logs to their windows.
    pub(crate) fn prune(&mut self, now: u64, config: &AdmissionConfig) {
        self.burst.prune(now, config.burst_window);
        self.minute.prune(now, MINUTE_WINDOW);
        self.hour.prune(now, HOUR_WINDOW);
        self.uploads.prune(now, HOUR_WINDOW);
    }

    /// Record an allowed request into every applicable window.
    pub(crate) fn record(&mut self, now: u64, is_upload: bool) {
        self.minute.record(now);
        self.hour.record(now);
        self.burst.record(now);
        if is_upload {
            self.uploads.record(now);
        }
    }

    /// Most recent activity across all windows; `None` once everything has
    /// been pruned away.
    pub(crate) fn last_activity(&self) -> Option<u64> {
        [&self.minute, &self.hour, &self.burst, &self.uploads]
            .iter()
            .filter_map(|log| log.newest())
            .max()
    }
}
