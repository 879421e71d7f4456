//! Suspicious-activity detection, independent of the configured limits.
//!
//! Catches rapid-fire request patterns that stay under the standard windows,
//! e.g. a client pacing itself just below the per-minute limit but hammering
//! in sub-second spurts.

use crate::config::AdmissionConfig;
use crate::window::WindowLog;

/// Per-identity abuse heuristic state.
///
/// `errors` and `large_requests` are recorded but do not influence the
/// verdict yet; they reset together with the rapid log so a single historical
/// burst never permanently biases a client.
#[derive(Debug, Clone)]
pub(crate) struct ActivityProfile {
    rapid: WindowLog,
    errors: u32,
    large_requests: u32,
    last_reset: u64,
}

impl ActivityProfile {
    pub(crate) fn new(now: u64) -> Self {
        Self { rapid: WindowLog::default(), errors: 0, large_requests: 0, last_reset: now }
    }

    /// Observe one request at `now`. Returns `true` when the rapid-request
    /// count (including this request) reaches the configured threshold.
    pub(crate) fn observe(&mut self, now: u64, config: &AdmissionConfig) -> bool {
        self.maybe_reset(now, config);
        self.rapid.prune(now, config.rapid_window);
        self.rapid.record(now);
        self.rapid.len() >= config.rapid_request_threshold as usize
    }

    /// Record a downstream error outcome for this identity.
    pub(crate) fn record_error(&mut self, now: u64, config: &AdmissionConfig) {
        self.maybe_reset(now, config);
        self.errors = self.errors.saturating_add(1);
    }

    /// Record an oversized request from this identity.
    pub(crate) fn record_large_request(&mut self, now: u64, config: &AdmissionConfig) {
        self.maybe_reset(now, config);
        self.large_requests = self.large_requests.saturating_add(1);
    }

    /// All fields reset in unison once the reset interval has elapsed.
    fn maybe_reset(&mut self, now: u64, config: &AdmissionConfig) {
        let interval = config.activity_reset_interval.as_millis() as u64;
        if now.saturating_sub(self.last_reset) > interval {
            self.rapid = WindowLog::default();
            self.errors = 0;
            self.large_requests = 0;
            self.last_reset = now;
        }
    }

    /// Most recent touch, for the reaper.
    pub(crate) fn last_activity(&self) -> u64 {
        self.rapid.newest().unwrap_or(0).max(self.last_reset)
    }
}
