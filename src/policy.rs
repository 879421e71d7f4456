//! The admission policy: per-identity state tables and the decision chain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::activity::ActivityProfile;
use crate::clock::{Clock, SystemClock};
use crate::config::{AdmissionConfig, ConfigError, MINUTE_WINDOW};
use crate::registry::BlockRegistry;
use crate::request::RequestDescriptor;
use crate::verdict::{DenyReason, QuotaSnapshot, Verdict};
use crate::window::ClientState;

/// All identity-keyed state, guarded by one mutex so the read-prune-record
/// sequence for a request is a single critical section.
#[derive(Debug, Default)]
struct ClientTable {
    clients: HashMap<String, ClientState>,
    activity: HashMap<String, ActivityProfile>,
    blocked: BlockRegistry,
}

/// Counters snapshot from [`AdmissionPolicy::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionStats {
    /// Requests admitted since construction.
    pub allowed: u64,
    /// Requests denied since construction.
    pub denied: u64,
    /// Blocks issued (detector, violation threshold, and manual).
    pub blocks_issued: u64,
    /// Identities with live window state.
    pub tracked_clients: usize,
    /// Entries currently in the block registry.
    pub active_blocks: usize,
}

/// Counts evicted by one [`AdmissionPolicy::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Idle client window states removed.
    pub clients: usize,
    /// Idle activity profiles removed.
    pub activity: usize,
    /// Expired block entries removed.
    pub blocks: usize,
}

/// Admission-control policy for one process.
///
/// One instance is shared (via `Arc`) across all request handlers; the check
/// itself is synchronous, performs no I/O, and never awaits.
#[derive(Debug)]
pub struct AdmissionPolicy {
    config: AdmissionConfig,
    clock: Arc<dyn Clock>,
    table: Mutex<ClientTable>,
    allowed_total: AtomicU64,
    denied_total: AtomicU64,
    blocks_issued: AtomicU64,
}

impl AdmissionPolicy {
    /// Create a policy from a validated configuration.
    ///
    /// # Examples
    /// ```
    /// use doorman::{AdmissionConfig, AdmissionPolicy};
    /// let policy = AdmissionPolicy::new(AdmissionConfig::default()).unwrap();
    /// ```
    pub fn new(config: AdmissionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
            table: Mutex::new(ClientTable::default()),
            allowed_total: AtomicU64::new(0),
            denied_total: AtomicU64::new(0),
            blocks_issued: AtomicU64::new(0),
        })
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The configuration this policy was built with.
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Run the full decision chain for one request.
    ///
    /// Precedence is fixed, first match wins: block registry → size guard →
    /// suspicious activity → burst → minute → hour → uploads → violation
    /// threshold → allowed. An allowed request has its timestamp recorded in
    /// every applicable window before the verdict is returned.
    pub fn check(&self, req: &RequestDescriptor) -> Verdict {
        let now = self.clock.now_millis();
        let mut table = match self.table.lock() {
            Ok(guard) => guard,
            Err(_) => return self.fail_open(req),
        };

        if let Some(retry_after) =
            table.blocked.remaining(&req.identity, now, self.config.block_duration)
        {
            tracing::warn!(
                identity = %req.identity,
                remaining_secs = retry_after.as_secs(),
                "blocked client access attempt"
            );
            return self.deny(DenyReason::Blocked { retry_after });
        }

        if let (Some(limit), Some(size)) = (self.config.max_request_size, req.content_length) {
            if size > limit {
                table
                    .activity
                    .entry(req.identity.clone())
                    .or_insert_with(|| ActivityProfile::new(now))
                    .record_large_request(now, &self.config);
                tracing::warn!(
                    identity = %req.identity,
                    size_bytes = size,
                    limit_bytes = limit,
                    "request size limit exceeded"
                );
                return self.deny(DenyReason::PayloadTooLarge { size, limit });
            }
        }

        let flagged = table
            .activity
            .entry(req.identity.clone())
            .or_insert_with(|| ActivityProfile::new(now))
            .observe(now, &self.config);
        if flagged {
            table.blocked.block(&req.identity, now);
            self.blocks_issued.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                identity = %req.identity,
                pattern = "rapid_requests",
                "client blocked due to suspicious activity"
            );
            return self.deny(DenyReason::SuspiciousActivity);
        }

        let is_upload = req.is_upload(&self.config.upload_path_prefix);
        let checked = self.check_windows(
            table.clients.entry(req.identity.clone()).or_default(),
            &req.identity,
            now,
            is_upload,
        );

        match checked {
            Ok(quota) => {
                drop(table);
                self.allowed_total.fetch_add(1, Ordering::Relaxed);
                Verdict::Allowed { quota: Some(quota) }
            }
            Err(reason) => {
                if reason == DenyReason::RepeatedViolations {
                    table.blocked.block(&req.identity, now);
                    self.blocks_issued.fetch_add(1, Ordering::Relaxed);
                }
                self.deny(reason)
            }
        }
    }

    /// Window checks in precedence order; on success records the request and
    /// returns the remaining quota.
    fn check_windows(
        &self,
        state: &mut ClientState,
        identity: &str,
        now: u64,
        is_upload: bool,
    ) -> Result<QuotaSnapshot, DenyReason> {
        let config = &self.config;
        state.prune(now, config);

        if state.burst.len() >= config.burst_limit as usize {
            state.violations += 1;
            tracing::warn!(
                identity,
                requests = state.burst.len(),
                limit = config.burst_limit,
                violations = state.violations,
                "burst limit exceeded"
            );
            return Err(DenyReason::Burst { retry_after: config.burst_window });
        }

        if state.minute.len() >= config.requests_per_minute as usize {
            state.violations += 1;
            tracing::warn!(
                identity,
                requests = state.minute.len(),
                limit = config.requests_per_minute,
                violations = state.violations,
                "per-minute rate limit exceeded"
            );
            return Err(DenyReason::PerMinute {
                limit: config.requests_per_minute,
                reset_epoch: now / 1000 + MINUTE_WINDOW.as_secs(),
            });
        }

        if state.hour.len() >= config.requests_per_hour as usize {
            state.violations += 1;
            tracing::warn!(
                identity,
                requests = state.hour.len(),
                limit = config.requests_per_hour,
                violations = state.violations,
                "per-hour rate limit exceeded"
            );
            return Err(DenyReason::PerHour);
        }

        if is_upload && state.uploads.len() >= config.uploads_per_hour as usize {
            state.violations += 1;
            tracing::warn!(
                identity,
                uploads = state.uploads.len(),
                limit = config.uploads_per_hour,
                violations = state.violations,
                "upload rate limit exceeded"
            );
            return Err(DenyReason::Uploads);
        }

        if state.violations >= config.violation_threshold {
            tracing::error!(
                identity,
                violations = state.violations,
                "client blocked due to repeated violations"
            );
            return Err(DenyReason::RepeatedViolations);
        }

        state.record(now, is_upload);
        Ok(QuotaSnapshot {
            limit_minute: config.requests_per_minute,
            remaining_minute: config.requests_per_minute.saturating_sub(state.minute.len() as u32),
            limit_hour: config.requests_per_hour,
            remaining_hour: config.requests_per_hour.saturating_sub(state.hour.len() as u32),
            remaining_uploads: config.uploads_per_hour.saturating_sub(state.uploads.len() as u32),
        })
    }

    fn deny(&self, reason: DenyReason) -> Verdict {
        self.denied_total.fetch_add(1, Ordering::Relaxed);
        Verdict::Denied { reason }
    }

    /// A check must never take the host's request handler down: if the table
    /// lock was poisoned by a panicking holder, allow the request without
    /// quota metadata and surface the fault to the operator.
    fn fail_open(&self, req: &RequestDescriptor) -> Verdict {
        tracing::error!(
            identity = %req.identity,
            "admission state lock poisoned; failing open"
        );
        self.allowed_total.fetch_add(1, Ordering::Relaxed);
        Verdict::Allowed { quota: None }
    }

    /// Evict idle client state, idle activity profiles, and expired blocks.
    /// Runs in the reaper but can be called directly.
    pub fn sweep(&self) -> SweepSummary {
        let now = self.clock.now_millis();
        let mut table = match self.table.lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::error!("admission state lock poisoned; skipping sweep");
                return SweepSummary::default();
            }
        };

        let idle_millis = self.config.largest_window().as_millis() as u64;
        let mut summary = SweepSummary::default();

        let before = table.clients.len();
        table.clients.retain(|_, state| {
            state.last_activity().is_some_and(|last| now.saturating_sub(last) < idle_millis)
        });
        summary.clients = before - table.clients.len();

        let before = table.activity.len();
        table
            .activity
            .retain(|_, profile| now.saturating_sub(profile.last_activity()) < idle_millis);
        summary.activity = before - table.activity.len();

        summary.blocks = table.blocked.sweep(now, self.config.block_duration);

        if summary != SweepSummary::default() {
            tracing::debug!(
                clients = summary.clients,
                activity = summary.activity,
                blocks = summary.blocks,
                "evicted idle admission state"
            );
        }
        summary
    }

    /// Manually block an identity, starting its cooldown now.
    pub fn block(&self, identity: &str) {
        let now = self.clock.now_millis();
        if let Ok(mut table) = self.table.lock() {
            table.blocked.block(identity, now);
            self.blocks_issued.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(identity, "identity blocked manually");
        } else {
            tracing::error!(identity, "admission state lock poisoned; block not recorded");
        }
    }

    /// Lift a block early. Returns whether a block existed.
    pub fn unblock(&self, identity: &str) -> bool {
        match self.table.lock() {
            Ok(mut table) => table.blocked.unblock(identity),
            Err(_) => {
                tracing::error!(identity, "admission state lock poisoned; unblock skipped");
                false
            }
        }
    }

    /// Whether an identity is currently blocked. Expired entries are evicted
    /// as a side effect, as in [`check`](Self::check).
    pub fn is_blocked(&self, identity: &str) -> bool {
        let now = self.clock.now_millis();
        match self.table.lock() {
            Ok(mut table) => {
                table.blocked.remaining(identity, now, self.config.block_duration).is_some()
            }
            Err(_) => false,
        }
    }

    /// Drop every trace of an identity: windows, violations, activity, block.
    pub fn reset(&self, identity: &str) {
        if let Ok(mut table) = self.table.lock() {
            table.clients.remove(identity);
            table.activity.remove(identity);
            table.blocked.unblock(identity);
        }
    }

    /// Feed a downstream error outcome (4xx/5xx) back into the identity's
    /// activity profile.
    pub fn record_error(&self, identity: &str) {
        let now = self.clock.now_millis();
        if let Ok(mut table) = self.table.lock() {
            table
                .activity
                .entry(identity.to_string())
                .or_insert_with(|| ActivityProfile::new(now))
                .record_error(now, &self.config);
        }
    }

    /// Feed an oversized-body outcome back into the identity's activity
    /// profile, for hosts that meter bodies past the declared length.
    pub fn record_large_request(&self, identity: &str) {
        let now = self.clock.now_millis();
        if let Ok(mut table) = self.table.lock() {
            table
                .activity
                .entry(identity.to_string())
                .or_insert_with(|| ActivityProfile::new(now))
                .record_large_request(now, &self.config);
        }
    }

    /// Counters and table sizes for observability endpoints.
    pub fn stats(&self) -> AdmissionStats {
        let (tracked_clients, active_blocks) = match self.table.lock() {
            Ok(table) => (table.clients.len(), table.blocked.len()),
            Err(_) => (0, 0),
        };
        AdmissionStats {
            allowed: self.allowed_total.load(Ordering::Relaxed),
            denied: self.denied_total.load(Ordering::Relaxed),
            blocks_issued: self.blocks_issued.load(Ordering::Relaxed),
            tracked_clients,
            active_blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use http::Method;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut guard = self.0.lock().unwrap();
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn policy_with_clock(config: AdmissionConfig) -> (AdmissionPolicy, ManualClock) {
        let clock = ManualClock::starting_at(1_700_000_000_000);
        let policy = AdmissionPolicy::new(config).unwrap().with_clock(clock.clone());
        (policy, clock)
    }

    fn get(identity: &str) -> RequestDescriptor {
        RequestDescriptor::new(identity, Method::GET, "/api/v1/jobs")
    }

    #[test]
    fn rejects_invalid_config() {
        let err = AdmissionPolicy::new(AdmissionConfig::default().with_burst_limit(0)).unwrap_err();
        assert_eq!(err, ConfigError::ZeroLimit { field: "burst_limit" });
    }

    #[test]
    fn first_request_is_allowed_with_full_quota_minus_one() {
        let (policy, _clock) = policy_with_clock(AdmissionConfig::default());
        let verdict = policy.check(&get("client-a"));

        match verdict {
            Verdict::Allowed { quota: Some(quota) } => {
                assert_eq!(quota.remaining_minute, 59);
                assert_eq!(quota.remaining_hour, 999);
                assert_eq!(quota.remaining_uploads, 100);
            }
            other => panic!("expected allowed verdict, got {:?}", other),
        }
        assert_eq!(policy.stats().allowed, 1);
    }

    #[test]
    fn manual_block_denies_and_unblock_restores() {
        let (policy, _clock) = policy_with_clock(AdmissionConfig::default());
        policy.block("client-a");
        assert!(policy.is_blocked("client-a"));

        let verdict = policy.check(&get("client-a"));
        assert!(matches!(
            verdict.deny_reason(),
            Some(DenyReason::Blocked { .. })
        ));

        assert!(policy.unblock("client-a"));
        assert!(!policy.is_blocked("client-a"));
        assert!(policy.check(&get("client-a")).is_allowed());
    }

    #[test]
    fn reset_drops_all_state_for_one_identity() {
        let (policy, _clock) = policy_with_clock(AdmissionConfig::default());
        let _ = policy.check(&get("client-a"));
        let _ = policy.check(&get("client-b"));
        policy.block("client-a");

        policy.reset("client-a");
        assert!(!policy.is_blocked("client-a"));
        let stats = policy.stats();
        assert_eq!(stats.tracked_clients, 1);
    }

    #[test]
    fn size_guard_denies_oversized_requests_without_violation() {
        let config = AdmissionConfig::default().with_max_request_size(1024);
        let (policy, clock) = policy_with_clock(config);

        let oversized = get("client-a").with_content_length(4096);
        for _ in 0..20 {
            let verdict = policy.check(&oversized);
            assert!(matches!(
                verdict.deny_reason(),
                Some(DenyReason::PayloadTooLarge { size: 4096, limit: 1024 })
            ));
            clock.advance(2_000);
        }

        // Size denials never escalate to a block.
        assert!(!policy.is_blocked("client-a"));
        assert!(policy.check(&get("client-a")).is_allowed());
    }

    #[test]
    fn missing_content_length_bypasses_the_size_guard() {
        let config = AdmissionConfig::default().with_max_request_size(1024);
        let (policy, _clock) = policy_with_clock(config);
        assert!(policy.check(&get("client-a")).is_allowed());
    }

    #[test]
    fn stats_count_allowed_denied_and_blocks() {
        let config = AdmissionConfig::default().with_burst_limit(1);
        let (policy, _clock) = policy_with_clock(config);

        assert!(policy.check(&get("client-a")).is_allowed());
        assert!(!policy.check(&get("client-a")).is_allowed());
        policy.block("client-b");

        let stats = policy.stats();
        assert_eq!(stats.allowed, 1);
        assert_eq!(stats.denied, 1);
        assert_eq!(stats.blocks_issued, 1);
        assert_eq!(stats.tracked_clients, 1);
        assert_eq!(stats.active_blocks, 1);
    }

    #[test]
    fn poisoned_lock_fails_open_and_logs() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedWriter(buffer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(writer))
            .with_target(true)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (policy, _clock) = policy_with_clock(AdmissionConfig::default());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = policy.table.lock().unwrap();
            panic!("poison the lock");
        }));
        assert!(result.is_err());

        let verdict = policy.check(&get("client-a"));
        assert_eq!(verdict, Verdict::Allowed { quota: None });
        assert!(verdict.headers().is_empty());

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(
            logs.contains("failing open"),
            "operational error should be surfaced when the table lock is poisoned"
        );
    }

    #[test]
    fn record_hooks_are_tracked_without_affecting_verdicts() {
        let (policy, _clock) = policy_with_clock(AdmissionConfig::default());
        for _ in 0..50 {
            policy.record_error("client-a");
            policy.record_large_request("client-a");
        }
        assert!(policy.check(&get("client-a")).is_allowed());
    }

    #[test]
    fn sweep_reclaims_idle_state() {
        let (policy, clock) = policy_with_clock(AdmissionConfig::default());
        assert!(policy.check(&get("client-a")).is_allowed());
        policy.block("client-b");

        // Inside the largest window: nothing to reclaim.
        clock.advance(60_000);
        assert_eq!(policy.sweep(), SweepSummary::default());
        assert_eq!(policy.stats().tracked_clients, 1);

        // Past the hour: client state, activity profile, and block expire.
        clock.advance(3_600_000);
        let summary = policy.sweep();
        assert_eq!(summary, SweepSummary { clients: 1, activity: 1, blocks: 1 });
        let stats = policy.stats();
        assert_eq!(stats.tracked_clients, 0);
        assert_eq!(stats.active_blocks, 0);
    }
}
