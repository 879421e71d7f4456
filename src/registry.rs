//! Registry of identities under a temporary hard block.

use std::collections::HashMap;
use std::time::Duration;

/// Blocked identities and the epoch millis at which each block began.
///
/// Expired entries are evicted lazily on lookup and proactively by
/// [`sweep`](BlockRegistry::sweep).
#[derive(Debug, Default)]
pub(crate) struct BlockRegistry {
    blocked: HashMap<String, u64>,
}

impl BlockRegistry {
    /// Start (or restart) a block for `identity` at `now`.
    pub(crate) fn block(&mut self, identity: &str, now: u64) {
        self.blocked.insert(identity.to_string(), now);
    }

    /// Time left on an active block, or `None` if the identity is not
    /// blocked. An expired entry is removed as a side effect.
    pub(crate) fn remaining(
        &mut self,
        identity: &str,
        now: u64,
        block_duration: Duration,
    ) -> Option<Duration> {
        let started = *self.blocked.get(identity)?;
        let elapsed = now.saturating_sub(started);
        let duration_millis = block_duration.as_millis() as u64;
        if elapsed < duration_millis {
            Some(Duration::from_millis(duration_millis - elapsed))
        } else {
            self.blocked.remove(identity);
            None
        }
    }

    /// Lift a block early. Returns whether an entry existed.
    pub(crate) fn unblock(&mut self, identity: &str) -> bool {
        self.blocked.remove(identity).is_some()
    }

    /// Drop every expired entry; returns how many were evicted.
    pub(crate) fn sweep(&mut self, now: u64, block_duration: Duration) -> usize {
        let duration_millis = block_duration.as_millis() as u64;
        let before = self.blocked.len();
        self.blocked.retain(|_, &mut started| now.saturating_sub(started) < duration_millis);
        before - self.blocked.len()
    }

    /// Number of entries currently held (may include expired ones not yet
    /// looked up or swept).
    pub(crate) fn len(&self) -> usize {
        self.blocked.len()
    }
}
