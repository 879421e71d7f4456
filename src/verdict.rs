//! The admission verdict: allow with quota metadata, or deny with a status,
//! reason body, and response headers.

use std::time::Duration;

use http::StatusCode;

/// Remaining quota after an allowed request, surfaced as response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    /// Configured per-minute limit.
    pub limit_minute: u32,
    /// Requests left in the current minute window.
    pub remaining_minute: u32,
    /// Configured per-hour limit.
    pub limit_hour: u32,
    /// Requests left in the current hour window.
    pub remaining_hour: u32,
    /// Uploads left in the current hour window.
    pub remaining_uploads: u32,
}

/// Why a request was denied. Ordering of variants mirrors the precedence of
/// the decision chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// The identity is in the block registry.
    Blocked {
        /// Time left on the block.
        retry_after: Duration,
    },
    /// The suspicious-activity detector escalated this request.
    SuspiciousActivity,
    /// Request body exceeds the configured maximum size.
    PayloadTooLarge {
        /// Declared `Content-Length`.
        size: u64,
        /// Configured maximum.
        limit: u64,
    },
    /// Too many requests inside the burst window.
    Burst {
        /// Length of the burst window.
        retry_after: Duration,
    },
    /// Per-minute limit reached.
    PerMinute {
        /// Configured per-minute limit.
        limit: u32,
        /// Epoch seconds at which the window has fully slid past.
        reset_epoch: u64,
    },
    /// Per-hour limit reached.
    PerHour,
    /// Uploads-per-hour limit reached.
    Uploads,
    /// The violation threshold escalated this identity to the block registry.
    RepeatedViolations,
}

/// Result of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Let the request through; `quota` is `None` only on the fail-open path.
    Allowed {
        /// Remaining quota for the identity after recording this request.
        quota: Option<QuotaSnapshot>,
    },
    /// Reject the request before it reaches the pipeline.
    Denied {
        /// Which check failed.
        reason: DenyReason,
    },
}

/// Seconds, rounded up so clients never retry before the window has slid.
fn secs_ceil(duration: Duration) -> u64 {
    let millis = duration.as_millis() as u64;
    millis.div_ceil(1000)
}

impl DenyReason {
    /// HTTP status for this denial.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Plain-text response body.
    pub fn body(&self) -> String {
        match self {
            Self::Blocked { .. } => {
                "Access temporarily blocked due to rate limit violations".to_string()
            }
            Self::SuspiciousActivity => "Access blocked due to suspicious activity".to_string(),
            Self::PayloadTooLarge { size, limit } => {
                format!("Request too large ({size} bytes). Maximum allowed: {limit} bytes")
            }
            Self::Burst { .. } => "Too many requests in short time".to_string(),
            Self::PerMinute { .. } => "Rate limit exceeded (per minute)".to_string(),
            Self::PerHour => "Rate limit exceeded (per hour)".to_string(),
            Self::Uploads => "Upload rate limit exceeded".to_string(),
            Self::RepeatedViolations => "Access blocked due to repeated violations".to_string(),
        }
    }

    /// Response headers for this denial.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Blocked { retry_after } => vec![
                ("Retry-After", secs_ceil(*retry_after).to_string()),
                ("X-Block-Reason", "Rate limit violations".to_string()),
            ],
            Self::SuspiciousActivity => {
                vec![("X-Block-Reason", "Suspicious activity detected".to_string())]
            }
            Self::PayloadTooLarge { .. } => Vec::new(),
            Self::Burst { retry_after } => vec![
                ("Retry-After", secs_ceil(*retry_after).to_string()),
                ("X-RateLimit-Type", "burst".to_string()),
            ],
            Self::PerMinute { limit, reset_epoch } => vec![
                ("Retry-After", "60".to_string()),
                ("X-RateLimit-Limit", limit.to_string()),
                ("X-RateLimit-Remaining", "0".to_string()),
                ("X-RateLimit-Reset", reset_epoch.to_string()),
                ("X-RateLimit-Type", "per-minute".to_string()),
            ],
            Self::PerHour => vec![
                ("Retry-After", "3600".to_string()),
                ("X-RateLimit-Type", "per-hour".to_string()),
            ],
            Self::Uploads => vec![
                ("Retry-After", "3600".to_string()),
                ("X-RateLimit-Type", "uploads".to_string()),
            ],
            Self::RepeatedViolations => {
                vec![("X-Block-Reason", "Repeated violations".to_string())]
            }
        }
    }
}

impl Verdict {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Response headers for this verdict: quota headers on allow, the deny
    /// set otherwise.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Allowed { quota: Some(q) } => vec![
                ("X-RateLimit-Limit-Minute", q.limit_minute.to_string()),
                ("X-RateLimit-Remaining-Minute", q.remaining_minute.to_string()),
                ("X-RateLimit-Limit-Hour", q.limit_hour.to_string()),
                ("X-RateLimit-Remaining-Hour", q.remaining_hour.to_string()),
                ("X-RateLimit-Upload-Remaining", q.remaining_uploads.to_string()),
            ],
            Self::Allowed { quota: None } => Vec::new(),
            Self::Denied { reason } => reason.headers(),
        }
    }

    /// The denial reason, if any.
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Denied { reason } => Some(reason),
            Self::Allowed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header<'a>(headers: &'a [(&'static str, String)], name: &str) -> Option<&'a str> {
        headers.iter().find(|(n, _)| *n == name).map(|(_, v)| v.as_str())
    }

    #[test]
    fn blocked_denial_carries_remaining_time() {
        let reason = DenyReason::Blocked { retry_after: Duration::from_millis(1_800_500) };
        assert_eq!(reason.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = reason.headers();
        assert_eq!(header(&headers, "Retry-After"), Some("1801"));
        assert_eq!(header(&headers, "X-Block-Reason"), Some("Rate limit violations"));
        assert_eq!(header(&headers, "X-RateLimit-Type"), None);
    }

    #[test]
    fn burst_denial_rounds_subsecond_windows_up() {
        let reason = DenyReason::Burst { retry_after: Duration::from_millis(500) };
        let headers = reason.headers();
        assert_eq!(header(&headers, "Retry-After"), Some("1"));
        assert_eq!(header(&headers, "X-RateLimit-Type"), Some("burst"));
    }

    #[test]
    fn per_minute_denial_carries_the_full_trio() {
        let reason = DenyReason::PerMinute { limit: 60, reset_epoch: 1_700_000_060 };
        let headers = reason.headers();
        assert_eq!(header(&headers, "Retry-After"), Some("60"));
        assert_eq!(header(&headers, "X-RateLimit-Limit"), Some("60"));
        assert_eq!(header(&headers, "X-RateLimit-Remaining"), Some("0"));
        assert_eq!(header(&headers, "X-RateLimit-Reset"), Some("1700000060"));
        assert_eq!(header(&headers, "X-RateLimit-Type"), Some("per-minute"));
    }

    #[test]
    fn per_hour_denial_carries_the_hour_retry() {
        let reason = DenyReason::PerHour;
        assert_eq!(reason.body(), "Rate limit exceeded (per hour)");
        let headers = reason.headers();
        assert_eq!(header(&headers, "Retry-After"), Some("3600"));
        assert_eq!(header(&headers, "X-RateLimit-Type"), Some("per-hour"));
    }

    #[test]
    fn registry_denials_omit_rate_limit_type() {
        for reason in [DenyReason::SuspiciousActivity, DenyReason::RepeatedViolations] {
            let headers = reason.headers();
            assert_eq!(header(&headers, "X-RateLimit-Type"), None);
            assert!(header(&headers, "X-Block-Reason").is_some());
        }
    }

    #[test]
    fn payload_too_large_is_413_with_sizes_in_the_body() {
        let reason = DenyReason::PayloadTooLarge { size: 2048, limit: 1024 };
        assert_eq!(reason.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(reason.body(), "Request too large (2048 bytes). Maximum allowed: 1024 bytes");
    }

    #[test]
    fn allowed_verdict_exposes_quota_headers() {
        let verdict = Verdict::Allowed {
            quota: Some(QuotaSnapshot {
                limit_minute: 60,
                remaining_minute: 59,
                limit_hour: 1000,
                remaining_hour: 999,
                remaining_uploads: 100,
            }),
        };
        let headers = verdict.headers();
        assert_eq!(header(&headers, "X-RateLimit-Limit-Minute"), Some("60"));
        assert_eq!(header(&headers, "X-RateLimit-Remaining-Minute"), Some("59"));
        assert_eq!(header(&headers, "X-RateLimit-Limit-Hour"), Some("1000"));
        assert_eq!(header(&headers, "X-RateLimit-Remaining-Hour"), Some("999"));
        assert_eq!(header(&headers, "X-RateLimit-Upload-Remaining"), Some("100"));
    }

    #[test]
    fn fail_open_verdict_has_no_headers() {
        let verdict = Verdict::Allowed { quota: None };
        assert!(verdict.is_allowed());
        assert!(verdict.headers().is_empty());
    }
}
