//! Configuration for the admission policy.
//!
//! Every knob is set at construction time; there are no hidden globals. The
//! defaults match a small API service fronting an upload-heavy pipeline.

use std::time::Duration;

/// Length of the per-minute window. Fixed; only the limit is configurable.
pub(crate) const MINUTE_WINDOW: Duration = Duration::from_secs(60);
/// Length of the per-hour and uploads-per-hour windows.
pub(crate) const HOUR_WINDOW: Duration = Duration::from_secs(3600);

/// Errors produced when validating admission configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A count limit or threshold was zero.
    #[error("{field} must be > 0")]
    ZeroLimit {
        /// Name of the offending field.
        field: &'static str,
    },
    /// A window or duration was zero.
    #[error("{field} must be a positive duration")]
    ZeroDuration {
        /// Name of the offending field.
        field: &'static str,
    },
    /// The upload path prefix was empty, which would classify every POST.
    #[error("upload_path_prefix must not be empty")]
    EmptyUploadPrefix,
}

/// Validated-at-construction configuration for [`AdmissionPolicy`].
///
/// [`AdmissionPolicy`]: crate::AdmissionPolicy
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdmissionConfig {
    /// Maximum requests per identity within the sliding minute window.
    pub requests_per_minute: u32,
    /// Maximum requests per identity within the sliding hour window.
    pub requests_per_hour: u32,
    /// Maximum upload-classified requests per identity within the hour window.
    pub uploads_per_hour: u32,
    /// Maximum requests per identity within `burst_window`.
    pub burst_limit: u32,
    /// Length of the burst window.
    pub burst_window: Duration,
    /// How long a blocked identity stays denied.
    pub block_duration: Duration,
    /// Number of limit breaches before an identity is hard-blocked.
    pub violation_threshold: u32,
    /// Path prefix that, together with `POST` + `multipart/form-data`,
    /// classifies a request as an upload.
    pub upload_path_prefix: String,
    /// Requests within `rapid_window` that trip the suspicious-activity
    /// detector.
    pub rapid_request_threshold: u32,
    /// Length of the suspicious-activity window.
    pub rapid_window: Duration,
    /// How often detector state resets in unison.
    pub activity_reset_interval: Duration,
    /// Deny requests whose declared `Content-Length` exceeds this, with 413.
    /// `None` disables the size guard.
    pub max_request_size: Option<u64>,
    /// How often the background reaper sweeps idle state.
    pub sweep_interval: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1000,
            uploads_per_hour: 100,
            burst_limit: 10,
            burst_window: Duration::from_secs(1),
            block_duration: Duration::from_secs(3600),
            violation_threshold: 5,
            upload_path_prefix: "/api/v1/transcriptions".to_string(),
            rapid_request_threshold: 20,
            rapid_window: Duration::from_secs(10),
            activity_reset_interval: Duration::from_secs(3600),
            max_request_size: None,
            sweep_interval: HOUR_WINDOW,
        }
    }
}

impl AdmissionConfig {
    /// Default configuration; identical to [`Default::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the per-minute request limit.
    pub fn with_requests_per_minute(mut self, limit: u32) -> Self {
        self.requests_per_minute = limit;
        self
    }

    /// Override the per-hour request limit.
    pub fn with_requests_per_hour(mut self, limit: u32) -> Self {
        self.requests_per_hour = limit;
        self
    }

    /// Override the uploads-per-hour limit.
    pub fn with_uploads_per_hour(mut self, limit: u32) -> Self {
        self.uploads_per_hour = limit;
        self
    }

    /// Override the burst limit.
    pub fn with_burst_limit(mut self, limit: u32) -> Self {
        self.burst_limit = limit;
        self
    }

    /// Override the burst window length.
    pub fn with_burst_window(mut self, window: Duration) -> Self {
        self.burst_window = window;
        self
    }

    /// Override how long a block lasts.
    pub fn with_block_duration(mut self, duration: Duration) -> Self {
        self.block_duration = duration;
        self
    }

    /// Override the violation threshold.
    pub fn with_violation_threshold(mut self, threshold: u32) -> Self {
        self.violation_threshold = threshold;
        self
    }

    /// Override the upload endpoint prefix.
    pub fn with_upload_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.upload_path_prefix = prefix.into();
        self
    }

    /// Override the rapid-request threshold of the suspicious-activity
    /// detector.
    pub fn with_rapid_request_threshold(mut self, threshold: u32) -> Self {
        self.rapid_request_threshold = threshold;
        self
    }

    /// Enable the request-size guard.
    pub fn with_max_request_size(mut self, bytes: u64) -> Self {
        self.max_request_size = Some(bytes);
        self
    }

    /// Override the reaper sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Validate all limits and windows.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn limit(value: u32, field: &'static str) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::ZeroLimit { field });
            }
            Ok(())
        }
        fn window(value: Duration, field: &'static str) -> Result<(), ConfigError> {
            if value == Duration::ZERO {
                return Err(ConfigError::ZeroDuration { field });
            }
            Ok(())
        }

        limit(self.requests_per_minute, "requests_per_minute")?;
        limit(self.requests_per_hour, "requests_per_hour")?;
        limit(self.uploads_per_hour, "uploads_per_hour")?;
        limit(self.burst_limit, "burst_limit")?;
        limit(self.violation_threshold, "violation_threshold")?;
        limit(self.rapid_request_threshold, "rapid_request_threshold")?;
        window(self.burst_window, "burst_window")?;
        window(self.block_duration, "block_duration")?;
        window(self.rapid_window, "rapid_window")?;
        window(self.activity_reset_interval, "activity_reset_interval")?;
        window(self.sweep_interval, "sweep_interval")?;
        if self.upload_path_prefix.is_empty() {
            return Err(ConfigError::EmptyUploadPrefix);
        }
        Ok(())
    }

    /// Largest window tracked per identity; entries idle longer than this are
    /// reclaimable by the reaper.
    pub(crate) fn largest_window(&self) -> Duration {
        HOUR_WINDOW
            .max(self.burst_window)
            .max(self.rapid_window)
            .max(self.activity_reset_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AdmissionConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_limits() {
        let err = AdmissionConfig::default().with_burst_limit(0).validate().unwrap_err();
        assert_eq!(err, ConfigError::ZeroLimit { field: "burst_limit" });

        let err = AdmissionConfig::default()
            .with_violation_threshold(0)
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroLimit { field: "violation_threshold" });
    }

    #[test]
    fn rejects_zero_windows() {
        let err = AdmissionConfig::default()
            .with_burst_window(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroDuration { field: "burst_window" });
    }

    #[test]
    fn rejects_empty_upload_prefix() {
        let err = AdmissionConfig::default().with_upload_path_prefix("").validate().unwrap_err();
        assert_eq!(err, ConfigError::EmptyUploadPrefix);
    }

    #[test]
    fn largest_window_is_at_least_an_hour() {
        let config = AdmissionConfig::default();
        assert_eq!(config.largest_window(), Duration::from_secs(3600));

        let config = config.with_burst_window(Duration::from_secs(7200));
        assert_eq!(config.largest_window(), Duration::from_secs(7200));
    }

    #[test]
    fn builder_chain_overrides_fields() {
        let config = AdmissionConfig::new()
            .with_requests_per_minute(5)
            .with_requests_per_hour(50)
            .with_uploads_per_hour(2)
            .with_max_request_size(1024)
            .with_upload_path_prefix("/upload");
        assert_eq!(config.requests_per_minute, 5);
        assert_eq!(config.requests_per_hour, 50);
        assert_eq!(config.uploads_per_hour, 2);
        assert_eq!(config.max_request_size, Some(1024));
        assert_eq!(config.upload_path_prefix, "/upload");
        assert!(config.validate().is_ok());
    }
}
