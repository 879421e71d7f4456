#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Doorman
//!
//! Admission control for async Rust services: per-client sliding-window rate
//! limits, burst detection, abuse heuristics, temporary blocking, and a tower
//! layer for the HTTP seam.
//!
//! ## Features
//!
//! - **Four sliding windows** per client: burst (sub-second), per-minute,
//!   per-hour, and uploads-per-hour, pruned exactly on every access
//! - **Suspicious-activity detection** independent of the configured limits
//! - **Violation escalation** to a temporary hard block with cooldown
//! - **Background reaper** keeping per-client state bounded
//! - **Fail-open** decisions: an internal fault never takes a request down
//! - **Tower middleware** producing `429` responses with `Retry-After` and
//!   `X-RateLimit-*` metadata
//!
//! ## Quick Start
//!
//! ```rust
//! use doorman::{AdmissionConfig, AdmissionPolicy, RequestDescriptor};
//! use http::Method;
//!
//! let policy = AdmissionPolicy::new(AdmissionConfig::default()).unwrap();
//!
//! let request = RequestDescriptor::new("203.0.113.9", Method::GET, "/api/v1/jobs");
//! let verdict = policy.check(&request);
//! assert!(verdict.is_allowed());
//! ```

mod activity;
pub mod clock;
pub mod config;
pub mod identity;
pub mod middleware;
pub mod policy;
pub mod reaper;
pub mod request;
pub mod verdict;
mod registry;
mod window;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AdmissionConfig, ConfigError};
pub use identity::{resolve_identity, UNKNOWN_IDENTITY};
pub use middleware::{AdmissionLayer, AdmissionService};
pub use policy::{AdmissionPolicy, AdmissionStats, SweepSummary};
pub use reaper::{spawn_reaper, spawn_reaper_with_interval};
pub use request::RequestDescriptor;
pub use verdict::{DenyReason, QuotaSnapshot, Verdict};
