//! The request descriptor handed to the admission policy, and the upload
//! classifier.

use std::net::SocketAddr;

use http::{header, Method, Request};

use crate::identity::resolve_identity;

/// Everything the admission policy needs to know about one request.
///
/// The descriptor is plain data; arrival time comes from the policy's
/// [`Clock`](crate::Clock) when the check runs.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Resolved client identity (see [`resolve_identity`]).
    pub identity: String,
    /// HTTP method.
    pub method: Method,
    /// Request path, without query string.
    pub path: String,
    /// `Content-Type` header value, if present.
    pub content_type: Option<String>,
    /// Parsed `Content-Length`. A missing or unparseable header is `None`;
    /// the request is then treated as unclassified rather than rejected.
    pub content_length: Option<u64>,
}

impl RequestDescriptor {
    /// Build a descriptor from an already-resolved identity.
    pub fn new(identity: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            method,
            path: path.into(),
            content_type: None,
            content_length: None,
        }
    }

    /// Attach a `Content-Type` value.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Attach a declared body size.
    pub fn with_content_length(mut self, bytes: u64) -> Self {
        self.content_length = Some(bytes);
        self
    }

    /// Derive a descriptor from an `http::Request`, resolving the identity
    /// from proxy headers with `remote_addr` as the transport fallback.
    pub fn from_request<B>(req: &Request<B>, remote_addr: Option<SocketAddr>) -> Self {
        let headers = req.headers();
        let header_str =
            |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

        let identity = resolve_identity(
            header_str("x-forwarded-for"),
            header_str("x-real-ip"),
            remote_addr.map(|addr| addr.ip()),
        );

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        // Unparseable Content-Length degrades to "unknown size" instead of
        // failing the request.
        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());

        Self {
            identity,
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            content_type,
            content_length,
        }
    }

    /// Whether this request consumes the uploads-per-hour budget: a `POST` to
    /// the upload endpoint with a `multipart/form-data` body.
    pub(crate) fn is_upload(&self, upload_path_prefix: &str) -> bool {
        self.method == Method::POST
            && self.path.starts_with(upload_path_prefix)
            && self
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.starts_with("multipart/form-data"))
    }
}
