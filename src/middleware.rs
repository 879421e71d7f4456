//! Tower middleware enforcing the admission policy at the HTTP seam.
//!
//! The layer derives a [`RequestDescriptor`] from each `http::Request`,
//! answers denials directly with the verdict's status, headers, and
//! plain-text body, and stamps the quota headers onto allowed responses.
//!
//! The transport-level remote address is read from the request extensions
//! (`std::net::SocketAddr`); hosts that know the peer address insert it there
//! before this layer runs. Without it, identity resolution still works from
//! the proxy headers and degrades to `"unknown"` as a last resort.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Request, Response};
use pin_project::pin_project;
use tower_layer::Layer;
use tower_service::Service;

use crate::policy::AdmissionPolicy;
use crate::request::RequestDescriptor;
use crate::verdict::{DenyReason, Verdict};

/// A layer that runs every request through an [`AdmissionPolicy`].
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    policy: Arc<AdmissionPolicy>,
}

impl AdmissionLayer {
    /// Create a layer sharing the given policy handle.
    pub fn new(policy: Arc<AdmissionPolicy>) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService { inner: service, policy: self.policy.clone() }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
///
/// Readiness is delegated to the inner service, and the admission check runs
/// in `call`. A denied request therefore consumes whatever capacity the inner
/// service reserved in `poll_ready` without ever calling it; inner services
/// with reservation-style readiness (e.g. `tower::buffer`) hold that slot
/// until the next call. Under heavy denial traffic, place such services
/// outside this layer.
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    policy: Arc<AdmissionPolicy>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AdmissionService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: From<String>,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let remote_addr = req.extensions().get::<SocketAddr>().copied();
        let descriptor = RequestDescriptor::from_request(&req, remote_addr);

        match self.policy.check(&descriptor) {
            verdict @ Verdict::Allowed { .. } => ResponseFuture::Allowed {
                future: self.inner.call(req),
                quota_headers: Some(encode_headers(&verdict.headers())),
            },
            Verdict::Denied { reason } => {
                ResponseFuture::Denied { response: Some(deny_response(&reason)) }
            }
        }
    }
}

/// Response future for [`AdmissionService`]; denial responses are built
/// eagerly so the denied arm never allocates a box.
#[pin_project(project = ResponseFutureProj)]
pub enum ResponseFuture<F, B> {
    /// The request was admitted; quota headers are appended on completion.
    Allowed {
        /// The wrapped service's future.
        #[pin]
        future: F,
        /// Headers to stamp onto the response, taken on completion.
        quota_headers: Option<Vec<(HeaderName, HeaderValue)>>,
    },
    /// The request was denied; the response is ready.
    Denied {
        /// The prebuilt denial response, taken on first poll.
        response: Option<Response<B>>,
    },
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<B>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Allowed { future, quota_headers } => {
                let mut response = ready!(future.poll(cx))?;
                if let Some(headers) = quota_headers.take() {
                    for (name, value) in headers {
                        response.headers_mut().insert(name, value);
                    }
                }
                Poll::Ready(Ok(response))
            }
            ResponseFutureProj::Denied { response } => {
                let response = response.take().expect("ResponseFuture polled after completion");
                Poll::Ready(Ok(response))
            }
        }
    }
}

/// Convert verdict headers into typed header pairs, skipping anything the
/// `http` crate rejects (the names are static and the values numeric, so in
/// practice nothing is skipped).
fn encode_headers(headers: &[(&'static str, String)]) -> Vec<(HeaderName, HeaderValue)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let value = HeaderValue::from_str(value).ok()?;
            Some((name, value))
        })
        .collect()
}

fn deny_response<B: From<String>>(reason: &DenyReason) -> Response<B> {
    let mut response = Response::new(B::from(reason.body()));
    *response.status_mut() = reason.status();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    for (name, value) in encode_headers(&reason.headers()) {
        headers.insert(name, value);
    }
    response
}
