//! Response body interception for logging and usage accounting.
//!
//! # How It Works
//!
//! [`ResponseInterceptor`] decides at stream-open time whether to decorate
//! the response body:
//!
//! ```text
//! backend response ──► 2xx and non-empty? ──yes──► ObservedBody ──► caller
//!                            │                      (observer sees each frame)
//!                            no
//!                            └──────────────────────────────────────► caller
//! ```
//!
//! [`ObservedBody`] implements `http_body::Body`. Each data frame is handed to
//! a [`BodyObserver`] by reference and then returned **as the same `Bytes`**,
//! so content and ordering cannot change. Trailers, size hints and
//! end-of-stream signals pass straight through.
//!
//! # State Machine
//!
//! `NotStarted → Streaming → Completed`. Observation only happens while
//! streaming. When an observer fails (for example on invalid UTF-8) it is
//! dropped and the rest of the body is forwarded un-observed. When the
//! caller disconnects, the body is dropped mid-stream, which releases the
//! inner upstream body as well.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::{Response, StatusCode};
use http_body::{Body as HttpBody, Frame, SizeHint};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics;

/// Default number of bytes of each chunk included in log previews.
pub const DEFAULT_PREVIEW_BYTES: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObservationError {
    #[error("response chunk is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidUtf8 { valid_up_to: usize },
}

/// Totals for a fully delivered body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamSummary {
    pub bytes: u64,
    pub chunks: u64,
}

/// Side-channel consumer of response frames.
pub trait BodyObserver: Send + Unpin + 'static {
    /// Inspect one data frame. An error stops observation for the rest of
    /// the stream; it never affects what the caller receives.
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<(), ObservationError>;

    /// Called once after the final frame was delivered.
    fn on_complete(&mut self, summary: &StreamSummary);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    NotStarted,
    Streaming,
    Completed,
}

/// Pass-through body that shows every data frame to an observer.
pub struct ObservedBody<O: BodyObserver> {
    inner: Body,
    observer: Option<O>,
    state: StreamState,
    summary: StreamSummary,
    route: String,
}

impl<O: BodyObserver> ObservedBody<O> {
    pub fn new(inner: Body, observer: O, route: impl Into<String>) -> Self {
        Self {
            inner,
            observer: Some(observer),
            state: StreamState::NotStarted,
            summary: StreamSummary::default(),
            route: route.into(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// `false` once the observer has been dropped after a fault.
    pub fn is_observing(&self) -> bool {
        self.observer.is_some()
    }

    fn observe(&mut self, data: &Bytes) {
        self.state = StreamState::Streaming;
        self.summary.bytes += data.len() as u64;
        self.summary.chunks += 1;

        if let Some(observer) = self.observer.as_mut()
            && let Err(e) = observer.on_chunk(data)
        {
            warn!(
                route = %self.route,
                error = %e,
                "Response observation failed, forwarding remaining body unobserved"
            );
            self.observer = None;
            metrics::record_intercepted_stream("degraded");
        }
    }

    fn complete(&mut self) {
        if self.state == StreamState::Completed {
            return;
        }
        self.state = StreamState::Completed;

        if let Some(observer) = self.observer.as_mut() {
            observer.on_complete(&self.summary);
            metrics::record_intercepted_stream("completed");
        }
    }
}

impl<O: BodyObserver> HttpBody for ObservedBody<O> {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.observe(data);
                }
                // hyper stops polling once the body reports its end
                if this.inner.is_end_stream() {
                    this.complete();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                warn!(route = %this.route, error = %e, "Upstream body failed mid-stream");
                this.state = StreamState::Completed;
                this.observer = None;
                metrics::record_intercepted_stream("upstream_error");
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<O: BodyObserver> Drop for ObservedBody<O> {
    fn drop(&mut self) {
        if self.state == StreamState::Completed {
            return;
        }
        if self.inner.is_end_stream() {
            self.complete();
            return;
        }

        debug!(
            route = %self.route,
            bytes = self.summary.bytes,
            chunks = self.summary.chunks,
            "Response stream dropped before completion"
        );
        if self.observer.is_some() {
            metrics::record_intercepted_stream("cancelled");
        }
    }
}

/// Default observer: decodes chunks as UTF-8 for logging and counts bytes.
///
/// A multi-byte character split across two chunks is carried over to the
/// next chunk instead of being reported as invalid.
#[derive(Debug)]
pub struct LoggingObserver {
    route: String,
    status: StatusCode,
    preview_limit: usize,
    carry: Vec<u8>,
}

impl LoggingObserver {
    pub fn new(route: impl Into<String>, status: StatusCode, preview_limit: usize) -> Self {
        Self {
            route: route.into(),
            status,
            preview_limit,
            carry: Vec::new(),
        }
    }

    fn log_text(&self, text: &str, chunk_bytes: usize) {
        debug!(
            route = %self.route,
            status = self.status.as_u16(),
            chunk_bytes,
            body = %preview(text, self.preview_limit),
            "Response chunk"
        );
    }
}

impl BodyObserver for LoggingObserver {
    fn on_chunk(&mut self, chunk: &[u8]) -> Result<(), ObservationError> {
        let joined;
        let bytes: &[u8] = if self.carry.is_empty() {
            chunk
        } else {
            joined = [self.carry.as_slice(), chunk].concat();
            self.carry.clear();
            &joined
        };

        match std::str::from_utf8(bytes) {
            Ok(text) => self.log_text(text, chunk.len()),
            // Incomplete sequence at the end: keep the tail for the next chunk
            Err(e) if e.error_len().is_none() => {
                let (valid, tail) = bytes.split_at(e.valid_up_to());
                self.carry = tail.to_vec();
                self.log_text(std::str::from_utf8(valid).unwrap_or_default(), chunk.len());
            }
            Err(e) => {
                return Err(ObservationError::InvalidUtf8 {
                    valid_up_to: e.valid_up_to(),
                });
            }
        }

        Ok(())
    }

    fn on_complete(&mut self, summary: &StreamSummary) {
        if !self.carry.is_empty() {
            debug!(
                route = %self.route,
                dangling_bytes = self.carry.len(),
                "Response ended inside a UTF-8 sequence"
            );
        }

        info!(
            route = %self.route,
            status = self.status.as_u16(),
            bytes = summary.bytes,
            chunks = summary.chunks,
            "Response delivered"
        );
        metrics::record_response_bytes(&self.route, summary.bytes);
    }
}

/// Truncate `text` to at most `limit` bytes on a char boundary.
fn preview(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.get(..end).unwrap_or_default()
}

/// Installs [`ObservedBody`] around successful responses.
#[derive(Debug, Clone, Copy)]
pub struct ResponseInterceptor {
    preview_limit: usize,
}

impl ResponseInterceptor {
    pub fn new(preview_limit: usize) -> Self {
        Self { preview_limit }
    }

    /// Only 2xx responses whose body is not known to be empty are observed.
    pub fn should_intercept(response: &Response<Body>) -> bool {
        response.status().is_success() && response.body().size_hint().exact() != Some(0)
    }

    /// Decorate with the default [`LoggingObserver`].
    pub fn intercept(&self, response: Response<Body>, route: &str) -> Response<Body> {
        let observer = LoggingObserver::new(route, response.status(), self.preview_limit);
        self.intercept_with(response, observer, route)
    }

    pub fn intercept_with<O: BodyObserver>(
        &self,
        response: Response<Body>,
        observer: O,
        route: &str,
    ) -> Response<Body> {
        if !Self::should_intercept(&response) {
            debug!(
                route,
                status = response.status().as_u16(),
                "Forwarding response without interception"
            );
            return response;
        }

        let (parts, body) = response.into_parts();
        Response::from_parts(parts, Body::new(ObservedBody::new(body, observer, route)))
    }
}

impl Default for ResponseInterceptor {
    fn default() -> Self {
        Self::new(DEFAULT_PREVIEW_BYTES)
    }
}
