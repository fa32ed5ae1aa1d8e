//! Passive observation of the application's response.
//!
//! The response head is recorded as soon as the application returns it. The
//! body is wrapped so every data frame is counted on its way to the client,
//! without buffering. Once the body is drained the elapsed time is fixed and
//! the completion callback runs, exactly once.

use axum::{
    body::Body,
    http::{HeaderMap, Response},
};
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};
use tollgate_types::{HeaderPairs, ResponseObservation};

type Completion = Box<dyn FnOnce(ResponseObservation) + Send + 'static>;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Records status, headers, byte count and timing of one response.
pub struct ResponseRecorder {
    observation: ResponseObservation,
    start_millis: i64,
    clock: fn() -> i64,
    on_drained: Option<Completion>,
}

impl ResponseRecorder {
    /// `on_drained` receives the final observation after the last body frame
    /// has been handed to the client. It never runs if the client goes away
    /// first.
    pub fn new(
        start_millis: i64,
        on_drained: impl FnOnce(ResponseObservation) + Send + 'static,
    ) -> Self {
        Self {
            observation: ResponseObservation::new(),
            start_millis,
            clock: now_millis,
            on_drained: Some(Box::new(on_drained)),
        }
    }

    /// Replaces the wall clock used to finalize elapsed time.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Records the response head and wraps the body for counting.
    pub fn observe(mut self, response: Response<Body>) -> Response<Body> {
        let (parts, body) = response.into_parts();
        self.observation
            .record_head(parts.status.as_u16(), header_pairs(&parts.headers));
        Response::from_parts(
            parts,
            Body::new(RecordedBody {
                inner: body,
                recorder: self,
            }),
        )
    }

    fn finish(&mut self) {
        if let Some(on_drained) = self.on_drained.take() {
            self.observation
                .finalize(self.start_millis, (self.clock)());
            on_drained(std::mem::take(&mut self.observation));
        }
    }

    fn is_finished(&self) -> bool {
        self.on_drained.is_none()
    }
}

fn header_pairs(headers: &HeaderMap) -> HeaderPairs {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Response body that counts bytes and reports completion.
struct RecordedBody {
    inner: Body,
    recorder: ResponseRecorder,
}

impl HttpBody for RecordedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.recorder.observation.add_bytes(data.len() as u64);
                }
            }
            Poll::Ready(None) => this.recorder.finish(),
            _ => {}
        }
        polled
    }

    // Report "not done" until the inner body has yielded its end, so the
    // server polls once more and completion is observed.
    fn is_end_stream(&self) -> bool {
        self.recorder.is_finished()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for RecordedBody {
    fn drop(&mut self) {
        // Servers may drop a body without polling it (HEAD, 204, 304). If
        // nothing was left to send, that still counts as drained.
        if self.inner.is_end_stream() {
            self.recorder.finish();
        }
    }
}
