use crate::{HeaderPairs, RequestSnapshot, ResponseObservation, RpcMethod, Verdict};

/// Limits beyond which a response is reported without being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryThresholds {
    pub max_response_size: u64,
    pub max_response_millis: u64,
}

impl Default for TelemetryThresholds {
    fn default() -> Self {
        Self {
            max_response_size: 524_288,
            max_response_millis: 1_000,
        }
    }
}

impl TelemetryThresholds {
    /// A response is anomalous if it is not a 1xx/2xx, is too large, or too slow.
    pub fn is_anomalous(&self, observation: &ResponseObservation) -> bool {
        observation.status() >= 300
            || observation.bytes_out() > self.max_response_size
            || observation.millis() > self.max_response_millis
    }
}

/// Minimal outcome report, sent as `RPC.UpdateRequest`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateRequest {
    pub request_id: String,
    pub response_code: i64,
    pub response_size: u64,
    pub response_millis: u64,
    pub headers_out: HeaderPairs,
}

impl UpdateRequest {
    /// The report sent right before a blocked request is answered.
    pub fn blocked(verdict: &Verdict, millis: u64) -> Self {
        Self {
            request_id: verdict.request_id.clone(),
            response_code: verdict.waf_response,
            response_size: 0,
            response_millis: millis,
            headers_out: HeaderPairs::new(),
        }
    }

    fn from_observation(request_id: &str, observation: &ResponseObservation) -> Self {
        Self {
            request_id: request_id.to_string(),
            response_code: i64::from(observation.status()),
            response_size: observation.bytes_out(),
            response_millis: observation.millis(),
            headers_out: observation.headers().clone(),
        }
    }
}

/// Full report for an anomalous response nobody asked about, sent as
/// `RPC.PostRequest`.
///
/// Carries the request snapshot (body already redacted) along with the
/// original verdict code and the final response attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostRequest {
    pub snapshot: RequestSnapshot,
    pub waf_response: i64,
    pub outcome: UpdateRequest,
}

/// A follow-up report chosen by [`select_telemetry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryUpdate {
    Update(UpdateRequest),
    Post(PostRequest),
}

impl TelemetryUpdate {
    pub fn method(&self) -> RpcMethod {
        match self {
            Self::Update(_) => RpcMethod::UpdateRequest,
            Self::Post(_) => RpcMethod::PostRequest,
        }
    }
}

/// Decides what, if anything, to report once the response has been drained.
///
/// A request id means the agent asked for the outcome, so an update is always
/// sent. Without one, only anomalous responses are reported, in full. The
/// common case returns `None`.
pub fn select_telemetry(
    snapshot: &RequestSnapshot,
    verdict: &Verdict,
    observation: &ResponseObservation,
    thresholds: &TelemetryThresholds,
) -> Option<TelemetryUpdate> {
    if verdict.has_request_id() {
        return Some(TelemetryUpdate::Update(UpdateRequest::from_observation(
            &verdict.request_id,
            observation,
        )));
    }

    if !thresholds.is_anomalous(observation) {
        return None;
    }

    let mut snapshot = snapshot.clone();
    snapshot.redact_body();
    Some(TelemetryUpdate::Post(PostRequest {
        snapshot,
        waf_response: verdict.waf_response,
        outcome: UpdateRequest::from_observation(&verdict.request_id, observation),
    }))
}
