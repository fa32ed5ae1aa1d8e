//! Shared request-lifecycle types for the tollgate workspace.
//!
//! Everything in this crate is plain data: the snapshot of an inbound request
//! sent to the decision agent, the agent's verdict, the observation of the
//! application's response, and the follow-up telemetry payloads. The wire
//! mapping lives in `tollgate-rpc`; the HTTP plumbing in `tollgate-server`.
//!
//! No value here is shared between requests.

mod observation;
mod snapshot;
mod telemetry;
mod verdict;

pub use observation::{elapsed_millis, ResponseObservation};
pub use snapshot::RequestSnapshot;
pub use telemetry::{select_telemetry, PostRequest, TelemetryThresholds, TelemetryUpdate, UpdateRequest};
pub use verdict::{Verdict, VerdictAction, REDIRECT_DIRECTIVE};

use std::fmt;

/// Ordered `(name, value)` header pairs, duplicates allowed.
pub type HeaderPairs = Vec<(String, String)>;

/// Request header carrying the agent-issued request id to the application.
pub const REQUEST_ID_HEADER: &str = "x-sigsci-requestid";

/// Request header carrying the raw verdict code to the application.
pub const AGENT_RESPONSE_HEADER: &str = "x-sigsci-agentresponse";

/// RPC methods exposed by the decision agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    /// Asks for a verdict before the application runs.
    PreRequest,
    /// Reports the outcome of a request the agent already knows about.
    UpdateRequest,
    /// Reports an anomalous response together with the full request.
    PostRequest,
}

impl RpcMethod {
    /// Returns the method name used in the call envelope.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreRequest => "RPC.PreRequest",
            Self::UpdateRequest => "RPC.UpdateRequest",
            Self::PostRequest => "RPC.PostRequest",
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
