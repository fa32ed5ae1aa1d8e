use std::time::Duration;

use rmpv::Value;
use tollgate_types::{RequestSnapshot, RpcMethod, TelemetryUpdate, Verdict};

use crate::{codec, payload, AgentAddress, AgentTransport, RpcError};

/// Fail-open client for the agent's RPC methods.
///
/// Cheap to clone; holds no connection between calls.
#[derive(Debug, Clone)]
pub struct RpcClient {
    transport: AgentTransport,
}

impl RpcClient {
    pub fn new(transport: AgentTransport) -> Self {
        Self { transport }
    }

    /// Shorthand for `RpcClient::new(AgentTransport::new(address, timeout))`.
    pub fn connect_to(address: AgentAddress, timeout: Duration) -> Self {
        Self::new(AgentTransport::new(address, timeout))
    }

    /// Asks the agent for a verdict. `None` means the agent is unavailable or
    /// answered with something unusable; the request must then pass through.
    pub async fn pre_request(&self, snapshot: &RequestSnapshot) -> Option<Verdict> {
        let method = RpcMethod::PreRequest;
        let result = self
            .call(method, payload::snapshot_to_value(snapshot))
            .await?;
        match payload::verdict_from_value(result) {
            Ok(verdict) => Some(verdict),
            Err(e) => {
                log_failure(method, &e);
                None
            }
        }
    }

    /// Sends a follow-up report. The reply is discarded; the return value only
    /// says whether one arrived.
    pub async fn send_telemetry(&self, update: &TelemetryUpdate) -> bool {
        self.call(update.method(), payload::telemetry_to_value(update))
            .await
            .is_some()
    }

    /// Performs one call and returns the reply's result element.
    ///
    /// Every failure is logged here and reported as `None`.
    pub async fn call(&self, method: RpcMethod, payload: Value) -> Option<Value> {
        match self.try_call(method, payload).await {
            Ok(result) => Some(result),
            Err(e) => {
                log_failure(method, &e);
                None
            }
        }
    }

    async fn try_call(&self, method: RpcMethod, payload: Value) -> Result<Value, RpcError> {
        let frame = codec::encode_call(next_msgid(), method, payload)?;
        let reply = self.transport.round_trip(&frame).await?;
        codec::decode_reply(&reply)
    }
}

fn log_failure(method: RpcMethod, error: &RpcError) {
    if error.is_corrupt() {
        tracing::error!(method = %method, error = %error, "received corrupted reply from agent");
    } else {
        tracing::warn!(method = %method, error = %error, "unable to send data to agent");
    }
}

/// Random 31-bit message id, always a positive `i32` on the wire.
pub fn next_msgid() -> u32 {
    rand::random::<u32>() >> 1
}
