//! Error types for agent RPC.

use std::io;

/// Errors raised while talking to the agent.
///
/// Never returned from [`RpcClient`](crate::RpcClient)'s public methods; they
/// are logged there and collapsed into "no reply".
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The connection could not be established.
    #[error("failed to connect to agent at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// A connect, send or receive step exceeded the socket timeout.
    #[error("agent {0} timed out")]
    Timeout(&'static str),

    /// Send or receive failed.
    #[error("agent i/o error: {0}")]
    Io(#[from] io::Error),

    /// The agent closed the connection without sending a reply.
    #[error("agent closed the connection without replying")]
    Closed,

    /// The call envelope could not be encoded.
    #[error("failed to encode call envelope: {0}")]
    Encode(String),

    /// The reply is not valid MessagePack (or was truncated).
    #[error("failed to decode agent reply: {0}")]
    Decode(String),

    /// The reply decoded but is not a 4-element envelope.
    #[error("corrupted reply envelope: {0}")]
    CorruptReply(String),

    /// The reply payload is not a usable verdict.
    #[error("malformed verdict: {0}")]
    MalformedVerdict(String),
}

impl RpcError {
    /// Whether the agent answered with something unusable, as opposed to not
    /// answering at all.
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::CorruptReply(_) | Self::MalformedVerdict(_)
        )
    }
}
