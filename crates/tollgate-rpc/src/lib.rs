//! RPC client for the local decision agent.
//!
//! Every call opens a fresh stream connection, writes one MessagePack call
//! envelope `[0, msgid, method, [payload]]`, reads one reply frame and closes
//! the connection. There is no pooling and no retry.
//!
//! # Fail-open contract
//!
//! [`RpcClient`] is the boundary where failures stop. Connect errors,
//! timeouts, short reads and malformed replies are logged and turned into
//! `None`; callers only ever see "got a reply" or "got nothing". The
//! [`RpcError`] type exists so the transport and codec can use `?`
//! internally and so tests can assert on specific failure modes.

mod address;
mod client;
mod codec;
mod error;
mod payload;
mod transport;

pub use address::{AgentAddress, DEFAULT_AGENT_SOCKET};
pub use client::{next_msgid, RpcClient};
pub use codec::{decode_call, decode_reply, encode_call, encode_reply, MSG_TYPE_CALL, MSG_TYPE_REPLY};
pub use error::RpcError;
pub use payload::{snapshot_to_value, telemetry_to_value, verdict_from_value, verdict_to_value};
pub use transport::{AgentTransport, DEFAULT_TIMEOUT, MAX_REPLY_BYTES};

/// MessagePack value type used for payloads.
pub use rmpv::Value;
