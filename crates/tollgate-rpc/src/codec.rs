//! Envelope framing on top of MessagePack.
//!
//! Call:  `[0, msgid, method, [payload]]`
//! Reply: `[1, msgid, error, result]`
//!
//! Only the reply's element count is validated; the result is whatever the
//! fourth element holds.

use rmpv::Value;
use tollgate_types::RpcMethod;

use crate::RpcError;

/// Message type tag for calls.
pub const MSG_TYPE_CALL: u8 = 0;
/// Message type tag for replies.
pub const MSG_TYPE_REPLY: u8 = 1;

const ENVELOPE_LEN: usize = 4;

/// Encodes a call envelope.
pub fn encode_call(msgid: u32, method: RpcMethod, payload: Value) -> Result<Vec<u8>, RpcError> {
    let envelope = Value::Array(vec![
        Value::from(MSG_TYPE_CALL),
        Value::from(msgid),
        Value::from(method.as_str()),
        Value::Array(vec![payload]),
    ]);
    write(&envelope)
}

/// Decodes a reply frame and returns its result element.
pub fn decode_reply(bytes: &[u8]) -> Result<Value, RpcError> {
    let mut elements = read_envelope(bytes)?;
    Ok(elements.swap_remove(ENVELOPE_LEN - 1))
}

/// Encodes a reply envelope. Used by agents and test doubles.
pub fn encode_reply(msgid: u32, result: Value) -> Result<Vec<u8>, RpcError> {
    let envelope = Value::Array(vec![
        Value::from(MSG_TYPE_REPLY),
        Value::from(msgid),
        Value::Nil,
        result,
    ]);
    write(&envelope)
}

/// Decodes a call envelope into `(msgid, method name, payload)`.
///
/// The counterpart of [`encode_call`], for agents and test doubles.
pub fn decode_call(bytes: &[u8]) -> Result<(u32, String, Value), RpcError> {
    let elements = read_envelope(bytes)?;
    let mut elements = elements.into_iter();
    let kind = elements.next().and_then(|v| v.as_u64());
    if kind != Some(u64::from(MSG_TYPE_CALL)) {
        return Err(RpcError::CorruptReply(format!(
            "message type {kind:?} is not a call"
        )));
    }
    let msgid = elements
        .next()
        .and_then(|v| v.as_u64())
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| RpcError::CorruptReply("missing msgid".to_string()))?;
    let method = elements
        .next()
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| RpcError::CorruptReply("missing method".to_string()))?;
    let payload = match elements.next() {
        Some(Value::Array(mut args)) if args.len() == 1 => args.swap_remove(0),
        _ => return Err(RpcError::CorruptReply("params must hold one payload".to_string())),
    };
    Ok((msgid, method, payload))
}

fn read_envelope(bytes: &[u8]) -> Result<Vec<Value>, RpcError> {
    let mut reader = bytes;
    let value =
        rmpv::decode::read_value(&mut reader).map_err(|e| RpcError::Decode(e.to_string()))?;
    match value {
        Value::Array(elements) if elements.len() == ENVELOPE_LEN => Ok(elements),
        Value::Array(elements) => Err(RpcError::CorruptReply(format!(
            "{} elements, expected {ENVELOPE_LEN}",
            elements.len()
        ))),
        other => Err(RpcError::CorruptReply(format!(
            "expected an array, got {other}"
        ))),
    }
}

fn write(value: &Value) -> Result<Vec<u8>, RpcError> {
    let mut buf = Vec::with_capacity(256);
    rmpv::encode::write_value(&mut buf, value).map_err(|e| RpcError::Encode(e.to_string()))?;
    Ok(buf)
}
