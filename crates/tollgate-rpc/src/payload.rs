//! Mapping between the shared types and the agent's payload maps.

use rmpv::Value;
use tollgate_types::{HeaderPairs, RequestSnapshot, TelemetryUpdate, UpdateRequest, Verdict};

use crate::RpcError;

mod field {
    pub const ACCESS_KEY_ID: &str = "AccessKeyID";
    pub const MODULE_VERSION: &str = "ModuleVersion";
    pub const SERVER_VERSION: &str = "ServerVersion";
    pub const SERVER_FLAVOR: &str = "ServerFlavor";
    pub const SERVER_NAME: &str = "ServerName";
    pub const TIMESTAMP: &str = "Timestamp";
    pub const NOW_MILLIS: &str = "NowMillis";
    pub const REMOTE_ADDR: &str = "RemoteAddr";
    pub const METHOD: &str = "Method";
    pub const SCHEME: &str = "Scheme";
    pub const URI: &str = "URI";
    pub const PROTOCOL: &str = "Protocol";
    pub const TLS_PROTOCOL: &str = "TLSProtocol";
    pub const TLS_CIPHER: &str = "TLSCipher";
    pub const HEADERS_IN: &str = "HeadersIn";
    pub const POST_BODY: &str = "PostBody";
    pub const REQUEST_ID: &str = "RequestID";
    pub const WAF_RESPONSE: &str = "WAFResponse";
    pub const REQUEST_HEADERS: &str = "RequestHeaders";
    pub const RESPONSE_CODE: &str = "ResponseCode";
    pub const RESPONSE_SIZE: &str = "ResponseSize";
    pub const RESPONSE_MILLIS: &str = "ResponseMillis";
    pub const HEADERS_OUT: &str = "HeadersOut";
}

fn entry(key: &'static str, value: impl Into<Value>) -> (Value, Value) {
    (Value::from(key), value.into())
}

fn headers_value(headers: &HeaderPairs) -> Value {
    Value::Array(
        headers
            .iter()
            .map(|(name, value)| {
                Value::Array(vec![Value::from(name.as_str()), Value::from(value.as_str())])
            })
            .collect(),
    )
}

fn snapshot_entries(snapshot: &RequestSnapshot) -> Vec<(Value, Value)> {
    vec![
        entry(field::ACCESS_KEY_ID, snapshot.access_key_id.as_str()),
        entry(field::MODULE_VERSION, snapshot.module_version.as_str()),
        entry(field::SERVER_VERSION, snapshot.server_version.as_str()),
        entry(field::SERVER_FLAVOR, snapshot.server_flavor.as_str()),
        entry(field::SERVER_NAME, snapshot.server_name.as_str()),
        entry(field::TIMESTAMP, snapshot.timestamp),
        entry(field::NOW_MILLIS, snapshot.now_millis),
        entry(field::REMOTE_ADDR, snapshot.remote_addr.as_str()),
        entry(field::METHOD, snapshot.method.as_str()),
        entry(field::SCHEME, snapshot.scheme.as_str()),
        entry(field::URI, snapshot.uri.as_str()),
        entry(field::PROTOCOL, snapshot.protocol.as_str()),
        entry(field::TLS_PROTOCOL, snapshot.tls_protocol.as_str()),
        entry(field::TLS_CIPHER, snapshot.tls_cipher.as_str()),
        entry(field::HEADERS_IN, headers_value(&snapshot.headers_in)),
        entry(field::POST_BODY, Value::Binary(snapshot.post_body.to_vec())),
    ]
}

fn outcome_entries(update: &UpdateRequest) -> Vec<(Value, Value)> {
    vec![
        entry(field::REQUEST_ID, update.request_id.as_str()),
        entry(field::RESPONSE_CODE, update.response_code),
        entry(field::RESPONSE_SIZE, update.response_size),
        entry(field::RESPONSE_MILLIS, update.response_millis),
        entry(field::HEADERS_OUT, headers_value(&update.headers_out)),
    ]
}

/// Builds the `RPC.PreRequest` payload.
pub fn snapshot_to_value(snapshot: &RequestSnapshot) -> Value {
    Value::Map(snapshot_entries(snapshot))
}

/// Builds the `RPC.UpdateRequest` or `RPC.PostRequest` payload.
pub fn telemetry_to_value(update: &TelemetryUpdate) -> Value {
    match update {
        TelemetryUpdate::Update(update) => Value::Map(outcome_entries(update)),
        TelemetryUpdate::Post(post) => {
            let mut entries = snapshot_entries(&post.snapshot);
            entries.push(entry(field::WAF_RESPONSE, post.waf_response));
            entries.extend(outcome_entries(&post.outcome));
            Value::Map(entries)
        }
    }
}

/// Builds a `RPC.PreRequest` result map. Used by agents and test doubles.
pub fn verdict_to_value(verdict: &Verdict) -> Value {
    Value::Map(vec![
        entry(field::REQUEST_ID, verdict.request_id.as_str()),
        entry(field::WAF_RESPONSE, verdict.waf_response),
        entry(field::REQUEST_HEADERS, headers_value(&verdict.request_headers)),
    ])
}

/// Reads a verdict from a `RPC.PreRequest` result.
///
/// `WAFResponse` must be present and integral. A missing or nil `RequestID`
/// reads as empty and a missing `RequestHeaders` as no directives; directive
/// entries that are not `[name, value]` string pairs are skipped.
pub fn verdict_from_value(value: Value) -> Result<Verdict, RpcError> {
    let entries = match value {
        Value::Map(entries) => entries,
        other => {
            return Err(RpcError::MalformedVerdict(format!(
                "expected a map, got {other}"
            )))
        }
    };

    let mut request_id = None;
    let mut waf_response = None;
    let mut request_headers = HeaderPairs::new();

    for (key, value) in entries {
        match key.as_str() {
            Some(field::REQUEST_ID) => {
                request_id = match value {
                    Value::Nil => Some(String::new()),
                    other => Some(text(&other).ok_or_else(|| {
                        RpcError::MalformedVerdict(format!("RequestID is not a string: {other}"))
                    })?),
                }
            }
            Some(field::WAF_RESPONSE) => waf_response = value.as_i64(),
            Some(field::REQUEST_HEADERS) => {
                if let Value::Array(pairs) = value {
                    request_headers = pairs.iter().filter_map(header_pair).collect();
                }
            }
            _ => {}
        }
    }

    let waf_response = waf_response.ok_or_else(|| {
        RpcError::MalformedVerdict("missing or non-integer WAFResponse".to_string())
    })?;

    Ok(Verdict {
        request_id: request_id.unwrap_or_default(),
        waf_response,
        request_headers,
    })
}

fn header_pair(value: &Value) -> Option<(String, String)> {
    match value.as_array()?.as_slice() {
        [name, value] => Some((text(name)?, text(value)?)),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => s.as_str().map(str::to_string),
        Value::Binary(b) => Some(String::from_utf8_lossy(b).into_owned()),
        _ => None,
    }
}
