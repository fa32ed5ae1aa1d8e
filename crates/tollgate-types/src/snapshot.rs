use bytes::Bytes;

use crate::HeaderPairs;

/// Protocol-ready description of one inbound request.
///
/// Built once when the request enters the lifecycle and sent as the
/// `RPC.PreRequest` payload. The body is cleared with [`redact_body`] as soon
/// as the verdict is back; the rest is reused for `RPC.PostRequest`.
///
/// [`redact_body`]: RequestSnapshot::redact_body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSnapshot {
    /// Agent access key. Normally empty.
    pub access_key_id: String,
    pub module_version: String,
    pub server_version: String,
    pub server_flavor: String,
    pub server_name: String,
    /// Request start, whole seconds since the Unix epoch.
    pub timestamp: i64,
    /// Request start, milliseconds since the Unix epoch.
    pub now_millis: i64,
    pub remote_addr: String,
    pub method: String,
    pub scheme: String,
    /// Percent-encoded path plus the raw query string, if any.
    pub uri: String,
    /// Protocol version, e.g. `HTTP/1.1`.
    pub protocol: String,
    /// Empty unless the connection is TLS.
    pub tls_protocol: String,
    /// Empty unless the connection is TLS.
    pub tls_cipher: String,
    pub headers_in: HeaderPairs,
    /// Captured request body, empty when the capture policy declined it.
    pub post_body: Bytes,
}

impl RequestSnapshot {
    /// Drops the captured body. Called once the pre-request exchange is done.
    pub fn redact_body(&mut self) {
        self.post_body = Bytes::new();
    }
}
