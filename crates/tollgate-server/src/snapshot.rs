//! Extraction of a [`RequestSnapshot`] from an inbound axum request.

use axum::{
    body::Body,
    extract::{ConnectInfo, OriginalUri},
    http::{header, HeaderMap, Request, Uri},
};
use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::net::SocketAddr;
use tollgate_types::{HeaderPairs, RequestSnapshot};

/// Characters left unescaped when re-encoding the request path.
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.');

/// Default cap on captured request bodies.
pub const DEFAULT_MAX_POST_BODY: usize = 100_000;

/// TLS parameters of the client connection.
///
/// Inserted into request extensions by whatever terminates TLS. Its presence
/// also marks the request scheme as `https`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    pub protocol: String,
    pub cipher: String,
}

/// Builds the per-request snapshot sent with `RPC.PreRequest`.
///
/// Holds the fields that are fixed for the process (versions, access key,
/// fallback server name) and the body capture limit.
#[derive(Debug, Clone)]
pub struct RequestSnapshotBuilder {
    pub access_key_id: String,
    pub module_version: String,
    pub server_version: String,
    pub server_flavor: String,
    /// Used when the request carries neither a `Host` header nor an
    /// authority in its URI.
    pub server_name: String,
    pub max_post_body: usize,
}

impl Default for RequestSnapshotBuilder {
    fn default() -> Self {
        Self {
            access_key_id: String::new(),
            module_version: concat!("tollgate ", env!("CARGO_PKG_VERSION")).to_string(),
            server_version: "rust axum".to_string(),
            server_flavor: String::new(),
            server_name: "localhost".to_string(),
            max_post_body: DEFAULT_MAX_POST_BODY,
        }
    }
}

impl RequestSnapshotBuilder {
    /// Snapshots `req`, reading the body if the capture policy allows it.
    ///
    /// The returned request is what the application must receive: when the
    /// body was read for inspection it has been replaced by a buffered copy,
    /// otherwise it is untouched.
    pub async fn build(
        &self,
        req: Request<Body>,
        started_at: DateTime<Utc>,
    ) -> (Request<Body>, RequestSnapshot) {
        let mut snapshot = RequestSnapshot {
            access_key_id: self.access_key_id.clone(),
            module_version: self.module_version.clone(),
            server_version: self.server_version.clone(),
            server_flavor: self.server_flavor.clone(),
            server_name: self.server_name_for(&req),
            timestamp: started_at.timestamp(),
            now_millis: started_at.timestamp_millis(),
            remote_addr: req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
                .unwrap_or_default(),
            method: req.method().as_str().to_string(),
            scheme: scheme(&req).to_string(),
            uri: reconstruct_uri(&req),
            protocol: format!("{:?}", req.version()),
            tls_protocol: String::new(),
            tls_cipher: String::new(),
            headers_in: header_pairs(req.headers()),
            post_body: Bytes::new(),
        };
        if let Some(tls) = req.extensions().get::<TlsInfo>() {
            snapshot.tls_protocol = tls.protocol.clone();
            snapshot.tls_cipher = tls.cipher.clone();
        }

        let (req, body) = capture_body(req, self.max_post_body).await;
        snapshot.post_body = body;
        (req, snapshot)
    }

    fn server_name_for(&self, req: &Request<Body>) -> String {
        req.headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .or_else(|| req.uri().host())
            .unwrap_or(self.server_name.as_str())
            .to_string()
    }
}

fn scheme(req: &Request<Body>) -> &str {
    if req.extensions().get::<TlsInfo>().is_some() {
        "https"
    } else {
        req.uri().scheme_str().unwrap_or("http")
    }
}

/// Full request path (including any nesting prefix), re-encoded, plus the
/// query string as received.
fn reconstruct_uri(req: &Request<Body>) -> String {
    let uri: &Uri = req
        .extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri)
        .unwrap_or_else(|| req.uri());

    let decoded: Vec<u8> = percent_decode_str(uri.path()).collect();
    let mut out = percent_encode(&decoded, PATH_ENCODE_SET).to_string();
    if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(query);
    }
    out
}

/// Request headers grouped by name, one pair per value.
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

/// Whether bodies of this content type are forwarded to the agent.
pub fn is_capturable_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("application/x-www-form-urlencoded")
        || ct.starts_with("multipart/form-data")
        || ct.starts_with("application/graphql")
        || ct.contains("json")
        || ct.contains("javascript")
        || ct.contains("xml")
}

/// Declared positive content length. Unparseable values count as absent.
fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|len| *len > 0)
        .and_then(|len| usize::try_from(len).ok())
}

async fn capture_body(req: Request<Body>, max_post_body: usize) -> (Request<Body>, Bytes) {
    let Some(len) = declared_length(req.headers()).filter(|len| *len <= max_post_body) else {
        return (req, Bytes::new());
    };
    let capturable = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(is_capturable_content_type);
    if !capturable {
        return (req, Bytes::new());
    }

    let (parts, body) = req.into_parts();
    let mut frames = body.into_data_stream();
    let mut read = BytesMut::with_capacity(len);
    loop {
        match frames.next().await {
            Some(Ok(chunk)) => {
                read.extend_from_slice(&chunk);
                if read.len() > len {
                    tracing::debug!(declared = len, "request body longer than declared, not captured");
                    // Replay the prefix, then let the app read the rest as it arrives.
                    let replay = stream::iter([Ok::<_, axum::Error>(read.freeze())]).chain(frames);
                    return (Request::from_parts(parts, Body::from_stream(replay)), Bytes::new());
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, declared = len, "failed to read request body for inspection");
                // Replay the prefix, then the same failure.
                let replay = stream::iter([Ok(read.freeze()), Err(e)]);
                return (Request::from_parts(parts, Body::from_stream(replay)), Bytes::new());
            }
            None => {
                let bytes = read.freeze();
                return (Request::from_parts(parts, Body::from(bytes.clone())), bytes);
            }
        }
    }
}
