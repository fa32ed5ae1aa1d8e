//! Fake decision agent for lifecycle tests.
//!
//! Listens on a Unix socket in a temp dir, answers `RPC.PreRequest` with a
//! canned reply and every other method with a nil result, and records each
//! call it receives.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tollgate_rpc::{decode_call, encode_reply, verdict_to_value, AgentAddress, RpcClient, Value};
use tollgate_server::{LifecycleSettings, TollgateLayer};
use tollgate_types::Verdict;

/// How the fake agent answers `RPC.PreRequest`.
#[derive(Clone)]
pub enum PreReply {
    Verdict(Verdict),
    /// Bytes written verbatim instead of a reply envelope.
    Raw(Vec<u8>),
}

/// One call received by the fake agent.
#[derive(Debug)]
pub struct Call {
    pub method: String,
    pub payload: Value,
}

impl Call {
    pub fn field(&self, key: &str) -> &Value {
        self.payload
            .as_map()
            .expect("payload is a map")
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
            .unwrap_or_else(|| panic!("{} payload has no {key}", self.method))
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.payload
            .as_map()
            .is_some_and(|m| m.iter().any(|(k, _)| k.as_str() == Some(key)))
    }
}

pub struct FakeAgent {
    pub socket: PathBuf,
    calls: mpsc::UnboundedReceiver<Call>,
    _dir: TempDir,
}

impl FakeAgent {
    pub fn start(reply: PreReply) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let (tx, calls) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, reply.clone(), tx.clone()));
            }
        });
        Self {
            socket,
            calls,
            _dir: dir,
        }
    }

    pub fn allowing(request_id: &str) -> Self {
        Self::start(PreReply::Verdict(verdict(request_id, 200, &[])))
    }

    pub fn client(&self) -> RpcClient {
        RpcClient::connect_to(
            AgentAddress::Unix(self.socket.clone()),
            Duration::from_millis(500),
        )
    }

    pub fn layer(&self) -> TollgateLayer {
        self.layer_with(LifecycleSettings::default())
    }

    pub fn layer_with(&self, settings: LifecycleSettings) -> TollgateLayer {
        TollgateLayer::new(settings, self.client())
    }

    /// Waits for the next recorded call.
    pub async fn next_call(&mut self) -> Call {
        tokio::time::timeout(Duration::from_secs(2), self.calls.recv())
            .await
            .expect("timed out waiting for an agent call")
            .expect("agent task stopped")
    }

    /// Asserts that nothing else arrives within `wait`.
    pub async fn assert_quiet(&mut self, wait: Duration) {
        if let Ok(Some(call)) = tokio::time::timeout(wait, self.calls.recv()).await {
            panic!("unexpected agent call {}", call.method);
        }
    }
}

pub fn verdict(request_id: &str, code: i64, headers: &[(&str, &str)]) -> Verdict {
    Verdict {
        request_id: request_id.to_string(),
        waf_response: code,
        request_headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

/// A socket path nothing listens on.
pub fn unreachable_layer(dir: &TempDir) -> TollgateLayer {
    TollgateLayer::new(
        LifecycleSettings::default(),
        RpcClient::connect_to(
            AgentAddress::Unix(dir.path().join("nobody-home.sock")),
            Duration::from_millis(50),
        ),
    )
}

async fn serve(mut stream: UnixStream, reply: PreReply, calls: mpsc::UnboundedSender<Call>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let (msgid, method, payload) = loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        if let Ok(call) = decode_call(&buf) {
            break call;
        }
    };

    let frame = match (method.as_str(), &reply) {
        ("RPC.PreRequest", PreReply::Verdict(v)) => encode_reply(msgid, verdict_to_value(v)).unwrap(),
        ("RPC.PreRequest", PreReply::Raw(bytes)) => bytes.clone(),
        _ => encode_reply(msgid, Value::Nil).unwrap(),
    };
    let _ = calls.send(Call { method, payload });
    let _ = stream.write_all(&frame).await;
}
