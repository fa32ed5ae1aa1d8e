use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tollgate_rpc::{
    decode_call, encode_reply, verdict_to_value, AgentAddress, RpcClient, Value,
};
use tollgate_types::{RequestSnapshot, TelemetryUpdate, UpdateRequest, Verdict};

/// What the fake agent does with a call.
#[derive(Clone)]
enum Reply {
    /// Replies with a well-formed envelope around this result.
    Result(Value),
    /// Writes these bytes verbatim.
    Raw(Vec<u8>),
    /// Reads the call and never answers.
    Silent,
}

/// Reads until a full call envelope has arrived.
async fn read_call<S: tokio::io::AsyncRead + Unpin>(stream: &mut S) -> Option<(u32, String, Value)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Ok(call) = decode_call(&buf) {
            return Some(call);
        }
    }
}

async fn serve<S>(mut stream: S, reply: Reply, calls: mpsc::UnboundedSender<(u32, String, Value)>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let Some((msgid, method, payload)) = read_call(&mut stream).await else {
        return;
    };
    let _ = calls.send((msgid, method, payload));
    match reply {
        Reply::Result(result) => {
            let frame = encode_reply(msgid, result).unwrap();
            let _ = stream.write_all(&frame).await;
        }
        Reply::Raw(bytes) => {
            let _ = stream.write_all(&bytes).await;
        }
        Reply::Silent => {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

fn spawn_unix_agent(
    path: &std::path::Path,
    reply: Reply,
) -> mpsc::UnboundedReceiver<(u32, String, Value)> {
    let listener = UnixListener::bind(path).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, reply.clone(), tx.clone()));
        }
    });
    rx
}

fn pack(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value).unwrap();
    buf
}

fn client_for(address: AgentAddress) -> RpcClient {
    RpcClient::connect_to(address, Duration::from_millis(200))
}

#[tokio::test]
async fn pre_request_returns_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let verdict = Verdict {
        request_id: "req-1".to_string(),
        waf_response: 200,
        request_headers: vec![("X-SigSci-Tags".to_string(), "SQLI".to_string())],
    };
    let mut calls = spawn_unix_agent(&socket, Reply::Result(verdict_to_value(&verdict)));

    let snapshot = RequestSnapshot {
        method: "GET".to_string(),
        uri: "/".to_string(),
        ..Default::default()
    };
    let got = client_for(AgentAddress::Unix(socket)).pre_request(&snapshot).await;
    assert_eq!(got, Some(verdict));

    let (msgid, method, payload) = calls.recv().await.unwrap();
    assert!(msgid <= i32::MAX as u32);
    assert_eq!(method, "RPC.PreRequest");
    assert!(payload.as_map().is_some());
}

#[tokio::test]
async fn three_element_reply_is_no_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let frame = pack(&Value::Array(vec![
        Value::from(1),
        Value::from(7),
        Value::Nil,
    ]));
    let _calls = spawn_unix_agent(&socket, Reply::Raw(frame));

    let got = client_for(AgentAddress::Unix(socket))
        .pre_request(&RequestSnapshot::default())
        .await;
    assert_eq!(got, None);
}

#[tokio::test]
async fn truncated_reply_is_no_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let verdict = Verdict {
        request_id: "a-fairly-long-request-identifier".to_string(),
        waf_response: 200,
        request_headers: vec![],
    };
    let mut frame = encode_reply(1, verdict_to_value(&verdict)).unwrap();
    frame.truncate(frame.len() / 2);
    let _calls = spawn_unix_agent(&socket, Reply::Raw(frame));

    let got = client_for(AgentAddress::Unix(socket))
        .pre_request(&RequestSnapshot::default())
        .await;
    assert_eq!(got, None);
}

#[tokio::test]
async fn silent_agent_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let _calls = spawn_unix_agent(&socket, Reply::Silent);

    let client = RpcClient::connect_to(AgentAddress::Unix(socket), Duration::from_millis(50));
    let started = std::time::Instant::now();
    let got = client.pre_request(&RequestSnapshot::default()).await;
    assert_eq!(got, None);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn reply_without_waf_response_is_no_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let result = Value::Map(vec![(Value::from("RequestID"), Value::from("x"))]);
    let _calls = spawn_unix_agent(&socket, Reply::Result(result));

    let got = client_for(AgentAddress::Unix(socket))
        .pre_request(&RequestSnapshot::default())
        .await;
    assert_eq!(got, None);
}

#[tokio::test]
async fn telemetry_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, mut calls) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, Reply::Result(Value::Nil), tx.clone()));
        }
    });

    let client = client_for(AgentAddress::Tcp("127.0.0.1".to_string(), port));
    let update = TelemetryUpdate::Update(UpdateRequest {
        request_id: "req-9".to_string(),
        response_code: 200,
        response_size: 512,
        response_millis: 4,
        headers_out: vec![("content-type".to_string(), "text/plain".to_string())],
    });
    assert!(client.send_telemetry(&update).await);

    let (_, method, payload) = calls.recv().await.unwrap();
    assert_eq!(method, "RPC.UpdateRequest");
    let fields = payload.as_map().unwrap();
    let request_id = fields
        .iter()
        .find(|(k, _)| k.as_str() == Some("RequestID"))
        .and_then(|(_, v)| v.as_str());
    assert_eq!(request_id, Some("req-9"));
}

#[tokio::test]
async fn each_call_uses_a_fresh_connection() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");
    let listener = UnixListener::bind(&socket).unwrap();
    let (tx, mut accepted) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (calls, _rx) = mpsc::unbounded_channel();
        while let Ok((stream, _)) = listener.accept().await {
            let _ = tx.send(());
            tokio::spawn(serve(stream, Reply::Result(Value::Nil), calls.clone()));
        }
    });

    let client = client_for(AgentAddress::Unix(socket));
    for _ in 0..3 {
        client
            .call(tollgate_types::RpcMethod::UpdateRequest, Value::Nil)
            .await;
    }
    for _ in 0..3 {
        accepted.recv().await.unwrap();
    }
}
