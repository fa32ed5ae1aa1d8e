//! The request lifecycle: pre-request verdict, block or pass-through, and
//! post-request telemetry.
//!
//! ```text
//! Start -> AwaitingVerdict -+-> (no verdict)  pass through untouched, no telemetry
//!                           +-> (300-599)     UpdateRequest, answer with the code
//!                           +-> (otherwise)   inject headers, run the app, record
//!                                             -> on drain: nothing | UpdateRequest | PostRequest
//! ```
//!
//! The only outcome that changes what the client sees is an explicit block
//! verdict. Everything that goes wrong on the agent side lets the request
//! through.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode},
};
use hyper::ext::ReasonPhrase;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tollgate_rpc::RpcClient;
use tollgate_types::{
    elapsed_millis, select_telemetry, TelemetryThresholds, TelemetryUpdate, UpdateRequest,
    Verdict, VerdictAction, AGENT_RESPONSE_HEADER, REQUEST_ID_HEADER,
};
use tower::{Layer, Service};

use crate::config::Config;
use crate::recorder::{now_millis, ResponseRecorder};
use crate::snapshot::RequestSnapshotBuilder;

/// Status line reason used for every blocked response.
const BLOCKED_REASON: &[u8] = b"NOT ACCEPTABLE";

/// Process-wide settings, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct LifecycleSettings {
    pub snapshot: RequestSnapshotBuilder,
    pub thresholds: TelemetryThresholds,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            snapshot: RequestSnapshotBuilder {
                access_key_id: config.agent.access_key_id.clone(),
                server_name: config.server.server_name.clone(),
                max_post_body: config.limits.max_post_body,
                ..RequestSnapshotBuilder::default()
            },
            thresholds: TelemetryThresholds {
                max_response_size: config.limits.max_response_size,
                max_response_millis: config.limits.max_response_millis,
            },
        }
    }
}

/// Tower layer that puts the decision agent in front of a service.
#[derive(Debug, Clone)]
pub struct TollgateLayer {
    settings: Arc<LifecycleSettings>,
    client: RpcClient,
}

impl TollgateLayer {
    pub fn new(settings: LifecycleSettings, client: RpcClient) -> Self {
        Self {
            settings: Arc::new(settings),
            client,
        }
    }

    /// Builds settings and the agent client from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            LifecycleSettings::from_config(config),
            RpcClient::connect_to(config.agent.address.clone(), config.agent.timeout()),
        )
    }
}

impl<S> Layer<S> for TollgateLayer {
    type Service = TollgateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TollgateService {
            inner,
            settings: self.settings.clone(),
            client: self.client.clone(),
        }
    }
}

/// Service produced by [`TollgateLayer`].
#[derive(Debug, Clone)]
pub struct TollgateService<S> {
    inner: S,
    settings: Arc<LifecycleSettings>,
    client: RpcClient,
}

impl<S> Service<Request<Body>> for TollgateService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Keep the instance that was driven to readiness for this call.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let settings = self.settings.clone();
        let client = self.client.clone();
        Box::pin(run(inner, settings, client, req))
    }
}

async fn run<S>(
    mut inner: S,
    settings: Arc<LifecycleSettings>,
    client: RpcClient,
    req: Request<Body>,
) -> Result<Response<Body>, S::Error>
where
    S: Service<Request<Body>, Response = Response<Body>>,
{
    let started_at = chrono::Utc::now();
    let start_millis = started_at.timestamp_millis();
    let (mut req, mut snapshot) = settings.snapshot.build(req, started_at).await;

    let Some(verdict) = client.pre_request(&snapshot).await else {
        tracing::warn!(
            method = %snapshot.method,
            uri = %snapshot.uri,
            "no verdict from agent, allowing original request to pass"
        );
        return inner.call(req).await;
    };
    snapshot.redact_body();

    match verdict.action() {
        VerdictAction::Block { status, location } => {
            let millis = elapsed_millis(start_millis, now_millis());
            let update = TelemetryUpdate::Update(UpdateRequest::blocked(&verdict, millis));
            client.send_telemetry(&update).await;
            tracing::info!(
                status,
                request_id = %verdict.request_id,
                uri = %snapshot.uri,
                "request blocked by agent"
            );
            return Ok(blocked_response(status, location.as_deref()));
        }
        VerdictAction::AllowUnknown(code) => {
            tracing::info!(code, "received unknown waf response code from agent");
        }
        VerdictAction::Allow => {}
    }

    inject_headers(req.headers_mut(), &verdict);
    let response = inner.call(req).await?;

    let thresholds = settings.thresholds;
    let recorder = ResponseRecorder::new(start_millis, move |observation| {
        let update = select_telemetry(&snapshot, &verdict, &observation, &thresholds);
        dispatch_telemetry(client, update);
    });
    Ok(recorder.observe(response))
}

fn blocked_response(status: u16, location: Option<&str>) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::NOT_ACCEPTABLE);
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(BLOCKED_REASON));
    if let Some(location) = location {
        match HeaderValue::from_str(location) {
            Ok(value) => {
                response.headers_mut().insert(header::LOCATION, value);
            }
            Err(_) => tracing::warn!(location, "ignoring redirect location that is not a valid header value"),
        }
    }
    response
}

/// Exposes the verdict to the application as request headers.
fn inject_headers(headers: &mut HeaderMap, verdict: &Verdict) {
    set_header(headers, REQUEST_ID_HEADER, &verdict.request_id);
    set_header(headers, AGENT_RESPONSE_HEADER, &verdict.waf_response.to_string());
    for (name, value) in &verdict.request_headers {
        set_header(headers, name, value);
    }
}

fn set_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::debug!(header = name, "skipping agent header directive that is not a valid HTTP header"),
    }
}

/// Sends the chosen report in the background. The client response has
/// already been delivered by the time this runs.
fn dispatch_telemetry(client: RpcClient, update: Option<TelemetryUpdate>) {
    let Some(update) = update else {
        return;
    };
    let method = update.method();
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            tracing::debug!(method = %method, "dispatching telemetry to agent");
            handle.spawn(async move {
                client.send_telemetry(&update).await;
            });
        }
        Err(_) => {
            tracing::warn!(method = %method, "no async runtime available, dropping telemetry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(headers: &[(&str, &str)]) -> Verdict {
        Verdict {
            request_id: "rid-1".to_string(),
            waf_response: 200,
            request_headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn injects_info_headers_and_directives() {
        let mut headers = HeaderMap::new();
        headers.insert("x-sigsci-tags", HeaderValue::from_static("spoofed"));
        inject_headers(
            &mut headers,
            &verdict(&[("X-SigSci-Tags", "SQLI,XSS"), ("bad header", "x")]),
        );
        assert_eq!(headers[REQUEST_ID_HEADER], "rid-1");
        assert_eq!(headers[AGENT_RESPONSE_HEADER], "200");
        assert_eq!(headers["x-sigsci-tags"], "SQLI,XSS");
        assert_eq!(headers.get_all("x-sigsci-tags").iter().count(), 1);
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn empty_request_id_still_injected() {
        let mut headers = HeaderMap::new();
        let mut v = verdict(&[]);
        v.request_id.clear();
        v.waf_response = 299;
        inject_headers(&mut headers, &v);
        assert_eq!(headers[REQUEST_ID_HEADER], "");
        assert_eq!(headers[AGENT_RESPONSE_HEADER], "299");
    }

    #[test]
    fn blocked_response_shape() {
        let response = blocked_response(406, None);
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        assert!(response.headers().get(header::LOCATION).is_none());
        assert_eq!(
            response
                .extensions()
                .get::<ReasonPhrase>()
                .map(|r| r.as_bytes()),
            Some(BLOCKED_REASON)
        );

        let response = blocked_response(302, Some("https://example.com/denied"));
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://example.com/denied"
        );
    }

    #[test]
    fn settings_follow_config() {
        let mut config = Config::default();
        config.limits.max_post_body = 10;
        config.limits.max_response_millis = 50;
        config.agent.access_key_id = "key".to_string();
        let settings = LifecycleSettings::from_config(&config);
        assert_eq!(settings.snapshot.max_post_body, 10);
        assert_eq!(settings.snapshot.access_key_id, "key");
        assert_eq!(settings.thresholds.max_response_millis, 50);
        assert_eq!(settings.thresholds.max_response_size, 524_288);
    }
}
