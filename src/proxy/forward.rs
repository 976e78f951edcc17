// src/proxy/forward.rs
//
// The reverse proxy handler: pick a backend, forward the request, stream
// the response back, classify the outcome, and report it to the pool.
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Body, HeaderMap, Method, Request, Response, StatusCode};
use tokio::time::Instant;

use super::pool::{BackendPool, Outcome};

/// Headers that must not be forwarded across a proxy hop, per RFC 7230
/// §6.1, verbatim from the spec's stripping list.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Dropped on the outbound (client→backend) leg only: the body is
/// re-streamed as chunked via `reqwest::Body::wrap_stream`, so a
/// carried-over `content-length` would conflict with the new framing
/// (RFC 7230 §3.3.3).
const OUTBOUND_ONLY_STRIP: &[&str] = &["content-length"];

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no healthy backends available")]
    NoHealthyBackends,

    #[error("backend transport error: {0}")]
    Transport(String),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoHealthyBackends => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn body(&self) -> Body {
        match self {
            ProxyError::NoHealthyBackends => {
                Body::from(r#"{"error":"no healthy backends"}"#)
            }
            ProxyError::Transport(_) => Body::from(r#"{"error":"bad gateway"}"#),
        }
    }
}

impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        Response::builder()
            .status(err.status())
            .header("content-type", "application/json")
            .body(err.body())
            .unwrap()
    }
}

/// Forwards client requests to a backend selected from the pool.
pub struct ReverseProxy {
    pool: Arc<BackendPool>,
    client: reqwest::Client,
    timeout: Duration,
}

impl ReverseProxy {
    pub fn new(pool: Arc<BackendPool>, timeout: Duration) -> Self {
        Self {
            pool,
            // 3xx must be relayed verbatim, not chased (spec.md §6, §7).
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("failed to build reqwest client"),
            timeout,
        }
    }

    /// Handle one client request. Always returns a response — transport
    /// failures and backend unavailability are surfaced as 502/503, not
    /// propagated as errors, since the client must get *something* back.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let backend = match self.pool.pick() {
            Some(b) => b,
            None => return ProxyError::NoHealthyBackends.into(),
        };

        let deadline = Instant::now() + self.timeout;
        let (parts, body) = req.into_parts();

        let outbound_url = match build_outbound_url(&backend.url, &parts.uri) {
            Ok(u) => u,
            Err(_) => {
                self.pool.release(&backend, Outcome::ProxyError);
                return ProxyError::Transport("invalid request path".into()).into();
            }
        };

        let method = parts.method.clone();
        let headers = rewrite_headers(&parts.headers, &backend.authority());

        let outbound = self
            .client
            .request(reqwest_method(&method), outbound_url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body));

        let send_fut = outbound.send();
        let remaining = deadline.saturating_duration_since(Instant::now());

        let response = match tokio::time::timeout(remaining, send_fut).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                self.pool.release(&backend, Outcome::ProxyError);
                return ProxyError::Transport(e.to_string()).into();
            }
            Err(_elapsed) => {
                self.pool.release(&backend, Outcome::ProxyError);
                return ProxyError::Transport("timed out waiting for response headers".into())
                    .into();
            }
        };

        // Headers received before the deadline: the backend is alive.
        // Whatever status it returned is relayed verbatim — liveness is a
        // transport concept, not a status-code one (spec.md §7 item 4).
        let status = response.status();
        let response_headers = strip_hop_by_hop(response.headers());

        let mut builder = Response::builder().status(status);
        if let Some(map) = builder.headers_mut() {
            *map = response_headers;
        }

        let (body, body_task) = streaming_body(response, self.pool.clone(), backend, deadline);
        tokio::spawn(body_task);

        builder.body(body).unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .body(Body::empty())
                .unwrap()
        })
    }
}

/// Build the hyper `Body` the client will read, plus a background task
/// that copies chunks from the backend's stream into it, honoring the
/// total-request deadline and classifying the eventual outcome.
fn streaming_body(
    response: reqwest::Response,
    pool: Arc<BackendPool>,
    backend: Arc<super::Backend>,
    deadline: Instant,
) -> (Body, impl std::future::Future<Output = ()>) {
    let (sender, body) = Body::channel();
    let task = async move {
        let mut sender = sender;
        let mut stream = response.bytes_stream();
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => {
                    pool.release(&backend, Outcome::ProxyError);
                    return;
                }
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            if sender.send_data(bytes).await.is_err() {
                                // Client disconnected; the backend did nothing wrong.
                                pool.release(&backend, Outcome::Success);
                                return;
                            }
                        }
                        Some(Err(_)) => {
                            pool.release(&backend, Outcome::ProxyError);
                            return;
                        }
                        None => {
                            pool.release(&backend, Outcome::Success);
                            return;
                        }
                    }
                }
            }
        }
    };
    (body, task)
}

fn build_outbound_url(
    backend_origin: &url::Url,
    uri: &hyper::Uri,
) -> Result<url::Url, url::ParseError> {
    let mut url = backend_origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    Ok(url)
}

fn rewrite_headers(headers: &HeaderMap, authority: &str) -> HeaderMap {
    let mut out = strip_hop_by_hop(headers);
    for name in OUTBOUND_ONLY_STRIP {
        out.remove(*name);
    }
    if let Ok(value) = HeaderValue::from_str(authority) {
        out.insert(HeaderName::from_static("host"), value);
    }
    out
}

fn reqwest_method(method: &Method) -> reqwest::Method {
    reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET)
}
