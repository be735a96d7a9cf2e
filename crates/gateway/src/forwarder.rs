//! Upstream request forwarding
//!
//! Streams an inbound request to a resolved backend and the backend's
//! response back to the caller. Status, headers and body pass through
//! unchanged apart from the Host header and hop-by-hop headers.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    response::Response,
};
use futures::StreamExt;
use reqwest::{redirect, Client};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

/// Request body chunks buffered between the caller and the backend
const BODY_CHANNEL_CAPACITY: usize = 16;

/// Headers that apply to a single connection and are never forwarded
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Error type for forwarding
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Upstream request failed: {0}")]
    Transport(String),

    #[error("Timed out waiting for upstream response")]
    Timeout,

    #[error("Invalid upstream address: {0}")]
    InvalidBackend(String),
}

impl From<reqwest::Error> for ForwardError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ForwardError::Timeout
        } else {
            ForwardError::Transport(err.to_string())
        }
    }
}

/// Reverse proxy for resolved backends
#[derive(Clone)]
pub struct Forwarder {
    client: Client,
    /// Deadline for the backend's response headers
    response_timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder
    ///
    /// `response_timeout` bounds the wait for response headers only; bodies
    /// stream for as long as the backend keeps sending.
    pub fn new(connect_timeout: Duration, response_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(10)
            // Backend redirects belong to the caller
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            response_timeout,
        })
    }

    /// Forward `request` to `backend` and return the backend's response
    pub async fn forward(&self, request: Request, backend: &Url) -> Result<Response, ForwardError> {
        let (parts, body) = request.into_parts();

        let target = target_url(backend, &parts.uri)?;
        let authority = backend_authority(backend)?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        if let Some(original_host) = headers.get(header::HOST).cloned() {
            headers.insert("x-forwarded-host", original_host);
        }
        headers.insert(header::HOST, authority);
        if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            append_forwarded_for(&mut headers, peer.ip());
        }

        tracing::debug!(
            method = %parts.method,
            target = %target,
            "Forwarding request to backend"
        );

        let upstream = self
            .client
            .request(parts.method, target.clone())
            .headers(headers)
            .body(stream_body(body))
            .send();

        let response = tokio::time::timeout(self.response_timeout, upstream)
            .await
            .map_err(|_| ForwardError::Timeout)??;

        tracing::debug!(
            target = %target,
            status = response.status().as_u16(),
            "Backend responded"
        );

        let mut builder = Response::builder().status(response.status());
        if let Some(out) = builder.headers_mut() {
            out.extend(response.headers().clone());
            strip_hop_by_hop(out);
        }

        builder
            .body(Body::from_stream(response.bytes_stream()))
            .map_err(|e| ForwardError::Transport(e.to_string()))
    }
}

/// Pump the inbound body into a channel so it can be sent as a streaming
/// upstream body
fn stream_body(body: Body) -> reqwest::Body {
    let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                // Backend stopped reading or the caller's body broke
                break;
            }
        }
    });

    reqwest::Body::wrap_stream(ReceiverStream::new(rx))
}

/// Join the backend URL with the request path and query
///
/// Paths are joined with exactly one slash; query strings are concatenated.
pub fn target_url(backend: &Url, uri: &axum::http::Uri) -> Result<Url, ForwardError> {
    if backend.cannot_be_a_base() || backend.host_str().is_none() {
        return Err(ForwardError::InvalidBackend(backend.to_string()));
    }

    let mut target = backend.clone();
    target.set_path(&join_paths(backend.path(), uri.path()));

    let query = match (backend.query().filter(|q| !q.is_empty()), uri.query()) {
        (Some(b), Some(r)) if !r.is_empty() => Some(format!("{}&{}", b, r)),
        (Some(b), _) => Some(b.to_string()),
        (None, Some(r)) if !r.is_empty() => Some(r.to_string()),
        _ => None,
    };
    target.set_query(query.as_deref());
    target.set_fragment(None);

    Ok(target)
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// Host header value for the backend: host plus any explicit port
fn backend_authority(backend: &Url) -> Result<HeaderValue, ForwardError> {
    let host = backend
        .host_str()
        .ok_or_else(|| ForwardError::InvalidBackend(backend.to_string()))?;
    let authority = match backend.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    HeaderValue::from_str(&authority).map_err(|_| ForwardError::InvalidBackend(authority))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in Connection are connection-scoped too
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in &named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: std::net::IpAddr) {
    let value = match headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(prior) => format!("{}, {}", prior, ip),
        None => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}
