//! Per-request dispatch
//!
//! Ties the zone router, backend cache, resolver and forwarder together.
//! Every request ends in exactly one [`Outcome`] or a [`GatewayError`].
//!
//! # Resolution flow
//!
//! ```text
//! Host ──► ZoneRouter::plan
//!            ├─ Proxy ──► cache hit? ──yes──► Forwarder
//!            │               └─no──► single-flight resolve ──► cache store ──► Forwarder
//!            ├─ ShortUrl ──► resolve destination ──► redirect
//!            ├─ Verify ──► verify token ──► redirect
//!            └─ Skip ──► NotHandled
//! ```
//!
//! Concurrent misses for the same host share one resolution call. The
//! in-flight table only holds weak handles, so a resolution whose callers
//! have all gone away is dropped instead of running to completion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    body::to_bytes,
    extract::Request,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use hostgate_shared::{normalize_host, CacheFamily, Zone};
use tracing::{debug, info};
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::forwarder::Forwarder;
use crate::resolver::{ResolveError, ResolveResult, ResolverClient};
use crate::routing::{BackendCache, NotHandled, Plan, ZoneRouter};

/// Largest urlencoded form body read for the user zone (1MB)
const MAX_FORM_BYTES: usize = 1024 * 1024;

type Resolution = BoxFuture<'static, ResolveResult<Url>>;
type InFlight = Mutex<HashMap<(CacheFamily, String), WeakShared<Resolution>>>;

/// Terminal result of dispatching one request
pub enum Outcome {
    /// Backend response, passed through unchanged
    Proxied(Response),
    /// Redirect the caller to `location`
    Redirect {
        location: HeaderValue,
        status: StatusCode,
    },
    /// Deliberately unanswered
    NotHandled(NotHandled),
}

impl Outcome {
    /// Map the outcome to an HTTP response
    ///
    /// Unanswered requests get `not_handled_status` and an empty body.
    pub fn into_response_with(self, not_handled_status: StatusCode) -> Response {
        match self {
            Outcome::Proxied(response) => response,
            Outcome::Redirect { location, status } => {
                (status, [(header::LOCATION, location)]).into_response()
            }
            Outcome::NotHandled(_) => not_handled_status.into_response(),
        }
    }
}

/// Dispatches requests by zone
pub struct Dispatcher {
    router: ZoneRouter,
    resolver: ResolverClient,
    forwarder: Forwarder,
    cache: Arc<BackendCache>,
    in_flight: Arc<InFlight>,
    url_redirect_status: StatusCode,
}

impl Dispatcher {
    pub fn new(
        router: ZoneRouter,
        resolver: ResolverClient,
        forwarder: Forwarder,
        cache: Arc<BackendCache>,
        url_redirect_status: StatusCode,
    ) -> Self {
        Self {
            router,
            resolver,
            forwarder,
            cache,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            url_redirect_status,
        }
    }

    /// Get the backend cache for statistics
    pub fn cache(&self) -> &BackendCache {
        &self.cache
    }

    /// Dispatch a single inbound request
    pub async fn dispatch(&self, request: Request) -> GatewayResult<Outcome> {
        let Some(host) = request_host(&request) else {
            debug!("Request without host");
            return Ok(Outcome::NotHandled(NotHandled::UnknownHost));
        };

        match self.router.plan(&host, request.uri()) {
            Plan::Proxy {
                zone,
                family,
                host,
                identifier,
            } => {
                let backend = self.backend_for(zone, family, &host, &identifier).await?;
                let response = self.forwarder.forward(request, &backend).await?;
                Ok(Outcome::Proxied(response))
            }
            Plan::ShortUrl { short_url } => self.redirect_short_url(&short_url).await,
            Plan::Verify => self.verify(request).await,
            Plan::Skip(reason) => {
                debug!(host = %host, reason = reason.as_str(), "Request not handled");
                Ok(Outcome::NotHandled(reason))
            }
        }
    }

    /// Find the backend for a proxied host, resolving it on a cache miss
    async fn backend_for(
        &self,
        zone: Zone,
        family: CacheFamily,
        host: &str,
        identifier: &str,
    ) -> ResolveResult<Url> {
        if let Some(backend) = self.cache.lookup(family, host) {
            debug!(%family, host, backend = %backend, "Backend cache hit");
            return Ok(backend);
        }

        let flight = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

            // A flight may have finished between the lookup and the lock
            if let Some(backend) = self.cache.lookup(family, host) {
                return Ok(backend);
            }

            let key = (family, host.to_string());
            match in_flight.get(&key).and_then(WeakShared::upgrade) {
                Some(flight) => {
                    debug!(%family, host, "Joining in-flight resolution");
                    flight
                }
                None => {
                    info!(%zone, host, identifier, "Resolving host");
                    let flight = self.start_resolution(zone, key.clone(), identifier.to_string());
                    if let Some(weak) = flight.downgrade() {
                        in_flight.insert(key, weak);
                    }
                    flight
                }
            }
        };

        flight.await
    }

    /// Build the shared resolution future for one (family, host) key
    ///
    /// Whichever caller drives it to completion stores the result and clears
    /// the in-flight entry. Failures are never cached.
    fn start_resolution(
        &self,
        zone: Zone,
        key: (CacheFamily, String),
        identifier: String,
    ) -> Shared<Resolution> {
        let resolver = self.resolver.clone();
        let cache = Arc::clone(&self.cache);
        let in_flight = Arc::clone(&self.in_flight);

        async move {
            let _guard = FlightGuard {
                in_flight: Arc::clone(&in_flight),
                key: key.clone(),
            };
            let (family, host) = &key;
            let result = resolver.resolve(zone, &identifier).await;

            match &result {
                Ok(backend) => {
                    cache.store(*family, host, backend.clone());
                    debug!(
                        %family,
                        host = %host,
                        entries = cache.stats(*family).total_entries,
                        "Cached backend"
                    );
                }
                Err(e) => {
                    tracing::warn!(%zone, host = %host, error = %e, "Failed to resolve host");
                }
            }

            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);

            result
        }
        .boxed()
        .shared()
    }

    /// Resolve a short URL and redirect to its destination
    async fn redirect_short_url(&self, short_url: &str) -> GatewayResult<Outcome> {
        match self.resolver.resolve_destination(short_url).await {
            Ok(destination) => {
                let location = HeaderValue::from_str(&destination)
                    .map_err(|_| ResolveError::InvalidAddress(destination.clone()))?;
                Ok(Outcome::Redirect {
                    location,
                    status: self.url_redirect_status,
                })
            }
            Err(ResolveError::MissingField(_)) => {
                debug!(short_url, "No destination for short URL");
                Ok(Outcome::NotHandled(NotHandled::NoDestination))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Verify an email token and redirect to the success or failure URL
    async fn verify(&self, request: Request) -> GatewayResult<Outcome> {
        // can't operate without the api key
        if !self.resolver.is_authenticated() {
            debug!("Verification requested without an API key");
            return Ok(Outcome::NotHandled(NotHandled::NoCredential));
        }

        let params = form_params(request).await?;

        let Some(token) = non_empty(&params, "token") else {
            debug!("Missing token");
            return Ok(Outcome::NotHandled(NotHandled::MissingParameter));
        };
        let Some(redirect_url) = non_empty(&params, "redirectUrl") else {
            debug!("Missing redirect url");
            return Ok(Outcome::NotHandled(NotHandled::MissingParameter));
        };

        if self.resolver.verify(token).await? {
            return found(redirect_url);
        }

        match non_empty(&params, "failureRedirectUrl") {
            Some(failure_url) => found(failure_url),
            None => Ok(Outcome::NotHandled(NotHandled::NoFailureRedirect)),
        }
    }
}

/// Clears a cancelled resolution's in-flight entry
///
/// Only a dead entry is removed: a newer flight for the same key may already
/// have taken its place.
struct FlightGuard {
    in_flight: Arc<InFlight>,
    key: (CacheFamily, String),
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let dead = in_flight
            .get(&self.key)
            .is_some_and(|weak| weak.upgrade().is_none());
        if dead {
            in_flight.remove(&self.key);
        }
    }
}

/// 302 redirect to a caller-supplied URL
fn found(location: &str) -> GatewayResult<Outcome> {
    let location = HeaderValue::from_str(location)
        .map_err(|_| GatewayError::BadRequest(format!("invalid redirect target: {:?}", location)))?;
    Ok(Outcome::Redirect {
        location,
        status: StatusCode::FOUND,
    })
}

/// Normalized request host: the Host header, else the URI authority
fn request_host(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host())
        .map(normalize_host)
        .filter(|h| !h.is_empty())
}

/// Collect form parameters from an urlencoded body and the query string
///
/// Body values take precedence over query values; the first value of a
/// repeated key wins.
async fn form_params(request: Request) -> GatewayResult<HashMap<String, String>> {
    let (parts, body) = request.into_parts();
    let mut params = HashMap::new();

    if has_form_body(&parts.method, &parts.headers) {
        let bytes = to_bytes(body, MAX_FORM_BYTES)
            .await
            .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
        collect_pairs(&mut params, &bytes);
    }

    if let Some(query) = parts.uri.query() {
        collect_pairs(&mut params, query.as_bytes());
    }

    Ok(params)
}

fn has_form_body(method: &Method, headers: &HeaderMap) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
        && headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false)
}

fn collect_pairs(params: &mut HashMap<String, String>, input: &[u8]) {
    for (key, value) in url::form_urlencoded::parse(input) {
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
}

fn non_empty<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;

    use crate::config::ZoneHosts;

    fn request(host: Option<&str>, uri: &str) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(host) = host {
            builder = builder.header(header::HOST, host);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_request_host_prefers_header() {
        let req = request(Some("Hello.M3O.app:8080"), "http://other.example/x");
        assert_eq!(request_host(&req).as_deref(), Some("hello.m3o.app"));
    }

    #[test]
    fn test_request_host_falls_back_to_uri() {
        let req = request(None, "http://hello.m3o.app/x");
        assert_eq!(request_host(&req).as_deref(), Some("hello.m3o.app"));

        let req = request(None, "/x");
        assert_eq!(request_host(&req), None);
    }

    #[tokio::test]
    async fn test_form_params_query_only() {
        let req = request(
            Some("user.m3o.com"),
            "/?token=abc&redirectUrl=https%3A%2F%2Fm3o.com%2Fok&token=ignored",
        );
        let params = form_params(req).await.unwrap();
        assert_eq!(params.get("token").unwrap(), "abc");
        assert_eq!(params.get("redirectUrl").unwrap(), "https://m3o.com/ok");
    }

    #[tokio::test]
    async fn test_form_params_body_wins() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/?token=from-query&redirectUrl=https://m3o.com/ok")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("token=from-body"))
            .unwrap();

        let params = form_params(req).await.unwrap();
        assert_eq!(params.get("token").unwrap(), "from-body");
        assert_eq!(params.get("redirectUrl").unwrap(), "https://m3o.com/ok");
    }

    #[tokio::test]
    async fn test_form_params_ignores_non_form_body() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"token":"x"}"#))
            .unwrap();

        let params = form_params(req).await.unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn test_not_handled_maps_to_configured_status() {
        let response = Outcome::NotHandled(NotHandled::UnknownHost)
            .into_response_with(StatusCode::NOT_FOUND);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = Outcome::Redirect {
            location: HeaderValue::from_static("https://example.com/x"),
            status: StatusCode::MOVED_PERMANENTLY,
        }
        .into_response_with(StatusCode::NOT_FOUND);
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://example.com/x"
        );
    }

    #[test]
    fn test_found_rejects_header_unsafe_target() {
        assert!(matches!(
            found("https://m3o.com/welcome\nSet-Cookie: x=y"),
            Err(GatewayError::BadRequest(_))
        ));
        assert!(found("https://m3o.com/welcome").is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_resolution_clears_in_flight_entry() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let dispatcher = Dispatcher::new(
            ZoneRouter::new(ZoneHosts::default()),
            ResolverClient::new(format!("http://{}", addr), None, Duration::from_secs(30)).unwrap(),
            Forwarder::new(Duration::from_secs(1), Duration::from_secs(1)).unwrap(),
            Arc::new(BackendCache::new()),
            StatusCode::FOUND,
        );

        let abandoned = tokio::time::timeout(
            Duration::from_millis(200),
            dispatcher.backend_for(Zone::App, CacheFamily::App, "slow.m3o.app", "slow"),
        )
        .await;
        assert!(abandoned.is_err());

        assert!(dispatcher.in_flight.lock().unwrap().is_empty());
    }
}
