//! Resolution API client
//!
//! Translates zone identifiers into backend addresses (or redirect
//! destinations) by calling the external resolution API, and verifies email
//! tokens for the user zone. Calls are never retried.

use std::time::Duration;

use hostgate_shared::Zone;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

/// Error type for resolution calls
///
/// Callers treat every variant the same way; the distinction only feeds logs.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("Resolution API unreachable: {0}")]
    Transport(String),

    #[error("Timed out waiting for resolution API")]
    Timeout,

    #[error("Resolution API returned status {0}: {1}")]
    Status(u16, String),

    #[error("Malformed resolution response: {0}")]
    MalformedBody(String),

    #[error("Resolution response missing field: {0}")]
    MissingField(&'static str),

    #[error("Resolved address is not a valid URL: {0}")]
    InvalidAddress(String),
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ResolveError::Timeout
        } else if err.is_decode() {
            ResolveError::MalformedBody(err.to_string())
        } else {
            ResolveError::Transport(err.to_string())
        }
    }
}

/// Result type for resolution calls
pub type ResolveResult<T> = Result<T, ResolveError>;

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

/// Client for the resolution API
#[derive(Clone)]
pub struct ResolverClient {
    client: Client,
    api_url: String,
    api_key: Option<String>,
}

impl ResolverClient {
    /// Create a new resolver client
    ///
    /// Every call is bounded by `timeout`.
    pub fn new(
        api_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Whether calls carry a bearer credential
    pub fn is_authenticated(&self) -> bool {
        self.api_key.is_some()
    }

    /// Full endpoint URL for a zone; authenticated deployments use the /v1 API
    fn endpoint(&self, zone: Zone) -> String {
        match zone {
            Zone::User => format!("{}/v1{}", self.api_url, zone.endpoint_path()),
            _ if self.is_authenticated() => {
                format!("{}/v1{}", self.api_url, zone.endpoint_path())
            }
            _ => format!("{}{}", self.api_url, zone.endpoint_path()),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Resolve a proxy-zone identifier to its backend address
    pub async fn resolve(&self, zone: Zone, identifier: &str) -> ResolveResult<Url> {
        let address = self.lookup(zone, identifier).await?;

        let url = Url::parse(&address).map_err(|e| {
            warn!(%zone, identifier, address = %address, error = %e, "Failed to parse resolved address");
            ResolveError::InvalidAddress(address.clone())
        })?;

        info!(%zone, identifier, address = %url, "Resolved");
        Ok(url)
    }

    /// Resolve a short URL to its destination
    ///
    /// The destination is returned exactly as the API sent it; relative and
    /// scheme-less values are valid redirect targets.
    pub async fn resolve_destination(&self, short_url: &str) -> ResolveResult<String> {
        let destination = self.lookup(Zone::Url, short_url).await?;
        info!(short_url, destination = %destination, "Resolved short URL");
        Ok(destination)
    }

    /// Call the zone's endpoint and return its non-empty response field
    async fn lookup(&self, zone: Zone, identifier: &str) -> ResolveResult<String> {
        let endpoint = self.endpoint(zone);

        debug!(%zone, identifier, endpoint = %endpoint, "Calling resolution API");

        let response = self
            .authorize(self.client.get(&endpoint))
            .query(&[(zone.query_key(), identifier)])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(%zone, identifier, status = status.as_u16(), body = %body, "Resolution API error");
            return Err(ResolveError::Status(status.as_u16(), body));
        }

        let body: Value = response.json().await?;
        extract_field(&body, zone.response_field()).map(str::to_string)
    }

    /// Verify an email token
    ///
    /// Returns Ok(true) only for a 200 response; any other status is a
    /// negative verification, not an error.
    pub async fn verify(&self, token: &str) -> ResolveResult<bool> {
        let endpoint = self.endpoint(Zone::User);

        let response = self
            .authorize(self.client.post(&endpoint))
            .json(&VerifyRequest { token })
            .send()
            .await?;

        let status = response.status();
        // Drain the body so the connection can be reused
        let _ = response.bytes().await;

        debug!(status = status.as_u16(), "Verification response");
        Ok(status == StatusCode::OK)
    }
}

/// Pull a non-empty string field out of a resolution response
fn extract_field<'a>(body: &'a Value, field: &'static str) -> ResolveResult<&'a str> {
    if !body.is_object() {
        return Err(ResolveError::MalformedBody("expected a JSON object".to_string()));
    }

    match body.get(field).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ResolveError::MissingField(field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client(server: &mockito::Server, key: Option<&str>) -> ResolverClient {
        ResolverClient::new(
            server.url(),
            key.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_extract_field() {
        let body = json!({"url": "http://backend.internal"});
        assert_eq!(extract_field(&body, "url").unwrap(), "http://backend.internal");

        assert!(matches!(
            extract_field(&json!({"url": ""}), "url"),
            Err(ResolveError::MissingField("url"))
        ));
        assert!(matches!(
            extract_field(&json!({"url": 42}), "url"),
            Err(ResolveError::MissingField("url"))
        ));
        assert!(matches!(
            extract_field(&json!(["url"]), "url"),
            Err(ResolveError::MalformedBody(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_anonymous() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/app/resolve")
            .match_query(Matcher::UrlEncoded("id".into(), "hello".into()))
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_body(r#"{"url": "https://backend.internal"}"#)
            .create_async()
            .await;

        let url = client(&server, None).resolve(Zone::App, "hello").await.unwrap();

        assert_eq!(url.host_str(), Some("backend.internal"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_authenticated_uses_v1() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/function/proxy")
            .match_query(Matcher::UrlEncoded("id".into(), "greet".into()))
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(r#"{"url": "http://10.1.2.3:8080"}"#)
            .create_async()
            .await;

        let url = client(&server, Some("secret"))
            .resolve(Zone::Function, "greet")
            .await
            .unwrap();

        assert_eq!(url.as_str(), "http://10.1.2.3:8080/");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_destination_is_verbatim() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/url/resolve")
            .match_query(Matcher::UrlEncoded(
                "shortURL".into(),
                "https://m3o.one/abc".into(),
            ))
            .with_status(200)
            .with_body(r#"{"destinationURL": "https://Example.com"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/url/resolve")
            .match_query(Matcher::UrlEncoded(
                "shortURL".into(),
                "https://m3o.one/rel".into(),
            ))
            .with_status(200)
            .with_body(r#"{"destinationURL": "/landing"}"#)
            .create_async()
            .await;

        let client = client(&server, None);
        assert_eq!(
            client.resolve_destination("https://m3o.one/abc").await.unwrap(),
            "https://Example.com"
        );
        assert_eq!(
            client.resolve_destination("https://m3o.one/rel").await.unwrap(),
            "/landing"
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_destination_missing_field() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/url/resolve")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"url": "https://example.com"}"#)
            .create_async()
            .await;

        let err = client(&server, None)
            .resolve_destination("https://m3o.one/abc")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingField("destinationURL")));
    }

    #[tokio::test]
    async fn test_resolve_non_200() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/app/resolve")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body("not found")
            .create_async()
            .await;

        let err = client(&server, None).resolve(Zone::App, "nope").await.unwrap_err();
        assert!(matches!(err, ResolveError::Status(404, _)));
    }

    #[tokio::test]
    async fn test_resolve_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/app/resolve")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let err = client(&server, None).resolve(Zone::App, "hello").await.unwrap_err();
        assert!(matches!(err, ResolveError::MalformedBody(_)));
    }

    #[tokio::test]
    async fn test_resolve_missing_field() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/app/resolve")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"id": "hello"}"#)
            .create_async()
            .await;

        let err = client(&server, None).resolve(Zone::App, "hello").await.unwrap_err();
        assert!(matches!(err, ResolveError::MissingField("url")));
    }

    #[tokio::test]
    async fn test_resolve_invalid_address() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/app/resolve")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"url": "not a url"}"#)
            .create_async()
            .await;

        let err = client(&server, None).resolve(Zone::App, "hello").await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_resolve_unreachable() {
        // Nothing listens on port 1
        let client =
            ResolverClient::new("http://127.0.0.1:1", None, Duration::from_secs(2)).unwrap();

        let err = client.resolve(Zone::App, "hello").await.unwrap_err();
        assert!(matches!(err, ResolveError::Transport(_)));
    }

    #[tokio::test]
    async fn test_verify() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("POST", "/v1/user/VerifyEmail")
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::Json(json!({"token": "good"})))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        server
            .mock("POST", "/v1/user/VerifyEmail")
            .match_body(Matcher::Json(json!({"token": "bad"})))
            .with_status(400)
            .create_async()
            .await;

        let client = client(&server, Some("secret"));
        assert!(client.verify("good").await.unwrap());
        assert!(!client.verify("bad").await.unwrap());
        ok.assert_async().await;
    }
}
