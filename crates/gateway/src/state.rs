//! Shared application state

use std::sync::Arc;

use axum::http::StatusCode;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::forwarder::Forwarder;
use crate::resolver::ResolverClient;
use crate::routing::{BackendCache, ZoneRouter};

/// State handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub not_handled_status: StatusCode,
}

impl AppState {
    /// Build the dispatcher and its collaborators from configuration
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let resolver = ResolverClient::new(
            config.resolver_api_url.clone(),
            config.resolver_api_key.clone(),
            config.resolve_timeout,
        )?;
        let forwarder = Forwarder::new(config.forward_connect_timeout, config.forward_timeout)?;
        let cache = Arc::new(BackendCache::with_freshness(config.cache_freshness));

        let dispatcher = Dispatcher::new(
            ZoneRouter::new(config.zones.clone()),
            resolver,
            forwarder,
            cache,
            config.url_redirect_status,
        );

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            not_handled_status: config.not_handled_status,
        })
    }
}
