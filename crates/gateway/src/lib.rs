//! hostgate Gateway Library
//!
//! Host-based reverse-proxy dispatcher: classifies requests by Host header,
//! resolves the embedded identifier through the resolution API and either
//! proxies to the resolved backend or redirects.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod forwarder;
pub mod resolver;
pub mod routes;
pub mod routing;
pub mod state;

pub use config::Config;
pub use dispatch::{Dispatcher, Outcome};
pub use error::{GatewayError, GatewayResult};
pub use routing::{BackendCache, NotHandled, ZoneRouter};
pub use state::AppState;
