//! Host-to-Zone Classification
//!
//! Maps an incoming Host header onto one of the reserved zones and decides
//! what the gateway should do with the request:
//! - App / function / community hosts: resolve a backend and proxy
//! - Short URL hosts: resolve a destination and redirect
//! - User host: verify a token and redirect
//!
//! Classification is pure; nothing here touches the network.

use axum::http::Uri;
use hostgate_shared::{subdomain_label, CacheFamily, HostMatch, IdentifierError, Zone};

use crate::config::ZoneHosts;

/// Why a request was deliberately left unanswered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotHandled {
    /// Host does not belong to any zone
    UnknownHost,
    /// Host is a zone root with no subdomain
    BareRoot,
    /// Subdomain has zero or several labels
    MalformedIdentifier,
    /// A required request parameter was absent
    MissingParameter,
    /// Resolver answered without a redirect destination
    NoDestination,
    /// Verification failed and no failure redirect was supplied
    NoFailureRedirect,
    /// The zone requires an API credential that is not configured
    NoCredential,
}

impl NotHandled {
    pub fn as_str(self) -> &'static str {
        match self {
            NotHandled::UnknownHost => "unknown_host",
            NotHandled::BareRoot => "bare_root",
            NotHandled::MalformedIdentifier => "malformed_identifier",
            NotHandled::MissingParameter => "missing_parameter",
            NotHandled::NoDestination => "no_destination",
            NotHandled::NoFailureRedirect => "no_failure_redirect",
            NotHandled::NoCredential => "no_credential",
        }
    }
}

impl From<IdentifierError> for NotHandled {
    fn from(err: IdentifierError) -> Self {
        match err {
            IdentifierError::BareRoot(_) => NotHandled::BareRoot,
            IdentifierError::Malformed(_) => NotHandled::MalformedIdentifier,
        }
    }
}

/// Action chosen for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Resolve `identifier` and proxy to the backend, caching under `host`
    Proxy {
        zone: Zone,
        family: CacheFamily,
        host: String,
        identifier: String,
    },
    /// Resolve the short URL and redirect to its destination
    ShortUrl { short_url: String },
    /// Verify the request's token and redirect
    Verify,
    /// Leave the request unanswered
    Skip(NotHandled),
}

/// Classifies hosts against the configured zone roots
#[derive(Debug, Clone)]
pub struct ZoneRouter {
    hosts: ZoneHosts,
}

impl ZoneRouter {
    pub fn new(hosts: ZoneHosts) -> Self {
        Self { hosts }
    }

    fn root(&self, zone: Zone) -> &str {
        match zone {
            Zone::Url => &self.hosts.url,
            Zone::App => &self.hosts.app,
            Zone::Function => &self.hosts.function,
            Zone::User => &self.hosts.user,
            Zone::Community => &self.hosts.community,
        }
    }

    /// Classify a normalized host
    ///
    /// Returns the first zone in priority order whose root matches, or None
    /// when the host is not handled by the gateway.
    pub fn classify(&self, host: &str) -> Option<Zone> {
        Zone::PRIORITY.into_iter().find(|&zone| {
            let root = self.root(zone);
            match zone.host_match() {
                HostMatch::Suffix => host.ends_with(root),
                HostMatch::Exact => host == root,
            }
        })
    }

    /// Extract the identifier to resolve for a proxy zone host
    pub fn identifier<'a>(&self, zone: Zone, host: &'a str) -> Result<&'a str, IdentifierError> {
        // The community host is named under the company root, not the app root
        let root = match zone {
            Zone::Community => &self.hosts.com,
            _ => self.root(zone),
        };
        subdomain_label(host, root)
    }

    /// Decide what to do with a request for `host`
    pub fn plan(&self, host: &str, uri: &Uri) -> Plan {
        let Some(zone) = self.classify(host) else {
            return Plan::Skip(NotHandled::UnknownHost);
        };

        match zone {
            Zone::Url => Plan::ShortUrl {
                short_url: short_url(host, uri),
            },
            Zone::User => Plan::Verify,
            Zone::App | Zone::Function | Zone::Community => {
                let Some(family) = zone.cache_family() else {
                    return Plan::Skip(NotHandled::UnknownHost);
                };
                match self.identifier(zone, host) {
                    Ok(identifier) => Plan::Proxy {
                        zone,
                        family,
                        host: host.to_string(),
                        identifier: identifier.to_string(),
                    },
                    Err(err) => {
                        tracing::debug!(%zone, host, error = %err, "No identifier in host");
                        Plan::Skip(err.into())
                    }
                }
            }
        }
    }
}

/// Rebuild the short URL the caller followed: scheme, host and path only
fn short_url(host: &str, uri: &Uri) -> String {
    let scheme = uri.scheme_str().unwrap_or("https");
    let host = uri.host().unwrap_or(host);
    format!("{}://{}{}", scheme, host, uri.path())
}
