//! Zone model shared across hostgate

use std::fmt;

// =============================================================================
// Zones
// =============================================================================

/// A category of virtual host, distinguished by its reserved root domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Zone {
    /// Short URLs (e.g. abc.m3o.one), resolved to a redirect target
    Url,
    /// Hosted apps (e.g. hello.m3o.app)
    App,
    /// Functions (e.g. greet.m3o.sh)
    Function,
    /// Email verification host (exact match)
    User,
    /// Community site (exact match), served through the app resolver
    Community,
}

impl Zone {
    /// All zones in classification priority order
    pub const PRIORITY: [Zone; 5] = [
        Zone::Url,
        Zone::App,
        Zone::Function,
        Zone::User,
        Zone::Community,
    ];

    /// How requests for this zone are answered
    pub fn dispatch_mode(self) -> DispatchMode {
        match self {
            Zone::App | Zone::Function | Zone::Community => DispatchMode::Proxy,
            Zone::Url | Zone::User => DispatchMode::Redirect,
        }
    }

    /// How the zone root is compared against the request host
    pub fn host_match(self) -> HostMatch {
        match self {
            Zone::Url | Zone::App | Zone::Function => HostMatch::Suffix,
            Zone::User | Zone::Community => HostMatch::Exact,
        }
    }

    /// Which backend cache map holds this zone's resolutions, if any
    pub fn cache_family(self) -> Option<CacheFamily> {
        match self {
            Zone::App | Zone::Community => Some(CacheFamily::App),
            Zone::Function => Some(CacheFamily::Function),
            Zone::Url | Zone::User => None,
        }
    }

    /// Resolution API path, without the `/v1` prefix used by authenticated calls
    pub fn endpoint_path(self) -> &'static str {
        match self {
            Zone::Url => "/url/resolve",
            Zone::App | Zone::Community => "/app/resolve",
            Zone::Function => "/function/proxy",
            Zone::User => "/user/VerifyEmail",
        }
    }

    /// Query parameter carrying the identifier on resolution calls
    pub fn query_key(self) -> &'static str {
        match self {
            Zone::Url => "shortURL",
            _ => "id",
        }
    }

    /// JSON field in the resolution response holding the address
    pub fn response_field(self) -> &'static str {
        match self {
            Zone::Url => "destinationURL",
            _ => "url",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Zone::Url => "url",
            Zone::App => "app",
            Zone::Function => "function",
            Zone::User => "user",
            Zone::Community => "community",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a zone proxies to a backend or answers with a redirect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Proxy,
    Redirect,
}

/// How a zone root is matched against a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMatch {
    /// Host ends with the root (covers the bare root and any subdomain)
    Suffix,
    /// Host equals the root
    Exact,
}

/// Independent backend cache maps; app and community share one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheFamily {
    App,
    Function,
}

impl CacheFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheFamily::App => "app",
            CacheFamily::Function => "function",
        }
    }
}

impl fmt::Display for CacheFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_modes() {
        assert_eq!(Zone::App.dispatch_mode(), DispatchMode::Proxy);
        assert_eq!(Zone::Function.dispatch_mode(), DispatchMode::Proxy);
        assert_eq!(Zone::Community.dispatch_mode(), DispatchMode::Proxy);
        assert_eq!(Zone::Url.dispatch_mode(), DispatchMode::Redirect);
        assert_eq!(Zone::User.dispatch_mode(), DispatchMode::Redirect);
    }

    #[test]
    fn test_community_shares_app_resolution() {
        assert_eq!(Zone::Community.endpoint_path(), Zone::App.endpoint_path());
        assert_eq!(Zone::Community.cache_family(), Some(CacheFamily::App));
        assert_eq!(Zone::Function.cache_family(), Some(CacheFamily::Function));
        assert_eq!(Zone::Url.cache_family(), None);
        assert_eq!(Zone::User.cache_family(), None);
    }

    #[test]
    fn test_url_zone_wire_names() {
        assert_eq!(Zone::Url.query_key(), "shortURL");
        assert_eq!(Zone::Url.response_field(), "destinationURL");
        assert_eq!(Zone::App.query_key(), "id");
        assert_eq!(Zone::Function.response_field(), "url");
    }
}
