//! Host-based routing for the gateway
//!
//! This module classifies incoming Host headers into zones and caches the
//! backends resolved for proxied hosts:
//! - Short URLs: abc.m3o.one
//! - Apps and functions: hello.m3o.app, greet.m3o.sh
//! - Fixed hosts: user.m3o.com, community.m3o.com

mod cache;
mod zone_router;

pub use cache::{BackendCache, CacheStats, DEFAULT_FRESHNESS};
pub use zone_router::{NotHandled, Plan, ZoneRouter};
