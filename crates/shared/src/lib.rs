//! hostgate Shared Types and Utilities
//!
//! This crate contains the zone model and host helpers shared by the gateway.

pub mod error;
pub mod host;
pub mod types;

pub use error::*;
pub use host::{normalize_host, subdomain_label};
pub use types::*;
