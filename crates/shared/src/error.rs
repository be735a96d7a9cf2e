//! Error types for host handling

use thiserror::Error;

/// Reasons a host cannot yield a resolvable identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Host is exactly the zone root, there is nothing to resolve
    #[error("Host is the bare zone root: {0}")]
    BareRoot(String),

    /// Stripped label is empty or has more than one dot-separated segment
    #[error("Malformed identifier: {0}")]
    Malformed(String),
}
