//! Host header helpers

use crate::error::IdentifierError;

/// Normalize a host header value
pub fn normalize_host(host: &str) -> String {
    // Remove port if present
    let host = host.split(':').next().unwrap_or(host);
    // Lowercase
    host.trim().trim_end_matches('.').to_lowercase()
}

/// Extract the single-label identifier in front of `root`
///
/// `hello.m3o.app` with root `m3o.app` yields `hello`. Nested labels such as
/// `a.b.m3o.app` are rejected rather than treated as a deeper subdomain.
pub fn subdomain_label<'a>(host: &'a str, root: &str) -> Result<&'a str, IdentifierError> {
    if host == root {
        return Err(IdentifierError::BareRoot(host.to_string()));
    }

    let label = host
        .strip_suffix(root)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or(host);

    // only process one part for now
    if label.is_empty() || label.contains('.') {
        return Err(IdentifierError::Malformed(label.to_string()));
    }

    Ok(label)
}
