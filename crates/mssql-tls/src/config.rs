//! TLS configuration.

/// Domains whose endpoints always verify the server certificate.
const MANAGED_SUFFIXES: &[&str] = &[
    ".database.windows.net",
    ".database.fabric.microsoft.com",
    ".pbidedicated.windows.net",
];

/// Whether a host is a managed Azure endpoint.
///
/// For these, hostname verification (with wildcard matching in the leftmost
/// label only, as rustls implements it) is mandatory and
/// `trust_server_certificate` is rejected.
#[must_use]
pub fn is_managed_endpoint(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    MANAGED_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
}

/// TLS configuration for a connection.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct TlsConfig {
    /// Skip certificate verification. Only honored for on-premises hosts;
    /// managed Azure endpoints always verify.
    pub trust_server_certificate: bool,
}

impl TlsConfig {
    /// Create a configuration with full verification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to trust the server certificate without verification.
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_endpoint_detection() {
        assert!(is_managed_endpoint("myserver.database.windows.net"));
        assert!(is_managed_endpoint("WH123.datawarehouse.PBIDEDICATED.windows.net"));
        assert!(is_managed_endpoint("x.database.fabric.microsoft.com"));
        assert!(!is_managed_endpoint("sqlserver.internal.corp"));
        assert!(!is_managed_endpoint("database.windows.net.evil.example"));
    }
}
