//! Canonical network addresses for cluster nodes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::TopologyError;

/// Port a server listens on when none is given explicitly
pub const DEFAULT_PORT: u16 = 7401;

/// A canonicalized `host:port` address of one server.
///
/// Equality is on the canonical form, so `DB1.example.com` and
/// `db1.example.com:7401` compare equal. Raw user input is kept out of the
/// model entirely; parse at the boundary and carry this type everywhere else.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    host: String,
    port: u16,
}

impl NodeAddress {
    /// Create an address from an already-canonical host and port
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_ascii_lowercase(),
            port,
        }
    }

    /// Parse user-supplied input into a canonical address.
    ///
    /// Accepts `host`, `host:port` and bracketed IPv6 forms. Hostnames are
    /// lowercased; a missing port defaults to [`DEFAULT_PORT`].
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::InvalidAddress`] if the input has a scheme,
    /// is empty, or does not parse as a host.
    pub fn parse(input: &str) -> Result<Self, TopologyError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TopologyError::InvalidAddress(
                input.to_string(),
                "empty address".to_string(),
            ));
        }
        if trimmed.contains("://") {
            return Err(TopologyError::InvalidAddress(
                input.to_string(),
                "address must not carry a scheme".to_string(),
            ));
        }

        // Lean on the url crate for host validation and IPv6 bracket handling
        let url = Url::parse(&format!("tcp://{trimmed}"))
            .map_err(|e| TopologyError::InvalidAddress(input.to_string(), e.to_string()))?;

        let host = url.host_str().ok_or_else(|| {
            TopologyError::InvalidAddress(input.to_string(), "no host".to_string())
        })?;
        // host_str keeps the brackets around IPv6 literals; the canonical
        // form stores the bare host and re-adds brackets when displayed.
        let host = host.trim_start_matches('[').trim_end_matches(']');

        Ok(Self::new(host, url.port().unwrap_or(DEFAULT_PORT)))
    }

    /// Host component, lowercased
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port component
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            // IPv6 literal
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for NodeAddress {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let addr = NodeAddress::parse("db1.example.com:7500").unwrap();
        assert_eq!(addr.host(), "db1.example.com");
        assert_eq!(addr.port(), 7500);
    }

    #[test]
    fn defaults_port() {
        let addr = NodeAddress::parse("db1").unwrap();
        assert_eq!(addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn canonicalizes_case() {
        let a = NodeAddress::parse("DB1.Example.COM:7401").unwrap();
        let b = NodeAddress::parse("db1.example.com").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_scheme_and_empty() {
        assert!(NodeAddress::parse("tcp://db1:7401").is_err());
        assert!(NodeAddress::parse("   ").is_err());
    }

    #[test]
    fn ipv6_roundtrip() {
        let addr = NodeAddress::parse("[::1]:7401").unwrap();
        assert_eq!(addr.to_string(), "[::1]:7401");
    }
}
