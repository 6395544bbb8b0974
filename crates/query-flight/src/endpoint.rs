//! Flight endpoint addressing
//!
//! Endpoints are written as `HOST:PORT` on the command line and in payloads
//! and turned into `http://` URLs for tonic channels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FlightError;

/// A remote Flight service reachable at `host:port`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FlightEndpoint {
    /// Hostname or IP literal (IPv6 without brackets)
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl FlightEndpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `HOST:PORT`, `[V6]:PORT`, optionally prefixed by `http://`
    pub fn parse(spec: &str) -> Result<Self, FlightError> {
        let invalid = || FlightError::InvalidEndpoint(spec.to_string());

        let trimmed = spec.trim();
        let trimmed = trimmed
            .strip_prefix("http://")
            .unwrap_or(trimmed)
            .trim_end_matches('/');

        let (host, port) = trimmed.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(host, port))
    }

    /// Get the address string (host:port), bracketing IPv6 literals
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Get the full URL for a tonic channel
    pub fn url(&self) -> String {
        format!("http://{}", self.address())
    }
}

impl fmt::Display for FlightEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

impl FromStr for FlightEndpoint {
    type Err = FlightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let endpoint = FlightEndpoint::parse("localhost:8814").unwrap();
        assert_eq!(endpoint.host, "localhost");
        assert_eq!(endpoint.port, 8814);
        assert_eq!(endpoint.url(), "http://localhost:8814");
    }

    #[test]
    fn test_parse_url_and_ipv6() {
        let endpoint: FlightEndpoint = "http://[::1]:8815/".parse().unwrap();
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.address(), "[::1]:8815");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(FlightEndpoint::parse("localhost").is_err());
        assert!(FlightEndpoint::parse(":8814").is_err());
        assert!(FlightEndpoint::parse("host:port").is_err());
    }
}
