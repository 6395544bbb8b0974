//! Working out the address the coordinator should dial back

use std::net::IpAddr;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Public resolver used only to pick the outbound interface; no packet is sent
const PROBE_TARGET: &str = "8.8.8.8:80";

const FALLBACK_HOST: &str = "127.0.0.1";

/// Whether `host` binds every interface
pub fn is_wildcard(host: &str) -> bool {
    matches!(host, "" | "0.0.0.0" | "::" | "[::]")
}

/// Local IP of the interface used for outbound traffic
///
/// Connecting a UDP socket only selects a route, so this works without
/// network access to the probe target.
pub async fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect(PROBE_TARGET).await.ok()?;
    let addr = socket.local_addr().ok()?;
    Some(addr.ip()).filter(|ip| !ip.is_unspecified())
}

/// Host to advertise in the `register` payload
///
/// An explicit advertise host wins; a concrete bind host is used as is; a
/// wildcard bind host is replaced by the outbound interface address, or by
/// loopback when that cannot be determined.
pub async fn advertise_host(bind_host: &str, advertise: Option<&str>) -> String {
    if let Some(host) = advertise.filter(|h| !h.is_empty()) {
        return host.to_string();
    }
    if !is_wildcard(bind_host) {
        return bind_host.to_string();
    }

    match outbound_ip().await {
        Some(ip) => {
            debug!("Advertising outbound address {}", ip);
            ip.to_string()
        }
        None => {
            warn!(
                "Could not determine outbound address, advertising {}",
                FALLBACK_HOST
            );
            FALLBACK_HOST.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards() {
        assert!(is_wildcard("0.0.0.0"));
        assert!(is_wildcard("::"));
        assert!(!is_wildcard("127.0.0.1"));
        assert!(!is_wildcard("worker-3.internal"));
    }

    #[tokio::test]
    async fn test_explicit_hosts_win() {
        assert_eq!(advertise_host("0.0.0.0", Some("10.1.2.3")).await, "10.1.2.3");
        assert_eq!(advertise_host("192.168.0.9", None).await, "192.168.0.9");
    }

    #[tokio::test]
    async fn test_wildcard_resolves_to_concrete_ip() {
        let host = advertise_host("0.0.0.0", None).await;
        let ip: IpAddr = host.parse().unwrap();
        assert!(!ip.is_unspecified());
    }
}
