//! IP-trust gate for the control plane (design note "agent network trust"):
//! only loopback and RFC1918 private addresses may reach the `/agent`
//! websocket, agent/job/config/OAuth management routes, and the internal
//! `/ui` websocket, the same guardrail shape as the teacher's stream-proxy
//! SSRF check in reverse — there it blocks private/loopback destinations,
//! here it requires them of the caller. The public surface (`/`, `/status`,
//! `/healthz`, `/status-ws`) never passes through this gate.

use std::net::IpAddr;

use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;

fn is_trusted(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_private()),
    }
}

/// Rejects requests whose observed peer address is neither loopback nor
/// RFC1918 private, when `ENABLE_PUBLIC_ACCESS_RESTRICTIONS` is set.
pub async fn require_trusted_network(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if is_trusted(addr.ip()) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(peer = %addr, "rejected agent-plane request from untrusted network");
        Err(StatusCode::FORBIDDEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_and_private_are_trusted() {
        assert!(is_trusted("127.0.0.1".parse().unwrap()));
        assert!(is_trusted("10.0.0.5".parse().unwrap()));
        assert!(is_trusted("192.168.1.20".parse().unwrap()));
        assert!(is_trusted("172.16.3.4".parse().unwrap()));
    }

    #[test]
    fn public_addresses_are_not_trusted() {
        assert!(!is_trusted("8.8.8.8".parse().unwrap()));
        assert!(!is_trusted("1.1.1.1".parse().unwrap()));
    }
}
