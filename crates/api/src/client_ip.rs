use std::net::IpAddr;

use axum::http::HeaderMap;
use creatorgate_common::KeyStrategy;
use ipnet::IpNet;

/// Authenticated identity of the caller, inserted as a request extension by
/// whatever authentication layer runs in front of the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

/// Key used when the client address cannot be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve the client address for a request. `None` when the connection's
/// peer address is unavailable.
///
/// `X-Forwarded-For` is only honoured when the direct peer is a trusted
/// proxy. The header is then walked right to left and the first hop outside
/// the trusted ranges is the client; anything further left is
/// client-controlled and ignored.
pub fn resolve_client_ip(
    peer: Option<IpAddr>,
    headers: &HeaderMap,
    trusted_proxies: &[IpNet],
) -> Option<IpAddr> {
    let peer = peer?.to_canonical();
    if !is_trusted(peer, trusted_proxies) {
        return Some(peer);
    }

    let hops: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
        .map(|ip| ip.to_canonical())
        .collect();

    hops.iter()
        .rev()
        .find(|ip| !is_trusted(**ip, trusted_proxies))
        .or_else(|| hops.first())
        .copied()
        .or(Some(peer))
}

fn is_trusted(ip: IpAddr, trusted_proxies: &[IpNet]) -> bool {
    trusted_proxies.iter().any(|net| net.contains(&ip))
}

/// Derive the rate-limit key for a request.
pub fn rate_limit_key(
    strategy: KeyStrategy,
    client_ip: Option<IpAddr>,
    principal: Option<&Principal>,
) -> String {
    let ip = client_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    match (strategy, principal) {
        (KeyStrategy::IpAndPrincipal, Some(Principal(id))) if !id.is_empty() => {
            format!("{}|{}", ip, id)
        }
        _ => ip,
    }
}
