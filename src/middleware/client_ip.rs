// middleware/client_ip.rs - Caller IP resolution behind trusted proxies
//
// The socket peer is the caller unless the peer is a trusted proxy. Then
// X-Forwarded-For is read right to left, skipping trusted hops; the first
// address not in the trusted set is the caller. Entries further left are
// client-supplied and never consulted once an untrusted hop is found.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use ipnet::IpNet;

use crate::app::AppState;
use crate::config::ConfigError;

pub const UNKNOWN_IP: &str = "unknown";

/// Resolved caller address, inserted into request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    networks: Vec<IpNet>,
}

impl TrustedProxies {
    /// Accepts CIDR blocks (`10.0.0.0/8`) and bare addresses
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, ConfigError> {
        let networks = entries
            .iter()
            .map(|entry| {
                let entry = entry.as_ref().trim();
                entry
                    .parse::<IpNet>()
                    .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                    .map_err(|_| ConfigError::Invalid(format!("invalid trusted proxy: {}", entry)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.networks.iter().any(|net| net.contains(&ip))
    }

    pub fn resolve(&self, peer: Option<IpAddr>, headers: &HeaderMap) -> String {
        let Some(peer) = peer.map(|ip| ip.to_canonical()) else {
            return UNKNOWN_IP.to_string();
        };
        if self.is_trusted(peer) {
            if let Some(forwarded) = self.nearest_untrusted(headers) {
                return forwarded.to_string();
            }
        }
        peer.to_string()
    }

    /// Right-most forwarded address outside the trusted set. When every hop is
    /// trusted, the left-most valid one.
    fn nearest_untrusted(&self, headers: &HeaderMap) -> Option<IpAddr> {
        let hops: Vec<IpAddr> = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|candidate| !candidate.is_empty() && !candidate.eq_ignore_ascii_case("unknown"))
            .filter_map(|candidate| candidate.parse::<IpAddr>().ok())
            .map(|ip| ip.to_canonical())
            .collect();

        hops.iter()
            .rev()
            .find(|ip| !self.is_trusted(**ip))
            .or_else(|| hops.first())
            .copied()
    }
}

pub async fn client_ip_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = state.proxies.resolve(peer, request.headers());
    request.extensions_mut().insert(ClientIp(ip));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn proxies() -> TrustedProxies {
        TrustedProxies::parse(&["127.0.0.1/32", "::1/128", "10.1.2.3"]).unwrap()
    }

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn untrusted_peer_ignores_forwarded_header() {
        let peer: IpAddr = "203.0.113.4".parse().unwrap();
        assert_eq!(proxies().resolve(Some(peer), &forwarded("1.1.1.1")), "203.0.113.4");
    }

    #[test]
    fn trusted_peer_uses_nearest_untrusted_hop() {
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        let headers = forwarded("unknown, not-an-ip, 198.51.100.7, 10.1.2.3");
        assert_eq!(proxies().resolve(Some(peer), &headers), "198.51.100.7");

        let peer: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(proxies().resolve(Some(peer), &HeaderMap::new()), "10.1.2.3");
    }

    #[test]
    fn client_supplied_entries_are_ignored() {
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        let proxies = proxies();
        for spoofed in ["1.1.1.1", "8.8.8.8", "9.9.9.9"] {
            let headers = forwarded(&format!("{}, 203.0.113.50", spoofed));
            assert_eq!(proxies.resolve(Some(peer), &headers), "203.0.113.50");
        }
    }

    #[test]
    fn all_trusted_hops_fall_back_to_left_most() {
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        let headers = forwarded("10.1.2.3, 127.0.0.1");
        assert_eq!(proxies().resolve(Some(peer), &headers), "10.1.2.3");
    }

    #[test]
    fn mapped_ipv4_is_canonicalised() {
        let peer: IpAddr = "::ffff:127.0.0.1".parse().unwrap();
        assert!(proxies().is_trusted(peer));
    }

    #[test]
    fn missing_peer_is_unknown() {
        assert_eq!(proxies().resolve(None, &forwarded("1.2.3.4")), UNKNOWN_IP);
    }

    #[test]
    fn invalid_entries_are_rejected() {
        assert!(TrustedProxies::parse(&["10.0.0.0/33"]).is_err());
        assert!(TrustedProxies::parse(&["proxy.internal"]).is_err());
    }
}
