use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use axum::http::HeaderMap;

/// Private IPv4 blocks trusted when the address is not on the inferred subnet.
const PRIVATE_RANGES: [(Ipv4Addr, u8); 3] = [
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
];

/// What the server knows about the network it sits on.
#[derive(Debug, Clone)]
pub struct NetworkContext {
    pub server_ip: IpAddr,
    local_subnet: Option<Ipv4Addr>,
    strict: bool,
}

impl NetworkContext {
    pub fn new(server_ip: IpAddr, strict: bool) -> Self {
        let local_subnet = match server_ip {
            IpAddr::V4(v4) => Some(network_base(v4, 24)),
            IpAddr::V6(_) => None,
        };

        Self {
            server_ip,
            local_subnet,
            strict,
        }
    }

    /// Infers the server address from the route the kernel would pick toward
    /// a public host. No packet is sent.
    pub fn detect(strict: bool) -> Self {
        let server_ip = UdpSocket::bind("0.0.0.0:0")
            .and_then(|socket| {
                socket.connect("8.8.8.8:80")?;
                socket.local_addr()
            })
            .map(|addr| addr.ip())
            .unwrap_or_else(|e| {
                tracing::warn!("Could not infer local address, using loopback: {}", e);
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            });

        Self::new(server_ip, strict)
    }

    pub fn subnet_label(&self) -> String {
        match self.local_subnet {
            Some(base) => format!("{}/24", base),
            None => "private ranges".to_string(),
        }
    }

    pub fn is_on_local_network(&self, address: &str) -> bool {
        let ip = match address.trim().parse::<IpAddr>() {
            Ok(ip) => ip.to_canonical(),
            Err(_) => return false,
        };

        if ip.is_loopback() {
            return true;
        }

        let v4 = match ip {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => return false,
        };

        if !v4.is_private() {
            return false;
        }

        if let Some(base) = self.local_subnet {
            if network_base(v4, 24) == base {
                return true;
            }
        }

        if self.strict {
            return false;
        }

        PRIVATE_RANGES
            .iter()
            .any(|(base, prefix)| network_base(v4, *prefix) == *base)
    }
}

fn network_base(ip: Ipv4Addr, prefix: u8) -> Ipv4Addr {
    let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
    Ipv4Addr::from(u32::from(ip) & mask)
}

/// Resolves the caller's address: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the socket peer. Upstream proxies are trusted as-is.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return Some(real_ip.to_string());
        }
    }

    peer.map(|addr| addr.ip().to_string())
}
