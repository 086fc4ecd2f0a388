//! Protocol and backend family types

use serde::{Deserialize, Serialize};

/// Wire protocols the client can attempt, in no particular order.
///
/// `Stealth` and `WsTunnel` are stream-tunnel variants that wrap the tunnel
/// inside TLS or WebSocket transports to evade network-level blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    WireGuard,
    IkeV2,
    Udp,
    Tcp,
    Stealth,
    WsTunnel,
}

impl Protocol {
    pub fn name(self) -> &'static str {
        match self {
            Protocol::WireGuard => "WireGuard",
            Protocol::IkeV2 => "IKEv2",
            Protocol::Udp => "UDP",
            Protocol::Tcp => "TCP",
            Protocol::Stealth => "Stealth",
            Protocol::WsTunnel => "WStunnel",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "wireguard" => Some(Protocol::WireGuard),
            "ikev2" => Some(Protocol::IkeV2),
            "udp" => Some(Protocol::Udp),
            "tcp" => Some(Protocol::Tcp),
            "stealth" => Some(Protocol::Stealth),
            "wstunnel" => Some(Protocol::WsTunnel),
            _ => None,
        }
    }

    /// Which mutually-exclusive tunnel backend carries this protocol.
    pub fn family(self) -> BackendFamily {
        match self {
            Protocol::WireGuard => BackendFamily::WireGuard,
            Protocol::IkeV2 => BackendFamily::IkeV2,
            Protocol::Udp | Protocol::Tcp | Protocol::Stealth | Protocol::WsTunnel => {
                BackendFamily::Stream
            }
        }
    }

    /// True for the two variants that require stream obfuscation.
    pub fn requires_wrap(self) -> bool {
        matches!(self, Protocol::Stealth | Protocol::WsTunnel)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Tunnel backend families. At most one may hold an active profile at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendFamily {
    WireGuard,
    IkeV2,
    Stream,
}

impl BackendFamily {
    pub fn name(self) -> &'static str {
        match self {
            BackendFamily::WireGuard => "WireGuard",
            BackendFamily::IkeV2 => "IKEv2",
            BackendFamily::Stream => "stream tunnel",
        }
    }
}

impl std::fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Protocol plus the port to dial it on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolPort {
    pub protocol: Protocol,
    pub port: String,
}

impl ProtocolPort {
    pub fn new(protocol: Protocol, port: &str) -> Self {
        Self {
            protocol,
            port: port.to_string(),
        }
    }
}

impl std::fmt::Display for ProtocolPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.protocol, self.port)
    }
}
