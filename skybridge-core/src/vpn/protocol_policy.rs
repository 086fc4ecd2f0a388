//! Protocol rotation policy
//!
//! Decides which protocol/port the next attempt should use. Three modes:
//! manual (user-fixed choice), network-preferred (a recognized Wi-Fi network
//! carries its own preference), and automatic rotation with failure-driven
//! advancement. A validated connection pins its protocol as known-good and
//! biases future rotations until the pin expires.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::info;

use super::protocol::{Protocol, ProtocolPort};

/// Known-good pins are dropped after 12 hours.
const GOOD_PROTOCOL_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Rotation order attempted in automatic mode.
fn default_rotation() -> Vec<ProtocolPort> {
    vec![
        ProtocolPort::new(Protocol::WireGuard, "443"),
        ProtocolPort::new(Protocol::IkeV2, "500"),
        ProtocolPort::new(Protocol::Udp, "443"),
        ProtocolPort::new(Protocol::Tcp, "443"),
        ProtocolPort::new(Protocol::Stealth, "443"),
        ProtocolPort::new(Protocol::WsTunnel, "443"),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Automatic,
    Manual,
}

/// The network the device currently sits on, with any per-network protocol
/// preference the user configured for it.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkContext {
    pub name: String,
    pub preferred: Option<ProtocolPort>,
    pub preferred_enabled: bool,
}

struct GoodProtocol {
    protocol_port: ProtocolPort,
    pinned_at: Instant,
}

pub struct ProtocolPolicy {
    mode: ConnectionMode,
    manual: ProtocolPort,
    rotation: Vec<ProtocolPort>,
    index: usize,
    failures: HashMap<Protocol, u32>,
    good: Option<GoodProtocol>,
    network: Option<NetworkContext>,
}

impl ProtocolPolicy {
    pub fn new(mode: ConnectionMode, manual: ProtocolPort) -> Self {
        Self {
            mode,
            manual,
            rotation: default_rotation(),
            index: 0,
            failures: HashMap::new(),
            good: None,
            network: None,
        }
    }

    pub fn automatic() -> Self {
        Self::new(
            ConnectionMode::Automatic,
            ProtocolPort::new(Protocol::WireGuard, "443"),
        )
    }

    pub fn set_mode(&mut self, mode: ConnectionMode) {
        self.mode = mode;
    }

    pub fn set_manual(&mut self, manual: ProtocolPort) {
        self.manual = manual;
    }

    pub fn set_network(&mut self, network: Option<NetworkContext>) {
        // Moving to a different network clears rotation state; its failure
        // history does not carry over.
        let network_changed = match (&self.network, &network) {
            (Some(old), Some(new)) => old.name != new.name,
            _ => false,
        };
        if network_changed {
            self.reset();
        }
        self.network = network;
    }

    /// Protocol/port for the next attempt.
    ///
    /// `is_retry` marks protocol-failover/-change retries, which must not be
    /// redirected back to the network preference they are escaping.
    pub fn next(&mut self, is_retry: bool) -> ProtocolPort {
        if self.mode == ConnectionMode::Manual {
            return self.manual.clone();
        }
        if !is_retry {
            if let Some(network) = &self.network {
                if network.preferred_enabled {
                    if let Some(preferred) = &network.preferred {
                        info!(
                            "Using preferred protocol {} for network {}",
                            preferred, network.name
                        );
                        return preferred.clone();
                    }
                }
            }
        }
        self.expire_good();
        let order = self.effective_rotation();
        order[self.index % order.len()].clone()
    }

    /// Current attempt failed: count it and advance the rotation.
    pub fn on_failure(&mut self) {
        let order = self.effective_rotation();
        let failed = order[self.index % order.len()].clone();
        *self.failures.entry(failed.protocol).or_insert(0) += 1;
        self.index = (self.index + 1) % order.len();
        info!(
            "{} failed to connect, rotation advanced to {}",
            failed,
            order[self.index % order.len()]
        );
    }

    /// A connection validated on this protocol: clear failure history and pin
    /// it as known-good.
    pub fn on_validated(&mut self, protocol_port: ProtocolPort) {
        info!("Pinning {} as known-good protocol", protocol_port);
        self.failures.clear();
        self.index = 0;
        self.good = Some(GoodProtocol {
            protocol_port,
            pinned_at: Instant::now(),
        });
    }

    pub fn failure_count(&self, protocol: Protocol) -> u32 {
        self.failures.get(&protocol).copied().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.failures.clear();
        self.index = 0;
        self.good = None;
    }

    fn expire_good(&mut self) {
        if let Some(good) = &self.good {
            if good.pinned_at.elapsed() >= GOOD_PROTOCOL_TTL {
                info!("Known-good protocol pin expired");
                self.good = None;
            }
        }
    }

    /// Rotation with the known-good protocol (if pinned) moved to the front.
    fn effective_rotation(&self) -> Vec<ProtocolPort> {
        let mut order = self.rotation.clone();
        if let Some(good) = &self.good {
            order.retain(|pp| pp.protocol != good.protocol_port.protocol);
            order.insert(0, good.protocol_port.clone());
        }
        order
    }
}

impl Default for ProtocolPolicy {
    fn default() -> Self {
        Self::automatic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_mode_always_returns_fixed_choice() {
        let mut policy = ProtocolPolicy::new(
            ConnectionMode::Manual,
            ProtocolPort::new(Protocol::Tcp, "1194"),
        );
        for _ in 0..3 {
            assert_eq!(
                policy.next(false),
                ProtocolPort::new(Protocol::Tcp, "1194")
            );
            policy.on_failure();
        }
    }

    #[test]
    fn test_automatic_rotation_advances_on_failure() {
        let mut policy = ProtocolPolicy::automatic();
        assert_eq!(policy.next(false).protocol, Protocol::WireGuard);
        policy.on_failure();
        assert_eq!(policy.next(true).protocol, Protocol::IkeV2);
        policy.on_failure();
        assert_eq!(policy.next(true).protocol, Protocol::Udp);
    }

    #[test]
    fn test_rotation_wraps_around() {
        let mut policy = ProtocolPolicy::automatic();
        for _ in 0..6 {
            policy.on_failure();
        }
        assert_eq!(policy.next(true).protocol, Protocol::WireGuard);
    }

    #[test]
    fn test_network_preference_overrides_rotation() {
        let mut policy = ProtocolPolicy::automatic();
        policy.set_network(Some(NetworkContext {
            name: "HomeWifi".to_string(),
            preferred: Some(ProtocolPort::new(Protocol::Stealth, "8443")),
            preferred_enabled: true,
        }));
        assert_eq!(
            policy.next(false),
            ProtocolPort::new(Protocol::Stealth, "8443")
        );
    }

    #[test]
    fn test_network_preference_skipped_on_failover_retry() {
        let mut policy = ProtocolPolicy::automatic();
        policy.set_network(Some(NetworkContext {
            name: "HomeWifi".to_string(),
            preferred: Some(ProtocolPort::new(Protocol::Stealth, "8443")),
            preferred_enabled: true,
        }));
        assert_eq!(policy.next(true).protocol, Protocol::WireGuard);
    }

    #[test]
    fn test_disabled_network_preference_is_ignored() {
        let mut policy = ProtocolPolicy::automatic();
        policy.set_network(Some(NetworkContext {
            name: "HomeWifi".to_string(),
            preferred: Some(ProtocolPort::new(Protocol::Stealth, "8443")),
            preferred_enabled: false,
        }));
        assert_eq!(policy.next(false).protocol, Protocol::WireGuard);
    }

    #[test]
    fn test_validated_pins_good_protocol_and_clears_failures() {
        let mut policy = ProtocolPolicy::automatic();
        policy.on_failure();
        policy.on_failure();
        assert_eq!(policy.failure_count(Protocol::WireGuard), 1);
        assert_eq!(policy.failure_count(Protocol::IkeV2), 1);

        policy.on_validated(ProtocolPort::new(Protocol::Udp, "443"));
        assert_eq!(policy.failure_count(Protocol::WireGuard), 0);
        // The validated protocol now leads the rotation.
        assert_eq!(policy.next(true).protocol, Protocol::Udp);
    }

    #[test]
    fn test_network_change_resets_state() {
        let mut policy = ProtocolPolicy::automatic();
        policy.set_network(Some(NetworkContext {
            name: "Net1".to_string(),
            preferred: None,
            preferred_enabled: false,
        }));
        policy.on_failure();
        policy.on_validated(ProtocolPort::new(Protocol::Tcp, "443"));
        policy.set_network(Some(NetworkContext {
            name: "Net2".to_string(),
            preferred: None,
            preferred_enabled: false,
        }));
        assert_eq!(policy.next(true).protocol, Protocol::WireGuard);
    }
}
