//! User policy and its translation to backend routing flags
//!
//! The kill-switch / LAN-allowance combination historically diverged across
//! OS-version branches; here it is collapsed into one table keyed by
//! (local-address privacy, kill switch, allow LAN). See [`RoutingPolicy::resolve`].

use serde::{Deserialize, Serialize};

/// Attempt-scoped user preferences affecting how the tunnel is configured.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserPolicy {
    /// Restrict all traffic to the tunnel interface while active.
    pub kill_switch: bool,
    /// Keep local-subnet traffic outside the tunnel.
    pub allow_lan: bool,
    /// Whether the client's current local address sits in a private range.
    /// Carrier-grade or public local addresses get the strict policy row.
    pub local_address_is_private: bool,
    /// Append censorship-circumvention directives to stream-tunnel configs.
    pub circumvent_censorship: bool,
    /// Wi-Fi networks the tunnel should drop on.
    pub untrusted_wifi: Vec<String>,
    /// Drop the tunnel on cellular.
    pub untrusted_cellular: bool,
}

/// Backend-level routing flags derived from [`UserPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutingPolicy {
    /// All traffic pinned to the tunnel interface (kill switch).
    pub restrict_to_tunnel: bool,
    /// Local subnets excluded from the tunnel (LAN allowance).
    pub exclude_local_networks: bool,
}

impl RoutingPolicy {
    /// Single policy table:
    ///
    /// | local range | restrict_to_tunnel | exclude_local_networks |
    /// |-------------|--------------------|------------------------|
    /// | private     | kill_switch        | allow_lan              |
    /// | non-private | true               | false                  |
    ///
    /// On a non-private local range, honoring the LAN allowance would leak
    /// routable traffic outside the tunnel, so the strict row applies.
    pub fn resolve(policy: &UserPolicy) -> Self {
        if policy.local_address_is_private {
            RoutingPolicy {
                restrict_to_tunnel: policy.kill_switch,
                exclude_local_networks: policy.allow_lan,
            }
        } else {
            RoutingPolicy {
                restrict_to_tunnel: true,
                exclude_local_networks: false,
            }
        }
    }
}

/// OS-level rules that auto-trigger connect/disconnect on network context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDemandRule {
    /// Drop the tunnel when the device moves to cellular.
    DisconnectOnCellular,
    /// Drop the tunnel on any of these Wi-Fi networks.
    DisconnectOnWifi(Vec<String>),
    /// Otherwise, reconnect unconditionally.
    Connect,
}

/// Rule set installed on the target profile: per-network disconnect rules
/// first, one unconditional reconnect rule last.
pub fn on_demand_rules(policy: &UserPolicy) -> Vec<OnDemandRule> {
    let mut rules = Vec::new();
    if policy.untrusted_cellular {
        rules.push(OnDemandRule::DisconnectOnCellular);
    }
    if !policy.untrusted_wifi.is_empty() {
        let mut ssids = policy.untrusted_wifi.clone();
        ssids.sort();
        rules.push(OnDemandRule::DisconnectOnWifi(ssids));
    }
    rules.push(OnDemandRule::Connect);
    rules
}
