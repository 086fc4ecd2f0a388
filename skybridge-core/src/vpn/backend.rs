//! Tunnel backend adapter interface
//!
//! One adapter per protocol family, each a thin wrapper over the OS
//! VPN-profile store. The orchestrator funnels every profile mutation through
//! its sequential reload → mutate → persist steps; adapters hold no
//! cross-family state.

use async_trait::async_trait;

use super::config::TunnelConfig;
use super::policy::{OnDemandRule, RoutingPolicy};
use super::protocol::BackendFamily;

/// Last known state of a backend's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Invalid,
}

impl BackendStatus {
    /// Whether this profile currently owns (or is acquiring) the tunnel.
    pub fn is_active(self) -> bool {
        matches!(self, BackendStatus::Connecting | BackendStatus::Connected)
    }
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendStatus::Disconnected => "disconnected",
            BackendStatus::Connecting => "connecting",
            BackendStatus::Connected => "connected",
            BackendStatus::Disconnecting => "disconnecting",
            BackendStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Why the last tunnel attempt dropped, as far as the OS reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectHint {
    /// The server rejected the supplied credentials.
    CredentialsRejected,
    Other,
}

pub type BackendError = String;

/// Per-family adapter over the OS VPN-profile store.
///
/// Contract notes:
/// - `set_enabled(false)` must also clear the profile's restrict-to-tunnel
///   routing flag so a disabled profile cannot hold the kill switch.
/// - `apply` replaces the whole profile payload; it does not merge.
/// - `last_disconnect_error` is only meaningful after the profile reported
///   `Disconnected` following a start.
#[async_trait]
pub trait TunnelBackend: Send + Sync {
    fn family(&self) -> BackendFamily;

    /// Re-read the profile from the OS store.
    async fn reload(&self) -> Result<(), BackendError>;

    async fn status(&self) -> BackendStatus;

    /// Translate the config into the profile's native fields and stage the
    /// routing flags.
    async fn apply(
        &self,
        config: &TunnelConfig,
        routing: RoutingPolicy,
    ) -> Result<(), BackendError>;

    async fn set_on_demand_rules(&self, rules: Vec<OnDemandRule>);

    async fn set_enabled(&self, enabled: bool);

    async fn is_enabled(&self) -> bool;

    /// Whether any on-demand rules are currently installed.
    async fn on_demand_active(&self) -> bool;

    /// Persist staged changes to the OS store.
    async fn save(&self) -> Result<(), BackendError>;

    async fn start(&self) -> Result<(), BackendError>;

    async fn stop(&self);

    async fn last_disconnect_error(&self) -> Option<DisconnectHint>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_active_only_for_connecting_and_connected() {
        assert!(BackendStatus::Connecting.is_active());
        assert!(BackendStatus::Connected.is_active());
        assert!(!BackendStatus::Disconnected.is_active());
        assert!(!BackendStatus::Disconnecting.is_active());
        assert!(!BackendStatus::Invalid.is_active());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(BackendStatus::Connecting.to_string(), "connecting");
        assert_eq!(BackendStatus::Invalid.to_string(), "invalid");
    }
}
