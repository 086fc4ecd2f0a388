//! VPN connection core
//!
//! Drives the full connect/disconnect sequence: endpoint node selection,
//! protocol rotation, config building, backend activation, post-connect
//! validation, and layered failure recovery.
//!
//! ## Architecture
//!
//! - node_selector.rs: weighted-random endpoint pick within a location
//! - protocol.rs: protocol/port types and backend family mapping
//! - protocol_policy.rs: manual/automatic/network-preferred protocol decision
//! - policy.rs: user policy, kill-switch/LAN routing table, on-demand rules
//! - config.rs: per-family tunnel configuration builders
//! - backend.rs: tunnel backend adapter interface (one per protocol family)
//! - connection.rs: connection orchestrator state machine and lifecycle
//! - validator.rs: post-connect external-reachability probe
//! - failover.rs: failure kind to recovery action mapping
//! - error_messages.rs: user-facing error text

pub mod backend;
pub mod config;
pub mod connection;
pub mod error_messages;
pub mod failover;
pub mod node_selector;
pub mod policy;
pub mod protocol;
pub mod protocol_policy;
pub mod validator;

pub use backend::{BackendError, BackendStatus, DisconnectHint, TunnelBackend};
pub use config::{ConfigBuilder, ProxyWrap, TunnelConfig, WireGuardExchange, WrapKind};
pub use connection::{
    ConnectRequest, ConnectionState, Orchestrator, ProgressEvent, ProgressStream,
};
pub use error_messages::{short_error, user_friendly_error};
pub use failover::{FailoverController, RecoveryAction};
pub use node_selector::select_endpoint;
pub use policy::{OnDemandRule, RoutingPolicy, UserPolicy};
pub use protocol::{BackendFamily, Protocol, ProtocolPort};
pub use protocol_policy::{ConnectionMode, NetworkContext, ProtocolPolicy};
pub use validator::{ConnectivityProbe, HttpAddressProbe, ValidatedConnection};

/// Everything that can terminate a connection attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VpnError {
    #[error("location not found: {0}")]
    LocationNotFound(String),

    #[error("no valid node available in this location")]
    NoValidNode,

    #[error("missing credentials for {0}")]
    CredentialsMissing(String),

    #[error("failed to build tunnel configuration: {0}")]
    ConfigBuild(String),

    #[error("server rejected the supplied credentials")]
    AuthFailure,

    #[error("connection attempt timed out")]
    Timeout,

    #[error("connectivity test failed after all attempts")]
    ConnectivityTestFailed,

    #[error("connection attempt cancelled")]
    Cancelled,
}

pub type VpnResult<T> = Result<T, VpnError>;
