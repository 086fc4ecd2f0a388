//! Skybridge Core Library
//!
//! Client-side VPN connection orchestration: endpoint selection, protocol
//! policy, per-family tunnel configuration, backend activation, post-connect
//! validation, and failure recovery. Consumed as a library by the app shell;
//! no UI, storage engines, or packet-level tunneling live here.

pub mod credentials;
pub mod files;
pub mod locations;
pub mod notification;
pub mod settings;
pub mod vpn;

// Re-export commonly used items
pub use credentials::{CredentialStore, KeyringStore, SecretRef};
pub use files::{DiskFileStore, FileStore};
pub use locations::{
    Credentials, CustomConfigLocation, EndpointDirectory, Location, LocationId, Node,
    SelectedEndpoint, ServerGroup, StaticIpCredentials, StaticIpLocation,
};
pub use notification::{LogNotifier, NotificationSink};
pub use settings::{AppSettings, load_settings, save_settings};
pub use vpn::{
    BackendFamily, BackendStatus, ConnectRequest, ConnectionState, ConnectivityProbe,
    DisconnectHint, Orchestrator, ProgressEvent, ProgressStream, Protocol, ProtocolPolicy,
    ProtocolPort, TunnelBackend, TunnelConfig, UserPolicy, VpnError, VpnResult,
};
