//! Tunnel configuration builders
//!
//! Translates (endpoint, protocol, port, user policy) into one of three
//! configuration variants:
//!
//! - stream-tunnel: a patched template config file, optionally wrapped in a
//!   TLS or WebSocket proxy transport
//! - IKE-style: username/hostname/address plus a secret reference; the
//!   backend owns the transport crypto parameters
//! - WireGuard-style: a parsed quick-config, either imported or issued by a
//!   keyed-exchange backend
//!
//! Configs are built fresh per attempt and never cached across attempts.

use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;

use super::protocol::{BackendFamily, Protocol, ProtocolPort};
use super::policy::UserPolicy;
use super::{VpnError, VpnResult};
use crate::credentials::{CredentialStore, SecretRef};
use crate::files::FileStore;
use crate::locations::{Credentials, CustomConfigLocation, EndpointDirectory, SelectedEndpoint};

/// Fixed on-disk location of the patched stream-tunnel config.
pub const STREAM_CONFIG_PATH: &str = "stream-tunnel.conf";

/// Outer remote values used when the tunnel is wrapped in a local proxy.
pub const LOCAL_PROXY_ADDRESS: &str = "127.0.0.1";
pub const LOCAL_PROXY_PORT: &str = "1194";

/// How wrapped tunnel traffic is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapKind {
    WebSocket,
    Tls,
}

impl WrapKind {
    fn directive_name(self) -> &'static str {
        match self {
            WrapKind::WebSocket => "ws",
            WrapKind::Tls => "tls",
        }
    }
}

/// Where the obfuscation proxy dials out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyWrap {
    pub remote_address: String,
    pub remote_port: String,
    pub kind: WrapKind,
}

impl ProxyWrap {
    /// Config line handing the wrap target to the local proxy.
    pub fn directive(&self) -> String {
        format!(
            "local-proxy {} {} {}",
            self.remote_address,
            self.remote_port,
            self.kind.directive_name()
        )
    }
}

/// Stream-tunnel configuration: the rendered config text plus the values the
/// backend needs to fill its profile.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamTunnelConfig {
    pub protocol: Protocol,
    /// Outer remote address (loopback when wrapped).
    pub address: String,
    pub port: String,
    pub credentials: Option<Credentials>,
    pub proxy: Option<ProxyWrap>,
    pub rendered: String,
}

/// IKE-style configuration. Transport crypto parameters (cipher, DH group,
/// hash, lifetimes) are fixed inside the backend adapter, not chosen here.
#[derive(Debug, Clone, PartialEq)]
pub struct IkeConfig {
    pub username: String,
    pub password_ref: SecretRef,
    pub hostname: String,
    pub address: String,
}

/// Parsed WireGuard quick-config.
#[derive(Debug, Clone, PartialEq)]
pub struct QuickConfig {
    pub private_key: String,
    pub addresses: Vec<String>,
    pub dns: Vec<String>,
    pub peer_public_key: String,
    pub allowed_ips: Vec<String>,
    pub endpoint: String,
    pub keepalive: Option<u16>,
}

impl QuickConfig {
    /// Parse `[Interface]`/`[Peer]` quick-config text.
    pub fn parse(text: &str) -> Result<Self, String> {
        #[derive(PartialEq)]
        enum Section {
            None,
            Interface,
            Peer,
        }
        let mut section = Section::None;
        let mut private_key = None;
        let mut addresses = Vec::new();
        let mut dns = Vec::new();
        let mut peer_public_key = None;
        let mut allowed_ips = Vec::new();
        let mut endpoint = None;
        let mut keepalive = None;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.to_ascii_lowercase().as_str() {
                "[interface]" => {
                    section = Section::Interface;
                    continue;
                }
                "[peer]" => {
                    section = Section::Peer;
                    continue;
                }
                _ => {}
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(format!("malformed line: {}", line));
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().to_string();
            match (&section, key.as_str()) {
                (Section::Interface, "privatekey") => private_key = Some(value),
                (Section::Interface, "address") => {
                    addresses.extend(value.split(',').map(|s| s.trim().to_string()));
                }
                (Section::Interface, "dns") => {
                    dns.extend(value.split(',').map(|s| s.trim().to_string()));
                }
                (Section::Peer, "publickey") => peer_public_key = Some(value),
                (Section::Peer, "allowedips") => {
                    allowed_ips.extend(value.split(',').map(|s| s.trim().to_string()));
                }
                (Section::Peer, "endpoint") => endpoint = Some(value),
                (Section::Peer, "persistentkeepalive") => {
                    keepalive = value.parse().ok();
                }
                _ => debug!("Ignoring quick-config key {}", key),
            }
        }

        Ok(QuickConfig {
            private_key: private_key.ok_or("missing interface private key")?,
            addresses,
            dns,
            peer_public_key: peer_public_key.ok_or("missing peer public key")?,
            allowed_ips,
            endpoint: endpoint.ok_or("missing peer endpoint")?,
            keepalive,
        })
    }
}

/// Protocol-specific configuration handed to the backend adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum TunnelConfig {
    Stream(StreamTunnelConfig),
    Ike(IkeConfig),
    WireGuard(QuickConfig),
}

impl TunnelConfig {
    pub fn family(&self) -> BackendFamily {
        match self {
            TunnelConfig::Stream(_) => BackendFamily::Stream,
            TunnelConfig::Ike(_) => BackendFamily::IkeV2,
            TunnelConfig::WireGuard(_) => BackendFamily::WireGuard,
        }
    }

    /// The remote the tunnel will dial. A config without one must never
    /// reach the start step.
    pub fn remote_address(&self) -> Option<&str> {
        let address = match self {
            TunnelConfig::Stream(c) => c.address.as_str(),
            TunnelConfig::Ike(c) => c.address.as_str(),
            TunnelConfig::WireGuard(c) => c.endpoint.as_str(),
        };
        (!address.is_empty()).then_some(address)
    }
}

/// Keyed-exchange backend issuing WireGuard configs for directory locations.
#[async_trait]
pub trait WireGuardExchange: Send + Sync {
    async fn request_config(
        &self,
        endpoint_address: &str,
        hostname: &str,
        server_public_key: &str,
        port: &str,
    ) -> Result<String, String>;
}

pub struct ConfigBuilder {
    directory: Arc<dyn EndpointDirectory>,
    credentials: Arc<dyn CredentialStore>,
    files: Arc<dyn FileStore>,
    wg_exchange: Arc<dyn WireGuardExchange>,
}

impl ConfigBuilder {
    pub fn new(
        directory: Arc<dyn EndpointDirectory>,
        credentials: Arc<dyn CredentialStore>,
        files: Arc<dyn FileStore>,
        wg_exchange: Arc<dyn WireGuardExchange>,
    ) -> Self {
        Self {
            directory,
            credentials,
            files,
            wg_exchange,
        }
    }

    /// Build the configuration for one attempt.
    pub async fn build(
        &self,
        endpoint: &SelectedEndpoint,
        protocol_port: &ProtocolPort,
        policy: &UserPolicy,
    ) -> VpnResult<TunnelConfig> {
        if let Some(custom) = &endpoint.custom_config {
            return self.build_from_custom_config(custom).await;
        }
        match protocol_port.protocol.family() {
            BackendFamily::Stream => self.build_stream(endpoint, protocol_port, policy).await,
            BackendFamily::IkeV2 => self.build_ike(endpoint).await,
            BackendFamily::WireGuard => self.build_wireguard(endpoint, protocol_port).await,
        }
    }

    async fn build_from_custom_config(
        &self,
        custom: &CustomConfigLocation,
    ) -> VpnResult<TunnelConfig> {
        info!(
            "Building configuration from imported profile {} ({})",
            custom.name, custom.protocol
        );
        match custom.protocol.family() {
            BackendFamily::WireGuard => {
                let quick = QuickConfig::parse(&custom.config_text)
                    .map_err(VpnError::ConfigBuild)?;
                Ok(TunnelConfig::WireGuard(quick))
            }
            BackendFamily::Stream => {
                let credentials = if custom.auth_required {
                    match (&custom.username, &custom.password) {
                        (Some(username), Some(password))
                            if !username.is_empty() && !password.is_empty() =>
                        {
                            Some(
                                Credentials {
                                    username: username.clone(),
                                    password: password.clone(),
                                }
                                .decoded(),
                            )
                        }
                        _ => {
                            return Err(VpnError::CredentialsMissing(
                                custom.name.clone(),
                            ));
                        }
                    }
                } else {
                    None
                };
                if custom.server_address.is_empty() {
                    return Err(VpnError::ConfigBuild(
                        "imported profile has no remote address".to_string(),
                    ));
                }
                Ok(TunnelConfig::Stream(StreamTunnelConfig {
                    protocol: custom.protocol,
                    address: custom.server_address.clone(),
                    port: custom.port.clone(),
                    credentials,
                    proxy: None,
                    rendered: custom.config_text.clone(),
                }))
            }
            BackendFamily::IkeV2 => Err(VpnError::ConfigBuild(
                "IKE-style connections are not supported for imported profiles".to_string(),
            )),
        }
    }

    async fn build_stream(
        &self,
        endpoint: &SelectedEndpoint,
        protocol_port: &ProtocolPort,
        policy: &UserPolicy,
    ) -> VpnResult<TunnelConfig> {
        let protocol = protocol_port.protocol;
        let credentials = self
            .resolve_credentials(endpoint, BackendFamily::Stream)
            .await?;
        self.credentials
            .save(&credentials.username, &credentials.password)
            .map_err(VpnError::ConfigBuild)?;

        let tls_name = endpoint.tls_name.clone().ok_or_else(|| {
            VpnError::ConfigBuild("location has no TLS verification name".to_string())
        })?;

        // Wrapped variants dial the local proxy; the proxy dials the node.
        let proxy = if protocol.requires_wrap() {
            Some(build_proxy_wrap(endpoint, protocol, &protocol_port.port)?)
        } else {
            None
        };
        let (outer_address, outer_port, outer_proto) = match &proxy {
            Some(_) => (
                LOCAL_PROXY_ADDRESS.to_string(),
                LOCAL_PROXY_PORT.to_string(),
                "tcp".to_string(),
            ),
            None => (
                endpoint.address.clone(),
                protocol_port.port.clone(),
                protocol.name().to_ascii_lowercase(),
            ),
        };
        if outer_address.is_empty() {
            return Err(VpnError::ConfigBuild(
                "node has no remote address".to_string(),
            ));
        }

        let template = self.files.read(STREAM_CONFIG_PATH).map_err(|e| {
            VpnError::ConfigBuild(format!("cannot read config template: {}", e))
        })?;
        let template = String::from_utf8(template).map_err(|_| {
            VpnError::ConfigBuild("config template is not valid UTF-8".to_string())
        })?;

        let rendered = patch_stream_template(
            &template,
            &outer_proto,
            &outer_address,
            &outer_port,
            &tls_name,
            proxy.as_ref(),
            policy.circumvent_censorship,
        );

        // Render fully before touching disk so a failed build never leaves a
        // half-written file behind.
        self.files
            .remove(STREAM_CONFIG_PATH)
            .and_then(|_| self.files.write(STREAM_CONFIG_PATH, rendered.as_bytes()))
            .map_err(|e| VpnError::ConfigBuild(format!("cannot persist config: {}", e)))?;
        info!(
            "Stream-tunnel config written ({} -> {}:{})",
            protocol, outer_address, outer_port
        );

        Ok(TunnelConfig::Stream(StreamTunnelConfig {
            protocol,
            address: outer_address,
            port: outer_port,
            credentials: Some(credentials),
            proxy,
            rendered,
        }))
    }

    async fn build_ike(&self, endpoint: &SelectedEndpoint) -> VpnResult<TunnelConfig> {
        let credentials = self
            .resolve_credentials(endpoint, BackendFamily::IkeV2)
            .await?;
        self.credentials
            .save(&credentials.username, &credentials.password)
            .map_err(VpnError::ConfigBuild)?;
        let password_ref = self
            .credentials
            .retrieve(&credentials.username)
            .ok_or_else(|| VpnError::CredentialsMissing(BackendFamily::IkeV2.to_string()))?;

        let address = endpoint
            .direct_address
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                VpnError::ConfigBuild("node has no direct address for IKE".to_string())
            })?;

        Ok(TunnelConfig::Ike(IkeConfig {
            username: credentials.username,
            password_ref,
            hostname: endpoint.hostname.clone(),
            address,
        }))
    }

    async fn build_wireguard(
        &self,
        endpoint: &SelectedEndpoint,
        protocol_port: &ProtocolPort,
    ) -> VpnResult<TunnelConfig> {
        let wg_endpoint = endpoint
            .wg_endpoint
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| {
                VpnError::ConfigBuild("node has no WireGuard endpoint address".to_string())
            })?;
        let public_key = endpoint
            .wg_public_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                VpnError::ConfigBuild("location has no WireGuard public key".to_string())
            })?;

        info!(
            "Requesting WireGuard config for {} ({})",
            endpoint.hostname, wg_endpoint
        );
        let text = self
            .wg_exchange
            .request_config(
                &wg_endpoint,
                &endpoint.hostname,
                &public_key,
                &protocol_port.port,
            )
            .await
            .map_err(VpnError::ConfigBuild)?;
        let quick = QuickConfig::parse(&text).map_err(VpnError::ConfigBuild)?;
        Ok(TunnelConfig::WireGuard(quick))
    }

    /// Static-IP credentials take priority over cached account credentials.
    async fn resolve_credentials(
        &self,
        endpoint: &SelectedEndpoint,
        family: BackendFamily,
    ) -> VpnResult<Credentials> {
        if let Some(static_creds) = &endpoint.static_ip_credentials {
            if !static_creds.username.is_empty() && !static_creds.password.is_empty() {
                return Ok(Credentials {
                    username: static_creds.username.clone(),
                    password: static_creds.password.clone(),
                });
            }
        }
        match self.directory.account_credentials(family).await {
            Some(credentials) => {
                let decoded = credentials.decoded();
                if decoded.username.is_empty() || decoded.password.is_empty() {
                    Err(VpnError::CredentialsMissing(family.to_string()))
                } else {
                    Ok(decoded)
                }
            }
            None => Err(VpnError::CredentialsMissing(family.to_string())),
        }
    }
}

fn build_proxy_wrap(
    endpoint: &SelectedEndpoint,
    protocol: Protocol,
    port: &str,
) -> VpnResult<ProxyWrap> {
    let (kind, remote) = match protocol {
        Protocol::Stealth => (WrapKind::Tls, endpoint.wg_endpoint.clone()),
        Protocol::WsTunnel => (WrapKind::WebSocket, endpoint.direct_address.clone()),
        _ => {
            return Err(VpnError::ConfigBuild(format!(
                "{} does not use a proxy wrap",
                protocol
            )));
        }
    };
    let remote_address = remote.filter(|a| !a.is_empty()).ok_or_else(|| {
        VpnError::ConfigBuild(format!("node has no wrap address for {}", protocol))
    })?;
    Ok(ProxyWrap {
        remote_address,
        remote_port: port.to_string(),
        kind,
    })
}

/// Patch the template's `proto`, `remote`, and `verify-x509-name` lines in
/// place (inserting them at the canonical positions when absent), strip stale
/// proxy directives, and append wrap/censorship directives.
fn patch_stream_template(
    template: &str,
    proto: &str,
    address: &str,
    port: &str,
    tls_name: &str,
    proxy: Option<&ProxyWrap>,
    circumvent_censorship: bool,
) -> String {
    let proto_line = format!("proto {}", proto);
    let remote_line = format!("remote {} {}", address, port);
    let tls_line = format!("verify-x509-name {} name", tls_name);

    let mut lines: Vec<String> = template
        .lines()
        .filter(|line| !line.starts_with("local-proxy"))
        .map(str::to_string)
        .collect();

    let mut remote_found = false;
    let mut tls_found = false;
    for line in lines.iter_mut() {
        if line.contains("proto ") {
            *line = proto_line.clone();
            remote_found = true;
        } else if line.contains("remote ") {
            *line = remote_line.clone();
            remote_found = true;
        } else if line.starts_with("verify-x509-name") {
            *line = tls_line.clone();
            tls_found = true;
        }
    }
    if !remote_found {
        let at = lines.len().min(2);
        lines.insert(at, proto_line);
        lines.insert(at + 1, remote_line);
    }
    if !tls_found {
        let at = lines.len().min(4);
        lines.insert(at, tls_line);
    }

    if let Some(proxy) = proxy {
        lines.push(proxy.directive());
    }
    if circumvent_censorship {
        lines.push("udp-stuffing".to_string());
        lines.push("tcp-split-reset".to_string());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::files::MemoryFileStore;
    use crate::locations::{Location, StaticIpCredentials};
    use async_trait::async_trait;

    const TEMPLATE: &str = "client\ndev tun\nproto udp\nremote 0.0.0.0 1194\nverify-x509-name placeholder name\ncipher AES-256-GCM\nlocal-proxy 9.9.9.9 9 tls\n";

    struct FakeDirectory {
        stream: Option<Credentials>,
        ike: Option<Credentials>,
    }

    #[async_trait]
    impl EndpointDirectory for FakeDirectory {
        async fn list_locations(&self) -> Vec<Location> {
            Vec::new()
        }

        async fn account_credentials(&self, family: BackendFamily) -> Option<Credentials> {
            match family {
                BackendFamily::Stream => self.stream.clone(),
                BackendFamily::IkeV2 => self.ike.clone(),
                BackendFamily::WireGuard => None,
            }
        }

        async fn refresh_account_credentials(
            &self,
            family: BackendFamily,
        ) -> Option<Credentials> {
            self.account_credentials(family).await
        }

        async fn static_ip_credentials(&self, _id: u32) -> Option<StaticIpCredentials> {
            None
        }
    }

    struct FakeExchange {
        response: Result<String, String>,
    }

    #[async_trait]
    impl WireGuardExchange for FakeExchange {
        async fn request_config(
            &self,
            _endpoint_address: &str,
            _hostname: &str,
            _server_public_key: &str,
            _port: &str,
        ) -> Result<String, String> {
            self.response.clone()
        }
    }

    fn endpoint() -> SelectedEndpoint {
        SelectedEndpoint {
            country_code: "DE".to_string(),
            dns_hostname: "de.example.net".to_string(),
            hostname: "de-01.example.net".to_string(),
            address: "192.0.2.2".to_string(),
            direct_address: Some("192.0.2.1".to_string()),
            wg_endpoint: Some("1.2.3.4".to_string()),
            nickname: "Brauhaus".to_string(),
            city: "Frankfurt".to_string(),
            group_id: Some(9),
            wg_public_key: Some("server-pub-key".to_string()),
            tls_name: Some("de.example.net".to_string()),
            custom_config: None,
            static_ip_credentials: None,
        }
    }

    fn builder_with(
        directory: FakeDirectory,
        files: MemoryFileStore,
        exchange: FakeExchange,
    ) -> ConfigBuilder {
        ConfigBuilder::new(
            Arc::new(directory),
            Arc::new(MemoryCredentialStore::default()),
            Arc::new(files),
            Arc::new(exchange),
        )
    }

    fn stream_directory() -> FakeDirectory {
        FakeDirectory {
            stream: Some(Credentials {
                username: "user".to_string(),
                password: "pass".to_string(),
            }),
            ike: Some(Credentials {
                username: "ikeuser".to_string(),
                password: "ikepass".to_string(),
            }),
        }
    }

    fn wg_quick_text() -> &'static str {
        "[Interface]\nPrivateKey = priv\nAddress = 10.0.0.2/32\nDNS = 1.1.1.1\n\n[Peer]\nPublicKey = pub\nAllowedIPs = 0.0.0.0/0\nEndpoint = 1.2.3.4:443\nPersistentKeepalive = 25\n"
    }

    #[tokio::test]
    async fn test_plain_udp_build_patches_remote_and_proto() {
        let builder = builder_with(
            stream_directory(),
            MemoryFileStore::with_file(STREAM_CONFIG_PATH, TEMPLATE.as_bytes()),
            FakeExchange {
                response: Err("unused".to_string()),
            },
        );
        let config = builder
            .build(
                &endpoint(),
                &ProtocolPort::new(Protocol::Udp, "443"),
                &UserPolicy::default(),
            )
            .await
            .unwrap();
        let TunnelConfig::Stream(stream) = config else {
            panic!("expected stream config");
        };
        assert_eq!(stream.address, "192.0.2.2");
        assert_eq!(stream.port, "443");
        assert!(stream.proxy.is_none());
        assert!(stream.rendered.contains("proto udp"));
        assert!(stream.rendered.contains("remote 192.0.2.2 443"));
        assert!(
            stream
                .rendered
                .contains("verify-x509-name de.example.net name")
        );
        // Stale proxy directives from a previous wrapped build must be gone.
        assert!(!stream.rendered.contains("9.9.9.9"));
    }

    // Stealth on port 443 with wrap address 1.2.3.4: outer remote goes to the
    // local proxy, and the proxy directive carries 1.2.3.4:443.
    #[tokio::test]
    async fn test_stealth_build_wraps_through_local_proxy() {
        let builder = builder_with(
            stream_directory(),
            MemoryFileStore::with_file(STREAM_CONFIG_PATH, TEMPLATE.as_bytes()),
            FakeExchange {
                response: Err("unused".to_string()),
            },
        );
        let config = builder
            .build(
                &endpoint(),
                &ProtocolPort::new(Protocol::Stealth, "443"),
                &UserPolicy::default(),
            )
            .await
            .unwrap();
        let TunnelConfig::Stream(stream) = config else {
            panic!("expected stream config");
        };
        assert_eq!(stream.address, LOCAL_PROXY_ADDRESS);
        assert_eq!(stream.port, LOCAL_PROXY_PORT);
        let proxy = stream.proxy.as_ref().unwrap();
        assert_eq!(proxy.remote_address, "1.2.3.4");
        assert_eq!(proxy.remote_port, "443");
        assert_eq!(proxy.kind, WrapKind::Tls);
        assert!(stream.rendered.contains("proto tcp"));
        assert!(
            stream
                .rendered
                .contains(&format!("remote {} {}", LOCAL_PROXY_ADDRESS, LOCAL_PROXY_PORT))
        );
        assert!(stream.rendered.contains("local-proxy 1.2.3.4 443 tls"));
    }

    #[tokio::test]
    async fn test_wstunnel_wraps_via_websocket_to_direct_address() {
        let builder = builder_with(
            stream_directory(),
            MemoryFileStore::with_file(STREAM_CONFIG_PATH, TEMPLATE.as_bytes()),
            FakeExchange {
                response: Err("unused".to_string()),
            },
        );
        let config = builder
            .build(
                &endpoint(),
                &ProtocolPort::new(Protocol::WsTunnel, "443"),
                &UserPolicy::default(),
            )
            .await
            .unwrap();
        let TunnelConfig::Stream(stream) = config else {
            panic!("expected stream config");
        };
        let proxy = stream.proxy.unwrap();
        assert_eq!(proxy.kind, WrapKind::WebSocket);
        assert_eq!(proxy.remote_address, "192.0.2.1");
    }

    #[tokio::test]
    async fn test_censorship_circumvention_appends_directives() {
        let builder = builder_with(
            stream_directory(),
            MemoryFileStore::with_file(STREAM_CONFIG_PATH, TEMPLATE.as_bytes()),
            FakeExchange {
                response: Err("unused".to_string()),
            },
        );
        let policy = UserPolicy {
            circumvent_censorship: true,
            ..Default::default()
        };
        let config = builder
            .build(&endpoint(), &ProtocolPort::new(Protocol::Udp, "443"), &policy)
            .await
            .unwrap();
        let TunnelConfig::Stream(stream) = config else {
            panic!("expected stream config");
        };
        assert!(stream.rendered.contains("udp-stuffing"));
        assert!(stream.rendered.contains("tcp-split-reset"));
    }

    #[tokio::test]
    async fn test_missing_template_fails_build_without_writing() {
        let files = MemoryFileStore::default();
        let builder = ConfigBuilder::new(
            Arc::new(stream_directory()),
            Arc::new(MemoryCredentialStore::default()),
            Arc::new(files),
            Arc::new(FakeExchange {
                response: Err("unused".to_string()),
            }),
        );
        let err = builder
            .build(
                &endpoint(),
                &ProtocolPort::new(Protocol::Udp, "443"),
                &UserPolicy::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VpnError::ConfigBuild(_)));
    }

    #[tokio::test]
    async fn test_missing_stream_credentials_is_hard_failure() {
        let builder = builder_with(
            FakeDirectory {
                stream: None,
                ike: None,
            },
            MemoryFileStore::with_file(STREAM_CONFIG_PATH, TEMPLATE.as_bytes()),
            FakeExchange {
                response: Err("unused".to_string()),
            },
        );
        let err = builder
            .build(
                &endpoint(),
                &ProtocolPort::new(Protocol::Udp, "443"),
                &UserPolicy::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VpnError::CredentialsMissing(_)));
    }

    #[tokio::test]
    async fn test_static_ip_credentials_beat_account_credentials() {
        let mut ep = endpoint();
        ep.static_ip_credentials = Some(StaticIpCredentials {
            username: "dedicated".to_string(),
            password: "dedicated-pw".to_string(),
        });
        let builder = builder_with(
            stream_directory(),
            MemoryFileStore::with_file(STREAM_CONFIG_PATH, TEMPLATE.as_bytes()),
            FakeExchange {
                response: Err("unused".to_string()),
            },
        );
        let config = builder
            .build(&ep, &ProtocolPort::new(Protocol::Udp, "443"), &UserPolicy::default())
            .await
            .unwrap();
        let TunnelConfig::Stream(stream) = config else {
            panic!("expected stream config");
        };
        assert_eq!(stream.credentials.unwrap().username, "dedicated");
    }

    #[tokio::test]
    async fn test_ike_build_packages_hostname_and_direct_address() {
        let builder = builder_with(
            stream_directory(),
            MemoryFileStore::default(),
            FakeExchange {
                response: Err("unused".to_string()),
            },
        );
        let config = builder
            .build(
                &endpoint(),
                &ProtocolPort::new(Protocol::IkeV2, "500"),
                &UserPolicy::default(),
            )
            .await
            .unwrap();
        let TunnelConfig::Ike(ike) = config else {
            panic!("expected IKE config");
        };
        assert_eq!(ike.username, "ikeuser");
        assert_eq!(ike.hostname, "de-01.example.net");
        assert_eq!(ike.address, "192.0.2.1");
        assert_eq!(ike.password_ref, SecretRef("ikeuser".to_string()));
    }

    #[tokio::test]
    async fn test_wireguard_build_requests_and_parses_config() {
        let builder = builder_with(
            stream_directory(),
            MemoryFileStore::default(),
            FakeExchange {
                response: Ok(wg_quick_text().to_string()),
            },
        );
        let config = builder
            .build(
                &endpoint(),
                &ProtocolPort::new(Protocol::WireGuard, "443"),
                &UserPolicy::default(),
            )
            .await
            .unwrap();
        let TunnelConfig::WireGuard(quick) = config else {
            panic!("expected WireGuard config");
        };
        assert_eq!(quick.endpoint, "1.2.3.4:443");
        assert_eq!(quick.peer_public_key, "pub");
        assert_eq!(quick.keepalive, Some(25));
    }

    #[tokio::test]
    async fn test_wireguard_parse_failure_is_config_build_error() {
        let builder = builder_with(
            stream_directory(),
            MemoryFileStore::default(),
            FakeExchange {
                response: Ok("[Interface]\nAddress = 10.0.0.2/32\n".to_string()),
            },
        );
        let err = builder
            .build(
                &endpoint(),
                &ProtocolPort::new(Protocol::WireGuard, "443"),
                &UserPolicy::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VpnError::ConfigBuild(_)));
    }

    #[tokio::test]
    async fn test_custom_config_ike_is_unsupported() {
        use crate::locations::CustomConfigLocation;
        let mut ep = endpoint();
        ep.custom_config = Some(CustomConfigLocation {
            id: "abc".to_string(),
            name: "Imported".to_string(),
            protocol: Protocol::IkeV2,
            port: "500".to_string(),
            server_address: "203.0.113.5".to_string(),
            auth_required: false,
            username: None,
            password: None,
            config_text: String::new(),
        });
        let builder = builder_with(
            stream_directory(),
            MemoryFileStore::default(),
            FakeExchange {
                response: Err("unused".to_string()),
            },
        );
        let err = builder
            .build(&ep, &ProtocolPort::new(Protocol::IkeV2, "500"), &UserPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VpnError::ConfigBuild(_)));
    }

    #[tokio::test]
    async fn test_custom_config_without_required_auth_fails() {
        use crate::locations::CustomConfigLocation;
        let mut ep = endpoint();
        ep.custom_config = Some(CustomConfigLocation {
            id: "abc".to_string(),
            name: "Imported".to_string(),
            protocol: Protocol::Udp,
            port: "1194".to_string(),
            server_address: "203.0.113.5".to_string(),
            auth_required: true,
            username: None,
            password: None,
            config_text: "client".to_string(),
        });
        let builder = builder_with(
            stream_directory(),
            MemoryFileStore::default(),
            FakeExchange {
                response: Err("unused".to_string()),
            },
        );
        let err = builder
            .build(&ep, &ProtocolPort::new(Protocol::Udp, "1194"), &UserPolicy::default())
            .await
            .unwrap_err();
        assert_eq!(err, VpnError::CredentialsMissing("Imported".to_string()));
    }

    #[tokio::test]
    async fn test_custom_config_auth_not_required_builds_without_credentials() {
        use crate::locations::CustomConfigLocation;
        let mut ep = endpoint();
        ep.custom_config = Some(CustomConfigLocation {
            id: "abc".to_string(),
            name: "Imported".to_string(),
            protocol: Protocol::Tcp,
            port: "443".to_string(),
            server_address: "203.0.113.5".to_string(),
            auth_required: false,
            username: None,
            password: None,
            config_text: "client".to_string(),
        });
        let builder = builder_with(
            stream_directory(),
            MemoryFileStore::default(),
            FakeExchange {
                response: Err("unused".to_string()),
            },
        );
        let config = builder
            .build(&ep, &ProtocolPort::new(Protocol::Tcp, "443"), &UserPolicy::default())
            .await
            .unwrap();
        let TunnelConfig::Stream(stream) = config else {
            panic!("expected stream config");
        };
        assert!(stream.credentials.is_none());
    }

    #[test]
    fn test_quick_config_parse_full() {
        let quick = QuickConfig::parse(wg_quick_text()).unwrap();
        assert_eq!(quick.private_key, "priv");
        assert_eq!(quick.addresses, vec!["10.0.0.2/32"]);
        assert_eq!(quick.dns, vec!["1.1.1.1"]);
        assert_eq!(quick.allowed_ips, vec!["0.0.0.0/0"]);
    }

    #[test]
    fn test_quick_config_parse_missing_endpoint() {
        let text = "[Interface]\nPrivateKey = priv\n[Peer]\nPublicKey = pub\n";
        assert!(QuickConfig::parse(text).is_err());
    }

    #[test]
    fn test_template_insertion_when_lines_absent() {
        let template = "client\ndev tun\ncipher AES-256-GCM";
        let rendered =
            patch_stream_template(template, "udp", "192.0.2.2", "443", "x.example", None, false);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[2], "proto udp");
        assert_eq!(lines[3], "remote 192.0.2.2 443");
        assert_eq!(lines[4], "verify-x509-name x.example name");
    }

    #[test]
    fn test_template_patch_is_idempotent() {
        let once = patch_stream_template(TEMPLATE, "tcp", "1.1.1.1", "80", "n", None, false);
        let twice = patch_stream_template(&once, "tcp", "1.1.1.1", "80", "n", None, false);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_remote_address_present_for_all_variants() {
        let quick = QuickConfig::parse(wg_quick_text()).unwrap();
        assert_eq!(
            TunnelConfig::WireGuard(quick).remote_address(),
            Some("1.2.3.4:443")
        );

        let ike = TunnelConfig::Ike(IkeConfig {
            username: "u".to_string(),
            password_ref: SecretRef("u".to_string()),
            hostname: "h".to_string(),
            address: String::new(),
        });
        assert_eq!(ike.remote_address(), None);
    }
}
