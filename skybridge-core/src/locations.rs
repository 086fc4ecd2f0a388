//! Endpoint directory models
//!
//! Locations come in three flavors: directory server groups (country/city with
//! a node pool), static-IP locations (one dedicated node with its own
//! credentials), and user-imported custom configs. The directory itself is an
//! external collaborator behind the [`EndpointDirectory`] trait.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::vpn::protocol::{BackendFamily, Protocol};

/// A single tunnel endpoint host inside a location.
///
/// Nodes carry up to three candidate addresses: the primary address used for
/// plain stream-tunnel connections, a legacy direct address used by IKE-style
/// profiles and WebSocket wrapping, and a WireGuard endpoint address also used
/// for TLS wrapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub hostname: String,
    /// Primary connect address.
    pub address: String,
    /// Legacy direct address (IKE profiles, WebSocket wrap target).
    #[serde(default)]
    pub direct_address: Option<String>,
    /// WireGuard endpoint address (also the TLS wrap target).
    #[serde(default)]
    pub wg_endpoint: Option<String>,
    /// Relative selection weight. Zero-weight nodes are only picked as a
    /// last-resort fallback.
    #[serde(default)]
    pub weight: u32,
    /// Node is draining / under maintenance and must not be selected.
    #[serde(default)]
    pub force_disconnect: bool,
}

/// Directory server group: one city within a country, holding a node pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerGroup {
    pub id: u32,
    pub country_code: String,
    pub city: String,
    pub nickname: String,
    pub dns_hostname: String,
    /// Server-side WireGuard public key for the whole group.
    #[serde(default)]
    pub wg_public_key: Option<String>,
    /// TLS certificate name the stream-tunnel config must verify.
    #[serde(default)]
    pub tls_name: Option<String>,
    pub nodes: Vec<Node>,
}

/// Username/password pair dedicated to a static-IP location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticIpCredentials {
    pub username: String,
    pub password: String,
}

/// A location bound to one dedicated node, independent of the general
/// directory, with its own credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticIpLocation {
    pub id: u32,
    pub country_code: String,
    pub city: String,
    pub name: String,
    /// The dedicated public address the connection is expected to surface as.
    pub static_address: String,
    pub node: Node,
    pub credentials: StaticIpCredentials,
    #[serde(default)]
    pub wg_public_key: Option<String>,
    #[serde(default)]
    pub tls_name: Option<String>,
}

/// A user-imported tunnel profile, bypassing directory-driven node selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomConfigLocation {
    pub id: String,
    pub name: String,
    /// Protocol the imported profile speaks.
    pub protocol: Protocol,
    pub port: String,
    pub server_address: String,
    /// Whether the profile requires username/password authentication.
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// The imported profile text itself.
    pub config_text: String,
}

/// One of the three location kinds. Exactly one applies per connect request.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Group(ServerGroup),
    StaticIp(StaticIpLocation),
    Custom(CustomConfigLocation),
}

/// Typed location reference, discriminated by an id prefix:
/// `static:<id>`, `custom:<id>`, or a bare numeric group id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocationId {
    Group(u32),
    StaticIp(u32),
    Custom(String),
}

impl LocationId {
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(rest) = raw.strip_prefix("static:") {
            return rest.parse().ok().map(LocationId::StaticIp);
        }
        if let Some(rest) = raw.strip_prefix("custom:") {
            if rest.is_empty() {
                return None;
            }
            return Some(LocationId::Custom(rest.to_string()));
        }
        raw.parse().ok().map(LocationId::Group)
    }
}

impl std::fmt::Display for LocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationId::Group(id) => write!(f, "{}", id),
            LocationId::StaticIp(id) => write!(f, "static:{}", id),
            LocationId::Custom(id) => write!(f, "custom:{}", id),
        }
    }
}

/// Account credentials cached from the directory service.
///
/// The directory delivers these base64-encoded; [`Credentials::decoded`]
/// falls back to the raw value when the payload is not valid base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn decoded(&self) -> Credentials {
        Credentials {
            username: decode_or_raw(&self.username),
            password: decode_or_raw(&self.password),
        }
    }
}

fn decode_or_raw(value: &str) -> String {
    match BASE64.decode(value) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(s) if !s.is_empty() => s,
            _ => value.to_string(),
        },
        Err(_) => value.to_string(),
    }
}

/// Immutable snapshot of the endpoint chosen for one connection attempt.
///
/// Produced once by node selection, consumed read-only by the config builder,
/// and replaced (never mutated) when recovery switches nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedEndpoint {
    pub country_code: String,
    pub dns_hostname: String,
    pub hostname: String,
    pub address: String,
    pub direct_address: Option<String>,
    pub wg_endpoint: Option<String>,
    pub nickname: String,
    pub city: String,
    pub group_id: Option<u32>,
    pub wg_public_key: Option<String>,
    pub tls_name: Option<String>,
    pub custom_config: Option<CustomConfigLocation>,
    pub static_ip_credentials: Option<StaticIpCredentials>,
}

/// External directory of servers, static IPs, and imported configs.
#[async_trait]
pub trait EndpointDirectory: Send + Sync {
    async fn list_locations(&self) -> Vec<Location>;

    /// Cached account credentials for a protocol family, if any.
    async fn account_credentials(&self, family: BackendFamily) -> Option<Credentials>;

    /// Force a fresh fetch of account credentials from the directory
    /// service. Used after the server rejects the cached pair.
    async fn refresh_account_credentials(&self, family: BackendFamily) -> Option<Credentials>;

    /// Dedicated credentials for a static-IP location.
    async fn static_ip_credentials(&self, location_id: u32) -> Option<StaticIpCredentials>;

    /// Look up a single location by reference.
    async fn location(&self, id: &LocationId) -> Option<Location> {
        let locations = self.list_locations().await;
        locations.into_iter().find(|location| match (location, id) {
            (Location::Group(g), LocationId::Group(want)) => g.id == *want,
            (Location::StaticIp(s), LocationId::StaticIp(want)) => s.id == *want,
            (Location::Custom(c), LocationId::Custom(want)) => c.id == *want,
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn test_location_id_parse_group() {
        assert_eq!(LocationId::parse("42"), Some(LocationId::Group(42)));
    }

    #[test]
    fn test_location_id_parse_static() {
        assert_eq!(LocationId::parse("static:7"), Some(LocationId::StaticIp(7)));
    }

    #[test]
    fn test_location_id_parse_custom() {
        assert_eq!(
            LocationId::parse("custom:my-profile"),
            Some(LocationId::Custom("my-profile".to_string()))
        );
    }

    #[test]
    fn test_location_id_parse_rejects_garbage() {
        assert_eq!(LocationId::parse("static:abc"), None);
        assert_eq!(LocationId::parse("custom:"), None);
        assert_eq!(LocationId::parse("not-a-number"), None);
    }

    #[test]
    fn test_location_id_roundtrip_display() {
        for raw in ["12", "static:3", "custom:abc"] {
            let id = LocationId::parse(raw).unwrap();
            assert_eq!(id.to_string(), raw);
        }
    }

    #[test]
    fn test_credentials_decoded_from_base64() {
        let creds = Credentials {
            username: BASE64.encode("alice"),
            password: BASE64.encode("s3cret"),
        };
        let decoded = creds.decoded();
        assert_eq!(decoded.username, "alice");
        assert_eq!(decoded.password, "s3cret");
    }

    #[test]
    fn test_credentials_decoded_falls_back_to_raw() {
        // Not valid base64: keep the raw value rather than erroring out.
        let creds = Credentials {
            username: "plain_user!".to_string(),
            password: "plain_pass!".to_string(),
        };
        let decoded = creds.decoded();
        assert_eq!(decoded.username, "plain_user!");
        assert_eq!(decoded.password, "plain_pass!");
    }

    #[test]
    fn test_node_deserialize_defaults() {
        let json = r#"{"hostname": "fr-01.example.net", "address": "203.0.113.10"}"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.weight, 0);
        assert!(!node.force_disconnect);
        assert!(node.direct_address.is_none());
        assert!(node.wg_endpoint.is_none());
    }
}
