//! Settings persistence module
//!
//! Saves and loads connection preferences to/from disk. Legacy fields and
//! missing keys deserialize to defaults so old settings files keep working.

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::vpn::policy::UserPolicy;
use crate::vpn::protocol::{Protocol, ProtocolPort};
use crate::vpn::protocol_policy::{ConnectionMode, ProtocolPolicy};

const SETTINGS_FILE: &str = "settings.json";
const APP_NAME: &str = "Skybridge";

/// Per-Wi-Fi protocol preference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferredProtocolEntry {
    pub protocol: Protocol,
    pub port: String,
    pub enabled: bool,
}

/// Connection preferences persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Connection mode: "auto" or "manual"
    #[serde(default = "default_connection_mode")]
    pub connection_mode: String,
    /// Protocol used in manual mode
    #[serde(default = "default_protocol")]
    pub manual_protocol: Protocol,
    /// Port used in manual mode
    #[serde(default = "default_port")]
    pub manual_port: String,
    /// Restrict all traffic to the tunnel interface
    #[serde(default)]
    pub kill_switch: bool,
    /// Keep local-subnet traffic outside the tunnel
    #[serde(default = "default_allow_lan")]
    pub allow_lan: bool,
    /// Append censorship-circumvention directives to stream configs
    #[serde(default)]
    pub circumvent_censorship: bool,
    /// Wi-Fi networks the tunnel should drop on
    #[serde(default)]
    pub untrusted_wifi: Vec<String>,
    /// Drop the tunnel on cellular
    #[serde(default)]
    pub untrusted_cellular: bool,
    /// Per-network preferred protocol overrides, keyed by SSID
    #[serde(default)]
    pub preferred_protocols: HashMap<String, PreferredProtocolEntry>,
    /// Last location the user connected to (for reconnect on launch)
    #[serde(default)]
    pub last_location: Option<String>,
    /// Debug override: always connect to this node
    #[serde(default)]
    pub forced_node: Option<String>,
}

fn default_connection_mode() -> String {
    "auto".to_string()
}

fn default_protocol() -> Protocol {
    Protocol::WireGuard
}

fn default_port() -> String {
    "443".to_string()
}

fn default_allow_lan() -> bool {
    true
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            connection_mode: default_connection_mode(),
            manual_protocol: default_protocol(),
            manual_port: default_port(),
            kill_switch: false,
            allow_lan: default_allow_lan(),
            circumvent_censorship: false,
            untrusted_wifi: Vec::new(),
            untrusted_cellular: false,
            preferred_protocols: HashMap::new(),
            last_location: None,
            forced_node: None,
        }
    }
}

impl AppSettings {
    /// Attempt-scoped user policy for a connect request.
    /// `local_address_is_private` comes from a live interface check, not
    /// from settings.
    pub fn user_policy(&self, local_address_is_private: bool) -> UserPolicy {
        UserPolicy {
            kill_switch: self.kill_switch,
            allow_lan: self.allow_lan,
            local_address_is_private,
            circumvent_censorship: self.circumvent_censorship,
            untrusted_wifi: self.untrusted_wifi.clone(),
            untrusted_cellular: self.untrusted_cellular,
        }
    }

    /// Protocol policy seeded from these settings.
    pub fn protocol_policy(&self) -> ProtocolPolicy {
        let mode = if self.connection_mode == "manual" {
            ConnectionMode::Manual
        } else {
            ConnectionMode::Automatic
        };
        ProtocolPolicy::new(
            mode,
            ProtocolPort::new(self.manual_protocol, &self.manual_port),
        )
    }
}

/// Get the settings directory path
fn get_settings_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME))
}

fn get_settings_path() -> Option<PathBuf> {
    get_settings_dir().map(|p| p.join(SETTINGS_FILE))
}

/// Load settings from disk
pub fn load_settings() -> AppSettings {
    let path = match get_settings_path() {
        Some(p) => p,
        None => {
            debug!("Could not determine settings path, using defaults");
            return AppSettings::default();
        }
    };

    if !path.exists() {
        debug!("Settings file does not exist, using defaults");
        return AppSettings::default();
    }

    match fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(settings) => {
                info!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                error!("Failed to parse settings file: {}", e);
                AppSettings::default()
            }
        },
        Err(e) => {
            error!("Failed to read settings file: {}", e);
            AppSettings::default()
        }
    }
}

/// Save settings to disk
pub fn save_settings(settings: &AppSettings) -> Result<(), String> {
    let dir = match get_settings_dir() {
        Some(d) => d,
        None => return Err("Could not determine settings directory".to_string()),
    };

    if !dir.exists() {
        if let Err(e) = fs::create_dir_all(&dir) {
            return Err(format!("Failed to create settings directory: {}", e));
        }
    }

    let path = dir.join(SETTINGS_FILE);

    let json = match serde_json::to_string_pretty(settings) {
        Ok(j) => j,
        Err(e) => return Err(format!("Failed to serialize settings: {}", e)),
    };

    match fs::write(&path, json) {
        Ok(_) => {
            info!("Saved settings to {:?}", path);
            Ok(())
        }
        Err(e) => Err(format!("Failed to write settings file: {}", e)),
    }
}
