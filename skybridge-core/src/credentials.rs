//! Secure credential storage
//!
//! Tunnel profiles never embed passwords directly; they reference an entry in
//! the OS credential store. [`KeyringStore`] talks to the platform keyring and
//! degrades to an in-memory map when the keyring is unavailable (headless CI,
//! locked keychains), matching how the rest of the app treats the keyring as
//! best-effort.

use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;

const SERVICE_NAME: &str = "Skybridge";

/// Opaque reference to a stored secret, resolved by the tunnel backend at
/// connection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef(pub String);

/// Store for tunnel credentials.
pub trait CredentialStore: Send + Sync {
    fn save(&self, username: &str, password: &str) -> Result<(), String>;

    /// Reference to a previously saved secret, if present.
    fn retrieve(&self, username: &str) -> Option<SecretRef>;
}

/// OS-keyring-backed credential store with in-memory fallback.
pub struct KeyringStore {
    fallback: Mutex<HashMap<String, String>>,
    keyring_available: bool,
}

impl KeyringStore {
    pub fn new() -> Self {
        // Probe once; per-entry failures still fall back individually.
        let keyring_available = keyring::Entry::new(SERVICE_NAME, "probe").is_ok();
        if !keyring_available {
            warn!("OS keyring unavailable, using in-memory credential storage");
        }
        Self {
            fallback: Mutex::new(HashMap::new()),
            keyring_available,
        }
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn save(&self, username: &str, password: &str) -> Result<(), String> {
        if self.keyring_available {
            match keyring::Entry::new(SERVICE_NAME, username) {
                Ok(entry) => {
                    if let Err(e) = entry.set_password(password) {
                        warn!("Keyring write failed for {}: {}", username, e);
                    } else {
                        return Ok(());
                    }
                }
                Err(e) => warn!("Keyring entry creation failed for {}: {}", username, e),
            }
        }
        self.fallback
            .lock()
            .insert(username.to_string(), password.to_string());
        Ok(())
    }

    fn retrieve(&self, username: &str) -> Option<SecretRef> {
        if self.keyring_available {
            if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, username) {
                if entry.get_password().is_ok() {
                    return Some(SecretRef(username.to_string()));
                }
            }
        }
        if self.fallback.lock().contains_key(username) {
            return Some(SecretRef(username.to_string()));
        }
        None
    }
}

/// In-memory credential store for tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, String>>,
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, username: &str, password: &str) -> Result<(), String> {
        self.entries
            .lock()
            .insert(username.to_string(), password.to_string());
        Ok(())
    }

    fn retrieve(&self, username: &str) -> Option<SecretRef> {
        self.entries
            .lock()
            .contains_key(username)
            .then(|| SecretRef(username.to_string()))
    }
}
