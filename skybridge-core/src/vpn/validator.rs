//! Post-connect connectivity validation
//!
//! Once the backend reports connected, the tunnel still has to prove it can
//! reach the outside world. The validator fetches the observed public address
//! with bounded retries; locations with a dedicated address expectation also
//! get a non-fatal mismatch check.

use async_trait::async_trait;
use log::{info, warn};
use std::time::Duration;
use tokio::sync::watch;

use super::{VpnError, VpnResult};

/// Probe attempts before giving up.
pub const MAX_PROBE_ATTEMPTS: u32 = 3;

/// Delay between probe attempts.
pub const PROBE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// External-reachability probe.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// The public address this client currently surfaces as.
    async fn external_address(&self) -> Result<String, String>;
}

/// Probe hitting an address-echo endpoint over HTTPS.
pub struct HttpAddressProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpAddressProbe {
    pub fn new(url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl ConnectivityProbe for HttpAddressProbe {
    async fn external_address(&self) -> Result<String, String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("address probe returned {}", response.status()));
        }
        let body = response.text().await.map_err(|e| e.to_string())?;
        let address = body.trim().to_string();
        if address.is_empty() {
            return Err("address probe returned an empty body".to_string());
        }
        Ok(address)
    }
}

/// Successful validation result.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConnection {
    pub address: String,
    /// Set when the observed address differs from the location's dedicated
    /// address. Informational only; it never fails the attempt.
    pub pinned_mismatch: Option<String>,
}

/// Run the probe with retries. Success short-circuits; exhausting all
/// attempts is `ConnectivityTestFailed`. The cancel signal aborts the
/// in-between delays immediately.
pub async fn validate_connection(
    probe: &dyn ConnectivityProbe,
    expected_address: Option<&str>,
    cancel: &mut watch::Receiver<bool>,
) -> VpnResult<ValidatedConnection> {
    for attempt in 1..=MAX_PROBE_ATTEMPTS {
        if *cancel.borrow() {
            return Err(VpnError::Cancelled);
        }
        match probe.external_address().await {
            Ok(address) => {
                info!("Connectivity test passed, observed address {}", address);
                let pinned_mismatch = expected_address.and_then(|expected| {
                    if expected != address {
                        warn!(
                            "Observed address {} differs from dedicated address {}",
                            address, expected
                        );
                        Some(expected.to_string())
                    } else {
                        None
                    }
                });
                return Ok(ValidatedConnection {
                    address,
                    pinned_mismatch,
                });
            }
            Err(e) => {
                warn!(
                    "Connectivity test attempt {}/{} failed: {}",
                    attempt, MAX_PROBE_ATTEMPTS, e
                );
                if attempt == MAX_PROBE_ATTEMPTS {
                    return Err(VpnError::ConnectivityTestFailed);
                }
                tokio::select! {
                    _ = tokio::time::sleep(PROBE_RETRY_DELAY) => {}
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            return Err(VpnError::Cancelled);
                        }
                    }
                }
            }
        }
    }
    Err(VpnError::ConnectivityTestFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct ScriptedProbe {
        responses: Mutex<Vec<Result<String, String>>>,
    }

    impl ScriptedProbe {
        fn new(responses: Vec<Result<String, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl ConnectivityProbe for ScriptedProbe {
        async fn external_address(&self) -> Result<String, String> {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Err("exhausted".to_string())
            } else {
                responses.remove(0)
            }
        }
    }

    fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_first_probe_success_short_circuits() {
        let probe = ScriptedProbe::new(vec![Ok("203.0.113.9".to_string())]);
        let (_tx, mut rx) = cancel_channel();
        let result = validate_connection(&probe, None, &mut rx).await.unwrap();
        assert_eq!(result.address, "203.0.113.9");
        assert!(result.pinned_mismatch.is_none());
    }

    // Two failures then a success on the third (of 3) attempt still validates.
    #[tokio::test(start_paused = true)]
    async fn test_third_attempt_success_validates() {
        let probe = ScriptedProbe::new(vec![
            Err("unreachable".to_string()),
            Err("unreachable".to_string()),
            Ok("203.0.113.9".to_string()),
        ]);
        let (_tx, mut rx) = cancel_channel();
        let result = validate_connection(&probe, None, &mut rx).await.unwrap();
        assert_eq!(result.address, "203.0.113.9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_fail() {
        let probe = ScriptedProbe::new(vec![
            Err("a".to_string()),
            Err("b".to_string()),
            Err("c".to_string()),
        ]);
        let (_tx, mut rx) = cancel_channel();
        assert_eq!(
            validate_connection(&probe, None, &mut rx).await.unwrap_err(),
            VpnError::ConnectivityTestFailed
        );
    }

    #[tokio::test]
    async fn test_pinned_mismatch_is_non_fatal() {
        let probe = ScriptedProbe::new(vec![Ok("198.51.100.1".to_string())]);
        let (_tx, mut rx) = cancel_channel();
        let result = validate_connection(&probe, Some("203.0.113.9"), &mut rx)
            .await
            .unwrap();
        assert_eq!(result.address, "198.51.100.1");
        assert_eq!(result.pinned_mismatch.as_deref(), Some("203.0.113.9"));
    }

    #[tokio::test]
    async fn test_pinned_match_reports_no_mismatch() {
        let probe = ScriptedProbe::new(vec![Ok("203.0.113.9".to_string())]);
        let (_tx, mut rx) = cancel_channel();
        let result = validate_connection(&probe, Some("203.0.113.9"), &mut rx)
            .await
            .unwrap();
        assert!(result.pinned_mismatch.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_between_attempts() {
        let probe = ScriptedProbe::new(vec![
            Err("unreachable".to_string()),
            Ok("203.0.113.9".to_string()),
        ]);
        let (tx, mut rx) = cancel_channel();
        tx.send(true).unwrap();
        assert_eq!(
            validate_connection(&probe, None, &mut rx).await.unwrap_err(),
            VpnError::Cancelled
        );
    }
}
