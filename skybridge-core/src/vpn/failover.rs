//! Failure-to-recovery mapping
//!
//! One controller instance lives for the duration of a connect request and
//! decides, per terminal attempt failure, whether and how to try again.

use log::info;

use super::VpnError;

/// Hard ceiling on attempts per connect request. The recovery ladder
/// (credential refresh, node swap, full protocol rotation) fits well within
/// this; anything beyond it is churn.
pub const MAX_ATTEMPTS: u32 = 8;

/// What to do about a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Refresh credentials for the active family, retry same node/protocol.
    RefreshCredentials,
    /// Select a different node in the same location, same protocol.
    SwitchNode,
    /// Advance the protocol rotation and retry.
    AdvanceProtocol,
    /// Surface the failure to the caller.
    Fail,
}

pub struct FailoverController {
    attempts: u32,
    timeout_count: u32,
    auth_retry_used: bool,
}

impl FailoverController {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            timeout_count: 0,
            auth_retry_used: false,
        }
    }

    /// Decide the recovery action for a finished attempt's failure.
    pub fn next_action(&mut self, error: &VpnError) -> RecoveryAction {
        self.attempts += 1;
        if self.attempts >= MAX_ATTEMPTS {
            info!("Attempt ceiling reached, surfacing failure");
            return RecoveryAction::Fail;
        }
        match error {
            VpnError::AuthFailure => {
                // Never silently retried with the same credentials, and the
                // refresh is only worth one shot.
                if self.auth_retry_used {
                    RecoveryAction::Fail
                } else {
                    self.auth_retry_used = true;
                    RecoveryAction::RefreshCredentials
                }
            }
            VpnError::Timeout => {
                self.timeout_count += 1;
                if self.timeout_count == 1 {
                    RecoveryAction::SwitchNode
                } else {
                    RecoveryAction::AdvanceProtocol
                }
            }
            VpnError::ConnectivityTestFailed => RecoveryAction::AdvanceProtocol,
            VpnError::LocationNotFound(_)
            | VpnError::NoValidNode
            | VpnError::CredentialsMissing(_)
            | VpnError::ConfigBuild(_)
            | VpnError::Cancelled => RecoveryAction::Fail,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for FailoverController {
    fn default() -> Self {
        Self::new()
    }
}
