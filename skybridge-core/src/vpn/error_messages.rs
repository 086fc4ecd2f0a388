//! User-Friendly Error Messages
//!
//! Converts connection errors into human-readable messages suitable for
//! display by the app shell. These messages guide users toward solutions
//! rather than exposing internal error detail.

use super::VpnError;

/// Convert a connection error into a user-friendly message.
pub fn user_friendly_error(error: &VpnError) -> String {
    match error {
        VpnError::LocationNotFound(_) => {
            "Selected location is no longer available.\n\nPlease pick another location and try again.".to_string()
        }

        VpnError::NoValidNode => {
            "All servers in this location are under maintenance.\n\nPlease pick another location or try again later.".to_string()
        }

        VpnError::CredentialsMissing(what) => {
            format!("Missing credentials for {}.\n\nPlease sign out and sign in again.", what)
        }

        VpnError::ConfigBuild(msg) => {
            format!("Could not prepare the connection.\n\n{}", simplify_message(msg))
        }

        VpnError::AuthFailure => {
            "The server rejected your credentials.\n\nPlease sign out and sign in again.".to_string()
        }

        VpnError::Timeout => {
            "Connection timed out.\n\nThe server may be busy; try another location or protocol.".to_string()
        }

        VpnError::ConnectivityTestFailed => {
            "Connected, but no internet access through the tunnel.\n\nTry another protocol or location.".to_string()
        }

        VpnError::Cancelled => "Connection cancelled.".to_string(),
    }
}

/// Truncate overly long technical detail.
fn simplify_message(msg: &str) -> String {
    if msg.len() > 200 {
        format!("{}...", &msg[..197])
    } else {
        msg.to_string()
    }
}

/// Convert an error to a short status message (for status bars).
pub fn short_error(error: &VpnError) -> &'static str {
    match error {
        VpnError::LocationNotFound(_) => "Location unavailable",
        VpnError::NoValidNode => "No servers available",
        VpnError::CredentialsMissing(_) => "Missing credentials",
        VpnError::ConfigBuild(_) => "Config build failed",
        VpnError::AuthFailure => "Authentication failed",
        VpnError::Timeout => "Connection timed out",
        VpnError::ConnectivityTestFailed => "Connectivity test failed",
        VpnError::Cancelled => "Cancelled",
    }
}
