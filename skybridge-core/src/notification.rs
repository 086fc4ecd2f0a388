//! Connection lifecycle notifications
//!
//! Fire-and-forget sink the app shell implements to surface toasts/banners.
//! The core only reports edges; presentation is out of scope.

use crate::locations::SelectedEndpoint;
use log::info;

pub trait NotificationSink: Send + Sync {
    fn connecting(&self);
    fn connected(&self, address: &str);
    fn disconnecting(&self);
    fn disconnected(&self);
    fn endpoint_changed(&self, endpoint: &SelectedEndpoint);
}

/// Default sink that only logs. Useful for headless runs and tests.
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn connecting(&self) {
        info!("Notification: connecting");
    }

    fn connected(&self, address: &str) {
        info!("Notification: connected ({})", address);
    }

    fn disconnecting(&self) {
        info!("Notification: disconnecting");
    }

    fn disconnected(&self) {
        info!("Notification: disconnected");
    }

    fn endpoint_changed(&self, endpoint: &SelectedEndpoint) {
        info!(
            "Notification: endpoint changed to {} ({})",
            endpoint.hostname, endpoint.city
        );
    }
}
