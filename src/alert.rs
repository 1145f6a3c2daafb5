//! Local alert side-channel: desktop notification plus an audible bell.

use crate::store::{Notification, SystemId};
use anyhow::{Context, Result, anyhow};
use notify_rust::Notification as DesktopNotification;
use std::future::Future;
use std::io::Write;
use tracing::warn;

/// How long the desktop notification stays up, in milliseconds.
const DESKTOP_TIMEOUT_MS: i32 = 8000;

pub trait Notifier: Send + Sync + 'static {
    /// Surface one alert on this host. Fire-and-forget: the caller logs a
    /// failure and moves on.
    fn notify(
        &self,
        system_id: SystemId,
        notification: &Notification,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub fn alert_title(system_id: SystemId, notification: &Notification) -> String {
    format!("{} Alert (System {})", notification.risk_level, system_id)
}

#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    sound: bool,
}

impl DesktopNotifier {
    pub fn new(sound: bool) -> Self {
        Self { sound }
    }

    fn ring_bell() {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(b"\x07");
        let _ = stdout.flush();
    }
}

impl Notifier for DesktopNotifier {
    async fn notify(&self, system_id: SystemId, notification: &Notification) -> Result<()> {
        let title = alert_title(system_id, notification);
        let body = notification.message.clone();

        warn!(
            notification_id = notification.id,
            risk_level = %notification.risk_level,
            "Alert: {}",
            body
        );

        if self.sound {
            Self::ring_bell();
        }

        // Desktop backends block (D-Bus on Linux)
        tokio::task::spawn_blocking(move || {
            DesktopNotification::new()
                .summary(&title)
                .body(&body)
                .timeout(DESKTOP_TIMEOUT_MS)
                .show()
                .map(|_| ())
                .map_err(|e| anyhow!("failed to show desktop notification: {}", e))
        })
        .await
        .context("desktop notification task panicked")?
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NotificationStatus;

    #[test]
    fn test_alert_title() {
        let n = Notification {
            id: 5,
            admin_id: None,
            system_id: 42,
            message: "Disk almost full".into(),
            risk_level: "High".into(),
            status: NotificationStatus::Unread,
            sent_time: None,
        };
        assert_eq!(alert_title(42, &n), "High Alert (System 42)");
    }
}
