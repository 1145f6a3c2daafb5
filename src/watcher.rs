//! Notification watcher.
//!
//! Follows the notification table for a single system id and surfaces each
//! new unread row once, in ascending id order. Progress is an in-memory
//! cursor: the highest id processed so far. It starts at the table's
//! maximum id when the agent boots, so alerts issued before the agent
//! started are never replayed, and only ever moves forward.

use crate::alert::Notifier;
use crate::retry::{RetryManager, is_connectivity_error};
use crate::schedule::{Clock, PeriodicTask};
use crate::store::{NotificationId, NotificationStore, SystemId, SystemStore};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Delay between registry lookups while this host is unregistered.
    pub registration_retry: Duration,
    /// Delay after a connectivity failure.
    pub retry_backoff: Duration,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            registration_retry: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(5),
        }
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Rows returned by the store.
    pub fetched: usize,
    /// Ids surfaced to the notifier, in order.
    pub delivered: Vec<NotificationId>,
}

pub struct NotificationWatcher<S, N> {
    store: S,
    notifier: N,
    system_id: SystemId,
    cursor: NotificationId,
    poll_interval: Duration,
    retry: RetryManager,
}

/// Look up this host's system id, waiting until it has been registered.
///
/// A missing row is expected at first boot (the metrics task registers the
/// host), so it is retried rather than reported. Store errors are retried
/// the same way.
pub async fn resolve_system_id<S, C>(
    store: &S,
    ip_address: &str,
    retry_delay: Duration,
    clock: &C,
) -> SystemId
where
    S: SystemStore,
    C: Clock,
{
    loop {
        match store.find_system_by_ip(ip_address).await {
            Ok(Some(system)) => return system.id,
            Ok(None) => {
                info!("Waiting for system {} to register...", ip_address);
            }
            Err(e) => {
                warn!("System lookup failed ({:#}), retrying", e);
            }
        }
        clock.sleep(retry_delay).await;
    }
}

/// Read the starting cursor: the highest notification id in the whole
/// table, or 0 when it is empty.
pub async fn seed_cursor<S: NotificationStore>(store: &S) -> Result<NotificationId> {
    let max = store
        .max_notification_id()
        .await
        .context("failed to seed notification cursor")?;
    Ok(max.unwrap_or(0))
}

impl<S, N> NotificationWatcher<S, N>
where
    S: NotificationStore,
    N: Notifier,
{
    pub fn new(
        store: S,
        notifier: N,
        system_id: SystemId,
        cursor: NotificationId,
        settings: &WatcherSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            system_id,
            cursor,
            poll_interval: settings.poll_interval,
            retry: RetryManager::fixed(settings.retry_backoff),
        }
    }

    /// Build a watcher for the host at `ip_address`: wait for its
    /// registration, then seed the cursor. Retries until both succeed.
    pub async fn bootstrap<C: Clock>(
        store: S,
        notifier: N,
        ip_address: &str,
        settings: &WatcherSettings,
        clock: &C,
    ) -> Self
    where
        S: SystemStore,
    {
        let system_id =
            resolve_system_id(&store, ip_address, settings.registration_retry, clock).await;

        let retry = RetryManager::fixed(settings.retry_backoff);
        let cursor = loop {
            match seed_cursor(&store).await {
                Ok(cursor) => break cursor,
                Err(e) => {
                    let delay = retry.next_delay();
                    warn!("{:#}; retrying in {:?}", e, delay);
                    clock.sleep(delay).await;
                }
            }
        };

        info!(
            "Listening for alerts for system_id={} (cursor at {})",
            system_id, cursor
        );
        Self::new(store, notifier, system_id, cursor, settings)
    }

    pub fn system_id(&self) -> SystemId {
        self.system_id
    }

    pub fn cursor(&self) -> NotificationId {
        self.cursor
    }

    /// Fetch rows past the cursor and deliver the unread ones.
    ///
    /// The cursor moves to each row's id before anything else happens to
    /// it, read or not. A failed read-mark abandons the rest of the batch;
    /// that row stays unread in the store but is behind the cursor and
    /// will not be shown again by this process.
    pub async fn poll_once(&mut self) -> Result<PollReport> {
        let rows = self
            .store
            .notifications_after(self.system_id, self.cursor)
            .await?;

        let mut report = PollReport {
            fetched: rows.len(),
            delivered: Vec::new(),
        };

        for row in rows {
            if row.id <= self.cursor {
                // Store returned something it should not have
                debug!("Skipping notification {} behind cursor {}", row.id, self.cursor);
                continue;
            }
            self.cursor = row.id;

            if !row.status.is_unread() {
                continue;
            }

            if let Err(e) = self.notifier.notify(self.system_id, &row).await {
                warn!("Failed to surface notification {}: {:#}", row.id, e);
            }
            report.delivered.push(row.id);

            if let Err(e) = self.store.mark_read(row.id).await {
                error!(
                    "Notification {} was shown but could not be marked read: {:#}",
                    row.id, e
                );
                return Err(e);
            }
        }

        Ok(report)
    }
}

impl<S, N> PeriodicTask for NotificationWatcher<S, N>
where
    S: NotificationStore,
    N: Notifier,
{
    fn name(&self) -> &'static str {
        "notification-watcher"
    }

    async fn tick(&mut self) -> Duration {
        match self.poll_once().await {
            Ok(report) => {
                self.retry.reset();
                if !report.delivered.is_empty() {
                    info!(
                        "Delivered {} alert(s), cursor at {}",
                        report.delivered.len(),
                        self.cursor
                    );
                }
                self.poll_interval
            }
            Err(e) if is_connectivity_error(&e) => {
                let delay = self.retry.next_delay();
                warn!("Store unreachable while polling alerts ({:#}); backing off {:?}", e, delay);
                delay
            }
            Err(e) => {
                error!("Alert poll failed: {:#}", e);
                self.poll_interval
            }
        }
    }
}
