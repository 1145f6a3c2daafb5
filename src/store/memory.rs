//! In-process store backend.
//!
//! Keeps every table in a `BTreeMap` behind one lock so ids come out in
//! ascending order. With the `testing` feature it can also inject store
//! outages so the failure paths of the periodic tasks can be exercised
//! without a database.

use super::{
    Admin, AdminId, AdminStore, NewAdmin, NewSystem, Notification, NotificationId,
    NotificationStatus, NotificationStore, SystemId, SystemInfo, SystemStore, TelemetryStore,
};
use crate::metrics::MetricSet;
use crate::scorer::RiskResult;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A stored prediction, as the prediction log would hold it.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionEntry {
    pub system_id: SystemId,
    pub result: RiskResult,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    admins: BTreeMap<AdminId, Admin>,
    systems: BTreeMap<SystemId, SystemInfo>,
    metrics: Vec<(SystemId, MetricSet)>,
    predictions: Vec<PredictionEntry>,
    notifications: BTreeMap<NotificationId, Notification>,

    // Fault injection
    outage_calls: usize,
    failing_mark_reads: HashSet<NotificationId>,
    #[cfg(any(test, feature = "testing"))]
    mark_read_calls: usize,
}

impl Tables {
    /// Consume one injected failure, if any are pending.
    fn check_outage(&mut self) -> Result<()> {
        if self.outage_calls > 0 {
            self.outage_calls -= 1;
            return Err(anyhow::Error::new(sqlx::Error::PoolTimedOut)
                .context("memory store outage"));
        }
        Ok(())
    }

    fn next_id<K: Copy + Ord + Default + std::ops::Add<Output = K> + From<u8>, V>(
        map: &BTreeMap<K, V>,
    ) -> K {
        map.keys().next_back().copied().unwrap_or_default() + K::from(1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `calls` store operations fail with a connectivity error.
    #[cfg(any(test, feature = "testing"))]
    pub async fn inject_outage(&self, calls: usize) {
        self.tables.lock().await.outage_calls = calls;
    }

    /// Make every `mark_read` for `id` fail until cleared.
    #[cfg(any(test, feature = "testing"))]
    pub async fn fail_mark_read(&self, id: NotificationId) {
        self.tables.lock().await.failing_mark_reads.insert(id);
    }

    #[cfg(any(test, feature = "testing"))]
    pub async fn clear_failures(&self) {
        let mut tables = self.tables.lock().await;
        tables.outage_calls = 0;
        tables.failing_mark_reads.clear();
    }

    /// Insert a notification row with an explicit id, the way the admin
    /// console would.
    pub async fn insert_notification(&self, notification: Notification) {
        self.tables
            .lock()
            .await
            .notifications
            .insert(notification.id, notification);
    }

    /// Insert a system row with an explicit id.
    pub async fn insert_system(&self, system: SystemInfo) {
        self.tables.lock().await.systems.insert(system.id, system);
    }

    pub async fn notification(&self, id: NotificationId) -> Option<Notification> {
        self.tables.lock().await.notifications.get(&id).cloned()
    }

    pub async fn metrics(&self) -> Vec<(SystemId, MetricSet)> {
        self.tables.lock().await.metrics.clone()
    }

    pub async fn predictions(&self) -> Vec<PredictionEntry> {
        self.tables.lock().await.predictions.clone()
    }

    pub async fn systems(&self) -> Vec<SystemInfo> {
        self.tables.lock().await.systems.values().cloned().collect()
    }

    #[cfg(any(test, feature = "testing"))]
    pub async fn mark_read_calls(&self) -> usize {
        self.tables.lock().await.mark_read_calls
    }
}

impl AdminStore for MemoryStore {
    async fn find_admin_by_email(&self, email: &str) -> Result<Option<Admin>> {
        let mut tables = self.tables.lock().await;
        tables.check_outage()?;
        Ok(tables.admins.values().find(|a| a.email == email).cloned())
    }

    async fn insert_admin(&self, admin: NewAdmin) -> Result<Admin> {
        let mut tables = self.tables.lock().await;
        tables.check_outage()?;

        if let Some(existing) = tables.admins.values().find(|a| a.email == admin.email) {
            return Ok(existing.clone());
        }

        let id = Tables::next_id(&tables.admins);
        let record = Admin {
            id,
            name: admin.name,
            email: admin.email,
            phone: admin.phone,
            password_hash: admin.password_hash,
        };
        tables.admins.insert(id, record.clone());
        Ok(record)
    }
}

impl SystemStore for MemoryStore {
    async fn find_system_by_ip(&self, ip_address: &str) -> Result<Option<SystemInfo>> {
        let mut tables = self.tables.lock().await;
        tables.check_outage()?;
        Ok(tables
            .systems
            .values()
            .find(|s| s.ip_address == ip_address)
            .cloned())
    }

    async fn register_system(&self, system: NewSystem) -> Result<SystemInfo> {
        let mut tables = self.tables.lock().await;
        tables.check_outage()?;

        let id = Tables::next_id(&tables.systems);
        let record = SystemInfo {
            id,
            name: system.name,
            location: Some(system.location),
            ip_address: system.ip_address,
            admin_id: Some(system.admin_id),
        };
        tables.systems.insert(id, record.clone());
        Ok(record)
    }
}

impl TelemetryStore for MemoryStore {
    async fn insert_metrics(&self, system_id: SystemId, metrics: &MetricSet) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.check_outage()?;
        tables.metrics.push((system_id, metrics.clone()));
        Ok(())
    }

    async fn insert_prediction(
        &self,
        system_id: SystemId,
        result: &RiskResult,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.check_outage()?;
        tables.predictions.push(PredictionEntry {
            system_id,
            result: result.clone(),
            created_at,
        });
        Ok(())
    }
}

impl NotificationStore for MemoryStore {
    async fn max_notification_id(&self) -> Result<Option<NotificationId>> {
        let mut tables = self.tables.lock().await;
        tables.check_outage()?;
        Ok(tables.notifications.keys().next_back().copied())
    }

    async fn notifications_after(
        &self,
        system_id: SystemId,
        after: NotificationId,
    ) -> Result<Vec<Notification>> {
        let mut tables = self.tables.lock().await;
        tables.check_outage()?;
        Ok(tables
            .notifications
            .range(after.saturating_add(1)..)
            .map(|(_, n)| n)
            .filter(|n| n.system_id == system_id)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, id: NotificationId) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.check_outage()?;
        #[cfg(any(test, feature = "testing"))]
        {
            tables.mark_read_calls += 1;
        }

        if tables.failing_mark_reads.contains(&id) {
            return Err(anyhow!("update notification {} rejected", id));
        }
        if let Some(row) = tables.notifications.get_mut(&id) {
            row.status = NotificationStatus::Read;
        }
        Ok(())
    }
}
