//! Shared relational store: row types and the store traits the agent's
//! tasks are written against.
//!
//! Each concern gets its own trait so a task only names what it touches;
//! [`PgStore`] and [`MemoryStore`] implement all of them.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::metrics::MetricSet;
use crate::scorer::RiskResult;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;

pub type AdminId = i32;
pub type SystemId = i32;
pub type NotificationId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admin {
    pub id: AdminId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewAdmin {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
}

/// A row of the system registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub id: SystemId,
    pub name: String,
    pub location: Option<String>,
    pub ip_address: String,
    pub admin_id: Option<AdminId>,
}

#[derive(Debug, Clone)]
pub struct NewSystem {
    pub name: String,
    pub location: String,
    pub ip_address: String,
    pub admin_id: AdminId,
}

/// Delivery state of a notification row.
///
/// Stored as free text; parsing is case-insensitive. Anything other than
/// unread/read is kept verbatim and never delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationStatus {
    Unread,
    Read,
    Other(String),
}

impl NotificationStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "unread" => Self::Unread,
            "read" => Self::Read,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Unread => "Unread",
            Self::Read => "Read",
            Self::Other(raw) => raw,
        }
    }

    pub fn is_unread(&self) -> bool {
        matches!(self, Self::Unread)
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An admin-issued alert addressed to one system.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: NotificationId,
    pub admin_id: Option<AdminId>,
    pub system_id: SystemId,
    pub message: String,
    pub risk_level: String,
    pub status: NotificationStatus,
    pub sent_time: Option<DateTime<Utc>>,
}

pub trait AdminStore: Clone + Send + Sync + 'static {
    fn find_admin_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<Admin>>> + Send;

    /// Insert a new admin. If the email is already registered the existing
    /// record is returned unchanged.
    fn insert_admin(&self, admin: NewAdmin) -> impl Future<Output = Result<Admin>> + Send;
}

pub trait SystemStore: Clone + Send + Sync + 'static {
    fn find_system_by_ip(
        &self,
        ip_address: &str,
    ) -> impl Future<Output = Result<Option<SystemInfo>>> + Send;

    fn register_system(&self, system: NewSystem)
    -> impl Future<Output = Result<SystemInfo>> + Send;
}

pub trait TelemetryStore: Clone + Send + Sync + 'static {
    fn insert_metrics(
        &self,
        system_id: SystemId,
        metrics: &MetricSet,
    ) -> impl Future<Output = Result<()>> + Send;

    fn insert_prediction(
        &self,
        system_id: SystemId,
        result: &RiskResult,
        created_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub trait NotificationStore: Clone + Send + Sync + 'static {
    /// Highest notification id across every system, `None` when empty.
    fn max_notification_id(&self) -> impl Future<Output = Result<Option<NotificationId>>> + Send;

    /// Rows for `system_id` with id strictly greater than `after`, ascending.
    fn notifications_after(
        &self,
        system_id: SystemId,
        after: NotificationId,
    ) -> impl Future<Output = Result<Vec<Notification>>> + Send;

    /// Set the row's status to read. Marking an already-read row is a no-op.
    fn mark_read(&self, id: NotificationId) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(NotificationStatus::parse("Unread"), NotificationStatus::Unread);
        assert_eq!(NotificationStatus::parse("UNREAD "), NotificationStatus::Unread);
        assert_eq!(NotificationStatus::parse("read"), NotificationStatus::Read);
        assert_eq!(
            NotificationStatus::parse("archived"),
            NotificationStatus::Other("archived".to_string())
        );
    }

    #[test]
    fn test_only_unread_is_deliverable() {
        assert!(NotificationStatus::Unread.is_unread());
        assert!(!NotificationStatus::Read.is_unread());
        assert!(!NotificationStatus::Other("snoozed".into()).is_unread());
    }

    #[test]
    fn test_status_writes_canonical_text() {
        assert_eq!(NotificationStatus::parse("read").to_string(), "Read");
        assert_eq!(NotificationStatus::Unread.as_str(), "Unread");
    }
}
