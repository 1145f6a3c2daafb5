use super::{
    Admin, AdminStore, NewAdmin, NewSystem, Notification, NotificationId, NotificationStatus,
    NotificationStore, SystemId, SystemInfo, SystemStore, TelemetryStore,
};
use crate::config::StoreConfig;
use crate::metrics::MetricSet;
use crate::retry::RetryManager;
use crate::scorer::RiskResult;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Pool, Postgres, Row};
use tracing::{info, warn};

const NOTIFICATION_COLUMNS: &str =
    "notification_id, admin_id, system_id, message, risk_level, status, sent_time";

#[derive(Debug, Clone)]
pub struct PgStore {
    db_pool: Pool<Postgres>,
}

impl PgStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(config.password.expose_secret())
            .database(&config.database);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to {}:{}", config.host, config.port))?;

        Ok(Self { db_pool: pool })
    }

    /// Keep trying to connect until the store answers.
    ///
    /// Every failure is logged and followed by the retry delay; this never
    /// gives up on its own.
    pub async fn connect_with_retry(config: &StoreConfig, retry: &RetryManager) -> Self {
        loop {
            match Self::connect(config).await {
                Ok(store) => {
                    retry.reset();
                    info!("Database connection successful ({})", config.host);
                    return store;
                }
                Err(e) => {
                    let delay = retry.next_delay();
                    warn!("Database not reachable ({:#}). Retrying in {:?}...", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Verifying tables...");
        let migrations = include_str!("../../migrations/001_create_tables.sql");
        // Split by semicolon to execute separate statements
        for query in migrations.split(';') {
            let query = query.trim();
            if !query.is_empty() {
                sqlx::query(query)
                    .execute(&self.db_pool)
                    .await
                    .with_context(|| format!("migration statement failed: {}", query))?;
            }
        }

        info!("Tables verified.");
        Ok(())
    }
}

fn admin_from_row(row: &PgRow) -> Result<Admin> {
    Ok(Admin {
        id: row.try_get("admin_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        password_hash: row.try_get("password_hash")?,
    })
}

fn system_from_row(row: &PgRow) -> Result<SystemInfo> {
    Ok(SystemInfo {
        id: row.try_get("system_id")?,
        name: row.try_get("system_name")?,
        location: row.try_get("location")?,
        ip_address: row
            .try_get::<Option<String>, _>("ip_address")?
            .unwrap_or_default(),
        admin_id: row.try_get("admin_id")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification> {
    let status: Option<String> = row.try_get("status")?;
    Ok(Notification {
        id: row.try_get("notification_id")?,
        admin_id: row.try_get("admin_id")?,
        system_id: row.try_get("system_id")?,
        message: row
            .try_get::<Option<String>, _>("message")?
            .unwrap_or_default(),
        risk_level: row
            .try_get::<Option<String>, _>("risk_level")?
            .unwrap_or_default(),
        status: NotificationStatus::parse(status.as_deref().unwrap_or_default()),
        sent_time: row.try_get("sent_time")?,
    })
}

impl AdminStore for PgStore {
    async fn find_admin_by_email(&self, email: &str) -> Result<Option<Admin>> {
        let row = sqlx::query(
            "SELECT admin_id, name, email, phone, password_hash FROM admin WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.db_pool)
        .await
        .context("failed to look up admin")?;

        row.as_ref().map(admin_from_row).transpose()
    }

    async fn insert_admin(&self, admin: NewAdmin) -> Result<Admin> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO admin (name, email, phone, password_hash)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO NOTHING
            RETURNING admin_id, name, email, phone, password_hash
            "#,
        )
        .bind(&admin.name)
        .bind(&admin.email)
        .bind(&admin.phone)
        .bind(&admin.password_hash)
        .fetch_optional(&self.db_pool)
        .await
        .context("failed to insert admin")?;

        match inserted {
            Some(row) => admin_from_row(&row),
            // Conflict on email: hand back the record that already exists
            None => self
                .find_admin_by_email(&admin.email)
                .await?
                .with_context(|| format!("admin {} vanished after conflict", admin.email)),
        }
    }
}

impl SystemStore for PgStore {
    async fn find_system_by_ip(&self, ip_address: &str) -> Result<Option<SystemInfo>> {
        let row = sqlx::query(
            r#"
            SELECT system_id, system_name, location, ip_address, admin_id
            FROM system_info
            WHERE ip_address = $1
            ORDER BY system_id ASC
            LIMIT 1
            "#,
        )
        .bind(ip_address)
        .fetch_optional(&self.db_pool)
        .await
        .context("failed to look up system")?;

        row.as_ref().map(system_from_row).transpose()
    }

    async fn register_system(&self, system: NewSystem) -> Result<SystemInfo> {
        let row = sqlx::query(
            r#"
            INSERT INTO system_info (system_name, location, ip_address, admin_id)
            VALUES ($1, $2, $3, $4)
            RETURNING system_id, system_name, location, ip_address, admin_id
            "#,
        )
        .bind(&system.name)
        .bind(&system.location)
        .bind(&system.ip_address)
        .bind(system.admin_id)
        .fetch_one(&self.db_pool)
        .await
        .context("failed to register system")?;

        system_from_row(&row)
    }
}

impl TelemetryStore for PgStore {
    async fn insert_metrics(&self, system_id: SystemId, metrics: &MetricSet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_metrics
                (system_id, timestamp, cpu_usage, memory_usage, disk_io, network_latency, error_rate)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(system_id)
        .bind(metrics.timestamp)
        .bind(metrics.cpu_pct)
        .bind(metrics.mem_pct)
        .bind(metrics.disk_pct)
        .bind(metrics.net_latency)
        .bind(metrics.error_rate)
        .execute(&self.db_pool)
        .await
        .context("failed to insert metrics")?;
        Ok(())
    }

    async fn insert_prediction(
        &self,
        system_id: SystemId,
        result: &RiskResult,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO prediction_log
                (system_id, downtime_risk, probability, estimated_time_to_downtime, source, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(system_id)
        .bind(result.is_risk)
        .bind(result.probability)
        .bind(result.eta_minutes)
        .bind(result.source.as_str())
        .bind(created_at)
        .execute(&self.db_pool)
        .await
        .context("failed to insert prediction")?;
        Ok(())
    }
}

impl NotificationStore for PgStore {
    async fn max_notification_id(&self) -> Result<Option<NotificationId>> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(notification_id) FROM notification")
            .fetch_one(&self.db_pool)
            .await
            .context("failed to read max notification id")?;
        Ok(max)
    }

    async fn notifications_after(
        &self,
        system_id: SystemId,
        after: NotificationId,
    ) -> Result<Vec<Notification>> {
        let query = format!(
            "SELECT {} FROM notification WHERE notification_id > $1 AND system_id = $2 ORDER BY notification_id ASC",
            NOTIFICATION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(after)
            .bind(system_id)
            .fetch_all(&self.db_pool)
            .await
            .context("failed to fetch notifications")?;

        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_read(&self, id: NotificationId) -> Result<()> {
        sqlx::query("UPDATE notification SET status = $1 WHERE notification_id = $2")
            .bind(NotificationStatus::Read.as_str())
            .bind(id)
            .execute(&self.db_pool)
            .await
            .with_context(|| format!("failed to mark notification {} read", id))?;
        Ok(())
    }
}
