use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Connection settings for the shared relational store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub database: String,
}

/// Credentials supplied through the environment for headless runs.
#[derive(Debug, Clone)]
pub struct AdminEnv {
    pub email: String,
    pub password: SecretString,
    /// When set, the agent registers a new admin instead of logging in.
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub store: StoreConfig,

    // Identity
    pub ip_override: Option<IpAddr>,
    pub location: String,

    // Schedules
    pub metrics_interval: Duration,
    pub watch_interval: Duration,
    pub registration_retry: Duration,
    pub retry_backoff: Duration,

    // Scoring artifacts
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,

    pub alert_sound: bool,
    pub admin: Option<AdminEnv>,
}

impl AgentConfig {
    /// Read the configuration from the process environment.
    ///
    /// `DB_HOST` is the only setting without a default; when it is absent
    /// the caller supplies it (usually by prompting) through `host_fallback`.
    pub fn from_env(host_fallback: impl FnOnce() -> Result<String>) -> Result<Self> {
        let host = match env::var("DB_HOST").ok().filter(|h| !h.trim().is_empty()) {
            Some(host) => host,
            None => host_fallback().context("DB_HOST missing")?,
        };

        let store = StoreConfig {
            host: host.trim().to_string(),
            port: parse_var("DB_PORT", 5432)?,
            user: env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: SecretString::from(env::var("DB_PASSWORD").unwrap_or_default()),
            database: env::var("DB_NAME").unwrap_or_else(|_| "cpumetric".to_string()),
        };

        let ip_override = match env::var("AGENT_IP_ADDRESS") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse()
                    .with_context(|| format!("AGENT_IP_ADDRESS is not an IP address: {}", raw))?,
            ),
            _ => None,
        };

        let admin = match (env::var("ADMIN_EMAIL"), env::var("ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) => Some(AdminEnv {
                email,
                password: SecretString::from(password),
                name: env::var("ADMIN_NAME").ok().filter(|s| !s.is_empty()),
                phone: env::var("ADMIN_PHONE").ok().filter(|s| !s.is_empty()),
            }),
            _ => None,
        };

        Ok(Self {
            store,
            ip_override,
            location: env::var("AGENT_LOCATION").unwrap_or_else(|_| "Client System".to_string()),
            metrics_interval: Duration::from_secs(parse_var("METRICS_INTERVAL_SECS", 60)?),
            watch_interval: Duration::from_secs(parse_var("WATCH_INTERVAL_SECS", 3)?),
            registration_retry: Duration::from_secs(parse_var("REGISTRATION_RETRY_SECS", 5)?),
            retry_backoff: Duration::from_secs(parse_var("RETRY_BACKOFF_SECS", 5)?),
            model_path: env::var("MODEL_PATH")
                .unwrap_or_else(|_| "model.json".to_string())
                .into(),
            scaler_path: env::var("SCALER_PATH")
                .unwrap_or_else(|_| "scaler.json".to_string())
                .into(),
            alert_sound: parse_var("ALERT_SOUND", true)?,
            admin,
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset.
///
/// A set-but-invalid value is an error rather than a silent default.
fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{} has invalid value '{}': {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Variables are process-global; each test uses its own names.

    #[test]
    fn test_parse_var_default_when_unset() {
        let value: u64 = parse_var("HOSTWATCH_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_var_reads_value() {
        unsafe { env::set_var("HOSTWATCH_TEST_PORT_VAR", " 6543 ") };
        let value: u16 = parse_var("HOSTWATCH_TEST_PORT_VAR", 5432).unwrap();
        assert_eq!(value, 6543);
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        unsafe { env::set_var("HOSTWATCH_TEST_BAD_VAR", "soon") };
        let err = parse_var::<u64>("HOSTWATCH_TEST_BAD_VAR", 1).unwrap_err();
        assert!(err.to_string().contains("HOSTWATCH_TEST_BAD_VAR"));
    }

    #[test]
    fn test_parse_bool() {
        unsafe { env::set_var("HOSTWATCH_TEST_BOOL_VAR", "false") };
        assert!(!parse_var("HOSTWATCH_TEST_BOOL_VAR", true).unwrap());
    }
}
