//! Local network identity.
//!
//! The system registry keys hosts by IP address, so the agent must find
//! the address the store sees it under. The address of the interface that
//! routes to the store host is preferred; the hostname's own resolution is
//! the fallback.

use anyhow::{Context, Result, anyhow};
use std::net::IpAddr;
use sysinfo::System;
use tokio::net::UdpSocket;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub hostname: String,
    pub ip_address: IpAddr,
}

impl HostIdentity {
    pub fn new(hostname: impl Into<String>, ip_address: IpAddr) -> Self {
        Self {
            hostname: hostname.into(),
            ip_address,
        }
    }

    /// Work out this host's identity.
    ///
    /// `ip_override` wins when set. Otherwise the route towards
    /// `store_host:store_port` decides the address.
    pub async fn resolve(
        store_host: &str,
        store_port: u16,
        ip_override: Option<IpAddr>,
    ) -> Result<Self> {
        let hostname = System::host_name().unwrap_or_else(|| "unknown-host".to_string());

        let ip_address = match ip_override {
            Some(ip) => ip,
            None => match route_address(store_host, store_port).await {
                Ok(ip) => ip,
                Err(e) => {
                    debug!("Route lookup towards store failed: {:#}", e);
                    hostname_address(&hostname).await?
                }
            },
        };

        info!("Local identity: {} ({})", hostname, ip_address);
        Ok(Self::new(hostname, ip_address))
    }

    pub fn ip_string(&self) -> String {
        self.ip_address.to_string()
    }
}

/// Local address of the interface the OS would use to reach the store.
/// Connecting a UDP socket sends no packets.
async fn route_address(host: &str, port: u16) -> Result<IpAddr> {
    let target = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {}", host))?
        .next()
        .ok_or_else(|| anyhow!("{} resolved to no addresses", host))?;

    let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(target).await?;
    let local = socket.local_addr()?.ip();

    if local.is_unspecified() {
        return Err(anyhow!("no route to {}", host));
    }
    Ok(local)
}

async fn hostname_address(hostname: &str) -> Result<IpAddr> {
    let mut addrs: Vec<IpAddr> = tokio::net::lookup_host((hostname, 0))
        .await
        .with_context(|| format!("failed to resolve own hostname {}", hostname))?
        .map(|a| a.ip())
        .collect();
    // Prefer IPv4 like the registry does
    addrs.sort_by_key(|ip| !ip.is_ipv4());
    addrs
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("hostname {} has no addresses", hostname))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_override_wins() {
        let ip: IpAddr = "10.132.93.84".parse().unwrap();
        let identity = HostIdentity::resolve("db.invalid", 5432, Some(ip))
            .await
            .unwrap();
        assert_eq!(identity.ip_address, ip);
        assert_eq!(identity.ip_string(), "10.132.93.84");
    }

    #[tokio::test]
    async fn test_route_to_loopback() {
        let ip = route_address("127.0.0.1", 5432).await.unwrap();
        assert!(ip.is_loopback());
    }
}
