//! IPAM & Hostname Registry: hands out one IP/hostname pair per App within
//! a Host's managed subnet, serialized per-Host so two concurrent deploys
//! against the same Host never race for the same address.
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use proximity_common::{Error, HostId, Reservation, Result};
use tokio::sync::Mutex;

use crate::store::Store;

pub struct Ipam {
    store: Arc<dyn Store>,
    /// One mutex per Host, created lazily, so allocation for Host A never
    /// blocks on allocation for Host B.
    locks: Mutex<HashMap<HostId, Arc<Mutex<()>>>>,
}

impl Ipam {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, host_id: HostId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(host_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// True if `hostname` is already reserved on `host_id`. Hostnames are
    /// scoped per Host; the same name may be reused on a different Host.
    pub async fn hostname_exists(&self, host_id: HostId, hostname: &str) -> Result<bool> {
        Ok(self
            .store
            .get_reservation_by_hostname(host_id, hostname)
            .await?
            .is_some())
    }

    /// Reserves the next free IP in `host_id`'s managed subnet for
    /// `hostname`, and records a tentative (unbound) reservation.
    pub async fn reserve(&self, host_id: HostId, hostname: &str) -> Result<Reservation> {
        let host_lock = self.lock_for(host_id).await;
        let _guard = host_lock.lock().await;

        if self
            .store
            .get_reservation_by_hostname(host_id, hostname)
            .await?
            .is_some()
        {
            return Err(Error::ConflictHostname(hostname.to_string()));
        }

        let appliance = self
            .store
            .get_appliance(host_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("appliance for host {host_id}")))?;

        let existing = self.store.list_reservations_by_host(host_id).await?;
        let used: std::collections::HashSet<Ipv4Addr> = existing
            .iter()
            .filter_map(|r| r.ip.parse().ok())
            .collect();

        let ip = next_free_ip(&appliance.dhcp_range, &appliance.gateway, &used)
            .ok_or_else(|| Error::PoolExhausted(host_id.to_string()))?;

        let reservation = Reservation {
            host_id,
            hostname: hostname.to_string(),
            ip: ip.to_string(),
            app_id: None,
        };
        self.store.insert_reservation(&reservation).await?;
        Ok(reservation)
    }

    pub async fn bind(
        &self,
        host_id: HostId,
        hostname: &str,
        app_id: proximity_common::AppId,
    ) -> Result<()> {
        self.store.bind_reservation(host_id, hostname, app_id).await
    }

    pub async fn release(&self, host_id: HostId, hostname: &str) -> Result<()> {
        self.store.release_reservation(host_id, hostname).await
    }
}

/// Walks the DHCP range in address order, skipping the gateway and any
/// address already in `used`.
fn next_free_ip(
    range: &(String, String),
    gateway: &str,
    used: &std::collections::HashSet<Ipv4Addr>,
) -> Option<Ipv4Addr> {
    let start: Ipv4Addr = range.0.parse().ok()?;
    let end: Ipv4Addr = range.1.parse().ok()?;
    let gateway: Ipv4Addr = gateway.parse().ok()?;

    let start_u = u32::from(start);
    let end_u = u32::from(end);

    for raw in start_u..=end_u {
        let candidate = Ipv4Addr::from(raw);
        if candidate != gateway && !used.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_free_ip_skips_gateway_and_used() {
        let range = ("10.20.0.10".to_string(), "10.20.0.12".to_string());
        let gateway = "10.20.0.10";
        let mut used = std::collections::HashSet::new();
        used.insert("10.20.0.11".parse().unwrap());

        let ip = next_free_ip(&range, gateway, &used).unwrap();
        assert_eq!(ip, "10.20.0.12".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn next_free_ip_exhausted() {
        let range = ("10.20.0.10".to_string(), "10.20.0.10".to_string());
        let gateway = "10.20.0.10";
        let used = std::collections::HashSet::new();
        assert_eq!(next_free_ip(&range, gateway, &used), None);
    }
}
