//! Status Reconciler: one background task per Host, polling each of its
//! Apps' actual container state and correcting drift the Lifecycle
//! Controller didn't cause (a container stopped out-of-band, or deleted
//! directly on the Proxmox host). Backoff grows on failure and resets to
//! its floor as soon as a poll succeeds, capped at 60s.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use proximity_common::{AppStatus, Error, HostId, Result};
use proximity_proxmox::UpstreamError;

use crate::proxmox_pool::ProxmoxPool;
use crate::store::Store;

const BACKOFF_FLOOR: Duration = Duration::from_secs(5);
const BACKOFF_CEILING: Duration = Duration::from_secs(60);

pub struct Reconciler {
    store: Arc<dyn Store>,
    pool: Arc<dyn ProxmoxPool>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, pool: Arc<dyn ProxmoxPool>) -> Self {
        Self { store, pool }
    }

    /// Spawns the polling loop for one Host. The returned handle is kept
    /// by the caller only to cancel it on Host removal — the loop itself
    /// never returns under normal operation.
    pub fn spawn_for_host(self: Arc<Self>, host_id: HostId) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run_host_loop(host_id).await })
    }

    async fn run_host_loop(&self, host_id: HostId) {
        let mut backoff = BACKOFF_FLOOR;
        loop {
            match self.reconcile_once(host_id).await {
                Ok(()) => backoff = BACKOFF_FLOOR,
                Err(e) => {
                    tracing::warn!(host_id = %host_id, error = %e, ?backoff, "reconcile pass failed");
                    backoff = (backoff * 2).min(BACKOFF_CEILING);
                }
            }
            tokio::time::sleep(backoff).await;
        }
    }

    async fn reconcile_once(&self, host_id: HostId) -> Result<()> {
        let apps = self.store.list_apps_by_host(host_id).await?;
        if apps.is_empty() {
            return Ok(());
        }
        let proxmox = self.pool.client_for(host_id).await?;

        for mut app in apps {
            if !app.status.is_steady() {
                // An in-flight pipeline or lifecycle action owns this App;
                // reconciling over it would race the owning task.
                continue;
            }
            let Some(vmid) = app.vmid else { continue };

            match proxmox.lxc_status(&app.node_name, vmid).await {
                Ok(status) => {
                    let observed = if status.running {
                        AppStatus::Running
                    } else {
                        AppStatus::Stopped
                    };
                    if observed != app.status {
                        tracing::info!(app_id = %app.id, from = ?app.status, to = ?observed, "reconciler detected drift");
                        app.status = observed;
                        app.updated_at = Utc::now();
                        self.store.update_app(&app).await?;
                    }
                }
                Err(UpstreamError::NotFound(_)) => {
                    tracing::warn!(app_id = %app.id, vmid, "container no longer exists on host");
                    app.status = AppStatus::Error;
                    app.updated_at = Utc::now();
                    self.store.update_app(&app).await?;
                }
                Err(e) => return Err(Error::from(e)),
            }
        }
        Ok(())
    }
}
