//! Orchestration layer: Proxmox client pool, IPAM, Appliance Manager,
//! Deployment Pipeline, Lifecycle Controller, Status Reconciler and
//! Backup Engine, composed behind one [`Services`] bundle so a binary
//! crate only has to construct and hold a single value.
pub mod appliance;
pub mod backup;
pub mod ipam;
pub mod lifecycle;
pub mod pipeline;
pub mod proxmox_pool;
pub mod reconciler;
pub mod store;

#[cfg(test)]
mod scenario_tests;

use std::sync::Arc;

use proximity_common::crypto::MasterKey;
use proximity_common::HostId;

pub use appliance::ApplianceManager;
pub use backup::BackupEngine;
pub use ipam::Ipam;
pub use lifecycle::{Action, LifecycleController};
pub use pipeline::{DeployRequest, PipelineRegistry, ProgressEvent, StepStatus};
pub use proxmox_pool::{ProxmoxClientPool, ProxmoxPool};
pub use reconciler::Reconciler;
pub use store::Store;

/// All orchestrator dependencies, constructed once at startup and shared
/// (behind `Arc`s) across the HTTP handlers and background tasks.
pub struct Services {
    pub store: Arc<dyn Store>,
    pub pool: Arc<dyn ProxmoxPool>,
    pub ipam: Arc<Ipam>,
    pub appliance: Arc<ApplianceManager>,
    pub backup: Arc<BackupEngine>,
    pub lifecycle: Arc<LifecycleController>,
    pub pipeline: Arc<PipelineRegistry>,
    pub reconciler: Arc<Reconciler>,
}

impl Services {
    pub fn new(store: Arc<dyn Store>, master_key: MasterKey) -> Self {
        let pool: Arc<dyn ProxmoxPool> = Arc::new(ProxmoxClientPool::new(store.clone(), master_key));
        let ipam = Arc::new(Ipam::new(store.clone()));
        let appliance = Arc::new(ApplianceManager::new(store.clone(), pool.clone()));
        let backup = Arc::new(BackupEngine::new(store.clone(), pool.clone()));
        let pipeline = Arc::new(PipelineRegistry::new(
            store.clone(),
            pool.clone(),
            ipam.clone(),
            appliance.clone(),
        ));
        let lifecycle = Arc::new(LifecycleController::new(
            store.clone(),
            pool.clone(),
            ipam.clone(),
            appliance.clone(),
            backup.clone(),
            pipeline.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(store.clone(), pool.clone()));

        Self {
            store,
            pool,
            ipam,
            appliance,
            backup,
            lifecycle,
            pipeline,
            reconciler,
        }
    }

    /// Starts the Status Reconciler's per-Host polling loops for every
    /// Host currently in the Store. Called once at boot; newly-added
    /// Hosts get their own loop started at creation time by the caller.
    pub async fn spawn_reconcilers(&self) -> proximity_common::Result<()> {
        for host in self.store.list_hosts().await? {
            self.spawn_reconciler_for(host.id);
        }
        Ok(())
    }

    pub fn spawn_reconciler_for(&self, host_id: HostId) {
        self.reconciler.clone().spawn_for_host(host_id);
    }
}
