//! Lifecycle Controller: start/stop/restart/clone/backup/restore/update
//! for an existing App. Every action on a given App is serialized through
//! a per-App mutex so two concurrent requests against the same App can
//! never race (the busy one fails fast with `ConflictBusy` instead of
//! corrupting state).
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use proximity_common::{
    App, AppId, AppStatus, BackupDeletePolicy, DeploymentLogEntry, Error, Result,
};
use proximity_proxmox::ExecCommand;
use tokio::sync::Mutex;

use crate::appliance::ApplianceManager;
use crate::backup::BackupEngine;
use crate::ipam::Ipam;
use crate::pipeline::PipelineRegistry;
use crate::proxmox_pool::ProxmoxPool;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
}

pub struct LifecycleController {
    store: Arc<dyn Store>,
    pool: Arc<dyn ProxmoxPool>,
    ipam: Arc<Ipam>,
    appliance: Arc<ApplianceManager>,
    backup: Arc<BackupEngine>,
    pipeline: Arc<PipelineRegistry>,
    locks: Mutex<HashMap<AppId, Arc<Mutex<()>>>>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn Store>,
        pool: Arc<dyn ProxmoxPool>,
        ipam: Arc<Ipam>,
        appliance: Arc<ApplianceManager>,
        backup: Arc<BackupEngine>,
        pipeline: Arc<PipelineRegistry>,
    ) -> Self {
        Self {
            store,
            pool,
            ipam,
            appliance,
            backup,
            pipeline,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, app_id: AppId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(app_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquires the App's lock without blocking; busy means another
    /// lifecycle action is already in flight.
    async fn try_claim(&self, app_id: AppId) -> Result<tokio::sync::OwnedMutexGuard<()>> {
        let lock = self.lock_for(app_id).await;
        lock.try_lock_owned()
            .map_err(|_| Error::ConflictBusy(app_id.to_string()))
    }

    async fn log(&self, app: &mut App, step: &str, message: &str) {
        app.deployment_log.push(DeploymentLogEntry {
            timestamp: Utc::now(),
            step: step.to_string(),
            message: message.to_string(),
        });
        app.updated_at = Utc::now();
    }

    /// Start/stop/restart. Validates the App's current status permits the
    /// requested action before touching Proxmox.
    pub async fn action(&self, app_id: AppId, action: Action) -> Result<()> {
        let _guard = self.try_claim(app_id).await?;
        let mut app = self.store.get_app(app_id).await?;

        let (allowed_from, transient, settled) = match action {
            Action::Start => (
                matches!(app.status, AppStatus::Stopped | AppStatus::Error),
                AppStatus::Starting,
                AppStatus::Running,
            ),
            Action::Stop => (
                matches!(app.status, AppStatus::Running),
                AppStatus::Stopping,
                AppStatus::Stopped,
            ),
            Action::Restart => (
                matches!(app.status, AppStatus::Running | AppStatus::Stopped | AppStatus::Error),
                if matches!(app.status, AppStatus::Running) {
                    AppStatus::Restarting
                } else {
                    AppStatus::Starting
                },
                AppStatus::Running,
            ),
        };

        if !allowed_from {
            return Err(Error::ConflictStatus {
                from: format!("{:?}", app.status),
                action: format!("{action:?}"),
            });
        }

        let vmid = app
            .vmid
            .ok_or_else(|| Error::Validation(format!("app {app_id} has no vmid")))?;

        app.status = transient;
        self.log(&mut app, &format!("{action:?}").to_lowercase(), "starting").await;
        self.store.update_app(&app).await?;

        let proxmox = self.pool.client_for(app.host_id).await?;
        let result = match action {
            Action::Start => proxmox.lxc_start(&app.node_name, vmid).await,
            Action::Stop => proxmox.lxc_stop(&app.node_name, vmid).await,
            Action::Restart => {
                proxmox.lxc_stop(&app.node_name, vmid).await?;
                proxmox.lxc_start(&app.node_name, vmid).await
            }
        };

        match result {
            Ok(()) => {
                app.status = settled;
                self.log(&mut app, &format!("{action:?}").to_lowercase(), "ok").await;
                self.store.update_app(&app).await?;
                Ok(())
            }
            Err(e) => {
                app.status = AppStatus::Error;
                self.log(&mut app, &format!("{action:?}").to_lowercase(), &e.to_string()).await;
                self.store.update_app(&app).await?;
                Err(Error::from(e))
            }
        }
    }

    /// Snapshots `app_id` with `vzdump` and restores the snapshot into a
    /// freshly allocated vmid under `new_hostname`, carrying over its
    /// actual running state. The source App is left untouched; the
    /// returned id is a new, independent App.
    pub async fn clone_app(&self, app_id: AppId, new_hostname: String, storage: String) -> Result<AppId> {
        let _guard = self.try_claim(app_id).await?;
        let app = self.store.get_app(app_id).await?;
        if !matches!(app.status, AppStatus::Running | AppStatus::Stopped) {
            return Err(Error::ConflictStatus {
                from: format!("{:?}", app.status),
                action: "Clone".to_string(),
            });
        }

        self.pipeline.clone(app, new_hostname, storage).await
    }

    /// Creates a vzdump backup of the App without changing its status.
    pub async fn backup(&self, app_id: AppId, storage: &str) -> Result<proximity_common::Backup> {
        let _guard = self.try_claim(app_id).await?;
        let app = self.store.get_app(app_id).await?;
        if !app.status.is_steady() {
            return Err(Error::ConflictStatus {
                from: format!("{:?}", app.status),
                action: "Backup".to_string(),
            });
        }
        self.backup.create(&app, storage).await
    }

    /// Restores a prior backup onto the App's existing vmid.
    pub async fn restore(&self, app_id: AppId, backup_id: proximity_common::BackupId) -> Result<()> {
        let _guard = self.try_claim(app_id).await?;
        let mut app = self.store.get_app(app_id).await?;
        if !app.status.is_steady() {
            return Err(Error::ConflictStatus {
                from: format!("{:?}", app.status),
                action: "Restore".to_string(),
            });
        }
        let backup_record = self.store.get_backup(backup_id).await?;

        app.status = AppStatus::Restoring;
        self.log(&mut app, "restore", "starting").await;
        self.store.update_app(&app).await?;

        match self.backup.restore(&app, &backup_record).await {
            Ok(()) => {
                app.status = AppStatus::Running;
                self.log(&mut app, "restore", "ok").await;
                self.store.update_app(&app).await?;
                Ok(())
            }
            Err(e) => {
                app.status = AppStatus::Error;
                self.log(&mut app, "restore", &e.to_string()).await;
                self.store.update_app(&app).await?;
                Err(e)
            }
        }
    }

    /// Re-pulls images and force-recreates the App's compose stack in
    /// place, keeping the same vmid/IP/hostname.
    pub async fn update(&self, app_id: AppId, compose_path: &str) -> Result<()> {
        let _guard = self.try_claim(app_id).await?;
        let mut app = self.store.get_app(app_id).await?;
        if !app.status.is_steady() {
            return Err(Error::ConflictStatus {
                from: format!("{:?}", app.status),
                action: "Update".to_string(),
            });
        }
        let vmid = app
            .vmid
            .ok_or_else(|| Error::Validation(format!("app {app_id} has no vmid")))?;

        app.status = AppStatus::Restarting;
        self.log(&mut app, "update", "pulling and recreating").await;
        self.store.update_app(&app).await?;

        let proxmox = self.pool.client_for(app.host_id).await?;
        let result: std::result::Result<(), proximity_proxmox::UpstreamError> = async {
            proxmox.lxc_exec(&app.node_name, vmid, &ExecCommand::compose_pull(compose_path), std::time::Duration::from_secs(300)).await?;
            proxmox.lxc_exec(&app.node_name, vmid, &ExecCommand::compose_up_force_recreate(compose_path), std::time::Duration::from_secs(120)).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                app.status = AppStatus::Running;
                self.log(&mut app, "update", "ok").await;
                self.store.update_app(&app).await?;
                Ok(())
            }
            Err(e) => {
                app.status = AppStatus::Error;
                self.log(&mut app, "update", &e.to_string()).await;
                self.store.update_app(&app).await?;
                Err(Error::from(e))
            }
        }
    }

    /// Deletes an App: stops the container (best effort), destroys it,
    /// releases its IP/hostname, and drops or keeps its backups per
    /// `policy`.
    pub async fn delete(&self, app_id: AppId, policy: BackupDeletePolicy) -> Result<()> {
        let _guard = self.try_claim(app_id).await?;
        let mut app = self.store.get_app(app_id).await?;
        app.status = AppStatus::Deleting;
        self.store.update_app(&app).await?;

        if let Some(vmid) = app.vmid {
            let proxmox = self.pool.client_for(app.host_id).await?;
            let _ = proxmox.lxc_stop(&app.node_name, vmid).await;
            proxmox.lxc_destroy(&app.node_name, vmid).await.map_err(Error::from)?;
        }

        self.appliance
            .deregister_app(app.host_id, &app.node_name, &app.hostname)
            .await?;
        self.ipam.release(app.host_id, &app.hostname).await?;

        if policy == BackupDeletePolicy::Cascade {
            for b in self.store.list_backups_for_app(app_id).await? {
                self.store.delete_backup(b.id).await?;
            }
        }

        self.store.delete_app(app_id).await?;
        Ok(())
    }
}
