//! Backup Engine: wraps `vzdump` snapshot/suspend creation and restore.
//! Compression is whatever vzdump itself applied — Proximity records it as
//! metadata on the `Backup` row and never runs a second compression pass.
use std::sync::Arc;

use chrono::Utc;
use proximity_common::{App, Backup, BackupId, BackupStatus, Error, Result};
use proximity_proxmox::{VzdumpMode, VzdumpOptions};

use crate::proxmox_pool::ProxmoxPool;
use crate::store::Store;

/// Number of `Ready` backups kept per App; older ones are pruned after a
/// new backup completes successfully.
const RETENTION_KEEP_LAST: usize = 5;

pub struct BackupEngine {
    store: Arc<dyn Store>,
    pool: Arc<dyn ProxmoxPool>,
}

impl BackupEngine {
    pub fn new(store: Arc<dyn Store>, pool: Arc<dyn ProxmoxPool>) -> Self {
        Self { store, pool }
    }

    /// Creates a vzdump snapshot for `app`, falling back to suspend mode
    /// if the storage backend doesn't support live snapshots.
    pub async fn create(&self, app: &App, storage: &str) -> Result<Backup> {
        let vmid = app
            .vmid
            .ok_or_else(|| Error::Validation(format!("app {} has no vmid", app.id)))?;

        let mut backup = Backup {
            id: BackupId::new(),
            app_id: app.id,
            filename: String::new(),
            size_bytes: 0,
            compression: String::new(),
            status: BackupStatus::Creating,
            created_at: Utc::now(),
        };
        self.store.insert_backup(&backup).await?;

        let proxmox = self.pool.client_for(app.host_id).await?;
        let opts = VzdumpOptions {
            storage: storage.to_string(),
            mode: VzdumpMode::Snapshot,
            compress: "zstd".to_string(),
        };

        let result = match proxmox.vzdump_create(&app.node_name, vmid, &opts).await {
            Ok(filename) => Ok(filename),
            Err(_) => {
                let fallback = VzdumpOptions {
                    storage: storage.to_string(),
                    mode: VzdumpMode::Suspend,
                    compress: "zstd".to_string(),
                };
                proxmox
                    .vzdump_create(&app.node_name, vmid, &fallback)
                    .await
                    .map_err(Error::from)
            }
        };

        match result {
            Ok(filename) => {
                backup.filename = filename;
                backup.compression = "zstd".to_string();
                backup.status = BackupStatus::Ready;
                self.store.update_backup(&backup).await?;
                self.enforce_retention(app.id).await?;
                Ok(backup)
            }
            Err(e) => {
                backup.status = BackupStatus::Failed;
                let _ = self.store.update_backup(&backup).await;
                Err(e)
            }
        }
    }

    /// Restores `backup` onto `app`'s host, reusing the App's existing
    /// vmid so IP/DNS/proxy registration stays valid after restore.
    pub async fn restore(&self, app: &App, backup: &Backup) -> Result<()> {
        let vmid = app
            .vmid
            .ok_or_else(|| Error::Validation(format!("app {} has no vmid", app.id)))?;

        let proxmox = self.pool.client_for(app.host_id).await?;
        proxmox
            .vzdump_restore(&app.node_name, &backup.filename, vmid, None)
            .await
            .map_err(Error::from)?;
        proxmox
            .lxc_start(&app.node_name, vmid)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn enforce_retention(&self, app_id: proximity_common::AppId) -> Result<()> {
        let mut backups = self.store.list_backups_for_app(app_id).await?;
        backups.retain(|b| b.status == BackupStatus::Ready);
        backups.sort_by_key(|b| std::cmp::Reverse(b.created_at));

        for stale in backups.into_iter().skip(RETENTION_KEEP_LAST) {
            tracing::info!(backup_id = %stale.id, "pruning backup past retention window");
            self.store.delete_backup(stale.id).await?;
        }
        Ok(())
    }
}
