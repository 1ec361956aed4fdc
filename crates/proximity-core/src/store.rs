//! The Control-Plane Store port. `proximity-store` provides the real
//! `sqlx`-backed implementation; tests substitute an in-memory one,
//! mirroring the way the teacher crate puts `StorageBackend` behind a
//! trait so `core` never depends on a concrete backend.
use async_trait::async_trait;
use proximity_common::{
    App, AppId, Appliance, Backup, BackupId, Host, HostId, Reservation, Result, Setting,
};

/// Persistence operations the orchestrator needs. Implementations must be
/// safe to share behind an `Arc` across tasks.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_host(&self, id: HostId) -> Result<Host>;
    async fn list_hosts(&self) -> Result<Vec<Host>>;
    async fn put_host(&self, host: &Host) -> Result<()>;
    async fn delete_host(&self, id: HostId) -> Result<()>;

    async fn insert_app(&self, app: &App) -> Result<()>;
    async fn get_app(&self, id: AppId) -> Result<App>;
    async fn update_app(&self, app: &App) -> Result<()>;
    async fn list_apps(&self) -> Result<Vec<App>>;
    async fn list_apps_by_host(&self, host_id: HostId) -> Result<Vec<App>>;
    async fn delete_app(&self, id: AppId) -> Result<()>;

    async fn insert_reservation(&self, reservation: &Reservation) -> Result<()>;
    /// Hostnames are unique per Host, not globally; independent Hosts may
    /// each have their own App named e.g. `adminer`.
    async fn get_reservation_by_hostname(
        &self,
        host_id: HostId,
        hostname: &str,
    ) -> Result<Option<Reservation>>;
    async fn list_reservations_by_host(&self, host_id: HostId) -> Result<Vec<Reservation>>;
    /// Attaches a tentative reservation to the App it was made for.
    async fn bind_reservation(&self, host_id: HostId, hostname: &str, app_id: AppId) -> Result<()>;
    async fn release_reservation(&self, host_id: HostId, hostname: &str) -> Result<()>;

    async fn insert_backup(&self, backup: &Backup) -> Result<()>;
    async fn update_backup(&self, backup: &Backup) -> Result<()>;
    async fn get_backup(&self, id: BackupId) -> Result<Backup>;
    async fn list_backups_for_app(&self, app_id: AppId) -> Result<Vec<Backup>>;
    async fn delete_backup(&self, id: BackupId) -> Result<()>;

    async fn get_appliance(&self, host_id: HostId) -> Result<Option<Appliance>>;
    async fn put_appliance(&self, appliance: &Appliance) -> Result<()>;

    async fn get_setting(&self, key: &str) -> Result<Option<Setting>>;
    async fn put_setting(&self, setting: &Setting) -> Result<()>;
    async fn list_settings(&self) -> Result<Vec<Setting>>;
}
