//! Control-Plane Store: the `sqlx`-backed implementation of
//! `proximity_core::store::Store`. One SQLite database holds every Host,
//! App, Reservation, Backup, Appliance and Setting row; every mutating
//! method runs as its own transaction.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proximity_common::{
    App, AppId, AppStatus, Appliance, ApplianceServicesState, Backup, BackupId, BackupStatus,
    EncryptedCredentials, Error, Host, HostId, Reservation, Resources, Result, ServiceState,
    Setting, SettingCategory,
};
use proximity_core::store::Store;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

pub struct SqlxStore {
    pool: SqlitePool,
}

impl SqlxStore {
    /// `url` is a `sqlx` SQLite URL, e.g. `sqlite:///var/lib/proximity/db.sqlite`
    /// or `sqlite::memory:` for tests.
    pub async fn new(url: &str) -> Result<Self> {
        tracing::info!(url, "opening control-plane store");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(to_err)?;

        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| Error::Internal(e.to_string()))?;

        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }
}

fn to_err(e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
        other => Error::Internal(other.to_string()),
    }
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("bad timestamp {s}: {e}")))
}

fn status_to_str(s: AppStatus) -> &'static str {
    match s {
        AppStatus::Deploying => "deploying",
        AppStatus::Cloning => "cloning",
        AppStatus::Running => "running",
        AppStatus::Stopped => "stopped",
        AppStatus::Error => "error",
        AppStatus::Deleting => "deleting",
        AppStatus::Starting => "starting",
        AppStatus::Stopping => "stopping",
        AppStatus::Restarting => "restarting",
        AppStatus::Restoring => "restoring",
    }
}

fn str_to_status(s: &str) -> Result<AppStatus> {
    Ok(match s {
        "deploying" => AppStatus::Deploying,
        "cloning" => AppStatus::Cloning,
        "running" => AppStatus::Running,
        "stopped" => AppStatus::Stopped,
        "error" => AppStatus::Error,
        "deleting" => AppStatus::Deleting,
        "starting" => AppStatus::Starting,
        "stopping" => AppStatus::Stopping,
        "restarting" => AppStatus::Restarting,
        "restoring" => AppStatus::Restoring,
        other => return Err(Error::Internal(format!("unknown app status {other}"))),
    })
}

fn backup_status_to_str(s: BackupStatus) -> &'static str {
    match s {
        BackupStatus::Creating => "creating",
        BackupStatus::Ready => "ready",
        BackupStatus::Failed => "failed",
        BackupStatus::Restoring => "restoring",
    }
}

fn str_to_backup_status(s: &str) -> Result<BackupStatus> {
    Ok(match s {
        "creating" => BackupStatus::Creating,
        "ready" => BackupStatus::Ready,
        "failed" => BackupStatus::Failed,
        "restoring" => BackupStatus::Restoring,
        other => return Err(Error::Internal(format!("unknown backup status {other}"))),
    })
}

fn service_state_to_str(s: ServiceState) -> &'static str {
    match s {
        ServiceState::Ok => "ok",
        ServiceState::Degraded => "degraded",
        ServiceState::Down => "down",
    }
}

fn str_to_service_state(s: &str) -> Result<ServiceState> {
    Ok(match s {
        "ok" => ServiceState::Ok,
        "degraded" => ServiceState::Degraded,
        "down" => ServiceState::Down,
        other => return Err(Error::Internal(format!("unknown service state {other}"))),
    })
}

fn category_to_str(c: SettingCategory) -> &'static str {
    match c {
        SettingCategory::Proxmox => "proxmox",
        SettingCategory::Network => "network",
        SettingCategory::Resources => "resources",
        SettingCategory::Other => "other",
    }
}

fn str_to_category(s: &str) -> Result<SettingCategory> {
    Ok(match s {
        "proxmox" => SettingCategory::Proxmox,
        "network" => SettingCategory::Network,
        "resources" => SettingCategory::Resources,
        "other" => SettingCategory::Other,
        other => return Err(Error::Internal(format!("unknown setting category {other}"))),
    })
}

fn row_to_host(row: &sqlx::sqlite::SqliteRow) -> Result<Host> {
    let id: String = row.get("id");
    let nodes_json: String = row.get("nodes");
    Ok(Host {
        id: id.parse().map_err(|e| Error::Internal(format!("bad host id: {e}")))?,
        name: row.get("name"),
        endpoint: row.get("endpoint"),
        credentials: EncryptedCredentials {
            ciphertext: row.get("credentials_ciphertext"),
        },
        verify_tls: row.get::<i64, _>("verify_tls") != 0,
        is_default: row.get::<i64, _>("is_default") != 0,
        nodes: serde_json::from_str(&nodes_json)?,
    })
}

fn row_to_app(row: &sqlx::sqlite::SqliteRow) -> Result<App> {
    let id: String = row.get("id");
    let host_id: String = row.get("host_id");
    let status: String = row.get("status");
    let resources_json: String = row.get("resources");
    let env_json: String = row.get("env");
    let ports_json: String = row.get("ports");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let deployment_log_json: String = row.get("deployment_log");
    let vmid: Option<i64> = row.get("vmid");

    Ok(App {
        id: id.parse().map_err(|e| Error::Internal(format!("bad app id: {e}")))?,
        catalog_id: row.get("catalog_id"),
        name: row.get("name"),
        hostname: row.get("hostname"),
        host_id: host_id.parse().map_err(|e| Error::Internal(format!("bad host id: {e}")))?,
        node_name: row.get("node_name"),
        vmid: vmid.map(|v| v as u32),
        ip: row.get("ip"),
        status: str_to_status(&status)?,
        resources: serde_json::from_str(&resources_json)?,
        env: serde_json::from_str(&env_json)?,
        ports: serde_json::from_str(&ports_json)?,
        created_at: parse_dt(&created_at)?,
        updated_at: parse_dt(&updated_at)?,
        deployment_log: serde_json::from_str(&deployment_log_json)?,
    })
}

fn row_to_reservation(row: &sqlx::sqlite::SqliteRow) -> Result<Reservation> {
    let host_id: String = row.get("host_id");
    let app_id: Option<String> = row.get("app_id");
    Ok(Reservation {
        host_id: host_id.parse().map_err(|e| Error::Internal(format!("bad host id: {e}")))?,
        hostname: row.get("hostname"),
        ip: row.get("ip"),
        app_id: app_id
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| Error::Internal(format!("bad app id: {e}")))?,
    })
}

fn row_to_backup(row: &sqlx::sqlite::SqliteRow) -> Result<Backup> {
    let id: String = row.get("id");
    let app_id: String = row.get("app_id");
    let created_at: String = row.get("created_at");
    let status: String = row.get("status");
    Ok(Backup {
        id: id.parse().map_err(|e| Error::Internal(format!("bad backup id: {e}")))?,
        app_id: app_id.parse().map_err(|e| Error::Internal(format!("bad app id: {e}")))?,
        filename: row.get("filename"),
        size_bytes: row.get::<i64, _>("size_bytes") as u64,
        compression: row.get("compression"),
        status: str_to_backup_status(&status)?,
        created_at: parse_dt(&created_at)?,
    })
}

fn row_to_appliance(row: &sqlx::sqlite::SqliteRow) -> Result<Appliance> {
    let host_id: String = row.get("host_id");
    Ok(Appliance {
        host_id: host_id.parse().map_err(|e| Error::Internal(format!("bad host id: {e}")))?,
        vmid: row.get::<i64, _>("vmid") as u32,
        wan_ip: row.get("wan_ip"),
        lan_ip: row.get("lan_ip"),
        subnet: row.get("subnet"),
        gateway: row.get("gateway"),
        dhcp_range: (row.get("dhcp_range_start"), row.get("dhcp_range_end")),
        dns_domain: row.get("dns_domain"),
        services_state: ApplianceServicesState {
            dhcp: str_to_service_state(&row.get::<String, _>("dhcp_state"))?,
            dns: str_to_service_state(&row.get::<String, _>("dns_state"))?,
            proxy: str_to_service_state(&row.get::<String, _>("proxy_state"))?,
            nat: str_to_service_state(&row.get::<String, _>("nat_state"))?,
        },
    })
}

fn row_to_setting(row: &sqlx::sqlite::SqliteRow) -> Result<Setting> {
    let category: String = row.get("category");
    Ok(Setting {
        key: row.get("key"),
        value: row.get("value"),
        category: str_to_category(&category)?,
        encrypted: row.get::<i64, _>("encrypted") != 0,
    })
}

#[async_trait]
impl Store for SqlxStore {
    async fn get_host(&self, id: HostId) -> Result<Host> {
        let row = sqlx::query("SELECT * FROM hosts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(to_err)?
            .ok_or_else(|| Error::NotFound(format!("host {id}")))?;
        row_to_host(&row)
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        let rows = sqlx::query("SELECT * FROM hosts").fetch_all(&self.pool).await.map_err(to_err)?;
        rows.iter().map(row_to_host).collect()
    }

    async fn put_host(&self, host: &Host) -> Result<()> {
        let nodes_json = serde_json::to_string(&host.nodes)?;
        sqlx::query(
            r#"
            INSERT INTO hosts (id, name, endpoint, credentials_ciphertext, verify_tls, is_default, nodes)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                endpoint = excluded.endpoint,
                credentials_ciphertext = excluded.credentials_ciphertext,
                verify_tls = excluded.verify_tls,
                is_default = excluded.is_default,
                nodes = excluded.nodes
            "#,
        )
        .bind(host.id.to_string())
        .bind(&host.name)
        .bind(&host.endpoint)
        .bind(&host.credentials.ciphertext)
        .bind(host.verify_tls as i64)
        .bind(host.is_default as i64)
        .bind(nodes_json)
        .execute(&self.pool)
        .await
        .map_err(to_err)?;
        Ok(())
    }

    async fn delete_host(&self, id: HostId) -> Result<()> {
        sqlx::query("DELETE FROM hosts WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn insert_app(&self, app: &App) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO apps (id, catalog_id, name, hostname, host_id, node_name, vmid, ip,
                               status, resources, env, ports, created_at, updated_at, deployment_log)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(app.id.to_string())
        .bind(&app.catalog_id)
        .bind(&app.name)
        .bind(&app.hostname)
        .bind(app.host_id.to_string())
        .bind(&app.node_name)
        .bind(app.vmid.map(|v| v as i64))
        .bind(&app.ip)
        .bind(status_to_str(app.status))
        .bind(serde_json::to_string(&app.resources)?)
        .bind(serde_json::to_string(&app.env)?)
        .bind(serde_json::to_string(&app.ports)?)
        .bind(app.created_at.to_rfc3339())
        .bind(app.updated_at.to_rfc3339())
        .bind(serde_json::to_string(&app.deployment_log)?)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::ConflictHostname(app.hostname.clone())
            }
            other => to_err(other),
        })?;
        Ok(())
    }

    async fn get_app(&self, id: AppId) -> Result<App> {
        let row = sqlx::query("SELECT * FROM apps WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(to_err)?
            .ok_or_else(|| Error::NotFound(format!("app {id}")))?;
        row_to_app(&row)
    }

    async fn update_app(&self, app: &App) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE apps SET
                catalog_id = ?, name = ?, hostname = ?, host_id = ?, node_name = ?,
                vmid = ?, ip = ?, status = ?, resources = ?, env = ?, ports = ?,
                updated_at = ?, deployment_log = ?
            WHERE id = ?
            "#,
        )
        .bind(&app.catalog_id)
        .bind(&app.name)
        .bind(&app.hostname)
        .bind(app.host_id.to_string())
        .bind(&app.node_name)
        .bind(app.vmid.map(|v| v as i64))
        .bind(&app.ip)
        .bind(status_to_str(app.status))
        .bind(serde_json::to_string(&app.resources)?)
        .bind(serde_json::to_string(&app.env)?)
        .bind(serde_json::to_string(&app.ports)?)
        .bind(app.updated_at.to_rfc3339())
        .bind(serde_json::to_string(&app.deployment_log)?)
        .bind(app.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(to_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("app {}", app.id)));
        }
        Ok(())
    }

    async fn list_apps(&self) -> Result<Vec<App>> {
        let rows = sqlx::query("SELECT * FROM apps ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(to_err)?;
        rows.iter().map(row_to_app).collect()
    }

    async fn list_apps_by_host(&self, host_id: HostId) -> Result<Vec<App>> {
        let rows = sqlx::query("SELECT * FROM apps WHERE host_id = ? ORDER BY created_at")
            .bind(host_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(to_err)?;
        rows.iter().map(row_to_app).collect()
    }

    async fn delete_app(&self, id: AppId) -> Result<()> {
        sqlx::query("DELETE FROM apps WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn insert_reservation(&self, reservation: &Reservation) -> Result<()> {
        sqlx::query(
            "INSERT INTO reservations (hostname, host_id, ip, app_id) VALUES (?, ?, ?, ?)",
        )
        .bind(&reservation.hostname)
        .bind(reservation.host_id.to_string())
        .bind(&reservation.ip)
        .bind(reservation.app_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::ConflictHostname(reservation.hostname.clone())
            }
            other => to_err(other),
        })?;
        Ok(())
    }

    async fn get_reservation_by_hostname(
        &self,
        host_id: HostId,
        hostname: &str,
    ) -> Result<Option<Reservation>> {
        let row = sqlx::query("SELECT * FROM reservations WHERE host_id = ? AND hostname = ?")
            .bind(host_id.to_string())
            .bind(hostname)
            .fetch_optional(&self.pool)
            .await
            .map_err(to_err)?;
        row.as_ref().map(row_to_reservation).transpose()
    }

    async fn list_reservations_by_host(&self, host_id: HostId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query("SELECT * FROM reservations WHERE host_id = ?")
            .bind(host_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(to_err)?;
        rows.iter().map(row_to_reservation).collect()
    }

    async fn bind_reservation(&self, host_id: HostId, hostname: &str, app_id: AppId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE reservations SET app_id = ? WHERE host_id = ? AND hostname = ?",
        )
        .bind(app_id.to_string())
        .bind(host_id.to_string())
        .bind(hostname)
        .execute(&self.pool)
        .await
        .map_err(to_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("reservation {hostname}")));
        }
        Ok(())
    }

    async fn release_reservation(&self, host_id: HostId, hostname: &str) -> Result<()> {
        sqlx::query("DELETE FROM reservations WHERE host_id = ? AND hostname = ?")
            .bind(host_id.to_string())
            .bind(hostname)
            .execute(&self.pool)
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn insert_backup(&self, backup: &Backup) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backups (id, app_id, filename, size_bytes, compression, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(backup.id.to_string())
        .bind(backup.app_id.to_string())
        .bind(&backup.filename)
        .bind(backup.size_bytes as i64)
        .bind(&backup.compression)
        .bind(backup_status_to_str(backup.status))
        .bind(backup.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(to_err)?;
        Ok(())
    }

    async fn update_backup(&self, backup: &Backup) -> Result<()> {
        let result = sqlx::query(
            "UPDATE backups SET filename = ?, size_bytes = ?, compression = ?, status = ? WHERE id = ?",
        )
        .bind(&backup.filename)
        .bind(backup.size_bytes as i64)
        .bind(&backup.compression)
        .bind(backup_status_to_str(backup.status))
        .bind(backup.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(to_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("backup {}", backup.id)));
        }
        Ok(())
    }

    async fn get_backup(&self, id: BackupId) -> Result<Backup> {
        let row = sqlx::query("SELECT * FROM backups WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(to_err)?
            .ok_or_else(|| Error::NotFound(format!("backup {id}")))?;
        row_to_backup(&row)
    }

    async fn list_backups_for_app(&self, app_id: AppId) -> Result<Vec<Backup>> {
        let rows = sqlx::query("SELECT * FROM backups WHERE app_id = ? ORDER BY created_at DESC")
            .bind(app_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(to_err)?;
        rows.iter().map(row_to_backup).collect()
    }

    async fn delete_backup(&self, id: BackupId) -> Result<()> {
        sqlx::query("DELETE FROM backups WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn get_appliance(&self, host_id: HostId) -> Result<Option<Appliance>> {
        let row = sqlx::query("SELECT * FROM appliances WHERE host_id = ?")
            .bind(host_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(to_err)?;
        row.as_ref().map(row_to_appliance).transpose()
    }

    async fn put_appliance(&self, appliance: &Appliance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO appliances (host_id, vmid, wan_ip, lan_ip, subnet, gateway,
                                     dhcp_range_start, dhcp_range_end, dns_domain,
                                     dhcp_state, dns_state, proxy_state, nat_state)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(host_id) DO UPDATE SET
                vmid = excluded.vmid,
                wan_ip = excluded.wan_ip,
                lan_ip = excluded.lan_ip,
                subnet = excluded.subnet,
                gateway = excluded.gateway,
                dhcp_range_start = excluded.dhcp_range_start,
                dhcp_range_end = excluded.dhcp_range_end,
                dns_domain = excluded.dns_domain,
                dhcp_state = excluded.dhcp_state,
                dns_state = excluded.dns_state,
                proxy_state = excluded.proxy_state,
                nat_state = excluded.nat_state
            "#,
        )
        .bind(appliance.host_id.to_string())
        .bind(appliance.vmid as i64)
        .bind(&appliance.wan_ip)
        .bind(&appliance.lan_ip)
        .bind(&appliance.subnet)
        .bind(&appliance.gateway)
        .bind(&appliance.dhcp_range.0)
        .bind(&appliance.dhcp_range.1)
        .bind(&appliance.dns_domain)
        .bind(service_state_to_str(appliance.services_state.dhcp))
        .bind(service_state_to_str(appliance.services_state.dns))
        .bind(service_state_to_str(appliance.services_state.proxy))
        .bind(service_state_to_str(appliance.services_state.nat))
        .execute(&self.pool)
        .await
        .map_err(to_err)?;
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<Setting>> {
        let row = sqlx::query("SELECT * FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(to_err)?;
        row.as_ref().map(row_to_setting).transpose()
    }

    async fn put_setting(&self, setting: &Setting) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, category, encrypted)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                category = excluded.category,
                encrypted = excluded.encrypted
            "#,
        )
        .bind(&setting.key)
        .bind(&setting.value)
        .bind(category_to_str(setting.category))
        .bind(setting.encrypted as i64)
        .execute(&self.pool)
        .await
        .map_err(to_err)?;
        Ok(())
    }

    async fn list_settings(&self) -> Result<Vec<Setting>> {
        let rows = sqlx::query("SELECT * FROM settings").fetch_all(&self.pool).await.map_err(to_err)?;
        rows.iter().map(row_to_setting).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proximity_common::{AppStatus, Resources};
    use std::collections::HashMap as Map;

    fn sample_app(hostname: &str, host_id: HostId) -> App {
        let now = Utc::now();
        App {
            id: AppId::new(),
            catalog_id: "nginx".to_string(),
            name: "nginx".to_string(),
            hostname: hostname.to_string(),
            host_id,
            node_name: "pve1".to_string(),
            vmid: Some(100),
            ip: Some("10.20.0.5".to_string()),
            status: AppStatus::Deploying,
            resources: Resources::default(),
            env: Map::new(),
            ports: vec![80],
            created_at: now,
            updated_at: now,
            deployment_log: Vec::new(),
        }
    }

    #[tokio::test]
    async fn app_round_trip_and_status_update() {
        let store = SqlxStore::in_memory().await.unwrap();
        let host_id = HostId::new();
        let app = sample_app("nginx.apps.lan", host_id);

        store.insert_app(&app).await.unwrap();
        let fetched = store.get_app(app.id).await.unwrap();
        assert_eq!(fetched.hostname, "nginx.apps.lan");
        assert_eq!(fetched.status, AppStatus::Deploying);

        let mut updated = fetched;
        updated.status = AppStatus::Running;
        store.update_app(&updated).await.unwrap();

        let refetched = store.get_app(app.id).await.unwrap();
        assert_eq!(refetched.status, AppStatus::Running);

        let by_host = store.list_apps_by_host(host_id).await.unwrap();
        assert_eq!(by_host.len(), 1);
    }

    #[tokio::test]
    async fn reservation_hostname_conflict() {
        let store = SqlxStore::in_memory().await.unwrap();
        let host_id = HostId::new();
        let r = Reservation {
            host_id,
            hostname: "taken.apps.lan".to_string(),
            ip: "10.20.0.10".to_string(),
            app_id: None,
        };
        store.insert_reservation(&r).await.unwrap();

        let dup = Reservation {
            ip: "10.20.0.11".to_string(),
            ..r.clone()
        };
        let err = store.insert_reservation(&dup).await.unwrap_err();
        assert!(matches!(err, Error::ConflictHostname(_)));
    }

    #[tokio::test]
    async fn reservation_hostname_reusable_across_hosts() {
        let store = SqlxStore::in_memory().await.unwrap();
        let a = Reservation {
            host_id: HostId::new(),
            hostname: "adminer".to_string(),
            ip: "10.20.0.10".to_string(),
            app_id: None,
        };
        let b = Reservation {
            host_id: HostId::new(),
            ip: "10.30.0.10".to_string(),
            ..a.clone()
        };
        store.insert_reservation(&a).await.unwrap();
        store.insert_reservation(&b).await.unwrap();

        assert!(store
            .get_reservation_by_hostname(a.host_id, "adminer")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_reservation_by_hostname(b.host_id, "adminer")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn settings_upsert() {
        let store = SqlxStore::in_memory().await.unwrap();
        let setting = Setting {
            key: "proxmox_password".to_string(),
            value: "ciphertext-blob".to_string(),
            category: SettingCategory::Proxmox,
            encrypted: true,
        };
        store.put_setting(&setting).await.unwrap();

        let mut updated = setting.clone();
        updated.value = "new-ciphertext-blob".to_string();
        store.put_setting(&updated).await.unwrap();

        let fetched = store.get_setting("proxmox_password").await.unwrap().unwrap();
        assert_eq!(fetched.value, "new-ciphertext-blob");
    }

    #[tokio::test]
    async fn backup_retention_listing_orders_newest_first() {
        let store = SqlxStore::in_memory().await.unwrap();
        let app_id = AppId::new();
        for i in 0..3 {
            let backup = Backup {
                id: BackupId::new(),
                app_id,
                filename: format!("vzdump-{i}.tar.zst"),
                size_bytes: 1024,
                compression: "zstd".to_string(),
                status: BackupStatus::Ready,
                created_at: Utc::now() + chrono::Duration::seconds(i),
            };
            store.insert_backup(&backup).await.unwrap();
        }

        let backups = store.list_backups_for_app(app_id).await.unwrap();
        assert_eq!(backups.len(), 3);
        assert!(backups[0].created_at >= backups[1].created_at);
    }
}
