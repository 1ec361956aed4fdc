use std::sync::Arc;

use proximity_common::crypto::MasterKey;
use proximity_common::{Error, HostId, Result, SettingCategory};
use proximity_core::Services;
use proximity_store::SqlxStore;

use crate::catalog::Catalog;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Server configuration, overridable by `PROXIMITY_*` environment
/// variables. `master_secret` has no default: its absence fails startup.
#[derive(Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub database_url: String,
    pub catalog_dir: String,
    pub default_storage: String,
    pub default_template: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: env_or("PROXIMITY_BIND_ADDRESS", "0.0.0.0"),
            port: env_or_parsed("PROXIMITY_PORT", 8080),
            database_url: env_or("PROXIMITY_DATABASE_URL", "sqlite:///var/lib/proximity/proximity.db"),
            catalog_dir: env_or("PROXIMITY_CATALOG_DIR", "/etc/proximity/catalog"),
            default_storage: env_or("PROXIMITY_DEFAULT_STORAGE", "local-lvm"),
            default_template: env_or(
                "PROXIMITY_DEFAULT_TEMPLATE",
                "local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst",
            ),
        }
    }
}

/// Where a new deployment should land: which Host/node, and which
/// storage/template to use if the request didn't say.
pub struct Placement {
    pub host_id: HostId,
    pub node: String,
    pub storage: String,
    pub template: String,
}

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub catalog: Arc<Catalog>,
    pub config: Arc<ServerConfig>,
    pub master_key: MasterKey,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let secret = std::env::var("PROXIMITY_MASTER_SECRET")
            .map_err(|_| anyhow::anyhow!("PROXIMITY_MASTER_SECRET must be set"))?;
        let master_key = MasterKey::from_secret(&secret)?;

        let store: Arc<dyn proximity_core::Store> = Arc::new(SqlxStore::new(&config.database_url).await?);
        let services = Arc::new(Services::new(store, master_key.clone()));
        services.spawn_reconcilers().await?;

        let catalog = Catalog::load(&config.catalog_dir).await?;

        Ok(Self {
            services,
            catalog,
            config: Arc::new(config),
            master_key,
        })
    }

    /// Picks a Host to deploy onto (the configured default, or the only
    /// one if there's exactly one) and a node on it, then resolves
    /// storage/template from Settings, falling back to config defaults.
    pub async fn resolve_placement(&self, node_override: Option<String>) -> Result<Placement> {
        let hosts = self.services.store.list_hosts().await?;
        let host = hosts
            .iter()
            .find(|h| h.is_default)
            .or_else(|| hosts.first())
            .ok_or_else(|| Error::Validation("no hosts configured".to_string()))?;

        let node = match node_override {
            Some(n) => n,
            None => host
                .nodes
                .first()
                .cloned()
                .ok_or_else(|| Error::Validation(format!("host {} has no nodes", host.id)))?,
        };

        let storage = self
            .services
            .store
            .get_setting("default_storage")
            .await?
            .map(|s| s.value)
            .unwrap_or_else(|| self.config.default_storage.clone());
        let template = self
            .services
            .store
            .get_setting("default_template")
            .await?
            .map(|s| s.value)
            .unwrap_or_else(|| self.config.default_template.clone());

        Ok(Placement {
            host_id: host.id,
            node,
            storage,
            template,
        })
    }
}

/// Maps the `{category}` path segment used by the Core Settings routes.
pub fn parse_setting_category(s: &str) -> Result<SettingCategory> {
    match s {
        "proxmox" => Ok(SettingCategory::Proxmox),
        "network" => Ok(SettingCategory::Network),
        "resources" => Ok(SettingCategory::Resources),
        "other" => Ok(SettingCategory::Other),
        other => Err(Error::Validation(format!("unknown setting category {other:?}"))),
    }
}
