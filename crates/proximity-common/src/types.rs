use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(HostId);
uuid_id!(AppId);
uuid_id!(BackupId);

/// Resource request/grant for a managed App's LXC.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Resources {
    pub cpu: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
    pub swap_mb: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpu: 1,
            memory_mb: 512,
            disk_gb: 4,
            swap_mb: 512,
        }
    }
}

/// A managed Proxmox host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub endpoint: String,
    /// Encrypted at rest; see `proximity_common::crypto`.
    pub credentials: EncryptedCredentials,
    pub verify_tls: bool,
    pub is_default: bool,
    pub nodes: Vec<String>,
}

/// Opaque encrypted blob holding a `HostCredentials` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedCredentials {
    pub ciphertext: Vec<u8>,
}

/// Decrypted shape of `Host::credentials`, never persisted in plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCredentials {
    pub user: String,
    pub token_id: String,
    pub secret: String,
}

/// An immutable application definition loaded from the catalog directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogApp {
    /// Slug, unique, doubles as the file stem of the catalog JSON file.
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub category: String,
    pub compose_bundle: ComposeBundle,
    pub declared_ports: Vec<u16>,
    pub declared_volumes: Vec<String>,
    pub declared_env: HashMap<String, String>,
    pub min_memory: u32,
    pub min_cpu: u32,
    pub tags: Vec<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

/// A Docker Compose file plus its rendered `.env`, ready to push into an App's LXC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeBundle {
    /// The compose YAML, carried as a JSON value per the catalog file format.
    pub docker_compose: serde_json::Value,
}

/// Lifecycle status of a managed App.
///
/// `Starting`/`Stopping`/`Restarting`/`Restoring` are intermediate states
/// owned by the Lifecycle Controller; they collapse back to a terminal
/// status once the Proxmox call returns and the Reconciler confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Deploying,
    Cloning,
    Running,
    Stopped,
    Error,
    Deleting,
    Starting,
    Stopping,
    Restarting,
    Restoring,
}

impl AppStatus {
    pub fn is_steady(&self) -> bool {
        matches!(self, AppStatus::Running | AppStatus::Stopped | AppStatus::Error)
    }

    pub fn is_intermediate(&self) -> bool {
        matches!(
            self,
            AppStatus::Starting
                | AppStatus::Stopping
                | AppStatus::Restarting
                | AppStatus::Restoring
                | AppStatus::Deploying
                | AppStatus::Cloning
                | AppStatus::Deleting
        )
    }
}

/// A deployed, managed instance derived from a `CatalogApp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub catalog_id: String,
    pub name: String,
    pub hostname: String,
    pub host_id: HostId,
    pub node_name: String,
    pub vmid: Option<u32>,
    pub ip: Option<String>,
    pub status: AppStatus,
    pub resources: Resources,
    pub env: HashMap<String, String>,
    pub ports: Vec<u16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Ordered, append-only human-readable log of pipeline/lifecycle events.
    pub deployment_log: Vec<DeploymentLogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLogEntry {
    pub timestamp: DateTime<Utc>,
    pub step: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Creating,
    Ready,
    Failed,
    Restoring,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub id: BackupId,
    pub app_id: AppId,
    pub filename: String,
    pub size_bytes: u64,
    /// Descriptive metadata sourced from the vzdump options used to create
    /// this backup (e.g. "zstd"); Proximity never re-compresses the dump.
    pub compression: String,
    pub status: BackupStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Ok,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplianceServicesState {
    pub dhcp: ServiceState,
    pub dns: ServiceState,
    pub proxy: ServiceState,
    pub nat: ServiceState,
}

/// The Network Appliance LXC: one per Host, providing DHCP/DNS/reverse
/// proxy/NAT for the managed subnet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appliance {
    pub host_id: HostId,
    pub vmid: u32,
    pub wan_ip: String,
    pub lan_ip: String,
    pub subnet: String,
    pub gateway: String,
    pub dhcp_range: (String, String),
    pub dns_domain: String,
    pub services_state: ApplianceServicesState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplianceHealth {
    pub services_state: ApplianceServicesState,
    pub checked_at: DateTime<Utc>,
}

/// An IP/hostname reservation from the IPAM pool. `app_id` is `None` while
/// a reservation is tentative (deploy pipeline still in flight).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub host_id: HostId,
    pub hostname: String,
    pub ip: String,
    pub app_id: Option<AppId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingCategory {
    Proxmox,
    Network,
    Resources,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    /// Plaintext for non-sensitive keys; base64-indistinguishable
    /// ciphertext bytes for keys in `ENCRYPTED_KEYS`.
    pub value: String,
    pub category: SettingCategory,
    pub encrypted: bool,
}

/// Keys that must always be encrypted at rest.
pub const ENCRYPTED_KEYS: &[&str] = &["proxmox_password", "smtp_password"];

/// Policy applied to an App's `Ready` backups when the App is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupDeletePolicy {
    Retain,
    Cascade,
}

impl Default for BackupDeletePolicy {
    fn default() -> Self {
        BackupDeletePolicy::Retain
    }
}
