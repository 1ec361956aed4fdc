//! Deployment Pipeline: the state machine that takes a `CatalogApp` plus
//! placement parameters and produces a running managed App. Each
//! deployment runs as its own `tokio::task`, persists the App's state
//! after every transition, publishes progress on a per-App broadcast
//! channel, and can be cancelled mid-flight. A failure at any step rolls
//! back everything the pipeline itself created.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use proximity_common::{
    App, AppId, AppStatus, CatalogApp, DeploymentLogEntry, Error, HostId, Resources, Result,
};
use proximity_proxmox::{ExecCommand, LxcCreateSpec, VzdumpMode, VzdumpOptions};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::appliance::ApplianceManager;
use crate::ipam::Ipam;
use crate::proxmox_pool::ProxmoxPool;
use crate::store::Store;

const DEFAULT_DEADLINE: Duration = Duration::from_secs(600);
const COMPOSE_STORAGE_DIR: &str = "/opt/proximity/compose";
const NETWORK_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
const HEALTH_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Started,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub app_id: AppId,
    pub step: String,
    pub status: StepStatus,
    pub message: String,
}

pub struct DeployRequest {
    pub catalog_app: CatalogApp,
    pub host_id: HostId,
    pub node: String,
    pub hostname: String,
    pub resources: Resources,
    pub env: HashMap<String, String>,
    pub storage: String,
    pub template: String,
}

/// What the pipeline has actually created so far, so a failure knows
/// exactly how much to undo.
#[derive(Debug, Default, Clone)]
struct Progress {
    hostname_reserved: bool,
    vmid: Option<u32>,
    container_created: bool,
    container_started: bool,
    appliance_registered: bool,
}

pub struct PipelineRegistry {
    store: Arc<dyn Store>,
    pool: Arc<dyn ProxmoxPool>,
    ipam: Arc<Ipam>,
    appliance: Arc<ApplianceManager>,
    channels: Mutex<HashMap<AppId, broadcast::Sender<ProgressEvent>>>,
    cancellations: Mutex<HashMap<AppId, CancellationToken>>,
}

impl PipelineRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        pool: Arc<dyn ProxmoxPool>,
        ipam: Arc<Ipam>,
        appliance: Arc<ApplianceManager>,
    ) -> Self {
        Self {
            store,
            pool,
            ipam,
            appliance,
            channels: Mutex::new(HashMap::new()),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    pub async fn subscribe(&self, app_id: AppId) -> broadcast::Receiver<ProgressEvent> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(app_id)
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    pub async fn cancel(&self, app_id: AppId) {
        if let Some(token) = self.cancellations.lock().await.get(&app_id) {
            token.cancel();
        }
    }

    /// Validates, inserts the App row with status `Deploying`, and spawns
    /// the background pipeline task. Returns as soon as the row exists so
    /// callers get an `AppId` to poll or subscribe to immediately.
    pub async fn deploy(self: &Arc<Self>, req: DeployRequest) -> Result<AppId> {
        proximity_common::validation::validate_hostname(&req.hostname)?;
        if self.ipam.hostname_exists(req.host_id, &req.hostname).await? {
            return Err(Error::ConflictHostname(req.hostname.clone()));
        }

        let app_id = AppId::new();
        let now = Utc::now();
        let app = App {
            id: app_id,
            catalog_id: req.catalog_app.id.clone(),
            name: req.catalog_app.name.clone(),
            hostname: req.hostname.clone(),
            host_id: req.host_id,
            node_name: req.node.clone(),
            vmid: None,
            ip: None,
            status: AppStatus::Deploying,
            resources: req.resources,
            env: req.env.clone(),
            ports: req.catalog_app.declared_ports.clone(),
            created_at: now,
            updated_at: now,
            deployment_log: vec![DeploymentLogEntry {
                timestamp: now,
                step: "queued".into(),
                message: "deployment pipeline queued".into(),
            }],
        };
        self.store.insert_app(&app).await?;

        let token = CancellationToken::new();
        self.cancellations.lock().await.insert(app_id, token.clone());
        self.channels
            .lock()
            .await
            .entry(app_id)
            .or_insert_with(|| broadcast::channel(64).0);

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = registry.run(app_id, req, token).await {
                tracing::warn!(app_id = %app_id, error = %e, "deployment pipeline ended in failure");
            }
            registry.cancellations.lock().await.remove(&app_id);
        });

        Ok(app_id)
    }

    async fn emit(&self, app_id: AppId, step: &str, status: StepStatus, message: &str) {
        let channels = self.channels.lock().await;
        if let Some(tx) = channels.get(&app_id) {
            let _ = tx.send(ProgressEvent {
                app_id,
                step: step.to_string(),
                status,
                message: message.to_string(),
            });
        }
    }

    async fn log_step(&self, app_id: AppId, step: &str, message: &str) -> Result<()> {
        let mut app = self.store.get_app(app_id).await?;
        app.deployment_log.push(DeploymentLogEntry {
            timestamp: Utc::now(),
            step: step.to_string(),
            message: message.to_string(),
        });
        app.updated_at = Utc::now();
        self.store.update_app(&app).await
    }

    fn budget_exceeded(deadline: tokio::time::Instant, token: &CancellationToken) -> Option<Error> {
        if token.is_cancelled() {
            Some(Error::PipelineRollback {
                step: "cancelled".into(),
                reason: "deployment was cancelled".into(),
            })
        } else if tokio::time::Instant::now() >= deadline {
            Some(Error::PipelineRollback {
                step: "deadline".into(),
                reason: "deployment exceeded its deadline".into(),
            })
        } else {
            None
        }
    }

    async fn run(&self, app_id: AppId, req: DeployRequest, token: CancellationToken) -> Result<()> {
        let deadline = tokio::time::Instant::now() + DEFAULT_DEADLINE;
        match self.run_steps(app_id, &req, &token, deadline).await {
            Ok(ip) => {
                let mut app = self.store.get_app(app_id).await?;
                app.status = AppStatus::Running;
                app.ip = Some(ip);
                app.updated_at = Utc::now();
                self.store.update_app(&app).await?;
                self.log_step(app_id, "done", "deployment complete").await?;
                self.emit(app_id, "done", StepStatus::Succeeded, "deployment complete").await;
                Ok(())
            }
            Err((e, progress)) => {
                self.emit(app_id, "rollback", StepStatus::Failed, &e.to_string()).await;
                self.rollback(req.host_id, &req.node, &req.hostname, &progress).await;

                if let Ok(mut app) = self.store.get_app(app_id).await {
                    app.status = AppStatus::Error;
                    app.updated_at = Utc::now();
                    let _ = self.store.update_app(&app).await;
                }
                let _ = self.log_step(app_id, "failed", &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        app_id: AppId,
        req: &DeployRequest,
        token: &CancellationToken,
        deadline: tokio::time::Instant,
    ) -> std::result::Result<String, (Error, Progress)> {
        let mut progress = Progress::default();

        macro_rules! check_budget {
            () => {
                if let Some(e) = Self::budget_exceeded(deadline, token) {
                    return Err((e, progress.clone()));
                }
            };
        }
        macro_rules! step {
            ($name:expr, $body:expr) => {{
                check_budget!();
                self.emit(app_id, $name, StepStatus::Started, $name).await;
                let result: Result<_> = $body;
                match result {
                    Ok(v) => {
                        let _ = self.log_step(app_id, $name, "ok").await;
                        self.emit(app_id, $name, StepStatus::Succeeded, "ok").await;
                        v
                    }
                    Err(e) => return Err((e, progress.clone())),
                }
            }};
        }

        proximity_common::validation::validate_hostname(&req.hostname)
            .map_err(|e| (e, progress.clone()))?;

        let appliance = step!(
            "appliance_ready",
            self.appliance.ensure(req.host_id, &req.node).await
        );

        let reservation = step!(
            "allocate_ip",
            self.ipam.reserve(req.host_id, &req.hostname).await
        );
        progress.hostname_reserved = true;

        let proxmox = step!("resolve_client", self.pool.client_for(req.host_id).await);

        let vmid = step!("reserve_vmid", proxmox.next_free_vmid().await.map_err(Error::from));
        progress.vmid = Some(vmid);

        let compose_path = format!("{COMPOSE_STORAGE_DIR}/{}/docker-compose.yml", req.hostname);
        let rootfs = format!("{}:{}", req.storage, req.resources.disk_gb);
        let net0 = format!("name=eth0,bridge=vmbr1,ip={}/24,gw={}", reservation.ip, appliance.gateway);

        let spec = LxcCreateSpec {
            vmid,
            ostemplate: req.template.clone(),
            hostname: req.hostname.clone(),
            memory: req.resources.memory_mb,
            swap: Some(req.resources.swap_mb),
            cores: req.resources.cpu,
            rootfs,
            net0,
            unprivileged: true,
            features: Some("nesting=1,keyctl=1".to_string()),
            password: None,
            storage: req.storage.clone(),
        };

        step!(
            "create_container",
            proxmox.lxc_create(&req.node, &spec).await.map_err(Error::from)
        );
        progress.container_created = true;

        step!(
            "start_container",
            proxmox.lxc_start(&req.node, vmid).await.map_err(Error::from)
        );
        progress.container_started = true;

        step!(
            "await_network",
            wait_for_network(&*proxmox, &req.node, vmid).await.map_err(Error::from)
        );

        let compose_json = serde_json::to_vec(&req.catalog_app.compose_bundle.docker_compose)
            .map_err(Error::Serialization)
            .map_err(|e| (e, progress.clone()))?;
        let compose_b64 = base64::engine::general_purpose::STANDARD.encode(&compose_json);

        let push_result: std::result::Result<(), proximity_proxmox::UpstreamError> = async {
            proxmox
                .lxc_exec(
                    &req.node,
                    vmid,
                    &ExecCommand::mkdir_p(&format!("{COMPOSE_STORAGE_DIR}/{}", req.hostname)),
                    Duration::from_secs(15),
                )
                .await?;
            proxmox
                .lxc_exec(
                    &req.node,
                    vmid,
                    &ExecCommand::write_file_base64(&compose_path, &compose_b64),
                    Duration::from_secs(15),
                )
                .await?;
            Ok(())
        }
        .await;
        step!("push_compose", push_result.map_err(Error::from));

        let install_result: std::result::Result<(), proximity_proxmox::UpstreamError> = async {
            proxmox
                .lxc_exec(&req.node, vmid, &ExecCommand::compose_pull(&compose_path), Duration::from_secs(300))
                .await?;
            proxmox
                .lxc_exec(&req.node, vmid, &ExecCommand::compose_up(&compose_path), Duration::from_secs(120))
                .await?;
            Ok(())
        }
        .await;
        step!("install_app", install_result.map_err(Error::from)
        );

        step!(
            "await_healthy",
            wait_for_compose_healthy(&*proxmox, &req.node, vmid, &compose_path)
                .await
                .map_err(Error::from)
        );

        step!(
            "register_appliance",
            self.appliance
                .register_app(req.host_id, &req.node, &req.hostname, &reservation.ip, &req.catalog_app.declared_ports)
                .await
        );
        progress.appliance_registered = true;

        step!(
            "bind_reservation",
            self.ipam.bind(req.host_id, &req.hostname, app_id).await
        );

        let mut app = self.store.get_app(app_id).await.map_err(|e| (e, progress.clone()))?;
        app.vmid = Some(vmid);
        app.ip = Some(reservation.ip.clone());
        self.store
            .update_app(&app)
            .await
            .map_err(|e| (e, progress.clone()))?;

        Ok(reservation.ip)
    }

    /// Undoes whatever a pipeline run actually created, in reverse order.
    /// Shared by both the deploy and clone flows, which create the same
    /// kinds of resources against different sources.
    async fn rollback(&self, host_id: HostId, node: &str, hostname: &str, progress: &Progress) {
        if progress.appliance_registered {
            if let Err(e) = self.appliance.deregister_app(host_id, node, hostname).await {
                tracing::warn!(error = %e, "rollback: failed to deregister from appliance");
            }
        }

        if let Some(vmid) = progress.vmid {
            if progress.container_started || progress.container_created {
                if let Ok(proxmox) = self.pool.client_for(host_id).await {
                    if progress.container_started {
                        let _ = proxmox.lxc_stop(node, vmid).await;
                    }
                    if let Err(e) = proxmox.lxc_destroy(node, vmid).await {
                        tracing::warn!(error = %e, vmid, "rollback: failed to destroy container");
                    }
                }
            }
        }

        if progress.hostname_reserved {
            if let Err(e) = self.ipam.release(host_id, hostname).await {
                tracing::warn!(error = %e, "rollback: failed to release IP reservation");
            }
        }
    }

    /// Clones `source` under `new_hostname`: snapshots it with `vzdump`
    /// and restores the snapshot into a freshly allocated vmid, carrying
    /// over its actual running state instead of reinstalling from
    /// scratch. Returns immediately with the new App's id; the clone
    /// itself runs as its own background pipeline, mirroring `deploy`.
    pub async fn clone(self: &Arc<Self>, source: App, new_hostname: String, storage: String) -> Result<AppId> {
        proximity_common::validation::validate_hostname(&new_hostname)?;
        if self.ipam.hostname_exists(source.host_id, &new_hostname).await? {
            return Err(Error::ConflictHostname(new_hostname));
        }
        source
            .vmid
            .ok_or_else(|| Error::Validation(format!("app {} has no vmid", source.id)))?;

        let app_id = AppId::new();
        let now = Utc::now();
        let app = App {
            id: app_id,
            catalog_id: source.catalog_id.clone(),
            name: source.name.clone(),
            hostname: new_hostname.clone(),
            host_id: source.host_id,
            node_name: source.node_name.clone(),
            vmid: None,
            ip: None,
            status: AppStatus::Cloning,
            resources: source.resources,
            env: source.env.clone(),
            ports: source.ports.clone(),
            created_at: now,
            updated_at: now,
            deployment_log: vec![DeploymentLogEntry {
                timestamp: now,
                step: "queued".into(),
                message: format!("clone of app {} queued", source.id),
            }],
        };
        self.store.insert_app(&app).await?;

        let token = CancellationToken::new();
        self.cancellations.lock().await.insert(app_id, token.clone());
        self.channels
            .lock()
            .await
            .entry(app_id)
            .or_insert_with(|| broadcast::channel(64).0);

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = registry.run_clone(app_id, source, new_hostname, storage, token).await {
                tracing::warn!(app_id = %app_id, error = %e, "clone pipeline ended in failure");
            }
            registry.cancellations.lock().await.remove(&app_id);
        });

        Ok(app_id)
    }

    async fn run_clone(
        &self,
        app_id: AppId,
        source: App,
        new_hostname: String,
        storage: String,
        token: CancellationToken,
    ) -> Result<()> {
        let deadline = tokio::time::Instant::now() + DEFAULT_DEADLINE;
        match self
            .run_clone_steps(app_id, &source, &new_hostname, &storage, &token, deadline)
            .await
        {
            Ok(ip) => {
                let mut app = self.store.get_app(app_id).await?;
                app.status = AppStatus::Running;
                app.ip = Some(ip);
                app.updated_at = Utc::now();
                self.store.update_app(&app).await?;
                self.log_step(app_id, "done", "clone complete").await?;
                self.emit(app_id, "done", StepStatus::Succeeded, "clone complete").await;
                Ok(())
            }
            Err((e, progress)) => {
                self.emit(app_id, "rollback", StepStatus::Failed, &e.to_string()).await;
                self.rollback(source.host_id, &source.node_name, &new_hostname, &progress).await;

                if let Ok(mut app) = self.store.get_app(app_id).await {
                    app.status = AppStatus::Error;
                    app.updated_at = Utc::now();
                    let _ = self.store.update_app(&app).await;
                }
                let _ = self.log_step(app_id, "failed", &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn run_clone_steps(
        &self,
        app_id: AppId,
        source: &App,
        new_hostname: &str,
        storage: &str,
        token: &CancellationToken,
        deadline: tokio::time::Instant,
    ) -> std::result::Result<String, (Error, Progress)> {
        let mut progress = Progress::default();

        macro_rules! check_budget {
            () => {
                if let Some(e) = Self::budget_exceeded(deadline, token) {
                    return Err((e, progress.clone()));
                }
            };
        }
        macro_rules! step {
            ($name:expr, $body:expr) => {{
                check_budget!();
                self.emit(app_id, $name, StepStatus::Started, $name).await;
                let result: Result<_> = $body;
                match result {
                    Ok(v) => {
                        let _ = self.log_step(app_id, $name, "ok").await;
                        self.emit(app_id, $name, StepStatus::Succeeded, "ok").await;
                        v
                    }
                    Err(e) => return Err((e, progress.clone())),
                }
            }};
        }

        proximity_common::validation::validate_hostname(new_hostname)
            .map_err(|e| (e, progress.clone()))?;

        let source_vmid = source
            .vmid
            .ok_or_else(|| Error::Validation(format!("app {} has no vmid", source.id)))
            .map_err(|e| (e, progress.clone()))?;

        let appliance = step!(
            "appliance_ready",
            self.appliance.ensure(source.host_id, &source.node_name).await
        );

        let reservation = step!(
            "allocate_ip",
            self.ipam.reserve(source.host_id, new_hostname).await
        );
        progress.hostname_reserved = true;

        let proxmox = step!("resolve_client", self.pool.client_for(source.host_id).await);

        let backup_filename = step!("snapshot_source", {
            let opts = VzdumpOptions {
                storage: storage.to_string(),
                mode: VzdumpMode::Snapshot,
                compress: "zstd".to_string(),
            };
            match proxmox.vzdump_create(&source.node_name, source_vmid, &opts).await {
                Ok(filename) => Ok(filename),
                Err(_) => {
                    let fallback = VzdumpOptions {
                        storage: storage.to_string(),
                        mode: VzdumpMode::Suspend,
                        compress: "zstd".to_string(),
                    };
                    proxmox
                        .vzdump_create(&source.node_name, source_vmid, &fallback)
                        .await
                        .map_err(Error::from)
                }
            }
        });

        let new_vmid = step!("reserve_vmid", proxmox.next_free_vmid().await.map_err(Error::from));
        progress.vmid = Some(new_vmid);

        let net0 = format!("name=eth0,bridge=vmbr1,ip={}/24,gw={}", reservation.ip, appliance.gateway);
        step!(
            "restore_clone",
            proxmox
                .vzdump_restore(&source.node_name, &backup_filename, new_vmid, Some(&net0))
                .await
                .map_err(Error::from)
        );
        progress.container_created = true;

        step!(
            "start_container",
            proxmox.lxc_start(&source.node_name, new_vmid).await.map_err(Error::from)
        );
        progress.container_started = true;

        step!(
            "await_network",
            wait_for_network(&*proxmox, &source.node_name, new_vmid).await.map_err(Error::from)
        );

        step!(
            "register_appliance",
            self.appliance
                .register_app(source.host_id, &source.node_name, new_hostname, &reservation.ip, &source.ports)
                .await
        );
        progress.appliance_registered = true;

        step!(
            "bind_reservation",
            self.ipam.bind(source.host_id, new_hostname, app_id).await
        );

        let mut app = self.store.get_app(app_id).await.map_err(|e| (e, progress.clone()))?;
        app.vmid = Some(new_vmid);
        app.ip = Some(reservation.ip.clone());
        self.store
            .update_app(&app)
            .await
            .map_err(|e| (e, progress.clone()))?;

        Ok(reservation.ip)
    }
}

/// Polls the guest agent with a no-op probe until it responds, meaning
/// the container has booted far enough to have its network (and so a
/// DHCP lease from the Appliance) up.
async fn wait_for_network(
    proxmox: &dyn proximity_proxmox::ProxmoxApi,
    node: &str,
    vmid: u32,
) -> std::result::Result<(), proximity_proxmox::UpstreamError> {
    let deadline = tokio::time::Instant::now() + NETWORK_WAIT_TIMEOUT;
    loop {
        match proxmox
            .lxc_exec(node, vmid, &ExecCommand::probe(), Duration::from_secs(5))
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if tokio::time::Instant::now() < deadline => {
                tracing::debug!(vmid, error = %e, "container network not yet reachable, retrying");
                tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Polls `docker compose ps` until every service it reports is in the
/// `running` state, or the timeout elapses.
async fn wait_for_compose_healthy(
    proxmox: &dyn proximity_proxmox::ProxmoxApi,
    node: &str,
    vmid: u32,
    compose_path: &str,
) -> std::result::Result<(), proximity_proxmox::UpstreamError> {
    let deadline = tokio::time::Instant::now() + HEALTH_WAIT_TIMEOUT;
    loop {
        let output = proxmox
            .lxc_exec(
                node,
                vmid,
                &ExecCommand::compose_ps(compose_path),
                Duration::from_secs(15),
            )
            .await?;

        let services: Vec<&str> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let all_running = !services.is_empty()
            && services.iter().all(|line| {
                serde_json::from_str::<serde_json::Value>(line)
                    .ok()
                    .and_then(|v| v.get("State").and_then(|s| s.as_str().map(str::to_string)))
                    .is_some_and(|state| state == "running")
            });

        if all_running {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(proximity_proxmox::UpstreamError::Transient(format!(
                "compose services for vmid {vmid} did not report running within {HEALTH_WAIT_TIMEOUT:?}"
            )));
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}
