//! End-to-end scenarios driving the Deployment Pipeline, Lifecycle
//! Controller and Status Reconciler together against a fake Proxmox host
//! and an in-memory store, the way the teacher's higher-level crates
//! compose their own unit suites around a single fake backend.
#![cfg(test)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proximity_common::crypto::MasterKey;
use proximity_common::{
    AppStatus, Appliance, ApplianceServicesState, CatalogApp, ComposeBundle, EncryptedCredentials,
    Host, HostId, Resources, Result, ServiceState,
};
use proximity_proxmox::fake::FakeProxmox;
use proximity_proxmox::ProxmoxApi;

use crate::appliance::ApplianceManager;
use crate::backup::BackupEngine;
use crate::ipam::Ipam;
use crate::lifecycle::LifecycleController;
use crate::pipeline::{DeployRequest, PipelineRegistry};
use crate::proxmox_pool::ProxmoxPool;
use crate::store::Store;

/// Hands back the same fake client for every Host, which is all these
/// single-Host scenarios need.
struct FakePool {
    client: Arc<FakeProxmox>,
}

#[async_trait]
impl ProxmoxPool for FakePool {
    async fn client_for(&self, _host_id: HostId) -> Result<Arc<dyn ProxmoxApi>> {
        Ok(self.client.clone())
    }
}

struct Harness {
    store: Arc<dyn Store>,
    pool: Arc<dyn ProxmoxPool>,
    fake: Arc<FakeProxmox>,
    ipam: Arc<Ipam>,
    appliance: Arc<ApplianceManager>,
    pipeline: Arc<PipelineRegistry>,
    lifecycle: Arc<LifecycleController>,
    host_id: HostId,
}

async fn harness() -> Harness {
    let store: Arc<dyn Store> = Arc::new(proximity_store::SqlxStore::in_memory().await.unwrap());
    let fake = Arc::new(FakeProxmox::new());
    let pool: Arc<dyn ProxmoxPool> = Arc::new(FakePool { client: fake.clone() });
    let ipam = Arc::new(Ipam::new(store.clone()));
    let appliance = Arc::new(ApplianceManager::new(store.clone(), pool.clone()));
    let backup = Arc::new(BackupEngine::new(store.clone(), pool.clone()));
    let pipeline = Arc::new(PipelineRegistry::new(store.clone(), pool.clone(), ipam.clone(), appliance.clone()));
    let lifecycle = Arc::new(LifecycleController::new(
        store.clone(),
        pool.clone(),
        ipam.clone(),
        appliance.clone(),
        backup.clone(),
        pipeline.clone(),
    ));

    let host_id = HostId::new();
    let host = Host {
        id: host_id,
        name: "pve-1".to_string(),
        endpoint: "https://pve-1.lan:8006".to_string(),
        credentials: EncryptedCredentials { ciphertext: vec![] },
        verify_tls: false,
        is_default: true,
        nodes: vec!["pve1".to_string()],
    };
    store.put_host(&host).await.unwrap();

    // Pre-seed the appliance so `ipam.reserve` has a subnet to allocate from.
    store
        .put_appliance(&Appliance {
            host_id,
            vmid: 999,
            wan_ip: "10.10.0.1".to_string(),
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
        })
        .await
        .unwrap();

    Harness {
        store,
        pool,
        fake,
        ipam,
        appliance,
        pipeline,
        lifecycle,
        host_id,
    }
}

fn adminer() -> CatalogApp {
    CatalogApp {
        id: "adminer".to_string(),
        name: "Adminer".to_string(),
        version: "4.8.1".to_string(),
        description: "Database management in a single PHP file".to_string(),
        icon: None,
        category: "database".to_string(),
        compose_bundle: ComposeBundle {
            docker_compose: serde_json::json!({
                "services": { "adminer": { "image": "adminer", "ports": ["8080:8080"] } }
            }),
        },
        declared_ports: vec![8080],
        declared_volumes: vec![],
        declared_env: HashMap::new(),
        min_memory: 256,
        min_cpu: 1,
        tags: vec!["database".to_string()],
        author: None,
        website: None,
    }
}

fn deploy_req(h: &Harness, hostname: &str) -> DeployRequest {
    DeployRequest {
        catalog_app: adminer(),
        host_id: h.host_id,
        node: "pve1".to_string(),
        hostname: hostname.to_string(),
        resources: Resources::default(),
        env: HashMap::new(),
        storage: "local-lvm".to_string(),
        template: "local:vztmpl/docker-ready.tar.gz".to_string(),
    }
}

async fn wait_for_settled(h: &Harness, app_id: proximity_common::AppId) -> proximity_common::App {
    for _ in 0..200 {
        let app = h.store.get_app(app_id).await.unwrap();
        if app.status.is_steady() {
            return app;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("app {app_id} never settled");
}

#[tokio::test]
async fn golden_path_deploys_to_running() {
    let h = harness().await;
    let app_id = h.pipeline.deploy(deploy_req(&h, "demo1")).await.unwrap();

    let app = wait_for_settled(&h, app_id).await;
    assert_eq!(app.status, AppStatus::Running);
    assert!(app.vmid.is_some());
    assert!(app.ip.is_some());
    assert!(h.fake.container_exists(app.vmid.unwrap()));
}

#[tokio::test]
async fn duplicate_hostname_is_rejected() {
    let h = harness().await;
    let first = h.pipeline.deploy(deploy_req(&h, "demo2")).await.unwrap();
    wait_for_settled(&h, first).await;

    let second = h.pipeline.deploy(deploy_req(&h, "demo2")).await;
    assert!(matches!(second, Err(proximity_common::Error::ConflictHostname(_))));
}

#[tokio::test]
async fn clone_reuses_placement_under_a_new_hostname() {
    let h = harness().await;
    let source_id = h.pipeline.deploy(deploy_req(&h, "demo3")).await.unwrap();
    let source = wait_for_settled(&h, source_id).await;

    let clone_id = h
        .lifecycle
        .clone_app(source_id, "demo3-clone".to_string(), "local-lvm".to_string())
        .await
        .unwrap();

    let clone = wait_for_settled(&h, clone_id).await;
    assert_ne!(clone.id, source.id);
    assert_ne!(clone.vmid, source.vmid);
    assert_eq!(clone.hostname, "demo3-clone");
    assert_eq!(clone.host_id, source.host_id);
    assert_eq!(clone.node_name, source.node_name);
    assert!(h.fake.container_exists(clone.vmid.unwrap()));

    let source_again = h.store.get_app(source_id).await.unwrap();
    assert_eq!(source_again.status, AppStatus::Running);
}

#[tokio::test]
async fn pipeline_failure_rolls_back_reservation_and_container() {
    let h = harness().await;
    h.fake.inject_failure("lxc_exec", proximity_proxmox::UpstreamError::Permanent("compose push failed".into()));

    let app_id = h.pipeline.deploy(deploy_req(&h, "demo4")).await.unwrap();
    let app = wait_for_settled(&h, app_id).await;

    assert_eq!(app.status, AppStatus::Error);
    assert!(!h.ipam.hostname_exists(h.host_id, "demo4").await.unwrap());
    if let Some(vmid) = app.vmid {
        assert!(!h.fake.container_exists(vmid));
    }
}

#[tokio::test]
async fn appliance_restart_does_not_disturb_running_apps() {
    let h = harness().await;
    let app_id = h.pipeline.deploy(deploy_req(&h, "demo5")).await.unwrap();
    let app = wait_for_settled(&h, app_id).await;
    assert_eq!(app.status, AppStatus::Running);

    h.appliance.restart(h.host_id, "pve1").await.unwrap();

    let status = h.pool.client_for(h.host_id).await.unwrap().lxc_status("pve1", app.vmid.unwrap()).await.unwrap();
    assert!(status.running);
}

#[tokio::test]
async fn reconciler_detects_and_corrects_drift() {
    let h = harness().await;
    let app_id = h.pipeline.deploy(deploy_req(&h, "demo6")).await.unwrap();
    let app = wait_for_settled(&h, app_id).await;
    assert_eq!(app.status, AppStatus::Running);

    // Simulate the container being stopped directly on the host, outside
    // any Lifecycle Controller action.
    h.fake.set_running_externally(app.vmid.unwrap(), false);

    let reconciler = Arc::new(crate::reconciler::Reconciler::new(h.store.clone(), h.pool.clone()));
    reconciler.spawn_for_host(h.host_id);

    for _ in 0..200 {
        let app = h.store.get_app(app_id).await.unwrap();
        if app.status == AppStatus::Stopped {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("reconciler never corrected drift for app {app_id}");
}
