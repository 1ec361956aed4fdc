//! An in-process fake [`ProxmoxApi`] for exercising the Deployment
//! Pipeline, Lifecycle Controller and Status Reconciler without a live
//! Proxmox host, mirroring the way the teacher crate ships multiple
//! `StorageBackend` implementations behind one trait.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::ProxmoxApi;
use crate::error::{Result, UpstreamError};
use crate::types::{
    ExecCommand, ExecOutput, LxcCreateSpec, LxcStatus, ProxmoxNode, ProxmoxStorage,
    ProxmoxTemplate, VzdumpOptions,
};

#[derive(Debug, Clone)]
struct FakeContainer {
    running: bool,
}

/// Scripted failure injected on the next call to a named operation.
pub struct Injected {
    pub op: &'static str,
    pub error: UpstreamError,
}

#[derive(Default)]
pub struct FakeProxmox {
    containers: Mutex<HashMap<u32, FakeContainer>>,
    next_vmid: Mutex<u32>,
    injected: Mutex<Vec<Injected>>,
}

impl FakeProxmox {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(HashMap::new()),
            next_vmid: Mutex::new(100),
            injected: Mutex::new(Vec::new()),
        }
    }

    /// Arrange for the next call to `op` to fail with `error`.
    pub fn inject_failure(&self, op: &'static str, error: UpstreamError) {
        self.injected.lock().unwrap().push(Injected { op, error });
    }

    fn take_injected(&self, op: &str) -> Option<UpstreamError> {
        let mut guard = self.injected.lock().unwrap();
        if let Some(idx) = guard.iter().position(|i| i.op == op) {
            Some(guard.remove(idx).error)
        } else {
            None
        }
    }

    /// Directly flip a container's running state, simulating an
    /// out-of-band Proxmox action for Reconciler drift tests.
    pub fn set_running_externally(&self, vmid: u32, running: bool) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(&vmid) {
            c.running = running;
        }
    }

    pub fn container_exists(&self, vmid: u32) -> bool {
        self.containers.lock().unwrap().contains_key(&vmid)
    }
}

#[async_trait]
impl ProxmoxApi for FakeProxmox {
    async fn list_nodes(&self) -> Result<Vec<ProxmoxNode>> {
        Ok(vec![ProxmoxNode {
            node: "pve1".into(),
            status: "online".into(),
        }])
    }

    async fn list_storages(&self, _node: &str) -> Result<Vec<ProxmoxStorage>> {
        Ok(vec![ProxmoxStorage {
            storage: "local-lvm".into(),
            content: "rootdir".into(),
        }])
    }

    async fn list_templates(&self, _node: &str, _storage: &str) -> Result<Vec<ProxmoxTemplate>> {
        Ok(vec![ProxmoxTemplate {
            volid: "local:vztmpl/docker-ready.tar.gz".into(),
            size: 0,
        }])
    }

    async fn next_free_vmid(&self) -> Result<u32> {
        if let Some(e) = self.take_injected("next_free_vmid") {
            return Err(e);
        }
        let mut guard = self.next_vmid.lock().unwrap();
        let id = *guard;
        *guard += 1;
        Ok(id)
    }

    async fn lxc_create(&self, _node: &str, spec: &LxcCreateSpec) -> Result<()> {
        if let Some(e) = self.take_injected("lxc_create") {
            return Err(e);
        }
        self.containers
            .lock()
            .unwrap()
            .insert(spec.vmid, FakeContainer { running: false });
        Ok(())
    }

    async fn lxc_start(&self, _node: &str, vmid: u32) -> Result<()> {
        if let Some(e) = self.take_injected("lxc_start") {
            return Err(e);
        }
        let mut guard = self.containers.lock().unwrap();
        let c = guard
            .get_mut(&vmid)
            .ok_or_else(|| UpstreamError::NotFound(format!("vmid {vmid}")))?;
        c.running = true;
        Ok(())
    }

    async fn lxc_stop(&self, _node: &str, vmid: u32) -> Result<()> {
        if let Some(e) = self.take_injected("lxc_stop") {
            return Err(e);
        }
        let mut guard = self.containers.lock().unwrap();
        if let Some(c) = guard.get_mut(&vmid) {
            c.running = false;
        }
        Ok(())
    }

    async fn lxc_destroy(&self, _node: &str, vmid: u32) -> Result<()> {
        if let Some(e) = self.take_injected("lxc_destroy") {
            return Err(e);
        }
        self.containers.lock().unwrap().remove(&vmid);
        Ok(())
    }

    async fn lxc_status(&self, _node: &str, vmid: u32) -> Result<LxcStatus> {
        if let Some(e) = self.take_injected("lxc_status") {
            return Err(e);
        }
        let guard = self.containers.lock().unwrap();
        let c = guard
            .get(&vmid)
            .ok_or_else(|| UpstreamError::NotFound(format!("vmid {vmid}")))?;
        Ok(LxcStatus {
            running: c.running,
            uptime_s: if c.running { 42 } else { 0 },
            cpu: 0.01,
            mem_used: 64 * 1024 * 1024,
            mem_total: 512 * 1024 * 1024,
        })
    }

    async fn lxc_exec(
        &self,
        _node: &str,
        _vmid: u32,
        command: &ExecCommand,
        _timeout: Duration,
    ) -> Result<ExecOutput> {
        if let Some(e) = self.take_injected("lxc_exec") {
            return Err(e);
        }
        // Every service reports "running" immediately, matching a
        // container whose compose stack came up clean.
        let stdout = if command.argv.last().map(String::as_str) == Some("json")
            && command.argv.first().map(String::as_str) == Some("docker")
        {
            r#"{"Service":"app","State":"running"}"#.to_string()
        } else {
            String::new()
        };
        Ok(ExecOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        })
    }

    async fn vzdump_create(&self, _node: &str, vmid: u32, _opts: &VzdumpOptions) -> Result<String> {
        if let Some(e) = self.take_injected("vzdump_create") {
            return Err(e);
        }
        Ok(format!("vzdump-qemu-{vmid}-fake"))
    }

    async fn vzdump_restore(
        &self,
        _node: &str,
        _backup_file: &str,
        target_vmid: u32,
        _net0: Option<&str>,
    ) -> Result<()> {
        if let Some(e) = self.take_injected("vzdump_restore") {
            return Err(e);
        }
        self.containers
            .lock()
            .unwrap()
            .insert(target_vmid, FakeContainer { running: false });
        Ok(())
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }
}
