use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Proxmox API response envelope — every endpoint wraps its payload in
/// `{"data": ...}`.
#[derive(Debug, Deserialize)]
pub struct ProxmoxResponse<T> {
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxmoxNode {
    pub node: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxmoxStorage {
    pub storage: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxmoxTemplate {
    pub volid: String,
    #[serde(default)]
    pub size: u64,
}

/// Parameters for `lxc_create`. Optional fields use
/// `skip_serializing_if` so Proxmox's defaults apply when the caller
/// doesn't set them, matching the reference client's request shape.
#[derive(Debug, Clone, Serialize)]
pub struct LxcCreateSpec {
    pub vmid: u32,
    pub ostemplate: String,
    pub hostname: String,
    pub memory: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap: Option<u32>,
    pub cores: u32,
    pub rootfs: String,
    /// e.g. `"name=eth0,bridge=vmbr1,ip=dhcp"` — the LAN NIC into the
    /// managed subnet.
    pub net0: String,
    pub unprivileged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub storage: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LxcStatus {
    pub running: bool,
    pub uptime_s: u64,
    pub cpu: f64,
    pub mem_used: u64,
    pub mem_total: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawContainerStatus {
    pub status: String,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub mem: u64,
    #[serde(default)]
    pub maxmem: u64,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl From<RawContainerStatus> for LxcStatus {
    fn from(raw: RawContainerStatus) -> Self {
        Self {
            running: raw.status == "running",
            uptime_s: raw.uptime,
            cpu: raw.cpu,
            mem_used: raw.mem,
            mem_total: raw.maxmem,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskStatus {
    pub status: String,
    #[serde(default)]
    pub exitstatus: Option<String>,
}

/// A typed, argv-style command for `lxc_exec`. Built only from named,
/// validated parameters — never from a raw shell string — so no
/// caller-controlled value can introduce a shell metacharacter into the
/// command actually executed inside the container.
#[derive(Debug, Clone, Serialize)]
pub struct ExecCommand {
    pub argv: Vec<String>,
    /// Base64 payload piped to the command's stdin, mirroring the
    /// QEMU guest agent's `guest-exec` `input-data` field. Used to push
    /// file contents into a container without ever shell-interpolating
    /// the content itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_data: Option<String>,
}

impl ExecCommand {
    /// `docker compose -f <path> up -d`
    pub fn compose_up(compose_path: &str) -> Self {
        Self {
            argv: vec![
                "docker".into(),
                "compose".into(),
                "-f".into(),
                compose_path.into(),
                "up".into(),
                "-d".into(),
            ],
            input_data: None,
        }
    }

    /// `docker compose -f <path> pull`
    pub fn compose_pull(compose_path: &str) -> Self {
        Self {
            argv: vec![
                "docker".into(),
                "compose".into(),
                "-f".into(),
                compose_path.into(),
                "pull".into(),
            ],
            input_data: None,
        }
    }

    /// `docker compose -f <path> up -d --force-recreate`
    pub fn compose_up_force_recreate(compose_path: &str) -> Self {
        Self {
            argv: vec![
                "docker".into(),
                "compose".into(),
                "-f".into(),
                compose_path.into(),
                "up".into(),
                "-d".into(),
                "--force-recreate".into(),
            ],
            input_data: None,
        }
    }

    /// `docker compose -f <path> ps --format json`, used for install-step
    /// health waiting.
    pub fn compose_ps(compose_path: &str) -> Self {
        Self {
            argv: vec![
                "docker".into(),
                "compose".into(),
                "-f".into(),
                compose_path.into(),
                "ps".into(),
                "--format".into(),
                "json".into(),
            ],
            input_data: None,
        }
    }

    /// `true`, a zero-cost probe used to confirm the guest agent (and so
    /// the container's network) is reachable before pushing files into it.
    pub fn probe() -> Self {
        Self {
            argv: vec!["true".into()],
            input_data: None,
        }
    }

    /// `kill -HUP <pid>`, used by the Appliance Manager to reload
    /// dnsmasq/the reverse proxy after a config write.
    pub fn signal_hup(pid: u32) -> Self {
        Self {
            argv: vec!["kill".into(), "-HUP".into(), pid.to_string()],
            input_data: None,
        }
    }

    /// `cat <path>`, used to read a well-known pidfile before signaling it.
    pub fn read_file(path: &str) -> Self {
        Self {
            argv: vec!["cat".into(), path.into()],
            input_data: None,
        }
    }

    /// `mkdir -p <path>`.
    pub fn mkdir_p(path: &str) -> Self {
        Self {
            argv: vec!["mkdir".into(), "-p".into(), path.into()],
            input_data: None,
        }
    }

    /// `base64 -d -o <path>`, fed `contents_b64` on stdin. The Appliance
    /// Manager writes a new config under a temp path this way, then
    /// renames it into place, so a reload never observes a half-written
    /// file.
    pub fn write_file_base64(path: &str, contents_b64: &str) -> Self {
        Self {
            argv: vec!["base64".into(), "-d".into(), "-o".into(), path.into()],
            input_data: Some(contents_b64.to_string()),
        }
    }

    /// `mv <from> <to>`, the rename half of write-new-then-rename.
    pub fn rename(from: &str, to: &str) -> Self {
        Self {
            argv: vec!["mv".into(), from.into(), to.into()],
            input_data: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VzdumpOptions {
    pub storage: String,
    /// Proxmox `mode`: "snapshot" preferred, "suspend" fallback.
    pub mode: VzdumpMode,
    pub compress: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VzdumpMode {
    #[default]
    Snapshot,
    Suspend,
}

impl VzdumpMode {
    pub fn as_proxmox_str(&self) -> &'static str {
        match self {
            VzdumpMode::Snapshot => "snapshot",
            VzdumpMode::Suspend => "suspend",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}
