use std::time::Duration;

use async_trait::async_trait;
use proximity_common::types::HostCredentials;
use serde::de::DeserializeOwned;

use crate::error::{Result, UpstreamError};
use crate::retry::with_retry;
use crate::types::{
    ExecCommand, ExecOutput, LxcCreateSpec, LxcStatus, ProxmoxNode, ProxmoxResponse,
    ProxmoxStorage, ProxmoxTemplate, RawContainerStatus, TaskStatus, VzdumpOptions,
};

const TASK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The capability set the Deployment Pipeline, Lifecycle Controller,
/// Backup Engine and Appliance Manager invoke. A trait so tests can
/// substitute an in-process fake instead of a live Proxmox host.
#[async_trait]
pub trait ProxmoxApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<ProxmoxNode>>;
    async fn list_storages(&self, node: &str) -> Result<Vec<ProxmoxStorage>>;
    async fn list_templates(&self, node: &str, storage: &str) -> Result<Vec<ProxmoxTemplate>>;
    async fn next_free_vmid(&self) -> Result<u32>;
    async fn lxc_create(&self, node: &str, spec: &LxcCreateSpec) -> Result<()>;
    async fn lxc_start(&self, node: &str, vmid: u32) -> Result<()>;
    async fn lxc_stop(&self, node: &str, vmid: u32) -> Result<()>;
    async fn lxc_destroy(&self, node: &str, vmid: u32) -> Result<()>;
    async fn lxc_status(&self, node: &str, vmid: u32) -> Result<LxcStatus>;
    async fn lxc_exec(
        &self,
        node: &str,
        vmid: u32,
        command: &ExecCommand,
        timeout: Duration,
    ) -> Result<ExecOutput>;
    async fn vzdump_create(&self, node: &str, vmid: u32, opts: &VzdumpOptions) -> Result<String>;
    /// Restores `backup_file` into `target_vmid`. When `net0` is set, the
    /// restored container's network config is rewritten to it instead of
    /// carrying over the source container's original interface.
    async fn vzdump_restore(
        &self,
        node: &str,
        backup_file: &str,
        target_vmid: u32,
        net0: Option<&str>,
    ) -> Result<()>;
    async fn test_connection(&self) -> Result<()>;
}

/// Real Proxmox VE REST API client, one per [`proximity_common::Host`].
///
/// Credentials are never cached beyond the lifetime of the struct that
/// wraps a single call — callers construct a fresh `ProxmoxClient` per
/// request from the Host's decrypted credentials, per the "fetched per
/// call, never cached across restarts" contract in SPEC_FULL §4.1.
pub struct ProxmoxClient {
    http: reqwest::Client,
    base_url: String,
    token_header: String,
}

impl ProxmoxClient {
    pub fn new(endpoint: &str, verify_tls: bool, credentials: &HostCredentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| UpstreamError::Permanent(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: endpoint.trim_end_matches('/').to_string(),
            token_header: format!(
                "PVEAPIToken={}!{}={}",
                credentials.user, credentials.token_id, credentials.secret
            ),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api2/json{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .header("Authorization", &self.token_header)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        Self::unwrap_envelope(resp).await
    }

    async fn post<B: serde::Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .http
            .post(self.url(path))
            .header("Authorization", &self.token_header)
            .form(body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        Self::unwrap_envelope(resp).await
    }

    async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .delete(self.url(path))
            .header("Authorization", &self.token_header)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        Self::unwrap_envelope(resp).await
    }

    async fn unwrap_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| UpstreamError::Transient(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(classify_http_status(status.as_u16(), &body));
        }

        let envelope: ProxmoxResponse<T> = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::Permanent(format!("malformed response: {e} ({body})")))?;
        Ok(envelope.data)
    }

    /// Polls a task UPID until it reaches a terminal state, classifying a
    /// non-`OK` exit status as a permanent failure.
    async fn wait_for_task(&self, node: &str, upid: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status: TaskStatus = self
                .get(&format!("/nodes/{node}/tasks/{upid}/status"))
                .await?;

            if status.status == "stopped" {
                return match status.exitstatus.as_deref() {
                    Some("OK") => Ok(()),
                    Some(other) => Err(UpstreamError::Permanent(format!(
                        "task {upid} finished with status {other}"
                    ))),
                    None => Ok(()),
                };
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(UpstreamError::Transient(format!(
                    "task {upid} did not complete within {timeout:?}"
                )));
            }
            tokio::time::sleep(TASK_POLL_INTERVAL).await;
        }
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() || e.is_connect() {
        UpstreamError::Transient(e.to_string())
    } else {
        UpstreamError::Permanent(e.to_string())
    }
}

fn classify_http_status(status: u16, body: &str) -> UpstreamError {
    match status {
        401 | 403 => UpstreamError::AuthFailed(format!("{status}: {body}")),
        404 => UpstreamError::NotFound(format!("{status}: {body}")),
        409 | 425 => UpstreamError::ResourceBusy(format!("{status}: {body}")),
        500..=599 => UpstreamError::Transient(format!("{status}: {body}")),
        _ => UpstreamError::Permanent(format!("{status}: {body}")),
    }
}

#[async_trait]
impl ProxmoxApi for ProxmoxClient {
    async fn list_nodes(&self) -> Result<Vec<ProxmoxNode>> {
        with_retry(|| self.get("/nodes")).await
    }

    async fn list_storages(&self, node: &str) -> Result<Vec<ProxmoxStorage>> {
        with_retry(|| self.get(&format!("/nodes/{node}/storage"))).await
    }

    async fn list_templates(&self, node: &str, storage: &str) -> Result<Vec<ProxmoxTemplate>> {
        with_retry(|| self.get(&format!("/nodes/{node}/storage/{storage}/content"))).await
    }

    async fn next_free_vmid(&self) -> Result<u32> {
        with_retry(|| self.get("/cluster/nextid")).await
    }

    async fn lxc_create(&self, node: &str, spec: &LxcCreateSpec) -> Result<()> {
        with_retry(|| async {
            let upid: String = self.post(&format!("/nodes/{node}/lxc"), spec).await?;
            self.wait_for_task(node, &upid, Duration::from_secs(120))
                .await
        })
        .await
    }

    async fn lxc_start(&self, node: &str, vmid: u32) -> Result<()> {
        with_retry(|| async {
            let upid: String = self
                .post(&format!("/nodes/{node}/lxc/{vmid}/status/start"), &())
                .await?;
            self.wait_for_task(node, &upid, Duration::from_secs(60))
                .await
        })
        .await
    }

    async fn lxc_stop(&self, node: &str, vmid: u32) -> Result<()> {
        with_retry(|| async {
            let upid: String = self
                .post(&format!("/nodes/{node}/lxc/{vmid}/status/stop"), &())
                .await?;
            self.wait_for_task(node, &upid, Duration::from_secs(60))
                .await
        })
        .await
    }

    async fn lxc_destroy(&self, node: &str, vmid: u32) -> Result<()> {
        with_retry(|| async {
            let upid: String = self
                .delete(&format!("/nodes/{node}/lxc/{vmid}?purge=1"))
                .await?;
            self.wait_for_task(node, &upid, Duration::from_secs(60))
                .await
        })
        .await
    }

    async fn lxc_status(&self, node: &str, vmid: u32) -> Result<LxcStatus> {
        with_retry(|| async {
            let raw: RawContainerStatus = self
                .get(&format!("/nodes/{node}/lxc/{vmid}/status/current"))
                .await?;
            Ok(raw.into())
        })
        .await
    }

    async fn lxc_exec(
        &self,
        node: &str,
        vmid: u32,
        command: &ExecCommand,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        #[derive(serde::Serialize)]
        struct ExecBody<'a> {
            command: &'a [String],
            #[serde(rename = "input-data", skip_serializing_if = "Option::is_none")]
            input_data: Option<&'a str>,
        }

        #[derive(serde::Deserialize)]
        struct ExecResult {
            #[serde(default)]
            exited: bool,
            #[serde(rename = "exit-code", default)]
            exit_code: i32,
            #[serde(rename = "out-data", default)]
            out_data: String,
            #[serde(rename = "err-data", default)]
            err_data: String,
        }

        with_retry(|| async {
            let body = ExecBody {
                command: &command.argv,
                input_data: command.input_data.as_deref(),
            };
            let pid: i64 = self
                .post(&format!("/nodes/{node}/lxc/{vmid}/agent/exec"), &body)
                .await?;

            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let result: ExecResult = self
                    .get(&format!(
                        "/nodes/{node}/lxc/{vmid}/agent/exec-status?pid={pid}"
                    ))
                    .await?;

                if result.exited {
                    return Ok(ExecOutput {
                        exit_code: result.exit_code,
                        stdout: result.out_data,
                        stderr: result.err_data,
                    });
                }

                if tokio::time::Instant::now() >= deadline {
                    return Err(UpstreamError::Transient(format!(
                        "lxc_exec on vmid {vmid} did not finish within {timeout:?}"
                    )));
                }
                tokio::time::sleep(TASK_POLL_INTERVAL).await;
            }
        })
        .await
    }

    async fn vzdump_create(&self, node: &str, vmid: u32, opts: &VzdumpOptions) -> Result<String> {
        #[derive(serde::Serialize)]
        struct VzdumpBody<'a> {
            vmid: u32,
            storage: &'a str,
            mode: &'a str,
            compress: &'a str,
        }

        with_retry(|| async {
            let body = VzdumpBody {
                vmid,
                storage: &opts.storage,
                mode: opts.mode.as_proxmox_str(),
                compress: &opts.compress,
            };
            let upid: String = self.post(&format!("/nodes/{node}/vzdump"), &body).await?;
            self.wait_for_task(node, &upid, Duration::from_secs(600))
                .await?;
            Ok(upid)
        })
        .await
    }

    async fn vzdump_restore(
        &self,
        node: &str,
        backup_file: &str,
        target_vmid: u32,
        net0: Option<&str>,
    ) -> Result<()> {
        #[derive(serde::Serialize)]
        struct RestoreBody<'a> {
            vmid: u32,
            ostemplate: &'a str,
            restore: u8,
            #[serde(skip_serializing_if = "Option::is_none")]
            net0: Option<&'a str>,
        }

        with_retry(|| async {
            let body = RestoreBody {
                vmid: target_vmid,
                ostemplate: backup_file,
                restore: 1,
                net0,
            };
            let upid: String = self.post(&format!("/nodes/{node}/lxc"), &body).await?;
            self.wait_for_task(node, &upid, Duration::from_secs(600))
                .await
        })
        .await
    }

    async fn test_connection(&self) -> Result<()> {
        #[derive(serde::Deserialize)]
        struct Version {
            #[allow(dead_code)]
            version: String,
        }
        let _: Version = with_retry(|| self.get("/version")).await?;
        Ok(())
    }
}
