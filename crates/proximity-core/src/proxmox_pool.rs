//! Resolves a [`ProxmoxApi`] client for a given Host, decrypting its
//! stored credentials fresh on every call. Credentials are never cached
//! in memory between calls, so rotating a Host's token takes effect on
//! the very next operation against it.
use std::sync::Arc;

use async_trait::async_trait;
use proximity_common::crypto::MasterKey;
use proximity_common::{Error, HostCredentials, HostId, Result};
use proximity_proxmox::{ProxmoxApi, ProxmoxClient};

use crate::store::Store;

#[async_trait]
pub trait ProxmoxPool: Send + Sync {
    async fn client_for(&self, host_id: HostId) -> Result<Arc<dyn ProxmoxApi>>;
}

pub struct ProxmoxClientPool {
    store: Arc<dyn Store>,
    master_key: MasterKey,
}

impl ProxmoxClientPool {
    pub fn new(store: Arc<dyn Store>, master_key: MasterKey) -> Self {
        Self { store, master_key }
    }
}

#[async_trait]
impl ProxmoxPool for ProxmoxClientPool {
    async fn client_for(&self, host_id: HostId) -> Result<Arc<dyn ProxmoxApi>> {
        let host = self.store.get_host(host_id).await?;
        let plaintext = self.master_key.decrypt(&host.credentials.ciphertext)?;
        let credentials: HostCredentials =
            serde_json::from_slice(&plaintext).map_err(Error::Serialization)?;

        let client = ProxmoxClient::new(&host.endpoint, host.verify_tls, &credentials)?;
        Ok(Arc::new(client))
    }
}
