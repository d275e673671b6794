//! Typed access to `AccountQuota` objects.
//!
//! The controller reads and writes through this seam so reconcile behaviour
//! can be exercised against an in-memory implementation.

use tenancy_quota_controller_k8s_api as k8s;
use tenancy_quota_controller_k8s_api::ResourceExt;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("API request failed: {0}")]
    Api(#[source] kube::Error),

    #[error("failed to encode status: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    /// A resource-version conflict on a status write; the caller re-enqueues
    /// with backoff and retries against a fresh read.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Api(kube::Error::Api(rsp)) if rsp.code == 409)
    }
}

#[async_trait::async_trait]
pub trait QuotaApi: Send + Sync + 'static {
    /// Fetches an account quota by name; `None` once it no longer exists.
    async fn get_account_quota(&self, name: &str) -> Result<Option<k8s::AccountQuota>, Error>;

    /// Replaces the status subresource. The write is conditional on the
    /// resource version carried by `account_quota`.
    async fn update_status(&self, account_quota: &k8s::AccountQuota) -> Result<(), Error>;
}

pub struct ClusterApi {
    api: k8s::Api<k8s::AccountQuota>,
}

// === impl ClusterApi ===

impl ClusterApi {
    pub fn new(client: k8s::Client) -> Self {
        Self {
            api: k8s::Api::all(client),
        }
    }
}

#[async_trait::async_trait]
impl QuotaApi for ClusterApi {
    async fn get_account_quota(&self, name: &str) -> Result<Option<k8s::AccountQuota>, Error> {
        match self.api.get(name).await {
            Ok(account_quota) => Ok(Some(account_quota)),
            Err(kube::Error::Api(rsp)) if rsp.code == 404 => Ok(None),
            Err(error) => Err(Error::Api(error)),
        }
    }

    async fn update_status(&self, account_quota: &k8s::AccountQuota) -> Result<(), Error> {
        let name = account_quota.name_unchecked();
        let data = serde_json::to_vec(account_quota)?;
        self.api
            .replace_status(&name, &k8s::PostParams::default(), data)
            .await
            .map(drop)
            .map_err(Error::Api)
    }
}
