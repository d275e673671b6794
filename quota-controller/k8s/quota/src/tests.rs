mod index;

use crate::client::{Error, QuotaApi};
use crate::controller::Controller;
use crate::discovery::{Discover, ResourceSet};
use crate::metrics::ControllerMetrics;
use crate::queue::RateLimitQueue;
use anyhow::Result;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tenancy_quota_controller_core::{
    resource, Evaluator, GroupResource, Registry, ResourceList, ScopeSelector,
};
use tenancy_quota_controller_k8s_api as k8s;
use tenancy_quota_controller_k8s_api::{ObjectMeta, ResourceExt};

pub(crate) fn list(entries: &[(&str, &str)]) -> ResourceList {
    entries
        .iter()
        .map(|(name, q)| (name.to_string(), k8s::Quantity(q.to_string())))
        .collect()
}

pub(crate) fn make_namespace(name: &str, account: Option<&str>) -> k8s::Namespace {
    k8s::Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: account.map(|account| {
                [(k8s::ACCOUNT_LABEL.to_string(), account.to_string())]
                    .into_iter()
                    .collect()
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub(crate) fn make_quota(name: &str, account: &str, hard: &[(&str, &str)]) -> k8s::AccountQuota {
    k8s::AccountQuota {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: k8s::AccountQuotaSpec {
            account: account.to_string(),
            quota: k8s::ResourceQuotaSpec {
                hard: Some(list(hard)),
                ..Default::default()
            },
        },
        status: None,
    }
}

/// An evaluator over fixed per-namespace usage. Like the pod evaluator it
/// zero-seeds every matched hard resource; unlike it, it reports whatever the
/// test stored, so reconciler-side masking is observable.
pub(crate) struct FakeEvaluator {
    group_resource: GroupResource,
    resources: Vec<String>,
    usage: Mutex<HashMap<String, ResourceList>>,
    fail: Mutex<bool>,
}

impl FakeEvaluator {
    pub(crate) fn pods() -> Arc<Self> {
        Arc::new(Self {
            group_resource: GroupResource::new("", "pods"),
            resources: vec!["pods".to_string()],
            usage: Mutex::new(HashMap::new()),
            fail: Mutex::new(false),
        })
    }

    pub(crate) fn new(group_resource: GroupResource, resources: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            group_resource,
            resources: resources.iter().map(|r| r.to_string()).collect(),
            usage: Mutex::new(HashMap::new()),
            fail: Mutex::new(false),
        })
    }

    pub(crate) fn set_usage(&self, namespace: &str, usage: ResourceList) {
        self.usage.lock().insert(namespace.to_string(), usage);
    }

    pub(crate) fn fail_next(&self) {
        *self.fail.lock() = true;
    }
}

#[async_trait::async_trait]
impl Evaluator for FakeEvaluator {
    fn group_resource(&self) -> GroupResource {
        self.group_resource.clone()
    }

    fn matching_resources(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|name| self.resources.contains(name))
            .cloned()
            .collect()
    }

    async fn usage(
        &self,
        namespace: &str,
        _scopes: &[String],
        hard: &ResourceList,
        _scope_selector: Option<&ScopeSelector>,
    ) -> Result<ResourceList> {
        if std::mem::take(&mut *self.fail.lock()) {
            anyhow::bail!("evaluator unavailable");
        }
        let hard_names: Vec<String> = hard.keys().cloned().collect();
        let matched = self.matching_resources(&hard_names);
        let mut used = resource::format_list(&resource::zero_list(matched.iter()));
        if let Some(stored) = self.usage.lock().get(namespace) {
            for (name, amount) in stored {
                used.insert(name.clone(), amount.clone());
            }
        }
        Ok(used)
    }
}

/// In-memory `AccountQuota` storage recording every status write.
#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<HashMap<String, k8s::AccountQuota>>,
    writes: Mutex<Vec<k8s::AccountQuota>>,
}

impl FakeApi {
    pub(crate) fn with_quotas(quotas: Vec<k8s::AccountQuota>) -> Arc<Self> {
        let api = Self::default();
        {
            let mut state = api.state.lock();
            for quota in quotas {
                state.insert(quota.name_unchecked(), quota);
            }
        }
        Arc::new(api)
    }

    pub(crate) fn status_of(&self, name: &str) -> Option<k8s::AccountQuotaStatus> {
        self.state.lock().get(name).and_then(|q| q.status.clone())
    }

    pub(crate) fn write_count(&self) -> usize {
        self.writes.lock().len()
    }
}

#[async_trait::async_trait]
impl QuotaApi for FakeApi {
    async fn get_account_quota(&self, name: &str) -> Result<Option<k8s::AccountQuota>, Error> {
        Ok(self.state.lock().get(name).cloned())
    }

    async fn update_status(&self, account_quota: &k8s::AccountQuota) -> Result<(), Error> {
        let name = account_quota.name_unchecked();
        let mut state = self.state.lock();
        if let Some(stored) = state.get_mut(&name) {
            stored.status = account_quota.status.clone();
        }
        self.writes.lock().push(account_quota.clone());
        Ok(())
    }
}

pub(crate) struct FakeDiscover(pub(crate) ResourceSet);

#[async_trait::async_trait]
impl Discover for FakeDiscover {
    async fn quotable_resources(&self) -> (ResourceSet, Option<anyhow::Error>) {
        (self.0.clone(), None)
    }
}

pub(crate) fn make_controller(
    api: Arc<FakeApi>,
    evaluators: Vec<Arc<dyn Evaluator>>,
) -> Arc<Controller> {
    let registry = Arc::new(Registry::new(evaluators));
    Arc::new(Controller::new(
        api,
        registry,
        Arc::new(FakeDiscover(ResourceSet::default())),
        None,
        Duration::from_secs(300),
        ControllerMetrics::default(),
    ))
}

/// Drains every queued key, releasing in-flight markers, sorted for stable
/// assertions.
pub(crate) async fn drain(queue: &RateLimitQueue<String>) -> Vec<String> {
    let mut keys = Vec::new();
    while !queue.is_empty() {
        let key = queue.get().await.expect("queue must not be shut down");
        queue.done(&key);
        keys.push(key);
    }
    keys.sort();
    keys
}
