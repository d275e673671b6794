//! Watch-event pumps feeding the shared index.
//!
//! Each pump consumes one resource's watch stream for the life of the
//! process. Restart events (relists after a watch is re-established) are
//! diffed against the indexed set so objects deleted during a disconnect are
//! still observed.

use crate::index::SharedIndex;
use futures::prelude::*;
use tenancy_quota_controller_k8s_api as k8s;
use tenancy_quota_controller_k8s_api::{watcher::Event, ResourceExt};

pub async fn index_namespaces(
    index: SharedIndex,
    events: impl Stream<Item = Event<k8s::Namespace>>,
) {
    tokio::pin!(events);
    while let Some(event) = events.next().await {
        match event {
            Event::Applied(ns) => index.write().apply_namespace(&ns),
            Event::Deleted(ns) => {
                let name = ns.name_unchecked();
                index.write().delete_namespace(&name);
            }
            Event::Restarted(namespaces) => index.write().reset_namespaces(namespaces),
        }
    }
}

pub async fn index_quotas(
    index: SharedIndex,
    events: impl Stream<Item = Event<k8s::AccountQuota>>,
) {
    tokio::pin!(events);
    while let Some(event) = events.next().await {
        match event {
            Event::Applied(account_quota) => index.write().apply_quota(&account_quota),
            Event::Deleted(account_quota) => {
                let name = account_quota.name_unchecked();
                index.write().delete_quota(&name);
            }
            Event::Restarted(quotas) => index.write().reset_quotas(quotas),
        }
    }
}
