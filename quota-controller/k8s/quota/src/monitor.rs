//! The quota monitor.
//!
//! Owns one watch task per quotable group/version/resource. Each task
//! translates object churn into `ResourceChange` tuples on a shared
//! rate-limited queue; `run` drains that queue and invokes the controller's
//! replenishment function. The set of watch tasks is itself reconciled
//! against discovery by `sync_monitors`, under the controller's worker lock.

use crate::errors::Errors;
use crate::metrics::ControllerMetrics;
use crate::queue::RateLimitQueue;
use ahash::AHashMap as HashMap;
use anyhow::bail;
use futures::prelude::*;
use parking_lot::Mutex;
use prometheus_client::metrics::gauge::Gauge;
use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
    time::Duration,
};
use tenancy_quota_controller_core::{GroupResource, GroupVersionResource};
use tenancy_quota_controller_k8s_api as k8s;
use tenancy_quota_controller_k8s_api::watcher::{watcher, Config, Event};
use tokio::time;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::discovery::ResourceSet;

/// A replenishment signal: an object of the given kind changed, so quotas
/// accounting for it should be re-evaluated. The namespace is `None` for a
/// monitor's periodic resync.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ResourceChange {
    pub group_resource: GroupResource,
    pub namespace: Option<String>,
}

pub struct QuotaMonitor {
    client: k8s::Client,
    resync_period: Duration,
    ignored: HashSet<GroupResource>,
    monitors: Mutex<HashMap<GroupVersionResource, Monitor>>,
    resource_changes: RateLimitQueue<ResourceChange>,
    monitors_gauge: Gauge,
}

struct Monitor {
    task: tokio::task::JoinHandle<()>,
    synced: Arc<AtomicBool>,
}

// === impl QuotaMonitor ===

impl QuotaMonitor {
    pub fn new(
        client: k8s::Client,
        ignored: HashSet<GroupResource>,
        resync_period: Duration,
        metrics: &ControllerMetrics,
    ) -> Self {
        Self {
            client,
            resync_period,
            ignored,
            monitors: Mutex::new(HashMap::new()),
            resource_changes: RateLimitQueue::new(),
            monitors_gauge: metrics.monitors.clone(),
        }
    }

    /// Reconciles the running watch tasks to exactly `resources` (minus the
    /// ignored set). Starting a kind can fail without failing the rest; the
    /// offending kind is omitted until the next sync.
    pub fn sync_monitors(&self, resources: &ResourceSet) -> anyhow::Result<()> {
        let mut monitors = self.monitors.lock();

        let (to_start, to_stop) = plan(monitors.keys(), resources, &self.ignored);

        for gvr in to_stop {
            if let Some(monitor) = monitors.remove(&gvr) {
                monitor.task.abort();
                debug!(resource = %gvr, "Stopped monitor");
            }
        }

        let mut errors = Vec::new();
        for gvr in to_start {
            match self.start_monitor(&gvr) {
                Ok(monitor) => {
                    debug!(resource = %gvr, "Started monitor");
                    monitors.insert(gvr, monitor);
                }
                Err(error) => errors.push(error.context(format!("starting monitor for {}", gvr))),
            }
        }

        self.monitors_gauge.set(monitors.len() as i64);
        Errors::ok_if_empty(errors)
    }

    fn start_monitor(&self, gvr: &GroupVersionResource) -> anyhow::Result<Monitor> {
        if gvr.resource.is_empty() || gvr.version.is_empty() {
            bail!("malformed group/version/resource");
        }

        let synced = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(
            watch_resource(
                self.client.clone(),
                gvr.clone(),
                synced.clone(),
                self.resource_changes.clone(),
                self.resync_period,
            )
            .instrument(info_span!("monitor", resource = %gvr)),
        );
        Ok(Monitor { task, synced })
    }

    /// True iff every live monitor has delivered its initial list.
    pub fn is_synced(&self) -> bool {
        self.monitors
            .lock()
            .values()
            .all(|monitor| monitor.synced.load(Ordering::Acquire))
    }

    /// Polls `is_synced` until it holds or the timeout elapses.
    pub async fn wait_for_synced(&self, timeout: Duration) -> bool {
        let deadline = time::Instant::now() + timeout;
        loop {
            if self.is_synced() {
                return true;
            }
            if time::Instant::now() >= deadline {
                return false;
            }
            time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Drains replenishment signals until shutdown.
    pub async fn run<F>(self: Arc<Self>, replenish: F, drain: drain::Watch)
    where
        F: Fn(&GroupResource, Option<&str>),
    {
        info!("Starting quota monitor");
        tokio::pin! {
            let shutdown = drain.signaled();
        }
        loop {
            tokio::select! {
                change = self.resource_changes.get() => match change {
                    Some(change) => {
                        replenish(&change.group_resource, change.namespace.as_deref());
                        self.resource_changes.done(&change);
                    }
                    None => break,
                },
                _ = &mut shutdown => {
                    self.stop();
                    break;
                }
            }
        }
        info!("Shutting down quota monitor");
    }

    /// Tears down every watch task and rejects further signals.
    pub fn stop(&self) {
        self.resource_changes.shut_down();
        let mut monitors = self.monitors.lock();
        for (_, monitor) in monitors.drain() {
            monitor.task.abort();
        }
        self.monitors_gauge.set(0);
    }
}

/// Splits the desired set into monitors to start and monitors to stop.
fn plan<'a>(
    current: impl Iterator<Item = &'a GroupVersionResource>,
    desired: &ResourceSet,
    ignored: &HashSet<GroupResource>,
) -> (Vec<GroupVersionResource>, Vec<GroupVersionResource>) {
    let current: Vec<&GroupVersionResource> = current.collect();
    let to_stop = current
        .iter()
        .filter(|gvr| !desired.contains(**gvr))
        .map(|gvr| (*gvr).clone())
        .collect();
    let to_start = desired
        .iter()
        .filter(|gvr| !ignored.contains(&gvr.group_resource()))
        .filter(|gvr| !current.iter().any(|have| *have == *gvr))
        .cloned()
        .collect();
    (to_start, to_stop)
}

/// Watches one resource kind, enqueueing a change tuple per event. The
/// resync ticker periodically emits a namespace-less change so quotas
/// tracking this kind are recalculated even without churn.
async fn watch_resource(
    client: k8s::Client,
    gvr: GroupVersionResource,
    synced: Arc<AtomicBool>,
    changes: RateLimitQueue<ResourceChange>,
    resync_period: Duration,
) {
    let api: k8s::Api<k8s::DynamicObject> =
        k8s::Api::all_with(client, &dynamic_api_resource(&gvr));
    let mut events = watcher(api, Config::default()).boxed();
    let group_resource = gvr.group_resource();

    let mut resync = time::interval(resync_period);
    resync.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(Event::Applied(obj) | Event::Deleted(obj))) => {
                    changes.add(ResourceChange {
                        group_resource: group_resource.clone(),
                        namespace: obj.metadata.namespace.clone(),
                    });
                }
                Some(Ok(Event::Restarted(objs))) => {
                    synced.store(true, Ordering::Release);
                    for obj in objs {
                        changes.add(ResourceChange {
                            group_resource: group_resource.clone(),
                            namespace: obj.metadata.namespace.clone(),
                        });
                    }
                }
                Some(Err(error)) => {
                    synced.store(false, Ordering::Release);
                    warn!(%error, "Watch disconnected");
                    time::sleep(Duration::from_secs(1)).await;
                }
                None => return,
            },
            _ = resync.tick() => {
                changes.add(ResourceChange {
                    group_resource: group_resource.clone(),
                    namespace: None,
                });
            }
        }
    }
}

/// Builds the dynamic API surface for a discovered triple. The kind is only
/// type-metadata decoration; requests address the plural name.
fn dynamic_api_resource(gvr: &GroupVersionResource) -> k8s::DynamicApiResource {
    let mut kind: String = gvr
        .resource
        .chars()
        .enumerate()
        .map(|(i, c)| if i == 0 { c.to_ascii_uppercase() } else { c })
        .collect();
    if kind.len() > 1 && kind.ends_with('s') {
        kind.pop();
    }
    k8s::DynamicApiResource {
        group: gvr.group.clone(),
        version: gvr.version.clone(),
        api_version: gvr.api_version(),
        kind,
        plural: gvr.resource.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gvr(group: &str, version: &str, resource: &str) -> GroupVersionResource {
        GroupVersionResource::new(group, version, resource)
    }

    #[test]
    fn plan_starts_added_and_stops_removed() {
        let current = [gvr("", "v1", "pods"), gvr("", "v1", "services")];
        let desired: ResourceSet = [gvr("", "v1", "pods"), gvr("apps", "v1", "deployments")]
            .into_iter()
            .collect();

        let (to_start, to_stop) = plan(current.iter(), &desired, &HashSet::new());
        assert_eq!(to_start, vec![gvr("apps", "v1", "deployments")]);
        assert_eq!(to_stop, vec![gvr("", "v1", "services")]);
    }

    #[test]
    fn plan_skips_ignored_resources() {
        let desired: ResourceSet = [gvr("", "v1", "pods"), gvr("", "v1", "events")]
            .into_iter()
            .collect();
        let ignored: HashSet<GroupResource> =
            [GroupResource::new("", "events")].into_iter().collect();

        let (mut to_start, to_stop) = plan([].iter(), &desired, &ignored);
        to_start.sort();
        assert_eq!(to_start, vec![gvr("", "v1", "pods")]);
        assert!(to_stop.is_empty());
    }

    #[test]
    fn dynamic_api_resource_addresses_the_plural() {
        let api_resource = dynamic_api_resource(&gvr("apps", "v1", "deployments"));
        assert_eq!(api_resource.plural, "deployments");
        assert_eq!(api_resource.api_version, "apps/v1");
        assert_eq!(api_resource.kind, "Deployment");

        let core = dynamic_api_resource(&gvr("", "v1", "pods"));
        assert_eq!(core.api_version, "v1");
        assert_eq!(core.plural, "pods");
    }
}
