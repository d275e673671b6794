//! The account quota controller.
//!
//! Ties the event-router index, the quota monitor and the work queues
//! together: workers drain the queues and reconcile one quota at a time; the
//! discovery sync loop reshapes the monitor fleet under the worker lock; a
//! full-resync ticker periodically re-enqueues every quota.

use crate::client::QuotaApi;
use crate::discovery::{format_diff, merge_discovery, Discover, ResourceSet};
use crate::errors::Errors;
use crate::index::{Index, SharedIndex};
use crate::metrics::ControllerMetrics;
use crate::monitor::QuotaMonitor;
use crate::queue::RateLimitQueue;
use anyhow::anyhow;
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tenancy_quota_controller_core::{self as quota, resource, GroupResource};
use tenancy_quota_controller_k8s_api as k8s;
use tokio::{sync::RwLock, time};
use tracing::{debug, error, info, info_span, warn, Instrument};

pub struct Controller {
    pub(crate) api: Arc<dyn QuotaApi>,
    pub(crate) registry: Arc<quota::Registry>,
    pub(crate) discovery: Arc<dyn Discover>,
    pub(crate) monitor: Option<Arc<QuotaMonitor>>,
    pub(crate) index: SharedIndex,
    pub(crate) primary: RateLimitQueue<String>,
    pub(crate) priority: RateLimitQueue<String>,
    /// Workers hold this shared while reconciling; the discovery sync loop
    /// holds it exclusively while the monitor fleet is reconfigured.
    pub(crate) worker_lock: Arc<RwLock<()>>,
    pub(crate) resync_period: Duration,
    pub(crate) metrics: ControllerMetrics,
}

// === impl Controller ===

impl Controller {
    pub fn new(
        api: Arc<dyn QuotaApi>,
        registry: Arc<quota::Registry>,
        discovery: Arc<dyn Discover>,
        monitor: Option<Arc<QuotaMonitor>>,
        resync_period: Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        let primary = RateLimitQueue::new();
        let priority = RateLimitQueue::new();
        let index = Index::shared(registry.clone(), primary.clone(), priority.clone());
        Self {
            api,
            registry,
            discovery,
            monitor,
            index,
            primary,
            priority,
            worker_lock: Arc::new(RwLock::new(())),
            resync_period,
            metrics,
        }
    }

    /// The shared index fed by the namespace and quota watches.
    pub fn index(&self) -> SharedIndex {
        self.index.clone()
    }

    /// Runs the controller: the monitor, `workers` consumers per queue and
    /// the full-resync ticker. Returns once the drain signal fires and both
    /// queues have been shut down.
    pub async fn run(self: Arc<Self>, workers: usize, drain: drain::Watch) {
        info!(workers, "Starting account quota controller");

        if let Some(monitor) = self.monitor.clone() {
            let controller = self.clone();
            tokio::spawn(
                monitor
                    .run(
                        move |group_resource, namespace| {
                            controller.replenish_quota(group_resource, namespace)
                        },
                        drain.clone(),
                    )
                    .instrument(info_span!("quota_monitor")),
            );
        }

        let mut worker_tasks = Vec::with_capacity(workers * 2);
        for i in 0..workers {
            worker_tasks.push(tokio::spawn(
                self.clone()
                    .worker(self.primary.clone(), "primary")
                    .instrument(info_span!("worker", queue = "primary", index = i)),
            ));
            worker_tasks.push(tokio::spawn(
                self.clone()
                    .worker(self.priority.clone(), "priority")
                    .instrument(info_span!("worker", queue = "priority", index = i)),
            ));
        }

        let controller = self.clone();
        let resync = tokio::spawn(
            async move {
                let mut tick = time::interval(controller.resync_period);
                tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    controller.enqueue_all();
                }
            }
            .instrument(info_span!("full_resync")),
        );

        let release = drain.signaled().await;
        info!("Shutting down account quota controller");
        resync.abort();
        self.primary.shut_down();
        self.priority.shut_down();
        for task in worker_tasks {
            let _ = task.await;
        }
        drop(release);
    }

    /// Periodically re-probes discovery and reconfigures the quota monitor
    /// when the quotable set changes.
    pub async fn run_discovery_sync(self: Arc<Self>, period: Duration, drain: drain::Watch) {
        let Some(monitor) = self.monitor.clone() else {
            return;
        };

        let mut old_resources = ResourceSet::default();
        let mut tick = time::interval(period);
        tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        tokio::pin! {
            let shutdown = drain.signaled();
        }

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = &mut shutdown => {
                    info!("Shutting down discovery sync");
                    return;
                }
            }

            let (resources, discovery_error) = self.discovery.quotable_resources().await;
            if let Some(error) = &discovery_error {
                warn!(%error, "Quotable resource discovery failed");
            }
            let Some(new_resources) =
                merge_discovery(&old_resources, resources, discovery_error.as_ref())
            else {
                continue;
            };
            if new_resources == old_resources {
                debug!("No resource updates from discovery");
                continue;
            }

            // Pause workers so no reconcile runs against a half-reconfigured
            // monitor fleet.
            let _paused = self.worker_lock.write().await;
            info!(
                diff = %format_diff(&old_resources, &new_resources),
                "Syncing quota monitors with updated resources from discovery"
            );
            if let Err(error) = monitor.sync_monitors(&new_resources) {
                warn!(%error, "Failed to sync resource monitors");
                continue;
            }
            // Bounded by one period so an unservable kind cannot wedge the
            // loop; workers then resume against the partially synced fleet
            // and the next tick retries.
            if !monitor.wait_for_synced(period).await {
                warn!("Timed out waiting for quota monitor sync");
                continue;
            }
            old_resources = new_resources;
            debug!("Synced quota monitors");
        }
    }

    async fn worker(self: Arc<Self>, queue: RateLimitQueue<String>, queue_name: &'static str) {
        loop {
            let controller = self.clone();
            let consumer = queue.clone();
            let task = tokio::spawn(async move { controller.process(consumer).await });
            match task.await {
                // The queue was shut down.
                Ok(()) => return,
                Err(join_error) if join_error.is_panic() => {
                    error!(queue = queue_name, "Worker panicked, restarting");
                }
                Err(_) => return,
            }
        }
    }

    async fn process(self: Arc<Self>, queue: RateLimitQueue<String>) {
        while let Some(key) = queue.get().await {
            let _running = self.worker_lock.read().await;
            self.metrics.syncs.inc();
            match self.sync_key(&key).await {
                Ok(()) => {
                    queue.forget(&key);
                }
                Err(error) => {
                    self.metrics.sync_errors.inc();
                    warn!(%key, %error, "Failed to sync account quota");
                    queue.add_rate_limited(key.clone());
                }
            }
            queue.done(&key);
        }
    }

    pub(crate) async fn sync_key(&self, key: &str) -> anyhow::Result<()> {
        let start = time::Instant::now();
        let account_quota = match self.api.get_account_quota(key).await {
            Ok(Some(account_quota)) => account_quota,
            Ok(None) => {
                debug!(%key, "Account quota was deleted");
                return Ok(());
            }
            Err(error) => {
                return Err(anyhow!(error).context(format!("retrieving account quota {}", key)))
            }
        };
        let result = self.sync_account_quota(account_quota).await;
        debug!(%key, elapsed = ?start.elapsed(), "Finished syncing account quota");
        result
    }

    /// Recomputes a quota's status across all of its account's namespaces and
    /// writes it back if anything changed.
    async fn sync_account_quota(&self, account_quota: k8s::AccountQuota) -> anyhow::Result<()> {
        let spec_hard = account_quota.spec.quota.hard.clone().unwrap_or_default();
        let previous = account_quota.status.as_ref();

        // Dirty if the declared limits are not yet echoed in status, or if
        // this quota has never reported usage.
        let mut dirty = !resource::equals_lists(
            Some(&spec_hard),
            previous.and_then(|s| s.total.hard.as_ref()),
        ) || previous.map_or(true, |s| s.total.hard.is_none() || s.total.used.is_none());

        let hard_names: BTreeSet<String> = spec_hard.keys().cloned().collect();
        let hard_names_vec: Vec<String> = hard_names.iter().cloned().collect();
        let scopes = account_quota.spec.quota.scopes.clone().unwrap_or_default();
        let scope_selector = account_quota.spec.quota.scope_selector.as_ref();

        let namespaces = self
            .index
            .read()
            .namespaces_of_account(&account_quota.spec.account);

        // Totals start at zero for every hard resource some evaluator can
        // score, so a quota with no namespaces still reports explicit zeros.
        let accountable = self.registry.accountable_resources(&hard_names_vec);
        let mut total_used = resource::zero_list(accountable.iter());
        let mut by_namespace = Vec::with_capacity(namespaces.len());
        let mut errors = Vec::new();

        for namespace in &namespaces {
            let (new_usage, mut usage_errors) = quota::calculate_usage(
                &self.registry,
                namespace,
                &scopes,
                &spec_hard,
                scope_selector,
            )
            .await;
            errors.append(&mut usage_errors);

            // Seed from the previous observation so a resource an evaluator
            // transiently stops reporting keeps its last value.
            let mut used = previous
                .and_then(|s| {
                    s.namespaces
                        .iter()
                        .find(|entry| entry.namespace == *namespace)
                })
                .and_then(|entry| entry.status.used.as_ref())
                .map(resource::parse_list_lossy)
                .unwrap_or_default();
            for (name, amount) in new_usage {
                used.insert(name, amount);
            }

            let used = resource::mask(&used, &hard_names);
            resource::add_into(&mut total_used, &used);
            by_namespace.push(k8s::AccountQuotaNamespaceStatus {
                namespace: namespace.clone(),
                status: k8s::ResourceQuotaStatus {
                    hard: None,
                    used: Some(resource::format_list(&used)),
                },
            });
        }

        let total_used = resource::format_list(&total_used);
        dirty = dirty
            || !resource::equals_lists(
                Some(&total_used),
                previous.and_then(|s| s.total.used.as_ref()),
            );

        if dirty {
            let mut usage = account_quota.clone();
            usage.status = Some(k8s::AccountQuotaStatus {
                total: k8s::ResourceQuotaStatus {
                    hard: Some(spec_hard),
                    used: Some(total_used),
                },
                namespaces: by_namespace,
            });
            match self.api.update_status(&usage).await {
                Ok(()) => {
                    self.metrics.status_writes.inc();
                }
                Err(error) => {
                    if error.is_conflict() {
                        debug!("Status update conflicted, retrying with backoff");
                    }
                    errors.push(anyhow!(error).context("updating status"));
                }
            }
        }

        Errors::ok_if_empty(errors)
    }

    /// Re-evaluates every quota tracking a resource the changed kind's
    /// evaluator can score.
    pub(crate) fn replenish_quota(&self, group_resource: &GroupResource, namespace: Option<&str>) {
        let Some(evaluator) = self
            .registry
            .get(group_resource)
            .map(|evaluator| evaluator.clone())
        else {
            return;
        };

        let quotas = self.index.read().quotas_tracking(evaluator.as_ref());
        if quotas.is_empty() {
            return;
        }
        debug!(
            resource = %group_resource,
            namespace = namespace.unwrap_or("*"),
            count = quotas.len(),
            "Replenishing quotas"
        );
        for name in quotas {
            self.primary.add(name);
        }
        self.metrics.replenishments.inc();
    }

    /// Enqueues every known quota for a full usage recalculation.
    pub(crate) fn enqueue_all(&self) {
        let names = self.index.read().quota_names();
        debug!(
            count = names.len(),
            "Queued all account quotas for full usage recalculation"
        );
        for name in names {
            self.primary.add(name);
        }
    }
}
