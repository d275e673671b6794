#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tenancy_quota_controller_core::{GroupResource, Registry as EvaluatorRegistry};
use tenancy_quota_controller_k8s_api as k8s;
use tenancy_quota_controller_k8s_quota as quota;
use tracing::{info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "account-quota-controller",
    about = "Aggregates resource usage across an account's namespaces into AccountQuota status"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "tenancy=info,warn",
        env = "TENANCY_QUOTA_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Number of reconcile workers per queue.
    #[clap(long, default_value = "5")]
    workers: usize,

    /// Seconds between full recalculations of every account quota.
    #[clap(long, default_value = "300")]
    resync_period_secs: u64,

    /// Seconds between per-monitor replenishment resyncs.
    #[clap(long, default_value = "43200")]
    replenishment_resync_period_secs: u64,

    /// Seconds between quotable-resource discovery probes.
    #[clap(long, default_value = "30")]
    discovery_sync_period_secs: u64,

    /// Comma-separated `resource.group` names that are never monitored.
    #[clap(long, default_value = "")]
    ignored_resources: GroupResources,
}

// === impl Args ===

impl Args {
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            workers,
            resync_period_secs,
            replenishment_resync_period_secs,
            discovery_sync_period_secs,
            ignored_resources: GroupResources(ignored_resources),
        } = self;

        let mut prom = <Registry>::default();
        let metrics =
            quota::ControllerMetrics::register(prom.sub_registry_with_prefix("account_quota"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let registry = Arc::new(EvaluatorRegistry::new(vec![Arc::new(
            quota::PodEvaluator::new(runtime.client()),
        )]));
        let discovery: Arc<dyn quota::Discover> =
            Arc::new(quota::ApiDiscovery::new(runtime.client()));
        let ignored: HashSet<GroupResource> = ignored_resources.into_iter().collect();
        let monitor = Arc::new(quota::QuotaMonitor::new(
            runtime.client(),
            ignored,
            Duration::from_secs(replenishment_resync_period_secs),
            &metrics,
        ));

        let controller = Arc::new(quota::Controller::new(
            Arc::new(quota::ClusterApi::new(runtime.client())),
            registry,
            discovery.clone(),
            Some(monitor.clone()),
            Duration::from_secs(resync_period_secs),
            metrics,
        ));

        // Initial monitor setup. A partial discovery failure here is fine;
        // the sync loop will pick up whatever was missed.
        let (resources, error) = discovery.quotable_resources().await;
        if let Some(error) = error {
            if resources.is_empty() {
                return Err(error.context("initial quotable resource discovery failed"));
            }
            warn!(%error, "Initial discovery was partial, continuing and counting on a future sync");
        }
        if let Err(error) = monitor.sync_monitors(&resources) {
            warn!(%error, "Initial monitor sync failed");
        }

        // Watches feeding the event-router index.
        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            quota::index_namespaces(controller.index(), namespaces)
                .instrument(info_span!("namespaces")),
        );

        let quotas = runtime.watch_all::<k8s::AccountQuota>(watcher::Config::default());
        tokio::spawn(
            quota::index_quotas(controller.index(), quotas).instrument(info_span!("accountquotas")),
        );

        tokio::spawn(
            controller
                .clone()
                .run(workers, runtime.shutdown_handle())
                .instrument(info_span!("controller")),
        );
        tokio::spawn(
            controller
                .run_discovery_sync(
                    Duration::from_secs(discovery_sync_period_secs),
                    runtime.shutdown_handle(),
                )
                .instrument(info_span!("discovery")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait
        // for the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
struct GroupResources(Vec<GroupResource>);

impl std::str::FromStr for GroupResources {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(
            s.split(',')
                .filter(|part| !part.is_empty())
                .map(GroupResource::from)
                .collect(),
        ))
    }
}
