use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Controller metrics, registered on the admin server's registry.
#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    pub(crate) syncs: Counter,
    pub(crate) sync_errors: Counter,
    pub(crate) status_writes: Counter,
    pub(crate) replenishments: Counter,
    pub(crate) monitors: Gauge,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();

        prom.register(
            "syncs",
            "Count of account quota reconciliations",
            metrics.syncs.clone(),
        );
        prom.register(
            "sync_errors",
            "Count of account quota reconciliations that failed",
            metrics.sync_errors.clone(),
        );
        prom.register(
            "status_writes",
            "Count of account quota status updates written",
            metrics.status_writes.clone(),
        );
        prom.register(
            "replenishments",
            "Count of replenishment signals that enqueued quotas",
            metrics.replenishments.clone(),
        );
        prom.register(
            "monitors",
            "Number of running resource monitors",
            metrics.monitors.clone(),
        );

        metrics
    }
}
