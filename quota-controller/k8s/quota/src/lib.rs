//! The account quota controller.
//!
//! Tracks quota usage across every namespace owned by an account and drives
//! each `AccountQuota`'s status to reflect the aggregate:
//!
//! - An event-router [`Index`] watches `Namespace` and `AccountQuota` objects
//!   and enqueues the quota keys affected by each change.
//! - A [`QuotaMonitor`] maintains one watch per quotable resource kind
//!   discovered at runtime, translating object churn into replenishment
//!   signals.
//! - Reconcile workers drain two rate-limited queues — a primary recalc queue
//!   and a priority queue for quotas that have never reported usage — and
//!   write back `status.total` and `status.namespaces`.
//! - A discovery sync loop re-probes the server's resource surface and
//!   reconfigures the monitor fleet under a write lock so that no reconcile
//!   ever observes a half-built watch set.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod client;
mod controller;
mod discovery;
mod errors;
mod evaluator;
mod index;
mod metrics;
mod monitor;
mod queue;
mod router;

#[cfg(test)]
mod tests;

pub use self::client::{ClusterApi, QuotaApi};
pub use self::controller::Controller;
pub use self::discovery::{ApiDiscovery, Discover, ResourceSet};
pub use self::errors::Errors;
pub use self::evaluator::PodEvaluator;
pub use self::index::{Index, SharedIndex};
pub use self::metrics::ControllerMetrics;
pub use self::monitor::{QuotaMonitor, ResourceChange};
pub use self::queue::RateLimitQueue;
pub use self::router::{index_namespaces, index_quotas};
