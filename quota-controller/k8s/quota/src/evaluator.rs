//! The pod evaluator.
//!
//! Scores pod usage within a namespace: the number of non-terminal pods and
//! the cpu/memory their containers request or are limited to. Pods outside
//! the quota's scopes are not counted. Usage is zero-seeded for every matched
//! hard resource so that an empty namespace reports explicit zeros.

use anyhow::{Context, Result};
use tenancy_quota_controller_core::{
    quantity::ParsedQuantity,
    resource::{self, ParsedList},
    Evaluator, GroupResource, ResourceList, ScopeSelector,
};
use tenancy_quota_controller_k8s_api as k8s;

const POD_RESOURCES: [&str; 8] = [
    "pods",
    "count/pods",
    "cpu",
    "memory",
    "requests.cpu",
    "requests.memory",
    "limits.cpu",
    "limits.memory",
];

const SCOPE_TERMINATING: &str = "Terminating";
const SCOPE_NOT_TERMINATING: &str = "NotTerminating";
const SCOPE_BEST_EFFORT: &str = "BestEffort";
const SCOPE_NOT_BEST_EFFORT: &str = "NotBestEffort";
const SCOPE_PRIORITY_CLASS: &str = "PriorityClass";

pub struct PodEvaluator {
    client: k8s::Client,
}

// === impl PodEvaluator ===

impl PodEvaluator {
    pub fn new(client: k8s::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Evaluator for PodEvaluator {
    fn group_resource(&self) -> GroupResource {
        GroupResource::new("", "pods")
    }

    fn matching_resources(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|name| POD_RESOURCES.contains(&name.as_str()))
            .cloned()
            .collect()
    }

    async fn usage(
        &self,
        namespace: &str,
        scopes: &[String],
        hard: &ResourceList,
        scope_selector: Option<&ScopeSelector>,
    ) -> Result<ResourceList> {
        let hard_names: Vec<String> = hard.keys().cloned().collect();
        let matched = self.matching_resources(&hard_names);
        if matched.is_empty() {
            return Ok(ResourceList::new());
        }

        let api: k8s::Api<k8s::Pod> = k8s::Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&k8s::ListParams::default())
            .await
            .with_context(|| format!("listing pods in namespace {}", namespace))?;

        let mut used = resource::zero_list(matched.iter());
        for pod in &pods.items {
            if is_terminal(pod) {
                continue;
            }
            if !matches_scopes(pod, scopes) || !matches_scope_selector(pod, scope_selector) {
                continue;
            }
            accumulate(&mut used, pod, &matched);
        }
        Ok(resource::format_list(&used))
    }
}

fn accumulate(used: &mut ParsedList, pod: &k8s::Pod, matched: &[String]) {
    for name in matched {
        let amount = match name.as_str() {
            "pods" | "count/pods" => ParsedQuantity::one(),
            "cpu" | "requests.cpu" => pod_compute(pod, "cpu", false),
            "memory" | "requests.memory" => pod_compute(pod, "memory", false),
            "limits.cpu" => pod_compute(pod, "cpu", true),
            "limits.memory" => pod_compute(pod, "memory", true),
            _ => continue,
        };
        if let Some(entry) = used.get_mut(name) {
            *entry = entry.add(amount);
        }
    }
}

/// A pod's effective request/limit for a compute resource: the sum over its
/// containers, or the largest init container if that is greater.
fn pod_compute(pod: &k8s::Pod, resource_name: &str, limits: bool) -> ParsedQuantity {
    let Some(spec) = pod.spec.as_ref() else {
        return ParsedQuantity::zero();
    };

    let mut total = ParsedQuantity::zero();
    for container in &spec.containers {
        total = total.add(container_compute(container, resource_name, limits));
    }

    let mut init_max = ParsedQuantity::zero();
    for container in spec.init_containers.iter().flatten() {
        init_max = init_max.max(container_compute(container, resource_name, limits));
    }

    total.max(init_max)
}

fn container_compute(
    container: &k8s::Container,
    resource_name: &str,
    limits: bool,
) -> ParsedQuantity {
    container
        .resources
        .as_ref()
        .and_then(|r| {
            if limits {
                r.limits.as_ref()
            } else {
                r.requests.as_ref()
            }
        })
        .and_then(|amounts| amounts.get(resource_name))
        .and_then(|q| ParsedQuantity::parse(q).ok())
        .unwrap_or_else(ParsedQuantity::zero)
}

fn is_terminal(pod: &k8s::Pod) -> bool {
    matches!(
        pod.status
            .as_ref()
            .and_then(|status| status.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

fn is_best_effort(pod: &k8s::Pod) -> bool {
    let Some(spec) = pod.spec.as_ref() else {
        return true;
    };
    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .all(|container| {
            container.resources.as_ref().map_or(true, |r| {
                let has = |amounts: &Option<std::collections::BTreeMap<String, k8s::Quantity>>| {
                    amounts
                        .as_ref()
                        .map_or(false, |a| a.contains_key("cpu") || a.contains_key("memory"))
                };
                !has(&r.requests) && !has(&r.limits)
            })
        })
}

/// Every declared scope must match (scopes are ANDed).
fn matches_scopes(pod: &k8s::Pod, scopes: &[String]) -> bool {
    scopes.iter().all(|scope| match scope.as_str() {
        SCOPE_TERMINATING => pod
            .spec
            .as_ref()
            .map_or(false, |s| s.active_deadline_seconds.is_some()),
        SCOPE_NOT_TERMINATING => pod
            .spec
            .as_ref()
            .map_or(true, |s| s.active_deadline_seconds.is_none()),
        SCOPE_BEST_EFFORT => is_best_effort(pod),
        SCOPE_NOT_BEST_EFFORT => !is_best_effort(pod),
        // Unknown scopes exclude everything rather than over-counting.
        _ => false,
    })
}

fn matches_scope_selector(pod: &k8s::Pod, selector: Option<&ScopeSelector>) -> bool {
    let Some(expressions) = selector.and_then(|s| s.match_expressions.as_ref()) else {
        return true;
    };

    expressions.iter().all(|expr| {
        if expr.scope_name != SCOPE_PRIORITY_CLASS {
            // Only priority-class selection applies to pods.
            return false;
        }
        let priority_class = pod
            .spec
            .as_ref()
            .and_then(|s| s.priority_class_name.as_deref());
        let values = expr.values.as_deref().unwrap_or_default();
        match expr.operator.as_str() {
            "In" => priority_class.map_or(false, |pc| values.iter().any(|v| v == pc)),
            "NotIn" => priority_class.map_or(true, |pc| !values.iter().any(|v| v == pc)),
            "Exists" => priority_class.is_some(),
            "DoesNotExist" => priority_class.is_none(),
            _ => false,
        }
    })
}
