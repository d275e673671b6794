use crate::{resource, GroupResource, ResourceList, ScopeSelector};
use anyhow::Result;
use std::sync::Arc;

/// Scores usage of a single resource kind within a namespace.
///
/// Evaluators are shared across reconcile workers and must be safe to invoke
/// concurrently; they read cluster state and never mutate controller-owned
/// data.
#[async_trait::async_trait]
pub trait Evaluator: Send + Sync {
    /// The group/resource of the objects this evaluator scores.
    fn group_resource(&self) -> GroupResource;

    /// Returns the intersection of `names` with the resource names this
    /// evaluator can account for.
    fn matching_resources(&self, names: &[String]) -> Vec<String>;

    /// Computes the used amounts for `namespace`, restricted to the resource
    /// names declared in `hard` and to objects matching the quota's scopes.
    async fn usage(
        &self,
        namespace: &str,
        scopes: &[String],
        hard: &ResourceList,
        scope_selector: Option<&ScopeSelector>,
    ) -> Result<ResourceList>;
}

/// An immutable set of evaluators keyed by group/resource.
pub struct Registry {
    evaluators: Vec<Arc<dyn Evaluator>>,
}

// === impl Registry ===

impl Registry {
    pub fn new(evaluators: Vec<Arc<dyn Evaluator>>) -> Self {
        Self { evaluators }
    }

    pub fn get(&self, group_resource: &GroupResource) -> Option<&Arc<dyn Evaluator>> {
        self.evaluators
            .iter()
            .find(|e| e.group_resource() == *group_resource)
    }

    pub fn list(&self) -> &[Arc<dyn Evaluator>] {
        &self.evaluators
    }

    /// The subset of `names` that at least one evaluator can account for.
    pub fn accountable_resources(&self, names: &[String]) -> Vec<String> {
        let mut matched: Vec<String> = self
            .evaluators
            .iter()
            .flat_map(|e| e.matching_resources(names))
            .collect();
        matched.sort();
        matched.dedup();
        matched
    }
}

/// Aggregates usage for a namespace over every evaluator that matches one of
/// the hard-constrained resource names. Per-evaluator failures are collected
/// rather than aborting, so one broken kind cannot hide the rest of the
/// usage.
pub async fn calculate_usage(
    registry: &Registry,
    namespace: &str,
    scopes: &[String],
    hard: &ResourceList,
    scope_selector: Option<&ScopeSelector>,
) -> (resource::ParsedList, Vec<anyhow::Error>) {
    let hard_names: Vec<String> = hard.keys().cloned().collect();
    let mut total = resource::ParsedList::new();
    let mut errors = Vec::new();

    for evaluator in registry.list() {
        if evaluator.matching_resources(&hard_names).is_empty() {
            continue;
        }
        let usage = match evaluator.usage(namespace, scopes, hard, scope_selector).await {
            Ok(usage) => usage,
            Err(error) => {
                errors.push(error.context(format!(
                    "evaluating {} usage in namespace {}",
                    evaluator.group_resource(),
                    namespace
                )));
                continue;
            }
        };
        match resource::parse_list(&usage) {
            Ok(usage) => resource::add_into(&mut total, &usage),
            Err(error) => errors.push(anyhow::Error::new(error).context(format!(
                "parsing {} usage in namespace {}",
                evaluator.group_resource(),
                namespace
            ))),
        }
    }

    (total, errors)
}
