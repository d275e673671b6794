//! Quotable-resource discovery.
//!
//! A resource kind is quotable when the server exposes it with the create,
//! list, watch and delete verbs. Discovery can fail per API group; partial
//! results are returned alongside the error so the sync loop can union them
//! with what it already monitors instead of tearing watches down.

use crate::errors::Errors;
use ahash::AHashSet;
use anyhow::anyhow;
use tenancy_quota_controller_core::GroupVersionResource;
use tenancy_quota_controller_k8s_api as k8s;

pub type ResourceSet = AHashSet<GroupVersionResource>;

const QUOTABLE_VERBS: [&str; 4] = ["create", "list", "watch", "delete"];

#[async_trait::async_trait]
pub trait Discover: Send + Sync + 'static {
    /// Returns the current quotable set. The set may be partial when the
    /// error is set; an empty set with an error is a hard failure.
    async fn quotable_resources(&self) -> (ResourceSet, Option<anyhow::Error>);
}

/// Discovery against the live API surface.
pub struct ApiDiscovery {
    client: k8s::Client,
}

// === impl ApiDiscovery ===

impl ApiDiscovery {
    pub fn new(client: k8s::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Discover for ApiDiscovery {
    async fn quotable_resources(&self) -> (ResourceSet, Option<anyhow::Error>) {
        let mut resources = ResourceSet::default();
        let mut errors = Vec::new();

        match self.client.list_core_api_versions().await {
            Ok(versions) => {
                for version in &versions.versions {
                    match self.client.list_core_api_resources(version).await {
                        Ok(list) => collect_quotable(&mut resources, &list),
                        Err(error) => {
                            errors.push(anyhow!(error).context(format!("core/{}", version)))
                        }
                    }
                }
            }
            Err(error) => errors.push(anyhow!(error).context("listing core API versions")),
        }

        match self.client.list_api_groups().await {
            Ok(groups) => {
                for group in &groups.groups {
                    let Some(version) = group
                        .preferred_version
                        .as_ref()
                        .or_else(|| group.versions.first())
                    else {
                        continue;
                    };
                    match self
                        .client
                        .list_api_group_resources(&version.group_version)
                        .await
                    {
                        Ok(list) => collect_quotable(&mut resources, &list),
                        Err(error) => errors
                            .push(anyhow!(error).context(version.group_version.clone())),
                    }
                }
            }
            Err(error) => errors.push(anyhow!(error).context("listing API groups")),
        }

        let error = Errors::ok_if_empty(errors).err();
        (resources, error)
    }
}

fn collect_quotable(resources: &mut ResourceSet, list: &k8s::APIResourceList) {
    for resource in &list.resources {
        // Subresources (e.g. `pods/status`) are never monitored.
        if resource.name.contains('/') {
            continue;
        }
        if !QUOTABLE_VERBS
            .iter()
            .all(|verb| resource.verbs.iter().any(|have| have == verb))
        {
            continue;
        }
        if let Some(gvr) =
            GroupVersionResource::from_api_version(&list.group_version, resource.name.clone())
        {
            resources.insert(gvr);
        }
    }
}

/// Applies one discovery observation to the remembered set. With an error and
/// no results the tick is skipped entirely; with partial results the previous
/// set is a lower bound, so monitors are never torn down on flaky discovery.
pub(crate) fn merge_discovery(
    old: &ResourceSet,
    mut new: ResourceSet,
    error: Option<&anyhow::Error>,
) -> Option<ResourceSet> {
    if error.is_some() {
        if new.is_empty() {
            return None;
        }
        new.extend(old.iter().cloned());
    }
    Some(new)
}

/// Human-readable summary of a discovery diff.
pub(crate) fn format_diff(old: &ResourceSet, new: &ResourceSet) -> String {
    let mut added: Vec<String> = new.difference(old).map(|gvr| gvr.to_string()).collect();
    added.sort();
    let mut removed: Vec<String> = old.difference(new).map(|gvr| gvr.to_string()).collect();
    removed.sort();
    format!("added: {:?}, removed: {:?}", added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, APIResourceList};

    fn api_resource(name: &str, verbs: &[&str]) -> APIResource {
        APIResource {
            name: name.to_string(),
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn collects_only_fully_quotable_resources() {
        let list = APIResourceList {
            group_version: "v1".to_string(),
            resources: vec![
                api_resource("pods", &["create", "list", "watch", "delete", "get"]),
                api_resource("pods/status", &["create", "list", "watch", "delete"]),
                api_resource("bindings", &["create"]),
            ],
        };

        let mut resources = ResourceSet::default();
        collect_quotable(&mut resources, &list);
        let expected: ResourceSet = [GroupVersionResource::new("", "v1", "pods")]
            .into_iter()
            .collect();
        assert_eq!(resources, expected);
    }
}
