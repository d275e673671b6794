use k8s_openapi::api::core::v1::{ResourceQuotaSpec, ResourceQuotaStatus};

/// Declares hard resource limits for the union of namespaces belonging to one
/// account, and records the aggregated usage observed by the quota
/// controller. Cluster-scoped: accounts are not confined to any namespace.
#[derive(
    Clone, Debug, Default, kube::CustomResource, serde::Deserialize, serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "config.tenancy.dev",
    version = "v1alpha1",
    kind = "AccountQuota",
    status = "AccountQuotaStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct AccountQuotaSpec {
    /// The account whose namespaces this quota constrains.
    pub account: String,

    /// Hard limits, scopes and scope selector, declared exactly as in a
    /// namespaced ResourceQuota.
    pub quota: ResourceQuotaSpec,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct AccountQuotaStatus {
    /// Hard limits as of the last reconcile, with usage aggregated across
    /// all of the account's namespaces.
    #[serde(default)]
    pub total: ResourceQuotaStatus,

    /// Per-namespace usage, ordered by namespace name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<AccountQuotaNamespaceStatus>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct AccountQuotaNamespaceStatus {
    pub namespace: String,

    #[serde(default)]
    pub status: ResourceQuotaStatus,
}
