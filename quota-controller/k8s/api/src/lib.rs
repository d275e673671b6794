#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod account;
mod account_quota;

pub use self::account::{account_of_namespace, ACCOUNT_LABEL};
pub use self::account_quota::{
    AccountQuota, AccountQuotaNamespaceStatus, AccountQuotaSpec, AccountQuotaStatus,
};
pub use k8s_openapi::{
    api::core::v1::{
        Container, Namespace, Pod, PodSpec, ResourceQuotaSpec, ResourceQuotaStatus, ScopeSelector,
        ScopedResourceSelectorRequirement,
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{APIResource, APIResourceList},
    },
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, PostParams, Resource, ResourceExt},
    core::{ApiResource as DynamicApiResource, DynamicObject},
    runtime::watcher,
    Client, Error,
};
