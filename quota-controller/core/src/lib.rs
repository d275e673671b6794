//! Domain types for account-level quota accounting.
//!
//! An account quota aggregates resource usage across every namespace owned by
//! an account. This crate holds the pieces of that computation that are
//! independent of any API machinery: quantity arithmetic, resource-list
//! operations, and the evaluator registry that knows how to score usage for
//! individual resource kinds.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod evaluator;
mod group;
pub mod quantity;
pub mod resource;

pub use self::evaluator::{calculate_usage, Evaluator, Registry};
pub use self::group::{GroupResource, GroupVersionResource};
pub use self::quantity::ParsedQuantity;
pub use k8s_openapi::api::core::v1::ScopeSelector;
pub use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Resource names mapped to quantities, as carried on the wire.
pub type ResourceList = std::collections::BTreeMap<String, Quantity>;
