//! The event-router index.
//!
//! Holds the controller's view of namespace→account attribution and of every
//! `AccountQuota`'s declared hard limits, and translates watch events into
//! work-queue keys. The same maps answer the reconciler's and replenisher's
//! lookups, so the index doubles as the controller's cache of cluster shape.

use crate::queue::RateLimitQueue;
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tenancy_quota_controller_core as quota;
use tenancy_quota_controller_k8s_api as k8s;
use tenancy_quota_controller_k8s_api::ResourceExt;
use tracing::debug;

pub type SharedIndex = Arc<RwLock<Index>>;

pub struct Index {
    registry: Arc<quota::Registry>,

    /// Namespace name to owning account, for namespaces that have one.
    namespaces: HashMap<String, String>,
    /// Account to the names of its namespaces.
    namespaces_by_account: HashMap<String, BTreeSet<String>>,

    /// Quota name to its indexed spec.
    quotas: HashMap<String, QuotaState>,
    /// Account to the names of its quotas.
    quotas_by_account: HashMap<String, BTreeSet<String>>,

    primary: RateLimitQueue<String>,
    priority: RateLimitQueue<String>,
}

#[derive(Clone, Debug)]
struct QuotaState {
    account: String,
    /// Declared hard limits, for filtering spec changes.
    hard: quota::ResourceList,
    /// Hard limits as last echoed in status. Replenishment matches against
    /// these, so a resource just added to the spec only attracts
    /// replenishment once its reconcile has landed.
    status_hard: quota::ResourceList,
}

// === impl Index ===

impl Index {
    pub fn shared(
        registry: Arc<quota::Registry>,
        primary: RateLimitQueue<String>,
        priority: RateLimitQueue<String>,
    ) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            registry,
            namespaces: HashMap::new(),
            namespaces_by_account: HashMap::new(),
            quotas: HashMap::new(),
            quotas_by_account: HashMap::new(),
            primary,
            priority,
        }))
    }

    // --- lookups ---

    /// Names of the namespaces attributed to `account`, sorted.
    pub fn namespaces_of_account(&self, account: &str) -> Vec<String> {
        self.namespaces_by_account
            .get(account)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of every known quota, sorted.
    pub fn quota_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.quotas.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of the quotas whose status-echoed hard resources the evaluator
    /// can account for.
    pub fn quotas_tracking(&self, evaluator: &dyn quota::Evaluator) -> Vec<String> {
        let mut names: Vec<String> = self
            .quotas
            .iter()
            .filter(|(_, state)| {
                let hard_names: Vec<String> = state.status_hard.keys().cloned().collect();
                !evaluator.matching_resources(&hard_names).is_empty()
            })
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    // --- namespace events ---

    pub(crate) fn apply_namespace(&mut self, ns: &k8s::Namespace) {
        let name = ns.name_unchecked();
        let account = k8s::account_of_namespace(ns).unwrap_or_default().to_string();

        let previous = self.namespaces.get(&name).cloned().unwrap_or_default();
        if previous == account {
            return;
        }

        self.attribute_namespace(&name, &previous, &account);

        // Quotas in both the old and the new account see their namespace set
        // change.
        self.enqueue_account(&previous);
        self.enqueue_account(&account);
    }

    pub(crate) fn delete_namespace(&mut self, name: &str) {
        let previous = self.namespaces.get(name).cloned().unwrap_or_default();
        self.attribute_namespace(name, &previous, "");
        self.enqueue_account(&previous);
    }

    pub(crate) fn reset_namespaces(&mut self, namespaces: Vec<k8s::Namespace>) {
        let live: BTreeSet<String> = namespaces.iter().map(|ns| ns.name_unchecked()).collect();
        let removed: Vec<String> = self
            .namespaces
            .keys()
            .filter(|name| !live.contains(*name))
            .cloned()
            .collect();
        for name in removed {
            self.delete_namespace(&name);
        }
        for ns in &namespaces {
            self.apply_namespace(ns);
        }
    }

    fn attribute_namespace(&mut self, name: &str, previous: &str, account: &str) {
        if !previous.is_empty() {
            if let Some(names) = self.namespaces_by_account.get_mut(previous) {
                names.remove(name);
                if names.is_empty() {
                    self.namespaces_by_account.remove(previous);
                }
            }
        }
        if account.is_empty() {
            self.namespaces.remove(name);
        } else {
            self.namespaces.insert(name.to_string(), account.to_string());
            self.namespaces_by_account
                .entry(account.to_string())
                .or_default()
                .insert(name.to_string());
        }
    }

    /// Enqueues every quota of an account for recalculation.
    fn enqueue_account(&self, account: &str) {
        if account.is_empty() {
            return;
        }
        if let Some(names) = self.quotas_by_account.get(account) {
            for name in names {
                self.primary.add(name.clone());
            }
        }
    }

    // --- account quota events ---

    pub(crate) fn apply_quota(&mut self, account_quota: &k8s::AccountQuota) {
        let name = account_quota.name_unchecked();
        let account = account_quota.spec.account.clone();
        let hard = account_quota
            .spec
            .quota
            .hard
            .clone()
            .unwrap_or_default();
        let status_hard = account_quota
            .status
            .as_ref()
            .and_then(|s| s.total.hard.clone())
            .unwrap_or_default();

        let known = self.quotas.get(&name);
        // Watch updates driven by our own status writes carry an unchanged
        // spec; only hard-limit changes re-enter the add path.
        let hard_changed = match known {
            Some(state) => !quota::resource::equals_lists(Some(&state.hard), Some(&hard)),
            None => true,
        };

        if let Some(state) = known {
            if state.account != account {
                if let Some(names) = self.quotas_by_account.get_mut(&state.account) {
                    names.remove(&name);
                    if names.is_empty() {
                        self.quotas_by_account.remove(&state.account);
                    }
                }
            }
        }
        self.quotas_by_account
            .entry(account.clone())
            .or_default()
            .insert(name.clone());
        self.quotas.insert(
            name.clone(),
            QuotaState {
                account,
                hard,
                status_hard,
            },
        );

        if hard_changed {
            self.classify_and_enqueue(&name, account_quota);
        }
    }

    pub(crate) fn delete_quota(&mut self, name: &str) {
        if let Some(state) = self.quotas.remove(name) {
            if let Some(names) = self.quotas_by_account.get_mut(&state.account) {
                names.remove(name);
                if names.is_empty() {
                    self.quotas_by_account.remove(&state.account);
                }
            }
        }
        // The reconcile observes the deletion as not-found and no-ops.
        self.primary.add(name.to_string());
    }

    pub(crate) fn reset_quotas(&mut self, quotas: Vec<k8s::AccountQuota>) {
        let live: BTreeSet<String> = quotas.iter().map(|q| q.name_unchecked()).collect();
        let removed: Vec<String> = self
            .quotas
            .keys()
            .filter(|name| !live.contains(*name))
            .cloned()
            .collect();
        for name in removed {
            self.delete_quota(&name);
        }
        for account_quota in &quotas {
            self.apply_quota(account_quota);
        }
    }

    /// Routes a quota key to the right queue. Quotas whose declared intent is
    /// not yet captured in status go to the priority queue so first-time
    /// users do not wait a full resync for numbers.
    fn classify_and_enqueue(&self, name: &str, account_quota: &k8s::AccountQuota) {
        let spec_hard = account_quota.spec.quota.hard.clone().unwrap_or_default();
        let status = account_quota.status.as_ref();

        if !quota::resource::equals_lists(Some(&spec_hard), status.and_then(|s| s.total.hard.as_ref()))
        {
            debug!(quota = %name, "Hard limits not yet captured in status");
            self.priority.add(name.to_string());
            return;
        }

        // A declared constraint with no recorded usage is prioritised if any
        // evaluator can actually score it.
        let used = status.and_then(|s| s.total.used.as_ref());
        for constraint in spec_hard.keys() {
            if used.map_or(true, |u| !u.contains_key(constraint)) {
                let names = [constraint.clone()];
                if self
                    .registry
                    .list()
                    .iter()
                    .any(|e| !e.matching_resources(&names).is_empty())
                {
                    debug!(quota = %name, %constraint, "Declared constraint has no usage");
                    self.priority.add(name.to_string());
                    return;
                }
            }
        }

        self.primary.add(name.to_string());
    }
}
