use crate::index::Index;
use crate::queue::RateLimitQueue;
use crate::tests::{drain, list, make_namespace, make_quota, FakeEvaluator};
use std::sync::Arc;
use tenancy_quota_controller_core::Registry;
use tenancy_quota_controller_k8s_api as k8s;

fn make_index() -> (
    crate::index::SharedIndex,
    RateLimitQueue<String>,
    RateLimitQueue<String>,
) {
    let registry = Arc::new(Registry::new(vec![FakeEvaluator::pods()]));
    let primary = RateLimitQueue::new();
    let priority = RateLimitQueue::new();
    let index = Index::shared(registry, primary.clone(), priority.clone());
    (index, primary, priority)
}

#[tokio::test]
async fn new_quota_without_status_is_prioritised() {
    let (index, primary, priority) = make_index();

    index.write().apply_quota(&make_quota("q", "a", &[("pods", "3")]));

    assert_eq!(drain(&priority).await, vec!["q".to_string()]);
    assert!(primary.is_empty());
}

#[tokio::test]
async fn quota_with_settled_status_goes_to_the_primary_queue() {
    let (index, primary, priority) = make_index();

    let mut quota = make_quota("q", "a", &[("pods", "3")]);
    quota.status = Some(k8s::AccountQuotaStatus {
        total: k8s::ResourceQuotaStatus {
            hard: Some(list(&[("pods", "3")])),
            used: Some(list(&[("pods", "1")])),
        },
        namespaces: vec![],
    });
    index.write().apply_quota(&quota);

    assert_eq!(drain(&primary).await, vec!["q".to_string()]);
    assert!(priority.is_empty());
}

#[tokio::test]
async fn missing_usage_for_an_evaluable_resource_is_prioritised() {
    let (index, primary, priority) = make_index();

    let mut quota = make_quota("q", "a", &[("pods", "3")]);
    quota.status = Some(k8s::AccountQuotaStatus {
        total: k8s::ResourceQuotaStatus {
            hard: Some(list(&[("pods", "3")])),
            used: Some(list(&[])),
        },
        namespaces: vec![],
    });
    index.write().apply_quota(&quota);

    assert_eq!(drain(&priority).await, vec!["q".to_string()]);
    assert!(primary.is_empty());
}

#[tokio::test]
async fn missing_usage_nobody_can_score_is_not_prioritised() {
    let (index, primary, priority) = make_index();

    // `secrets` is declared but no evaluator accounts for it.
    let mut quota = make_quota("q", "a", &[("secrets", "5")]);
    quota.status = Some(k8s::AccountQuotaStatus {
        total: k8s::ResourceQuotaStatus {
            hard: Some(list(&[("secrets", "5")])),
            used: Some(list(&[])),
        },
        namespaces: vec![],
    });
    index.write().apply_quota(&quota);

    assert_eq!(drain(&primary).await, vec!["q".to_string()]);
    assert!(priority.is_empty());
}

#[tokio::test]
async fn unchanged_hard_limits_do_not_reenqueue() {
    let (index, primary, priority) = make_index();

    let quota = make_quota("q", "a", &[("pods", "3")]);
    index.write().apply_quota(&quota);
    drain(&priority).await;

    // A status-only update (our own write echoed back) is filtered.
    let mut updated = quota.clone();
    updated.status = Some(k8s::AccountQuotaStatus::default());
    index.write().apply_quota(&updated);
    assert!(primary.is_empty());
    assert!(priority.is_empty());

    // Changing the hard limits re-enters the add path.
    let changed = make_quota("q", "a", &[("pods", "5")]);
    index.write().apply_quota(&changed);
    assert_eq!(drain(&priority).await, vec!["q".to_string()]);
}

#[tokio::test]
async fn namespace_account_changes_enqueue_both_accounts() {
    let (index, primary, priority) = make_index();

    index.write().apply_quota(&make_quota("q", "a", &[("pods", "3")]));
    index.write().apply_quota(&make_quota("q2", "b", &[("pods", "5")]));
    drain(&priority).await;
    drain(&primary).await;

    index.write().apply_namespace(&make_namespace("n", Some("a")));
    assert_eq!(drain(&primary).await, vec!["q".to_string()]);
    assert_eq!(index.read().namespaces_of_account("a"), vec!["n".to_string()]);

    // Reassigning the namespace touches quotas of the old and new accounts.
    index.write().apply_namespace(&make_namespace("n", Some("b")));
    assert_eq!(drain(&primary).await, vec!["q".to_string(), "q2".to_string()]);
    assert!(index.read().namespaces_of_account("a").is_empty());
    assert_eq!(index.read().namespaces_of_account("b"), vec!["n".to_string()]);

    // An unchanged account membership is filtered.
    index.write().apply_namespace(&make_namespace("n", Some("b")));
    assert!(primary.is_empty());

    index.write().delete_namespace("n");
    assert_eq!(drain(&primary).await, vec!["q2".to_string()]);
    assert!(index.read().namespaces_of_account("b").is_empty());
}

#[tokio::test]
async fn namespaces_without_an_account_are_ignored() {
    let (index, primary, _priority) = make_index();

    index.write().apply_namespace(&make_namespace("n", None));
    index.write().apply_namespace(&make_namespace("n2", Some("")));
    assert!(primary.is_empty());
    assert!(index.read().namespaces_of_account("").is_empty());
}

#[tokio::test]
async fn restart_diff_synthesises_deletes() {
    let (index, primary, priority) = make_index();

    index.write().apply_quota(&make_quota("q", "a", &[("pods", "3")]));
    index.write().apply_namespace(&make_namespace("n", Some("a")));
    index.write().apply_namespace(&make_namespace("n2", Some("a")));
    drain(&priority).await;
    drain(&primary).await;

    // `n2` vanished while the watch was disconnected.
    index
        .write()
        .reset_namespaces(vec![make_namespace("n", Some("a"))]);
    assert_eq!(drain(&primary).await, vec!["q".to_string()]);
    assert_eq!(index.read().namespaces_of_account("a"), vec!["n".to_string()]);
}

#[tokio::test]
async fn deleted_quota_is_forgotten_but_still_synced() {
    let (index, primary, priority) = make_index();

    index.write().apply_quota(&make_quota("q", "a", &[("pods", "3")]));
    drain(&priority).await;

    index.write().delete_quota("q");
    // The sync observes not-found and no-ops.
    assert_eq!(drain(&primary).await, vec!["q".to_string()]);
    assert!(index.read().quota_names().is_empty());
}
