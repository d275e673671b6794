use k8s_openapi::api::core::v1::Namespace;

/// Label attributing a namespace to the account that owns it.
pub const ACCOUNT_LABEL: &str = "tenancy.dev/account";

/// Returns the account a namespace belongs to. A missing or empty label means
/// the namespace belongs to no account and is never counted against a quota.
pub fn account_of_namespace(ns: &Namespace) -> Option<&str> {
    ns.metadata
        .labels
        .as_ref()?
        .get(ACCOUNT_LABEL)
        .map(String::as_str)
        .filter(|account| !account.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn namespace(labels: &[(&str, &str)]) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some("ns".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn reads_the_account_label() {
        assert_eq!(
            account_of_namespace(&namespace(&[(ACCOUNT_LABEL, "team-a")])),
            Some("team-a")
        );
    }

    #[test]
    fn missing_or_empty_label_disqualifies() {
        assert_eq!(account_of_namespace(&namespace(&[])), None);
        assert_eq!(account_of_namespace(&namespace(&[(ACCOUNT_LABEL, "")])), None);
    }
}
