use std::fmt;

/// Identifies a resource kind independently of version, e.g. `pods` or
/// `deployments.apps`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

/// A fully-qualified group/version/resource triple, the unit the discovery
/// probe reports and the quota monitor watches.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

// === impl GroupResource ===

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

impl From<&str> for GroupResource {
    /// Reads the `resource.group` form; everything before the first dot is
    /// the resource, the remainder (possibly empty) is the group.
    fn from(s: &str) -> Self {
        let (resource, group) = match s.split_once('.') {
            Some((resource, group)) => (resource, group),
            None => (s, ""),
        };
        Self::new(group, resource)
    }
}

// === impl GroupVersionResource ===

impl GroupVersionResource {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// Splits an `apiVersion` string (`"v1"`, `"apps/v1"`) into group and
    /// version. Returns `None` for malformed strings.
    pub fn from_api_version(api_version: &str, resource: impl Into<String>) -> Option<Self> {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        if version.is_empty() || version.contains('/') {
            return None;
        }
        Some(Self::new(group, version, resource))
    }

    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(self.group.clone(), self.resource.clone())
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_resource_round_trips() {
        let gr = GroupResource::from("deployments.apps");
        assert_eq!(gr, GroupResource::new("apps", "deployments"));
        assert_eq!(gr.to_string(), "deployments.apps");

        let core = GroupResource::from("pods");
        assert_eq!(core, GroupResource::new("", "pods"));
        assert_eq!(core.to_string(), "pods");
    }

    #[test]
    fn gvr_from_api_version() {
        assert_eq!(
            GroupVersionResource::from_api_version("v1", "pods"),
            Some(GroupVersionResource::new("", "v1", "pods"))
        );
        assert_eq!(
            GroupVersionResource::from_api_version("apps/v1", "deployments"),
            Some(GroupVersionResource::new("apps", "v1", "deployments"))
        );
        assert_eq!(GroupVersionResource::from_api_version("a/b/c", "x"), None);
    }
}
