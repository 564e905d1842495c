//! Selection predicate for trigger resources.

use kube::ResourceExt;
use std::fmt;

/// Matches resources carrying `key=value` in their labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    key: String,
    value: String,
}

impl LabelMatcher {
    /// Create a matcher for `key=value`
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Whether `resource` carries the required label
    pub fn matches<K: ResourceExt>(&self, resource: &K) -> bool {
        resource
            .labels()
            .get(&self.key)
            .is_some_and(|value| *value == self.value)
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}
