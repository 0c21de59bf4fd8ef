//! Label based pod selection
//!
//! Targets are resolved from a selector once, before an agent controller is
//! built for them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Selects the pods of a namespace by label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PodSelector {
    /// Namespace the pods live in
    #[serde(default)]
    pub namespace: String,
    /// Labels a pod must carry
    #[serde(default)]
    pub select: BTreeMap<String, String>,
    /// Labels that exclude a pod
    #[serde(default)]
    pub exclude: BTreeMap<String, String>,
}

impl PodSelector {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.select.insert(key.to_string(), value.to_string());
        self
    }

    pub fn without_label(mut self, key: &str, value: &str) -> Self {
        self.exclude.insert(key.to_string(), value.to_string());
        self
    }

    /// Render as a Kubernetes label selector expression
    pub fn label_selector(&self) -> String {
        let selected = self.select.iter().map(|(k, v)| format!("{}={}", k, v));
        let excluded = self.exclude.iter().map(|(k, v)| format!("{}!={}", k, v));
        selected.chain(excluded).collect::<Vec<_>>().join(",")
    }

    /// Check a pod's labels against this selector
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let selected = self
            .select
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v));
        let excluded = self
            .exclude
            .iter()
            .any(|(k, v)| labels.get(k) == Some(v));
        selected && !excluded
    }
}
