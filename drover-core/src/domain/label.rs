//! Job labels
//!
//! The label set identifies every Kubernetes object created for one subtask
//! execution and doubles as the cleanup selector.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const JOB_LABEL_TASK_KEY: &str = "s-task";
pub const JOB_LABEL_SERVICE_KEY: &str = "s-service";
pub const JOB_LABEL_STYPE_KEY: &str = "s-type";
pub const JOB_LABEL_PTYPE_KEY: &str = "p-type";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLabel {
    pub pipeline_name: String,
    pub task_id: i64,
    pub task_type: String,
    pub service_name: String,
    pub pipeline_type: String,
}

impl JobLabel {
    /// Label map applied to the Job, its pods and its ConfigMap
    ///
    /// Empty values are dropped since Kubernetes rejects them in selectors.
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(
            JOB_LABEL_TASK_KEY.to_string(),
            format!("{}-{}", self.pipeline_name.to_lowercase(), self.task_id),
        );
        labels.insert(
            JOB_LABEL_SERVICE_KEY.to_string(),
            self.service_name.to_lowercase(),
        );
        labels.insert(
            JOB_LABEL_STYPE_KEY.to_string(),
            self.task_type.replace('_', "-"),
        );
        labels.insert(JOB_LABEL_PTYPE_KEY.to_string(), self.pipeline_type.clone());
        labels.retain(|_, v| !v.is_empty());
        labels
    }

    /// Label selector string in `k=v,k=v` form
    pub fn selector(&self) -> String {
        selector_string(&self.labels())
    }
}

/// Formats a label map as a Kubernetes equality selector
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label() -> JobLabel {
        JobLabel {
            pipeline_name: "Demo-Workflow".to_string(),
            task_id: 42,
            task_type: "buildv2".to_string(),
            service_name: "Aslan".to_string(),
            pipeline_type: "workflow".to_string(),
        }
    }

    #[test]
    fn test_labels_are_normalised() {
        let labels = label().labels();
        assert_eq!(labels["s-task"], "demo-workflow-42");
        assert_eq!(labels["s-service"], "aslan");
        assert_eq!(labels["s-type"], "buildv2");
        assert_eq!(labels["p-type"], "workflow");
    }

    #[test]
    fn test_underscores_in_type_become_dashes() {
        let mut l = label();
        l.task_type = "docker_build".to_string();
        assert_eq!(l.labels()["s-type"], "docker-build");
    }

    #[test]
    fn test_empty_values_are_dropped() {
        let mut l = label();
        l.pipeline_type = String::new();
        l.service_name = String::new();
        let labels = l.labels();
        assert!(!labels.contains_key("p-type"));
        assert!(!labels.contains_key("s-service"));
        assert_eq!(l.selector(), "s-task=demo-workflow-42,s-type=buildv2");
    }
}
