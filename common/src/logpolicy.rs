//! Pod log policy annotation schema.
//!
//! A pod opts into managed log collection by carrying a JSON-encoded
//! [`PodLogPolicy`] under the [`POD_LOG_POLICY_ANNOTATION_KEY`] annotation.
//! The policy names the collector plugin, maps each container to its log
//! categories and backing config maps, and optionally blocks pod teardown
//! until the collector has drained.

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::Pod;

/// Annotation key carrying the JSON-encoded log policy of a pod.
pub const POD_LOG_POLICY_ANNOTATION_KEY: &str = "alpha.log.rk8s.io/log-policy";

/// Reserved category denoting stdout/stderr collection. Policies with this
/// category ignore `path` and `volume_name`.
pub const CATEGORY_STD: &str = "std";

// Event reasons recorded on pods by the log manager.
pub const LOG_POLICY_CREATE_SUCCESS: &str = "LogPolicyCreateSuccess";
pub const LOG_POLICY_CREATE_FAILED: &str = "LogPolicyCreateFailed";
pub const LOG_POLICY_REMOVE_SUCCESS: &str = "LogPolicyRemoveSuccess";
pub const LOG_POLICY_CONFIG_UPDATE_SUCCESS: &str = "LogPolicyConfigUpdateSuccess";
pub const LOG_POLICY_CONFIG_UPDATE_FAILED: &str = "LogPolicyConfigUpdateFailed";

/// The log policy definition on a pod.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PodLogPolicy {
    /// Name of the collector plugin configs are pushed to, eg. logkit, logexporter.
    pub log_plugin: String,
    /// When true, pod deletion keeps being refused until the plugin reports
    /// every config of the pod as collected.
    /// When false, the pod's deletion grace period bounds the wait.
    #[serde(default)]
    pub safe_deletion_enabled: bool,
    /// Container name -> ordered container log policies.
    #[serde(default)]
    pub container_log_policies: HashMap<String, Vec<ContainerLogPolicy>>,
}

/// One log category of one container.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ContainerLogPolicy {
    /// Log category name, eg. std(stdout/stderr), app, audit.
    pub category: String,
    /// Log volume mount path inside the container. Meaningless for `std`.
    #[serde(default)]
    pub path: String,
    /// Pod volume backing the container file logs. Meaningless for `std`.
    #[serde(default)]
    pub volume_name: String,
    /// Config map whose entries each become one plugin config.
    #[serde(rename = "plugin_configmap")]
    pub plugin_config_map: String,
}

/// Whether a pod carries a log policy annotation.
pub fn has_log_policy(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .contains_key(POD_LOG_POLICY_ANNOTATION_KEY)
}

/// Decodes the log policy annotation of a pod.
pub fn get_log_policy(pod: &Pod) -> Result<PodLogPolicy> {
    let Some(value) = pod.metadata.annotations.get(POD_LOG_POLICY_ANNOTATION_KEY) else {
        bail!(
            "pod {}/{} has no {POD_LOG_POLICY_ANNOTATION_KEY} annotation",
            pod.metadata.namespace,
            pod.metadata.name
        );
    };
    serde_json::from_str(value).with_context(|| {
        format!(
            "malformed log policy annotation on pod {}/{}",
            pod.metadata.namespace, pod.metadata.name
        )
    })
}

/// Collects the names of every config map referenced by a policy.
pub fn config_map_names(policy: &PodLogPolicy) -> BTreeSet<String> {
    policy
        .container_log_policies
        .values()
        .flatten()
        .map(|container_policy| container_policy.plugin_config_map.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectMeta;

    fn pod_with_annotation(value: &str) -> Pod {
        let mut metadata = ObjectMeta {
            name: "pod".to_string(),
            namespace: "default".to_string(),
            ..Default::default()
        };
        metadata
            .annotations
            .insert(POD_LOG_POLICY_ANNOTATION_KEY.to_string(), value.to_string());
        Pod {
            metadata,
            ..Default::default()
        }
    }

    #[test]
    fn decodes_policy_annotation() {
        let pod = pod_with_annotation(
            r#"{
                "log_plugin": "logexporter",
                "safe_deletion_enabled": true,
                "container_log_policies": {
                    "app": [
                        {"category": "std", "path": "-", "volume_name": "", "plugin_configmap": "std-conf"},
                        {"category": "audit", "path": "/var/log/audit", "volume_name": "auditlog", "plugin_configmap": "audit-conf"}
                    ]
                }
            }"#,
        );

        assert!(has_log_policy(&pod));
        let policy = get_log_policy(&pod).unwrap();
        assert_eq!(policy.log_plugin, "logexporter");
        assert!(policy.safe_deletion_enabled);
        let container_policies = &policy.container_log_policies["app"];
        assert_eq!(container_policies.len(), 2);
        assert_eq!(container_policies[0].category, CATEGORY_STD);
        assert_eq!(container_policies[1].volume_name, "auditlog");
        assert_eq!(container_policies[1].plugin_config_map, "audit-conf");
    }

    #[test]
    fn rejects_malformed_policy() {
        let pod = pod_with_annotation("{not json");
        assert!(has_log_policy(&pod));
        assert!(get_log_policy(&pod).is_err());
    }

    #[test]
    fn rejects_missing_annotation() {
        let pod = Pod::default();
        assert!(!has_log_policy(&pod));
        assert!(get_log_policy(&pod).is_err());
    }

    #[test]
    fn collects_referenced_config_map_names() {
        let pod = pod_with_annotation(
            r#"{
                "log_plugin": "logexporter",
                "container_log_policies": {
                    "app": [
                        {"category": "std", "plugin_configmap": "shared-conf"},
                        {"category": "audit", "volume_name": "v", "plugin_configmap": "audit-conf"}
                    ],
                    "sidecar": [
                        {"category": "std", "plugin_configmap": "shared-conf"}
                    ]
                }
            }"#,
        );

        let policy = get_log_policy(&pod).unwrap();
        let names = config_map_names(&policy);
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["audit-conf".to_string(), "shared-conf".to_string()]
        );
    }
}
