use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod logplugin;
pub mod logpolicy;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub uid: Uuid,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(rename = "deletionTimestamp", default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "deletionGracePeriodSeconds", default)]
    pub deletion_grace_period_seconds: Option<i64>,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub enum PodConditionType {
    PodScheduled,
    #[default]
    PodReady,
    PodInitialized,
    ContainersReady,
    /// Set by the log manager once every collector config of the pod has
    /// drained, unblocking safe deletion.
    PodLogCollectFinished,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub condition_type: PodConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "lastTransitionTime", default)]
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,
    #[serde(default)]
    pub conditions: Option<Vec<PodCondition>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Pod {
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    /// Whether the pod has reached a terminal phase.
    pub fn is_terminated(&self) -> bool {
        matches!(self.status.phase, PodPhase::Succeeded | PodPhase::Failed)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ConfigMap {
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

/// Looks up the condition of the given type in a pod status.
pub fn get_pod_condition<'a>(
    status: &'a PodStatus,
    condition_type: &PodConditionType,
) -> Option<&'a PodCondition> {
    status
        .conditions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|condition| &condition.condition_type == condition_type)
}

/// Installs `condition` in the status, replacing any stored condition of the
/// same type. A condition whose status already matches is left untouched, so
/// `last_transition_time` only moves on real transitions. Returns whether
/// anything was written.
pub fn update_pod_condition(status: &mut PodStatus, mut condition: PodCondition) -> bool {
    let conditions = status.conditions.get_or_insert_with(Vec::new);
    if let Some(stored) = conditions
        .iter_mut()
        .find(|stored| stored.condition_type == condition.condition_type)
    {
        if stored.status == condition.status {
            return false;
        }
        condition.last_transition_time = Some(Utc::now());
        *stored = condition;
        return true;
    }
    condition.last_transition_time = Some(Utc::now());
    conditions.push(condition);
    true
}
