//! Handles into the hosting daemon.
//!
//! The manager never talks to an apiserver itself; the kubelet that hosts it
//! provides read access to pods, config maps and volume mounts, plus sinks
//! for events and pod status.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use common::{ConfigMap, Pod, PodStatus};
use uuid::Uuid;

/// Read access to the pods known to the hosting daemon.
#[async_trait]
pub trait PodSource: Send + Sync {
    async fn get_pods(&self) -> Vec<Pod>;
    async fn get_pod_by_uid(&self, uid: Uuid) -> Option<Pod>;
}

/// Read access to the node-local config map cache.
#[async_trait]
pub trait ConfigMapSource: Send + Sync {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap>;
}

/// Volume name -> host mount path for the volumes currently mounted into a pod.
#[async_trait]
pub trait VolumeSource: Send + Sync {
    async fn mounted_volumes(&self, pod_uid: Uuid) -> HashMap<String, PathBuf>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// Records events on pods.
pub trait EventRecorder: Send + Sync {
    fn event(&self, pod: &Pod, event_type: EventType, reason: &str, message: String);
}

/// Pushes pod status updates back to the apiserver.
#[async_trait]
pub trait PodStatusSink: Send + Sync {
    async fn update_pod_status(&self, pod: &Pod, status: PodStatus) -> Result<()>;
}

/// Gate telling the manager whether every pod source has delivered at least
/// one snapshot; resync is skipped until then.
pub trait SourcesReady: Send + Sync {
    fn all_ready(&self) -> bool;
}

/// Always-ready stand-in used until [`crate::LogManager::start`] installs the
/// daemon's real gate.
#[derive(Debug, Default)]
pub struct SourcesReadyStub;

impl SourcesReady for SourcesReadyStub {
    fn all_ready(&self) -> bool {
        true
    }
}

/// Recorder that drops every event, for hosts without an event pipeline.
#[derive(Debug, Default)]
pub struct NullEventRecorder;

impl EventRecorder for NullEventRecorder {
    fn event(&self, _pod: &Pod, _event_type: EventType, _reason: &str, _message: String) {}
}

/// Object-safe alias bundle used by the manager constructor.
pub type DynPodSource = Arc<dyn PodSource>;
pub type DynConfigMapSource = Arc<dyn ConfigMapSource>;
pub type DynVolumeSource = Arc<dyn VolumeSource>;
pub type DynEventRecorder = Arc<dyn EventRecorder>;
pub type DynPodStatusSink = Arc<dyn PodStatusSink>;
