//! Desired and observed state of managed pods.
//!
//! [`PodStateStore`] holds the desired side, rebuilt from the pod source:
//! decoded policies, derived log volumes, and the config-map keys each pod
//! depends on, plus the reverse index key -> pods. [`PluginStateStore`]
//! holds the observed side, pulled from each plugin's `listConfig`: which
//! config names a pod currently has installed and which plugin owns it.
//!
//! Every read returns a cloned snapshot so the manager can iterate and issue
//! RPCs without holding a store lock.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use common::logplugin::Config;
use common::logpolicy::PodLogPolicy;
use tracing::warn;
use uuid::Uuid;

use crate::endpoint::PluginEndpoint;

/// One file-log volume derived from a container log policy entry.
#[derive(Debug, Clone)]
pub struct LogVolume {
    pub volume_name: String,
    /// Mount path inside the container.
    pub path: String,
    /// Real mount path on the host.
    pub host_path: PathBuf,
    /// Symlink under the pod logs root,
    /// `<root>/<pod-uid>/<container-name>/<category>`.
    pub log_dir_path: PathBuf,
}

/// Volume name -> log volume.
pub type LogVolumesMap = HashMap<String, LogVolume>;

#[derive(Default)]
struct PodStateInner {
    policies: HashMap<Uuid, PodLogPolicy>,
    volumes: HashMap<Uuid, LogVolumesMap>,
    config_map_keys: HashMap<Uuid, HashSet<String>>,
    // reverse index, config map key -> pods depending on it
    config_map_pods: HashMap<String, HashSet<Uuid>>,
}

/// Desired state, keyed by pod UID.
#[derive(Default)]
pub struct PodStateStore {
    inner: RwLock<PodStateInner>,
}

impl PodStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, PodStateInner> {
        self.inner.read().expect("pod state lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, PodStateInner> {
        self.inner.write().expect("pod state lock poisoned")
    }

    pub fn update_log_policy(&self, pod_uid: Uuid, policy: PodLogPolicy) {
        self.write().policies.insert(pod_uid, policy);
    }

    pub fn remove_log_policy(&self, pod_uid: Uuid) {
        self.write().policies.remove(&pod_uid);
    }

    pub fn get_log_policy(&self, pod_uid: Uuid) -> Option<PodLogPolicy> {
        self.read().policies.get(&pod_uid).cloned()
    }

    pub fn update_log_volumes(&self, pod_uid: Uuid, volumes: LogVolumesMap) {
        self.write().volumes.insert(pod_uid, volumes);
    }

    pub fn remove_log_volumes(&self, pod_uid: Uuid) {
        self.write().volumes.remove(&pod_uid);
    }

    pub fn get_log_volumes(&self, pod_uid: Uuid) -> Option<LogVolumesMap> {
        self.read().volumes.get(&pod_uid).cloned()
    }

    /// Replaces the config-map key set of a pod and rewrites the reverse
    /// index: the pod leaves the entry of every key it no longer references
    /// and entries whose pod set empties are dropped.
    pub fn update_config_map_keys(&self, pod_uid: Uuid, config_map_keys: HashSet<String>) {
        let mut inner = self.write();
        let old_keys = inner
            .config_map_keys
            .get(&pod_uid)
            .cloned()
            .unwrap_or_default();
        for key in old_keys.difference(&config_map_keys) {
            if let Some(pod_uids) = inner.config_map_pods.get_mut(key) {
                pod_uids.remove(&pod_uid);
                if pod_uids.is_empty() {
                    inner.config_map_pods.remove(key);
                }
            }
        }
        for key in &config_map_keys {
            inner
                .config_map_pods
                .entry(key.clone())
                .or_default()
                .insert(pod_uid);
        }
        inner.config_map_keys.insert(pod_uid, config_map_keys);
    }

    pub fn remove_config_map_keys(&self, pod_uid: Uuid) {
        let mut inner = self.write();
        if let Some(config_map_keys) = inner.config_map_keys.remove(&pod_uid) {
            for key in config_map_keys {
                if let Some(pod_uids) = inner.config_map_pods.get_mut(&key) {
                    pod_uids.remove(&pod_uid);
                    if pod_uids.is_empty() {
                        inner.config_map_pods.remove(&key);
                    }
                }
            }
        }
    }

    /// Every config-map key some pod depends on.
    pub fn get_all_config_map_keys(&self) -> HashSet<String> {
        self.read().config_map_pods.keys().cloned().collect()
    }

    /// Pods depending on one config-map key.
    pub fn get_pod_uids(&self, config_map_key: &str) -> HashSet<Uuid> {
        self.read()
            .config_map_pods
            .get(config_map_key)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct PluginStateInner {
    config_names: HashMap<Uuid, BTreeSet<String>>,
    endpoints: HashMap<Uuid, Arc<PluginEndpoint>>,
}

/// Observed state, keyed by pod UID; refreshed from plugin `listConfig`.
#[derive(Default)]
pub struct PluginStateStore {
    inner: RwLock<PluginStateInner>,
}

impl PluginStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, PluginStateInner> {
        self.inner.read().expect("plugin state lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, PluginStateInner> {
        self.inner.write().expect("plugin state lock poisoned")
    }

    /// Replaces the observed state with one plugin's full inventory.
    ///
    /// Pods previously bound to an endpoint of the same plugin name are
    /// forgotten first; its `listConfig` is authoritative for that plugin.
    /// A pod reported by a different plugin as well keeps the last writer,
    /// which is a surfaced misconfiguration, not a crash.
    pub fn update_all_log_configs(&self, configs: &[Config], endpoint: Arc<PluginEndpoint>) {
        let mut inner = self.write();

        let stale: Vec<Uuid> = inner
            .endpoints
            .iter()
            .filter(|(_, owner)| owner.name() == endpoint.name())
            .map(|(pod_uid, _)| *pod_uid)
            .collect();
        for pod_uid in stale {
            inner.config_names.remove(&pod_uid);
            inner.endpoints.remove(&pod_uid);
        }

        for config in configs {
            let pod_uid = config.metadata.pod_uid;
            let conflicting_owner = inner
                .endpoints
                .get(&pod_uid)
                .filter(|owner| owner.name() != endpoint.name())
                .map(|owner| owner.name().to_string());
            if let Some(prev_plugin) = conflicting_owner {
                warn!(
                    pod_uid = %pod_uid,
                    prev_plugin,
                    plugin = endpoint.name(),
                    "pod is reported by multiple log plugins, keeping the last writer"
                );
                inner.config_names.remove(&pod_uid);
            }
            inner
                .config_names
                .entry(pod_uid)
                .or_default()
                .insert(config.metadata.name.clone());
            inner.endpoints.insert(pod_uid, endpoint.clone());
        }
    }

    /// Drops a pod once its plugin configs have been deleted.
    pub fn remove_pod(&self, pod_uid: Uuid) {
        let mut inner = self.write();
        inner.config_names.remove(&pod_uid);
        inner.endpoints.remove(&pod_uid);
    }

    /// Config names currently installed for a pod; empty when unknown.
    pub fn get_log_config_names(&self, pod_uid: Uuid) -> BTreeSet<String> {
        self.read()
            .config_names
            .get(&pod_uid)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_all_pod_uids(&self) -> HashSet<Uuid> {
        self.read().config_names.keys().copied().collect()
    }

    pub fn get_log_plugin_endpoint(&self, pod_uid: Uuid) -> Option<Arc<PluginEndpoint>> {
        self.read().endpoints.get(&pod_uid).cloned()
    }
}
