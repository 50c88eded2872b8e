//! Reconciles pod log policies against registered collector plugins.
//!
//! [`LogPluginManager`] owns both state stores, the endpoint table, the
//! registration socket and the config-map watcher. Desired state is rebuilt
//! from the pod source on every pass and diffed against what the plugins
//! report through `listConfig`; the diff is resolved with idempotent
//! `addConfig`/`delConfig` calls, so a restarted manager converges without
//! any checkpoint. No store or table lock is ever held across an RPC, a
//! config map fetch or a filesystem operation.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::logplugin::{Config, ConfigMeta, ConfigSpec, ConfigState, RegisterRequest};
use common::logpolicy::{
    self, CATEGORY_STD, LOG_POLICY_CONFIG_UPDATE_FAILED, LOG_POLICY_CONFIG_UPDATE_SUCCESS,
    LOG_POLICY_CREATE_FAILED, LOG_POLICY_CREATE_SUCCESS, LOG_POLICY_REMOVE_SUCCESS, PodLogPolicy,
};
use common::{
    ConditionStatus, ConfigMap, Pod, PodCondition, PodConditionType, update_pod_condition,
};
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::LogManager;
use crate::endpoint::PluginEndpoint;
use crate::paths::{self, CONTAINER_LOG_DIR_MODE, LogManagerConfig};
use crate::registration::RegistrationServer;
use crate::sources::{
    DynConfigMapSource, DynEventRecorder, DynPodSource, DynPodStatusSink, DynVolumeSource,
    EventType, SourcesReady, SourcesReadyStub,
};
use crate::state::{LogVolume, LogVolumesMap, PluginStateStore, PodStateStore};
use crate::watcher::ConfigMapWatcher;

pub struct LogPluginManager {
    shared: Arc<Shared>,
    update_rx: Mutex<Option<mpsc::UnboundedReceiver<ConfigMap>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    config: LogManagerConfig,
    pods: DynPodSource,
    config_maps: DynConfigMapSource,
    volumes: DynVolumeSource,
    recorder: DynEventRecorder,
    status_sink: DynPodStatusSink,
    sources_ready: RwLock<Arc<dyn SourcesReady>>,
    // plugin name -> endpoint
    endpoints: DashMap<String, Arc<PluginEndpoint>>,
    pod_state: PodStateStore,
    plugin_state: PluginStateStore,
    watcher: Arc<ConfigMapWatcher>,
}

impl LogPluginManager {
    pub fn new(
        config: LogManagerConfig,
        pods: DynPodSource,
        config_maps: DynConfigMapSource,
        volumes: DynVolumeSource,
        recorder: DynEventRecorder,
        status_sink: DynPodStatusSink,
    ) -> Self {
        let (watcher, update_rx) =
            ConfigMapWatcher::new(config_maps.clone(), config.config_map_poll_interval);
        Self {
            shared: Arc::new(Shared {
                config,
                pods,
                config_maps,
                volumes,
                recorder,
                status_sink,
                sources_ready: RwLock::new(Arc::new(SourcesReadyStub)),
                endpoints: DashMap::new(),
                pod_state: PodStateStore::new(),
                plugin_state: PluginStateStore::new(),
                watcher,
            }),
            update_rx: Mutex::new(Some(update_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Stops the registration server, the resync loop, the watcher and every
    /// endpoint.
    pub async fn shutdown(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.shared.watcher.stop();
        let endpoints: Vec<Arc<PluginEndpoint>> = self
            .shared
            .endpoints
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.shared.endpoints.clear();
        for endpoint in endpoints {
            endpoint.stop().await;
        }
        info!("log plugin manager stopped");
    }
}

#[async_trait]
impl LogManager for LogPluginManager {
    async fn start(&self, sources_ready: Arc<dyn SourcesReady>) -> Result<()> {
        info!("starting log plugin manager");
        *self
            .shared
            .sources_ready
            .write()
            .expect("sources-ready lock poisoned") = sources_ready;

        let server = RegistrationServer::bind(
            &self.shared.config.plugin_dir,
            &self.shared.config.socket_name,
        )
        .await?;
        let (server_task, mut register_rx) = server.spawn();

        let mut update_rx = self
            .update_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("log plugin manager already started"))?;

        let shared = self.shared.clone();
        let register_task = tokio::spawn(async move {
            while let Some(request) = register_rx.recv().await {
                shared.add_endpoint(request).await;
            }
        });

        let shared = self.shared.clone();
        let dispatch_task = tokio::spawn(async move {
            while let Some(config_map) = update_rx.recv().await {
                shared.on_config_map_update(config_map).await;
            }
        });

        let shared = self.shared.clone();
        let sync_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.config.resync_period);
            loop {
                ticker.tick().await;
                shared.sync().await;
            }
        });

        self.tasks
            .lock()
            .await
            .extend([server_task, register_task, dispatch_task, sync_task]);
        Ok(())
    }

    async fn create_log_policy(&self, pod: &Pod) -> Result<()> {
        if !logpolicy::has_log_policy(pod) {
            return Ok(());
        }
        match self.shared.create_log_policy(pod).await {
            Ok(()) => {
                self.shared.recorder.event(
                    pod,
                    EventType::Normal,
                    LOG_POLICY_CREATE_SUCCESS,
                    "create log policy success".to_string(),
                );
                Ok(())
            }
            Err(error) => {
                warn!(pod = %format_pod(pod), error = %format!("{error:#}"), "create log policy failed");
                self.shared.recorder.event(
                    pod,
                    EventType::Warning,
                    LOG_POLICY_CREATE_FAILED,
                    format!("create log policy failed: {error:#}"),
                );
                Err(error)
            }
        }
    }

    async fn remove_log_policy(&self, pod: &Pod) -> Result<()> {
        if !logpolicy::has_log_policy(pod) {
            return Ok(());
        }
        let shared = &self.shared;
        let pod_uid = pod.metadata.uid;

        let Some(policy) = shared.pod_state.get_log_policy(pod_uid) else {
            warn!(pod = %format_pod(pod), "pod log policy not found in state store, nothing to remove");
            return Ok(());
        };

        let collect_finished = shared.check_collect_finished(pod_uid, &policy).await;
        if !collect_finished {
            if policy.safe_deletion_enabled {
                bail!(
                    "log collection still running and safe deletion is enabled, cannot remove log policy for pod {}",
                    format_pod(pod)
                );
            }
            if !exceeded_deletion_grace_period(pod) {
                bail!(
                    "log collection still running, cannot remove log policy for pod {} before its deletion grace period expires",
                    format_pod(pod)
                );
            }
        }

        shared.set_collect_finished(pod).await?;

        let endpoint = shared.get_log_plugin_endpoint(&policy.log_plugin)?;
        shared.delete_plugin_configs(pod_uid, &endpoint).await?;
        shared.remove_pod_state(pod_uid);

        shared.recorder.event(
            pod,
            EventType::Normal,
            LOG_POLICY_REMOVE_SUCCESS,
            "remove log policy success".to_string(),
        );
        Ok(())
    }

    async fn collect_finished(&self, pod: &Pod) -> bool {
        if !logpolicy::has_log_policy(pod) {
            return true;
        }
        let Some(policy) = self.shared.pod_state.get_log_policy(pod.metadata.uid) else {
            warn!(pod = %format_pod(pod), "pod log policy not found in state store");
            return true;
        };
        self.shared
            .check_collect_finished(pod.metadata.uid, &policy)
            .await
    }
}

impl Shared {
    /// One full reconciliation pass.
    ///
    /// 1. pull every plugin's inventory into the observed store
    /// 2. refresh and push every live pod carrying a policy
    /// 3. drop pods the pod source no longer knows
    /// 4. re-sync the config map watch set
    async fn sync(&self) {
        if !self
            .sources_ready
            .read()
            .expect("sources-ready lock poisoned")
            .all_ready()
        {
            debug!("pod sources not ready, skipping log policy resync");
            return;
        }

        let endpoints: Vec<Arc<PluginEndpoint>> = self
            .endpoints
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for endpoint in endpoints {
            if let Err(error) = self.refresh_plugin_state(&endpoint).await {
                warn!(
                    plugin = endpoint.name(),
                    error = %format!("{error:#}"),
                    "failed to pull log configs from plugin, aborting resync"
                );
                return;
            }
        }

        for pod in self.pods.get_pods().await {
            if !logpolicy::has_log_policy(&pod) {
                continue;
            }
            if pod.is_terminated() {
                debug!(pod = %format_pod(&pod), "pod is terminated, skipping sync");
                continue;
            }
            if let Err(error) = self.refresh_pod_state(&pod).await {
                warn!(pod = %format_pod(&pod), error = %format!("{error:#}"), "failed to refresh pod log state");
                continue;
            }
            if let Err(error) = self.push_configs(&pod).await {
                warn!(pod = %format_pod(&pod), error = %format!("{error:#}"), "failed to push pod log configs");
                continue;
            }
        }

        for pod_uid in self.plugin_state.get_all_pod_uids() {
            if self.pods.get_pod_by_uid(pod_uid).await.is_some() {
                continue;
            }
            info!(pod_uid = %pod_uid, "removing log configs of pod unknown to the pod source");
            let Some(endpoint) = self.plugin_state.get_log_plugin_endpoint(pod_uid) else {
                warn!(pod_uid = %pod_uid, "no owning log plugin endpoint");
                continue;
            };
            self.remove_pod_state(pod_uid);
            if let Err(error) = self.delete_plugin_configs(pod_uid, &endpoint).await {
                warn!(pod_uid = %pod_uid, error = %format!("{error:#}"), "failed to delete pod log configs");
                continue;
            }
        }

        self.watcher.sync(self.pod_state.get_all_config_map_keys());
    }

    async fn refresh_plugin_state(&self, endpoint: &Arc<PluginEndpoint>) -> Result<()> {
        let configs = endpoint
            .list_config()
            .await
            .with_context(|| format!("listConfig on log plugin {} failed", endpoint.name()))?;
        debug!(
            plugin = endpoint.name(),
            config_count = configs.len(),
            "refreshed plugin inventory"
        );
        self.plugin_state
            .update_all_log_configs(&configs, endpoint.clone());
        Ok(())
    }

    /// Decodes the pod's policy and replaces its three desired-state entries.
    async fn refresh_pod_state(&self, pod: &Pod) -> Result<()> {
        let policy = logpolicy::get_log_policy(pod)?;
        let log_volumes = self.build_pod_log_volumes(pod, &policy).await?;
        let config_map_keys = self.build_pod_log_config_map_keys(pod, &policy).await?;

        let pod_uid = pod.metadata.uid;
        self.pod_state.update_config_map_keys(pod_uid, config_map_keys);
        self.pod_state.update_log_volumes(pod_uid, log_volumes);
        self.pod_state.update_log_policy(pod_uid, policy);
        Ok(())
    }

    fn remove_pod_state(&self, pod_uid: Uuid) {
        self.pod_state.remove_config_map_keys(pod_uid);
        self.pod_state.remove_log_volumes(pod_uid);
        self.pod_state.remove_log_policy(pod_uid);
    }

    /// Resolves every non-`std` policy entry against the pod's mounted
    /// volumes. A volume that is not mounted yet fails the whole pod, the
    /// caller retries on a later pass.
    async fn build_pod_log_volumes(
        &self,
        pod: &Pod,
        policy: &PodLogPolicy,
    ) -> Result<LogVolumesMap> {
        let mut log_volumes = LogVolumesMap::new();
        let pod_volumes = self.volumes.mounted_volumes(pod.metadata.uid).await;
        for (container_name, container_policies) in &policy.container_log_policies {
            for container_policy in container_policies {
                if container_policy.category == CATEGORY_STD {
                    continue;
                }
                let Some(host_path) = pod_volumes.get(&container_policy.volume_name) else {
                    bail!(
                        "volume {:?} is not mounted for pod {}",
                        container_policy.volume_name,
                        format_pod(pod)
                    );
                };
                log_volumes.insert(
                    container_policy.volume_name.clone(),
                    LogVolume {
                        volume_name: container_policy.volume_name.clone(),
                        path: container_policy.path.clone(),
                        host_path: host_path.clone(),
                        log_dir_path: paths::log_policy_directory(
                            &self.config.pod_logs_root,
                            pod.metadata.uid,
                            container_name,
                            &container_policy.category,
                        ),
                    },
                );
            }
        }
        Ok(log_volumes)
    }

    /// Fetches every referenced config map, failing on the first fetch error.
    async fn build_pod_log_config_map_keys(
        &self,
        pod: &Pod,
        policy: &PodLogPolicy,
    ) -> Result<HashSet<String>> {
        let mut config_map_keys = HashSet::new();
        for container_policies in policy.container_log_policies.values() {
            for container_policy in container_policies {
                let config_map = self
                    .config_maps
                    .get_config_map(&pod.metadata.namespace, &container_policy.plugin_config_map)
                    .await
                    .with_context(|| {
                        format!(
                            "failed to fetch config map {}/{} for pod {}",
                            pod.metadata.namespace,
                            container_policy.plugin_config_map,
                            format_pod(pod)
                        )
                    })?;
                config_map_keys.insert(paths::config_map_key(
                    &config_map.metadata.namespace,
                    &config_map.metadata.name,
                ));
            }
        }
        Ok(config_map_keys)
    }

    /// Synthesizes the desired config set of a pod. One config per entry of
    /// each referenced config map; a policy entry whose volume is missing is
    /// skipped so partial configs still deploy.
    async fn build_pod_log_configs(
        &self,
        pod: &Pod,
        policy: &PodLogPolicy,
        log_volumes: &LogVolumesMap,
    ) -> Result<BTreeMap<String, Config>> {
        let mut log_configs = BTreeMap::new();
        for (container_name, container_policies) in &policy.container_log_policies {
            for container_policy in container_policies {
                let config_map = self
                    .config_maps
                    .get_config_map(&pod.metadata.namespace, &container_policy.plugin_config_map)
                    .await
                    .with_context(|| {
                        format!(
                            "failed to fetch config map {}/{} for pod {}",
                            pod.metadata.namespace,
                            container_policy.plugin_config_map,
                            format_pod(pod)
                        )
                    })?;

                let path = if container_policy.category == CATEGORY_STD {
                    paths::pod_logs_directory(&self.config.pod_logs_root, pod.metadata.uid)
                } else {
                    match log_volumes.get(&container_policy.volume_name) {
                        Some(log_volume) => log_volume.log_dir_path.clone(),
                        None => {
                            warn!(
                                pod = %format_pod(pod),
                                volume = %container_policy.volume_name,
                                category = %container_policy.category,
                                "log volume not found, skipping policy entry"
                            );
                            continue;
                        }
                    }
                };

                for (file_key, content) in &config_map.data {
                    let config_name = paths::config_name(
                        pod.metadata.uid,
                        container_name,
                        &container_policy.category,
                        file_key,
                    );
                    log_configs.insert(
                        config_name.clone(),
                        Config {
                            metadata: ConfigMeta {
                                name: config_name,
                                pod_namespace: pod.metadata.namespace.clone(),
                                pod_name: pod.metadata.name.clone(),
                                pod_uid: pod.metadata.uid,
                                container_name: container_name.clone(),
                            },
                            spec: ConfigSpec {
                                content: content.clone(),
                                path: path.to_string_lossy().into_owned(),
                                category: container_policy.category.clone(),
                            },
                        },
                    );
                }
            }
        }
        Ok(log_configs)
    }

    /// Diffs the pod's desired configs against the observed store and applies
    /// the diff to the owning plugin: obsolete names first, then every
    /// desired config unconditionally (the plugin deduplicates by content).
    async fn push_configs(&self, pod: &Pod) -> Result<()> {
        let pod_uid = pod.metadata.uid;
        let policy = self
            .pod_state
            .get_log_policy(pod_uid)
            .ok_or_else(|| anyhow!("log policy not found in state store for pod {}", format_pod(pod)))?;
        let log_volumes = self
            .pod_state
            .get_log_volumes(pod_uid)
            .ok_or_else(|| anyhow!("log volumes not found in state store for pod {}", format_pod(pod)))?;

        let log_configs = self.build_pod_log_configs(pod, &policy, &log_volumes).await?;
        let endpoint = self.get_log_plugin_endpoint(&policy.log_plugin)?;

        let desired: BTreeSet<String> = log_configs.keys().cloned().collect();
        let observed = self.plugin_state.get_log_config_names(pod_uid);

        for config_name in observed.difference(&desired) {
            debug!(pod_uid = %pod_uid, config_name = %config_name, "deleting obsolete log plugin config");
            let response = endpoint.del_config(config_name).await.with_context(|| {
                format!(
                    "failed to delete config {config_name} from log plugin {}",
                    endpoint.name()
                )
            })?;
            debug!(pod_uid = %pod_uid, config_name = %config_name, changed = response.changed, "log plugin config deleted");
        }

        for (config_name, config) in log_configs {
            let response = endpoint.add_config(config).await.with_context(|| {
                format!(
                    "failed to add config {config_name} to log plugin {}",
                    endpoint.name()
                )
            })?;
            debug!(
                pod_uid = %pod_uid,
                config_name = %config_name,
                changed = response.changed,
                hash = %response.hash,
                "log plugin config added"
            );
        }
        Ok(())
    }

    /// Deletes every observed config of a pod from its plugin and drops the
    /// pod from the observed store.
    async fn delete_plugin_configs(
        &self,
        pod_uid: Uuid,
        endpoint: &Arc<PluginEndpoint>,
    ) -> Result<()> {
        for config_name in self.plugin_state.get_log_config_names(pod_uid) {
            let response = endpoint.del_config(&config_name).await.with_context(|| {
                format!(
                    "failed to delete config {config_name} from log plugin {}",
                    endpoint.name()
                )
            })?;
            debug!(pod_uid = %pod_uid, config_name = %config_name, changed = response.changed, "log plugin config deleted");
        }
        self.plugin_state.remove_pod(pod_uid);
        Ok(())
    }

    async fn create_log_policy(&self, pod: &Pod) -> Result<()> {
        self.refresh_pod_state(pod).await?;
        // refresh has just stored them
        let log_volumes = self
            .pod_state
            .get_log_volumes(pod.metadata.uid)
            .unwrap_or_default();
        self.create_pod_log_symlinks(&log_volumes).await?;
        self.push_configs(pod).await?;
        Ok(())
    }

    /// Ensures `<pod-logs-root>/<uid>/<container>/<category>` points at the
    /// host path of each backing volume. Existing links are left alone.
    async fn create_pod_log_symlinks(&self, log_volumes: &LogVolumesMap) -> Result<()> {
        for log_volume in log_volumes.values() {
            let container_log_dir = log_volume.log_dir_path.parent().ok_or_else(|| {
                anyhow!(
                    "log dir path {} has no parent",
                    log_volume.log_dir_path.display()
                )
            })?;
            if tokio::fs::metadata(container_log_dir).await.is_err() {
                debug!(dir = %container_log_dir.display(), "creating container log dir");
                tokio::fs::create_dir_all(container_log_dir)
                    .await
                    .with_context(|| {
                        format!("failed to create log dir {}", container_log_dir.display())
                    })?;
                let mut permissions = tokio::fs::metadata(container_log_dir).await?.permissions();
                permissions.set_mode(CONTAINER_LOG_DIR_MODE);
                tokio::fs::set_permissions(container_log_dir, permissions).await?;
            }
            if tokio::fs::symlink_metadata(&log_volume.log_dir_path)
                .await
                .is_err()
            {
                debug!(
                    link = %log_volume.log_dir_path.display(),
                    target = %log_volume.host_path.display(),
                    "creating log dir symlink"
                );
                tokio::fs::symlink(&log_volume.host_path, &log_volume.log_dir_path)
                    .await
                    .with_context(|| {
                        format!(
                            "failed to create symlink {} -> {}",
                            log_volume.log_dir_path.display(),
                            log_volume.host_path.display()
                        )
                    })?;
            }
        }
        Ok(())
    }

    /// True once the plugin reports no config of the pod as `Running`.
    /// Transport failures and unresolved endpoints count as not finished.
    async fn check_collect_finished(&self, pod_uid: Uuid, policy: &PodLogPolicy) -> bool {
        let config_names = self.plugin_state.get_log_config_names(pod_uid);
        if config_names.is_empty() {
            debug!(pod_uid = %pod_uid, "no observed configs, collection finished");
            return true;
        }
        let endpoint = match self.get_log_plugin_endpoint(&policy.log_plugin) {
            Ok(endpoint) => endpoint,
            Err(error) => {
                warn!(plugin = %policy.log_plugin, error = %error, "log plugin endpoint not resolved");
                return false;
            }
        };
        for config_name in &config_names {
            match endpoint.get_state(config_name).await {
                Ok(ConfigState::Running) => return false,
                Ok(state) => {
                    debug!(pod_uid = %pod_uid, config_name = %config_name, state = ?state, "config state");
                }
                Err(error) => {
                    warn!(pod_uid = %pod_uid, config_name = %config_name, error = %error, "failed to get config state");
                    return false;
                }
            }
        }
        true
    }

    /// Sets the `PodLogCollectFinished` condition, writing status only when
    /// the condition actually changes.
    async fn set_collect_finished(&self, pod: &Pod) -> Result<()> {
        let mut status = pod.status.clone();
        let changed = update_pod_condition(
            &mut status,
            PodCondition {
                condition_type: PodConditionType::PodLogCollectFinished,
                status: ConditionStatus::True,
                ..Default::default()
            },
        );
        if changed {
            self.status_sink.update_pod_status(pod, status).await?;
        }
        Ok(())
    }

    async fn add_endpoint(&self, request: RegisterRequest) {
        let socket_path = self.config.plugin_dir.join(&request.endpoint);
        let endpoint = match PluginEndpoint::connect(
            &socket_path,
            &request.name,
            self.config.rpc_timeout,
        )
        .await
        {
            Ok(endpoint) => Arc::new(endpoint),
            Err(error) => {
                warn!(
                    plugin = %request.name,
                    socket_path = %socket_path.display(),
                    error = %error,
                    "failed to create log plugin endpoint"
                );
                return;
            }
        };
        // re-registration under the same name supersedes the old endpoint
        if let Some(superseded) = self.endpoints.insert(request.name.clone(), endpoint) {
            superseded.stop().await;
        }
        info!(plugin = %request.name, socket_path = %socket_path.display(), "log plugin endpoint registered");
    }

    fn get_log_plugin_endpoint(&self, plugin_name: &str) -> Result<Arc<PluginEndpoint>> {
        self.endpoints
            .get(plugin_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| anyhow!("log plugin {plugin_name:?} is not registered"))
    }

    /// Re-pushes every pod depending on an updated config map. Errors stay in
    /// the callback: they are logged and recorded as pod events.
    async fn on_config_map_update(&self, config_map: ConfigMap) {
        let key = paths::config_map_key(&config_map.metadata.namespace, &config_map.metadata.name);
        info!(config_map = %key, "config map updated");

        for pod_uid in self.pod_state.get_pod_uids(&key) {
            let Some(pod) = self.pods.get_pod_by_uid(pod_uid).await else {
                warn!(pod_uid = %pod_uid, "pod not found in pod source");
                continue;
            };
            let Some(policy) = self.pod_state.get_log_policy(pod_uid) else {
                warn!(pod = %format_pod(&pod), "pod log policy not found in state store");
                continue;
            };

            // the updated policy may reference a different key set now
            let config_map_keys = match self.build_pod_log_config_map_keys(&pod, &policy).await {
                Ok(config_map_keys) => config_map_keys,
                Err(error) => {
                    warn!(pod = %format_pod(&pod), error = %format!("{error:#}"), "failed to rebuild config map keys");
                    self.recorder.event(
                        &pod,
                        EventType::Warning,
                        LOG_POLICY_CONFIG_UPDATE_FAILED,
                        format!("rebuild config map keys failed: {error:#}"),
                    );
                    continue;
                }
            };
            self.pod_state.update_config_map_keys(pod_uid, config_map_keys);

            if let Err(error) = self.push_configs(&pod).await {
                warn!(pod = %format_pod(&pod), error = %format!("{error:#}"), "failed to push configs after config map update");
                self.recorder.event(
                    &pod,
                    EventType::Warning,
                    LOG_POLICY_CONFIG_UPDATE_FAILED,
                    format!("push configs to log plugin failed: {error:#}"),
                );
                continue;
            }
            self.recorder.event(
                &pod,
                EventType::Normal,
                LOG_POLICY_CONFIG_UPDATE_SUCCESS,
                "log plugin configs updated".to_string(),
            );
        }
    }
}

/// Whether the pod has outlived `deletionTimestamp + grace period`.
fn exceeded_deletion_grace_period(pod: &Pod) -> bool {
    let (Some(deletion_timestamp), Some(grace_period_seconds)) = (
        pod.metadata.deletion_timestamp,
        pod.metadata.deletion_grace_period_seconds,
    ) else {
        return false;
    };
    Utc::now() > deletion_timestamp + ChronoDuration::seconds(grace_period_seconds)
}

fn format_pod(pod: &Pod) -> String {
    format!(
        "{}/{}({})",
        pod.metadata.namespace, pod.metadata.name, pod.metadata.uid
    )
}
