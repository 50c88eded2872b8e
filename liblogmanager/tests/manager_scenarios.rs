//! End-to-end manager scenarios against a fake collector plugin served over
//! a real unix socket.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

use common::logplugin::{
    AddConfigResponse, Config, ConfigState, DelConfigResponse, LOG_PLUGIN_API_VERSION,
    LogPluginRequest, LogPluginResponse, RegisterRequest, RegisterResponse,
};
use common::logpolicy::{
    LOG_POLICY_CONFIG_UPDATE_SUCCESS, LOG_POLICY_CREATE_SUCCESS, LOG_POLICY_REMOVE_SUCCESS,
    POD_LOG_POLICY_ANNOTATION_KEY,
};
use common::{
    ConditionStatus, ConfigMap, ObjectMeta, Pod, PodConditionType, PodPhase, PodStatus,
    get_pod_condition,
};
use liblogmanager::LogManager;
use liblogmanager::manager::LogPluginManager;
use liblogmanager::paths::{self, LogManagerConfig};
use liblogmanager::sources::{
    ConfigMapSource, EventRecorder, EventType, PodSource, PodStatusSink, SourcesReadyStub,
    VolumeSource,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Add { name: String, changed: bool },
    Del { name: String },
}

/// In-process collector plugin speaking the real wire protocol.
#[derive(Default)]
struct FakeLogPlugin {
    configs: StdMutex<BTreeMap<String, Config>>,
    states: StdMutex<HashMap<String, ConfigState>>,
    calls: StdMutex<Vec<Call>>,
}

impl FakeLogPlugin {
    async fn start(plugin_dir: &std::path::Path, name: &str) -> Arc<Self> {
        let plugin = Arc::new(Self::default());
        let listener = UnixListener::bind(plugin_dir.join(format!("{name}.sock"))).unwrap();
        let server = plugin.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let server = server.clone();
                tokio::spawn(server.serve_connection(stream));
            }
        });
        plugin
    }

    async fn serve_connection(self: Arc<Self>, stream: UnixStream) {
        let mut reader = BufReader::new(stream);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let response = match serde_json::from_str::<LogPluginRequest>(&line) {
                Ok(request) => self.handle(request),
                Err(error) => LogPluginResponse::Error(error.to_string()),
            };
            let mut reply = serde_json::to_string(&response).unwrap();
            reply.push('\n');
            if reader.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }

    fn handle(&self, request: LogPluginRequest) -> LogPluginResponse {
        match request {
            LogPluginRequest::AddConfig(config) => {
                let name = config.metadata.name.clone();
                let hash = format!("{:x}", Sha256::digest(config.spec.content.as_bytes()));
                let mut configs = self.configs.lock().unwrap();
                let changed = configs.get(&name) != Some(&*config);
                configs.insert(name.clone(), *config);
                self.calls
                    .lock()
                    .unwrap()
                    .push(Call::Add { name, changed });
                LogPluginResponse::ConfigAdded(AddConfigResponse { changed, hash })
            }
            LogPluginRequest::DelConfig(name) => {
                let changed = self.configs.lock().unwrap().remove(&name).is_some();
                self.calls.lock().unwrap().push(Call::Del { name });
                LogPluginResponse::ConfigDeleted(DelConfigResponse { changed })
            }
            LogPluginRequest::ListConfig => LogPluginResponse::ConfigList(
                self.configs.lock().unwrap().values().cloned().collect(),
            ),
            LogPluginRequest::GetState(name) => LogPluginResponse::State(
                self.states
                    .lock()
                    .unwrap()
                    .get(&name)
                    .copied()
                    .unwrap_or(ConfigState::Finished),
            ),
        }
    }

    fn set_state(&self, name: &str, state: ConfigState) {
        self.states
            .lock()
            .unwrap()
            .insert(name.to_string(), state);
    }

    fn config_names(&self) -> Vec<String> {
        self.configs.lock().unwrap().keys().cloned().collect()
    }

    fn config(&self, name: &str) -> Option<Config> {
        self.configs.lock().unwrap().get(name).cloned()
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn del_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Del { .. }))
            .count()
    }
}

async fn register_plugin(manager_socket: &std::path::Path, name: &str) {
    let mut stream = UnixStream::connect(manager_socket).await.unwrap();
    let request = RegisterRequest {
        name: name.to_string(),
        version: LOG_PLUGIN_API_VERSION.to_string(),
        endpoint: format!("{name}.sock"),
    };
    let mut line = serde_json::to_string(&request).unwrap();
    line.push('\n');
    stream.write_all(line.as_bytes()).await.unwrap();
    let mut reply = String::new();
    let mut reader = BufReader::new(&mut stream);
    reader.read_line(&mut reply).await.unwrap();
    let response: RegisterResponse = serde_json::from_str(&reply).unwrap();
    assert!(matches!(response, RegisterResponse::Ack));
}

#[derive(Default)]
struct FakePods {
    pods: StdMutex<HashMap<Uuid, Pod>>,
}

impl FakePods {
    fn put(&self, pod: &Pod) {
        self.pods
            .lock()
            .unwrap()
            .insert(pod.metadata.uid, pod.clone());
    }

    fn delete(&self, pod_uid: Uuid) {
        self.pods.lock().unwrap().remove(&pod_uid);
    }
}

#[async_trait]
impl PodSource for FakePods {
    async fn get_pods(&self) -> Vec<Pod> {
        self.pods.lock().unwrap().values().cloned().collect()
    }
    async fn get_pod_by_uid(&self, uid: Uuid) -> Option<Pod> {
        self.pods.lock().unwrap().get(&uid).cloned()
    }
}

#[derive(Default)]
struct FakeConfigMaps {
    maps: StdMutex<HashMap<String, ConfigMap>>,
}

impl FakeConfigMaps {
    fn set(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..Default::default()
            },
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        };
        self.maps
            .lock()
            .unwrap()
            .insert(format!("{namespace}/{name}"), config_map);
    }
}

#[async_trait]
impl ConfigMapSource for FakeConfigMaps {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        self.maps
            .lock()
            .unwrap()
            .get(&format!("{namespace}/{name}"))
            .cloned()
            .ok_or_else(|| anyhow!("config map {namespace}/{name} not found"))
    }
}

#[derive(Default)]
struct FakeVolumes {
    volumes: StdMutex<HashMap<Uuid, HashMap<String, PathBuf>>>,
}

impl FakeVolumes {
    fn mount(&self, pod_uid: Uuid, volume_name: &str, host_path: PathBuf) {
        self.volumes
            .lock()
            .unwrap()
            .entry(pod_uid)
            .or_default()
            .insert(volume_name.to_string(), host_path);
    }
}

#[async_trait]
impl VolumeSource for FakeVolumes {
    async fn mounted_volumes(&self, pod_uid: Uuid) -> HashMap<String, PathBuf> {
        self.volumes
            .lock()
            .unwrap()
            .get(&pod_uid)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct RecordingEvents {
    reasons: StdMutex<Vec<String>>,
}

impl EventRecorder for RecordingEvents {
    fn event(&self, _pod: &Pod, _event_type: EventType, reason: &str, _message: String) {
        self.reasons.lock().unwrap().push(reason.to_string());
    }
}

impl RecordingEvents {
    fn reasons(&self) -> Vec<String> {
        self.reasons.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct RecordingStatusSink {
    statuses: StdMutex<Vec<(Uuid, PodStatus)>>,
}

#[async_trait]
impl PodStatusSink for RecordingStatusSink {
    async fn update_pod_status(&self, pod: &Pod, status: PodStatus) -> Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .push((pod.metadata.uid, status));
        Ok(())
    }
}

struct Harness {
    manager: Arc<LogPluginManager>,
    pods: Arc<FakePods>,
    config_maps: Arc<FakeConfigMaps>,
    volumes: Arc<FakeVolumes>,
    events: Arc<RecordingEvents>,
    statuses: Arc<RecordingStatusSink>,
    plugin_dir: PathBuf,
    pod_logs_root: PathBuf,
    _scratch: tempfile::TempDir,
}

impl Harness {
    async fn start(resync_period: Duration) -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let plugin_dir = scratch.path().join("plugins");
        let pod_logs_root = scratch.path().join("pods");
        let pods = Arc::new(FakePods::default());
        let config_maps = Arc::new(FakeConfigMaps::default());
        let volumes = Arc::new(FakeVolumes::default());
        let events = Arc::new(RecordingEvents::default());
        let statuses = Arc::new(RecordingStatusSink::default());

        let config = LogManagerConfig {
            plugin_dir: plugin_dir.clone(),
            pod_logs_root: pod_logs_root.clone(),
            resync_period,
            config_map_poll_interval: Duration::from_millis(50),
            rpc_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let manager = Arc::new(LogPluginManager::new(
            config,
            pods.clone(),
            config_maps.clone(),
            volumes.clone(),
            events.clone(),
            statuses.clone(),
        ));
        manager.start(Arc::new(SourcesReadyStub)).await.unwrap();

        Self {
            manager,
            pods,
            config_maps,
            volumes,
            events,
            statuses,
            plugin_dir,
            pod_logs_root,
            _scratch: scratch,
        }
    }

    fn manager_socket(&self) -> PathBuf {
        self.plugin_dir
            .join(common::logplugin::LOG_MANAGER_SOCKET_NAME)
    }

    /// Registration finishes in the background; retry until the endpoint is
    /// usable.
    async fn create_when_registered(&self, pod: &Pod) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match self.manager.create_log_policy(pod).await {
                Ok(()) => return,
                Err(error) if tokio::time::Instant::now() > deadline => {
                    panic!("create_log_policy never succeeded: {error:#}");
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(25)).await,
            }
        }
    }
}

fn pod_with_policy(policy_json: &str) -> Pod {
    let mut metadata = ObjectMeta {
        name: "p".to_string(),
        namespace: "default".to_string(),
        uid: Uuid::new_v4(),
        ..Default::default()
    };
    metadata.annotations.insert(
        POD_LOG_POLICY_ANNOTATION_KEY.to_string(),
        policy_json.to_string(),
    );
    Pod {
        metadata,
        status: PodStatus {
            phase: PodPhase::Running,
            ..Default::default()
        },
        ..Default::default()
    }
}

const STD_POLICY: &str = r#"{
    "log_plugin": "lp",
    "container_log_policies": {
        "c": [{"category": "std", "plugin_configmap": "m"}]
    }
}"#;

async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

// S1: a fresh pod with a std policy produces exactly one addConfig.
#[tokio::test]
async fn creates_std_config_from_scratch() {
    let harness = Harness::start(Duration::from_secs(3600)).await;
    let plugin = FakeLogPlugin::start(&harness.plugin_dir, "lp").await;
    register_plugin(&harness.manager_socket(), "lp").await;

    let pod = pod_with_policy(STD_POLICY);
    harness.pods.put(&pod);
    harness.config_maps.set("default", "m", &[("x.conf", "A")]);

    harness.create_when_registered(&pod).await;

    let expected_name = paths::config_name(pod.metadata.uid, "c", "std", "x.conf");
    assert_eq!(
        plugin.calls(),
        vec![Call::Add {
            name: expected_name.clone(),
            changed: true
        }]
    );
    let config = plugin.config(&expected_name).unwrap();
    assert_eq!(config.spec.content, "A");
    assert_eq!(
        config.spec.path,
        paths::pod_logs_directory(&harness.pod_logs_root, pod.metadata.uid)
            .to_string_lossy()
    );
    assert_eq!(config.metadata.container_name, "c");
    assert_eq!(
        harness.events.reasons().last().map(String::as_str),
        Some(LOG_POLICY_CREATE_SUCCESS)
    );
}

// S2: a config map update fans out through the watcher and re-pushes.
#[tokio::test]
async fn config_map_update_repushes_configs() {
    let harness = Harness::start(Duration::from_millis(300)).await;
    let plugin = FakeLogPlugin::start(&harness.plugin_dir, "lp").await;
    register_plugin(&harness.manager_socket(), "lp").await;

    let pod = pod_with_policy(STD_POLICY);
    harness.pods.put(&pod);
    harness.config_maps.set("default", "m", &[("x.conf", "A")]);
    harness.create_when_registered(&pod).await;

    // let a resync establish the watch and its baseline observation
    tokio::time::sleep(Duration::from_millis(600)).await;

    harness
        .config_maps
        .set("default", "m", &[("x.conf", "B"), ("y.conf", "C")]);

    wait_until("config map update dispatch", || {
        let events = harness.events.clone();
        async move {
            events
                .reasons()
                .iter()
                .any(|reason| reason == LOG_POLICY_CONFIG_UPDATE_SUCCESS)
        }
    })
    .await;

    let x_name = paths::config_name(pod.metadata.uid, "c", "std", "x.conf");
    let y_name = paths::config_name(pod.metadata.uid, "c", "std", "y.conf");
    assert_eq!(plugin.config_names(), vec![x_name.clone(), y_name]);
    assert_eq!(plugin.config(&x_name).unwrap().spec.content, "B");
    // no previous name disappeared, so nothing was deleted
    assert_eq!(plugin.del_count(), 0);
}

// S3: a non-std policy entry gets a symlink and configs pointing at it.
#[tokio::test]
async fn file_log_policy_creates_symlink() {
    let harness = Harness::start(Duration::from_secs(3600)).await;
    let plugin = FakeLogPlugin::start(&harness.plugin_dir, "lp").await;
    register_plugin(&harness.manager_socket(), "lp").await;

    let pod = pod_with_policy(
        r#"{
            "log_plugin": "lp",
            "container_log_policies": {
                "c": [{"category": "app", "path": "/logs", "volume_name": "v", "plugin_configmap": "m"}]
            }
        }"#,
    );
    harness.pods.put(&pod);
    harness.config_maps.set("default", "m", &[("app.conf", "A")]);
    let host_path = harness._scratch.path().join("host-v");
    std::fs::create_dir_all(&host_path).unwrap();
    harness
        .volumes
        .mount(pod.metadata.uid, "v", host_path.clone());

    harness.create_when_registered(&pod).await;

    let link = paths::log_policy_directory(&harness.pod_logs_root, pod.metadata.uid, "c", "app");
    assert_eq!(std::fs::read_link(&link).unwrap(), host_path);

    let name = paths::config_name(pod.metadata.uid, "c", "app", "app.conf");
    assert_eq!(
        plugin.config(&name).unwrap().spec.path,
        link.to_string_lossy()
    );
}

// S4: a missing volume fails creation before any symlink or addConfig.
#[tokio::test]
async fn missing_volume_blocks_creation() {
    let harness = Harness::start(Duration::from_secs(3600)).await;
    let plugin = FakeLogPlugin::start(&harness.plugin_dir, "lp").await;
    register_plugin(&harness.manager_socket(), "lp").await;
    // give the background endpoint construction a moment
    tokio::time::sleep(Duration::from_millis(200)).await;

    let pod = pod_with_policy(
        r#"{
            "log_plugin": "lp",
            "container_log_policies": {
                "c": [{"category": "app", "path": "/logs", "volume_name": "v", "plugin_configmap": "m"}]
            }
        }"#,
    );
    harness.pods.put(&pod);
    harness.config_maps.set("default", "m", &[("app.conf", "A")]);

    assert!(harness.manager.create_log_policy(&pod).await.is_err());
    assert!(plugin.calls().is_empty());
    let link = paths::log_policy_directory(&harness.pod_logs_root, pod.metadata.uid, "c", "app");
    assert!(std::fs::symlink_metadata(&link).is_err());
}

// S5: safe deletion blocks removal while a config is still running.
#[tokio::test]
async fn safe_deletion_gates_removal() {
    let harness = Harness::start(Duration::from_millis(200)).await;
    let plugin = FakeLogPlugin::start(&harness.plugin_dir, "lp").await;
    register_plugin(&harness.manager_socket(), "lp").await;

    let pod = pod_with_policy(
        r#"{
            "log_plugin": "lp",
            "safe_deletion_enabled": true,
            "container_log_policies": {
                "c": [{"category": "std", "plugin_configmap": "m"}]
            }
        }"#,
    );
    harness.pods.put(&pod);
    harness.config_maps.set("default", "m", &[("x.conf", "A")]);
    harness.create_when_registered(&pod).await;

    let name = paths::config_name(pod.metadata.uid, "c", "std", "x.conf");
    plugin.set_state(&name, ConfigState::Running);

    // wait for a resync to pull the plugin inventory into the observed store
    wait_until("observed state to report running collection", || {
        let manager = harness.manager.clone();
        let pod = pod.clone();
        async move { !manager.collect_finished(&pod).await }
    })
    .await;

    let error = harness.manager.remove_log_policy(&pod).await.unwrap_err();
    assert!(error.to_string().contains("safe deletion"));
    assert_eq!(plugin.del_count(), 0);
    assert!(!harness.manager.collect_finished(&pod).await);
}

// S6: without safe deletion, removal unblocks once the grace period expires.
#[tokio::test]
async fn grace_period_expiry_unblocks_removal() {
    let harness = Harness::start(Duration::from_millis(200)).await;
    let plugin = FakeLogPlugin::start(&harness.plugin_dir, "lp").await;
    register_plugin(&harness.manager_socket(), "lp").await;

    let mut pod = pod_with_policy(STD_POLICY);
    pod.metadata.deletion_timestamp = Some(Utc::now());
    pod.metadata.deletion_grace_period_seconds = Some(30);
    harness.pods.put(&pod);
    harness.config_maps.set("default", "m", &[("x.conf", "A")]);
    harness.create_when_registered(&pod).await;

    let name = paths::config_name(pod.metadata.uid, "c", "std", "x.conf");
    plugin.set_state(&name, ConfigState::Running);

    wait_until("observed state to report running collection", || {
        let manager = harness.manager.clone();
        let pod = pod.clone();
        async move { !manager.collect_finished(&pod).await }
    })
    .await;

    // still inside the grace period
    let error = harness.manager.remove_log_policy(&pod).await.unwrap_err();
    assert!(error.to_string().contains("grace period"));
    assert_eq!(plugin.del_count(), 0);

    // grace period elapsed; keep the pod out of resync's way
    pod.metadata.deletion_timestamp = Some(Utc::now() - ChronoDuration::seconds(31));
    pod.status.phase = PodPhase::Succeeded;
    harness.pods.put(&pod);

    harness.manager.remove_log_policy(&pod).await.unwrap();

    assert!(plugin.del_count() >= 1);
    assert!(plugin.config_names().is_empty());
    assert!(
        harness
            .events
            .reasons()
            .iter()
            .any(|reason| reason == LOG_POLICY_REMOVE_SUCCESS)
    );
    let statuses = harness.statuses.statuses.lock().unwrap();
    let (status_uid, status) = statuses.last().expect("status update recorded");
    assert_eq!(*status_uid, pod.metadata.uid);
    let condition = get_pod_condition(status, &PodConditionType::PodLogCollectFinished)
        .expect("condition set");
    assert_eq!(condition.status, ConditionStatus::True);
}

// Property 4: pods gone from the pod source are drained from the plugin.
#[tokio::test]
async fn resync_garbage_collects_deleted_pods() {
    let harness = Harness::start(Duration::from_millis(200)).await;
    let plugin = FakeLogPlugin::start(&harness.plugin_dir, "lp").await;
    register_plugin(&harness.manager_socket(), "lp").await;

    let pod = pod_with_policy(STD_POLICY);
    harness.pods.put(&pod);
    harness.config_maps.set("default", "m", &[("x.conf", "A")]);
    harness.create_when_registered(&pod).await;
    assert_eq!(plugin.config_names().len(), 1);

    harness.pods.delete(pod.metadata.uid);

    wait_until("garbage collection to drain the plugin", || {
        let plugin = plugin.clone();
        async move { plugin.config_names().is_empty() }
    })
    .await;
}

// Property 3: re-pushing an unchanged pod issues no deletions and only
// content-idempotent additions.
#[tokio::test]
async fn unchanged_push_is_idempotent() {
    let harness = Harness::start(Duration::from_millis(200)).await;
    let plugin = FakeLogPlugin::start(&harness.plugin_dir, "lp").await;
    register_plugin(&harness.manager_socket(), "lp").await;

    let pod = pod_with_policy(STD_POLICY);
    harness.pods.put(&pod);
    harness.config_maps.set("default", "m", &[("x.conf", "A")]);
    harness.create_when_registered(&pod).await;

    // several resyncs re-derive the same diff
    tokio::time::sleep(Duration::from_millis(700)).await;
    harness.manager.create_log_policy(&pod).await.unwrap();

    let calls = plugin.calls();
    let changed_adds = calls
        .iter()
        .filter(|call| matches!(call, Call::Add { changed: true, .. }))
        .count();
    assert_eq!(changed_adds, 1, "only the first add may change the plugin");
    assert_eq!(plugin.del_count(), 0);
    assert_eq!(plugin.config_names().len(), 1);
}
