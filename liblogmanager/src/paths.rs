//! Filesystem layout and naming.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::logplugin::{DEFAULT_LOG_PLUGIN_DIR, LOG_MANAGER_SOCKET_NAME};
use uuid::Uuid;

/// Root of the per-pod log symlink tree.
pub const DEFAULT_POD_LOGS_ROOT: &str = "/var/log/pods";

/// Mode of the per-container directories created under the pod logs root.
pub const CONTAINER_LOG_DIR_MODE: u32 = 0o766;

const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(3 * 60);
const DEFAULT_CONFIG_MAP_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables of the manager. [`Default`] matches the node layout expected by
/// the hosting daemon; tests point the paths into a scratch directory.
#[derive(Debug, Clone)]
pub struct LogManagerConfig {
    /// Directory holding the registration socket and plugin sockets.
    pub plugin_dir: PathBuf,
    /// Registration socket filename under `plugin_dir`.
    pub socket_name: String,
    /// Root of the per-pod log symlink tree.
    pub pod_logs_root: PathBuf,
    /// Period of the full reconciliation pass.
    pub resync_period: Duration,
    /// Poll period of each watched config map.
    pub config_map_poll_interval: Duration,
    /// Deadline applied to each plugin RPC.
    pub rpc_timeout: Duration,
}

impl Default for LogManagerConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from(DEFAULT_LOG_PLUGIN_DIR),
            socket_name: LOG_MANAGER_SOCKET_NAME.to_string(),
            pod_logs_root: PathBuf::from(DEFAULT_POD_LOGS_ROOT),
            resync_period: DEFAULT_RESYNC_PERIOD,
            config_map_poll_interval: DEFAULT_CONFIG_MAP_POLL_INTERVAL,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

/// `<namespace>/<name>`, the key config maps are indexed by.
pub fn config_map_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Directory the runtime writes a pod's stdout/stderr logs under,
/// eg. `/var/log/pods/<pod-uid>`.
pub fn pod_logs_directory(root: &Path, pod_uid: Uuid) -> PathBuf {
    root.join(pod_uid.to_string())
}

/// Symlink location for one container log category,
/// eg. `/var/log/pods/<pod-uid>/<container-name>/<category>`.
pub fn log_policy_directory(root: &Path, pod_uid: Uuid, container: &str, category: &str) -> PathBuf {
    root.join(pod_uid.to_string()).join(container).join(category)
}

/// Synthesizes the unique config name for one config map entry of one
/// container log policy.
pub fn config_name(pod_uid: Uuid, container: &str, category: &str, file_key: &str) -> String {
    format!("{pod_uid}-{container}-{category}-{file_key}")
}
