//! Wire protocol between the log manager and collector plugins.
//!
//! Both directions speak newline-delimited JSON over local unix sockets.
//! A plugin announces itself by connecting to the manager's registration
//! socket and sending one [`RegisterRequest`] line; the manager replies
//! with [`RegisterResponse::Ack`] or [`RegisterResponse::Error`]. The
//! manager then dials the plugin's own socket and drives it with
//! [`LogPluginRequest`] lines, one [`LogPluginResponse`] line each.
//!
//! All four plugin RPCs are required to be idempotent: the manager is free
//! to replay the same `AddConfig`/`DelConfig` across reconciliations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version accepted by the registration socket.
pub const LOG_PLUGIN_API_VERSION: &str = "v1alpha1";

/// Directory holding the manager's registration socket and every plugin
/// socket. The manager removes stale files under it at startup, so plugins
/// can watch the directory mtime as a re-registration signal.
pub const DEFAULT_LOG_PLUGIN_DIR: &str = "/var/lib/rkl/log-plugins";

/// Filename of the manager's registration socket under the plugin directory.
pub const LOG_MANAGER_SOCKET_NAME: &str = "logmanager.sock";

/// Identity of one plugin config.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMeta {
    /// Synthesized, unique per (pod, container, category, config map entry).
    pub name: String,
    pub pod_namespace: String,
    pub pod_name: String,
    pub pod_uid: Uuid,
    pub container_name: String,
}

/// What one config tells the plugin to tail.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    /// Raw value of one config map entry, handed to the plugin verbatim.
    pub content: String,
    /// Directory the logs live under on the node.
    pub path: String,
    /// Log category, `std` for stdout/stderr.
    pub category: String,
}

/// One tailing directive installed in a plugin.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    pub metadata: ConfigMeta,
    pub spec: ConfigSpec,
}

/// Collection status of one config as reported by its plugin.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigState {
    Running,
    Finished,
    #[default]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AddConfigResponse {
    /// False when the plugin already held an identical config.
    pub changed: bool,
    /// Content hash computed by the plugin.
    pub hash: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DelConfigResponse {
    /// False when the named config was already absent.
    pub changed: bool,
}

/// One request line from the manager to a plugin.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum LogPluginRequest {
    AddConfig(Box<Config>),
    DelConfig(String),
    ListConfig,
    GetState(String),
}

/// One response line from a plugin to the manager.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum LogPluginResponse {
    ConfigAdded(AddConfigResponse),
    ConfigDeleted(DelConfigResponse),
    ConfigList(Vec<Config>),
    State(ConfigState),
    Error(String),
}

/// Registration request sent by a plugin to the manager socket.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegisterRequest {
    /// Plugin name, unique per node; re-registration under the same name
    /// supersedes the previous endpoint.
    pub name: String,
    /// Must equal [`LOG_PLUGIN_API_VERSION`].
    pub version: String,
    /// Socket filename of the plugin, relative to the plugin directory.
    pub endpoint: String,
}

/// Registration reply.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum RegisterResponse {
    Ack,
    Error(String),
}
