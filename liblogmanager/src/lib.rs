//! Node-local pod log policy manager.
//!
//! Reconciles per-pod logging intent, declared as pod annotations backed by
//! config maps, against out-of-process log collector plugins. Plugins
//! register over a local socket; the manager translates policies into
//! `addConfig`/`delConfig` RPCs on the owning plugin, tracks what each
//! plugin currently holds, and gates pod termination on whether collection
//! for the pod has drained.
//!
//! The hosting daemon constructs a [`manager::LogPluginManager`] with its
//! pod/config-map/volume/status handles (see [`sources`]) and drives it
//! through the [`LogManager`] trait.

pub mod endpoint;
pub mod manager;
pub mod paths;
pub mod registration;
pub mod sources;
pub mod state;
pub mod watcher;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use common::Pod;

use crate::sources::SourcesReady;

/// Lifecycle surface exposed to the hosting daemon.
#[async_trait]
pub trait LogManager: Send + Sync {
    /// Non-blocking start: binds the registration socket and spawns the
    /// background resync loop.
    async fn start(&self, sources_ready: Arc<dyn SourcesReady>) -> Result<()>;

    /// Installs collector configs for a freshly started pod.
    /// No-op for pods without a log policy annotation.
    async fn create_log_policy(&self, pod: &Pod) -> Result<()>;

    /// Removes collector configs for a terminating pod. Fails while the
    /// safe-deletion gate holds; callers re-invoke until it succeeds.
    async fn remove_log_policy(&self, pod: &Pod) -> Result<()>;

    /// Whether log collection for the pod has drained.
    async fn collect_finished(&self, pod: &Pod) -> bool;
}
