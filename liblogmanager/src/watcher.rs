//! Watches the config maps referenced by pod log policies.
//!
//! [`ConfigMapWatcher::sync`] reconciles one watch task per watched key;
//! each task polls the node-local config map source and, when the map's
//! `data` differs from the last observation, sends the current object down
//! the update channel. The manager drains that channel on its own dispatch
//! task, so no manager lock is ever held while a change is delivered.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::ConfigMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::sources::ConfigMapSource;

pub struct ConfigMapWatcher {
    source: Arc<dyn ConfigMapSource>,
    poll_interval: Duration,
    update_tx: mpsc::UnboundedSender<ConfigMap>,
    // config map key -> watch task
    watches: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ConfigMapWatcher {
    /// Returns the watcher and the channel its watch tasks deliver changed
    /// config maps on.
    pub fn new(
        source: Arc<dyn ConfigMapSource>,
        poll_interval: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ConfigMap>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Arc::new(Self {
            source,
            poll_interval,
            update_tx,
            watches: Mutex::new(HashMap::new()),
        });
        (watcher, update_rx)
    }

    /// Reconciles the watched set to exactly `keys`: starts watches for keys
    /// newly present, stops watches for keys no longer present. Idempotent
    /// and safe to call while watch tasks are dispatching.
    pub fn sync(&self, keys: HashSet<String>) {
        let mut watches = self.watches.lock().expect("watch table lock poisoned");
        watches.retain(|key, handle| {
            if keys.contains(key) {
                true
            } else {
                debug!(config_map = %key, "stopping config map watch");
                handle.abort();
                false
            }
        });
        for key in keys {
            if watches.contains_key(&key) {
                continue;
            }
            let Some((namespace, name)) = key.split_once('/') else {
                warn!(config_map = %key, "ignoring malformed config map key");
                continue;
            };
            debug!(config_map = %key, "starting config map watch");
            let handle = tokio::spawn(watch_loop(
                self.source.clone(),
                namespace.to_string(),
                name.to_string(),
                self.poll_interval,
                self.update_tx.clone(),
            ));
            watches.insert(key, handle);
        }
    }

    /// Stops every watch.
    pub fn stop(&self) {
        let mut watches = self.watches.lock().expect("watch table lock poisoned");
        for (key, handle) in watches.drain() {
            debug!(config_map = %key, "stopping config map watch");
            handle.abort();
        }
    }
}

async fn watch_loop(
    source: Arc<dyn ConfigMapSource>,
    namespace: String,
    name: String,
    poll_interval: Duration,
    update_tx: mpsc::UnboundedSender<ConfigMap>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    // the first observation is the baseline, not a change
    let mut last_seen: Option<HashMap<String, String>> = None;
    loop {
        ticker.tick().await;
        let config_map = match source.get_config_map(&namespace, &name).await {
            Ok(config_map) => config_map,
            Err(error) => {
                debug!(
                    namespace,
                    name,
                    error = %error,
                    "config map fetch failed, keeping last observation"
                );
                continue;
            }
        };
        match &last_seen {
            Some(previous) if *previous == config_map.data => {}
            Some(_) => {
                debug!(namespace, name, "config map changed");
                let data = config_map.data.clone();
                if update_tx.send(config_map).is_err() {
                    return;
                }
                last_seen = Some(data);
            }
            None => {
                last_seen = Some(config_map.data);
            }
        }
    }
}
