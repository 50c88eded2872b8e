//! Client handle to one registered collector plugin.
//!
//! Holds a persistent unix-socket connection speaking one JSON request line
//! per RPC, one response line back. The endpoint never retries: a failed
//! call surfaces to the caller and the next resync re-derives the diff.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::logplugin::{
    AddConfigResponse, Config, ConfigState, DelConfigResponse, LogPluginRequest, LogPluginResponse,
};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("endpoint connection is closed")]
    Stopped,
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("rpc timed out after {0:?}")]
    Timeout(Duration),
    #[error("plugin error: {0}")]
    Plugin(String),
    #[error("unexpected response to {0}")]
    Unexpected(&'static str),
}

/// Connection to one collector plugin, shared by the manager's callers.
pub struct PluginEndpoint {
    name: String,
    socket_path: PathBuf,
    rpc_timeout: Duration,
    conn: Mutex<Option<BufReader<UnixStream>>>,
}

impl std::fmt::Debug for PluginEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEndpoint")
            .field("name", &self.name)
            .field("socket_path", &self.socket_path)
            .finish()
    }
}

impl PluginEndpoint {
    /// Dials the plugin socket and keeps the connection for the lifetime of
    /// the endpoint.
    pub async fn connect(
        socket_path: impl AsRef<Path>,
        name: impl Into<String>,
        rpc_timeout: Duration,
    ) -> Result<Self, EndpointError> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&socket_path).await?;
        Ok(Self {
            name: name.into(),
            socket_path,
            rpc_timeout,
            conn: Mutex::new(Some(BufReader::new(stream))),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Install or overwrite a config. Idempotent on identical content
    /// (`changed == false`).
    pub async fn add_config(&self, config: Config) -> Result<AddConfigResponse, EndpointError> {
        match self
            .call(&LogPluginRequest::AddConfig(Box::new(config)))
            .await?
        {
            LogPluginResponse::ConfigAdded(rsp) => Ok(rsp),
            LogPluginResponse::Error(msg) => Err(EndpointError::Plugin(msg)),
            _ => Err(EndpointError::Unexpected("addConfig")),
        }
    }

    /// Remove a config by name. Idempotent when already absent.
    pub async fn del_config(&self, config_name: &str) -> Result<DelConfigResponse, EndpointError> {
        match self
            .call(&LogPluginRequest::DelConfig(config_name.to_string()))
            .await?
        {
            LogPluginResponse::ConfigDeleted(rsp) => Ok(rsp),
            LogPluginResponse::Error(msg) => Err(EndpointError::Plugin(msg)),
            _ => Err(EndpointError::Unexpected("delConfig")),
        }
    }

    /// The plugin's full config inventory.
    pub async fn list_config(&self) -> Result<Vec<Config>, EndpointError> {
        match self.call(&LogPluginRequest::ListConfig).await? {
            LogPluginResponse::ConfigList(configs) => Ok(configs),
            LogPluginResponse::Error(msg) => Err(EndpointError::Plugin(msg)),
            _ => Err(EndpointError::Unexpected("listConfig")),
        }
    }

    /// Collection status of one config.
    pub async fn get_state(&self, config_name: &str) -> Result<ConfigState, EndpointError> {
        match self
            .call(&LogPluginRequest::GetState(config_name.to_string()))
            .await?
        {
            LogPluginResponse::State(state) => Ok(state),
            LogPluginResponse::Error(msg) => Err(EndpointError::Plugin(msg)),
            _ => Err(EndpointError::Unexpected("getState")),
        }
    }

    /// Tears the connection down; later calls fail with
    /// [`EndpointError::Stopped`].
    pub async fn stop(&self) {
        debug!(plugin = %self.name, "stopping log plugin endpoint");
        let mut guard = self.conn.lock().await;
        *guard = None;
    }

    async fn call(&self, request: &LogPluginRequest) -> Result<LogPluginResponse, EndpointError> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(EndpointError::Stopped)?;
        let exchange = async {
            conn.write_all(line.as_bytes()).await?;
            conn.flush().await?;
            let mut reply = String::new();
            let n = conn.read_line(&mut reply).await?;
            if n == 0 {
                return Err(EndpointError::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "plugin closed the connection",
                )));
            }
            Ok(serde_json::from_str(&reply)?)
        };
        match tokio::time::timeout(self.rpc_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                // the stream framing is now unknown, drop the connection
                *guard = None;
                Err(EndpointError::Timeout(self.rpc_timeout))
            }
        }
    }
}

#[cfg(test)]
impl PluginEndpoint {
    /// Endpoint with no backing connection, for store tests.
    pub(crate) fn detached(name: &str) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            name: name.to_string(),
            socket_path: PathBuf::new(),
            rpc_timeout: Duration::from_secs(1),
            conn: Mutex::new(None),
        })
    }
}
