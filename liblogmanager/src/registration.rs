//! Plugin registration socket.
//!
//! Plugins connect to `<plugin-dir>/<socket-name>`, send one
//! [`RegisterRequest`] line and read one [`RegisterResponse`] line back.
//! Version validation happens synchronously; accepted registrations are
//! forwarded to the manager, which dials the plugin endpoint in the
//! background so the registering peer is never blocked on it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use common::logplugin::{LOG_PLUGIN_API_VERSION, RegisterRequest, RegisterResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct RegistrationServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl RegistrationServer {
    /// Creates the socket directory if absent, removes stale files beneath
    /// it (plugins watch the directory mtime as a re-registration signal,
    /// so only files go, directories stay) and binds the socket.
    pub async fn bind(socket_dir: &Path, socket_name: &str) -> Result<Self> {
        tokio::fs::create_dir_all(socket_dir)
            .await
            .with_context(|| format!("failed to create socket dir {}", socket_dir.display()))?;
        clean_stale_files(socket_dir).await?;

        let socket_path = socket_dir.join(socket_name);
        let listener = UnixListener::bind(&socket_path).with_context(|| {
            format!(
                "failed to bind registration socket {}",
                socket_path.display()
            )
        })?;
        info!(socket_path = %socket_path.display(), "serving log plugin registration socket");
        Ok(Self {
            listener,
            socket_path,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serves registrations until aborted. Valid requests arrive on the
    /// returned channel.
    pub fn spawn(self) -> (JoinHandle<()>, mpsc::UnboundedReceiver<RegisterRequest>) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, _)) => {
                        let register_tx = register_tx.clone();
                        tokio::spawn(async move {
                            if let Err(error) = handle_registration(stream, register_tx).await {
                                warn!(error = %error, "log plugin registration failed");
                            }
                        });
                    }
                    Err(error) => {
                        warn!(error = %error, "registration accept failed");
                    }
                }
            }
        });
        (handle, register_rx)
    }
}

async fn handle_registration(
    mut stream: UnixStream,
    register_tx: mpsc::UnboundedSender<RegisterRequest>,
) -> Result<()> {
    let mut line = String::new();
    {
        let mut reader = BufReader::new(&mut stream);
        reader.read_line(&mut line).await?;
    }
    let request: RegisterRequest =
        serde_json::from_str(&line).context("malformed registration request")?;
    info!(
        plugin = %request.name,
        endpoint = %request.endpoint,
        "got registration request from log plugin"
    );

    if request.version != LOG_PLUGIN_API_VERSION {
        let reply = RegisterResponse::Error(format!(
            "invalid version: {}, expected: {}",
            request.version, LOG_PLUGIN_API_VERSION
        ));
        write_response(&mut stream, &reply).await?;
        bail!(
            "rejected log plugin {}: unsupported version {:?}",
            request.name,
            request.version
        );
    }

    write_response(&mut stream, &RegisterResponse::Ack).await?;
    // endpoint construction continues in the manager, the peer is unblocked
    let _ = register_tx.send(request);
    Ok(())
}

async fn write_response(stream: &mut UnixStream, response: &RegisterResponse) -> Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    stream.write_all(line.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Removes regular files under `dir`, preserving subdirectories.
async fn clean_stale_files(dir: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read socket dir {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to stat file");
                continue;
            }
        };
        if metadata.is_dir() {
            continue;
        }
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to remove stale file {}", path.display()))?;
    }
    Ok(())
}
