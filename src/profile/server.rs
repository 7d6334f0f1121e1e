//! Serving side of the profile exchange.
//!
//! Listens on a Unix socket. Each accepted connection gets the profile list
//! right away, then one answer per content request until the peer hangs up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use super::client::ProfileError;
use super::protocol::{ProfileContent, ProfileKind, ProfileMessage, ProfilePreview};
use crate::command::protocol::ProtocolError;
use crate::socket::{FrameError, FrameReader, FrameWriter};

/// Error text sent for an id the source does not know.
pub const NOT_FOUND_MESSAGE: &str = "profile not found";

/// Where served profiles come from.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Profiles available right now.
    async fn list(&self) -> Result<Vec<ProfilePreview>>;

    /// Full profile for `id`, or `None` if there is no such profile.
    async fn content(&self, id: i64) -> Result<Option<ProfileContent>>;
}

/// Serves every `*.json` file in a directory.
///
/// Files are listed in name order and numbered from zero in that order.
#[derive(Debug, Clone)]
pub struct DirectoryProfileSource {
    dir: PathBuf,
}

impl DirectoryProfileSource {
    /// Serve profiles from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn entries(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to read profile directory: {}", self.dir.display()))?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                entries.push((stem.to_string(), path.clone()));
            }
        }
        entries.sort();
        Ok(entries)
    }
}

#[async_trait]
impl ProfileSource for DirectoryProfileSource {
    async fn list(&self) -> Result<Vec<ProfilePreview>> {
        let entries = self.entries().await?;
        Ok(entries
            .into_iter()
            .zip(0i64..)
            .map(|((name, _), id)| ProfilePreview {
                id,
                name,
                kind: ProfileKind::Local,
            })
            .collect())
    }

    async fn content(&self, id: i64) -> Result<Option<ProfileContent>> {
        let entries = self.entries().await?;
        let Some((name, path)) = usize::try_from(id).ok().and_then(|i| entries.into_iter().nth(i))
        else {
            return Ok(None);
        };
        let config = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read profile: {}", path.display()))?;
        let modified = tokio::fs::metadata(&path)
            .await
            .and_then(|m| m.modified())
            .ok()
            .map(chrono::DateTime::<chrono::Utc>::from);
        Ok(Some(ProfileContent {
            name,
            kind: ProfileKind::Local,
            config,
            remote_path: String::new(),
            auto_update: false,
            auto_update_interval: 0,
            last_updated: modified,
        }))
    }
}

/// Unix socket server for the profile exchange.
#[derive(Debug)]
pub struct ProfileServer {
    socket_path: PathBuf,
    accept_handle: JoinHandle<()>,
}

impl ProfileServer {
    /// Bind `socket_path` and start accepting.
    ///
    /// Removes a stale socket file first and restricts the new one to the
    /// owner.
    pub fn start(socket_path: PathBuf, source: Arc<dyn ProfileSource>) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .with_context(|| format!("Failed to remove stale socket: {}", socket_path.display()))?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = std::os::unix::net::UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind socket: {}", socket_path.display()))?;
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;
        }
        listener.set_nonblocking(true)?;
        let listener = UnixListener::from_std(listener)?;

        log::info!("[ProfileServer] listening on {}", socket_path.display());
        let accept_handle = tokio::spawn(Self::accept_loop(listener, source));

        Ok(Self {
            socket_path,
            accept_handle,
        })
    }

    async fn accept_loop(listener: UnixListener, source: Arc<dyn ProfileSource>) {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    log::debug!("[ProfileServer] client connected");
                    let source = Arc::clone(&source);
                    tokio::spawn(async move {
                        match serve_connection(stream, source.as_ref()).await {
                            Ok(()) => log::debug!("[ProfileServer] client done"),
                            Err(e) => log::warn!("[ProfileServer] client error: {}", e),
                        }
                    });
                }
                Err(e) => {
                    log::error!("[ProfileServer] accept error: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Path of the listening socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting and remove the socket file.
    pub fn shutdown(self) {
        self.accept_handle.abort();
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            log::debug!("[ProfileServer] socket cleanup failed: {e}");
        }
    }
}

/// Run one exchange on an accepted stream until the peer hangs up.
pub async fn serve_connection(stream: UnixStream, source: &dyn ProfileSource) -> Result<(), ProfileError> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let mut writer = FrameWriter::new(write_half);

    let list = match source.list().await {
        Ok(profiles) => ProfileMessage::ProfileList(profiles),
        Err(e) => {
            log::warn!("[ProfileServer] listing failed: {e:#}");
            ProfileMessage::Error {
                message: format!("{e:#}"),
            }
        }
    };
    writer.write(&list.encode()?).await?;

    loop {
        let payload = match reader.read().await {
            Ok(payload) => payload,
            Err(FrameError::Closed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let reply = match ProfileMessage::decode(&payload)? {
            ProfileMessage::ProfileContentRequest { id } => match source.content(id).await {
                Ok(Some(content)) => ProfileMessage::ProfileContent(content),
                Ok(None) => ProfileMessage::Error {
                    message: NOT_FOUND_MESSAGE.to_string(),
                },
                Err(e) => ProfileMessage::Error {
                    message: format!("{e:#}"),
                },
            },
            other => return Err(ProtocolError::UnknownTag(other.tag()).into()),
        };
        writer.write(&reply.encode()?).await?;
    }
}
