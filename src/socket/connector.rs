//! Opening the byte stream to the running engine.
//!
//! The session and the profile exchange only need "give me a connected
//! stream"; how that stream is provisioned belongs to the platform. The
//! [`Connector`] trait is that seam, with [`UnixConnector`] as the default
//! implementation for a Unix domain socket.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;

/// A connected bidirectional byte stream.
pub trait EngineStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> EngineStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed stream handed out by a [`Connector`].
pub type BoxedStream = Box<dyn EngineStream>;

/// Opens streams to the engine.
///
/// Each call is a single attempt. Retry policy lives in the caller.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one connection to the engine.
    async fn connect(&self) -> std::io::Result<BoxedStream>;
}

/// Connects to a Unix domain socket at a fixed path.
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    /// Create a connector for the socket at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Socket path this connector dials.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Connector for UnixConnector {
    async fn connect(&self) -> std::io::Result<BoxedStream> {
        let stream = UnixStream::connect(&self.path).await?;
        Ok(Box::new(stream))
    }
}
