//! Requesting side of the profile exchange.
//!
//! ```text
//! requester                      server
//!     │ ──────── connect ───────► │
//!     │ ◄─────── ProfileList ──── │
//!     │   (caller picks an id)    │
//!     │ ── ContentRequest{id} ──► │
//!     │ ◄────── ProfileContent ── │   or Error{message}
//! ```
//!
//! [`ProfileExchange`] is the step-by-step API; [`fetch_profile`] drives a
//! whole exchange with a [`ProfilePicker`] and a [`ProfileImporter`].

use async_trait::async_trait;
use tokio::io::{ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

use super::protocol::{tag, ProfileContent, ProfileMessage, ProfilePreview};
use crate::command::protocol::ProtocolError;
use crate::socket::{BoxedStream, Connector, FrameError, FrameReader, FrameWriter};

/// Why an exchange ended without a profile.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// The server sent an error envelope.
    #[error("remote error: {0}")]
    Remote(String),

    /// Unknown tag or malformed body.
    #[error("profile protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Stream failed mid-exchange.
    #[error("profile transport error: {0}")]
    Transport(#[from] FrameError),

    /// Could not reach the server.
    #[error("failed to connect to profile server: {0}")]
    Connect(#[source] std::io::Error),

    /// Cancelled by the caller, or the picker declined.
    #[error("profile exchange cancelled")]
    Cancelled,

    /// The importer rejected the received profile.
    #[error("failed to import profile: {0:#}")]
    Import(anyhow::Error),
}

/// Something the server sent that the caller must act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    /// Pick one and call [`ProfileExchange::request_content`].
    List(Vec<ProfilePreview>),
    /// Terminal success.
    Content(ProfileContent),
}

/// Chooses a profile from the server's list.
#[async_trait]
pub trait ProfilePicker: Send {
    /// Return the id to fetch, or `None` to abandon the exchange.
    async fn pick(&mut self, profiles: &[ProfilePreview]) -> Option<i64>;
}

/// Stores a received profile.
#[async_trait]
pub trait ProfileImporter: Send {
    /// Persist `content`.
    async fn import(&mut self, content: &ProfileContent) -> anyhow::Result<()>;
}

/// Picks a fixed id, or the first listed profile when no id is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct PickById(pub Option<i64>);

#[async_trait]
impl ProfilePicker for PickById {
    async fn pick(&mut self, profiles: &[ProfilePreview]) -> Option<i64> {
        match self.0 {
            Some(id) => profiles.iter().find(|p| p.id == id).map(|p| p.id),
            None => profiles.first().map(|p| p.id),
        }
    }
}

/// One open exchange with a profile server.
pub struct ProfileExchange {
    reader: FrameReader<ReadHalf<BoxedStream>>,
    writer: FrameWriter<WriteHalf<BoxedStream>>,
}

impl std::fmt::Debug for ProfileExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileExchange").finish_non_exhaustive()
    }
}

impl ProfileExchange {
    /// Connect through `connector`.
    pub async fn open(connector: &dyn Connector) -> Result<Self, ProfileError> {
        let stream = connector.connect().await.map_err(ProfileError::Connect)?;
        Ok(Self::from_stream(stream))
    }

    /// Run an exchange over an already-connected stream.
    pub fn from_stream(stream: BoxedStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        }
    }

    /// Read until the server sends something the caller must handle.
    pub async fn next_event(&mut self) -> Result<ExchangeEvent, ProfileError> {
        let payload = self.reader.read().await?;
        match ProfileMessage::decode(&payload)? {
            ProfileMessage::Error { message } => Err(ProfileError::Remote(message)),
            ProfileMessage::ProfileList(profiles) => Ok(ExchangeEvent::List(profiles)),
            ProfileMessage::ProfileContent(content) => Ok(ExchangeEvent::Content(content)),
            ProfileMessage::ProfileContentRequest { .. } => Err(ProfileError::Protocol(
                ProtocolError::UnknownTag(tag::PROFILE_CONTENT_REQUEST),
            )),
        }
    }

    /// Ask the server for profile `id`.
    pub async fn request_content(&mut self, id: i64) -> Result<(), ProfileError> {
        let payload = ProfileMessage::ProfileContentRequest { id }.encode()?;
        self.writer.write(&payload).await?;
        Ok(())
    }

    /// Loop until content arrives, consulting `picker` on each list.
    pub async fn run(&mut self, picker: &mut dyn ProfilePicker) -> Result<ProfileContent, ProfileError> {
        loop {
            match self.next_event().await? {
                ExchangeEvent::List(profiles) => {
                    log::debug!("[Profile] server offered {} profiles", profiles.len());
                    let Some(id) = picker.pick(&profiles).await else {
                        return Err(ProfileError::Cancelled);
                    };
                    self.request_content(id).await?;
                }
                ExchangeEvent::Content(content) => return Ok(content),
            }
        }
    }

    /// Shut the stream down.
    pub async fn close(mut self) {
        if let Err(e) = self.writer.close().await {
            log::debug!("[Profile] close failed: {}", e);
        }
    }
}

/// Fetch and import one profile.
///
/// There is no timeout: a silent server keeps the exchange open until
/// `cancel` fires, which closes the stream.
pub async fn fetch_profile(
    connector: &dyn Connector,
    picker: &mut dyn ProfilePicker,
    importer: &mut dyn ProfileImporter,
    cancel: &CancellationToken,
) -> Result<ProfileContent, ProfileError> {
    let mut exchange = tokio::select! {
        _ = cancel.cancelled() => return Err(ProfileError::Cancelled),
        opened = ProfileExchange::open(connector) => opened?,
    };

    let result = tokio::select! {
        _ = cancel.cancelled() => Err(ProfileError::Cancelled),
        result = exchange.run(picker) => result,
    };
    exchange.close().await;

    let content = result?;
    importer
        .import(&content)
        .await
        .map_err(ProfileError::Import)?;
    log::info!("[Profile] imported profile {:?}", content.name);
    Ok(content)
}
