//! Profile-exchange envelopes.
//!
//! Same framing as the control channel, different catalogue:
//!
//! - `0x00` Error: `{"message": ".."}`
//! - `0x01` ProfileList: `[ProfilePreview]`
//! - `0x02` ProfileContentRequest: `{"id": n}`
//! - `0x03` ProfileContent: [`ProfileContent`]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::protocol::{decode_body, encode_body, ProtocolError};

/// Profile-exchange tag constants.
pub mod tag {
    /// Peer-reported failure.
    pub const ERROR: u8 = 0x00;
    /// Server's list of available profiles.
    pub const PROFILE_LIST: u8 = 0x01;
    /// Requester asks for one profile by id.
    pub const PROFILE_CONTENT_REQUEST: u8 = 0x02;
    /// Full profile document.
    pub const PROFILE_CONTENT: u8 = 0x03;
}

/// Where a profile's configuration comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// Stored on the serving device.
    #[default]
    Local,
    /// Fetched from a remote URL and refreshed periodically.
    Remote,
}

/// One entry of a profile list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePreview {
    /// Server-assigned id, used in the content request.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Profile origin.
    #[serde(rename = "type")]
    pub kind: ProfileKind,
}

/// A complete profile as transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileContent {
    /// Display name.
    pub name: String,
    /// Profile origin.
    #[serde(rename = "type")]
    pub kind: ProfileKind,
    /// The configuration document itself.
    pub config: String,
    /// Source URL for remote profiles; empty otherwise.
    #[serde(default)]
    pub remote_path: String,
    /// Whether the receiving side should keep a remote profile refreshed.
    #[serde(default)]
    pub auto_update: bool,
    /// Refresh interval in minutes for remote profiles.
    #[serde(default)]
    pub auto_update_interval: u32,
    /// Last successful refresh of a remote profile.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Profile-exchange message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileMessage {
    /// The peer failed; the exchange ends.
    Error {
        /// Human-readable reason.
        message: String,
    },
    /// Profiles the server can hand out.
    ProfileList(Vec<ProfilePreview>),
    /// Ask for one profile.
    ProfileContentRequest {
        /// Id from a previous list.
        id: i64,
    },
    /// The requested profile.
    ProfileContent(ProfileContent),
}

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Serialize, Deserialize)]
struct IdBody {
    id: i64,
}

impl ProfileMessage {
    /// Wire tag for this message.
    pub fn tag(&self) -> u8 {
        match self {
            ProfileMessage::Error { .. } => tag::ERROR,
            ProfileMessage::ProfileList(_) => tag::PROFILE_LIST,
            ProfileMessage::ProfileContentRequest { .. } => tag::PROFILE_CONTENT_REQUEST,
            ProfileMessage::ProfileContent(_) => tag::PROFILE_CONTENT,
        }
    }

    /// Encode into a frame payload.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            ProfileMessage::Error { message } => encode_body(
                self.tag(),
                "error",
                &ErrorBody {
                    message: message.clone(),
                },
            ),
            ProfileMessage::ProfileList(profiles) => encode_body(self.tag(), "profile list", profiles),
            ProfileMessage::ProfileContentRequest { id } => {
                encode_body(self.tag(), "profile content request", &IdBody { id: *id })
            }
            ProfileMessage::ProfileContent(content) => {
                encode_body(self.tag(), "profile content", content)
            }
        }
    }

    /// Decode a frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (&tag, body) = payload.split_first().ok_or(ProtocolError::Empty)?;
        match tag {
            tag::ERROR => {
                let body: ErrorBody = decode_body("error", body)?;
                Ok(ProfileMessage::Error {
                    message: body.message,
                })
            }
            tag::PROFILE_LIST => Ok(ProfileMessage::ProfileList(decode_body("profile list", body)?)),
            tag::PROFILE_CONTENT_REQUEST => {
                let body: IdBody = decode_body("profile content request", body)?;
                Ok(ProfileMessage::ProfileContentRequest { id: body.id })
            }
            tag::PROFILE_CONTENT => Ok(ProfileMessage::ProfileContent(decode_body(
                "profile content",
                body,
            )?)),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}
