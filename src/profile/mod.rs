//! One-shot profile transfer between two endpoints.
//!
//! A server offers a list of stored profiles; a requester picks one and
//! receives the full document. Framing is shared with the control channel.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{
    fetch_profile, ExchangeEvent, PickById, ProfileError, ProfileExchange, ProfileImporter,
    ProfilePicker,
};
pub use protocol::{ProfileContent, ProfileKind, ProfileMessage, ProfilePreview};
pub use server::{serve_connection, DirectoryProfileSource, ProfileServer, ProfileSource};
