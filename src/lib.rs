//! boxctl - control-plane client for a local networking engine.
//!
//! The engine runs in the background and exposes a framed socket. This
//! crate keeps a long-lived session to it, turns its telemetry into one
//! observable state for a UI, and sends the user's commands back.
//!
//! # Architecture
//!
//! - **Socket** - length-prefixed framing and the connector seam
//! - **Command** - control-channel session, dispatch and reconciliation
//! - **Profile** - one-shot profile transfer, both client and server
//!
//! # Modules
//!
//! - [`socket`] - framing and stream provisioning
//! - [`command`] - session, log batching, connection view, group selection
//! - [`profile`] - profile exchange
//! - [`config`] - configuration loading/saving
//! - [`constants`] - timing and sizing constants

// Library modules
pub mod command;
pub mod profile;
pub mod socket;

pub mod config;
pub mod constants;

// Re-export commonly used types
pub use command::{ClientState, Session, SessionConfig, SessionError, SessionPhase};
pub use config::Config;
pub use profile::{fetch_profile, ProfileError, ProfileServer};
pub use socket::{Connector, UnixConnector};
