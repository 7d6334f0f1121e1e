//! Control channel to the running engine.
//!
//! The engine streams telemetry (status, logs, group topology, mode,
//! connections) as typed pushes over a framed socket, and accepts a small set
//! of commands back. This module turns that stream into a single observable
//! [`ClientState`]:
//!
//! - [`session`] owns the connection, the bounded retry loop and dispatch
//! - [`protocol`] is the tag + JSON envelope catalogue
//! - [`logs`] debounces log pushes into batches
//! - [`connections`] filters and sorts the connections snapshot
//! - [`groups`] overlays optimistic selections on group snapshots
//! - [`state`] is the observable state and its single writer

pub mod connections;
pub mod groups;
pub mod history;
pub mod logs;
pub mod protocol;
pub mod session;
pub mod state;
pub mod types;

pub use connections::{ConnectionView, Projection, SortKey, StateFilter};
pub use groups::SelectionTracker;
pub use history::SampleRing;
pub use logs::LogBatcher;
pub use protocol::{ProtocolError, Push, Request};
pub use session::{Session, SessionConfig, SessionError, SessionPhase};
pub use state::ClientState;
pub use types::{
    ConnectionRecord, Group, GroupItem, LogLevel, LogLine, StatusSnapshot, Subscription,
};
