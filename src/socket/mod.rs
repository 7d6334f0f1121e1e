//! Framed transport over the engine's local stream.
//!
//! Both the control channel and the profile exchange run over the same
//! framing. This module is the only place that touches raw bytes.
//!
//! # Architecture
//!
//! ```text
//! Client Process                          Engine
//! ┌──────────────────┐                ┌──────────────────┐
//! │ Session          │                │ command server   │
//! │  FrameWriter ────┼──── frames ───►│                  │
//! │  FrameReader ◄───┼────────────────┼─ pushes          │
//! └──────────────────┘  Unix socket   └──────────────────┘
//! ```
//!
//! # Wire Protocol
//!
//! Length-prefixed frames: `[u16 BE length][payload]`
//!
//! See [`framing`] for the codec and [`connector`] for opening streams.

pub mod connector;
pub mod framing;

pub use connector::{BoxedStream, Connector, EngineStream, UnixConnector};
pub use framing::{encode_frame, decode_frame, FrameError, FrameReader, FrameWriter, MAX_PAYLOAD_SIZE};
