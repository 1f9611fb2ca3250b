//! Multiplexed Chrome DevTools Protocol client.
//!
//! One WebSocket carries browser-level commands and many attached target
//! sessions (tabs, out-of-process iframes). This crate provides:
//!
//! - **`codec`**: CDP JSON frame encoding/parsing and request/response
//!   correlation (the pending-command table).
//! - **`transport`**: the single long-lived WebSocket connection.
//! - **`registry`**: the routing table mapping frames to targets to
//!   sessions, with lifecycle cascades.
//! - **`client`**: command dispatch (browser-level vs session-scoped),
//!   automatic domain enabling, and bounded session recovery.
//! - **`input`**: per-session action primitives (click, type, key, select,
//!   scroll, screenshot, navigate, highlight).
//! - **`collector`**: the concurrent DOM/DOMSnapshot/AX/metrics gather.
//!
//! All CDP payloads travel as `serde_json::Value`; typed models live in
//! `periscope-types`.

pub mod client;
pub mod codec;
pub mod collector;
pub mod input;
pub mod keys;
pub mod registry;
pub mod transport;

pub use client::CdpClient;
pub use codec::{CdpEvent, CdpResponse, WireMessage};
pub use collector::collect_raw_snapshot;
pub use input::{ScrollDirection, SelectBy};
pub use registry::{FrameInfo, SessionInfo, SessionRegistry, TargetInfo, TargetKind};
