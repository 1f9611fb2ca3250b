//! Error taxonomy for the periscope core.
//!
//! Every fallible path in the CDP client, collector, and facade resolves to
//! one of these variants. Action surfaces never raise them directly -- they
//! are folded into [`ErrorKind`] on the structured action result so an agent
//! loop can react without catching errors.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while driving the browser over CDP.
#[derive(Debug, Error)]
pub enum CdpError {
    /// Cannot reach the browser, or the WebSocket closed unexpectedly.
    #[error("connection error: {reason}")]
    Connection { reason: String },

    /// CDP answered a command with an error object.
    #[error("CDP error {code} on {method}: {message}")]
    Protocol {
        method: String,
        code: i64,
        message: String,
    },

    /// A target session detached and could not be recovered.
    #[error("session lost: {session_id}")]
    SessionLost { session_id: String },

    /// A command or operation exceeded its budget.
    #[error("'{method}' timed out after {duration:?}")]
    Timeout { method: String, duration: Duration },

    /// Selector index missing, or the element vanished between observation
    /// and action.
    #[error("element not found: {what}")]
    NotFound { what: String },

    /// The target element is covered by another element.
    #[error("element [{index}] is occluded")]
    Occluded { index: usize },

    /// The target element is not visible in the viewport.
    #[error("element [{index}] is not visible")]
    NotVisible { index: usize },

    /// Input was rejected: unknown key name, select value not in options.
    #[error("input rejected: {reason}")]
    InputRejected { reason: String },

    /// One of the DOM/Snapshot/AX sources failed; results are degraded.
    #[error("partial data: missing {missing:?}")]
    PartialData { missing: Vec<String> },
}

impl CdpError {
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn input_rejected(reason: impl Into<String>) -> Self {
        Self::InputRejected {
            reason: reason.into(),
        }
    }

    /// Map to the coarse kind reported on action results.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CdpError::Connection { .. } => ErrorKind::Connection,
            CdpError::Protocol { .. } => ErrorKind::Protocol,
            CdpError::SessionLost { .. } => ErrorKind::SessionLost,
            CdpError::Timeout { .. } => ErrorKind::Timeout,
            CdpError::NotFound { .. } => ErrorKind::NotFound,
            CdpError::Occluded { .. } => ErrorKind::Occluded,
            CdpError::NotVisible { .. } => ErrorKind::NotVisible,
            CdpError::InputRejected { .. } => ErrorKind::InputRejected,
            CdpError::PartialData { .. } => ErrorKind::PartialData,
        }
    }
}

/// Coarse error classification carried on [`crate::ActionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Protocol,
    SessionLost,
    Timeout,
    NotFound,
    Occluded,
    NotVisible,
    InputRejected,
    PartialData,
}
