//! Shared data model, configuration, and error taxonomy for periscope.
//!
//! This crate carries no I/O. The CDP layer, the merger, and the facade all
//! speak these types; keeping them here avoids dependency cycles between
//! the wire and analysis crates.

pub mod config;
pub mod error;
pub mod model;
pub mod snapshot;

pub use config::{default_user_data_dir, BrowserConfig, ScreenshotFormat};
pub use error::{CdpError, ErrorKind};
pub use model::{
    ActionResult, ActionType, BrowserState, EnhancedNode, Point, Rect, SelectorEntry, SelectorMap,
    Viewport,
};
pub use snapshot::{RawSnapshot, COMPUTED_STYLE_PROPS};
