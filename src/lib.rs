//! Periscope: indexed browser perception and actions over the Chrome
//! DevTools Protocol.
//!
//! Drives a headless-capable Chromium-family browser through CDP and, for
//! each page state, produces a compact indexed inventory of actionable
//! elements suitable for a language model, together with primitives that
//! act on those elements by index.
//!
//! # Architecture
//!
//! - [`periscope_cdp`]: the multiplexed CDP client -- wire codec, one
//!   WebSocket transport, the frame/target/session registry, command
//!   dispatch with bounded session recovery, and per-session input
//!   primitives.
//! - [`periscope_dom`]: the pure analysis layer -- the three-source merger
//!   (DOM + layout snapshot + accessibility tree, correlated by backend
//!   node id) and the LLM-facing serializer.
//! - This crate: the [`Browser`] facade tying observation and action
//!   together, plus Chrome discovery and scoped launch.
//!
//! # Example (conceptual)
//!
//! ```ignore
//! use periscope::{Browser, BrowserConfig};
//!
//! let mut browser = Browser::new(BrowserConfig::default());
//! browser.start().await?;
//! browser.navigate("https://example.com").await;
//! let state = browser.get_state(true).await?;
//! println!("{}", state.to_prompt());
//! let result = browser.click(1).await;
//! browser.stop().await;
//! ```

pub mod browser;
pub mod launcher;

pub use browser::Browser;
pub use launcher::LaunchError;

// Re-export the shared model so downstream users need only this crate.
pub use periscope_types::{
    ActionResult, ActionType, BrowserConfig, BrowserState, CdpError, EnhancedNode, ErrorKind,
    ScreenshotFormat, SelectorEntry, SelectorMap, Viewport,
};
