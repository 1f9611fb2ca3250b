//! Multi-source element analysis: the merger that correlates DOM, layout
//! snapshot, and accessibility data into ranked interactive elements, and
//! the serializer that renders them for LLM consumption.
//!
//! Both passes are pure functions -- no I/O, no shared state, deterministic
//! output for a given input.

pub mod merger;
pub mod serializer;

pub use merger::{merge, MergeOptions};
pub use serializer::{serialize_dom, SerializeOptions, SerializedDom};
