//! Utils module - Utility functions and helpers

pub mod ids;
pub mod logging;
pub mod text;

pub use ids::{prefixed_id, unix_millis};
pub use text::preview;
