//! Utility functions for display formatting.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{format_expiry, format_optional, format_remaining, format_roles};
