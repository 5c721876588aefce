//! Utility functions for evaluating and exercising the separator.
//!
//! # Modules
//!
//! - [`comparison`] - Separation quality and similarity utilities
//! - [`generation`] - Synthetic mixture generation utilities

pub mod comparison;
pub mod generation;

// Re-export common utilities
pub use comparison::*;
pub use generation::*;
