//! Utility functions

mod sanitize;

pub use sanitize::{sanitize_dirname, sanitize_filename};
