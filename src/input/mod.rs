//! Playlist CSV input handling

pub mod csv;
pub mod job;

pub use csv::{TrackRow, read_rows};
pub use job::{TrackJob, rows_to_jobs};
