//! Local library concerns: manifest, scanning, tagging, playlist index

pub mod failures;
pub mod m3u;
pub mod manifest;
pub mod scan;
pub mod tagger;

pub use failures::{FailureRow, write_failure_report};
pub use m3u::write_playlist_index;
pub use manifest::Manifest;
pub use scan::existing_keys;
