pub mod audio;
pub mod chords;
pub mod config;
pub mod db;
pub mod export;
pub mod ingest;
pub mod pipeline;
pub mod separation;
pub mod stems;

/// Application name for XDG paths
pub const APP_NAME: &str = "stemforge";
