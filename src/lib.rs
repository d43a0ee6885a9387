//! LyricsFlow: resolve synchronized lyrics for a track by querying several
//! platforms in parallel and picking the best match.

pub mod config;
pub mod lyrics;
