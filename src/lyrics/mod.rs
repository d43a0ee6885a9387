// lyrics/mod.rs - top-level lyrics module re-exporting submodules
pub mod aggregator;
pub mod cache;
pub mod cleaner;
pub mod codec;
pub mod enrich;
pub mod matcher;
pub mod normalize;
pub mod parse;
pub mod providers;
pub mod service;
pub mod similarity;
pub mod types;
pub mod uncensor;

pub use service::{LookupOutcome, LyricsRequest, LyricsService};
pub use types::{LyricsDocument, LyricsError, LyricsQuery, LyricsResponse, SourceId};
