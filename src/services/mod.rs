//! Core services for the hybrid search pipeline.

mod chunk;
mod hybrid;
mod scan;
mod search;
mod stream;

pub use hybrid::{HybridDecision, HybridService, MAX_ATTEMPTS};
pub use scan::{ScanConfig, ScanOptions, ScanService};
pub use search::SearchService;
pub use stream::{MatchSink, OnMatch};
