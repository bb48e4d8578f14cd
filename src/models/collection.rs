use serde::Serialize;
use std::path::PathBuf;

/// Counters for one collection cycle
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub providers_processed: usize,
    pub providers_failed: usize,
    pub node_metrics: usize,
    pub summaries_generated: usize,
    /// DRE output directory the cycle loaded
    pub output_path: PathBuf,
}
