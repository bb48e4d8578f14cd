pub mod collection;
pub mod conversion_rate;
pub mod node_metrics;
pub mod provider_summary;
