use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One node's reward metrics for one day, as produced by the DRE tool.
///
/// `day_utc` is `None` when the source date could not be parsed. Such records
/// cannot be persisted since the day is part of the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetricRecord {
    pub node_id: String,
    pub day_utc: Option<NaiveDate>,
    pub node_status: String,
    pub node_reward_type: String,
    pub region: String,
    pub dc_id: String,
    pub performance_multiplier: f64,
    pub rewards_reduction: f64,
    pub base_rewards_xdr_permyriad: i64,
    pub adjusted_rewards_xdr_permyriad: i64,
    pub subnet_assigned: Option<String>,
    pub num_blocks_proposed: i32,
    pub num_blocks_failed: i32,
    pub daily_failure_rate: f64,
    pub subnet_assigned_fr: Option<f64>,
    pub original_fr: Option<f64>,
    pub relative_fr: Option<f64>,
    pub extrapolated_fr: Option<f64>,
}

/// Percentage of failed blocks among all blocks, 0 when there were none.
pub fn failure_rate(proposed: i64, failed: i64) -> f64 {
    let total = proposed + failed;
    if total > 0 {
        failed as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}
