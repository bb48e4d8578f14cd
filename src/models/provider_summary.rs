use chrono::NaiveDate;
use serde::Serialize;

use super::node_metrics::failure_rate;
use crate::entities::node_reward_metrics;

pub const STATUS_ASSIGNED: &str = "Assigned";
pub const STATUS_UNASSIGNED: &str = "Unassigned";

/// Aggregate of all metric rows sharing one `(provider, day)` key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderDaySummary {
    pub node_provider_id: String,
    pub day_utc: NaiveDate,
    pub total_nodes: i32,
    pub assigned_nodes: i32,
    pub unassigned_nodes: i32,
    pub expected_rewards_xdr_permyriad: i64,
    pub actual_rewards_xdr_permyriad: i64,
    pub total_reduction_xdr_permyriad: i64,
    pub total_blocks_proposed: i64,
    pub total_blocks_failed: i64,
    pub total_failure_rate: f64,
}

impl ProviderDaySummary {
    /// Derive the summary for `(node_provider_id, day_utc)` from stored metric rows.
    ///
    /// Rows belonging to other keys are ignored. Returns `None` when no row
    /// matches, in which case there is nothing to summarize.
    pub fn from_metrics(
        node_provider_id: &str,
        day_utc: NaiveDate,
        rows: &[node_reward_metrics::Model],
    ) -> Option<Self> {
        let mut summary = Self {
            node_provider_id: node_provider_id.to_string(),
            day_utc,
            total_nodes: 0,
            assigned_nodes: 0,
            unassigned_nodes: 0,
            expected_rewards_xdr_permyriad: 0,
            actual_rewards_xdr_permyriad: 0,
            total_reduction_xdr_permyriad: 0,
            total_blocks_proposed: 0,
            total_blocks_failed: 0,
            total_failure_rate: 0.0,
        };

        for row in rows
            .iter()
            .filter(|r| r.node_provider_id == node_provider_id && r.day_utc == day_utc)
        {
            summary.total_nodes += 1;
            match row.node_status.as_deref() {
                Some(STATUS_ASSIGNED) => summary.assigned_nodes += 1,
                Some(STATUS_UNASSIGNED) => summary.unassigned_nodes += 1,
                _ => {}
            }
            summary.expected_rewards_xdr_permyriad += row.base_rewards_xdr_permyriad.unwrap_or(0);
            summary.actual_rewards_xdr_permyriad += row.adjusted_rewards_xdr_permyriad.unwrap_or(0);
            summary.total_blocks_proposed += i64::from(row.num_blocks_proposed.unwrap_or(0));
            summary.total_blocks_failed += i64::from(row.num_blocks_failed.unwrap_or(0));
        }

        if summary.total_nodes == 0 {
            return None;
        }

        summary.total_reduction_xdr_permyriad =
            summary.expected_rewards_xdr_permyriad - summary.actual_rewards_xdr_permyriad;
        summary.total_failure_rate =
            failure_rate(summary.total_blocks_proposed, summary.total_blocks_failed);

        Some(summary)
    }
}
