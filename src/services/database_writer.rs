//! Database writer
//!
//! Persistence for node metrics, provider daily summaries and conversion
//! rates. Every write is an upsert on the table's natural key and commits on
//! its own.

use chrono::{NaiveDate, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectOptions, Database, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QuerySelect, Set,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::entities::{
    node_provider_daily_summary, node_reward_metrics, prelude::*, xdr_icp_conversion_rates,
};
use crate::models::conversion_rate::ConversionRates;
use crate::models::node_metrics::NodeMetricRecord;
use crate::models::provider_summary::ProviderDaySummary;
use crate::services::schema;

/// Rows per INSERT statement, keeps bind parameters well under driver limits
const UPSERT_CHUNK_SIZE: usize = 500;

pub struct DatabaseWriter {
    db: DatabaseConnection,
}

impl DatabaseWriter {
    /// Connect with bounded connect/acquire timeouts
    pub async fn connect(database_url: &str) -> Result<Self, DbErr> {
        let mut options = ConnectOptions::new(database_url.to_string());
        options
            .max_connections(5)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(30));

        let db = Database::connect(options).await?;
        info!("Connected to database");
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn close(self) -> Result<(), DbErr> {
        self.db.close().await?;
        info!("Database connection closed");
        Ok(())
    }

    pub async fn ensure_tables_exist(&self) -> Result<(), DbErr> {
        schema::ensure_tables_exist(&self.db).await?;
        info!("Database tables verified/created successfully");
        Ok(())
    }

    /// Insert or update node metrics keyed on `(node_id, day_utc)`.
    ///
    /// Records without a day are skipped and not counted. Records repeating a
    /// key within the batch collapse to the last one. On conflict every
    /// mutable column is overwritten, never merged.
    pub async fn upsert_node_metrics(
        &self,
        node_provider_id: &str,
        records: &[NodeMetricRecord],
    ) -> Result<usize, DbErr> {
        let now = Utc::now().naive_utc();

        // One statement cannot touch the same key twice, later records win
        let mut latest: BTreeMap<(&str, NaiveDate), &NodeMetricRecord> = BTreeMap::new();
        for record in records {
            if let Some(day) = record.day_utc {
                if latest.insert((record.node_id.as_str(), day), record).is_some() {
                    debug!(
                        "Duplicate metrics for node {} on {}, keeping the last one",
                        record.node_id, day
                    );
                }
            }
        }

        let models: Vec<node_reward_metrics::ActiveModel> = latest
            .into_iter()
            .map(|((_, day), r)| {
                node_reward_metrics::ActiveModel {
                    node_id: Set(r.node_id.clone()),
                    node_provider_id: Set(node_provider_id.to_string()),
                    day_utc: Set(day),
                    node_status: Set(Some(r.node_status.clone())),
                    node_reward_type: Set(Some(r.node_reward_type.clone())),
                    region: Set(Some(r.region.clone())),
                    dc_id: Set(Some(r.dc_id.clone())),
                    subnet_assigned: Set(r.subnet_assigned.clone()),
                    performance_multiplier: Set(Some(r.performance_multiplier)),
                    rewards_reduction: Set(Some(r.rewards_reduction)),
                    base_rewards_xdr_permyriad: Set(Some(r.base_rewards_xdr_permyriad)),
                    adjusted_rewards_xdr_permyriad: Set(Some(r.adjusted_rewards_xdr_permyriad)),
                    num_blocks_proposed: Set(Some(r.num_blocks_proposed)),
                    num_blocks_failed: Set(Some(r.num_blocks_failed)),
                    daily_failure_rate: Set(Some(r.daily_failure_rate)),
                    subnet_assigned_fr: Set(r.subnet_assigned_fr),
                    original_fr: Set(r.original_fr),
                    relative_fr: Set(r.relative_fr),
                    extrapolated_fr: Set(r.extrapolated_fr),
                    created_at: Set(Some(now)),
                    updated_at: Set(Some(now)),
                    ..Default::default()
                }
            })
            .collect();

        if models.is_empty() {
            warn!("No valid records to insert for provider {}", node_provider_id);
            return Ok(0);
        }

        let written = models.len();

        for chunk in models.chunks(UPSERT_CHUNK_SIZE) {
            NodeRewardMetrics::insert_many(chunk.to_vec())
                .on_conflict(
                    OnConflict::columns([
                        node_reward_metrics::Column::NodeId,
                        node_reward_metrics::Column::DayUtc,
                    ])
                    .update_columns([
                        node_reward_metrics::Column::NodeProviderId,
                        node_reward_metrics::Column::NodeStatus,
                        node_reward_metrics::Column::NodeRewardType,
                        node_reward_metrics::Column::Region,
                        node_reward_metrics::Column::DcId,
                        node_reward_metrics::Column::SubnetAssigned,
                        node_reward_metrics::Column::PerformanceMultiplier,
                        node_reward_metrics::Column::RewardsReduction,
                        node_reward_metrics::Column::BaseRewardsXdrPermyriad,
                        node_reward_metrics::Column::AdjustedRewardsXdrPermyriad,
                        node_reward_metrics::Column::NumBlocksProposed,
                        node_reward_metrics::Column::NumBlocksFailed,
                        node_reward_metrics::Column::DailyFailureRate,
                        node_reward_metrics::Column::SubnetAssignedFr,
                        node_reward_metrics::Column::OriginalFr,
                        node_reward_metrics::Column::RelativeFr,
                        node_reward_metrics::Column::ExtrapolatedFr,
                        node_reward_metrics::Column::UpdatedAt,
                    ])
                    .to_owned(),
                )
                .exec_without_returning(&self.db)
                .await?;
        }

        info!("Upserted {} node metrics for provider {}", written, node_provider_id);
        Ok(written)
    }

    /// Recompute the summary for `(node_provider_id, day_utc)` from the metric
    /// rows currently stored for that key and upsert it.
    ///
    /// Returns `false` when there are no metric rows to summarize.
    pub async fn generate_provider_summary(
        &self,
        node_provider_id: &str,
        day_utc: NaiveDate,
    ) -> Result<bool, DbErr> {
        let rows = NodeRewardMetrics::find()
            .filter(node_reward_metrics::Column::NodeProviderId.eq(node_provider_id))
            .filter(node_reward_metrics::Column::DayUtc.eq(day_utc))
            .all(&self.db)
            .await?;

        let Some(summary) = ProviderDaySummary::from_metrics(node_provider_id, day_utc, &rows)
        else {
            debug!(
                "No metrics stored for provider {} on {}, nothing to summarize",
                node_provider_id, day_utc
            );
            return Ok(false);
        };

        let now = Utc::now().naive_utc();
        let model = node_provider_daily_summary::ActiveModel {
            node_provider_id: Set(summary.node_provider_id),
            day_utc: Set(summary.day_utc),
            total_nodes: Set(summary.total_nodes),
            assigned_nodes: Set(summary.assigned_nodes),
            unassigned_nodes: Set(summary.unassigned_nodes),
            expected_rewards_xdr_permyriad: Set(summary.expected_rewards_xdr_permyriad),
            actual_rewards_xdr_permyriad: Set(summary.actual_rewards_xdr_permyriad),
            total_reduction_xdr_permyriad: Set(summary.total_reduction_xdr_permyriad),
            total_blocks_proposed: Set(summary.total_blocks_proposed),
            total_blocks_failed: Set(summary.total_blocks_failed),
            total_failure_rate: Set(summary.total_failure_rate),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
            ..Default::default()
        };

        NodeProviderDailySummary::insert(model)
            .on_conflict(
                OnConflict::columns([
                    node_provider_daily_summary::Column::NodeProviderId,
                    node_provider_daily_summary::Column::DayUtc,
                ])
                .update_columns([
                    node_provider_daily_summary::Column::TotalNodes,
                    node_provider_daily_summary::Column::AssignedNodes,
                    node_provider_daily_summary::Column::UnassignedNodes,
                    node_provider_daily_summary::Column::ExpectedRewardsXdrPermyriad,
                    node_provider_daily_summary::Column::ActualRewardsXdrPermyriad,
                    node_provider_daily_summary::Column::TotalReductionXdrPermyriad,
                    node_provider_daily_summary::Column::TotalBlocksProposed,
                    node_provider_daily_summary::Column::TotalBlocksFailed,
                    node_provider_daily_summary::Column::TotalFailureRate,
                    node_provider_daily_summary::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        debug!("Generated summary for provider {} on {}", node_provider_id, day_utc);
        Ok(true)
    }

    /// Insert or update the conversion rate for `day_utc`
    pub async fn upsert_conversion_rate(
        &self,
        day_utc: NaiveDate,
        rates: &ConversionRates,
    ) -> Result<(), DbErr> {
        let now = Utc::now().naive_utc();
        let model = xdr_icp_conversion_rates::ActiveModel {
            day_utc: Set(day_utc),
            xdr_to_usd: Set(rates.xdr_to_usd),
            icp_to_usd: Set(rates.icp_to_usd),
            xdr_to_icp: Set(rates.xdr_to_icp),
            source: Set(rates.source.clone()),
            created_at: Set(Some(now)),
            updated_at: Set(Some(now)),
            ..Default::default()
        };

        XdrIcpConversionRates::insert(model)
            .on_conflict(
                OnConflict::column(xdr_icp_conversion_rates::Column::DayUtc)
                    .update_columns([
                        xdr_icp_conversion_rates::Column::XdrToUsd,
                        xdr_icp_conversion_rates::Column::IcpToUsd,
                        xdr_icp_conversion_rates::Column::XdrToIcp,
                        xdr_icp_conversion_rates::Column::Source,
                        xdr_icp_conversion_rates::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        info!("Upserted conversion rate for {}", day_utc);
        Ok(())
    }

    /// Latest day present in `node_reward_metrics`, if any
    pub async fn get_latest_data_date(&self) -> Result<Option<NaiveDate>, DbErr> {
        let latest: Option<Option<NaiveDate>> = NodeRewardMetrics::find()
            .select_only()
            .column_as(Expr::col(node_reward_metrics::Column::DayUtc).max(), "latest")
            .into_tuple()
            .one(&self.db)
            .await?;

        Ok(latest.flatten())
    }
}
