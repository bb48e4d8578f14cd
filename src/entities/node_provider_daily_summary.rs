//! SeaORM Entity for node provider daily aggregates
//!
//! Rows are always re-derived from `node_reward_metrics` for their
//! `(node_provider_id, day_utc)` key, never incrementally maintained.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "node_provider_daily_summary")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub node_provider_id: String,
    pub day_utc: Date,
    pub total_nodes: i32,
    pub assigned_nodes: i32,
    pub unassigned_nodes: i32,
    /// Sum of base rewards
    pub expected_rewards_xdr_permyriad: i64,
    /// Sum of adjusted rewards
    pub actual_rewards_xdr_permyriad: i64,
    pub total_reduction_xdr_permyriad: i64,
    pub total_blocks_proposed: i64,
    pub total_blocks_failed: i64,
    pub total_failure_rate: f64,
    pub created_at: Option<DateTime>,
    pub updated_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
