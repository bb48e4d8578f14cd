//! SeaORM Entity for per-node, per-day reward metrics

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "node_reward_metrics")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Natural key together with `day_utc`
    pub node_id: String,
    pub node_provider_id: String,
    pub day_utc: Date,
    pub node_status: Option<String>,
    pub node_reward_type: Option<String>,
    pub region: Option<String>,
    pub dc_id: Option<String>,
    pub subnet_assigned: Option<String>,
    pub performance_multiplier: Option<f64>,
    pub rewards_reduction: Option<f64>,
    pub base_rewards_xdr_permyriad: Option<i64>,
    pub adjusted_rewards_xdr_permyriad: Option<i64>,
    pub num_blocks_proposed: Option<i32>,
    pub num_blocks_failed: Option<i32>,
    /// Percentage in [0, 100]
    pub daily_failure_rate: Option<f64>,
    pub subnet_assigned_fr: Option<f64>,
    pub original_fr: Option<f64>,
    pub relative_fr: Option<f64>,
    pub extrapolated_fr: Option<f64>,
    pub created_at: Option<DateTime>,
    pub updated_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
