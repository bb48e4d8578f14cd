//! Create-if-absent schema bootstrap for the three rewards tables.
//!
//! Every statement is idempotent, so this runs at the start of each
//! collection cycle instead of through a migration history.

use sea_orm::DatabaseConnection;
use sea_orm_migration::prelude::*;

pub async fn ensure_tables_exist(db: &DatabaseConnection) -> Result<(), DbErr> {
    let manager = SchemaManager::new(db);

    create_node_reward_metrics(&manager).await?;
    create_node_provider_daily_summary(&manager).await?;
    create_xdr_icp_conversion_rates(&manager).await?;

    Ok(())
}

async fn create_node_reward_metrics(manager: &SchemaManager<'_>) -> Result<(), DbErr> {
    manager
        .create_table(
            Table::create()
                .table(NodeRewardMetrics::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(NodeRewardMetrics::Id)
                        .integer()
                        .not_null()
                        .auto_increment()
                        .primary_key(),
                )
                .col(ColumnDef::new(NodeRewardMetrics::NodeId).text().not_null())
                .col(ColumnDef::new(NodeRewardMetrics::NodeProviderId).text().not_null())
                .col(ColumnDef::new(NodeRewardMetrics::DayUtc).date().not_null())
                .col(ColumnDef::new(NodeRewardMetrics::NodeStatus).text().null())
                .col(ColumnDef::new(NodeRewardMetrics::NodeRewardType).text().null())
                .col(ColumnDef::new(NodeRewardMetrics::Region).text().null())
                .col(ColumnDef::new(NodeRewardMetrics::DcId).text().null())
                .col(ColumnDef::new(NodeRewardMetrics::SubnetAssigned).text().null())
                .col(ColumnDef::new(NodeRewardMetrics::PerformanceMultiplier).double().null())
                .col(ColumnDef::new(NodeRewardMetrics::RewardsReduction).double().null())
                .col(ColumnDef::new(NodeRewardMetrics::BaseRewardsXdrPermyriad).big_integer().null())
                .col(
                    ColumnDef::new(NodeRewardMetrics::AdjustedRewardsXdrPermyriad)
                        .big_integer()
                        .null(),
                )
                .col(
                    ColumnDef::new(NodeRewardMetrics::NumBlocksProposed)
                        .integer()
                        .default(0),
                )
                .col(ColumnDef::new(NodeRewardMetrics::NumBlocksFailed).integer().default(0))
                .col(ColumnDef::new(NodeRewardMetrics::DailyFailureRate).double().null())
                .col(ColumnDef::new(NodeRewardMetrics::SubnetAssignedFr).double().null())
                .col(ColumnDef::new(NodeRewardMetrics::OriginalFr).double().null())
                .col(ColumnDef::new(NodeRewardMetrics::RelativeFr).double().null())
                .col(ColumnDef::new(NodeRewardMetrics::ExtrapolatedFr).double().null())
                .col(
                    ColumnDef::new(NodeRewardMetrics::CreatedAt)
                        .timestamp()
                        .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                )
                .col(
                    ColumnDef::new(NodeRewardMetrics::UpdatedAt)
                        .timestamp()
                        .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                )
                .to_owned(),
        )
        .await?;

    // Natural key: one row per node per day
    manager
        .create_index(
            Index::create()
                .if_not_exists()
                .name("idx_node_reward_node_day_unique")
                .table(NodeRewardMetrics::Table)
                .col(NodeRewardMetrics::NodeId)
                .col(NodeRewardMetrics::DayUtc)
                .unique()
                .to_owned(),
        )
        .await?;

    for (name, column) in [
        ("idx_node_reward_node_id", NodeRewardMetrics::NodeId),
        ("idx_node_reward_provider_id", NodeRewardMetrics::NodeProviderId),
        ("idx_node_reward_day", NodeRewardMetrics::DayUtc),
        ("idx_node_reward_status", NodeRewardMetrics::NodeStatus),
    ] {
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name(name)
                    .table(NodeRewardMetrics::Table)
                    .col(column)
                    .to_owned(),
            )
            .await?;
    }

    manager
        .create_index(
            Index::create()
                .if_not_exists()
                .name("idx_node_reward_provider_day")
                .table(NodeRewardMetrics::Table)
                .col(NodeRewardMetrics::NodeProviderId)
                .col(NodeRewardMetrics::DayUtc)
                .to_owned(),
        )
        .await?;

    Ok(())
}

async fn create_node_provider_daily_summary(manager: &SchemaManager<'_>) -> Result<(), DbErr> {
    manager
        .create_table(
            Table::create()
                .table(NodeProviderDailySummary::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(NodeProviderDailySummary::Id)
                        .integer()
                        .not_null()
                        .auto_increment()
                        .primary_key(),
                )
                .col(ColumnDef::new(NodeProviderDailySummary::NodeProviderId).text().not_null())
                .col(ColumnDef::new(NodeProviderDailySummary::DayUtc).date().not_null())
                .col(ColumnDef::new(NodeProviderDailySummary::TotalNodes).integer().not_null())
                .col(ColumnDef::new(NodeProviderDailySummary::AssignedNodes).integer().not_null())
                .col(ColumnDef::new(NodeProviderDailySummary::UnassignedNodes).integer().not_null())
                .col(
                    ColumnDef::new(NodeProviderDailySummary::ExpectedRewardsXdrPermyriad)
                        .big_integer()
                        .not_null(),
                )
                .col(
                    ColumnDef::new(NodeProviderDailySummary::ActualRewardsXdrPermyriad)
                        .big_integer()
                        .not_null(),
                )
                .col(
                    ColumnDef::new(NodeProviderDailySummary::TotalReductionXdrPermyriad)
                        .big_integer()
                        .not_null(),
                )
                .col(
                    ColumnDef::new(NodeProviderDailySummary::TotalBlocksProposed)
                        .big_integer()
                        .not_null(),
                )
                .col(
                    ColumnDef::new(NodeProviderDailySummary::TotalBlocksFailed)
                        .big_integer()
                        .not_null(),
                )
                .col(ColumnDef::new(NodeProviderDailySummary::TotalFailureRate).double().not_null())
                .col(
                    ColumnDef::new(NodeProviderDailySummary::CreatedAt)
                        .timestamp()
                        .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                )
                .col(
                    ColumnDef::new(NodeProviderDailySummary::UpdatedAt)
                        .timestamp()
                        .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                )
                .to_owned(),
        )
        .await?;

    manager
        .create_index(
            Index::create()
                .if_not_exists()
                .name("idx_provider_summary_provider_day_unique")
                .table(NodeProviderDailySummary::Table)
                .col(NodeProviderDailySummary::NodeProviderId)
                .col(NodeProviderDailySummary::DayUtc)
                .unique()
                .to_owned(),
        )
        .await?;

    for (name, column) in [
        ("idx_provider_summary_provider_id", NodeProviderDailySummary::NodeProviderId),
        ("idx_provider_summary_day", NodeProviderDailySummary::DayUtc),
    ] {
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name(name)
                    .table(NodeProviderDailySummary::Table)
                    .col(column)
                    .to_owned(),
            )
            .await?;
    }

    Ok(())
}

async fn create_xdr_icp_conversion_rates(manager: &SchemaManager<'_>) -> Result<(), DbErr> {
    manager
        .create_table(
            Table::create()
                .table(XdrIcpConversionRates::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(XdrIcpConversionRates::Id)
                        .integer()
                        .not_null()
                        .auto_increment()
                        .primary_key(),
                )
                .col(
                    ColumnDef::new(XdrIcpConversionRates::DayUtc)
                        .date()
                        .not_null()
                        .unique_key(),
                )
                .col(ColumnDef::new(XdrIcpConversionRates::XdrToUsd).double().not_null())
                .col(ColumnDef::new(XdrIcpConversionRates::IcpToUsd).double().not_null())
                .col(ColumnDef::new(XdrIcpConversionRates::XdrToIcp).double().not_null())
                .col(ColumnDef::new(XdrIcpConversionRates::Source).text().not_null())
                .col(
                    ColumnDef::new(XdrIcpConversionRates::CreatedAt)
                        .timestamp()
                        .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                )
                .col(
                    ColumnDef::new(XdrIcpConversionRates::UpdatedAt)
                        .timestamp()
                        .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                )
                .to_owned(),
        )
        .await?;

    Ok(())
}

#[derive(DeriveIden, Clone, Copy)]
enum NodeRewardMetrics {
    Table,
    Id,
    NodeId,
    NodeProviderId,
    DayUtc,
    NodeStatus,
    NodeRewardType,
    Region,
    DcId,
    SubnetAssigned,
    PerformanceMultiplier,
    RewardsReduction,
    BaseRewardsXdrPermyriad,
    AdjustedRewardsXdrPermyriad,
    NumBlocksProposed,
    NumBlocksFailed,
    DailyFailureRate,
    SubnetAssignedFr,
    OriginalFr,
    RelativeFr,
    ExtrapolatedFr,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum NodeProviderDailySummary {
    Table,
    Id,
    NodeProviderId,
    DayUtc,
    TotalNodes,
    AssignedNodes,
    UnassignedNodes,
    ExpectedRewardsXdrPermyriad,
    ActualRewardsXdrPermyriad,
    TotalReductionXdrPermyriad,
    TotalBlocksProposed,
    TotalBlocksFailed,
    TotalFailureRate,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum XdrIcpConversionRates {
    Table,
    Id,
    DayUtc,
    XdrToUsd,
    IcpToUsd,
    XdrToIcp,
    Source,
    CreatedAt,
    UpdatedAt,
}
