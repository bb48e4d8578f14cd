pub use super::node_provider_daily_summary::Entity as NodeProviderDailySummary;
pub use super::node_reward_metrics::Entity as NodeRewardMetrics;
pub use super::xdr_icp_conversion_rates::Entity as XdrIcpConversionRates;
