#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use rewards_collector::entities::{node_provider_daily_summary, node_reward_metrics, prelude::*};
use rewards_collector::services::database_writer::DatabaseWriter;
use rewards_collector::services::dre_runner::{DreError, DreOutput, RewardsGenerator};
use rewards_collector::services::price_service::{
    Clock, FixedXdrRate, IcpPriceSource, PriceError, PriceService,
};
use sea_orm::{DatabaseConnection, DbErr, EntityTrait, QueryOrder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

pub const METRICS_HEADER: &str = "node_id,day_utc,node_status,node_reward_type,region,dc_id,performance_multiplier,rewards_reduction,base_rewards_xdr_permyriad,adjusted_rewards_xdr_permyriad,subnet_assigned,num_blocks_proposed,num_blocks_failed";

/// Throwaway SQLite database file, removed with the returned directory
pub struct TestDb {
    pub dir: TempDir,
    pub url: String,
}

pub fn test_db() -> TestDb {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("rewards.db").display());
    TestDb { dir, url }
}

/// Set up a writer on a fresh database with the schema in place
pub async fn setup_test_db(db: &TestDb) -> Result<DatabaseWriter, DbErr> {
    let writer = DatabaseWriter::connect(&db.url).await?;
    writer.ensure_tables_exist().await?;
    Ok(writer)
}

/// Every stored metric row in id order, with `updated_at` blanked
pub async fn metric_snapshot(db: &DatabaseConnection) -> Vec<node_reward_metrics::Model> {
    NodeRewardMetrics::find()
        .order_by_asc(node_reward_metrics::Column::Id)
        .all(db)
        .await
        .expect("Failed to read metrics")
        .into_iter()
        .map(|row| node_reward_metrics::Model { updated_at: None, ..row })
        .collect()
}

/// Every stored summary row in id order, with `updated_at` blanked
pub async fn summary_snapshot(db: &DatabaseConnection) -> Vec<node_provider_daily_summary::Model> {
    NodeProviderDailySummary::find()
        .order_by_asc(node_provider_daily_summary::Column::Id)
        .all(db)
        .await
        .expect("Failed to read summaries")
        .into_iter()
        .map(|row| node_provider_daily_summary::Model { updated_at: None, ..row })
        .collect()
}

pub fn day(d: u32, m: u32, y: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Write `<root>/<provider>/node_metrics_by_node.csv` with the given data rows
pub fn write_provider_csv(root: &Path, provider: &str, rows: &[&str]) -> PathBuf {
    let dir = root.join(provider);
    std::fs::create_dir_all(&dir).expect("Failed to create provider dir");
    let path = dir.join("node_metrics_by_node.csv");

    let mut body = String::from(METRICS_HEADER);
    for row in rows {
        body.push('\n');
        body.push_str(row);
    }
    body.push('\n');

    std::fs::write(&path, body).expect("Failed to write csv");
    path
}

/// Stands in for the DRE tool by copying a prepared fixture tree into a fresh
/// output directory on each run
pub struct FixtureGenerator {
    fixture: PathBuf,
    output_base: PathBuf,
    pub runs: AtomicUsize,
}

impl FixtureGenerator {
    pub fn new(fixture: &Path, output_base: &Path) -> Self {
        Self {
            fixture: fixture.to_path_buf(),
            output_base: output_base.to_path_buf(),
            runs: AtomicUsize::new(0),
        }
    }
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[async_trait]
impl RewardsGenerator for FixtureGenerator {
    async fn verify(&self) -> bool {
        true
    }

    async fn run(&self) -> Result<DreOutput, DreError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        let output_path = self.output_base.join(format!("rewards_{}", run));
        copy_tree(&self.fixture, &output_path)?;

        Ok(DreOutput {
            output_path,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

pub struct StaticIcpPrice(pub f64);

#[async_trait]
impl IcpPriceSource for StaticIcpPrice {
    async fn current_usd(&self) -> Result<f64, PriceError> {
        Ok(self.0)
    }

    async fn historical_usd(&self, _day: NaiveDate) -> Result<f64, PriceError> {
        Ok(self.0)
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

pub fn test_prices(today: NaiveDate, icp_usd: f64) -> PriceService {
    PriceService::new(
        Arc::new(FixedXdrRate::default()),
        Arc::new(StaticIcpPrice(icp_usd)),
        Arc::new(FixedClock(today)),
    )
}
