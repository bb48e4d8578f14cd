//! Rewards Collection Job
//!
//! One collection cycle runs the DRE tool, loads every provider's node metrics
//! into the database, refreshes provider daily summaries and stores today's
//! XDR/ICP conversion rate. Daemon mode repeats the cycle on a fixed interval
//! until a termination signal arrives.

use chrono::NaiveDate;
use sea_orm::DbErr;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::jobs::shutdown::ShutdownSignal;
use crate::models::collection::CollectionStats;
use crate::services::csv_parser::{CsvParser, NODE_METRICS_FILE};
use crate::services::database_writer::DatabaseWriter;
use crate::services::dre_runner::{DreError, RewardsGenerator};
use crate::services::price_service::PriceService;

/// Delay before retrying after a failed cycle
pub const FAILURE_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Delay before retrying after a cycle panicked
pub const PANIC_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Longest uninterrupted sleep between shutdown checks
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("DRE tool is not available")]
    ToolUnavailable,

    #[error("DRE execution failed: {0}")]
    Tool(#[from] DreError),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Failed to list node provider directories: {0}")]
    Discovery(#[source] std::io::Error),

    #[error("No node provider directories found in {}", .0.display())]
    NoProviders(PathBuf),
}

#[derive(Debug, Error)]
enum ProviderError {
    #[error("metrics file not found at {}", .0.display())]
    MissingFile(PathBuf),

    #[error("no records found in {}", .0.display())]
    NoRecords(PathBuf),

    #[error("parser task failed: {0}")]
    Parse(#[from] JoinError),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// What the daemon does after a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    Failed,
    Panicked,
}

impl CycleOutcome {
    pub fn next_delay(self, interval: Duration) -> Duration {
        match self {
            CycleOutcome::Completed => interval,
            CycleOutcome::Failed => FAILURE_RETRY_DELAY,
            CycleOutcome::Panicked => PANIC_RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectionSettings {
    pub database_url: String,
    /// Remove the DRE output tree once it has been loaded
    pub cleanup_output: bool,
}

pub struct RewardsCollectionService {
    settings: CollectionSettings,
    generator: Arc<dyn RewardsGenerator>,
    prices: PriceService,
    parser: CsvParser,
    shutdown: ShutdownSignal,
}

impl RewardsCollectionService {
    pub fn new(
        settings: CollectionSettings,
        generator: Arc<dyn RewardsGenerator>,
        prices: PriceService,
    ) -> Self {
        Self {
            settings,
            generator,
            prices,
            parser: CsvParser::new(),
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_shutdown_signal(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Run one complete collection cycle
    pub async fn run_collection_cycle(&self) -> Result<CollectionStats, CollectionError> {
        info!("Starting rewards collection cycle");

        debug!("Verifying DRE tool");
        if !self.generator.verify().await {
            error!("DRE tool not available");
            return Err(CollectionError::ToolUnavailable);
        }

        info!("Running DRE to generate rewards data");
        let output = self.generator.run().await?;
        info!(output_path = %output.output_path.display(), "DRE output generated");

        let writer = DatabaseWriter::connect(&self.settings.database_url).await?;
        let result = self.load_output(&writer, &output.output_path).await;

        if let Err(e) = writer.close().await {
            warn!("Failed to close database connection: {}", e);
        }

        let stats = result?;
        info!(
            providers_processed = stats.providers_processed,
            providers_failed = stats.providers_failed,
            node_metrics = stats.node_metrics,
            summaries_generated = stats.summaries_generated,
            "Collection cycle completed successfully"
        );

        Ok(stats)
    }

    async fn load_output(
        &self,
        writer: &DatabaseWriter,
        output_path: &Path,
    ) -> Result<CollectionStats, CollectionError> {
        writer.ensure_tables_exist().await?;

        match writer.get_latest_data_date().await {
            Ok(Some(latest)) => info!("Latest existing data: {}", latest),
            Ok(None) => info!("No existing data in database"),
            Err(e) => warn!("Failed to read latest data date: {}", e),
        }

        let providers = self
            .parser
            .discover_providers(output_path)
            .map_err(CollectionError::Discovery)?;

        if providers.is_empty() {
            error!("No node provider directories found");
            return Err(CollectionError::NoProviders(output_path.to_path_buf()));
        }

        info!("Found {} node providers", providers.len());

        let mut stats = CollectionStats {
            output_path: output_path.to_path_buf(),
            ..Default::default()
        };

        for provider in &providers {
            info!(provider = %provider, "Processing provider");

            match self.load_provider(writer, output_path, provider).await {
                Ok((node_metrics, summaries)) => {
                    stats.providers_processed += 1;
                    stats.node_metrics += node_metrics;
                    stats.summaries_generated += summaries;
                }
                Err(e @ (ProviderError::MissingFile(_) | ProviderError::NoRecords(_))) => {
                    warn!(provider = %provider, "Skipping provider: {}", e);
                    stats.providers_failed += 1;
                }
                Err(e) => {
                    error!(provider = %provider, "Failed to process provider: {}", e);
                    stats.providers_failed += 1;
                }
            }
        }

        self.store_todays_rate(writer).await;

        if self.settings.cleanup_output {
            cleanup_output(output_path).await;
        }

        Ok(stats)
    }

    /// Returns `(node metrics written, summaries generated)`
    async fn load_provider(
        &self,
        writer: &DatabaseWriter,
        output_path: &Path,
        provider: &str,
    ) -> Result<(usize, usize), ProviderError> {
        let csv_path = output_path.join(provider).join(NODE_METRICS_FILE);
        if !csv_path.exists() {
            return Err(ProviderError::MissingFile(csv_path));
        }

        let parser = self.parser.clone();
        let path = csv_path.clone();
        let records = tokio::task::spawn_blocking(move || {
            parser.parse_node_metrics(&path).collect::<Vec<_>>()
        })
        .await?;

        if records.is_empty() {
            return Err(ProviderError::NoRecords(csv_path));
        }
        info!(provider = %provider, "Parsed {} records", records.len());

        let written = writer.upsert_node_metrics(provider, &records).await?;

        let days: BTreeSet<NaiveDate> = records.iter().filter_map(|r| r.day_utc).collect();
        let mut summaries = 0;
        for day in &days {
            if writer.generate_provider_summary(provider, *day).await? {
                summaries += 1;
            }
        }
        info!(provider = %provider, "Generated {} daily summaries", summaries);

        Ok((written, summaries))
    }

    async fn store_todays_rate(&self, writer: &DatabaseWriter) {
        info!("Fetching conversion rates");
        let today = self.prices.today();

        let rates = match self.prices.get_xdr_to_icp_rate(Some(today)).await {
            Ok(rates) => rates,
            Err(e) => {
                error!("Failed to fetch conversion rates: {}", e);
                return;
            }
        };

        match writer.upsert_conversion_rate(today, &rates).await {
            Ok(()) => info!("XDR to ICP rate: {:.6}", rates.xdr_to_icp),
            Err(e) => error!("Failed to store conversion rates: {}", e),
        }
    }

    /// Run a single collection cycle, reporting success
    pub async fn run_once(&self) -> bool {
        match self.run_collection_cycle().await {
            Ok(_) => true,
            Err(e) => {
                error!("Collection cycle failed: {}", e);
                false
            }
        }
    }

    /// Repeat collection cycles every `interval` until shutdown is triggered
    pub async fn run_daemon(self: Arc<Self>, interval: Duration) {
        info!(
            interval_hours = interval.as_secs() / 3600,
            "Starting rewards collection service in daemon mode"
        );

        while self.shutdown.is_running() {
            let service = Arc::clone(&self);
            let cycle = tokio::spawn(async move { service.run_collection_cycle().await });

            let outcome = match cycle.await {
                Ok(Ok(_)) => CycleOutcome::Completed,
                Ok(Err(e)) => {
                    error!("Collection failed: {}", e);
                    CycleOutcome::Failed
                }
                Err(e) => {
                    error!("Collection cycle aborted: {}", e);
                    CycleOutcome::Panicked
                }
            };

            let delay = outcome.next_delay(interval);
            match outcome {
                CycleOutcome::Completed => {
                    info!("Next collection scheduled in {} hours", delay.as_secs() / 3600)
                }
                CycleOutcome::Failed => warn!("Will retry in {} minutes", delay.as_secs() / 60),
                CycleOutcome::Panicked => {
                    warn!("Waiting {} minutes before retry", delay.as_secs() / 60)
                }
            }

            self.sleep_unless_shutdown(delay).await;
        }

        info!("Service shutdown complete");
    }

    async fn sleep_unless_shutdown(&self, delay: Duration) {
        // None when the delay is past what an Instant can hold
        let deadline = Instant::now().checked_add(delay);

        while self.shutdown.is_running() {
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    (deadline - now).min(SHUTDOWN_POLL_INTERVAL)
                }
                None => SHUTDOWN_POLL_INTERVAL,
            };
            tokio::time::sleep(slice).await;
        }
    }
}

async fn cleanup_output(output_path: &Path) {
    info!("Cleaning up temporary files");
    match tokio::fs::remove_dir_all(output_path).await {
        Ok(()) => info!("Cleaned up: {}", output_path.display()),
        Err(e) => warn!("Failed to cleanup {}: {}", output_path.display(), e),
    }
}
