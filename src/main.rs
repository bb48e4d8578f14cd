use clap::Parser;
use rewards_collector::config::Config;
use rewards_collector::jobs::rewards_collection::{CollectionSettings, RewardsCollectionService};
use rewards_collector::jobs::shutdown::ShutdownSignal;
use rewards_collector::services::coingecko::CoinGeckoService;
use rewards_collector::services::dre_runner::DreRunner;
use rewards_collector::services::price_service::{FixedXdrRate, PriceService, SystemClock};
use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound for `--daemon`, one year
const MAX_DAEMON_HOURS: u64 = 24 * 365;

/// Collects node rewards data from the DRE tool into the database
#[derive(Debug, Parser)]
#[command(name = "rewards-collector", version)]
struct Cli {
    /// Run forever, collecting every HOURS hours (1 to 8760)
    #[arg(
        long,
        value_name = "HOURS",
        num_args = 0..=1,
        default_missing_value = "24",
        value_parser = clap::value_parser!(u64).range(1..=MAX_DAEMON_HOURS)
    )]
    daemon: Option<u64>,
}

fn init_tracing() -> std::io::Result<()> {
    let file_layer = match std::env::var("REWARDS_LOG_FILE") {
        Ok(path) if !path.is_empty() => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rewards_collector=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to open log file: {}", e);
        return ExitCode::FAILURE;
    }

    let config = Config::from_env();
    config.log();

    let coingecko = match CoinGeckoService::new(
        config.coingecko_api_key.clone(),
        config.coingecko_base_url.clone(),
    ) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Failed to build CoinGecko client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let prices = PriceService::new(
        Arc::new(FixedXdrRate::new(config.xdr_usd_rate)),
        Arc::new(coingecko),
        Arc::new(SystemClock),
    );

    let runner = DreRunner::new(config.dre.clone(), config.output_dir.clone());

    let settings = CollectionSettings {
        database_url: config.database_url.clone(),
        cleanup_output: config.cleanup_csv,
    };

    let shutdown = ShutdownSignal::new();
    let service = RewardsCollectionService::new(settings, Arc::new(runner), prices)
        .with_shutdown_signal(shutdown.clone());

    match cli.daemon {
        Some(hours) => {
            shutdown.listen();
            Arc::new(service)
                .run_daemon(Duration::from_secs(hours * 3600))
                .await;
            ExitCode::SUCCESS
        }
        None => {
            if service.run_once().await {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
