use anyhow::Context;
use envelope_bot::config::{load_credentials, BotConfig};
use envelope_bot::exchange::BitgetClient;
use envelope_bot::strategy::{CycleReport, EnvelopeRunner};
use tracing_subscriber::EnvFilter;

// One cycle per invocation; scheduling is left to cron or a systemd timer.
// Failures are logged and the process still exits 0.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    setup_logging();

    // Configuration errors stop the run before the exchange is contacted
    let config = match BotConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("ERROR - invalid configuration: {}", e);
            return;
        }
    };

    tracing::info!(">>> starting execution for {}", config.symbol);

    match run(config).await {
        Ok(report) => log_summary(&report),
        Err(e) => tracing::error!("ERROR - {:#}", e),
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("envelope_bot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: BotConfig) -> anyhow::Result<CycleReport> {
    let credentials = load_credentials(&config.key_path, &config.key_name)
        .with_context(|| format!("Failed to load credentials '{}'", config.key_name))?;

    let client = BitgetClient::connect(&config, credentials)
        .await
        .context("Failed to connect to Bitget")?;

    let runner = EnvelopeRunner::new(client, config)?;
    runner.run_cycle().await
}

fn log_summary(report: &CycleReport) {
    if report.blocked {
        tracing::info!("Execution completed, waiting for stop-loss cooldown to end");
        return;
    }

    tracing::info!(
        "✅ Execution completed: {} layers placed, {} skipped, {} failed, {} stop-losses tracked",
        report.placed.len(),
        report.skipped_levels.len(),
        report.failed_entries.len(),
        report.tracker.stop_loss_ids.len()
    );
}
