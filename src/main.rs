mod config;
mod fetcher;
mod forecast;
mod market;
mod models;
mod normalizer;
mod pipeline;
mod planner;
mod server;
mod trainer;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "btc-forecaster", about = "BTC price forecasting worker", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Download the configured historical archive window (idempotent)
    Fetch,

    /// Rebuild the canonical price series from downloaded archives
    Normalize,

    /// Fit the regression model from the canonical series
    Train,

    /// Full retrain cycle: fetch → normalize → train
    Pipeline,

    /// Run the forecast HTTP server
    Serve,

    /// Show canonical series and model artifact statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "btc_forecaster=info,tower_http=info,warn",
        1 => "btc_forecaster=debug,tower_http=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Fetch => {
            let _t = utils::Timer::start("Archive fetch");
            let stats = Pipeline::new(config).fetch().await?;
            info!(
                "Done: {} downloaded, {} cached, {} missing, {} failed",
                stats.downloaded, stats.already_present, stats.not_found, stats.failed
            );
        }

        Command::Normalize => {
            let _t = utils::Timer::start("Series rebuild");
            let rows = normalizer::normalize(
                &config.storage.data_dir,
                &config.storage.series_path,
            )?;
            info!("Done: {} rows in canonical series", rows.len());
        }

        Command::Train => {
            let _t = utils::Timer::start("Model training");
            let model = trainer::train(&config.storage.series_path, &config.storage.model_path)?;
            info!(
                "Done: model over {} samples saved to {:?}",
                model.n_samples, config.storage.model_path
            );
        }

        Command::Pipeline => {
            let _t = utils::Timer::start("Retrain cycle");
            let stats = Pipeline::new(config).run().await?;
            info!(
                "Done: {} archives settled, {} series rows",
                stats.fetch.total(),
                stats.series_rows
            );
        }

        Command::Serve => {
            server::serve(config).await?;
        }

        Command::Stats => {
            let rows = normalizer::load_series(&config.storage.series_path)?;
            println!("─────────────────────────────────");
            println!("  BTC Forecaster — Stats");
            println!("─────────────────────────────────");
            println!("  Series rows : {}", rows.len());
            println!(
                "  From        : {}",
                rows.first().map(|r| r.timestamp.to_string()).unwrap_or("—".into())
            );
            println!(
                "  To          : {}",
                rows.last().map(|r| r.timestamp.to_string()).unwrap_or("—".into())
            );
            match trainer::LinearModel::load(&config.storage.model_path) {
                Ok(model) => {
                    println!("  Model       : {} samples, trained {}", model.n_samples, model.trained_at);
                    println!("  Slope       : {:.6e} /s", model.slope);
                }
                Err(_) => println!("  Model       : not trained yet"),
            }
            println!("─────────────────────────────────");
        }
    }

    Ok(())
}
