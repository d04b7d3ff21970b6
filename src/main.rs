use std::path::PathBuf;

use anyhow::Context;
use chrono::Duration;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod anomaly;
mod config;
mod db;
mod error;
mod experiment;
mod export;
mod features;
mod models;
mod pipeline;
mod report;
mod seasonal;
mod stats;
mod store;

use config::EngineConfig;
use models::Metric;
use pipeline::{Stage, TopicStatus};

#[derive(Parser)]
#[command(name = "topic-growth")]
#[command(about = "Trend, anomaly and experiment analytics for tracked topics", long_about = None)]
struct Cli {
    /// TOML file overriding the engine defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Register the default set of tracked topics
    Seed,
    /// Import daily view counts (topic,date,views) from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Recompute features, anomalies and/or experiments for every topic
    Run {
        #[arg(long, value_enum, default_value_t = Stage::All)]
        stage: Stage,
        /// Metric the experiment simulation draws its baseline from
        #[arg(long, value_enum, default_value_t = Metric::GrowthDaily)]
        metric: Metric,
        /// Relative lift applied to the treatment group
        #[arg(long)]
        lift: Option<f64>,
        /// Synthetic observations per group
        #[arg(long)]
        samples: Option<usize>,
        /// Seed for reproducible simulations
        #[arg(long)]
        seed: Option<u64>,
        /// Print the batch summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 7)]
        since_days: i64,
        #[arg(long, default_value_t = 5)]
        experiments: i64,
    },
    /// Export stored views and metrics as CSV
    Export {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("GROWTH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = EngineConfig::load(cli.config.as_deref())?;

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = db::PgStore::new(pool);

    match cli.command {
        Commands::InitDb => {
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let count = db::seed(store.pool()).await?;
            println!("Registered {count} tracked topics.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(store.pool(), &csv).await?;
            println!("Inserted {inserted} daily counts from {}.", csv.display());
        }
        Commands::Run {
            stage,
            metric,
            lift,
            samples,
            seed,
            json,
        } => {
            if let Some(lift) = lift {
                config.lift = lift;
            }
            if let Some(samples) = samples {
                config.n_samples = samples;
            }
            config.validate()?;

            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            let report = pipeline::run_batch(&store, &config, stage, metric, &mut rng).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for topic in &report.topics {
                    println!("- {} [{:?}] {}", topic.topic, topic.status, topic.detail);
                }
                println!(
                    "{} completed, {} skipped, {} failed.",
                    report.count(TopicStatus::Completed),
                    report.count(TopicStatus::Skipped),
                    report.count(TopicStatus::Failed)
                );
            }
        }
        Commands::Report {
            out,
            since_days,
            experiments,
        } => {
            let today = experiment::today();
            let since_days = since_days.max(1);
            let since_date = today - Duration::days(since_days);
            let snapshots = db::fetch_snapshots(store.pool()).await?;
            let anomalies = db::fetch_recent_anomalies(store.pool(), since_date).await?;
            let runs = db::fetch_recent_experiments(store.pool(), experiments.max(0)).await?;
            let report = report::build_report(today, since_days, &snapshots, &anomalies, &runs);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { dir } => {
            std::fs::create_dir_all(&dir)?;
            let views = db::fetch_view_rows(store.pool()).await?;
            export::write_file(&dir.join("views.csv"), &views)?;
            let metrics = db::fetch_metric_rows(store.pool()).await?;
            export::write_file(&dir.join("metrics.csv"), &metrics)?;
            println!(
                "Exported {} view rows and {} metric rows to {}.",
                views.len(),
                metrics.len(),
                dir.display()
            );
        }
    }

    store.close().await;
    Ok(())
}
