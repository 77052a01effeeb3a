use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;

use rollwatch::adapters::{InMemoryFlagStore, InMemoryMetrics};
use rollwatch::config::Config;
use rollwatch::runtime::Runtime;
use rollwatch::service::triggers;
use rollwatch::service::{
    AnomalyDetector, IntelligentScheduler, LogSubscriber, PatternLearner, RolloutController,
    SubscriberRegistry, TriggerEngine,
};

/// Rollwatch - feedback-driven implementation rollout control.
#[derive(Parser, Debug)]
#[command(name = "rollwatch")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the control loops (foreground, until Ctrl-C)
    Run(ConfigPathArg),

    /// Validate configuration and report what would run
    Check(ConfigPathArg),

    /// Trigger document operations
    #[command(subcommand)]
    Triggers(TriggersCommand),
}

#[derive(Subcommand, Debug)]
enum TriggersCommand {
    /// Validate a trigger document without running
    Validate(TriggerFileArg),
}

#[derive(Parser, Debug)]
struct ConfigPathArg {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[derive(Parser, Debug)]
struct TriggerFileArg {
    /// Path to the trigger document
    file: PathBuf,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Check(args) => check(args),
        Commands::Triggers(TriggersCommand::Validate(args)) => validate_triggers(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: ConfigPathArg) -> anyhow::Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;
    config.init_logging();
    info!("rollwatch starting");

    let mut registry = SubscriberRegistry::new();
    registry.register(Box::new(LogSubscriber));
    let events = Arc::new(registry);

    let metrics = Arc::new(InMemoryMetrics::new());
    let flags = Arc::new(InMemoryFlagStore::new());
    let anomalies = Arc::new(AnomalyDetector::new(config.anomaly.clone()));
    let patterns = Arc::new(PatternLearner::new(config.patterns.clone()));

    let controller = Arc::new(RolloutController::new(
        config.rollout.clone(),
        metrics.clone(),
        flags,
        anomalies.clone(),
        events.clone(),
    ));
    for component in &config.components {
        controller.register_component(&component.name, component.strategy);
    }

    let engine = Arc::new(TriggerEngine::new(
        config.triggers.clone(),
        controller.clone(),
        events.clone(),
    ));
    if let Some(path) = &config.triggers_file {
        let count = engine
            .load_document(path.as_ref())
            .with_context(|| format!("failed to load triggers from {path}"))?;
        info!(count, path = %path, "Triggers loaded");
    }

    let scheduler = Arc::new(
        IntelligentScheduler::new(config.scheduler.clone(), patterns, events)
            .with_anomaly_feed(anomalies),
    );

    let runtime = Runtime::new(
        config.runtime.clone(),
        controller,
        engine,
        scheduler,
        metrics,
    );
    runtime.start();

    signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    runtime.shutdown().await;

    info!("rollwatch stopped");
    Ok(())
}

fn check(args: ConfigPathArg) -> anyhow::Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("config invalid: {}", args.config.display()))?;

    println!("Config OK: {}", args.config.display());
    println!("  components: {}", config.components.len());
    for component in &config.components {
        println!("    {} ({:?})", component.name, component.strategy);
    }
    println!(
        "  rollout: increment {}%, error threshold {}",
        config.rollout.rollout_increment, config.rollout.error_threshold
    );
    println!(
        "  scheduler: {} peak period(s), {} window(s)",
        config.scheduler.peak_periods.len(),
        config.scheduler.scheduling_windows.len()
    );

    if let Some(path) = &config.triggers_file {
        let count = triggers::validate_document(path.as_ref())
            .with_context(|| format!("trigger document invalid: {path}"))?;
        println!("  triggers: {count} valid in {path}");
    }
    Ok(())
}

fn validate_triggers(args: TriggerFileArg) -> anyhow::Result<()> {
    let count = triggers::validate_document(&args.file)
        .with_context(|| format!("trigger document invalid: {}", args.file.display()))?;
    println!("{count} trigger(s) valid in {}", args.file.display());
    Ok(())
}
