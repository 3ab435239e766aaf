use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use procurement_lighthouse::{
    Pipeline, SystemClock,
    actors::ListenerHandle,
    alerts::{AlertStatus, DashboardData},
    channel::postgres::PgNotificationSource,
    config::Config,
    ml::predictor_from_config,
    storage::{StorageBackend, postgres::PostgresBackend},
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// How long the listener gets to finish its current batch on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Event-driven alerting for procurement data")]
struct Args {
    /// Config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Listen for store notifications until interrupted
    Listen,

    /// Print the alert dashboard
    Alerts {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Maximum number of active alerts to list
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Store health and recent activity
    Status,

    /// Run one alert maintenance pass
    Maintain,

    /// Resolve an alert by id
    Resolve {
        alert_id: i64,

        #[arg(long)]
        note: Option<String>,
    },

    /// Delete resolved alerts older than the given number of days
    Cleanup {
        #[arg(long)]
        days: Option<u32>,
    },
}

fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("procurement_lighthouse", level),
        ("lighthouse", level),
        ("sqlx", LevelFilter::WARN),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;

    let backend = PostgresBackend::connect(&config.database)
        .await
        .context("failed to connect to the database")?;
    let pool = backend.pool().clone();
    let store: Arc<dyn StorageBackend> = Arc::new(backend);

    let predictor = predictor_from_config(&config.ml).context("failed to set up ML client")?;
    let pipeline = Arc::new(
        Pipeline::new(config, store.clone(), predictor, Arc::new(SystemClock))
            .context("invalid configuration")?,
    );

    let result = match args.command {
        Command::Listen => listen(pipeline, PgNotificationSource::new(pool)).await,
        Command::Alerts { json, limit } => print_alerts(&pipeline, json, limit).await,
        Command::Status => print_status(&pipeline).await,
        Command::Maintain => {
            let report = pipeline.alerts().run_maintenance().await?;
            println!(
                "maintenance complete: {} resolved, {} cleaned",
                report.resolved, report.cleaned
            );
            Ok(())
        }
        Command::Resolve { alert_id, note } => resolve(&pipeline, alert_id, note).await,
        Command::Cleanup { days } => {
            let days = days.unwrap_or(pipeline.config().alerts.cleanup_days);
            let deleted = pipeline.alerts().manager().cleanup_old_alerts(days).await?;
            println!("deleted {deleted} resolved alerts older than {days} days");
            Ok(())
        }
    };

    if let Err(e) = store.close().await {
        warn!("failed to close store: {e}");
    }

    result
}

async fn listen(pipeline: Arc<Pipeline>, source: PgNotificationSource) -> anyhow::Result<()> {
    let (handle, mut worker) = ListenerHandle::spawn(source, pipeline);

    tokio::select! {
        result = &mut worker => {
            // The worker only stops on its own when it failed.
            let result = result.context("listener task panicked")?;
            result.context("listener stopped")?;
            return Ok(());
        }
        _ = shutdown_signal() => {
            info!("shutdown requested");
        }
    }

    handle.shutdown().await;
    match tokio::time::timeout(SHUTDOWN_GRACE, worker).await {
        Ok(result) => {
            result.context("listener task panicked")??;
            debug!("listener stopped cleanly");
        }
        Err(_) => error!(
            "listener did not stop within {}s, exiting anyway",
            SHUTDOWN_GRACE.as_secs()
        ),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn resolve(pipeline: &Pipeline, alert_id: i64, note: Option<String>) -> anyhow::Result<()> {
    let Some(alert) = pipeline.store().get_alert(alert_id).await? else {
        bail!("alert {alert_id} does not exist");
    };
    if alert.status != AlertStatus::Active {
        bail!("alert {alert_id} is already {}", alert.status.as_str());
    }

    let resolved = pipeline
        .alerts()
        .manager()
        .resolve_alert(alert_id, note.as_deref())
        .await?;
    if !resolved {
        bail!("alert {alert_id} was resolved concurrently");
    }
    println!("{} alert {alert_id} resolved", alert.alert_type.title());
    Ok(())
}

async fn print_alerts(pipeline: &Pipeline, json: bool, limit: Option<usize>) -> anyhow::Result<()> {
    let data = match limit {
        Some(limit) => pipeline.alerts().dashboard_data_with_limit(limit).await?,
        None => pipeline.alerts().dashboard_data().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        print_dashboard(&data);
    }
    Ok(())
}

fn print_dashboard(data: &DashboardData) {
    let summary = &data.summary;
    println!("Active alerts: {}", summary.total_active);
    println!("Alerts in the last hour: {}", summary.recent_alerts_1h);

    if !summary.active_by_severity.is_empty() {
        println!();
        println!("By severity:");
        for (severity, count) in summary.active_by_severity.iter().rev() {
            println!("  {:<10} {count}", severity.as_str());
        }
    }

    if !summary.active_by_type.is_empty() {
        println!();
        println!("By type:");
        for (alert_type, count) in &summary.active_by_type {
            println!("  {:<20} {count}", alert_type.title());
        }
    }

    if !data.active_alerts.is_empty() {
        println!();
        for alert in &data.active_alerts {
            println!(
                "#{:<6} {:<9} {:<20} {:<10} {}",
                alert.alert_id,
                alert.severity.as_str(),
                alert.alert_type.as_str(),
                alert.entity.to_string(),
                alert.message
            );
        }
    }
}

async fn print_status(pipeline: &Pipeline) -> anyhow::Result<()> {
    let health = pipeline.store().health_check().await?;
    let summary = pipeline.alerts().manager().summary().await?;
    let events_1h = pipeline
        .store()
        .count_events_since(Utc::now() - chrono::Duration::hours(1))
        .await?;

    println!(
        "Store: {} ({})",
        if health.healthy { "healthy" } else { "unhealthy" },
        health.message
    );
    println!("Active alerts: {}", summary.total_active);
    println!("Events processed in the last hour: {events_1h}");

    if !health.healthy {
        bail!("store is unhealthy");
    }
    Ok(())
}
