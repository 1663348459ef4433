//! Startup and command logic for jobwarden.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobwarden_config::{Config, ConfigLoader, ConfigValidator, ValidationWarning};
use jobwarden_scheduler::{
    describe_jobs, open_store, render_report, Bootstrap, Dispatcher, EventBus, JobStore,
    SchedulerMetrics, Tz,
};

use crate::register::{
    build_registry, dependency_rule, dispatcher_config, job_specs, CommandFreshness,
};

/// Initialize tracing with console output and, when `log_dir` is given,
/// a daily rolling log file kept for 30 days.
pub(crate) fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console = fmt::layer().with_target(true).with_ansi(true);

    let file = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("jobwarden")
                .filename_suffix("log")
                .max_log_files(30)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            // The guard flushes the file writer when dropped at process exit.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .try_init()?;

    Ok(())
}

/// Load the configuration file and reject it on validation errors.
pub(crate) fn load_config(path: &Path) -> anyhow::Result<(Config, Vec<ValidationWarning>)> {
    let config = ConfigLoader::load(path)
        .with_context(|| format!("cannot load configuration from {}", path.display()))?;
    let warnings = ConfigValidator::validate(&config)?.into_result()?;
    Ok((config, warnings))
}

fn timezone(config: &Config) -> anyhow::Result<Tz> {
    config.scheduler.timezone().map_err(anyhow::Error::msg)
}

async fn connect(url: &str) -> anyhow::Result<Arc<dyn JobStore>> {
    open_store(url)
        .await
        .with_context(|| format!("cannot open job store '{}'", url))
}

/// Run the scheduler in the foreground until SIGINT or SIGTERM.
pub(crate) async fn run_scheduler(config: Config) -> anyhow::Result<()> {
    info!("Starting jobwarden v{}", env!("CARGO_PKG_VERSION"));

    let tz = timezone(&config)?;
    let store = connect(&config.scheduler.database_url).await?;
    info!("Job store: {}", config.scheduler.database_url);

    let bus = Arc::new(EventBus::new());
    let metrics = Arc::new(SchedulerMetrics::new());

    let mut bootstrap =
        Bootstrap::new(store.clone(), bus.clone(), job_specs(&config)?).with_timezone(tz);
    if let Some(rule) = dependency_rule(&config) {
        bootstrap = bootstrap.with_dependency(rule);
    }
    if let Some(freshness) = &config.freshness {
        bootstrap = bootstrap.with_freshness(Arc::new(CommandFreshness::from_config(freshness)));
    }
    bootstrap.run().await.context("bootstrap failed")?;

    let registry = build_registry(&config, store.clone(), metrics.clone());
    let dispatcher = Dispatcher::new(store, registry, bus)
        .with_config(dispatcher_config(&config))
        .with_timezone(tz)
        .with_metrics(metrics);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    install_shutdown_signals(Arc::new(shutdown_tx))?;

    dispatcher.run(shutdown_rx).await?;

    let snapshot = dispatcher.metrics().snapshot();
    info!(
        "jobwarden stopped after {} run(s), {} failure(s), {} misfire(s)",
        snapshot.runs_finished, snapshot.failures, snapshot.misfires
    );
    Ok(())
}

/// Print the stored jobs with their next run times.
pub(crate) async fn list_jobs(config: Config) -> anyhow::Result<()> {
    let tz = timezone(&config)?;
    let store = connect(&config.scheduler.database_url).await?;
    let jobs = describe_jobs(store.as_ref(), &tz).await?;
    for line in render_report(&jobs, None) {
        println!("{}", line);
    }
    Ok(())
}

/// Print validation warnings and a short summary.
pub(crate) fn check_config(config: &Config, warnings: &[ValidationWarning]) -> anyhow::Result<()> {
    // Building the triggers catches cron fields the validator cannot parse.
    job_specs(config)?;
    for warning in warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    println!(
        "configuration OK: {} job(s), time zone {}",
        config.jobs.len(),
        config.scheduler.timezone_name()
    );
    Ok(())
}

pub(crate) fn log_warnings(warnings: &[ValidationWarning]) {
    for warning in warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }
}

/// Flip `shutdown` to true on SIGINT or SIGTERM.
#[cfg(unix)]
fn install_shutdown_signals(shutdown: Arc<watch::Sender<bool>>) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    for (kind, name) in [
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::interrupt(), "SIGINT"),
    ] {
        let mut stream =
            signal(kind).with_context(|| format!("cannot install {} handler", name))?;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                info!("Received {}, shutting down", name);
                let _ = shutdown.send(true);
            }
        });
    }
    Ok(())
}

/// Flip `shutdown` to true on Ctrl+C.
#[cfg(not(unix))]
fn install_shutdown_signals(shutdown: Arc<watch::Sender<bool>>) -> anyhow::Result<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                let _ = shutdown.send(true);
            }
            Err(e) => {
                tracing::error!("Cannot listen for Ctrl+C: {}", e);
                // Keep the sender alive so the dispatcher is not stopped.
                std::future::pending::<()>().await;
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config_with_warnings() {
        let file = write_config(
            r#"
                [scheduler]
                timezone = "UTC"

                [dependency]
                primary = "a"
                dependents = ["ghost"]

                [[jobs]]
                id = "a"
                command = "true"
                trigger = { kind = "interval", hours = 1 }
            "#,
        );
        let (config, warnings) = load_config(file.path()).unwrap();
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/jobwarden.toml");
        let (config, warnings) = load_config(&path).unwrap();
        assert!(warnings.is_empty());
        check_config(&config, &warnings).unwrap();
        assert_eq!(config.jobs.len(), 4);
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let file = write_config(
            r#"
                [scheduler]
                timezone = "UTC"
                max_workers = 0
            "#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("max_workers"));
    }

    #[test]
    fn test_check_config_rejects_bad_cron() {
        let config = ConfigLoader::load_str(
            r#"
                [[jobs]]
                id = "a"
                command = "true"
                trigger = { kind = "cron", hour = "25" }
            "#,
        )
        .unwrap();
        assert!(check_config(&config, &[]).is_err());
    }

    #[tokio::test]
    async fn test_list_jobs_against_sqlite() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ConfigLoader::load_str(&format!(
            "[scheduler]\ntimezone = \"UTC\"\ndatabase_url = \"sqlite://{}\"",
            dir.path().join("jobs.db").display()
        ))
        .unwrap();
        list_jobs(config).await.unwrap();
    }
}
