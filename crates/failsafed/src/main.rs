//! failsafed — the failover orchestrator daemon.
//!
//! # Usage
//!
//! ```text
//! failsafed start  --config /etc/failsafe/failsafe.toml
//! failsafed stop
//! failsafed status --json
//! ```
//!
//! Exit codes: 0 success (or nothing to do), 1 configuration or runtime
//! error, 2 lock contention with `--strict-lock`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use failsafe_core::config::{env_lookup, OrchestratorConfig};
use failsafe_core::{month_key, Clock, FailoverRecord, FailsafeConfig, SystemClock, UsageStatus};
use failsafe_state::{lock, InstanceGuard, LockError, StatusStore};
use failsafed::{Orchestrator, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER};

#[derive(Parser)]
#[command(name = "failsafed", about = "Local-to-cloud failover orchestrator")]
struct Cli {
    /// Path to failsafe.toml.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator loop.
    Start {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,

        /// Exit with code 2 instead of 0 when another instance is running.
        #[arg(long)]
        strict_lock: bool,
    },
    /// Signal the running orchestrator to shut down and wait for it.
    Stop,
    /// Show the current provider, quota usage and whether the loop runs.
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let result = match cli.command {
        Command::Start { once, strict_lock } => start(&cli.config, once, strict_lock).await,
        Command::Stop => stop(&cli.config).await,
        Command::Status { json } => Ok(status(&cli.config, json)),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = format!("{e:#}"), "failsafed failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: &Path) -> anyhow::Result<FailsafeConfig> {
    FailsafeConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

// ── start ──────────────────────────────────────────────────────────

async fn start(config_path: &Path, once: bool, strict_lock: bool) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;
    let lock_path = config.orchestrator.lock_path();

    let _guard = match claim_instance(&lock_path, strict_lock)? {
        Startup::Acquired(guard) => guard,
        Startup::AlreadyRunning { exit } => return Ok(ExitCode::from(exit)),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut orchestrator = Orchestrator::from_config(&config, clock, &env_lookup)?;
    info!(
        config = %config_path.display(),
        providers = config.providers.len(),
        "failsafed starting"
    );

    if once {
        let report = orchestrator.run_cycle().await;
        info!(
            reachable = report.status.reachable,
            decision = ?report.decision,
            provider = %report.current_provider,
            "single cycle complete"
        );
        return Ok(ExitCode::SUCCESS);
    }

    // ── Shutdown signal ────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    orchestrator.run(shutdown_rx).await;
    info!("failsafed stopped");
    Ok(ExitCode::SUCCESS)
}

/// Outcome of claiming the single-instance lock.
#[derive(Debug)]
enum Startup {
    Acquired(InstanceGuard),
    /// Another instance holds the lock; exit with this code.
    AlreadyRunning { exit: u8 },
}

fn claim_instance(lock_path: &Path, strict_lock: bool) -> Result<Startup, LockError> {
    match InstanceGuard::acquire(lock_path) {
        Ok(guard) => Ok(Startup::Acquired(guard)),
        Err(LockError::Contended { pid, .. }) => {
            warn!(?pid, path = ?lock_path, "another orchestrator instance is running");
            Ok(Startup::AlreadyRunning {
                exit: if strict_lock { 2 } else { 0 },
            })
        }
        Err(e) => Err(e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
        info!("received SIGINT");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received SIGTERM");
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
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

// ── stop ───────────────────────────────────────────────────────────

async fn stop(config_path: &Path) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;
    let lock_path = config.orchestrator.lock_path();

    if !lock::is_held(&lock_path) {
        info!(path = ?lock_path, "orchestrator is not running");
        return Ok(ExitCode::SUCCESS);
    }
    let Some(pid) = lock::holder_pid(&lock_path) else {
        bail!("lock {} is held but names no pid", lock_path.display());
    };

    terminate(pid)?;
    info!(pid, "SIGTERM sent, waiting for shutdown");

    let timeout = config.orchestrator.shutdown_timeout;
    let started = Instant::now();
    while lock::is_held(&lock_path) {
        if started.elapsed() >= timeout {
            bail!("orchestrator (pid {pid}) still running after {}s", timeout.as_secs());
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    info!(pid, "orchestrator stopped");
    Ok(ExitCode::SUCCESS)
}

#[cfg(unix)]
fn terminate(pid: u32) -> anyhow::Result<()> {
    let pid = libc::pid_t::try_from(pid).context("pid out of range")?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // Exited between the lock check and the signal.
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err).context(format!("signalling pid {pid}"));
    }
    Ok(())
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> anyhow::Result<()> {
    bail!("stopping pid {pid} is only supported on unix")
}

// ── status ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct StatusReport {
    running: bool,
    pid: Option<u32>,
    record: FailoverRecord,
    usage: UsageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    config_error: Option<String>,
}

/// Never fails: an unreadable config falls back to default paths.
fn status(config_path: &Path, json: bool) -> ExitCode {
    let (orchestrator, primary, config_error) = match load_config(config_path) {
        Ok(config) => {
            let primary = config.primary().name.clone();
            (config.orchestrator, primary, None)
        }
        Err(e) => {
            warn!(error = format!("{e:#}"), "config unavailable, using default paths");
            (OrchestratorConfig::default(), "primary".to_string(), Some(format!("{e:#}")))
        }
    };

    let store = StatusStore::at(&orchestrator.state_dir, &primary);
    let lock_path = orchestrator.lock_path();
    let running = lock::is_held(&lock_path);

    let report = StatusReport {
        running,
        pid: running.then(|| lock::holder_pid(&lock_path)).flatten(),
        record: store.load_record_or_default(),
        usage: store.load_usage_or_default(&month_key(SystemClock.now())),
        config_error,
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(e) => error!(error = %e, "failed to encode status"),
        }
    } else {
        print_status(&report);
    }
    ExitCode::SUCCESS
}

fn print_status(report: &StatusReport) {
    match report.pid {
        Some(pid) if report.running => println!("orchestrator:      running (pid {pid})"),
        _ if report.running => println!("orchestrator:      running"),
        _ => println!("orchestrator:      stopped"),
    }
    println!("current provider:  {}", report.record.current_provider);
    match report.record.last_switch {
        Some(at) => println!("last switch:       {} ({})", at.to_rfc3339(), report.record.switch_reason),
        None => println!("last switch:       never"),
    }
    println!("switches (month):  {}", report.record.switches_this_month);
    println!(
        "quota usage:       {:.1}h in {}{}",
        report.usage.hours_used,
        report.usage.month,
        if report.usage.warned { " (warned)" } else { "" }
    );
    if let Some(e) = &report.config_error {
        println!("config:            {e}");
    }
}
