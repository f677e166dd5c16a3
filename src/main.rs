#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result as AnyResult};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tariff_load_sim::{block_on_with_grace, Controller, SimConfig, SysinfoSampler};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(
    name = "tariff-sim",
    version,
    about = "Load the host in proportion to a tariff rate and report usage"
)]
struct Cli {
    /// Tariff rate in percent; targets are baseline * (1 + rate/100).
    #[arg(long)]
    rate: f64,
    /// Stop after this many seconds.
    #[arg(long, default_value_t = 30)]
    duration_secs: u64,
    /// Interval between usage reports on stdout.
    #[arg(long, default_value_t = 1000)]
    report_every_ms: u64,
    /// Optional config file; `TARIFF_SIM_*` env vars override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log running process names before starting.
    #[arg(long)]
    list_processes: bool,
    /// Dump prometheus metrics to stdout on exit.
    #[arg(long)]
    print_metrics: bool,
}

fn init_tracing() {
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr);
    fmt.json().init();
}

/// Operator acknowledgment lives here, not in the library.
async fn watch_trips(ctrl: Controller) {
    let mut trips = ctrl.subscribe_trips();
    loop {
        match trips.recv().await {
            Ok(event) => {
                warn!(
                    cpu = event.cpu_percent,
                    memory = event.memory_percent,
                    threshold = event.threshold,
                    "resource usage critical, press Enter to continue"
                );
                let read = tokio::task::spawn_blocking(|| {
                    let mut line = String::new();
                    std::io::stdin().read_line(&mut line)
                })
                .await;
                match read {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error=%e, "could not read acknowledgment, resuming"),
                    Err(e) => warn!(error=%e, "acknowledgment reader failed, resuming"),
                }
                ctrl.acknowledge_trip();
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed safety trip events"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn main() -> AnyResult<()> {
    init_tracing();
    let cli = Cli::parse();
    // a pending acknowledgment read must not keep the process alive
    block_on_with_grace(run(cli), SHUTDOWN_GRACE).context("build runtime")?
}

async fn run(cli: Cli) -> AnyResult<()> {
    let config = SimConfig::load(cli.config.as_deref())?;
    info!(?config, "starting tariff simulation");

    let ctrl = Controller::builder(Arc::new(SysinfoSampler::new()))
        .config(config)
        .build()
        .await
        .context("build controller")?;

    if cli.list_processes {
        let names = ctrl.process_names().await.context("list processes")?;
        info!(count = names.len(), processes = ?names, "running processes");
    }

    ctrl.start(cli.rate).context("start simulation")?;
    let watcher = tokio::spawn(watch_trips(ctrl.clone()));

    let deadline = tokio::time::sleep(Duration::from_secs(cli.duration_secs));
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(Duration::from_millis(cli.report_every_ms.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match ctrl.sample().await {
                    Ok(_) => {
                        let line = serde_json::to_string(&ctrl.report()).context("encode report")?;
                        println!("{line}");
                    }
                    Err(e) => warn!(error=%e, "sample failed"),
                }
            }
            () = &mut deadline => {
                info!(duration_secs = cli.duration_secs, "duration elapsed");
                break;
            }
            res = tokio::signal::ctrl_c() => {
                res.context("listen for ctrl-c")?;
                info!("interrupted");
                break;
            }
        }
    }

    watcher.abort();
    ctrl.shutdown().await.context("shutdown")?;
    let report = ctrl.report();
    info!(
        cpu_increase = report.cpu_increase_ratio,
        memory_increase = report.memory_increase_ratio,
        failure = report.background_failure.as_deref().unwrap_or("none"),
        "simulation finished"
    );
    if cli.print_metrics {
        let text = ctrl.metrics().encode_text()?;
        println!("{}", String::from_utf8_lossy(&text));
    }
    Ok(())
}
