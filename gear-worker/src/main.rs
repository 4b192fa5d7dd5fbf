//! gear-worker: serve `reverse` and `echo` jobs for a fixed time.
//!
//! ```text
//! gear-worker                        run for ten seconds
//! gear-worker -s 60 -H gearmand      run a minute against gearmand:4730
//! gear-worker --config <path>        load servers/timeouts from TOML
//! gear-worker --gen-config           print the default config and exit
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gear_core::{GearConfig, GearError, HandlerResult, Job, Worker};

/// Seconds the server allows each job; 0 is unlimited.
const FUNCTION_TIMEOUT: u32 = 0;

/// Upper bound on one work cycle so the run time is honoured.
const CYCLE_MS: i64 = 1_000;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gear-worker", about = "Serve reverse and echo jobs from a Gearman job server")]
struct Cli {
    /// Server host; overrides the configured server list.
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port, used with --host.
    #[arg(short, long, default_value_t = 4730)]
    port: i32,

    /// How long to keep working.
    #[arg(short, long, default_value_t = 10)]
    seconds: u64,

    /// Identifier reported to the server.
    #[arg(long)]
    id: Option<String>,

    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "gear.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Handlers ─────────────────────────────────────────────────────

fn reverse(job: &mut Job) -> HandlerResult {
    let mut out = job.workload().to_vec();
    out.reverse();
    Ok(out)
}

fn echo(job: &mut Job) -> HandlerResult {
    Ok(job.workload().to_vec())
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&GearConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = GearConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("gear-worker v{}", env!("CARGO_PKG_VERSION"));

    let mut worker = Worker::new();
    match &cli.host {
        Some(host) => worker.add_server(host, cli.port)?,
        None => worker.add_servers(config.servers.as_slice())?,
    }
    if let Some(id) = &cli.id {
        worker.set_identifier(id.as_str())?;
    }
    worker.add_function("reverse", FUNCTION_TIMEOUT, reverse)?;
    worker.add_function("echo", FUNCTION_TIMEOUT, echo)?;
    worker.set_exception_fn(|e| warn!("{e}"));
    let cycle_ms = config.timeouts.worker_ms;
    worker.set_timeout(if (0..=CYCLE_MS).contains(&cycle_ms) { cycle_ms } else { CYCLE_MS });

    let stop_at = Instant::now() + Duration::from_secs(cli.seconds);
    let mut served = 0usize;
    while Instant::now() < stop_at {
        match worker.work().await {
            Ok(report) => {
                served += 1;
                info!(handle = %report.handle, function = %report.function, "job done");
            }
            Err(GearError::Timeout(_)) => {
                let left = stop_at.saturating_duration_since(Instant::now());
                info!("idle; {}s left", left.as_secs());
            }
            Err(e) if e.is_retryable() => {
                warn!("work cycle failed: {e}");
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(served, "end working");
    Ok(())
}
