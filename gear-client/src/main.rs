//! gear-client: submit `reverse` jobs and report how many went through.
//!
//! ```text
//! gear-client -n 100                 100 foreground jobs, one at a time
//! gear-client -n 100 -a              queue 100 jobs, then run them together
//! gear-client -s 10 -b               background jobs for ten seconds
//! gear-client --config <path>        load servers/timeouts from TOML
//! gear-client --gen-config           print the default config and exit
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gear_core::{Client, GearConfig};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gear-client", about = "Submit reverse jobs to a Gearman job server")]
struct Cli {
    /// Server host; overrides the configured server list.
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port, used with --host.
    #[arg(short, long, default_value_t = 4730)]
    port: i32,

    /// Keep submitting for this many seconds.
    #[arg(short, long, default_value_t = 0)]
    seconds: u64,

    /// Submit this many tasks (ignored when --seconds is set).
    #[arg(short = 'n', long, default_value_t = 0)]
    num_of_tasks: usize,

    /// Do not print results.
    #[arg(short, long)]
    quiet: bool,

    /// Submit background jobs.
    #[arg(short, long)]
    background: bool,

    /// Queue tasks and run them together at the end.
    #[arg(short, long)]
    asynchronous: bool,

    /// Append `seconds,tasks` to this file when done.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Client timeout in seconds; overrides the configured value.
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Function to call.
    #[arg(short, long, default_value = "reverse")]
    function: String,

    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "gear.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
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

    info!("gear-client v{}", env!("CARGO_PKG_VERSION"));

    let mut client = Client::new();
    match &cli.host {
        Some(host) => client.add_server(host, cli.port)?,
        None => client.add_servers(config.servers.as_slice())?,
    }
    client.set_timeout(match cli.timeout {
        Some(secs) => (secs * 1000) as i64,
        None => config.timeouts.client_ms,
    });
    if !cli.quiet {
        client.set_complete_fn(|task| {
            info!(task = %task.id(), "completed: {}", String::from_utf8_lossy(task.result()));
        });
    }
    client.set_fail_fn(|task| warn!(task = %task.id(), "failed"));

    let started = Instant::now();
    let stop_at = started + Duration::from_secs(cli.seconds);
    let mut submitted = 0usize;

    loop {
        let more = if cli.seconds > 0 {
            Instant::now() < stop_at
        } else {
            submitted < cli.num_of_tasks
        };
        if !more {
            break;
        }

        let payload = format!("Hello task {submitted}");
        match (cli.asynchronous, cli.background) {
            (true, true) => {
                client.add_task_background(&cli.function, &payload, None)?;
            }
            (true, false) => {
                client.add_task(&cli.function, &payload, None)?;
            }
            (false, true) => {
                let task = client.do_background(&cli.function, &payload, None).await?;
                info!(handle = task.job_handle().unwrap_or("-"), "queued in background");
            }
            (false, false) => {
                client.do_job(&cli.function, &payload, None).await?;
            }
        }
        submitted += 1;
    }

    if submitted == 0 {
        warn!("number of seconds/tasks unspecified");
    }
    if cli.asynchronous {
        info!(queued = client.tasks().len(), "running queued tasks");
        client.run_tasks().await?;
    }

    info!(
        total = submitted,
        background = cli.background,
        asynchronous = cli.asynchronous,
        elapsed = ?started.elapsed(),
        "tasks processed"
    );

    if let Some(path) = &cli.output {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{},{}", cli.seconds, submitted)?;
    }
    Ok(())
}
