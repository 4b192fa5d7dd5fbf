//! gear-admin: query and control a Gearman job server over its text protocol.
//!
//! ```text
//! gear-admin status                  queued/running/worker counts per function
//! gear-admin workers                 connected workers and their functions
//! gear-admin -H gearmand maxqueue reverse 100
//! gear-admin shutdown --graceful     stop accepting work, then exit
//! gear-admin --gen-config            print the default config and exit
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gear_core::{Admin, DEFAULT_PORT, GearConfig};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gear-admin", about = "Administer a Gearman job server")]
struct Cli {
    /// Server host.
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Server port.
    #[arg(short, long, default_value_t = DEFAULT_PORT as i32)]
    port: i32,

    /// Reply timeout in milliseconds; overrides the configured value.
    #[arg(short, long)]
    timeout: Option<i64>,

    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "gear.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<AdminCommand>,
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// Per-function queue and worker counts.
    Status,
    /// Connected workers.
    Workers,
    /// Queued jobs.
    ShowJobs,
    /// Unique ids of queued jobs.
    ShowUniqueJobs,
    /// Server version.
    Version,
    /// Server verbosity.
    Verbose,
    /// Server process id.
    Getpid,
    /// Register a function with no workers.
    CreateFunction { name: String },
    /// Remove a function that has no jobs or workers.
    DropFunction { name: String },
    /// Cap the queue size of a function.
    Maxqueue { name: String, size: i32 },
    /// Cancel a queued job by handle.
    CancelJob { handle: String },
    /// Stop the server.
    Shutdown {
        /// Finish running jobs first.
        #[arg(short, long)]
        graceful: bool,
    },
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

    let Some(command) = cli.command else {
        info!("no command given; see --help");
        return Ok(());
    };

    let mut admin = Admin::new(&cli.host, cli.port)?;
    admin.set_timeout(cli.timeout.unwrap_or(config.timeouts.admin_ms));
    debug!(info = ?admin.info(), "admin session");

    match command {
        AdminCommand::Status => {
            println!("{:<24} {:>8} {:>8} {:>8}", "FUNCTION", "TOTAL", "RUNNING", "WORKERS");
            for row in admin.status().await? {
                println!(
                    "{:<24} {:>8} {:>8} {:>8}",
                    row.function, row.total, row.running, row.available_workers
                );
            }
        }
        AdminCommand::Workers => {
            for w in admin.workers().await? {
                println!("{} {} {} : {}", w.fd, w.ip, w.client_id, w.functions.join(" "));
            }
        }
        AdminCommand::ShowJobs => {
            for job in admin.show_jobs().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    job.handle, job.retries, job.ignore_job as u8, job.job_queued as u8
                );
            }
        }
        AdminCommand::ShowUniqueJobs => {
            for unique in admin.show_unique_jobs().await? {
                println!("{unique}");
            }
        }
        AdminCommand::Version => println!("{}", admin.version().await?),
        AdminCommand::Verbose => println!("{}", admin.verbose().await?),
        AdminCommand::Getpid => println!("{}", admin.getpid().await?),
        AdminCommand::CreateFunction { name } => {
            admin.create_function(&name).await?;
            println!("OK");
        }
        AdminCommand::DropFunction { name } => {
            admin.drop_function(&name).await?;
            println!("OK");
        }
        AdminCommand::Maxqueue { name, size } => {
            admin.maxqueue(&name, size).await?;
            println!("OK");
        }
        AdminCommand::CancelJob { handle } => {
            admin.cancel_job(&handle).await?;
            println!("OK");
        }
        AdminCommand::Shutdown { graceful } => {
            admin.shutdown(graceful).await?;
            info!(graceful, "shutdown sent");
        }
    }
    Ok(())
}
