use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use netlab::config::{DEFAULT_NS_PREFIX, DEFAULT_PING_COUNT, LabConfig};
use netlab::experiments::{ip_routing, l2_switch};
use tracing_subscriber::EnvFilter;

// Use mimalloc as the global allocator for the binary (non-Windows only)
#[cfg(not(windows))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(
    name = "netlab",
    author,
    version,
    disable_version_flag = true,
    about = "Routing and switching lab experiments on emulated networks (needs root)"
)]
struct Cli {
    /// Print the version and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::SetTrue)]
    print_version: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long = "log-level", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Experiment 1: static routing between h1, h2, h3 over r1 and r2
    IpRouting {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Experiment 2: L2 switching, then OpenFlow rules on s1
    L2Switch {
        #[command(flatten)]
        run: RunArgs,
        /// Install the flows on s1 instead of waiting for the operator
        #[arg(long = "auto-flows")]
        auto_flows: bool,
    },
    /// Print an experiment's topology as JSON without touching the system
    Topology {
        #[arg(value_enum)]
        experiment: Experiment,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Report file (result1.txt / result2.txt when omitted)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
    /// Exit after the automated steps instead of starting the CLI
    #[arg(long = "no-cli")]
    no_cli: bool,
    /// Prefix for network namespace names
    #[arg(long = "ns-prefix", default_value = DEFAULT_NS_PREFIX)]
    ns_prefix: String,
    /// Echo requests per probe
    #[arg(long = "ping-count", default_value_t = DEFAULT_PING_COUNT)]
    ping_count: u32,
}

impl RunArgs {
    fn into_config(self, default_output: &str, auto_flows: bool) -> Result<LabConfig> {
        LabConfig::from_cli(
            self.output.unwrap_or_else(|| PathBuf::from(default_output)),
            self.ns_prefix,
            self.ping_count,
            self.no_cli,
            auto_flows,
        )
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Experiment {
    IpRouting,
    L2Switch,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if args.print_version {
        let version = env!("CARGO_PKG_VERSION");
        let git_hash = env!("GIT_HASH");
        let git_branch = env!("GIT_BRANCH");
        let git_dirty = env!("GIT_DIRTY");

        println!(
            "{} ({}@{}{}) [{}]",
            version,
            git_branch,
            git_hash,
            git_dirty,
            env!("CARGO_PKG_NAME")
        );
        return Ok(());
    }

    match args.command {
        Some(Command::IpRouting { run }) => {
            let config = run.into_config(ip_routing::DEFAULT_OUTPUT, false)?;
            ip_routing::run(&config)
                .await
                .context("ip-routing experiment failed")
        }
        Some(Command::L2Switch { run, auto_flows }) => {
            let config = run.into_config(l2_switch::DEFAULT_OUTPUT, auto_flows)?;
            l2_switch::run(&config)
                .await
                .context("l2-switch experiment failed")
        }
        Some(Command::Topology { experiment }) => {
            let topo = match experiment {
                Experiment::IpRouting => ip_routing::topology()?,
                Experiment::L2Switch => l2_switch::topology()?,
            };
            println!("{}", serde_json::to_string_pretty(&topo)?);
            Ok(())
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}
