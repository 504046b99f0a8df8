mod commands;
mod ui;

use std::net::IpAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use echo_core::Transport;
use tracing::Level;
use tracing_subscriber;

#[derive(Parser)]
#[command(name = "echod")]
#[command(about = "TCP/UDP echo service with a live operator event stream", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an echo server and stream its event log until Ctrl-C
    Serve {
        /// Port to listen on (1-65535)
        port: String,

        /// Transport to serve (tcp or udp)
        #[arg(short, long, default_value = "tcp")]
        transport: Transport,

        /// Address to bind
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: IpAddr,

        /// Grace period for in-flight connections after a stop (tcp only)
        #[arg(long, default_value = "3s", value_parser = humantime::parse_duration)]
        grace: Duration,

        /// Event ring capacity before the oldest events are dropped
        #[arg(long, default_value_t = echo_core::events::DEFAULT_CAPACITY)]
        capacity: usize,

        /// Render events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Validate a port value without starting a server
    Check {
        /// Candidate port text
        port: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let code = match cli.command {
        Commands::Serve {
            port,
            transport,
            bind,
            grace,
            capacity,
            json,
        } => commands::serve::execute(&port, transport, bind, grace, capacity, json).await?,

        Commands::Check { port } => commands::check::execute(&port),
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
