//! EMS Command-Line Client
//!
//! Talks to an EMS server interactively, listens on a channel, or runs a
//! server in the foreground.

mod commands;
mod completer;
mod repl;
mod subscribe;

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::time::Duration;

use ems_client::ClientConfig;
use ems_client::config::{DEFAULT_HOST, DEFAULT_PORT};

/// EMS Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "ems")]
#[command(version, about = "EMS Command-Line Client")]
pub struct Args {
    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Send commands to a server from an interactive prompt
    Client(ServerAddress),

    /// Print messages from a channel and broadcast typed lines to it
    Subscribe {
        /// Channel to listen on
        #[arg(short = 'C', long)]
        channel: String,

        #[command(flatten)]
        server: ServerAddress,
    },

    /// Run a server until Ctrl-C
    Server(ems_server::Args),
}

/// Where to connect.
#[derive(ClapArgs, Debug)]
pub struct ServerAddress {
    /// Server host
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Server port
    #[arg(short = 'P', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Command timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

impl ServerAddress {
    fn into_config(self) -> ClientConfig {
        ClientConfig::new(self.host, self.port).with_timeout(Duration::from_secs(self.timeout))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ems_cli=info,ems_server=info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.mode {
        Mode::Client(server) => repl::run(server.into_config()).await,
        Mode::Subscribe { channel, server } => subscribe::run(server.into_config(), channel).await,
        Mode::Server(server_args) => run_server(server_args).await,
    }
}

/// Run a server in the foreground.
async fn run_server(args: ems_server::Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.into_config();
    println!("Starting up an EMS server on {}", config.bind_address());

    let handle = ems_server::Server::start(config).await?;
    tracing::info!(address = %handle.local_addr(), "server started");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("received shutdown signal");
        }
        _ = handle.state().shutdown.cancelled() => {
            tracing::info!("server halted");
        }
    }

    handle.stop().await?;
    Ok(())
}
