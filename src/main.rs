//! Syntactic playground execution service.
//!
//! Usage:
//!   syntactic-playground serve [--port 8080]      # Start HTTP server
//!   syntactic-playground run <file.js>            # One-shot local sandbox run

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use syntactic_playground::exec_log::{ExecutionLog, NoopExecutionLog, RestExecutionLog};
use syntactic_playground::http_server;
use syntactic_playground::piston::{PistonClient, DEFAULT_PISTON_URL};
use syntactic_playground::rate_limit::RateLimiter;
use syntactic_playground::sandbox;
use syntactic_playground::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "syntactic-playground")]
#[command(about = "Code playground execution service")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Base URL of the remote execution service
        #[arg(long, default_value = DEFAULT_PISTON_URL)]
        piston_url: String,

        /// Endpoint receiving execution records (logging disabled when unset)
        #[arg(long)]
        log_endpoint: Option<String>,

        /// Bearer token for the log endpoint
        #[arg(long)]
        log_token: Option<String>,
    },
    /// Run a JavaScript file through the local sandbox and exit
    Run {
        /// Path to the script
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Commands::Serve {
            port,
            piston_url,
            log_endpoint,
            log_token,
        } => {
            let exec_log: Arc<dyn ExecutionLog> = match log_endpoint {
                Some(endpoint) => Arc::new(RestExecutionLog::new(endpoint, log_token)),
                None => Arc::new(NoopExecutionLog),
            };
            let state = AppState::new(
                RateLimiter::default(),
                PistonClient::new(piston_url)?,
                exec_log,
            );
            http_server::run_server(port, state).await
        }
        Commands::Run { file } => {
            let code = std::fs::read_to_string(&file)?;
            let result = sandbox::run_local(&code).await;
            if !result.output.is_empty() {
                println!("{}", result.output);
            }
            if let Some(error) = result.error {
                eprintln!("{error}");
            }
            if !result.success {
                exit(1);
            }
            Ok(())
        }
    }
}
