use clap::{Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;
use std::path::PathBuf;

use plantops_link::config::{load_config, load_from_env};
use plantops_link::observability::init_logging;
use plantops_link::{BackendRequest, BackendResponse, ConnectivityService};

#[derive(Parser)]
#[command(name = "link-cli")]
#[command(about = "Operator CLI for the plantops backend link", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults plus PLANTOPS_* variables when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the negotiated protocol
    Detect,
    /// Run one health probe
    Probe,
    /// Print the link status after a probe
    Status,
    /// Send one request through the resilient client
    Request {
        /// HTTP method (GET, POST, PATCH, DELETE)
        method: String,
        /// Path relative to the backend base URL
        path: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };
    // One-shot commands: no background probing.
    config.health_check.enabled = false;
    init_logging(&config.observability);

    let service = ConnectivityService::from_config(config)?;

    match cli.command {
        Commands::Detect => {
            let protocol = service.negotiator().detect_protocol().await;
            println!("{}", protocol);
            println!("{}", service.negotiator().base_url()?);
        }
        Commands::Probe => {
            service.negotiator().detect_protocol().await;
            let healthy = service.check_health().await;
            println!("{}", if healthy { "healthy" } else { "unreachable" });
            if !healthy {
                std::process::exit(1);
            }
        }
        Commands::Status => {
            service.negotiator().detect_protocol().await;
            service.check_health().await;
            println!("{}", serde_json::to_string_pretty(&service.status())?);
        }
        Commands::Request { method, path, body } => {
            let method: Method = method.to_ascii_uppercase().parse()?;
            let mut request = BackendRequest::new(method, path);
            if let Some(raw) = body {
                let body: Value = serde_json::from_str(&raw)?;
                request = request.with_body(body);
            }

            service.start().await;
            let result = service.client().execute(request).await;
            service.stop();
            print_response(result?)?;
        }
    }

    Ok(())
}

fn print_response(response: BackendResponse) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("Status: {}", response.status);
    match serde_json::from_str::<Value>(&response.body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", response.body),
    }
    Ok(())
}
