//! Conductor Client CLI
//!
//! Issue calls against a conductor interface from the command line.
//!
//! ## Usage
//!
//! ```bash
//! # Generic call, segments joined with '/'
//! conductor-client --url ws://localhost:3401 call info instances
//!
//! # Zome call
//! conductor-client --url ws://localhost:3401 zome blog-instance blog create_post \
//!     --args '{"content": "hello"}'
//!
//! # Print signals as JSON lines until Ctrl-C
//! conductor-client --url ws://localhost:3401 signals
//!
//! # Discover the interface from the hosting server instead of --url
//! conductor-client --discovery-base-url http://localhost:8888 call info instances
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use conductor_client::{connect, ConnectOpts};
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "conductor-client")]
#[command(about = "Call a Holochain conductor interface over WebSocket")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Conductor interface WebSocket URL
    #[arg(long, env = "CONDUCTOR_URL")]
    url: Option<String>,

    /// Per-phase call timeout in milliseconds (0 = never time out)
    #[arg(long, env = "CONDUCTOR_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Server hosting _dna_connections.json, used when no URL is given
    #[arg(long, env = "CONDUCTOR_DISCOVERY_URL")]
    discovery_base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call a method; several segments are joined with '/'
    Call {
        #[arg(required = true)]
        segments: Vec<String>,

        /// JSON params
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// Call a zome function
    Zome {
        instance_id: String,
        zome: String,
        function: String,

        /// JSON args
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Print signals until interrupted
    Signals,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("conductor_client=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut opts = match &args.config {
        Some(path) => ConnectOpts::load(path)?,
        None => ConnectOpts::default(),
    };

    // Apply CLI overrides
    if args.url.is_some() {
        opts.url = args.url;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        opts.timeout_ms = timeout_ms;
    }
    if let Some(base) = args.discovery_base_url {
        opts.discovery_base_url = base;
    }

    let conn = connect(opts).await?;

    match args.command {
        Command::Call { segments, params } => {
            let params: Value = serde_json::from_str(&params).context("--params is not JSON")?;
            let result = conn.call(&segments)?.timeout(None).call(params).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Zome {
            instance_id,
            zome,
            function,
            args,
        } => {
            let args: Value = serde_json::from_str(&args).context("--args is not JSON")?;
            let result = conn
                .call_zome(instance_id, zome, function)
                .timeout(None)
                .call(args)
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Signals => {
            let mut signals = conn.signals();
            info!("Listening for signals, Ctrl-C to stop");
            loop {
                tokio::select! {
                    signal = signals.recv() => match signal {
                        Some(signal) => println!("{}", signal),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }

    conn.close().await?;
    Ok(())
}
