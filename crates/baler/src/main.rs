//! # baler
//!
//! Concatenates many small stored objects into larger block objects.
//!
//! Reads a single JSON request from a file (or stdin), dispatches the one
//! action it selects, and prints the JSON response. The `LOG_LEVEL`
//! environment variable selects log verbosity.
//!
//! ## Usage
//!
//! ```bash
//! # Run a request against a local object-store directory
//! baler --storage-root /var/data/objects --request request.json
//!
//! # Or stream the request through stdin
//! baler --storage-root /var/data/objects < request.json
//! ```

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;

use baler::{Handler, Request};
use baler_core::credentials::StaticBroker;
use baler_core::observability::{init_logging, LogFormat};
use baler_core::FsBackend;

#[derive(Debug, Parser)]
#[command(name = "baler")]
#[command(about = "Concatenates small stored objects into larger blocks")]
#[command(version)]
struct Args {
    /// Path to a JSON request file; reads stdin when omitted.
    #[arg(long)]
    request: Option<PathBuf>,

    /// Root directory of the local object store backend.
    #[arg(long, default_value = ".")]
    storage_root: PathBuf,

    /// Emit human-readable logs instead of JSON.
    #[arg(long)]
    pretty_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(if args.pretty_logs {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });

    let raw = match &args.request {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading request from {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("reading request from stdin")?;
            raw
        }
    };
    let request: Request = serde_json::from_str(&raw).context("malformed request")?;

    let handler = Handler::new(
        Arc::new(FsBackend::new(args.storage_root.clone())),
        Arc::new(StaticBroker),
    );

    let response = handler.handle(&request).await?;

    let rendered = serde_json::to_string_pretty(&response).context("encoding response")?;
    println!("{rendered}");
    Ok(())
}
