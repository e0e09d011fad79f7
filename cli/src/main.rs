//! `updater` — command-line OTA update client.
//!
//! Checks the device cloud for a firmware update, downloads and verifies it,
//! optionally applies it via a script, and reports the result:
//!
//! ```text
//! updater --host https://cloud.example.com --product ProductID --token Token \
//!     --device DeviceID --version 1.2.3 --cmd ./apply.sh model=pro region=eu
//! ```
//!
//! Diagnostics go to stderr through `tracing`; stdout carries only the
//! outcome. Exit codes: 0 on success (including "no update"), 1 on any
//! failure, 2 on usage errors.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use updater_core::{DeviceContext, TlsConnector, UpdateClient, UpdateError, UpdateOutcome};

#[derive(Parser, Debug)]
#[command(name = "updater", about = "Check for, download, verify, and apply device updates")]
struct Args {
    /// Device cloud endpoint, e.g. https://cloud.example.com
    #[arg(long)]
    host: String,

    /// Product identifier from the cloud's token list
    #[arg(long)]
    product: String,

    /// CloudAPI access token
    #[arg(long)]
    token: String,

    /// Unique device identifier
    #[arg(long)]
    device: String,

    /// Current device firmware version
    #[arg(long)]
    version: String,

    /// Path to save the downloaded update image
    #[arg(long, default_value = "update.bin")]
    file: PathBuf,

    /// Script invoked with the image path to apply the update
    #[arg(long)]
    cmd: Option<PathBuf>,

    /// PEM bundle of CA certificates replacing the system trust store
    #[arg(long, value_name = "PEM")]
    ca_bundle: Option<PathBuf>,

    /// Delete the downloaded image when checksum verification fails
    #[arg(long)]
    remove_on_mismatch: bool,

    /// Trace execution
    #[arg(short, long)]
    verbose: bool,

    /// Only report errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Extra device properties for the distribution policy
    #[arg(value_name = "KEY=VALUE", value_parser = parse_property)]
    properties: Vec<(String, String)>,
}

fn parse_property(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Args) -> Result<UpdateOutcome, UpdateError> {
    let connector = match &args.ca_bundle {
        Some(path) => TlsConnector::with_ca_bundle(path)?,
        None => TlsConnector::new()?,
    };
    let ctx = DeviceContext {
        host: args.host,
        product: args.product,
        token: args.token,
        device: args.device,
        version: args.version,
        properties: args.properties,
        image_path: args.file,
        apply_script: args.cmd,
        remove_on_mismatch: args.remove_on_mismatch,
    };
    UpdateClient::new(connector).run(&ctx)
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);
    let quiet = args.quiet;

    match run(args) {
        Ok(UpdateOutcome::UpToDate) => {
            if !quiet {
                println!("No update available");
            }
            ExitCode::SUCCESS
        }
        Ok(UpdateOutcome::Applied { version, script_status }) => {
            if !quiet {
                match script_status {
                    Some(0) => println!("Update {version} downloaded, verified, and applied"),
                    Some(code) => {
                        println!("Update {version} downloaded and verified; apply script exited {code}")
                    }
                    None => println!("Update {version} downloaded and verified"),
                }
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
