//! Session probe
//!
//! Sends GET requests through an [`AuthenticatedClient`] and reports the
//! outcome of each one. Useful for checking a refresh endpoint setup: start
//! with a stale `--token` and watch several concurrent requests recover
//! through a single refresh.
//!
//! # Usage
//!
//! ```bash
//! # Config from a file, overridable with SESSION_* variables
//! session-probe --config session.yaml --token "$STALE" /children /groups /feed
//!
//! # Ten concurrent requests, refresh events logged
//! SESSION_PROBE_REFRESH=... session-probe -vv --concurrency 10 /feed
//! ```
//!
//! Exit status is 0 when every request got a 2xx answer, 2 when the session
//! expired and 1 for any other failure.

// CLI tools are expected to print to stdout/stderr
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use session_auth::{
    AccessToken, AuthenticatedClient, DEFAULT_ENV_PREFIX, LoggingMetrics, RefreshCredential,
    SessionClientConfig, SharedRefreshCredential,
};
use session_http::RequestDescriptor;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::report::{Outcome, Summary};

/// Environment variable holding the refresh credential when
/// `--refresh-credential` is not given.
const REFRESH_CREDENTIAL_ENV: &str = "SESSION_PROBE_REFRESH";

/// Send authenticated requests and report how each one ended
#[derive(Parser, Debug)]
#[command(name = "session-probe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Paths or absolute URLs to GET; relative ones use `base_url`
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<String>,

    /// YAML config file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Prefix of the environment variables layered over the config
    #[arg(long, default_value = DEFAULT_ENV_PREFIX)]
    env_prefix: String,

    /// Access token to start with (may be stale)
    #[arg(long)]
    token: Option<String>,

    /// Refresh credential; falls back to $SESSION_PROBE_REFRESH
    #[arg(long)]
    refresh_credential: Option<String>,

    /// Requests in flight at once
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Send every path this many times
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// Print the results as JSON
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(format!(
            "session_probe={level},session_auth={level},session_http={level},warn"
        ))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("a global tracing subscriber is already installed");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(summary) => summary.exit_code(),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<Summary> {
    let config = SessionClientConfig::load(cli.config.as_deref(), &cli.env_prefix)
        .context("failed to load session config")?;

    let credential = SharedRefreshCredential::new();
    if let Some(value) = cli
        .refresh_credential
        .or_else(|| std::env::var(REFRESH_CREDENTIAL_ENV).ok())
    {
        credential.set(Some(RefreshCredential::new(value)));
    }

    let scope = CancellationToken::new();
    let client = AuthenticatedClient::from_config(&config, Arc::new(credential))
        .context("failed to build session client")?
        .terminator(Arc::new(scope.clone()))
        .metrics(Arc::new(LoggingMetrics))
        .build();

    if let Some(token) = cli.token {
        client.sign_in(AccessToken::new(token)).await;
    }

    tracing::info!(
        refresh_url = %config.refresh_url,
        requests = cli.paths.len() * cli.repeat,
        concurrency = cli.concurrency,
        "probing"
    );

    let targets: Vec<String> = std::iter::repeat_n(cli.paths, cli.repeat)
        .flatten()
        .collect();
    let outcomes: Vec<Outcome> = futures::stream::iter(targets)
        .map(|path| {
            let client = client.clone();
            let scope = scope.clone();
            async move {
                tokio::select! {
                    result = client.send(RequestDescriptor::get(path.clone())) => {
                        Outcome::from_result(path, result).await
                    }
                    () = scope.cancelled() => Outcome::cancelled(path),
                }
            }
        })
        .buffer_unordered(cli.concurrency.max(1))
        .collect()
        .await;

    let summary = Summary::new(outcomes, scope.is_cancelled());
    if cli.json {
        println!("{}", summary.to_json()?);
    } else {
        summary.print();
    }
    Ok(summary)
}
