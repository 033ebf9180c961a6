// src/main.rs

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use std::io::Write;
use std::ops::ControlFlow;
use tracing::{info, warn};
use url::Url;
use vanguard_dispatch::app::ProbeSession;
use vanguard_dispatch::{ClientConfig, HttpClient, logging};

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let log_path = logging::initialize_logging(cli.verbose)?;
    info!(log = %log_path.display(), "Logging initialized.");

    // --- Setup ---
    let config = ClientConfig::try_from(cli.client_options()?)?;
    let client = HttpClient::new(config)?;
    let target = Url::parse(&cli.target_url()).wrap_err_with(|| format!("invalid target `{}`", cli.target))?;
    let paths = cli.probe_paths()?;

    // Ctrl-C closes the client; in-flight probes end as `client_closed`.
    let interrupt = client.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, closing client.");
            interrupt.close();
        }
    });

    // --- Probe ---
    let mut session = ProbeSession::new(client.clone(), target, cli.threads);
    let stdout = std::io::stdout();
    let summary = session
        .run(paths, |record| {
            let line = match serde_json::to_string(record) {
                Ok(line) => line,
                Err(e) => {
                    warn!(path = %record.path, error = %e, "Failed to serialize record.");
                    return ControlFlow::Continue(());
                }
            };
            match writeln!(stdout.lock(), "{line}") {
                Ok(()) => ControlFlow::Continue(()),
                Err(e) => {
                    warn!(error = %e, "Cannot write to stdout, stopping.");
                    ControlFlow::Break(())
                }
            }
        })
        .await
        .clone();

    client.close();

    // --- Report ---
    let report = serde_json::json!({
        "state": session.state,
        "summary": summary,
        "stats": client.stats(),
    });
    eprintln!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
