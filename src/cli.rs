// src/cli.rs

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};
use vanguard_dispatch::ClientOptions;

#[derive(Debug, Parser)]
#[command(name = "vanguard-dispatch")]
#[command(about = "Probe paths on a web target through a paced, retrying HTTP client", long_about = None)]
pub struct Cli {
    /// Target URL or host (https:// is assumed when no scheme is given)
    pub target: String,

    /// Paths to probe below the target
    pub paths: Vec<String>,

    /// File with one path per line (`#` starts a comment)
    #[arg(long, short)]
    pub wordlist: Option<PathBuf>,

    /// JSON file with client options; flags override its values
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Per-attempt timeout in seconds
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Fixed User-Agent (default: a random browser identity)
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Proxy URL (http, https, socks5)
    #[arg(long)]
    pub proxy: Option<String>,

    /// Delay in seconds before each request
    #[arg(long)]
    pub delay: Option<f64>,

    /// Retries after the first attempt
    #[arg(long)]
    pub retries: Option<u32>,

    /// Verify TLS certificates
    #[arg(long)]
    pub verify_tls: bool,

    /// Allow POST requests to be retried
    #[arg(long)]
    pub retry_post: bool,

    /// Requests in flight at once
    #[arg(long, short, default_value_t = 50)]
    pub threads: usize,

    /// Mirror logs to stderr
    #[arg(long, short)]
    pub verbose: bool,
}

impl Cli {
    /// Options from `--config` (or defaults) with command-line flags applied on top.
    pub fn client_options(&self) -> Result<ClientOptions> {
        let mut options = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .wrap_err_with(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&raw).wrap_err_with(|| format!("parsing config {}", path.display()))?
            }
            None => ClientOptions::default(),
        };

        if let Some(timeout) = self.timeout {
            options.timeout = timeout;
        }
        if let Some(user_agent) = &self.user_agent {
            options.identity = user_agent.clone();
        }
        if let Some(proxy) = &self.proxy {
            options.proxy = Some(proxy.clone());
        }
        if let Some(delay) = self.delay {
            options.delay = delay;
        }
        if let Some(retries) = self.retries {
            options.max_retries = retries;
        }
        options.verify_tls |= self.verify_tls;
        options.retry_post |= self.retry_post;
        Ok(options)
    }

    /// The target with a scheme, as the session expects it.
    pub fn target_url(&self) -> String {
        let target = self.target.trim();
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!("https://{target}")
        }
    }

    /// Positional paths followed by the wordlist entries. Falls back to `/`.
    pub fn probe_paths(&self) -> Result<Vec<String>> {
        let mut paths = self.paths.clone();
        if let Some(wordlist) = &self.wordlist {
            paths.extend(read_wordlist(wordlist)?);
        }
        if paths.is_empty() {
            paths.push("/".to_string());
        }
        Ok(paths)
    }
}

fn read_wordlist(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path).wrap_err_with(|| format!("reading wordlist {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}
