// src/app.rs

use crate::core::dispatcher::HttpClient;
use crate::core::models::RequestOutcome;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Scanning,
    Finished,
    Interrupted,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanSummary {
    /// Paths that produced an outcome.
    pub probed: usize,
    pub responded: usize,
    /// Paths whose outcome was a `Failure` and were skipped.
    pub skipped: usize,
    /// Paths never dispatched because the session was interrupted.
    pub not_probed: usize,
    pub by_status: BTreeMap<u16, usize>,
    pub by_failure: BTreeMap<String, usize>,
}

impl ScanSummary {
    fn record(&mut self, outcome: &RequestOutcome) {
        self.probed += 1;
        match outcome {
            RequestOutcome::Success(response) => {
                self.responded += 1;
                *self.by_status.entry(response.status).or_default() += 1;
            }
            RequestOutcome::Failure(failure) => {
                self.skipped += 1;
                *self.by_failure.entry(failure.reason.to_string()).or_default() += 1;
            }
        }
    }
}

/// One probed path, as handed to the output sink.
#[derive(Debug, Serialize)]
pub struct ProbeRecord {
    pub path: String,
    pub url: String,
    #[serde(flatten)]
    pub outcome: RequestOutcome,
}

/// Probes a list of paths on one target through a shared client.
pub struct ProbeSession {
    client: HttpClient,
    target: Url,
    threads: usize,
    sink_open: bool,
    pub state: SessionState,
    pub summary: ScanSummary,
}

impl ProbeSession {
    pub fn new(client: HttpClient, mut target: Url, threads: usize) -> Self {
        // Without a trailing slash `join` would replace the last segment.
        if !target.path().ends_with('/') {
            let path = format!("{}/", target.path());
            target.set_path(&path);
        }
        Self {
            client,
            target,
            threads: threads.max(1),
            sink_open: true,
            state: SessionState::Idle,
            summary: ScanSummary::default(),
        }
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Resolves `path` below the target URL.
    pub fn resolve(&self, path: &str) -> String {
        match self.target.join(path.trim_start_matches('/')) {
            Ok(url) => url.to_string(),
            // Let the dispatcher report it as an invalid request.
            Err(_) => path.to_string(),
        }
    }

    /// Stops dispatch: pending probes fail fast and no new ones start.
    pub fn interrupt(&self) {
        self.client.close();
    }

    /// Probes every path with at most `threads` requests in flight and passes
    /// each record to `emit` as soon as it completes. Failures are counted and
    /// skipped, never fatal. If `emit` breaks, the session is interrupted and
    /// no further records are emitted.
    pub async fn run<F>(&mut self, paths: Vec<String>, mut emit: F) -> &ScanSummary
    where
        F: FnMut(&ProbeRecord) -> ControlFlow<()>,
    {
        self.state = SessionState::Scanning;
        info!(target = %self.target, paths = paths.len(), threads = self.threads, "Starting probe session.");

        let slots = Arc::new(Semaphore::new(self.threads));
        let mut tasks = JoinSet::new();
        let total = paths.len();

        for (index, path) in paths.into_iter().enumerate() {
            if self.client.is_closed() {
                self.summary.not_probed = total - index;
                break;
            }
            let Ok(permit) = slots.clone().acquire_owned().await else {
                break;
            };
            let client = self.client.clone();
            let url = self.resolve(&path);
            tasks.spawn(async move {
                let outcome = client.get(&url).await;
                drop(permit);
                ProbeRecord { path, url, outcome }
            });

            while let Some(joined) = tasks.try_join_next() {
                self.collect(joined, &mut emit);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.collect(joined, &mut emit);
        }

        self.state = if self.client.is_closed() { SessionState::Interrupted } else { SessionState::Finished };
        info!(
            probed = self.summary.probed,
            responded = self.summary.responded,
            skipped = self.summary.skipped,
            "Probe session finished."
        );
        &self.summary
    }

    fn collect<F>(&mut self, joined: Result<ProbeRecord, tokio::task::JoinError>, emit: &mut F)
    where
        F: FnMut(&ProbeRecord) -> ControlFlow<()>,
    {
        match joined {
            Ok(record) => {
                debug!(path = %record.path, success = record.outcome.is_success(), "Probe completed.");
                self.summary.record(&record.outcome);
                if self.sink_open && emit(&record).is_break() {
                    warn!(path = %record.path, "Output sink closed, interrupting session.");
                    self.sink_open = false;
                    self.interrupt();
                }
            }
            Err(e) => error!(error = %e, "Probe task panicked."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ClientConfig;
    use crate::core::models::FailureReason;
    use crate::core::transport::mock::{ScriptedTransport, Step};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn session(transport: &Arc<ScriptedTransport>, target: &str) -> ProbeSession {
        let config = ClientConfig::builder().max_retries(0).build().unwrap();
        let client = HttpClient::with_transport(config, transport.clone(), &mut StdRng::seed_from_u64(3)).unwrap();
        ProbeSession::new(client, Url::parse(target).unwrap(), 4)
    }

    #[test]
    fn paths_resolve_below_the_target() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(200)));
        let session = session(&transport, "https://target.test/app");
        assert_eq!(session.target().as_str(), "https://target.test/app/");
        assert_eq!(session.resolve("/admin"), "https://target.test/app/admin");
        assert_eq!(session.resolve("backup.zip"), "https://target.test/app/backup.zip");
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_skipped_and_the_scan_continues() {
        let transport = Arc::new(ScriptedTransport::sequence(
            [Step::Status(200), Step::Fault(FailureReason::Other), Step::Status(404)],
            Step::Status(403),
        ));
        let mut session = session(&transport, "http://target.test/");
        let paths: Vec<String> = ["admin", "login", "backup", ".git/HEAD"].iter().map(|p| p.to_string()).collect();

        let mut emitted = Vec::new();
        let summary = session
            .run(paths, |record| {
                emitted.push(record.path.clone());
                ControlFlow::Continue(())
            })
            .await
            .clone();

        assert_eq!(summary.probed, 4);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.responded, 3);
        assert_eq!(summary.by_failure.get("other"), Some(&1));
        assert_eq!(emitted.len(), 4);
        assert_eq!(session.state, SessionState::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_session_stops_dispatching() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(200)));
        let mut session = session(&transport, "http://target.test/");
        session.interrupt();

        let summary = session.run(vec!["a".into(), "b".into()], |_| ControlFlow::Continue(())).await.clone();
        assert_eq!(summary.not_probed, 2);
        assert_eq!(summary.probed, 0);
        assert_eq!(transport.attempts(), 0);
        assert_eq!(session.state, SessionState::Interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn broken_sink_stops_the_session() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(200)));
        let mut session = session(&transport, "http://target.test/");
        let paths: Vec<String> = (0..20).map(|n| format!("dir{n}")).collect();

        let mut emitted = 0;
        let summary = session
            .run(paths, |_| {
                emitted += 1;
                ControlFlow::Break(())
            })
            .await
            .clone();

        assert_eq!(emitted, 1);
        assert_eq!(session.state, SessionState::Interrupted);
        assert_eq!(summary.probed + summary.not_probed, 20);
        assert!(summary.not_probed > 0);
        assert!(transport.attempts() < 20);
    }

    #[test]
    fn records_serialize_flat() {
        let record = ProbeRecord {
            path: "admin".into(),
            url: "http://target.test/admin".into(),
            outcome: RequestOutcome::failed(FailureReason::Timeout, "slow", 1),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["path"], "admin");
        assert_eq!(json["outcome"], "failure");
        assert_eq!(json["reason"], "timeout");
    }
}
