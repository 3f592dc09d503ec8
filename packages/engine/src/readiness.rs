// ABOUTME: Readiness observer racing stdout and stderr for entrypoint sentinel lines
// ABOUTME: First marker wins through a single-slot channel; the loser is cancelled and the wait is bounded

use crate::containers::{ContainerEngine, LineStream, LogOptions, LogStream};
use crate::interaction::Progress;
use futures::StreamExt;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub const SENTINEL_PREFIX: &str = "kloudlite-entrypoint:";
pub const READY_MARKER: &str = "SETUP_COMPLETE";
pub const CRASH_MARKER: &str = "CRASHED";
pub const INSTALLING_MARKER: &str = "INSTALLING_PACKAGES";
pub const INSTALLED_MARKER: &str = "INSTALLING_PACKAGES_DONE";

/// Lines kept per stream when replaying logs after a failure
pub const DIAGNOSTIC_TAIL: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOutcome {
    Ready,
    Crashed,
    TimedOut,
}

impl fmt::Display for ReadinessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Crashed => "crashed",
            Self::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sentinel {
    Ready,
    Crashed,
    InstallingPackages,
    PackagesInstalled,
}

fn parse_sentinel(line: &str) -> Option<Sentinel> {
    let marker = line.trim().strip_prefix(SENTINEL_PREFIX)?.trim();
    match marker {
        READY_MARKER => Some(Sentinel::Ready),
        CRASH_MARKER => Some(Sentinel::Crashed),
        INSTALLING_MARKER => Some(Sentinel::InstallingPackages),
        INSTALLED_MARKER => Some(Sentinel::PackagesInstalled),
        _ => None,
    }
}

pub struct ReadinessObserver {
    engine: Arc<dyn ContainerEngine>,
    timeout: Duration,
    progress: Arc<dyn Progress>,
}

impl ReadinessObserver {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        timeout: Duration,
        progress: Arc<dyn Progress>,
    ) -> Self {
        Self {
            engine,
            timeout,
            progress,
        }
    }

    /// Wait for the dev container entrypoint to report success or a crash.
    /// `since` limits the scan to output produced by the current boot.
    pub async fn await_ready(&self, container_id: &str, since: Option<i64>) -> ReadinessOutcome {
        let (tx, mut rx) = mpsc::channel::<ReadinessOutcome>(1);
        let cancel = CancellationToken::new();

        let mut watchers = Vec::with_capacity(2);
        for stream in [LogStream::Stdout, LogStream::Stderr] {
            let lines = self.engine.log_lines(
                container_id,
                LogOptions {
                    stream,
                    follow: true,
                    since,
                },
            );
            watchers.push(tokio::spawn(watch_stream(
                lines,
                stream,
                tx.clone(),
                cancel.clone(),
                self.progress.clone(),
            )));
        }
        drop(tx);

        let outcome = match tokio::time::timeout(self.timeout, rx.recv()).await {
            Ok(Some(outcome)) => outcome,
            // Both streams ended without a marker: the container exited
            Ok(None) => ReadinessOutcome::Crashed,
            Err(_) => ReadinessOutcome::TimedOut,
        };

        cancel.cancel();
        for watcher in watchers {
            let _ = watcher.await;
        }

        info!("Container {} readiness: {}", container_id, outcome);
        outcome
    }
}

async fn watch_stream(
    mut lines: LineStream,
    stream: LogStream,
    tx: mpsc::Sender<ReadinessOutcome>,
    cancel: CancellationToken,
    progress: Arc<dyn Progress>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = lines.next() => next,
        };

        match next {
            Some(Ok(line)) => match parse_sentinel(&line) {
                Some(Sentinel::Ready) => {
                    // A full slot means the other stream already won
                    let _ = tx.try_send(ReadinessOutcome::Ready);
                    return;
                }
                Some(Sentinel::Crashed) => {
                    let _ = tx.try_send(ReadinessOutcome::Crashed);
                    return;
                }
                Some(Sentinel::InstallingPackages) => {
                    progress.set_message("installing nix packages");
                }
                Some(Sentinel::PackagesInstalled) => {
                    progress.set_message("loading please wait");
                }
                None => trace!("[{}] {}", stream.as_str(), line),
            },
            Some(Err(e)) => {
                warn!("Log stream {} failed: {}", stream.as_str(), e);
                return;
            }
            None => {
                debug!("Log stream {} ended", stream.as_str());
                return;
            }
        }
    }
}

/// Re-read both streams without following and return the tail of each
pub async fn collect_diagnostics(
    engine: &dyn ContainerEngine,
    container_id: &str,
    since: Option<i64>,
    tail: usize,
) -> Vec<String> {
    let mut out = Vec::new();

    for stream in [LogStream::Stdout, LogStream::Stderr] {
        let mut lines = engine.log_lines(
            container_id,
            LogOptions {
                stream,
                follow: false,
                since,
            },
        );

        let mut kept = VecDeque::with_capacity(tail);
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => {
                    if kept.len() == tail {
                        kept.pop_front();
                    }
                    kept.push_back(line);
                }
                Err(e) => {
                    warn!("Failed to replay {}: {}", stream.as_str(), e);
                    break;
                }
            }
        }

        out.extend(
            kept.into_iter()
                .map(|line| format!("[{}] {}", stream.as_str(), line)),
        );
    }

    out
}
