//! Worker fan-out: every worker opens its own session, times the handshake,
//! runs one diagnostic query and returns a [`WorkerResult`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Barrier, Semaphore};

use crate::config::RunConfig;
use crate::credentials::ResolvedConnection;
use crate::driver::DriverError;

/// What a failed session open does to the rest of the run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort all in-flight workers and fail the run.
    #[default]
    FailFast,
    /// Record the failure on the worker and keep going.
    Isolate,
}

#[derive(Clone, Debug)]
pub struct HarnessConfig {
    pub workers: usize,
    pub query: String,
    pub failure_policy: FailurePolicy,
    pub max_in_flight: Option<usize>,
}

impl From<&RunConfig> for HarnessConfig {
    fn from(cfg: &RunConfig) -> Self {
        Self {
            workers: cfg.workers,
            query: cfg.query.clone(),
            failure_policy: cfg.failure_policy,
            max_in_flight: cfg.max_in_flight,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum HarnessError {
    #[error("worker {worker}: unable to connect session: {source}")]
    ConnectionEstablishment {
        worker: usize,
        #[source]
        source: DriverError,
    },
    #[error("worker {worker} panicked: {message}")]
    WorkerPanicked { worker: usize, message: String },
}

#[derive(Debug)]
pub struct WorkerResult {
    /// Zero-based launch index.
    pub index: usize,
    pub elapsed_open: Duration,
    /// Last scalar seen while draining the result.
    pub value: Option<String>,
    pub rows: usize,
    pub open_error: Option<DriverError>,
    pub close_error: Option<DriverError>,
}

impl WorkerResult {
    /// One-based number used in operator-facing output.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn connected(&self) -> bool {
        self.open_error.is_none()
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub total_elapsed: Duration,
    /// Ordered by worker index.
    pub results: Vec<WorkerResult>,
}

impl RunReport {
    pub fn open_failures(&self) -> usize {
        self.results.iter().filter(|r| !r.connected()).count()
    }

    pub fn close_warnings(&self) -> usize {
        self.results.iter().filter(|r| r.close_error.is_some()).count()
    }
}

/// Launches `cfg.workers` workers at once and waits for all of them.
pub async fn run(conn: &ResolvedConnection, cfg: &HarnessConfig) -> Result<RunReport, HarnessError> {
    let started_at = Utc::now();
    let start = Instant::now();
    let n = cfg.workers;
    tracing::info!(
        workers = n,
        policy = ?cfg.failure_policy,
        max_in_flight = ?cfg.max_in_flight,
        cluster = %conn.describe(),
        "launching workers"
    );

    let query: Arc<str> = Arc::from(cfg.query.as_str());
    let limiter = cfg
        .max_in_flight
        .map(|permits| Arc::new(Semaphore::new(permits.clamp(1, Semaphore::MAX_PERMITS))));
    let gate = Arc::new(Barrier::new(n.max(1)));

    let mut inflight = FuturesUnordered::new();
    let mut aborts = Vec::with_capacity(n);
    for index in 0..n {
        let conn = conn.clone();
        let query = query.clone();
        let limiter = limiter.clone();
        let gate = gate.clone();
        let handle = tokio::spawn(async move {
            gate.wait().await;
            let _permit = match limiter {
                Some(s) => s.acquire_owned().await.ok(),
                None => None,
            };
            run_worker(index, &conn, &query).await
        });
        aborts.push(handle.abort_handle());
        inflight.push(handle.map(move |joined| (index, joined)));
    }

    let abort_all = |aborts: &[tokio::task::AbortHandle]| aborts.iter().for_each(|h| h.abort());

    let mut slots: Vec<Option<WorkerResult>> = (0..n).map(|_| None).collect();
    while let Some((index, joined)) = inflight.next().await {
        let mut result = match joined {
            Ok(r) => r,
            Err(e) => {
                abort_all(&aborts);
                return Err(HarnessError::WorkerPanicked { worker: index + 1, message: e.to_string() });
            }
        };
        if cfg.failure_policy == FailurePolicy::FailFast {
            if let Some(source) = result.open_error.take() {
                abort_all(&aborts);
                return Err(HarnessError::ConnectionEstablishment { worker: result.number(), source });
            }
        }
        slots[index] = Some(result);
    }

    let results: Vec<WorkerResult> = slots.into_iter().flatten().collect();
    let total_elapsed = start.elapsed();
    tracing::info!(
        workers = results.len(),
        failures = results.iter().filter(|r| !r.connected()).count(),
        ?total_elapsed,
        "all workers finished"
    );
    Ok(RunReport { started_at, total_elapsed, results })
}

async fn run_worker(index: usize, conn: &ResolvedConnection, query: &str) -> WorkerResult {
    let worker = index + 1;
    let start = Instant::now();
    let opened = conn.open_session().await;
    let elapsed_open = start.elapsed();

    let mut session = match opened {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(worker, error = %e, "unable to connect session");
            return WorkerResult {
                index,
                elapsed_open,
                value: None,
                rows: 0,
                open_error: Some(e),
                close_error: None,
            };
        }
    };
    tracing::debug!(worker, ?elapsed_open, "session established");

    let mut rows = session.query(query).await;
    let mut value = None;
    let mut count = 0usize;
    while let Some(v) = rows.next_value().await {
        count += 1;
        value = Some(v);
    }

    let close_error = rows.close().await.err();
    if let Some(e) = &close_error {
        tracing::warn!(worker, error = %e, "error running query");
    }
    if let Err(e) = session.close().await {
        tracing::warn!(worker, error = %e, "error closing session");
    }

    WorkerResult {
        index,
        elapsed_open,
        value,
        rows: count,
        open_error: None,
        close_error,
    }
}
