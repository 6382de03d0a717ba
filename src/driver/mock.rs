//! In-process driver (feature `driver-mock`) that simulates handshake latency
//! and lets tests inject open, query and close failures.
//!
//! Recognised `--driver-opt` keys:
//! `connect_latency_ms`, `query_latency_ms`, `auth_latency_ms`,
//! `release_version`, `rows`, `require_credentials`, `fail_open_at`,
//! `fail_query_at`, `fail_close_at` (the last three are 1-based counts across
//! the whole run).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::sleep;

use super::config::param;
use super::{ConnectionFactory, Connector, Credentials, DriverError, DriverOptions, Rows, Session};

pub const DEFAULT_RELEASE_VERSION: &str = "4.0.0.6816";

#[derive(Clone, Debug)]
pub struct MockOptions {
    pub connect_latency: Duration,
    pub query_latency: Duration,
    pub auth_latency: Duration,
    pub release_version: String,
    pub rows: usize,
    pub require_credentials: bool,
    pub fail_open_at: Option<usize>,
    pub fail_query_at: Option<usize>,
    pub fail_close_at: Option<usize>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            connect_latency: Duration::from_millis(5),
            query_latency: Duration::from_millis(1),
            auth_latency: Duration::ZERO,
            release_version: DEFAULT_RELEASE_VERSION.to_string(),
            rows: 1,
            require_credentials: false,
            fail_open_at: None,
            fail_query_at: None,
            fail_close_at: None,
        }
    }
}

impl MockOptions {
    pub fn from_driver_options(opts: &DriverOptions) -> Result<Self, DriverError> {
        let mut out = Self::default();
        if let Some(ms) = param::<u64>(opts, "connect_latency_ms")? {
            out.connect_latency = Duration::from_millis(ms);
        }
        if let Some(ms) = param::<u64>(opts, "query_latency_ms")? {
            out.query_latency = Duration::from_millis(ms);
        }
        if let Some(ms) = param::<u64>(opts, "auth_latency_ms")? {
            out.auth_latency = Duration::from_millis(ms);
        }
        if let Some(v) = opts.params.get("release_version") {
            out.release_version = v.clone();
        }
        if let Some(n) = param::<usize>(opts, "rows")? {
            out.rows = n;
        }
        if let Some(b) = param::<bool>(opts, "require_credentials")? {
            out.require_credentials = b;
        }
        out.fail_open_at = param::<usize>(opts, "fail_open_at")?;
        out.fail_query_at = param::<usize>(opts, "fail_query_at")?;
        out.fail_close_at = param::<usize>(opts, "fail_close_at")?;
        Ok(out)
    }
}

/// Run-wide counters, shared by every connector the factory hands out.
#[derive(Debug, Default)]
pub struct MockCounters {
    pub opens: AtomicUsize,
    pub queries: AtomicUsize,
    pub row_closes: AtomicUsize,
    pub session_closes: AtomicUsize,
    pub resolutions: AtomicUsize,
}

impl MockCounters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
    pub fn session_closes(&self) -> usize {
        self.session_closes.load(Ordering::SeqCst)
    }
}

pub struct MockFactory {
    options: Arc<MockOptions>,
    counters: Arc<MockCounters>,
}

impl MockFactory {
    pub fn new(options: MockOptions) -> Self {
        Self { options: Arc::new(options), counters: Arc::new(MockCounters::default()) }
    }

    pub fn counters(&self) -> Arc<MockCounters> {
        self.counters.clone()
    }

    fn connector(&self, origin: String) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            origin,
            options: self.options.clone(),
            counters: self.counters.clone(),
        })
    }
}

pub fn factory(opts: DriverOptions) -> Result<Box<dyn ConnectionFactory>, DriverError> {
    let options = MockOptions::from_driver_options(&opts)?;
    tracing::debug!(?options, "mock driver configured");
    Ok(Box::new(MockFactory::new(options)))
}

#[async_trait::async_trait]
impl ConnectionFactory for MockFactory {
    fn requires_credentials(&self) -> bool {
        self.options.require_credentials
    }

    async fn from_bundle(&self, path: &Path) -> Result<Arc<dyn Connector>, DriverError> {
        self.counters.resolutions.fetch_add(1, Ordering::SeqCst);
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| DriverError::Bundle(format!("{}: {e}", path.display())))?;
        if !meta.is_file() {
            return Err(DriverError::Bundle(format!("{} is not a file", path.display())));
        }
        sleep(self.options.auth_latency).await;
        Ok(self.connector(format!("bundle {}", path.display())))
    }

    async fn from_token(
        &self,
        api_url: &str,
        database_id: &str,
        token: &str,
    ) -> Result<Arc<dyn Connector>, DriverError> {
        self.counters.resolutions.fetch_add(1, Ordering::SeqCst);
        if !(api_url.starts_with("https://") || api_url.starts_with("http://")) {
            return Err(DriverError::Token(format!("unsupported API URL '{api_url}'")));
        }
        if token.is_empty() {
            return Err(DriverError::Token("empty token".into()));
        }
        sleep(self.options.auth_latency).await;
        Ok(self.connector(format!("database {database_id} via {api_url}")))
    }
}

struct MockConnector {
    origin: String,
    options: Arc<MockOptions>,
    counters: Arc<MockCounters>,
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn open_session(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn Session>, DriverError> {
        let nth = self.counters.opens.fetch_add(1, Ordering::SeqCst) + 1;
        sleep(self.options.connect_latency).await;
        if self.options.require_credentials && credentials.is_none() {
            return Err(DriverError::Connect("authentication required".into()));
        }
        if self.options.fail_open_at == Some(nth) {
            return Err(DriverError::Connect(format!("injected handshake failure on open #{nth}")));
        }
        Ok(Box::new(MockSession {
            options: self.options.clone(),
            counters: self.counters.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!("mock cluster ({})", self.origin)
    }
}

struct MockSession {
    options: Arc<MockOptions>,
    counters: Arc<MockCounters>,
}

#[async_trait::async_trait]
impl Session for MockSession {
    async fn query(&mut self, statement: &str) -> Box<dyn Rows> {
        let nth = self.counters.queries.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(statement, nth, "mock query");
        sleep(self.options.query_latency).await;
        if self.options.fail_query_at == Some(nth) {
            return Box::new(MockRows {
                values: Vec::new().into_iter(),
                query_error: Some(format!("injected execution failure on query #{nth}")),
                counters: self.counters.clone(),
                fail_close_at: self.options.fail_close_at,
            });
        }
        let values = (0..self.options.rows)
            .map(|_| self.options.release_version.clone())
            .collect::<Vec<_>>();
        Box::new(MockRows {
            values: values.into_iter(),
            query_error: None,
            counters: self.counters.clone(),
            fail_close_at: self.options.fail_close_at,
        })
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        self.counters.session_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockRows {
    values: std::vec::IntoIter<String>,
    // Surfaced on close, the way drivers defer execution errors
    query_error: Option<String>,
    counters: Arc<MockCounters>,
    fail_close_at: Option<usize>,
}

#[async_trait::async_trait]
impl Rows for MockRows {
    async fn next_value(&mut self) -> Option<String> {
        self.values.next()
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        let nth = self.counters.row_closes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = self.query_error {
            return Err(DriverError::Query(message));
        }
        if self.fail_close_at == Some(nth) {
            return Err(DriverError::Close(format!("injected iterator failure on close #{nth}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::config::parse_driver_kv;

    #[test]
    fn options_from_kv() {
        let opts = parse_driver_kv(&[
            "connect_latency_ms=0".into(),
            "rows=3".into(),
            "require_credentials=true".into(),
            "fail_open_at=2".into(),
            "fail_query_at=4".into(),
        ])
        .unwrap();
        let m = MockOptions::from_driver_options(&opts).unwrap();
        assert_eq!(m.connect_latency, Duration::ZERO);
        assert_eq!(m.rows, 3);
        assert!(m.require_credentials);
        assert_eq!(m.fail_open_at, Some(2));
        assert_eq!(m.fail_query_at, Some(4));
        assert_eq!(m.fail_close_at, None);
        assert_eq!(m.release_version, DEFAULT_RELEASE_VERSION);
    }

    #[tokio::test]
    async fn missing_bundle_names_path() {
        let f = MockFactory::new(MockOptions::default());
        let err = f.from_bundle(Path::new("/nonexistent/scb.zip")).await.err().unwrap();
        assert!(err.to_string().contains("/nonexistent/scb.zip"));
    }

    #[tokio::test]
    async fn open_query_close() {
        let f = MockFactory::new(MockOptions { rows: 2, ..MockOptions::default() });
        let conn = f.from_token("https://api.example", "db", "AstraCS:x").await.unwrap();
        let mut session = conn.open_session(None).await.unwrap();
        let mut rows = session.query("SELECT release_version FROM system.local").await;
        assert_eq!(rows.next_value().await.as_deref(), Some(DEFAULT_RELEASE_VERSION));
        assert!(rows.next_value().await.is_some());
        assert!(rows.next_value().await.is_none());
        rows.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(f.counters().opens(), 1);
        assert_eq!(f.counters().session_closes(), 1);
    }

    #[tokio::test]
    async fn query_failure_surfaces_on_close() {
        let f = MockFactory::new(MockOptions { fail_query_at: Some(1), ..MockOptions::default() });
        let conn = f.from_token("https://api.example", "db", "t").await.unwrap();
        let mut session = conn.open_session(None).await.unwrap();
        let mut rows = session.query("SELECT release_version FROM system.local").await;
        assert!(rows.next_value().await.is_none());
        assert!(matches!(rows.close().await, Err(DriverError::Query(_))));
    }

    #[tokio::test]
    async fn credentials_enforced() {
        let f = MockFactory::new(MockOptions { require_credentials: true, ..MockOptions::default() });
        let conn = f.from_token("https://api.example", "db", "t").await.unwrap();
        assert!(conn.open_session(None).await.is_err());
        let creds = Credentials { username: "u".into(), password: "p".into() };
        assert!(conn.open_session(Some(&creds)).await.is_ok());
    }
}
