//! Credential-mode resolution.
//!
//! Runs once, before any worker is spawned. Bundle path wins over token; a
//! token needs a database ID; with neither the run cannot start.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::{ConfigError, RunConfig};
use crate::driver::{ConnectionFactory, Connector, Credentials, DriverError, Session};

/// Principal paired with the token as secret in token mode.
pub const TOKEN_PRINCIPAL: &str = "token";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthMode {
    Bundle {
        path: PathBuf,
    },
    Token {
        api_url: String,
        database_id: String,
        token: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Bundle,
    Token,
}

impl AuthMode {
    pub fn kind(&self) -> AuthKind {
        match self {
            AuthMode::Bundle { .. } => AuthKind::Bundle,
            AuthMode::Token { .. } => AuthKind::Token,
        }
    }
}

impl fmt::Display for AuthKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthKind::Bundle => f.write_str("bundle"),
            AuthKind::Token => f.write_str("token"),
        }
    }
}

/// Applies the bundle > token > error precedence without touching the network.
pub fn select_mode(cfg: &RunConfig) -> Result<AuthMode, ConfigError> {
    if let Some(path) = &cfg.bundle_path {
        return Ok(AuthMode::Bundle { path: path.clone() });
    }
    if let Some(token) = &cfg.token {
        let database_id = cfg.database_id.clone().ok_or(ConfigError::MissingDatabaseId)?;
        return Ok(AuthMode::Token {
            api_url: cfg.api_url.clone(),
            database_id,
            token: token.clone(),
        });
    }
    Err(ConfigError::NoCredentialSource)
}

/// Everything a worker needs to open a session. Cheap to clone.
#[derive(Clone)]
pub struct ResolvedConnection {
    kind: AuthKind,
    connector: Arc<dyn Connector>,
    credentials: Option<Credentials>,
}

impl fmt::Debug for ResolvedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConnection")
            .field("kind", &self.kind)
            .field("connector", &self.connector.describe())
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl ResolvedConnection {
    pub fn new(kind: AuthKind, connector: Arc<dyn Connector>, credentials: Option<Credentials>) -> Self {
        Self { kind, connector, credentials }
    }

    pub fn kind(&self) -> AuthKind {
        self.kind
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn describe(&self) -> String {
        self.connector.describe()
    }

    pub async fn open_session(&self) -> Result<Box<dyn Session>, DriverError> {
        self.connector.open_session(self.credentials.as_ref()).await
    }
}

async fn with_deadline<T>(
    what: String,
    timeout: Duration,
    fut: impl Future<Output = Result<T, DriverError>>,
) -> Result<Result<T, DriverError>, ConfigError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ConfigError::AuthTimeout { what, timeout })
}

fn bundle_credentials(
    cfg: &RunConfig,
    path: &Path,
    factory: &dyn ConnectionFactory,
) -> Result<Option<Credentials>, ConfigError> {
    match (&cfg.username, &cfg.password) {
        (Some(username), Some(password)) => Ok(Some(Credentials {
            username: username.clone(),
            password: password.clone(),
        })),
        _ if factory.requires_credentials() => Err(ConfigError::MissingCredentials(path.to_path_buf())),
        (Some(_), None) | (None, Some(_)) => {
            tracing::warn!(
                username = cfg.username.is_some(),
                password = cfg.password.is_some(),
                "username and password must be given together; connecting without credentials"
            );
            Ok(None)
        }
        (None, None) => Ok(None),
    }
}

/// Resolves the run's credential mode into a connection every worker shares.
pub async fn resolve(
    cfg: &RunConfig,
    factory: &dyn ConnectionFactory,
) -> Result<ResolvedConnection, ConfigError> {
    let mode = select_mode(cfg)?;
    match mode {
        AuthMode::Bundle { path } => {
            let credentials = bundle_credentials(cfg, &path, factory)?;
            tracing::info!(bundle = %path.display(), timeout = ?cfg.auth_timeout, "loading secure connect bundle");
            let connector = with_deadline(
                format!("bundle {}", path.display()),
                cfg.auth_timeout,
                factory.from_bundle(&path),
            )
            .await?
            .map_err(|source| ConfigError::Bundle { path: path.clone(), source })?;
            Ok(ResolvedConnection::new(AuthKind::Bundle, connector, credentials))
        }
        AuthMode::Token { api_url, database_id, token } => {
            if cfg.username.is_some() || cfg.password.is_some() {
                tracing::debug!("username/password ignored in token mode");
            }
            tracing::info!(%api_url, %database_id, timeout = ?cfg.auth_timeout, "exchanging token for connection bundle");
            let connector = with_deadline(
                format!("bundle for database {database_id} from {api_url}"),
                cfg.auth_timeout,
                factory.from_token(&api_url, &database_id, &token),
            )
            .await?
            .map_err(|source| ConfigError::Token {
                api_url: api_url.clone(),
                database_id: database_id.clone(),
                source,
            })?;
            let credentials = Credentials { username: TOKEN_PRINCIPAL.to_string(), password: token };
            Ok(ResolvedConnection::new(AuthKind::Token, connector, Some(credentials)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockFactory, MockOptions};
    use std::io::Write;

    fn bundle_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"PK\x03\x04").unwrap();
        f
    }

    fn token_cfg() -> RunConfig {
        RunConfig {
            token: Some("AstraCS:abc".into()),
            database_id: Some("db-1".into()),
            ..RunConfig::default()
        }
    }

    #[test]
    fn bundle_wins_over_token() {
        let cfg = RunConfig { bundle_path: Some("scb.zip".into()), ..token_cfg() };
        assert_eq!(select_mode(&cfg).unwrap(), AuthMode::Bundle { path: "scb.zip".into() });
    }

    #[test]
    fn token_requires_database_id() {
        let cfg = RunConfig { database_id: None, ..token_cfg() };
        assert!(matches!(select_mode(&cfg), Err(ConfigError::MissingDatabaseId)));
    }

    #[test]
    fn neither_source_is_an_error() {
        let err = select_mode(&RunConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "must provide either bundle path or token");
    }

    #[tokio::test]
    async fn token_mode_synthesizes_credentials() {
        let cfg = RunConfig {
            username: Some("ignored".into()),
            password: Some("ignored".into()),
            ..token_cfg()
        };
        let factory = MockFactory::new(MockOptions::default());
        let conn = resolve(&cfg, &factory).await.unwrap();
        assert_eq!(conn.kind(), AuthKind::Token);
        let creds = conn.credentials().unwrap();
        assert_eq!(creds.username, TOKEN_PRINCIPAL);
        assert_eq!(creds.password, "AstraCS:abc");
    }

    #[tokio::test]
    async fn missing_database_id_never_reaches_factory() {
        let factory = MockFactory::new(MockOptions::default());
        let cfg = RunConfig { database_id: None, ..token_cfg() };
        assert!(matches!(resolve(&cfg, &factory).await, Err(ConfigError::MissingDatabaseId)));
        assert_eq!(factory.counters().resolutions(), 0);
    }

    #[tokio::test]
    async fn bundle_mode_uses_supplied_credentials() {
        let bundle = bundle_file();
        let factory = MockFactory::new(MockOptions { require_credentials: true, ..MockOptions::default() });
        let cfg = RunConfig {
            bundle_path: Some(bundle.path().to_path_buf()),
            username: Some("client-id".into()),
            password: Some("secret".into()),
            ..RunConfig::default()
        };
        let conn = resolve(&cfg, &factory).await.unwrap();
        assert_eq!(conn.kind(), AuthKind::Bundle);
        assert_eq!(conn.credentials().map(|c| c.username.as_str()), Some("client-id"));
    }

    #[tokio::test]
    async fn bundle_mode_without_required_credentials() {
        let bundle = bundle_file();
        let factory = MockFactory::new(MockOptions { require_credentials: true, ..MockOptions::default() });
        let cfg = RunConfig { bundle_path: Some(bundle.path().to_path_buf()), ..RunConfig::default() };
        assert!(matches!(resolve(&cfg, &factory).await, Err(ConfigError::MissingCredentials(_))));
    }

    #[tokio::test]
    async fn half_credential_pair_is_dropped() {
        let bundle = bundle_file();
        let factory = MockFactory::new(MockOptions::default());
        let cfg = RunConfig {
            bundle_path: Some(bundle.path().to_path_buf()),
            username: Some("client-id".into()),
            ..RunConfig::default()
        };
        let conn = resolve(&cfg, &factory).await.unwrap();
        assert!(conn.credentials().is_none());

        let required = MockFactory::new(MockOptions { require_credentials: true, ..MockOptions::default() });
        let cfg = RunConfig { username: None, password: Some("secret".into()), ..cfg };
        assert!(matches!(resolve(&cfg, &required).await, Err(ConfigError::MissingCredentials(_))));
    }

    #[tokio::test]
    async fn bundle_error_names_the_path() {
        let factory = MockFactory::new(MockOptions::default());
        let cfg = RunConfig { bundle_path: Some("/no/such/scb.zip".into()), ..RunConfig::default() };
        let err = resolve(&cfg, &factory).await.unwrap_err();
        assert!(matches!(err, ConfigError::Bundle { .. }));
        assert!(err.to_string().contains("/no/such/scb.zip"));
    }

    #[tokio::test]
    async fn resolution_honours_auth_timeout() {
        let factory = MockFactory::new(MockOptions {
            auth_latency: Duration::from_secs(5),
            ..MockOptions::default()
        });
        let cfg = RunConfig { auth_timeout: Duration::from_millis(20), ..token_cfg() };
        let err = resolve(&cfg, &factory).await.unwrap_err();
        assert!(matches!(err, ConfigError::AuthTimeout { .. }), "{err}");
    }
}
