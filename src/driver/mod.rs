//! Driver abstraction: connection factory, session traits, and builder.

pub mod config;
#[cfg(any(test, feature = "driver-mock"))]
pub mod mock;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Mock,
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Driver::Mock => f.write_str("mock"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DriverOptions {
    pub params: BTreeMap<String, String>,
}

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("bundle: {0}")]
    Bundle(String),
    #[error("token exchange: {0}")]
    Token(String),
    #[error("query: {0}")]
    Query(String),
    #[error("close: {0}")]
    Close(String),
    #[error("other: {0}")]
    Other(String),
}

/// Principal and secret handed to the session authenticator.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Builds connectors from a secure-connect bundle or from a cloud token.
///
/// Implementations own everything about TLS material and endpoint discovery;
/// callers only see the resulting [`Connector`].
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Whether sessions need explicit username/password in bundle mode.
    fn requires_credentials(&self) -> bool;

    async fn from_bundle(&self, path: &Path) -> Result<Arc<dyn Connector>, DriverError>;

    async fn from_token(
        &self,
        api_url: &str,
        database_id: &str,
        token: &str,
    ) -> Result<Arc<dyn Connector>, DriverError>;
}

/// Opens fresh sessions against the endpoints a factory resolved.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Full handshake; never hands back a pooled connection.
    async fn open_session(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn Session>, DriverError>;

    fn describe(&self) -> String;
}

#[async_trait::async_trait]
pub trait Session: Send {
    /// Starts a query. Execution errors are deferred to [`Rows::close`].
    async fn query(&mut self, statement: &str) -> Box<dyn Rows>;

    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}

/// Row iterator over single-column results.
#[async_trait::async_trait]
pub trait Rows: Send {
    /// Next scalar, or `None` once the result is exhausted or failed.
    async fn next_value(&mut self) -> Option<String>;

    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}

pub struct DriverBuilder;

impl DriverBuilder {
    pub fn factory(
        driver: Driver,
        opts: DriverOptions,
    ) -> Result<Box<dyn ConnectionFactory>, DriverError> {
        match driver {
            Driver::Mock => {
                #[cfg(any(test, feature = "driver-mock"))]
                {
                    crate::driver::mock::factory(opts)
                }
                #[cfg(not(any(test, feature = "driver-mock")))]
                {
                    let _ = opts;
                    Err(DriverError::Connect("mock driver feature disabled".into()))
                }
            }
        }
    }
}
