//! Shared error taxonomy.
//!
//! Every component-boundary error type below exposes a [`kind`](HasKind::kind) accessor
//! returning the same [`ErrorKind`], so the worker executor's ack/nack decision is a single
//! match over `ErrorKind` instead of per-error-type logic.

use thiserror::Error;

/// Coarse error classification shared across all component errors.
///
/// Mirrors the taxonomy a caller needs to react to, not the taxonomy of "what broke" —
/// several very different underlying failures (a closed AMQP channel, a dropped Mongo
/// connection, an S3 timeout) are all `Transport` because they're handled identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Transport,
    Protocol,
    NoPageVariable,
    Proxy,
    Timeout,
}

pub trait HasKind {
    fn kind(&self) -> ErrorKind;
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker transport error: {0}")]
    Transport(String),
    #[error("broker protocol error: {0}")]
    Protocol(String),
    #[error("broker configuration error: {0}")]
    Config(String),
}

impl HasKind for BrokerError {
    fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Transport(_) => ErrorKind::Transport,
            BrokerError::Protocol(_) => ErrorKind::Protocol,
            BrokerError::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<lapin::Error> for BrokerError {
    fn from(e: lapin::Error) -> Self {
        BrokerError::Transport(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("document store transport error: {0}")]
    Transport(String),
    #[error("document not found")]
    NotFound,
    #[error("document store conflict: {0}")]
    Conflict(String),
    #[error("bad query: {0}")]
    BadQuery(String),
}

impl HasKind for DocumentStoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            DocumentStoreError::Transport(_) => ErrorKind::Transport,
            DocumentStoreError::NotFound => ErrorKind::Protocol,
            DocumentStoreError::Conflict(_) => ErrorKind::Protocol,
            DocumentStoreError::BadQuery(_) => ErrorKind::Protocol,
        }
    }
}

impl From<mongodb::error::Error> for DocumentStoreError {
    fn from(e: mongodb::error::Error) -> Self {
        DocumentStoreError::Transport(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object store transport error: {0}")]
    Transport(String),
    #[error("object not found: {0}")]
    NotFound(String),
}

impl HasKind for ObjectStoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            ObjectStoreError::Transport(_) => ErrorKind::Transport,
            ObjectStoreError::NotFound(_) => ErrorKind::Protocol,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("proxy acquisition failed: {0}")]
    ProxyAcquire(String),
    #[error("proxy connect failed: {0}")]
    ProxyConnect(String),
    #[error("http transport error: {0}")]
    HttpTransport(String),
    #[error("status mismatch: expected {expected}, got {actual}")]
    StatusMismatch { expected: u16, actual: u16 },
    #[error("request timed out")]
    Timeout,
}

impl HasKind for FetchError {
    fn kind(&self) -> ErrorKind {
        match self {
            FetchError::ProxyAcquire(_) | FetchError::ProxyConnect(_) => ErrorKind::Proxy,
            FetchError::HttpTransport(_) => ErrorKind::Transport,
            FetchError::StatusMismatch { .. } => ErrorKind::Protocol,
            FetchError::Timeout => ErrorKind::Timeout,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::HttpTransport(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum SpiderError {
    #[error("datasource config has no page variable")]
    NoPageVariable,
    #[error("bad schema at path {0}")]
    BadSchema(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    DocumentStore(#[from] DocumentStoreError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
}

impl HasKind for SpiderError {
    fn kind(&self) -> ErrorKind {
        match self {
            SpiderError::NoPageVariable => ErrorKind::NoPageVariable,
            SpiderError::BadSchema(_) => ErrorKind::Protocol,
            SpiderError::Fetch(e) => e.kind(),
            SpiderError::DocumentStore(e) => e.kind(),
            SpiderError::ObjectStore(e) => e.kind(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing config file for environment {0:?}")]
    MissingFile(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
}
