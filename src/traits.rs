//! Collaborator seams and the error taxonomy of the ingestion core.
//!
//! The pipeline never talks to the network or the database directly; it goes
//! through [`ContentFetcher`], [`VulnerabilityStore`] and [`StoreTransaction`]
//! so that every stage can be driven by test doubles.

use crate::model::{FileRef, StoredVulnerability, VulnerabilityRow};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Remote content could not be retrieved or its envelope was unusable.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Remote returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Malformed content envelope: {0}")]
    Envelope(String),
}

/// The decoded payload is not a list of scan reports.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to parse content: {0}")]
    InvalidContent(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::InvalidContent(err.to_string())
    }
}

/// Failures reported by a [`VulnerabilityStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Insert statement used before it was prepared")]
    NotPrepared,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Transaction-level write failures. Per-record insert failures never
/// surface here.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Failed to begin transaction: {0}")]
    Begin(#[source] StoreError),

    #[error("Failed to prepare insert statement: {0}")]
    Prepare(#[source] StoreError),

    #[error("Failed to commit transaction: {0}")]
    Commit(#[source] StoreError),
}

/// Repository listing failures.
#[derive(Error, Debug)]
pub enum ListingError {
    #[error("Invalid repository URL '{url}': {reason}")]
    InvalidRepoUrl { url: String, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("GitHub API error: HTTP {status}")]
    Status { status: u16 },

    #[error("Malformed contents listing: {0}")]
    Decode(String),
}

/// Cause carried by a failed file task.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid base64 content: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Report parsing failed: {0}")]
    Parse(#[from] ParseError),

    #[error("Write failed: {0}")]
    Write(#[from] WriteError),

    #[error("Stage '{stage}' timed out after {timeout_ms}ms")]
    Timeout { stage: &'static str, timeout_ms: u64 },

    #[error("Batch cancelled before '{stage}' completed")]
    Cancelled { stage: &'static str },

    #[error("Task aborted: {0}")]
    Aborted(String),
}

impl IngestError {
    /// Short label of the failure class, used in logs and API errors.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Fetch(_) => "fetch",
            IngestError::Encoding(_) => "encoding",
            IngestError::Parse(_) => "parse",
            IngestError::Write(_) => "write",
            IngestError::Timeout { .. } => "timeout",
            IngestError::Cancelled { .. } => "cancelled",
            IngestError::Aborted(_) => "aborted",
        }
    }
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Retrieves the raw payload of one remote file.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Performs a single attempt; callers never retry.
    ///
    /// # Errors
    ///
    /// [`IngestError::Fetch`] for transport, status or envelope problems and
    /// [`IngestError::Encoding`] when the payload is not valid base64.
    async fn fetch(&self, file: &FileRef) -> Result<Vec<u8>, IngestError>;
}

/// Relational store shared by every worker of a batch.
#[async_trait]
pub trait VulnerabilityStore: Send + Sync {
    /// Opens a transaction isolated from other workers' transactions.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Liveness check.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn find_by_severity(
        &self,
        severity: &str,
    ) -> Result<Vec<StoredVulnerability>, StoreError>;
}

/// One open write transaction.
///
/// Dropping a transaction without calling [`StoreTransaction::commit`] rolls
/// it back.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn prepare_insert(&mut self) -> Result<(), StoreError>;

    async fn insert(&mut self, row: &VulnerabilityRow) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Resolves wanted paths of a repository into fetchable [`FileRef`]s.
#[async_trait]
pub trait RepositoryLister: Send + Sync {
    /// Returns the listed files whose path is in `wanted`, at most once per
    /// path.
    async fn list_matching(
        &self,
        owner: &str,
        repo: &str,
        wanted: &[String],
    ) -> Result<Vec<FileRef>, ListingError>;
}

#[async_trait]
impl<T: ContentFetcher + ?Sized> ContentFetcher for Arc<T> {
    async fn fetch(&self, file: &FileRef) -> Result<Vec<u8>, IngestError> {
        (**self).fetch(file).await
    }
}

#[async_trait]
impl<T: VulnerabilityStore + ?Sized> VulnerabilityStore for Arc<T> {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        (**self).begin().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        (**self).ping().await
    }

    async fn find_by_severity(
        &self,
        severity: &str,
    ) -> Result<Vec<StoredVulnerability>, StoreError> {
        (**self).find_by_severity(severity).await
    }
}
