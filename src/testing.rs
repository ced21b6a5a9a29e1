//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::model::{FileRef, StoredVulnerability, VulnerabilityRow};
use crate::traits::{
    ContentFetcher, FetchError, IngestError, StoreError, StoreTransaction, VulnerabilityStore,
};

// ============================================================================
// Store
// ============================================================================

#[derive(Default)]
struct MemoryState {
    rows: Mutex<Vec<VulnerabilityRow>>,
    begins: AtomicUsize,
    commits: AtomicUsize,
    fail_begin: bool,
    fail_prepare: bool,
    fail_commit: bool,
    reject_ids: HashSet<String>,
}

/// Store that keeps committed rows in a vector.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(f: impl FnOnce(&mut MemoryState)) -> Self {
        let mut state = MemoryState::default();
        f(&mut state);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn failing_begin() -> Self {
        Self::configure(|s| s.fail_begin = true)
    }

    pub fn failing_prepare() -> Self {
        Self::configure(|s| s.fail_prepare = true)
    }

    pub fn failing_commit() -> Self {
        Self::configure(|s| s.fail_commit = true)
    }

    /// Inserts of these vulnerability ids fail individually.
    pub fn rejecting(ids: &[&str]) -> Self {
        Self::configure(|s| s.reject_ids = ids.iter().map(|id| id.to_string()).collect())
    }

    pub fn rows(&self) -> Vec<VulnerabilityRow> {
        self.state.rows.lock().unwrap().clone()
    }

    pub fn rows_for(&self, source_file: &str) -> Vec<VulnerabilityRow> {
        self.rows()
            .into_iter()
            .filter(|r| r.source_file == source_file)
            .collect()
    }

    pub fn begins(&self) -> usize {
        self.state.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }
}

struct MemoryTransaction {
    state: Arc<MemoryState>,
    pending: Vec<VulnerabilityRow>,
    prepared: bool,
}

#[async_trait]
impl VulnerabilityStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        self.state.begins.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_begin {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
            prepared: false,
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.state.fail_begin {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    async fn find_by_severity(
        &self,
        severity: &str,
    ) -> Result<Vec<StoredVulnerability>, StoreError> {
        if self.state.fail_begin {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(self
            .rows()
            .into_iter()
            .filter(|r| r.severity == severity)
            .map(StoredVulnerability::from)
            .collect())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn prepare_insert(&mut self) -> Result<(), StoreError> {
        if self.state.fail_prepare {
            return Err(StoreError::Unavailable("prepare rejected".into()));
        }
        self.prepared = true;
        Ok(())
    }

    async fn insert(&mut self, row: &VulnerabilityRow) -> Result<(), StoreError> {
        if !self.prepared {
            return Err(StoreError::NotPrepared);
        }
        if self.state.reject_ids.contains(&row.id) {
            return Err(StoreError::Unavailable(format!("insert rejected for {}", row.id)));
        }
        self.pending.push(row.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        if this.state.fail_commit {
            return Err(StoreError::Unavailable("commit rejected".into()));
        }
        this.state.rows.lock().unwrap().extend(this.pending);
        this.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// Scripted response for one file path.
#[derive(Clone)]
pub enum Script {
    Payload(Vec<u8>),
    HttpStatus(u16),
    BadBase64,
    Hang,
    Panic,
}

/// Fetcher answering from a fixed script and recording concurrency.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    scripts: Arc<HashMap<String, Script>>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedFetcher {
    pub fn new(scripts: impl IntoIterator<Item = (&'static str, Script)>) -> Self {
        Self {
            scripts: Arc::new(
                scripts
                    .into_iter()
                    .map(|(path, script)| (path.to_string(), script))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch(&self, file: &FileRef) -> Result<Vec<u8>, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let script = self.scripts.get(&file.path).cloned();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match script {
            Some(Script::Payload(bytes)) => Ok(bytes),
            Some(Script::HttpStatus(status)) => Err(FetchError::Status {
                status,
                url: file.url.clone(),
            }
            .into()),
            Some(Script::BadBase64) => Err(base64::DecodeError::InvalidPadding.into()),
            Some(Script::Hang) => std::future::pending().await,
            Some(Script::Panic) => panic!("scripted panic for {}", file.path),
            None => Err(FetchError::Status {
                status: 404,
                url: file.url.clone(),
            }
            .into()),
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn file(path: &str) -> FileRef {
    FileRef::new(path, format!("https://api.github.test/contents/{}", path))
}

pub fn vulnerability(id: &str, severity: &str) -> Value {
    json!({
        "id": id,
        "severity": severity,
        "cvss": 8.1,
        "status": "fixed",
        "package_name": "openssl",
        "current_version": "1.1.1",
        "fixed_version": "1.1.1w",
        "description": "test vulnerability",
        "published_date": "2024-01-15T10:30:00Z",
        "link": "https://nvd.example/CVE",
        "risk_factors": ["Remote execution", "High severity"]
    })
}

/// A scan-result payload with a single report holding `vulnerabilities`.
pub fn report_payload(vulnerabilities: Vec<Value>) -> Vec<u8> {
    json!([{ "scanResults": { "vulnerabilities": vulnerabilities } }])
        .to_string()
        .into_bytes()
}
