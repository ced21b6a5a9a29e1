//! Per-file ingestion pipeline.
//!
//! This module provides the [`IngestPipeline`] that drives one file through
//! the stages Fetch → Decode → Write with:
//! - Async execution via `tokio`
//! - A configurable deadline on each I/O stage
//! - Cooperative cancellation through a batch-wide [`CancellationToken`]
//! - Structured logging via `tracing`
//!
//! Failures never escape as errors: every run ends in an [`Outcome`].

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::harvest::decode::{decode_reports, first_report_vulnerabilities};
use crate::harvest::writer::VulnerabilityWriter;
use crate::model::FileRef;
use crate::traits::{ContentFetcher, IngestError, VulnerabilityStore};

// ============================================================================
// Task Types
// ============================================================================

/// Lifecycle of one file task.
///
/// `Succeeded` and `Failed` are terminal; a task never re-enters an earlier
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Fetching,
    Decoding,
    Writing,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    pub fn stage_name(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Fetching => "fetch",
            TaskState::Decoding => "decode",
            TaskState::Writing => "write",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stage_name())
    }
}

/// Statistics of a successful file task.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskReport {
    /// Records found in the first report of the file
    pub records_decoded: usize,

    /// Records persisted by the write transaction
    pub records_inserted: usize,

    /// Records whose individual insert failed
    pub records_skipped: usize,

    /// Time spent fetching (milliseconds)
    pub fetch_duration_ms: u64,

    /// Time spent in the write transaction (milliseconds)
    pub write_duration_ms: u64,

    /// Wall time of the whole task (milliseconds)
    pub total_duration_ms: u64,
}

/// Result of one file task. Exactly one is produced per submitted file.
#[derive(Debug)]
pub struct Outcome {
    pub path: String,

    /// Terminal state the task ended in.
    pub state: TaskState,

    /// Stage that was running when the task failed; `None` when the task
    /// was lost before it could report one.
    pub failed_stage: Option<TaskState>,

    pub result: Result<TaskReport, IngestError>,
}

impl Outcome {
    pub fn succeeded(path: impl Into<String>, report: TaskReport) -> Self {
        Self {
            path: path.into(),
            state: TaskState::Succeeded,
            failed_stage: None,
            result: Ok(report),
        }
    }

    pub fn failed(path: impl Into<String>, stage: TaskState, error: IngestError) -> Self {
        Self {
            path: path.into(),
            state: TaskState::Failed,
            failed_stage: Some(stage),
            result: Err(error),
        }
    }

    /// A task that ended without reporting its own outcome, e.g. because it
    /// panicked. The failing stage is unknown.
    pub fn aborted(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: TaskState::Failed,
            failed_stage: None,
            result: Err(IngestError::Aborted(reason.into())),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&IngestError> {
        self.result.as_ref().err()
    }
}

/// Tracks the state of the file currently being processed.
struct FileTask<'a> {
    file: &'a FileRef,
    state: TaskState,
    started: Instant,
}

impl<'a> FileTask<'a> {
    fn new(file: &'a FileRef) -> Self {
        Self {
            file,
            state: TaskState::Pending,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: TaskState) {
        debug!(path = %self.file.path, from = %self.state, to = %next, "Task transition");
        self.state = next;
    }

    fn fail(self, error: IngestError) -> Outcome {
        warn!(
            path = %self.file.path,
            stage = %self.state,
            kind = error.kind(),
            error = %error,
            "File task failed"
        );
        Outcome::failed(self.file.path.clone(), self.state, error)
    }

    fn succeed(self, mut report: TaskReport) -> Outcome {
        report.total_duration_ms = self.started.elapsed().as_millis() as u64;
        info!(
            path = %self.file.path,
            records = report.records_inserted,
            duration_ms = report.total_duration_ms,
            "Successfully processed file"
        );
        Outcome::succeeded(self.file.path.clone(), report)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Fetch → Decode → Write for a single file.
///
/// # Thread Safety
///
/// The pipeline is `Send + Sync` when its collaborators are, and is shared
/// by every worker of a batch behind an `Arc`.
pub struct IngestPipeline<F, S> {
    fetcher: F,
    writer: VulnerabilityWriter<S>,

    /// Deadline for each I/O stage (default: 60 seconds)
    stage_timeout: Duration,
}

impl<F, S> IngestPipeline<F, S>
where
    F: ContentFetcher,
    S: VulnerabilityStore,
{
    pub fn new(fetcher: F, store: S) -> Self {
        Self {
            fetcher,
            writer: VulnerabilityWriter::new(store),
            stage_timeout: Duration::from_secs(60),
        }
    }

    /// Sets the deadline applied separately to the fetch and write stages.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    pub fn store(&self) -> &S {
        self.writer.store()
    }

    /// Runs every stage for `file` and reports how it ended.
    ///
    /// A fetch, decode or write failure stops the task at that stage. A file
    /// holding no reports succeeds without opening a transaction.
    #[instrument(skip(self, file, cancel), fields(path = %file.path))]
    pub async fn execute(&self, file: &FileRef, cancel: &CancellationToken) -> Outcome {
        let mut task = FileTask::new(file);
        let mut report = TaskReport::default();

        // ====================================================================
        // Stage 1: Fetch
        // ====================================================================

        task.advance(TaskState::Fetching);
        let fetch_start = Instant::now();

        let raw = match self
            .guarded(task.state, cancel, self.fetcher.fetch(file))
            .await
        {
            Ok(raw) => raw,
            Err(e) => return task.fail(e),
        };
        report.fetch_duration_ms = fetch_start.elapsed().as_millis() as u64;

        // ====================================================================
        // Stage 2: Decode
        // ====================================================================

        task.advance(TaskState::Decoding);

        let reports = match decode_reports(&raw) {
            Ok(reports) => reports,
            Err(e) => return task.fail(e.into()),
        };

        let Some(records) = first_report_vulnerabilities(&file.path, reports) else {
            debug!(path = %file.path, "No scan reports in file");
            return task.succeed(report);
        };
        report.records_decoded = records.len();

        // ====================================================================
        // Stage 3: Write
        // ====================================================================

        task.advance(TaskState::Writing);
        let write_start = Instant::now();

        let summary = match self
            .guarded(task.state, cancel, async {
                self.writer
                    .write(file, &records)
                    .await
                    .map_err(IngestError::from)
            })
            .await
        {
            Ok(summary) => summary,
            Err(e) => return task.fail(e),
        };

        report.write_duration_ms = write_start.elapsed().as_millis() as u64;
        report.records_inserted = summary.inserted;
        report.records_skipped = summary.skipped;

        task.succeed(report)
    }

    /// Bounds an I/O stage by the stage deadline and the batch token.
    async fn guarded<T, Fut>(
        &self,
        stage: TaskState,
        cancel: &CancellationToken,
        fut: Fut,
    ) -> Result<T, IngestError>
    where
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let stage = stage.stage_name();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled { stage }),
            res = timeout(self.stage_timeout, fut) => res.map_err(|_| IngestError::Timeout {
                stage,
                timeout_ms: self.stage_timeout.as_millis() as u64,
            })?,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
