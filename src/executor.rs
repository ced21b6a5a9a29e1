use crate::harvest::pipeline::{IngestPipeline, Outcome};
use crate::model::FileRef;
use crate::traits::{ContentFetcher, IngestError, VulnerabilityStore};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Default upper bound on concurrent file tasks.
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// All outcomes of one batch, in completion order.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub outcomes: Vec<Outcome>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn first_error(&self) -> Option<&IngestError> {
        self.outcomes.iter().find_map(Outcome::error)
    }

    /// Reduces the batch to its first failure, if any.
    pub fn into_result(self) -> Result<(), IngestError> {
        match self.outcomes.into_iter().find_map(|o| o.result.err()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Runs batches of file tasks on a bounded pool of workers.
pub struct IngestExecutor<F, S> {
    pipeline: Arc<IngestPipeline<F, S>>,
    max_workers: usize,
    cancel: CancellationToken,
}

impl<F, S> IngestExecutor<F, S>
where
    F: ContentFetcher + 'static,
    S: VulnerabilityStore + 'static,
{
    pub fn new(pipeline: IngestPipeline<F, S>, max_workers: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            max_workers: max_workers.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Ties every batch run by this executor to `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn pipeline(&self) -> &IngestPipeline<F, S> {
        &self.pipeline
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Ingests `files` and reduces the batch to its first failure.
    ///
    /// Partial success is reported as failure; use [`Self::run_batch`] for
    /// per-file detail.
    pub async fn ingest(&self, files: Vec<FileRef>) -> Result<(), IngestError> {
        self.run_batch(files).await.into_result()
    }

    /// Processes every file exactly once and returns one outcome per file.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn run_batch(&self, files: Vec<FileRef>) -> BatchResult {
        let total = files.len();
        if total == 0 {
            info!("No files to process");
            return BatchResult::default();
        }

        let workers = self.max_workers.min(total);
        info!(files = total, workers, "Starting ingestion batch");

        let mut pending: HashSet<String> = files.iter().map(|f| f.path.clone()).collect();

        // The queue holds the whole batch, so filling it never waits.
        let (work_tx, work_rx) = mpsc::channel::<FileRef>(total);
        for file in files {
            if work_tx.send(file).await.is_err() {
                break;
            }
        }
        drop(work_tx);
        let work_rx = Arc::new(Mutex::new(work_rx));

        let (outcome_tx, mut outcome_rx) = mpsc::channel::<Outcome>(total);
        let mut pool = JoinSet::new();

        for worker_id in 0..workers {
            let work_rx = Arc::clone(&work_rx);
            let outcome_tx = outcome_tx.clone();
            let pipeline = Arc::clone(&self.pipeline);
            let cancel = self.cancel.clone();

            pool.spawn(async move {
                info!(worker = worker_id, "Worker started");
                loop {
                    let next = work_rx.lock().await.recv().await;
                    let Some(file) = next else { break };

                    info!(worker = worker_id, path = %file.path, "Worker processing file");
                    let outcome = run_isolated(Arc::clone(&pipeline), file, cancel.clone()).await;
                    if outcome_tx.send(outcome).await.is_err() {
                        break;
                    }
                }
                info!(worker = worker_id, "Worker finished");
            });
        }
        drop(outcome_tx);

        let mut outcomes = Vec::with_capacity(total);
        while outcomes.len() < total {
            let Some(outcome) = outcome_rx.recv().await else { break };
            match &outcome.result {
                Ok(_) => info!(path = %outcome.path, "File ingested"),
                Err(e) => warn!(path = %outcome.path, error = %e, "Error processing file"),
            }
            pending.remove(&outcome.path);
            outcomes.push(outcome);
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker terminated abnormally");
            }
        }

        for path in pending {
            error!(path = %path, "No outcome received for file");
            outcomes.push(Outcome::aborted(path, "worker exited before reporting"));
        }

        let batch = BatchResult { outcomes };
        info!(
            files = total,
            succeeded = batch.succeeded(),
            failed = batch.failed(),
            "Ingestion batch completed"
        );
        batch
    }
}

/// Runs one file task on its own tokio task so a panic becomes a failed
/// outcome instead of taking the worker down.
async fn run_isolated<F, S>(
    pipeline: Arc<IngestPipeline<F, S>>,
    file: FileRef,
    cancel: CancellationToken,
) -> Outcome
where
    F: ContentFetcher + 'static,
    S: VulnerabilityStore + 'static,
{
    let path = file.path.clone();
    let handle = tokio::spawn(async move { pipeline.execute(&file, &cancel).await });

    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(path = %path, error = %e, "File task panicked");
            Outcome::aborted(path, e.to_string())
        }
    }
}
