use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::batch::{self, BatchReport, NO_URLS_MESSAGE};
use crate::config::UploadsConfig;
use crate::indexing::Indexer;
use crate::platform::{ChatTransport, DocumentInfo};

pub const SHUTTING_DOWN_MESSAGE: &str = "❌ The bot is shutting down, the file was not processed.";

/// One uploaded URL list waiting for a worker.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub chat_id: i64,
    pub document: DocumentInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed {
        submitted: usize,
        failed: usize,
        skipped: usize,
    },
    Failed(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("upload queue is full")]
    Full,
    #[error("upload queue is closed")]
    Closed,
}

/// A reserved place in the queue. Dropping it without submitting frees the place.
pub struct UploadSlot {
    permit: mpsc::OwnedPermit<Envelope>,
}

impl UploadSlot {
    /// Hand the job to the workers. Never blocks, the place is already held.
    pub fn submit(self, job: UploadJob) -> UploadTicket {
        let (done, rx) = oneshot::channel();
        let chat_id = job.chat_id;
        self.permit.send(Envelope { job, done });
        UploadTicket { chat_id, rx }
    }
}

/// Resolves once a worker has finished the job.
pub struct UploadTicket {
    chat_id: i64,
    rx: oneshot::Receiver<UploadOutcome>,
}

impl UploadTicket {
    /// `None` if the job was dropped without being processed.
    pub async fn wait(self) -> Option<UploadOutcome> {
        self.rx.await.ok()
    }

    /// Log the outcome from a background task once the job is over.
    pub fn log_when_done(self) {
        let chat_id = self.chat_id;
        tokio::spawn(async move {
            match self.wait().await {
                Some(UploadOutcome::Completed {
                    submitted,
                    failed,
                    skipped,
                }) => info!(
                    "Upload for chat {} done: {} submitted, {} failed, {} skipped",
                    chat_id, submitted, failed, skipped
                ),
                Some(UploadOutcome::Failed(reason)) => {
                    warn!("Upload for chat {} failed: {}", chat_id, reason)
                }
                None => warn!("Upload for chat {} was dropped before it finished", chat_id),
            }
        });
    }
}

struct Envelope {
    job: UploadJob,
    done: oneshot::Sender<UploadOutcome>,
}

struct WorkerContext {
    indexer: Arc<dyn Indexer>,
    transport: Arc<dyn ChatTransport>,
    temp_dir: PathBuf,
    cancel: watch::Receiver<bool>,
}

/// Bounded queue of uploads drained by a fixed set of workers.
pub struct UploadQueue {
    tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    cancel_tx: watch::Sender<bool>,
    workers: Mutex<JoinSet<()>>,
}

impl UploadQueue {
    /// Spawn the workers. Must be called from inside a Tokio runtime.
    pub fn start(
        config: &UploadsConfig,
        indexer: Arc<dyn Indexer>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let rx = Arc::new(Mutex::new(rx));

        let ctx = Arc::new(WorkerContext {
            indexer,
            transport,
            temp_dir: config.temp_dir.clone().unwrap_or_else(std::env::temp_dir),
            cancel: cancel_rx,
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..config.workers.max(1) {
            workers.spawn(run_worker(worker_id, rx.clone(), ctx.clone()));
        }
        info!(
            "Upload queue started with {} worker(s), capacity {}",
            config.workers.max(1),
            config.queue_capacity.max(1)
        );

        Self {
            tx: Mutex::new(Some(tx)),
            cancel_tx,
            workers: Mutex::new(workers),
        }
    }

    /// Claim a place in the queue without waiting. The caller can reply to
    /// the user before the job becomes visible to a worker.
    pub async fn reserve(&self) -> Result<UploadSlot, EnqueueError> {
        let tx = self.tx.lock().await.clone().ok_or(EnqueueError::Closed)?;
        let permit = tx.try_reserve_owned().map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })?;
        Ok(UploadSlot { permit })
    }

    /// Refuse new jobs and ask running batches to stop after their current URL.
    pub async fn cancel(&self) {
        self.tx.lock().await.take();
        self.cancel_tx.send_replace(true);
    }

    /// Wait for every worker to exit. Only returns after [`Self::cancel`].
    pub async fn join(&self) {
        let mut workers = self.workers.lock().await;
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("Upload worker panicked: {}", e);
            }
        }
    }

    pub async fn shutdown(&self) {
        self.cancel().await;
        self.join().await;
        info!("Upload queue stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    ctx: Arc<WorkerContext>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(Envelope { job, done }) = next else {
            break;
        };

        info!(
            "Worker {} processing file {:?} for chat {}",
            worker_id, job.document.file_name, job.chat_id
        );
        let outcome = process_job(&ctx, &job).await;
        debug!(
            "Worker {} done with file for chat {}: {:?}",
            worker_id, job.chat_id, outcome
        );

        // The submitter may have stopped listening.
        let _ = done.send(outcome);
    }
}

async fn process_job(ctx: &WorkerContext, job: &UploadJob) -> UploadOutcome {
    if *ctx.cancel.borrow() {
        notify(ctx, job.chat_id, SHUTTING_DOWN_MESSAGE).await;
        return UploadOutcome::Failed("cancelled before start".to_string());
    }

    let urls = match fetch_urls(ctx, &job.document).await {
        Ok(urls) => urls,
        Err(e) => {
            error!("Failed to read uploaded file: {:#}", e);
            notify(ctx, job.chat_id, &format!("❌ Failed to read file: {:#}", e)).await;
            return UploadOutcome::Failed(format!("{:#}", e));
        }
    };

    if urls.is_empty() {
        notify(ctx, job.chat_id, NO_URLS_MESSAGE).await;
        return UploadOutcome::Completed {
            submitted: 0,
            failed: 0,
            skipped: 0,
        };
    }

    let run = batch::submit_batch_until(ctx.indexer.as_ref(), &urls, &ctx.cancel).await;
    let report = BatchReport::from_run(&run);
    notify(ctx, job.chat_id, &report.render()).await;

    UploadOutcome::Completed {
        submitted: report.submitted,
        failed: report.failed(),
        skipped: report.skipped,
    }
}

/// Download into a temp file that is removed when this function returns.
async fn fetch_urls(ctx: &WorkerContext, document: &DocumentInfo) -> Result<Vec<String>> {
    let staged = tempfile::Builder::new()
        .prefix("indexbot-upload-")
        .suffix(".txt")
        .tempfile_in(&ctx.temp_dir)
        .with_context(|| format!("Failed to create temp file in {}", ctx.temp_dir.display()))?;

    ctx.transport
        .download(&document.file_id, staged.path())
        .await
        .context("Download failed")?;

    let bytes = tokio::fs::read(staged.path())
        .await
        .context("Failed to read downloaded file")?;
    Ok(batch::parse_url_lines(&String::from_utf8_lossy(&bytes)))
}

async fn notify(ctx: &WorkerContext, chat_id: i64, text: &str) {
    if let Err(e) = ctx.transport.send_text(chat_id, text).await {
        error!("Failed to send upload result to chat {}: {:#}", chat_id, e);
    }
}
