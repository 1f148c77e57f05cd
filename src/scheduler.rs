//! Cycle scheduler
//!
//! Drives the aggregation job chunk after chunk:
//!
//! ```text
//! ReadCursor -> RunChunk (all permutations) -> Decide
//!   progress     : write cursor, stop if shutdown requested, else chunk wait
//!   no progress  : stop if shutdown requested, else idle backoff (same id)
//!   chunk error  : idle backoff, retry from the same id
//!   write failure: stop with CursorWriteFailed
//! ```
//!
//! Shutdown is cooperative. A request during a sleep ends the run at once;
//! a request during a chunk lets the chunk finish and its cursor persist.

use crate::id::SortableId;
use crate::job::PartitionedAggregationJob;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shared "shutdown requested" flag
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn request(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested
    pub async fn requested(&self) {
        let mut rx = self.rx.clone();
        // the sender lives as long as `self`, so `changed` cannot fail here
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `false` when the sleep was cut short (or never started).
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_requested() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_requested(),
            _ = self.requested() => false,
        }
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the scheduler stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    Clean,
    /// Counts were merged but progress could not be recorded
    CursorWriteFailed,
}

impl SchedulerExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            SchedulerExit::Clean => 0,
            SchedulerExit::CursorWriteFailed => 3,
        }
    }
}

pub struct CycleScheduler {
    job: PartitionedAggregationJob,
    shutdown: ShutdownHandle,
    chunk_wait: Duration,
    idle_wait: Duration,
    start_id: Option<SortableId>,
}

impl CycleScheduler {
    pub fn new(
        job: PartitionedAggregationJob,
        shutdown: ShutdownHandle,
        chunk_wait: Duration,
        idle_wait: Duration,
    ) -> Self {
        Self {
            job,
            shutdown,
            chunk_wait,
            idle_wait,
            start_id: None,
        }
    }

    /// Start the first chunk after `id` instead of the stored cursor
    pub fn with_start_id(mut self, id: Option<SortableId>) -> Self {
        self.start_id = id;
        self
    }

    pub fn job(&self) -> &PartitionedAggregationJob {
        &self.job
    }

    pub async fn run(&self) -> SchedulerExit {
        log::info!(
            "🔄 Scheduler started: {} permutation(s), cursor {}",
            self.job.permutations().len(),
            self.job.cursor_key()
        );

        // Some(id) = resume from `id` without re-reading the cursor store
        let mut resume: Option<Option<SortableId>> = self.start_id.map(Some);

        loop {
            if self.shutdown.is_requested() {
                log::info!("🛑 Shutdown requested, scheduler stopping");
                return SchedulerExit::Clean;
            }

            let last_id = match resume.take() {
                Some(id) => id,
                None => match self.job.read_cursor().await {
                    Ok(id) => id,
                    Err(e) => {
                        log::error!("❌ {}", e);
                        if !self.shutdown.sleep(self.idle_wait).await {
                            return SchedulerExit::Clean;
                        }
                        continue;
                    }
                },
            };

            let outcome = match self.job.run_chunk(last_id, &self.shutdown).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!(
                        "❌ Chunk failed, retrying from {} in {:?}: {}",
                        display_id(last_id),
                        self.idle_wait,
                        e
                    );
                    resume = Some(last_id);
                    if !self.shutdown.sleep(self.idle_wait).await {
                        return SchedulerExit::Clean;
                    }
                    continue;
                }
            };

            match outcome.progress() {
                Some(chunk_last_id) => {
                    if let Err(e) = self.job.write_cursor(chunk_last_id).await {
                        log::error!("❌ {}", e);
                        return SchedulerExit::CursorWriteFailed;
                    }
                    if self.shutdown.is_requested() {
                        log::info!("🛑 Shutdown requested, cursor saved at {}", chunk_last_id);
                        return SchedulerExit::Clean;
                    }
                    if !self.shutdown.sleep(self.chunk_wait).await {
                        return SchedulerExit::Clean;
                    }
                }
                None => {
                    if self.shutdown.is_requested() {
                        return SchedulerExit::Clean;
                    }
                    log::info!(
                        "💤 Caught up at {}, sleeping {:?}",
                        display_id(last_id),
                        self.idle_wait
                    );
                    resume = Some(last_id);
                    if !self.shutdown.sleep(self.idle_wait).await {
                        return SchedulerExit::Clean;
                    }
                }
            }
        }
    }
}

fn display_id(id: Option<SortableId>) -> String {
    id.map(|id| id.to_string())
        .unwrap_or_else(|| "start".to_string())
}

/// Request shutdown on SIGINT or SIGTERM (SIGINT only off unix)
pub async fn listen_for_termination(shutdown: ShutdownHandle) -> std::io::Result<()> {
    wait_for_termination_signal().await?;
    log::info!("⚠️  Termination signal received, finishing current chunk");
    shutdown.request();
    Ok(())
}

async fn wait_for_termination_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
