//! Background work queue.
//!
//! Request handlers submit [`WorkItem`]s through a [`WorkerHandle`]; a single
//! dispatcher task receives them and spawns each one as its own task, so a long
//! separation never delays a sweep or another job.

use crate::jobs::JobId;
use crate::orchestrator::Orchestrator;
use crate::sweeper::RetentionSweeper;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    /// Run separation for a job whose input is already on disk.
    Separate { job_id: JobId, input_path: PathBuf },
    /// Run the retention sweeper.
    Sweep,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Work queue is shut down")]
    Closed,
}

/// Cheap, cloneable handle to the work queue.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkItem>,
    shutdown: CancellationToken,
}

impl WorkerHandle {
    /// Enqueue `item`. Never blocks.
    pub fn submit(&self, item: WorkItem) -> Result<(), WorkerError> {
        self.tx.send(item).map_err(|_| WorkerError::Closed)
    }

    /// Stop the dispatcher. Work that was already spawned keeps running.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct WorkQueue {
    orchestrator: Arc<Orchestrator>,
    sweeper: Arc<RetentionSweeper>,
    sweeping: Arc<AtomicBool>,
}

impl WorkQueue {
    /// Spawn the dispatcher on the current runtime. With a `sweep_interval` the
    /// sweeper also runs periodically.
    pub fn start(
        orchestrator: Arc<Orchestrator>,
        sweeper: Arc<RetentionSweeper>,
        sweep_interval: Option<Duration>,
    ) -> WorkerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let queue = WorkQueue {
            orchestrator,
            sweeper,
            sweeping: Arc::new(AtomicBool::new(false)),
        };
        let ticker = sweep_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        tokio::spawn(queue.dispatch_loop(rx, ticker, shutdown.clone()));

        WorkerHandle { tx, shutdown }
    }

    async fn dispatch_loop(
        self,
        mut rx: mpsc::UnboundedReceiver<WorkItem>,
        mut ticker: Option<Interval>,
        shutdown: CancellationToken,
    ) {
        info!("Work queue started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Work queue received shutdown signal");
                    break;
                }
                item = rx.recv() => match item {
                    Some(item) => self.dispatch(item),
                    None => break,
                },
                _ = next_tick(&mut ticker) => {
                    debug!("Periodic sweep due");
                    self.dispatch(WorkItem::Sweep);
                }
            }
        }
        info!("Work queue stopped");
    }

    fn dispatch(&self, item: WorkItem) {
        match item {
            WorkItem::Separate {
                job_id,
                input_path,
            } => {
                let orchestrator = self.orchestrator.clone();
                let sweeper = self.sweeper.clone();
                let sweeping = self.sweeping.clone();
                tokio::spawn(async move {
                    orchestrator.run(job_id, input_path).await;
                    run_sweep(sweeper, sweeping).await;
                });
            }
            WorkItem::Sweep => {
                tokio::spawn(run_sweep(self.sweeper.clone(), self.sweeping.clone()));
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// Overlapping sweeps would race on the same entries, so a sweep requested while
// another is running is dropped.
async fn run_sweep(sweeper: Arc<RetentionSweeper>, sweeping: Arc<AtomicBool>) {
    if sweeping.swap(true, Ordering::AcqRel) {
        debug!("Sweep already in progress, skipping");
        return;
    }
    if let Err(e) = tokio::task::spawn_blocking(move || sweeper.sweep()).await {
        error!("Sweep task panicked: {}", e);
    }
    sweeping.store(false, Ordering::Release);
}
