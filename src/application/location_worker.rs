//! Batched chair position ingestion.
//!
//! A fixed pool of batchers, each draining its own queue. A chair is always
//! routed to the same batcher, so its updates are applied in the order they
//! were reported. A batcher flushes once its batch is full or the flush
//! interval has passed since the first queued item, writing the whole batch
//! in a single core transaction. If that transaction fails the batch is
//! logged and discarded.

use crate::config::LocationConfig;
use crate::domain::chair::LocationUpdate;
use crate::domain::ids::ChairId;
use crate::domain::ports::{CoreStore, CoreStoreRef, CoreTx, Transaction};
use crate::error::{DispatchError, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error};

enum BatcherCommand {
    Apply(LocationUpdate),
    /// Flush everything queued before this command, then reply.
    Sync(oneshot::Sender<()>),
}

pub struct LocationWorkerPool {
    senders: Vec<mpsc::Sender<BatcherCommand>>,
}

impl LocationWorkerPool {
    /// Starts the batchers on the current tokio runtime.
    pub fn spawn(store: CoreStoreRef, config: &LocationConfig) -> Self {
        let workers = config.workers.max(1);
        let batch_size = config.batch_size.max(1);
        let interval = config.flush_interval();
        let senders = (0..workers)
            .map(|worker| {
                let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
                tokio::spawn(run_batcher(worker, store.clone(), rx, interval, batch_size));
                tx
            })
            .collect();
        Self { senders }
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    pub fn route(&self, chair_id: &ChairId) -> usize {
        shard_for(chair_id, self.senders.len())
    }

    /// Queues one update, waiting if the batcher's queue is full.
    pub async fn enqueue(&self, update: LocationUpdate) -> Result<()> {
        let worker = self.route(&update.chair_id);
        self.senders[worker]
            .send(BatcherCommand::Apply(update))
            .await
            .map_err(|_| DispatchError::internal(format!("location batcher {} stopped", worker)))
    }

    /// Returns once every update queued before the call has been flushed.
    pub async fn sync(&self) -> Result<()> {
        let mut replies = Vec::with_capacity(self.senders.len());
        for (worker, sender) in self.senders.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            sender
                .send(BatcherCommand::Sync(tx))
                .await
                .map_err(|_| DispatchError::internal(format!("location batcher {} stopped", worker)))?;
            replies.push(rx);
        }
        for rx in replies {
            rx.await
                .map_err(|_| DispatchError::internal("location batcher dropped a sync request"))?;
        }
        Ok(())
    }
}

/// Stable batcher index for a chair.
pub fn shard_for(chair_id: &ChairId, workers: usize) -> usize {
    (fnv1a64(chair_id.as_str().as_bytes()) % workers.max(1) as u64) as usize
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut h = OFFSET;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(PRIME);
    }
    h
}

async fn run_batcher(
    worker: usize,
    store: CoreStoreRef,
    mut rx: mpsc::Receiver<BatcherCommand>,
    interval: Duration,
    batch_size: usize,
) {
    loop {
        let Some(first) = rx.recv().await else {
            debug!(worker, "location batcher stopped");
            return;
        };
        let deadline = Instant::now() + interval;
        let mut batch = Vec::with_capacity(batch_size);
        let mut waiters = Vec::new();
        let mut closed = false;
        absorb(first, &mut batch, &mut waiters);

        while batch.len() < batch_size && waiters.is_empty() {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                command = rx.recv() => match command {
                    Some(command) => absorb(command, &mut batch, &mut waiters),
                    None => {
                        closed = true;
                        break;
                    }
                },
            }
        }

        if !batch.is_empty() {
            flush(worker, store.as_ref(), batch).await;
        }
        for waiter in waiters {
            let _ = waiter.send(());
        }
        if closed {
            return;
        }
    }
}

fn absorb(command: BatcherCommand, batch: &mut Vec<LocationUpdate>, waiters: &mut Vec<oneshot::Sender<()>>) {
    match command {
        BatcherCommand::Apply(update) => batch.push(update),
        BatcherCommand::Sync(reply) => waiters.push(reply),
    }
}

async fn flush(worker: usize, store: &dyn CoreStore, batch: Vec<LocationUpdate>) {
    let count = batch.len();
    match apply_batch(store, &batch).await {
        Ok(()) => debug!(worker, count, "applied chair locations"),
        Err(err) => error!(worker, count, error = %err, "chair location batch dropped"),
    }
}

async fn apply_batch(store: &dyn CoreStore, batch: &[LocationUpdate]) -> Result<()> {
    let mut tx = store.begin().await?;
    for update in batch {
        tx.update_chair_location(update).await?;
    }
    tx.commit().await
}
