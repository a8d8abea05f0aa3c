//! Write-behind strategy: optimistic cache writes with batched
//! asynchronous persistence.
//!
//! `set` updates the cache immediately and appends the value to a
//! bounded in-memory buffer; one background task per process flushes
//! buffered writes to the persister in batches, on a fixed interval or
//! when the batch size threshold is reached, whichever comes first.
//!
//! Accepted trade-off: a crash between buffering and flush loses at
//! most one flush interval's worth of writes. A full buffer rejects new
//! `set` calls (backpressure) instead of growing without bound.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use herald_core::metrics;

use crate::backend::CacheStore;
use crate::entry::{CacheEntry, CacheOptions};
use crate::error::{BoxError, CacheError};

/// Batch persister invoked by the flush task.
pub type Persister<T> =
    Arc<dyn Fn(Vec<(String, T)>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Write-behind tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteBehindConfig {
    /// Buffer capacity; a full buffer rejects new writes.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Flush as soon as this many writes are pending.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Flush whatever is pending this often.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_buffer_capacity() -> usize {
    1024
}

fn default_batch_size() -> usize {
    64
}

fn default_flush_interval_ms() -> u64 {
    1_000
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

/// Write-behind cache for values of type `T`.
pub struct WriteBehind<T> {
    store: CacheStore,
    tx: mpsc::Sender<(String, T)>,
    buffer_capacity: usize,
    worker: JoinHandle<()>,
}

impl<T> WriteBehind<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Create the strategy and start its background flush task.
    pub fn new(store: CacheStore, config: WriteBehindConfig, persister: Persister<T>) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_capacity.max(1));
        let worker = tokio::spawn(run_flush_loop(
            rx,
            persister,
            config.batch_size.max(1),
            Duration::from_millis(config.flush_interval_ms.max(1)),
        ));
        Self {
            store,
            tx,
            buffer_capacity: config.buffer_capacity.max(1),
            worker,
        }
    }

    /// Buffer `value` for persistence and update the cache optimistically.
    ///
    /// Fails with [`CacheError::BufferFull`] when the buffer is at
    /// capacity; nothing is buffered or cached in that case.
    pub async fn set(&self, key: &str, value: T, opts: &CacheOptions) -> Result<(), CacheError> {
        // Claim the buffer slot first so backpressure rejects before any
        // state changes.
        self.tx
            .try_send((key.to_string(), value.clone()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    metrics::record_write_behind_rejected();
                    CacheError::BufferFull
                }
                mpsc::error::TrySendError::Closed(_) => {
                    CacheError::Store(herald_store::StoreError::connection(
                        "write-behind flush task stopped",
                    ))
                }
            })?;

        metrics::set_write_behind_buffer(self.buffered());

        let entry = CacheEntry::new(&value, opts)?;
        if let Err(e) = self.store.set(key, entry, opts.ttl).await {
            // The write is queued for the persister regardless; losing
            // the cache copy only costs the next reader a reload.
            tracing::warn!(key = %key, error = %e, "optimistic cache write failed");
        }
        Ok(())
    }

    /// Read a cached value, if present.
    pub async fn get(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.store.get(key).await? {
            Some(entry) => Ok(Some(entry.decode_payload()?)),
            None => Ok(None),
        }
    }

    /// Writes currently waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.buffer_capacity - self.tx.capacity()
    }

    /// Stop accepting writes, drain the buffer through the persister,
    /// and wait for the flush task to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "write-behind flush task panicked");
        }
    }
}

async fn run_flush_loop<T: Send + 'static>(
    mut rx: mpsc::Receiver<(String, T)>,
    persister: Persister<T>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut batch: Vec<(String, T)> = Vec::with_capacity(batch_size);
    let mut tick = tokio::time::interval(flush_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(item) => {
                    batch.push(item);
                    if batch.len() >= batch_size {
                        flush(&persister, &mut batch).await;
                    }
                }
                None => {
                    // Channel closed: drain the remainder and stop.
                    while let Ok(item) = rx.try_recv() {
                        batch.push(item);
                    }
                    flush(&persister, &mut batch).await;
                    break;
                }
            },
            _ = tick.tick() => {
                flush(&persister, &mut batch).await;
            }
        }
    }
}

async fn flush<T>(persister: &Persister<T>, batch: &mut Vec<(String, T)>) {
    if batch.is_empty() {
        return;
    }
    let items = std::mem::take(batch);
    let count = items.len();
    match persister(items).await {
        Ok(()) => {
            metrics::record_write_behind_flush(count);
            tracing::debug!(count, "write-behind batch flushed");
        }
        Err(e) => {
            // The cache copies stay valid; only the source-of-truth write
            // is lost, which the crash-loss trade-off already covers.
            tracing::error!(count, error = %e, "write-behind flush failed, dropping batch");
        }
    }
}
