//! Registry of in-flight connection workers

use dashmap::DashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of one spawned worker
pub type WorkerId = Uuid;

/// Set by a worker when it finishes. Dropping the flag sets it, so a
/// panicking worker is still observed as complete.
#[derive(Debug)]
pub struct CompletionFlag(Arc<AtomicBool>);

impl CompletionFlag {
    fn new() -> (Self, Arc<AtomicBool>) {
        let done = Arc::new(AtomicBool::new(false));
        (Self(Arc::clone(&done)), done)
    }
}

impl Drop for CompletionFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// One spawned connection worker
#[derive(Debug)]
pub struct WorkerRecord {
    peer: SocketAddr,
    handle: JoinHandle<()>,
    completed: Arc<AtomicBool>,
}

impl WorkerRecord {
    /// Whether the worker has signalled completion
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    async fn join(self, id: WorkerId) {
        if let Err(e) = self.handle.await {
            warn!(worker = %id, peer = %self.peer, error = %e, "Worker terminated abnormally");
        }
    }
}

/// Tracks every in-flight worker until it has been joined
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: DashMap<WorkerId, WorkerRecord>,
    spawned: AtomicU64,
    reaped: AtomicU64,
}

impl WorkerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` as a worker for `peer` and register it
    pub fn spawn<F>(&self, peer: SocketAddr, work: F) -> WorkerId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (flag, completed) = CompletionFlag::new();
        let handle = tokio::spawn(async move {
            let _flag = flag;
            work.await;
        });

        self.register(WorkerRecord {
            peer,
            handle,
            completed,
        })
    }

    /// Insert a record, returning its identity
    pub fn register(&self, record: WorkerRecord) -> WorkerId {
        let id = Uuid::new_v4();
        debug!(worker = %id, peer = %record.peer, "Worker registered");
        self.workers.insert(id, record);
        self.spawned.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Remove and join every worker that has signalled completion
    pub async fn reap_completed(&self) -> usize {
        let finished: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|entry| entry.value().is_complete())
            .map(|entry| *entry.key())
            .collect();

        let mut reaped = 0;
        for id in finished {
            if let Some((id, record)) = self.workers.remove(&id) {
                record.join(id).await;
                reaped += 1;
            }
        }

        if reaped > 0 {
            self.reaped.fetch_add(reaped as u64, Ordering::Relaxed);
            debug!(reaped, remaining = self.workers.len(), "Reaped completed workers");
        }
        reaped
    }

    /// Join every remaining worker, waiting for unfinished ones
    pub async fn drain_all(&self) -> usize {
        let mut drained = 0;

        loop {
            let ids: Vec<WorkerId> = self.workers.iter().map(|entry| *entry.key()).collect();
            if ids.is_empty() {
                break;
            }

            for id in ids {
                if let Some((id, record)) = self.workers.remove(&id) {
                    if !record.is_complete() {
                        debug!(worker = %id, peer = %record.peer, "Waiting for worker");
                    }
                    record.join(id).await;
                    drained += 1;
                }
            }
        }

        self.reaped.fetch_add(drained as u64, Ordering::Relaxed);
        drained
    }

    /// Records not yet joined
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// True when no record is held
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Workers spawned over the registry's lifetime
    pub fn spawned_total(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Workers joined over the registry's lifetime
    pub fn reaped_total(&self) -> u64 {
        self.reaped.load(Ordering::Relaxed)
    }
}
