//! Bounded worker pool for upload sessions.
//!
//! `capacity` sessions run at once; everything else waits in strict FIFO
//! order. Submitting never waits for a slot, so the accept loop keeps
//! accepting while every worker is busy.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};

use crate::error::ServerError;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Queued {
    job: Job,
    guard: InflightGuard,
}

struct Shared {
    slots: Arc<Semaphore>,
    waiting: AtomicUsize,
    inflight: AtomicUsize,
    idle: Notify,
}

/// Counts a session from admission until its task is gone, whether it
/// finished, panicked or was never started.
struct InflightGuard(Arc<Shared>);

impl InflightGuard {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.inflight.fetch_add(1, Ordering::AcqRel);
        InflightGuard(shared.clone())
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.0.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Result of a successful `submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Session id handed to the task
    pub id: u64,
    /// Number of sessions waiting for a slot, this one included; 0 when it
    /// started right away.
    pub waiting: usize,
}

impl Admission {
    pub fn started(&self) -> bool {
        self.waiting == 0
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    capacity: usize,
    max_queued: Option<usize>,
    next_id: AtomicU64,
    backlog: mpsc::UnboundedSender<Queued>,
}

impl WorkerPool {
    /// Must be called inside a Tokio runtime: the FIFO dispatcher is
    /// spawned here.
    pub fn new(capacity: usize, max_queued: Option<usize>) -> Self {
        let capacity = capacity.max(1);
        let shared = Arc::new(Shared {
            slots: Arc::new(Semaphore::new(capacity)),
            waiting: AtomicUsize::new(0),
            inflight: AtomicUsize::new(0),
            idle: Notify::new(),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(shared.clone(), rx));
        WorkerPool {
            shared,
            capacity,
            max_queued,
            next_id: AtomicU64::new(1),
            backlog: tx,
        }
    }

    /// Admit one task. It runs immediately when a slot is free and no one
    /// is ahead of it, otherwise it waits its turn.
    pub fn submit<F, Fut>(&self, task: F) -> Result<Admission, ServerError>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if self.shared.waiting.load(Ordering::Acquire) == 0 {
            if let Ok(permit) = self.shared.slots.clone().try_acquire_owned() {
                let guard = InflightGuard::new(&self.shared);
                launch(permit, guard, Box::pin(task(id)));
                return Ok(Admission { id, waiting: 0 });
            }
        }

        if let Some(max) = self.max_queued {
            if self.shared.waiting.load(Ordering::Acquire) >= max {
                return Err(ServerError::QueueFull { id });
            }
        }

        let waiting = self.shared.waiting.fetch_add(1, Ordering::AcqRel) + 1;
        let queued = Queued {
            job: Box::pin(task(id)),
            guard: InflightGuard::new(&self.shared),
        };
        if self.backlog.send(queued).is_err() {
            // dispatcher is gone only when the runtime is shutting down
            self.shared.waiting.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(Admission { id, waiting })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sessions currently holding a slot.
    pub fn active(&self) -> usize {
        self.capacity - self.shared.slots.available_permits()
    }

    /// Sessions admitted but still waiting for a slot.
    pub fn queued(&self) -> usize {
        self.shared.waiting.load(Ordering::Acquire)
    }

    /// Wait until every admitted session has finished.
    pub async fn drain(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.inflight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

fn launch(permit: OwnedSemaphorePermit, guard: InflightGuard, job: Job) {
    tokio::spawn(async move {
        let _permit = permit;
        let _guard = guard;
        job.await;
    });
}

async fn dispatch(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Queued>) {
    while let Some(q) = rx.recv().await {
        let permit = match shared.slots.clone().acquire_owned().await {
            Ok(p) => p,
            // semaphore is never closed
            Err(_) => return,
        };
        shared.waiting.fetch_sub(1, Ordering::AcqRel);
        launch(permit, q.guard, q.job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn ids_start_at_one_and_increase() {
        let pool = WorkerPool::new(4, None);
        let ids: Vec<u64> = (0..5)
            .map(|_| pool.submit(|_| async {}).unwrap().id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        pool.drain().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_runs_more_than_capacity() {
        let pool = WorkerPool::new(2, None);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let (running, peak, done) = (running.clone(), peak.clone(), done.clone());
            pool.submit(move |_| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.drain().await;

        assert_eq!(done.load(Ordering::SeqCst), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiting_sessions_start_in_admission_order() {
        let pool = WorkerPool::new(1, None);
        let (release, gate) = oneshot::channel::<()>();
        let first = pool
            .submit(|_| async move {
                let _ = gate.await;
            })
            .unwrap();
        assert!(first.started());

        let order = Arc::new(Mutex::new(Vec::new()));
        for expected_wait in 1..=4 {
            let order = order.clone();
            let adm = pool
                .submit(move |id| async move {
                    order.lock().push(id);
                })
                .unwrap();
            assert_eq!(adm.waiting, expected_wait);
        }
        assert_eq!(pool.queued(), 4);

        release.send(()).unwrap();
        pool.drain().await;
        assert_eq!(*order.lock(), vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn bounded_queue_rejects_overflow() {
        let pool = WorkerPool::new(1, Some(1));
        let (release, gate) = oneshot::channel::<()>();
        pool.submit(|_| async move {
            let _ = gate.await;
        })
        .unwrap();
        let queued = pool.submit(|_| async {}).unwrap();
        assert_eq!(queued.waiting, 1);

        match pool.submit(|_| async {}) {
            Err(ServerError::QueueFull { id }) => assert_eq!(id, 3),
            other => panic!("expected QueueFull, got {:?}", other),
        }

        release.send(()).unwrap();
        pool.drain().await;
        // room again once the backlog cleared
        assert!(pool.submit(|_| async {}).is_ok());
        pool.drain().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_task_frees_its_slot() {
        let pool = WorkerPool::new(1, None);
        pool.submit(|_| async { panic!("boom") }).unwrap();

        let (tx, rx) = oneshot::channel();
        pool.submit(move |id| async move {
            let _ = tx.send(id);
        })
        .unwrap();

        let id = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("second task never ran")
            .unwrap();
        assert_eq!(id, 2);
        pool.drain().await;
    }

    #[tokio::test]
    async fn drain_on_idle_pool_returns() {
        let pool = WorkerPool::new(3, None);
        tokio::time::timeout(Duration::from_secs(1), pool.drain())
            .await
            .unwrap();
        assert_eq!(pool.capacity(), 3);
    }
}
