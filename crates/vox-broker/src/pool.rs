//! The idle-worker pool and the broker's handle to one worker connection.
//!
//! The pool is the single shared mutable resource of the broker. All four
//! mutations go through O(1) critical sections under one mutex; the
//! underlying queue is never exposed. Audio relay bypasses the pool
//! entirely — frames flow through each worker's own mpsc queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use vox_core::ids::{RequestId, WorkerId};
use vox_core::messages::{AdaptationPush, InitRequest, ResultEvent};

/// Frame relayed broker → worker.
#[derive(Debug)]
pub enum WorkerFrame {
    Init(InitRequest),
    Audio(Bytes),
    Eos,
    Cancel,
    Adaptation(AdaptationPush),
    /// Tear the worker transport down (unresponsive worker).
    Close,
}

/// Routing target for a worker's upstream events while it is assigned.
#[derive(Clone)]
pub struct SessionBinding {
    pub request_id: RequestId,
    pub events: mpsc::Sender<ResultEvent>,
}

/// The broker's proxy for one connected worker process.
///
/// Cloneable; all clones refer to the same connection. At most one session
/// binding may be held at a time — `bind` asserts this, since a violation
/// means the pool handed the same worker to two sessions.
#[derive(Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    frames: mpsc::Sender<WorkerFrame>,
    assigned: Arc<Mutex<Option<SessionBinding>>>,
    connected: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub fn new(id: WorkerId, frames: mpsc::Sender<WorkerFrame>) -> Self {
        Self {
            id,
            frames,
            assigned: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Queue a frame for the worker's socket writer. Returns false when the
    /// transport is gone.
    pub async fn send(&self, frame: WorkerFrame) -> bool {
        self.frames.send(frame).await.is_ok()
    }

    /// Route this worker's upstream events to a session.
    pub fn bind(&self, binding: SessionBinding) {
        let mut assigned = self.assigned.lock();
        assert!(
            assigned.is_none(),
            "worker {} bound while already assigned",
            self.id
        );
        *assigned = Some(binding);
    }

    /// Clear the session binding, returning it if one was set.
    pub fn unbind(&self) -> Option<SessionBinding> {
        self.assigned.lock().take()
    }

    /// Current binding, if any (used by the socket reader to route events).
    pub fn binding(&self) -> Option<SessionBinding> {
        self.assigned.lock().clone()
    }

    pub fn is_assigned(&self) -> bool {
        self.assigned.lock().is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }
}

/// FIFO pool of idle workers.
pub struct WorkerPool {
    idle: Mutex<VecDeque<WorkerHandle>>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            idle: Mutex::new(VecDeque::new()),
        }
    }

    /// Add a freshly registered worker to the idle pool.
    pub fn add(&self, handle: WorkerHandle) {
        let mut idle = self.idle.lock();
        debug_assert!(
            !idle.iter().any(|h| h.id() == handle.id()),
            "worker {} added to the pool twice",
            handle.id()
        );
        idle.push_back(handle);
    }

    /// Drop a worker from the idle pool, if it is there. Returns whether it
    /// was.
    pub fn remove(&self, id: &WorkerId) -> bool {
        let mut idle = self.idle.lock();
        let before = idle.len();
        idle.retain(|h| h.id() != id);
        idle.len() != before
    }

    /// Pop one idle worker. `None` means the pool is exhausted — callers
    /// never wait; they report "no decoder available" instead.
    pub fn acquire(&self) -> Option<WorkerHandle> {
        self.idle.lock().pop_front()
    }

    /// Return a worker after its session ends. Exactly one release per
    /// acquire, on every exit path. A handle whose transport has closed in
    /// the meantime is dropped rather than re-pooled.
    pub fn release(&self, handle: WorkerHandle) {
        let binding = handle.unbind();
        assert!(
            binding.is_some(),
            "worker {} released without an assignment",
            handle.id()
        );
        if handle.is_connected() {
            self.idle.lock().push_back(handle);
        } else {
            tracing::debug!(worker_id = %handle.id(), "Dropping released worker with closed transport");
        }
    }

    /// Number of idle workers.
    pub fn available(&self) -> usize {
        self.idle.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_core::status::Status;

    fn handle() -> (WorkerHandle, mpsc::Receiver<WorkerFrame>) {
        let (tx, rx) = mpsc::channel(8);
        (WorkerHandle::new(WorkerId::new(), tx), rx)
    }

    fn binding() -> (SessionBinding, mpsc::Receiver<ResultEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (
            SessionBinding {
                request_id: RequestId::new(),
                events: tx,
            },
            rx,
        )
    }

    #[test]
    fn acquire_empties_the_pool() {
        let pool = WorkerPool::new();
        let (w1, _rx1) = handle();
        let (w2, _rx2) = handle();
        pool.add(w1);
        pool.add(w2);
        assert_eq!(pool.available(), 2);

        assert!(pool.acquire().is_some());
        assert!(pool.acquire().is_some());
        assert!(pool.acquire().is_none());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn acquire_is_fifo() {
        let pool = WorkerPool::new();
        let (w1, _rx1) = handle();
        let (w2, _rx2) = handle();
        let first_id = w1.id().clone();
        pool.add(w1);
        pool.add(w2);
        assert_eq!(pool.acquire().unwrap().id(), &first_id);
    }

    #[test]
    fn release_returns_worker_to_pool() {
        let pool = WorkerPool::new();
        let (w, _rx) = handle();
        pool.add(w);

        let acquired = pool.acquire().unwrap();
        let (b, _events) = binding();
        acquired.bind(b);
        assert_eq!(pool.available(), 0);

        pool.release(acquired);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn release_drops_disconnected_worker() {
        let pool = WorkerPool::new();
        let (w, _rx) = handle();
        pool.add(w);

        let acquired = pool.acquire().unwrap();
        let (b, _events) = binding();
        acquired.bind(b);
        acquired.mark_disconnected();

        pool.release(acquired);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    #[should_panic(expected = "released without an assignment")]
    fn release_without_bind_panics() {
        let pool = WorkerPool::new();
        let (w, _rx) = handle();
        pool.add(w);
        let acquired = pool.acquire().unwrap();
        pool.release(acquired);
    }

    #[test]
    #[should_panic(expected = "already assigned")]
    fn double_bind_panics() {
        let (w, _rx) = handle();
        let (b1, _e1) = binding();
        let (b2, _e2) = binding();
        w.bind(b1);
        w.bind(b2);
    }

    #[test]
    fn remove_only_touches_idle_workers() {
        let pool = WorkerPool::new();
        let (w1, _rx1) = handle();
        let (w2, _rx2) = handle();
        let id1 = w1.id().clone();
        pool.add(w1);
        pool.add(w2);

        assert!(pool.remove(&id1));
        assert!(!pool.remove(&id1));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn binding_routes_are_visible_to_clones() {
        let (w, _rx) = handle();
        let clone = w.clone();
        let (b, _events) = binding();
        let request_id = b.request_id.clone();
        w.bind(b);

        assert!(clone.is_assigned());
        assert_eq!(clone.binding().unwrap().request_id, request_id);
    }

    #[tokio::test]
    async fn send_fails_after_writer_drops() {
        let (w, rx) = handle();
        assert!(w.send(WorkerFrame::Eos).await);
        drop(rx);
        assert!(!w.send(WorkerFrame::Cancel).await);
    }

    #[tokio::test]
    async fn events_reach_the_bound_session() {
        let (w, _rx) = handle();
        let (b, mut events) = binding();
        w.bind(b);

        let routed = w.binding().unwrap();
        routed.events.send(ResultEvent::eos()).await.unwrap();
        assert_eq!(events.recv().await.unwrap().status, Status::Eos);
    }
}
