//! Shared broker state: the worker table, the idle pool and the status
//! broadcaster, behind the four pool operations every session goes through.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use vox_core::errors::SessionError;
use vox_core::ids::WorkerId;

use crate::config::BrokerConfig;
use crate::pool::{WorkerHandle, WorkerPool};
use crate::status::StatusBroadcaster;

pub struct BrokerState {
    pub config: BrokerConfig,
    pub status: StatusBroadcaster,
    /// Cooperative shutdown signal for every connection task.
    pub shutdown: CancellationToken,
    workers: DashMap<WorkerId, WorkerHandle>,
    pool: WorkerPool,
}

impl BrokerState {
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        let status = StatusBroadcaster::new(config.status_capacity);
        Arc::new(Self {
            config,
            status,
            shutdown: CancellationToken::new(),
            workers: DashMap::new(),
            pool: WorkerPool::new(),
        })
    }

    /// A worker connected: put it in the idle pool.
    pub fn register_worker(&self, handle: WorkerHandle) {
        tracing::info!(worker_id = %handle.id(), "New worker available");
        self.workers.insert(handle.id().clone(), handle.clone());
        self.pool.add(handle);
        self.publish_status();
    }

    /// A worker's transport closed: pull it out of circulation, and if a
    /// session was riding on it, fail that one session.
    pub fn unregister_worker(&self, id: &WorkerId) {
        let Some((_, handle)) = self.workers.remove(id) else {
            return;
        };
        handle.mark_disconnected();
        self.pool.remove(id);
        if let Some(binding) = handle.binding() {
            tracing::warn!(
                worker_id = %id,
                request_id = %binding.request_id,
                "Worker lost while assigned"
            );
            if binding
                .events
                .try_send(SessionError::WorkerLost.to_event())
                .is_err()
            {
                tracing::debug!(request_id = %binding.request_id, "Session already gone");
            }
        } else {
            tracing::info!(worker_id = %id, "Worker leaving");
        }
        self.publish_status();
    }

    /// Pop an idle worker, or `None` right away — sessions never queue
    /// against the pool.
    pub fn acquire_worker(&self) -> Option<WorkerHandle> {
        let handle = self.pool.acquire();
        if handle.is_some() {
            self.publish_status();
        }
        handle
    }

    /// Give a worker back. Must be called exactly once per successful
    /// `acquire_worker`, on every session exit path.
    pub fn release_worker(&self, handle: WorkerHandle) {
        self.pool.release(handle);
        self.publish_status();
    }

    /// Bump the processed-request counter (once per client session).
    pub fn request_processed(&self) {
        self.status.increment_processed();
        self.publish_status();
    }

    pub fn workers_available(&self) -> usize {
        self.pool.available()
    }

    pub fn workers_registered(&self) -> usize {
        self.workers.len()
    }

    fn publish_status(&self) {
        self.status.publish(self.pool.available());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{SessionBinding, WorkerFrame};
    use tokio::sync::mpsc;
    use vox_core::ids::RequestId;
    use vox_core::messages::ResultEvent;
    use vox_core::status::Status;

    fn state() -> Arc<BrokerState> {
        BrokerState::new(BrokerConfig::default())
    }

    fn worker() -> (WorkerHandle, mpsc::Receiver<WorkerFrame>) {
        let (tx, rx) = mpsc::channel(8);
        (WorkerHandle::new(WorkerId::new(), tx), rx)
    }

    fn bind(handle: &WorkerHandle) -> mpsc::Receiver<ResultEvent> {
        let (tx, rx) = mpsc::channel(8);
        handle.bind(SessionBinding {
            request_id: RequestId::new(),
            events: tx,
        });
        rx
    }

    #[test]
    fn register_and_acquire() {
        let state = state();
        let (w, _rx) = worker();
        state.register_worker(w);
        assert_eq!(state.workers_available(), 1);
        assert_eq!(state.workers_registered(), 1);

        assert!(state.acquire_worker().is_some());
        assert_eq!(state.workers_available(), 0);
        assert_eq!(state.workers_registered(), 1);
        assert!(state.acquire_worker().is_none());
    }

    #[test]
    fn pool_invariant_holds_through_lifecycle() {
        let state = state();
        let (w1, _rx1) = worker();
        let (w2, _rx2) = worker();
        state.register_worker(w1);
        state.register_worker(w2);

        let acquired = state.acquire_worker().unwrap();
        let _events = bind(&acquired);
        // idle + assigned == registered
        assert_eq!(state.workers_available() + 1, state.workers_registered());

        state.release_worker(acquired);
        assert_eq!(state.workers_available(), state.workers_registered());
    }

    #[test]
    fn unregister_idle_worker_shrinks_pool() {
        let state = state();
        let (w, _rx) = worker();
        let id = w.id().clone();
        state.register_worker(w);

        state.unregister_worker(&id);
        assert_eq!(state.workers_available(), 0);
        assert_eq!(state.workers_registered(), 0);
    }

    #[test]
    fn unregister_assigned_worker_notifies_session() {
        let state = state();
        let (w, _rx) = worker();
        let id = w.id().clone();
        state.register_worker(w);

        let acquired = state.acquire_worker().unwrap();
        let mut events = bind(&acquired);

        state.unregister_worker(&id);
        let event = events.try_recv().unwrap();
        assert_eq!(event.status, Status::Aborted);

        // The session's own release then drops the dead handle.
        state.release_worker(acquired);
        assert_eq!(state.workers_available(), 0);
    }

    #[test]
    fn unregister_unknown_worker_is_noop() {
        let state = state();
        state.unregister_worker(&WorkerId::new());
        assert_eq!(state.workers_registered(), 0);
    }

    #[test]
    fn status_updates_follow_pool_changes() {
        let state = state();
        let mut rx = state.status.subscribe();
        let (w, _frx) = worker();
        state.register_worker(w);

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.num_workers_available, 1);

        let acquired = state.acquire_worker().unwrap();
        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.num_workers_available, 0);

        let _events = bind(&acquired);
        state.release_worker(acquired);
        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.num_workers_available, 1);
    }
}
