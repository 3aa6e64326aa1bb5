//! Randomized pool-lifecycle stress: thousands of concurrent sessions with
//! success, worker-lost, cancel-timeout and disconnect outcomes injected in
//! random order. The pool's own assertions catch double releases and double
//! assignments; the final bookkeeping catches leaks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use vox_broker::config::BrokerConfig;
use vox_broker::pool::{SessionBinding, WorkerHandle};
use vox_broker::state::BrokerState;
use vox_core::ids::{RequestId, WorkerId};

const WORKERS: usize = 8;
const SESSIONS: usize = 10_000;
const TASKS: usize = 32;

/// Keeps worker frame receivers alive for the duration of the test.
type RxKeeper = Arc<Mutex<Vec<mpsc::Receiver<vox_broker::pool::WorkerFrame>>>>;

fn spawn_worker(state: &Arc<BrokerState>, keeper: &RxKeeper) {
    let (tx, rx) = mpsc::channel(4);
    keeper.lock().push(rx);
    state.register_worker(WorkerHandle::new(WorkerId::new(), tx));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn release_exactly_once_across_randomized_lifecycles() {
    let state = BrokerState::new(BrokerConfig::default());
    let keeper: RxKeeper = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..WORKERS {
        spawn_worker(&state, &keeper);
    }

    let acquires = Arc::new(AtomicUsize::new(0));
    let releases = Arc::new(AtomicUsize::new(0));
    let rejections = Arc::new(AtomicUsize::new(0));
    // worker id -> (acquires, releases)
    let per_worker: Arc<Mutex<HashMap<String, (u64, u64)>>> = Arc::new(Mutex::new(HashMap::new()));

    let mut tasks = Vec::new();
    for task_idx in 0..TASKS {
        let state = Arc::clone(&state);
        let keeper = Arc::clone(&keeper);
        let acquires = Arc::clone(&acquires);
        let releases = Arc::clone(&releases);
        let rejections = Arc::clone(&rejections);
        let per_worker = Arc::clone(&per_worker);

        tasks.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(0xD0_5E55 + task_idx as u64);
            for _ in 0..SESSIONS / TASKS {
                let Some(handle) = state.acquire_worker() else {
                    rejections.fetch_add(1, Ordering::Relaxed);
                    tokio::task::yield_now().await;
                    continue;
                };
                acquires.fetch_add(1, Ordering::Relaxed);
                per_worker.lock().entry(handle.id().to_string()).or_default().0 += 1;

                let (events_tx, _events_rx) = mpsc::channel(4);
                handle.bind(SessionBinding {
                    request_id: RequestId::new(),
                    events: events_tx,
                });

                match rng.gen_range(0..5u8) {
                    // Normal completion.
                    0 => {}
                    // Completion after some decoding time.
                    1 => {
                        tokio::time::sleep(Duration::from_micros(rng.gen_range(10..200))).await;
                    }
                    // Guard timeout with an unresponsive worker: the session
                    // force-closes the transport before releasing.
                    2 => {
                        handle.mark_disconnected();
                    }
                    // Client disconnect racing other sessions.
                    3 => {
                        tokio::task::yield_now().await;
                    }
                    // Worker transport drops mid-session.
                    _ => {
                        state.unregister_worker(handle.id());
                    }
                }

                let id = handle.id().clone();
                let lost_capacity = !handle.is_connected();
                per_worker.lock().entry(id.to_string()).or_default().1 += 1;
                state.release_worker(handle);
                releases.fetch_add(1, Ordering::Relaxed);

                if lost_capacity {
                    // The transport teardown that follows a forced close.
                    state.unregister_worker(&id);
                    spawn_worker(&state, &keeper);
                }
            }
        }));
    }

    for task in tasks {
        task.await.expect("stress task panicked");
    }

    let acquired = acquires.load(Ordering::Relaxed);
    let released = releases.load(Ordering::Relaxed);
    assert_eq!(acquired, released, "every acquire released exactly once");
    assert!(acquired > 0, "stress test exercised the pool");
    assert!(
        acquired + rejections.load(Ordering::Relaxed) == SESSIONS - SESSIONS % TASKS,
        "every session accounted for"
    );

    for (worker, (a, r)) in per_worker.lock().iter() {
        assert_eq!(a, r, "worker {worker} acquire/release mismatch");
    }

    // All capacity is back in the pool and nothing leaked.
    assert_eq!(state.workers_available(), state.workers_registered());
    assert_eq!(state.workers_available(), WORKERS);
}
