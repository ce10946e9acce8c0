//! Bounded worker pool whose active worker count can grow and shrink at
//! runtime.
//!
//! `max_workers` OS threads are spawned up front; only workers whose index is
//! below the current limit pull tasks. Resizing is requested by sending
//! [`ScalingDecision`]s on the control channel. Every task runs under
//! `catch_unwind`, so a panicking task fails on its own and the pool keeps
//! going. Shutdown (explicit or on drop) drains queued tasks before joining.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use sweep_types::{internal_error, EvalError, SweepError, SweepResult};

use crate::scaling::ScalingDecision;

const IDLE_POLL: Duration = Duration::from_millis(20);

type Job = Box<dyn FnOnce() -> bool + Send>;

/// Lifecycle of a worker slot: `Idle -> Running -> (Completed | Failed)`,
/// back to `Idle` once it finds no more work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub index: usize,
    pub state: WorkerState,
    pub completed: u64,
    pub failed: u64,
    pub busy_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub max_workers: usize,
    pub current_workers: usize,
    pub min_workers_seen: usize,
    pub max_workers_seen: usize,
    pub grows: u64,
    pub shrinks: u64,
    pub workers: Vec<WorkerStats>,
}

#[derive(Debug)]
struct WorkerSlot {
    state: WorkerState,
    completed: u64,
    failed: u64,
    busy: Duration,
}

struct Shared {
    max_workers: usize,
    current: AtomicUsize,
    min_seen: AtomicUsize,
    max_seen: AtomicUsize,
    grows: AtomicU64,
    shrinks: AtomicU64,
    shutdown: AtomicBool,
    slots: Vec<Mutex<WorkerSlot>>,
    control_rx: Receiver<ScalingDecision>,
    gate: Mutex<()>,
    wake: Condvar,
}

impl Shared {
    fn current_workers(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    fn set_state(&self, index: usize, state: WorkerState) {
        self.slots[index].lock().state = state;
    }

    /// Consume every queued control message, returning the resulting limit.
    fn apply_pending(&self) -> usize {
        while let Ok(decision) = self.control_rx.try_recv() {
            self.apply(decision);
        }
        self.current_workers()
    }

    fn apply(&self, decision: ScalingDecision) {
        let max = self.max_workers;
        let step = |n: usize| match decision {
            ScalingDecision::Grow if n < max => Some(n + 1),
            ScalingDecision::Shrink if n > 1 => Some(n - 1),
            _ => None,
        };
        if let Ok(previous) = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, step)
        {
            let now = match decision {
                ScalingDecision::Grow => {
                    self.grows.fetch_add(1, Ordering::Relaxed);
                    previous + 1
                }
                _ => {
                    self.shrinks.fetch_add(1, Ordering::Relaxed);
                    previous - 1
                }
            };
            self.min_seen.fetch_min(now, Ordering::Relaxed);
            self.max_seen.fetch_max(now, Ordering::Relaxed);
            info!(?decision, from = previous, to = now, "Worker pool resized");
            if decision == ScalingDecision::Grow {
                self.wake.notify_all();
            }
        }
    }
}

/// Handle to one submitted task.
pub struct TaskHandle<T> {
    rx: Receiver<Result<T, EvalError>>,
    done: Arc<AtomicBool>,
}

impl<T> TaskHandle<T> {
    /// True once the task has run to completion (or panicked).
    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Block until the task finishes.
    pub fn join(self) -> Result<T, EvalError> {
        self.rx.recv().unwrap_or_else(|_| {
            Err(EvalError::Panicked {
                message: "task dropped before completion".to_string(),
            })
        })
    }
}

/// Join/gather barrier: wait for every handle, preserving order.
pub fn gather<T>(handles: Vec<TaskHandle<T>>) -> Vec<Result<T, EvalError>> {
    handles.into_iter().map(TaskHandle::join).collect()
}

pub struct DynamicWorkerPool {
    shared: Arc<Shared>,
    job_tx: Option<Sender<Job>>,
    control_tx: Sender<ScalingDecision>,
    threads: Vec<JoinHandle<()>>,
}

impl DynamicWorkerPool {
    /// Spawn `max_workers` threads with `initial_workers` of them active.
    pub fn new(max_workers: usize, initial_workers: usize) -> SweepResult<Self> {
        let max_workers = max_workers.max(1);
        let initial = initial_workers.clamp(1, max_workers);
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (control_tx, control_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            max_workers,
            current: AtomicUsize::new(initial),
            min_seen: AtomicUsize::new(initial),
            max_seen: AtomicUsize::new(initial),
            grows: AtomicU64::new(0),
            shrinks: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            slots: (0..max_workers)
                .map(|_| {
                    Mutex::new(WorkerSlot {
                        state: WorkerState::Idle,
                        completed: 0,
                        failed: 0,
                        busy: Duration::ZERO,
                    })
                })
                .collect(),
            control_rx,
            gate: Mutex::new(()),
            wake: Condvar::new(),
        });

        let mut pool = Self {
            shared,
            job_tx: Some(job_tx),
            control_tx,
            threads: Vec::with_capacity(max_workers),
        };

        for index in 0..max_workers {
            let shared = Arc::clone(&pool.shared);
            let jobs = job_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("sweep-worker-{index}"))
                .spawn(move || worker_loop(index, shared, jobs))
                .map_err(|e| SweepError::PoolInit {
                    message: format!("failed to spawn worker {index}: {e}"),
                })?;
            pool.threads.push(handle);
        }

        debug!(max_workers, initial, "Worker pool started");
        Ok(pool)
    }

    pub fn max_workers(&self) -> usize {
        self.shared.max_workers
    }

    pub fn current_workers(&self) -> usize {
        self.shared.current_workers()
    }

    /// Sender for resize requests. Messages are consumed by the pool on its
    /// next [`DynamicWorkerPool::apply_pending`] or [`DynamicWorkerPool::submit`].
    pub fn controller(&self) -> Sender<ScalingDecision> {
        self.control_tx.clone()
    }

    /// Apply queued resize requests now and return the active worker count.
    pub fn apply_pending(&self) -> usize {
        self.shared.apply_pending()
    }

    /// Queue a task without blocking.
    pub fn submit<F, T>(&self, task: F) -> SweepResult<TaskHandle<T>>
    where
        F: FnOnce() -> Result<T, EvalError> + Send + 'static,
        T: Send + 'static,
    {
        self.shared.apply_pending();
        let job_tx = self
            .job_tx
            .as_ref()
            .ok_or_else(|| internal_error!("worker pool is shut down"))?;

        let (tx, rx) = crossbeam_channel::bounded(1);
        let done = Arc::new(AtomicBool::new(false));
        let done_flag = Arc::clone(&done);

        let job: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(task))
                .unwrap_or_else(|payload| Err(EvalError::from_panic(payload)));
            let succeeded = outcome.is_ok();
            let _ = tx.send(outcome);
            done_flag.store(true, Ordering::Release);
            succeeded
        });

        job_tx
            .send(job)
            .map_err(|_| internal_error!("worker pool job queue closed"))?;
        Ok(TaskHandle { rx, done })
    }

    pub fn stats(&self) -> PoolStats {
        let workers = self
            .shared
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                let slot = slot.lock();
                WorkerStats {
                    index,
                    state: slot.state,
                    completed: slot.completed,
                    failed: slot.failed,
                    busy_secs: slot.busy.as_secs_f64(),
                }
            })
            .collect();

        PoolStats {
            max_workers: self.shared.max_workers,
            current_workers: self.shared.current_workers(),
            min_workers_seen: self.shared.min_seen.load(Ordering::Relaxed),
            max_workers_seen: self.shared.max_seen.load(Ordering::Relaxed),
            grows: self.shared.grows.load(Ordering::Relaxed),
            shrinks: self.shared.shrinks.load(Ordering::Relaxed),
            workers,
        }
    }

    /// Drain queued tasks, stop every worker, and return final statistics.
    pub fn shutdown(mut self) -> PoolStats {
        self.stop();
        self.stats()
    }

    fn stop(&mut self) {
        // Closing the queue lets active workers finish what is left, then exit.
        self.job_tx.take();
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for DynamicWorkerPool {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.stop();
        }
    }
}

fn worker_loop(index: usize, shared: Arc<Shared>, jobs: Receiver<Job>) {
    loop {
        if index >= shared.current_workers() {
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            shared.set_state(index, WorkerState::Idle);
            let mut gate = shared.gate.lock();
            shared.wake.wait_for(&mut gate, IDLE_POLL);
            continue;
        }

        match jobs.recv_timeout(IDLE_POLL) {
            Ok(job) => {
                shared.set_state(index, WorkerState::Running);
                let started = Instant::now();
                let succeeded = job();
                let mut slot = shared.slots[index].lock();
                slot.busy += started.elapsed();
                if succeeded {
                    slot.completed += 1;
                    slot.state = WorkerState::Completed;
                } else {
                    slot.failed += 1;
                    slot.state = WorkerState::Failed;
                }
            }
            Err(RecvTimeoutError::Timeout) => shared.set_state(index, WorkerState::Idle),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    shared.set_state(index, WorkerState::Idle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn runs_submitted_tasks() {
        let pool = DynamicWorkerPool::new(4, 4).unwrap();
        let handles: Vec<_> = (0..16)
            .map(|i| pool.submit(move || Ok::<_, EvalError>(i * 2)).unwrap())
            .collect();
        let results: Vec<i32> = gather(handles).into_iter().map(Result::unwrap).collect();
        assert_eq!(results, (0..16).map(|i| i * 2).collect::<Vec<_>>());

        let stats = pool.shutdown();
        let completed: u64 = stats.workers.iter().map(|w| w.completed).sum();
        assert_eq!(completed, 16);
    }

    #[test]
    fn panicking_task_is_isolated() {
        let pool = DynamicWorkerPool::new(2, 2).unwrap();
        let bad = pool
            .submit(|| -> Result<u32, EvalError> { panic!("objective blew up") })
            .unwrap();
        let good = pool.submit(|| Ok::<_, EvalError>(7u32)).unwrap();

        match bad.join() {
            Err(EvalError::Panicked { message }) => assert!(message.contains("blew up")),
            other => panic!("expected panic error, got {other:?}"),
        }
        assert_eq!(good.join().unwrap(), 7);

        let stats = pool.shutdown();
        assert_eq!(stats.workers.iter().map(|w| w.failed).sum::<u64>(), 1);
        assert_eq!(stats.workers.iter().map(|w| w.completed).sum::<u64>(), 1);
    }

    #[test]
    fn task_errors_mark_slot_failed() {
        let pool = DynamicWorkerPool::new(1, 1).unwrap();
        let handle = pool
            .submit(|| -> Result<(), EvalError> {
                Err(EvalError::Failed {
                    message: "bad params".into(),
                })
            })
            .unwrap();
        assert!(handle.join().is_err());
        let stats = pool.shutdown();
        assert_eq!(stats.workers[0].failed, 1);
    }

    #[test]
    fn control_messages_resize_within_bounds() {
        let pool = DynamicWorkerPool::new(3, 1).unwrap();
        let control = pool.controller();

        for _ in 0..5 {
            control.send(ScalingDecision::Grow).unwrap();
        }
        assert_eq!(pool.apply_pending(), 3);

        control.send(ScalingDecision::Hold).unwrap();
        assert_eq!(pool.apply_pending(), 3);

        for _ in 0..5 {
            control.send(ScalingDecision::Shrink).unwrap();
        }
        assert_eq!(pool.apply_pending(), 1);

        let stats = pool.shutdown();
        assert_eq!(stats.grows, 2);
        assert_eq!(stats.shrinks, 2);
        assert_eq!(stats.min_workers_seen, 1);
        assert_eq!(stats.max_workers_seen, 3);
    }

    #[test]
    fn only_active_workers_pull_tasks() {
        let pool = DynamicWorkerPool::new(4, 1).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| pool.submit(|| Ok::<_, EvalError>(())).unwrap())
            .collect();
        gather(handles);

        let stats = pool.shutdown();
        assert_eq!(stats.workers[0].completed, 8);
        assert!(stats.workers[1..].iter().all(|w| w.completed == 0));
    }

    #[test]
    fn shutdown_drains_queued_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = DynamicWorkerPool::new(2, 2).unwrap();
        for _ in 0..20 {
            let counter = Arc::clone(&counter);
            // handles dropped on purpose: shutdown must still run the tasks
            let _ = pool
                .submit(move || {
                    std::thread::sleep(Duration::from_millis(1));
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, EvalError>(())
                })
                .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn handle_reports_finished() {
        let pool = DynamicWorkerPool::new(1, 1).unwrap();
        let handle = pool.submit(|| Ok::<_, EvalError>(1)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(handle.is_finished());
        assert_eq!(handle.join().unwrap(), 1);
    }
}
