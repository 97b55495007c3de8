//! Work scheduler for asynchronous GC tasks.
//!
//! The runtime only needs `schedule(task)` with tasks running exactly once;
//! that contract is the [`TaskScheduler`] trait. [`WorkerPool`] is the
//! in-crate implementation: a fixed set of worker threads draining one
//! shared queue, parked on a condvar while it is empty. `wait_idle` lets
//! tests and the benchmark harness wait for quiescence.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait TaskScheduler: Send + Sync {
    /// Enqueues a task. Every scheduled task eventually runs exactly once.
    fn schedule(&self, task: Task);
}

struct PoolState {
    tasks: VecDeque<Task>,
    /// Queued plus currently running tasks.
    pending: usize,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
    idle: Condvar,
    stop: AtomicBool,
}

/// Fixed-size worker pool.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        assert!(workers > 0, "worker pool needs at least one thread");
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                tasks: VecDeque::new(),
                pending: 0,
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
            stop: AtomicBool::new(false),
        });
        let handles = (0..workers)
            .map(|id| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("revier-gc-{id}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("spawn gc worker")
            })
            .collect();
        Self { shared, handles }
    }

    /// Blocks until every scheduled task has finished.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while state.pending > 0 {
            self.shared.idle.wait(&mut state);
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    break task;
                }
                if shared.stop.load(Ordering::Acquire) {
                    return;
                }
                shared.available.wait(&mut state);
            }
        };
        task();
        let mut state = shared.state.lock();
        state.pending -= 1;
        if state.pending == 0 {
            shared.idle.notify_all();
        }
    }
}

impl TaskScheduler for WorkerPool {
    fn schedule(&self, task: Task) {
        {
            let mut state = self.shared.state.lock();
            state.tasks.push_back(task);
            state.pending += 1;
        }
        self.shared.available.notify_one();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.available.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn tasks_run_exactly_once() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            pool.schedule(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn wait_idle_covers_running_tasks() {
        let pool = WorkerPool::new(1);
        let done = Arc::new(AtomicBool::new(false));
        {
            let done = Arc::clone(&done);
            pool.schedule(Box::new(move || {
                thread::sleep(std::time::Duration::from_millis(30));
                done.store(true, Ordering::SeqCst);
            }));
        }
        pool.wait_idle();
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn drop_joins_workers() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(4);
            for _ in 0..16 {
                let counter = Arc::clone(&counter);
                pool.schedule(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }
            pool.wait_idle();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn tasks_can_schedule_tasks() {
        let pool = Arc::new(WorkerPool::new(2));
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool2 = Arc::clone(&pool);
            let counter = Arc::clone(&counter);
            pool.schedule(Box::new(move || {
                let counter = Arc::clone(&counter);
                pool2.schedule(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }));
        }
        pool.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
