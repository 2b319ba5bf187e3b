//! Fixed-size worker pool
//!
//! FIFO task queue served by a fixed number of named worker threads. Used
//! by bulk restore to run one task per persisted call.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::error;

/// Error returned when a task cannot be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

impl std::fmt::Display for QueueFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker pool queue is full or shut down")
    }
}

impl std::error::Error for QueueFull {}

/// Pool metrics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Tasks waiting in the queue
    pub queue_depth: usize,
    /// Tasks currently running
    pub active_tasks: usize,
    /// Tasks finished, including ones that panicked
    pub tasks_completed: u64,
    /// Worker threads
    pub worker_count: usize,
}

type Task = Box<dyn FnOnce() + Send>;

struct PoolInner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    idle: Condvar,
    shutdown: AtomicBool,
    active_tasks: AtomicUsize,
    tasks_completed: AtomicU64,
    max_queue_depth: usize,
}

/// A fixed set of worker threads draining one FIFO queue.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl WorkerPool {
    /// Start `num_threads` workers named `<name>-0`, `<name>-1`, ...
    ///
    /// At most `max_queue_depth` tasks may wait at a time.
    pub fn new(name: &str, num_threads: usize, max_queue_depth: usize) -> Self {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active_tasks: AtomicUsize::new(0),
            tasks_completed: AtomicU64::new(0),
            max_queue_depth,
        });

        let workers = (0..num_threads)
            .map(|i| {
                let inner = Arc::clone(&inner);
                std::thread::Builder::new()
                    .name(format!("{}-{}", name, i))
                    .spawn(move || worker_loop(&inner))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            inner,
            workers: Mutex::new(workers),
            num_threads,
        }
    }

    /// Queue `work`.
    ///
    /// Fails when the queue is at capacity or the pool was shut down.
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) -> Result<(), QueueFull> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(QueueFull);
        }
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.max_queue_depth {
                return Err(QueueFull);
            }
            queue.push_back(Box::new(work));
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until the queue is empty and no task is running.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while !queue.is_empty() || self.inner.active_tasks.load(Ordering::Acquire) > 0 {
            self.inner.idle.wait(&mut queue);
        }
    }

    /// Let workers finish the queue, then join them.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Current metrics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_depth: self.inner.queue.lock().len(),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            worker_count: self.num_threads,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active_tasks` even when the task panics.
struct ActiveTaskGuard<'a> {
    inner: &'a PoolInner,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        let prev = self.inner.active_tasks.fetch_sub(1, Ordering::Release);
        self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);
        if prev == 1 {
            let _queue = self.inner.queue.lock();
            self.inner.idle.notify_all();
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.active_tasks.fetch_add(1, Ordering::Release);
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            error!(
                target: "relaystate::pool",
                "worker task panicked: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn test_submit_and_drain() {
        let pool = WorkerPool::new("t", 2, 64);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        pool.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        assert_eq!(pool.stats().tasks_completed, 10);
    }

    #[test]
    fn test_fifo_with_one_worker() {
        let pool = WorkerPool::new("t", 1, 64);
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(move || {
            b.wait();
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let o = Arc::clone(&order);
            pool.submit(move || o.lock().push(i)).unwrap();
        }
        barrier.wait();
        pool.drain();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_queue_limit() {
        let pool = WorkerPool::new("t", 1, 1);
        let barrier = Arc::new(Barrier::new(2));
        let b = Arc::clone(&barrier);
        pool.submit(move || {
            b.wait();
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        pool.submit(|| {}).unwrap();
        assert_eq!(pool.submit(|| {}), Err(QueueFull));
        barrier.wait();
        pool.drain();
    }

    #[test]
    fn test_panic_does_not_hang_drain() {
        let pool = WorkerPool::new("t", 2, 64);
        let counter = Arc::new(AtomicUsize::new(0));
        pool.submit(|| panic!("intentional test panic")).unwrap();
        for _ in 0..3 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        pool.drain();
        assert_eq!(counter.load(Ordering::Relaxed), 3);
        assert_eq!(pool.stats().tasks_completed, 4);
    }

    #[test]
    fn test_shutdown_runs_queue_and_rejects_later_work() {
        let pool = WorkerPool::new("t", 1, 64);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 5);
        assert!(pool.submit(|| {}).is_err());
        pool.shutdown();
    }
}
