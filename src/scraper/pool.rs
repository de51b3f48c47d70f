use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, error};

use crate::errors::RequestError;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub type Task<T> = Box<dyn FnOnce() -> T + Send + 'static>;

/// Fixed set of worker threads fed from a shared job queue.
///
/// A pool lives for one bulk request and is reused by every retry pass, so
/// threads are spawned once per call rather than once per pass.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

fn worker_loop(id: usize, receiver: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = match receiver.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => break,
        };
        match job {
            Ok(job) => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("worker {}: job panicked", id);
                }
            }
            Err(_) => break,
        }
    }
    debug!("worker {} exiting", id);
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, RequestError> {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("ytsm-worker-{}", id))
                .spawn(move || worker_loop(id, receiver))
                .map_err(|e| RequestError::WorkerPool(e.to_string()))?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Runs every task on the pool and blocks until all of them are done.
    /// Results come back in submission order.
    pub fn run_all<T: Send + 'static>(&self, tasks: Vec<Task<T>>) -> Result<Vec<T>, RequestError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| RequestError::WorkerPool("pool is shut down".to_string()))?;

        let count = tasks.len();
        let (result_tx, result_rx) = mpsc::channel::<(usize, T)>();
        for (index, task) in tasks.into_iter().enumerate() {
            let result_tx = result_tx.clone();
            let job: Job = Box::new(move || {
                let output = task();
                let _ = result_tx.send((index, output));
            });
            sender
                .send(job)
                .map_err(|_| RequestError::WorkerPool("all workers exited".to_string()))?;
        }
        drop(result_tx);

        let mut slots: Vec<Option<T>> = (0..count).map(|_| None).collect();
        for _ in 0..count {
            let (index, output) = result_rx
                .recv()
                .map_err(|_| RequestError::WorkerPool("a task died before reporting".to_string()))?;
            slots[index] = Some(output);
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| RequestError::WorkerPool("missing task result".to_string())))
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_run_all_preserves_order() {
        let pool = WorkerPool::new(3).unwrap();
        let tasks: Vec<Task<usize>> = (0..10usize)
            .map(|n| Box::new(move || n * 2) as Task<usize>)
            .collect();
        let results = pool.run_all(tasks).unwrap();
        assert_eq!(results, (0..10usize).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_pool_is_reusable() {
        let pool = WorkerPool::new(2).unwrap();
        for round in 0..3 {
            let tasks: Vec<Task<usize>> = (0..4usize)
                .map(|n| Box::new(move || n + round) as Task<usize>)
                .collect();
            assert_eq!(pool.run_all(tasks).unwrap().len(), 4);
        }
    }

    #[test]
    fn test_tasks_run_on_pool_threads() {
        let pool = WorkerPool::new(2).unwrap();
        let tasks: Vec<Task<String>> = (0..6)
            .map(|_| {
                Box::new(|| thread::current().name().unwrap_or_default().to_string()) as Task<String>
            })
            .collect();
        let names: HashSet<String> = pool.run_all(tasks).unwrap().into_iter().collect();
        assert!(names.iter().all(|n| n.starts_with("ytsm-worker-")));
        assert!(names.len() <= 2);
    }

    #[test]
    fn test_zero_size_gets_one_worker() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_panicking_task_reports_error() {
        let pool = WorkerPool::new(2).unwrap();
        let tasks: Vec<Task<usize>> = vec![Box::new(|| 1), Box::new(|| panic!("boom"))];
        assert!(matches!(pool.run_all(tasks), Err(RequestError::WorkerPool(_))));

        // The worker survives the panic.
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let tasks: Vec<Task<()>> = vec![Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })];
        pool.run_all(tasks).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_task_list() {
        let pool = WorkerPool::new(2).unwrap();
        let results: Vec<usize> = pool.run_all(Vec::new()).unwrap();
        assert!(results.is_empty());
    }
}
