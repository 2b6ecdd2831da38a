//! Background execution of blocking calls to external tools.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};

use threadpool::ThreadPool;

/// Runs jobs on a thread pool and hands their results back without blocking the simulation loop.
///
/// The owning component polls [`ExternalWorker::try_collect`] from periodic self-events until
/// [`ExternalWorker::pending`] drops to zero.
pub struct ExternalWorker<T> {
    pool: ThreadPool,
    tx: Sender<(u64, Option<T>)>,
    rx: Receiver<(u64, Option<T>)>,
    next_ticket: u64,
    pending: usize,
}

impl<T: Send + 'static> ExternalWorker<T> {
    pub fn new(name: &str, num_threads: usize) -> Self {
        let (tx, rx) = channel();
        Self {
            pool: ThreadPool::with_name(name.to_string(), num_threads.max(1)),
            tx,
            rx,
            next_ticket: 0,
            pending: 0,
        }
    }

    /// Submits job and returns its ticket.
    pub fn submit<F>(&mut self, job: F) -> u64
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending += 1;
        let tx = self.tx.clone();
        self.pool.execute(move || {
            let result = catch_unwind(AssertUnwindSafe(job)).ok();
            // receiver is gone only if the worker was dropped
            let _ = tx.send((ticket, result));
        });
        ticket
    }

    /// Returns results of all finished jobs. `None` marks a job that panicked.
    pub fn try_collect(&mut self) -> Vec<(u64, Option<T>)> {
        let mut results = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(result) => {
                    self.pending -= 1;
                    results.push(result);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        results
    }

    /// Number of submitted jobs whose results were not collected yet.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Blocks until all submitted jobs complete.
    pub fn join(&self) {
        self.pool.join();
    }
}
