use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::error::{Error, Result};

/// A submission the pool could not take. The job is handed back untouched.
pub enum Rejected<T> {
    /// The queue is at `max_queue_depth`.
    Full(T),
    /// The workers are gone.
    Closed(T),
}

impl<T> Rejected<T> {
    pub fn into_inner(self) -> T {
        match self {
            Rejected::Full(job) | Rejected::Closed(job) => job,
        }
    }
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejected::Full(_) => f.write_str("Rejected::Full(..)"),
            Rejected::Closed(_) => f.write_str("Rejected::Closed(..)"),
        }
    }
}

/// Fixed set of worker threads draining one bounded FIFO queue.
///
/// [`ThreadPool::append`] never blocks: when the queue is full the job comes
/// straight back so the caller (the reactor) can shed it. Workers block on the
/// channel while it is empty and exit once the pool is dropped.
pub struct ThreadPool<T: Send + 'static> {
    sender: Option<Sender<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> ThreadPool<T> {
    pub fn new<F>(
        worker_count: usize,
        max_queue_depth: usize,
        pin_workers: bool,
        handler: F,
    ) -> Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        if worker_count == 0 {
            return Err(Error::NoWorkers);
        }
        if max_queue_depth == 0 {
            return Err(Error::ZeroQueueDepth);
        }

        let (sender, receiver) = bounded::<T>(max_queue_depth);
        let handler = Arc::new(handler);
        let cores = if pin_workers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let receiver = receiver.clone();
            let handler = Arc::clone(&handler);
            let core = (!cores.is_empty()).then(|| cores[i % cores.len()]);

            let spawned = thread::Builder::new()
                .name(format!("flint-worker-{i}"))
                .spawn(move || {
                    if let Some(core) = core {
                        core_affinity::set_for_current(core);
                        tracing::debug!(worker = i, core = core.id, "worker pinned");
                    }
                    run_worker(&receiver, handler.as_ref());
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // dropping the sender lets the already spawned workers exit
                    drop(sender);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(Error::Spawn(e));
                }
            }
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queue `job` for a worker without blocking.
    pub fn append(&self, job: T) -> std::result::Result<(), Rejected<T>> {
        let Some(sender) = self.sender.as_ref() else {
            return Err(Rejected::Closed(job));
        };
        sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => Rejected::Full(job),
            TrySendError::Disconnected(job) => Rejected::Closed(job),
        })
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

fn run_worker<T, F: Fn(T)>(receiver: &Receiver<T>, handler: &F) {
    while let Ok(job) = receiver.recv() {
        handler(job);
    }
}

impl<T: Send + 'static> Drop for ThreadPool<T> {
    fn drop(&mut self) {
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn rejects_zero_sizes() {
        assert!(matches!(
            ThreadPool::<u32>::new(0, 4, false, |_| {}),
            Err(Error::NoWorkers)
        ));
        assert!(matches!(
            ThreadPool::<u32>::new(1, 0, false, |_| {}),
            Err(Error::ZeroQueueDepth)
        ));
    }

    #[test]
    fn single_worker_is_fifo() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::channel();
        let pool = {
            let seen = Arc::clone(&seen);
            ThreadPool::new(1, 64, false, move |n: u32| {
                seen.lock().unwrap().push(n);
                done_tx.send(()).unwrap();
            })
            .unwrap()
        };

        for n in 0..20 {
            pool.append(n).unwrap();
        }
        for _ in 0..20 {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn full_queue_hands_the_job_back() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let pool = ThreadPool::new(1, 2, false, move |_: u32| {
            started_tx.send(()).unwrap();
            gate_rx.lock().unwrap().recv().unwrap();
        })
        .unwrap();

        // the worker takes job 0 and parks; 1 and 2 fill the queue
        pool.append(0).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pool.append(1).unwrap();
        pool.append(2).unwrap();
        assert_eq!(pool.queued(), 2);

        match pool.append(3) {
            Err(Rejected::Full(job)) => assert_eq!(job, 3),
            other => panic!("expected a full queue, got {other:?}"),
        }

        for _ in 0..3 {
            gate_tx.send(()).unwrap();
        }
        drop(pool);
    }

    #[test]
    fn drop_joins_idle_workers() {
        let pool = ThreadPool::new(4, 8, false, |_: ()| {}).unwrap();
        assert_eq!(pool.worker_count(), 4);
        drop(pool);
    }
}
