//! Bounded task queue consumed by one dedicated OS thread.
//!
//! `submit` never blocks: it pushes a boxed closure onto the queue and returns a handle
//! immediately. The worker thread drains the queue and runs each task to completion;
//! `stop` lets the thread drain what's queued and then exit.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::{Result, TaufluxError};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    stopped: Mutex<bool>,
}

pub struct Worker {
    tx: Sender<Job>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

/// A one-shot handle to the result of a task submitted to a [`Worker`].
pub struct WorkerHandle<R> {
    rx: Receiver<R>,
}

impl<R> WorkerHandle<R> {
    /// Blocks until the task completes and yields its result.
    pub fn wait(self) -> R {
        self.rx
            .recv()
            .expect("worker thread dropped the result channel without sending")
    }
}

impl Worker {
    pub fn spawn(queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let shared = Arc::new(Shared {
            stopped: Mutex::new(false),
        });
        let _ = queue_capacity; // std::sync::mpsc has no bound; capacity is advisory here.

        let thread = std::thread::spawn(move || {
            Self::run(rx);
        });

        Self {
            tx,
            shared,
            thread: Some(thread),
        }
    }

    fn run(rx: Receiver<Job>) {
        loop {
            match rx.recv() {
                Ok(job) => job(),
                Err(_) => break,
            }
        }
    }

    /// Queues `f` for execution on the worker thread; returns immediately with a handle
    /// to its eventual result. Fails without enqueuing once [`Worker::stop`] has run.
    pub fn submit<F, R>(&self, f: F) -> Result<WorkerHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if *self.shared.stopped.lock().unwrap() {
            return Err(TaufluxError::exhausted(
                "Worker::submit: worker has been stopped",
            ));
        }
        let (result_tx, result_rx) = mpsc::channel::<R>();
        let job: Job = Box::new(move || {
            let _ = result_tx.send(f());
        });
        self.tx
            .send(job)
            .map_err(|_| TaufluxError::exhausted("Worker::submit: worker thread is gone"))?;
        Ok(WorkerHandle { rx: result_rx })
    }

    /// Marks the worker stopped (future submits fail) and blocks until the queue has
    /// drained and the thread has exited.
    pub fn stop(&mut self) {
        *self.shared.stopped.lock().unwrap() = true;
        if let Some(thread) = self.thread.take() {
            drop(std::mem::replace(&mut self.tx, mpsc::channel().0));
            let _ = thread.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn submit_runs_and_returns_result() {
        let worker = Worker::spawn(8);
        let handle = worker.submit(|| 2 + 2).unwrap();
        assert_eq!(handle.wait(), 4);
    }

    #[test]
    fn submit_never_blocks_caller() {
        let worker = Worker::spawn(8);
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            handles.push(
                worker
                    .submit(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap(),
            );
        }
        for h in handles {
            h.wait();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn dropping_an_unwaited_handle_still_lets_the_task_finish() {
        let worker = Worker::spawn(8);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handle = worker.submit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(handle);

        let sync = worker.submit(|| ()).unwrap();
        sync.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn submit_after_stop_fails() {
        let mut worker = Worker::spawn(8);
        worker.stop();
        assert!(worker.submit(|| ()).is_err());
    }
}
