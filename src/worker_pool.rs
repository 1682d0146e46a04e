//! Fixed worker-pool executing I/O payload work off the reactor thread.
//!
//! No corresponding original-source file exists for this piece (the
//! retrieved reference project's thread pool header wasn't part of the
//! pack); this is the standard mutex + condvar + FIFO queue shape.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(thread_count: usize) -> Self {
        let thread_count = thread_count.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..thread_count)
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                std::thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn(move || Self::run(receiver))
                    .expect("spawn worker thread")
            })
            .collect();

        WorkerPool {
            sender: Some(sender),
            workers,
        }
    }

    fn run(receiver: Arc<Mutex<Receiver<Job>>>) {
        loop {
            let job = receiver.lock().unwrap().recv();
            match job {
                Ok(job) => job(),
                Err(_) => return,
            }
        }
    }

    /// Enqueues `job`; a worker picks it up as soon as one is free.
    pub fn add_task<F: FnOnce() + Send + 'static>(&self, job: F) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }
}

impl Drop for WorkerPool {
    /// Closes the job channel and joins every worker so no task is left
    /// running once the pool goes out of scope.
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn runs_every_submitted_task() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(11));
        for _ in 0..10 {
            let counter = counter.clone();
            let barrier = barrier.clone();
            pool.add_task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                barrier.wait();
            });
        }
        barrier.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
