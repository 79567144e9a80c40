//! Background worker pool for merge jobs.
//!
//! Jobs are boxed closures sent over a crossbeam channel to a fixed set of
//! named threads. Submission never waits for the job, and a submitted job
//! cannot be cancelled.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

pub struct IoScheduler {
    sender: Sender<Message>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl IoScheduler {
    /// Start `threads` workers (at least one).
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut workers = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let receiver: Receiver<Message> = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || worker_loop(receiver))?;
            workers.push(handle);
        }
        Ok(IoScheduler {
            sender,
            workers: Mutex::new(workers),
        })
    }

    /// Queue `job` for a worker.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(Message::Run(Box::new(job)))
            .map_err(|_| Error::Schedule("merge workers have shut down".into()))
    }

    /// Stop the workers after the jobs already queued. Idempotent.
    ///
    /// A worker calling this (e.g. a job dropping the last index handle)
    /// is not joined, since it cannot wait for itself.
    pub fn shutdown(&self) {
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for _ in &workers {
            let _ = self.sender.send(Message::Shutdown);
        }
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("merge worker panicked");
            }
        }
    }
}

impl Drop for IoScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: Receiver<Message>) {
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(job) => job(),
            Message::Shutdown => break,
        }
    }
    debug!("merge worker exiting");
}
