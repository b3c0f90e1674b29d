// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 xmsg developers

//! Fixed-size worker pool for asynchronous callbacks.
//!
//! The job queue is bounded. A full queue blocks the submitter, so a slow
//! handler throttles the polling thread and the socket inbox behind it
//! absorbs or drops the excess.

use crate::error::{Error, Result};
use crossbeam::channel::{bounded, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed number of threads draining a shared job queue.
pub(crate) struct WorkerPool {
    jobs: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one) sharing a queue of `capacity`
    /// jobs (at least one).
    pub(crate) fn new(name: &str, size: usize, capacity: usize) -> Self {
        let (tx, rx) = bounded::<Job>(capacity.max(1));
        let workers = (0..size.max(1))
            .map(|i| {
                let rx = rx.clone();
                #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
                thread::Builder::new()
                    .name(format!("{}-worker-{}", name, i))
                    .spawn(move || {
                        for job in rx.iter() {
                            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                                log::warn!("[listener] callback panicked on a worker");
                            }
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self {
            jobs: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Queue a job, waiting while the queue is full.
    pub(crate) fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        // send outside the lock so shutdown is never stuck behind a full queue
        let tx = self
            .jobs
            .lock()
            .clone()
            .ok_or(Error::Closed("worker pool"))?;
        tx.send(Box::new(job))
            .map_err(|_| Error::Closed("worker pool"))
    }

    /// Let queued jobs finish, then join every worker. Idempotent.
    pub(crate) fn shutdown(&self) {
        drop(self.jobs.lock().take());
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
