//! Bounded execution runtime for identify requests.
//!
//! The `ContactEngine` is synchronous and every request holds the store's
//! transaction for its duration. This module runs requests on a fixed pool
//! of worker threads fed by a bounded queue, so callers get back-pressure
//! (`QueueFull`) instead of unbounded thread growth.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::debug;

use crate::engine::ContactEngine;
use crate::error::{ExecutionError, LinkError, LinkResult};
use crate::request::IdentifyRequest;
use crate::view::IdentityView;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct ContactRuntimeConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued requests.
    pub queue_capacity: usize,
}

impl Default for ContactRuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

enum Job {
    Identify {
        request: IdentifyRequest,
        reply: Sender<LinkResult<IdentityView>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(workers: usize, queue_capacity: usize, engine: &Arc<ContactEngine>) -> io::Result<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let engine = Arc::clone(engine);
            let handle = thread::Builder::new()
                .name(format!("contactlink-worker-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Identify { request, reply }) => {
                            let result = engine.identify(&request);
                            // The caller may have given up waiting.
                            let _ = reply.send(result);
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })?;
            handles.push(handle);
        }

        debug!(workers, queue_capacity, "started contact worker pool");
        Ok(Self {
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    fn try_submit(&self, job: Job) -> Result<(), LinkError> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(LinkError::Execution(ExecutionError::QueueFull {
                capacity: self.queue_capacity,
            })),
            Err(TrySendError::Disconnected(_)) => {
                Err(LinkError::Execution(ExecutionError::Disconnected))
            }
        }
    }

    fn shutdown(self) {
        // Close the channel: workers drain queued jobs then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Handle returned by [`ContactRuntime::submit`].
pub struct IdentifyHandle {
    rx: Receiver<LinkResult<IdentityView>>,
}

impl IdentifyHandle {
    /// Waits for the request to complete.
    pub fn join(self) -> LinkResult<IdentityView> {
        self.rx
            .recv()
            .map_err(|_| LinkError::Execution(ExecutionError::Disconnected))?
    }

    /// Waits for the request to complete with a timeout.
    ///
    /// A timeout only stops the wait. The worker still finishes the request
    /// and commits or rolls back on its own.
    pub fn join_timeout(self, timeout: Duration) -> LinkResult<IdentityView> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => LinkError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => LinkError::Execution(ExecutionError::Disconnected),
        })?
    }
}

/// Worker-pool runtime in front of a [`ContactEngine`].
pub struct ContactRuntime {
    engine: Arc<ContactEngine>,
    pool: Option<WorkerPool>,
}

impl ContactRuntime {
    /// Start the worker threads.
    ///
    /// # Errors
    /// Returns the OS error if a worker thread cannot be spawned.
    pub fn new(engine: ContactEngine, config: ContactRuntimeConfig) -> io::Result<Self> {
        let engine = Arc::new(engine);
        let pool = WorkerPool::start(config.workers, config.queue_capacity, &engine)?;
        Ok(Self {
            engine,
            pool: Some(pool),
        })
    }

    fn pool(&self) -> Result<&WorkerPool, LinkError> {
        self.pool
            .as_ref()
            .ok_or(LinkError::Execution(ExecutionError::Disconnected))
    }

    /// Queue a request without waiting for it.
    ///
    /// # Errors
    /// `QueueFull` if the queue is at capacity.
    pub fn submit(&self, request: IdentifyRequest) -> Result<IdentifyHandle, LinkError> {
        let (tx, rx) = bounded::<LinkResult<IdentityView>>(1);
        self.pool()?.try_submit(Job::Identify { request, reply: tx })?;
        Ok(IdentifyHandle { rx })
    }

    /// Run a request on the pool and wait for it.
    pub fn identify(&self, request: IdentifyRequest) -> LinkResult<IdentityView> {
        self.submit(request)?.join()
    }

    /// Returns a shared reference to the underlying engine.
    #[must_use]
    pub fn engine(&self) -> &ContactEngine {
        &self.engine
    }

    #[cfg(test)]
    fn submit_sleep(&self, duration: Duration) -> Result<Receiver<()>, LinkError> {
        let (tx, rx) = bounded::<()>(1);
        self.pool()?.try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

impl Drop for ContactRuntime {
    fn drop(&mut self) {
        // Deterministic shutdown: stop workers and join threads.
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}
