//! Bounded background job queue with retrying delivery.
//!
//! Producers call [`WorkerQueue::enqueue`], which never blocks and never
//! fails the caller: a full or closed queue drops the job with a warning. A
//! single consumer task hands each job to a [`JobHandler`] through
//! [`retry_if`](crate::retry::retry_if); jobs that still fail are logged and
//! abandoned.
//!
//! # Example
//!
//! ```rust
//! use holdfast_runtime::worker::{JobHandler, WorkerConfig, WorkerQueue};
//!
//! struct Print;
//!
//! impl JobHandler<String> for Print {
//!     type Error = std::convert::Infallible;
//!
//!     async fn handle(&self, job: &String) -> Result<(), Self::Error> {
//!         println!("{job}");
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() {
//! let queue = WorkerQueue::spawn("print", WorkerConfig::default(), Print);
//! queue.enqueue("hello".to_string());
//! queue.shutdown().await;
//! # }
//! ```

use crate::metrics::WorkerMetrics;
use crate::retry::{RetryPolicy, retry_if};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;

/// Processes one job type.
pub trait JobHandler<T>: Send + Sync + 'static {
    /// Delivery failure
    type Error: std::fmt::Display + Send;

    /// Handle one job. Called again on failure according to the retry policy.
    fn handle(&self, job: &T) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Whether a failure is worth retrying. Defaults to always.
    fn is_retryable(&self, _error: &Self::Error) -> bool {
        true
    }
}

/// Worker queue configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs buffered before new ones are dropped
    pub capacity: usize,
    /// Redelivery policy per job
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

/// A bounded queue with one consumer task.
pub struct WorkerQueue<T> {
    name: Arc<str>,
    sender: mpsc::Sender<T>,
    closed: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl<T> WorkerQueue<T>
where
    T: Send + Sync + 'static,
{
    /// Spawn the consumer task on the current tokio runtime.
    pub fn spawn<H>(name: impl Into<String>, config: WorkerConfig, handler: H) -> Self
    where
        H: JobHandler<T>,
    {
        let name: Arc<str> = Arc::from(name.into());
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let shutdown = Arc::new(Notify::new());

        let consumer = tokio::spawn(consume(
            Arc::clone(&name),
            receiver,
            handler,
            config.retry,
            Arc::clone(&shutdown),
        ));

        Self {
            name,
            sender,
            closed: Arc::new(AtomicBool::new(false)),
            shutdown,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Queue name, used in logs and metric labels.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand a job to the consumer. Returns `false` if it was dropped.
    pub fn enqueue(&self, job: T) -> bool {
        if self.closed.load(Ordering::Acquire) {
            WorkerMetrics::record_dropped(&self.name);
            tracing::warn!(queue = %self.name, "Worker queue is shut down, dropping job");
            return false;
        }

        match self.sender.try_send(job) {
            Ok(()) => {
                WorkerMetrics::record_enqueued(&self.name);
                true
            }
            Err(TrySendError::Full(_)) => {
                WorkerMetrics::record_dropped(&self.name);
                tracing::warn!(queue = %self.name, "Worker queue is full, dropping job");
                false
            }
            Err(TrySendError::Closed(_)) => {
                WorkerMetrics::record_dropped(&self.name);
                tracing::warn!(queue = %self.name, "Worker queue consumer stopped, dropping job");
                false
            }
        }
    }

    /// Stop accepting jobs, deliver everything already queued, then stop the consumer.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.notify_one();

        let consumer = self.consumer.lock().await.take();
        if let Some(handle) = consumer {
            if let Err(error) = handle.await {
                tracing::error!(queue = %self.name, error = %error, "Worker consumer task panicked");
            }
        }
        tracing::info!(queue = %self.name, "Worker queue drained");
    }
}

async fn consume<T, H>(
    name: Arc<str>,
    mut receiver: mpsc::Receiver<T>,
    handler: H,
    policy: RetryPolicy,
    shutdown: Arc<Notify>,
) where
    T: Send + Sync + 'static,
    H: JobHandler<T>,
{
    loop {
        tokio::select! {
            job = receiver.recv() => match job {
                Some(job) => process(&name, &handler, &policy, &job).await,
                None => break,
            },
            () = shutdown.notified() => {
                receiver.close();
                while let Some(job) = receiver.recv().await {
                    process(&name, &handler, &policy, &job).await;
                }
                break;
            }
        }
    }
}

async fn process<T, H>(name: &str, handler: &H, policy: &RetryPolicy, job: &T)
where
    H: JobHandler<T>,
{
    let result = retry_if(policy, || handler.handle(job), |e| handler.is_retryable(e)).await;

    match result {
        Ok(()) => WorkerMetrics::record_completed(name),
        Err(error) => {
            WorkerMetrics::record_failed(name);
            tracing::error!(queue = %name, error = %error, "Job abandoned after retries");
        }
    }
}
