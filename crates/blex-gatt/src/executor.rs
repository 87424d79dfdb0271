//! Serial execution contexts
//!
//! A `SerialExecutor` runs submitted futures one at a time, in submission
//! order, on a dedicated tokio task. Sessions use one for GATT operations
//! (so at most one operation per session is being driven) and one for user
//! callbacks (so callbacks never run concurrently with each other).

use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use blex_core::{GattError, GattResult};

type Job = BoxFuture<'static, ()>;

#[derive(Debug, Clone)]
pub struct SerialExecutor {
    name: &'static str,
    jobs: mpsc::UnboundedSender<Job>,
}

impl SerialExecutor {
    /// Start the executor task. Must be called from within a tokio runtime.
    pub fn spawn(name: &'static str) -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = queue.recv().await {
                job.await;
            }
            debug!("Executor {} stopped", name);
        });
        Self { name, jobs }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue a job without waiting for it.
    pub fn post<F>(&self, job: F) -> GattResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.jobs
            .send(job.boxed())
            .map_err(|_| GattError::ExecutorClosed)
    }

    /// Queue a job and wait for its result.
    pub async fn run<F, T>(&self, job: F) -> GattResult<T>
    where
        F: Future<Output = GattResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.post(async move {
            let _ = tx.send(job.await);
        })?;
        rx.await.map_err(|_| GattError::ExecutorClosed)?
    }
}
