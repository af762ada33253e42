//! Cancellable fetch tasks.
//!
//! A [`FetchTask`] owns the spawned future. Dropping it aborts the work, so a
//! façade that forgets a task can never observe its result.

use std::future::{Future, poll_fn};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;
use tracing::error;

#[derive(Debug, PartialEq)]
pub enum TaskOutcome<T> {
    Completed(T),
    Cancelled,
}

#[derive(Debug)]
pub struct FetchTask<T> {
    handle: JoinHandle<T>,
    generation: u64,
}

impl<T: Send + 'static> FetchTask<T> {
    /// Spawn onto the current tokio runtime.
    pub fn spawn<F>(generation: u64, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
            generation,
        }
    }
}

impl<T> FetchTask<T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {
        drop(self);
    }

    /// Must not be polled again once it returned `Ready`.
    pub fn poll_outcome(&mut self, cx: &mut Context<'_>) -> Poll<TaskOutcome<T>> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(value)) => Poll::Ready(TaskOutcome::Completed(value)),
            Poll::Ready(Err(err)) => {
                if err.is_panic() {
                    error!(error = %err, generation = self.generation, "Fetch task panicked");
                }
                Poll::Ready(TaskOutcome::Cancelled)
            }
        }
    }

    pub async fn join(mut self) -> TaskOutcome<T> {
        poll_fn(|cx| self.poll_outcome(cx)).await
    }
}

impl<T> Drop for FetchTask<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
