//! Progress event streams for long-running external processes.
//!
//! A [`TaskStream`] yields zero or more [`TaskEvent::Progress`] events and
//! then exactly one [`TaskEvent::Finished`]. It cannot be restarted. Dropping
//! the stream before it finishes cancels the underlying work.

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{MediaError, MediaResult};

/// Progress payload of a [`TaskEvent`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Completion percentage (0-100) when known
    pub percent: Option<f64>,
    /// Free-form progress detail
    pub message: Option<String>,
}

impl TaskProgress {
    pub fn percent(percent: f64) -> Self {
        Self {
            percent: Some(percent.clamp(0.0, 100.0)),
            message: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            percent: None,
            message: Some(message.into()),
        }
    }
}

/// One event of a [`TaskStream`].
#[derive(Debug)]
pub enum TaskEvent<T> {
    Progress(TaskProgress),
    Finished(MediaResult<T>),
}

impl<T> TaskEvent<T> {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskEvent::Finished(_))
    }
}

/// Producer half of a [`TaskStream`].
pub struct TaskSender<T> {
    tx: mpsc::UnboundedSender<TaskEvent<T>>,
    cancel: CancellationToken,
}

impl<T> TaskSender<T> {
    /// Emit a progress event. Returns false once the consumer is gone.
    pub fn progress(&self, progress: TaskProgress) -> bool {
        self.tx.send(TaskEvent::Progress(progress)).is_ok()
    }

    /// Emit the final event, consuming the sender.
    pub fn finish(self, result: MediaResult<T>) {
        let _ = self.tx.send(TaskEvent::Finished(result));
    }

    /// Cancellation token observed by the producer.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// A clonable progress-only handle for helper tasks.
    pub fn progress_handle(&self) -> ProgressHandle<T> {
        ProgressHandle {
            tx: self.tx.clone(),
        }
    }
}

/// Progress-only handle that can never finish the stream.
pub struct ProgressHandle<T> {
    tx: mpsc::UnboundedSender<TaskEvent<T>>,
}

impl<T> Clone for ProgressHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> ProgressHandle<T> {
    pub fn progress(&self, progress: TaskProgress) -> bool {
        self.tx.send(TaskEvent::Progress(progress)).is_ok()
    }
}

/// Consumer half: a finite stream of progress events and one result.
pub struct TaskStream<T> {
    rx: mpsc::UnboundedReceiver<TaskEvent<T>>,
    cancel: CancellationToken,
    done: bool,
}

impl<T> Unpin for TaskStream<T> {}

impl<T> TaskStream<T> {
    /// Create a connected sender/stream pair.
    pub fn channel() -> (TaskSender<T>, TaskStream<T>) {
        Self::with_token(CancellationToken::new())
    }

    /// Create a pair that shares an existing cancellation token.
    pub fn with_token(cancel: CancellationToken) -> (TaskSender<T>, TaskStream<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            TaskSender {
                tx,
                cancel: cancel.clone(),
            },
            TaskStream {
                rx,
                cancel,
                done: false,
            },
        )
    }

    /// Request cancellation of the underlying work.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The cancellation token shared with the producer.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain the stream, handing each progress event to `on_progress`.
    pub async fn finish_with<F>(mut self, mut on_progress: F) -> MediaResult<T>
    where
        F: FnMut(TaskProgress),
    {
        while let Some(event) = self.next().await {
            match event {
                TaskEvent::Progress(progress) => on_progress(progress),
                TaskEvent::Finished(result) => return result,
            }
        }
        Err(MediaError::internal("task stream already consumed"))
    }

    /// Drain the stream, ignoring progress.
    pub async fn finish(self) -> MediaResult<T> {
        self.finish_with(|_| {}).await
    }
}

impl<T> Stream for TaskStream<T> {
    type Item = TaskEvent<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_finished() {
                    this.done = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                // Producer dropped without a result
                this.done = true;
                Poll::Ready(Some(TaskEvent::Finished(Err(MediaError::internal(
                    "task ended without a result",
                )))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for TaskStream<T> {
    fn drop(&mut self) {
        if !self.done {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_ends_after_finished() {
        let (sender, mut stream) = TaskStream::<u32>::channel();
        sender.progress(TaskProgress::percent(50.0));
        sender.finish(Ok(7));

        assert!(matches!(stream.next().await, Some(TaskEvent::Progress(_))));
        assert!(matches!(stream.next().await, Some(TaskEvent::Finished(Ok(7)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_producer_yields_error() {
        let (sender, stream) = TaskStream::<u32>::channel();
        drop(sender);
        let result = stream.finish().await;
        assert!(matches!(result, Err(MediaError::Internal(_))));
    }

    #[tokio::test]
    async fn test_drop_before_finish_cancels() {
        let (sender, stream) = TaskStream::<u32>::channel();
        let signal = sender.cancel_token();
        drop(stream);
        assert!(signal.is_cancelled());
        signal.cancelled().await;
    }

    #[tokio::test]
    async fn test_finish_with_collects_progress() {
        let (sender, stream) = TaskStream::<()>::channel();
        sender.progress(TaskProgress::percent(10.0));
        sender.progress(TaskProgress::percent(150.0));
        sender.finish(Ok(()));

        let mut seen = Vec::new();
        stream
            .finish_with(|p| seen.push(p.percent.unwrap()))
            .await
            .unwrap();
        assert_eq!(seen, vec![10.0, 100.0]);
    }
}
