//! Channel-backed delivery of streamed replies
//!
//! A streaming reply is produced by a spawned task that writes [`ReplyEvent`]s
//! into a bounded channel. The consumer side is a [`ReplyStream`]; dropping it
//! aborts the producer. Providers only see the narrow [`ChunkSink`] handle.

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{ParleyError, Result};

/// Channel capacity for reply events
pub const REPLY_CHANNEL_CAPACITY: usize = 64;

/// One step of a streamed reply
#[derive(Debug)]
pub enum ReplyEvent {
    /// Filtered reply text, in arrival order
    Chunk(String),
    /// The previous attempt failed after delivering `discarded` chunks;
    /// the reply restarts from the beginning with attempt `attempt`
    Retrying { attempt: u32, discarded: usize },
    /// Final reply text of the successful attempt
    Completed(String),
    /// The reply could not be produced
    Failed(ParleyError),
}

/// Write side handed to providers while they stream
#[derive(Debug, Clone)]
pub struct ChunkSink {
    tx: mpsc::Sender<ReplyEvent>,
    delivered: Arc<AtomicUsize>,
}

impl ChunkSink {
    pub fn new(tx: mpsc::Sender<ReplyEvent>) -> Self {
        Self {
            tx,
            delivered: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a sink together with its receiving end
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ReplyEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Deliver one chunk of reply text, waiting for channel capacity.
    ///
    /// Fails with [`ParleyError::Cancelled`] once the consumer is gone.
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        self.emit(ReplyEvent::Chunk(text.into())).await?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Send a non-chunk event (retry notice, completion, failure)
    pub async fn emit(&self, event: ReplyEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ParleyError::Cancelled("Reply consumer went away".to_string()))
    }

    /// Chunks delivered since the last call, resetting the counter
    pub fn take_delivered(&self) -> usize {
        self.delivered.swap(0, Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of a streamed reply.
///
/// Yields events until `Completed` or `Failed`, then ends. Dropping the
/// stream aborts the task producing it.
#[derive(Debug)]
pub struct ReplyStream {
    events: ReceiverStream<ReplyEvent>,
    task: Option<JoinHandle<()>>,
}

impl ReplyStream {
    /// Spawn `producer` with a fresh sink and return the stream it feeds
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(ChunkSink) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sink, rx) = ChunkSink::channel(REPLY_CHANNEL_CAPACITY);
        let task = tokio::spawn(producer(sink));
        Self {
            events: ReceiverStream::new(rx),
            task: Some(task),
        }
    }

    /// Wrap an existing receiver with no task attached
    pub fn from_receiver(rx: mpsc::Receiver<ReplyEvent>) -> Self {
        Self {
            events: ReceiverStream::new(rx),
            task: None,
        }
    }

    /// Drain the stream and return the completed reply text
    pub async fn collect_text(mut self) -> Result<String> {
        use futures::StreamExt;

        while let Some(event) = self.next().await {
            match event {
                ReplyEvent::Completed(text) => return Ok(text),
                ReplyEvent::Failed(e) => return Err(e),
                ReplyEvent::Chunk(_) | ReplyEvent::Retrying { .. } => {}
            }
        }
        Err(ParleyError::Cancelled(
            "Reply stream ended without completing".to_string(),
        ))
    }
}

impl Stream for ReplyStream {
    type Item = ReplyEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let stream = ReplyStream::spawn(|sink| async move {
            sink.send("Hel").await.unwrap();
            sink.send("lo").await.unwrap();
            sink.emit(ReplyEvent::Completed("Hello".to_string()))
                .await
                .unwrap();
        });

        let events: Vec<ReplyEvent> = stream.collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ReplyEvent::Chunk(t) if t == "Hel"));
        assert!(matches!(&events[1], ReplyEvent::Chunk(t) if t == "lo"));
        assert!(matches!(&events[2], ReplyEvent::Completed(t) if t == "Hello"));
    }

    #[tokio::test]
    async fn test_collect_text_returns_failure() {
        let stream = ReplyStream::spawn(|sink| async move {
            let _ = sink.send("partial").await;
            let _ = sink
                .emit(ReplyEvent::Failed(ParleyError::Network("timeout".to_string())))
                .await;
        });

        let err = stream.collect_text().await.unwrap_err();
        assert!(matches!(err, ParleyError::Network(_)));
    }

    #[tokio::test]
    async fn test_collect_text_without_completion() {
        let stream = ReplyStream::spawn(|_sink| async move {});
        let err = stream.collect_text().await.unwrap_err();
        assert!(matches!(err, ParleyError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_take_delivered_resets() {
        let (sink, mut rx) = ChunkSink::channel(8);
        sink.send("a").await.unwrap();
        sink.send("b").await.unwrap();
        assert_eq!(sink.take_delivered(), 2);
        assert_eq!(sink.take_delivered(), 0);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_send_after_consumer_drop_is_cancelled() {
        let (sink, rx) = ChunkSink::channel(1);
        drop(rx);
        assert!(sink.is_closed());
        let err = sink.send("late").await.unwrap_err();
        assert!(matches!(err, ParleyError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_dropping_stream_aborts_producer() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();

        let stream = ReplyStream::spawn(|sink| async move {
            let _guard = done_tx;
            sink.send("first").await.unwrap();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let mut stream = stream;
        assert!(matches!(stream.next().await, Some(ReplyEvent::Chunk(_))));
        drop(stream);

        // The producer's sender half is dropped when the task is aborted.
        let result = tokio::time::timeout(Duration::from_secs(5), done_rx).await;
        assert!(matches!(result, Ok(Err(_))));
    }
}
