//! Event sinks
//!
//! The scheduler queue accepts pushes from several watcher tasks at once.
//! Producers never observe a result: a push either lands in the queue or,
//! if the consumer is gone, is dropped with a warning.

use async_trait::async_trait;
use keel_core::domain::event::Event;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

/// Destination for replicated events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Hands an event to the consumer
    ///
    /// May wait while the consumer catches up; this is the backpressure
    /// between watchers and the scheduler.
    async fn push(&self, event: Event);
}

/// Bounded multi-producer queue feeding the scheduler
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Event>,
}

/// Receiving half of a [`ChannelSink`]
#[derive(Debug)]
pub struct EventQueue {
    rx: mpsc::Receiver<Event>,
}

impl ChannelSink {
    /// Creates a queue holding at most `capacity` pending events
    pub fn new(capacity: usize) -> (Self, EventQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, EventQueue { rx })
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn push(&self, event: Event) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event).await {
            warn!(
                "Scheduler queue closed, dropping {} event for pipeline {}",
                event.kind,
                event.pipeline_id()
            );
        }
    }
}

impl EventQueue {
    /// Waits for the next event; `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Takes an event if one is ready
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

/// A sink that records every event, for tests and diagnostics
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: RwLock<Vec<Event>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Removes and returns all collected events
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.write())
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn push(&self, event: Event) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::event::EventType;
    use keel_core::domain::pipeline::Pipeline;
    use std::time::Duration;

    #[tokio::test]
    async fn test_channel_sink_preserves_order() {
        let (sink, mut queue) = ChannelSink::new(8);
        sink.push(Event::put(Pipeline::new("a"))).await;
        sink.push(Event::delete(Pipeline::new("a"))).await;

        assert_eq!(queue.recv().await.unwrap().kind, EventType::Put);
        assert_eq!(queue.recv().await.unwrap().kind, EventType::Delete);
        assert!(queue.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_full_queue_applies_backpressure() {
        let (sink, mut queue) = ChannelSink::new(1);
        sink.push(Event::put(Pipeline::new("a"))).await;

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            sink.push(Event::put(Pipeline::new("b"))),
        )
        .await;
        assert!(blocked.is_err());

        assert_eq!(queue.recv().await.unwrap().pipeline_id(), "a");
        sink.push(Event::put(Pipeline::new("c"))).await;
        assert_eq!(queue.recv().await.unwrap().pipeline_id(), "c");
    }

    #[tokio::test]
    async fn test_push_after_consumer_dropped_does_not_block() {
        let (sink, queue) = ChannelSink::new(1);
        drop(queue);
        sink.push(Event::kill("a")).await;
    }

    #[tokio::test]
    async fn test_collecting_sink() {
        let sink = CollectingSink::new();
        assert!(sink.is_empty());
        sink.push(Event::kill("a")).await;
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.take()[0].kind, EventType::Kill);
        assert!(sink.is_empty());
    }
}
