//! Broadcast bus with a bounded replay ring.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use crate::payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};

/// Replayed backlog followed by live events. Lagging subscribers see
/// `Err(Lagged)` and continue with newer events.
pub type EventStream =
    Pin<Box<dyn Stream<Item = Result<EventEnvelope, BroadcastStreamRecvError>> + Send>>;

struct Ring {
    envelopes: VecDeque<EventEnvelope>,
    next_id: EventId,
}

/// Cloneable handle to the shared bus.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    ring: Arc<Mutex<Ring>>,
    capacity: usize,
}

impl EventBus {
    /// Bus keeping the last `capacity` events (at least one) for replay.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            ring: Arc::new(Mutex::new(Ring {
                envelopes: VecDeque::with_capacity(capacity),
                next_id: 1,
            })),
            capacity,
        }
    }

    /// Bus with [`DEFAULT_REPLAY_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Stream of events. With `Some(id)`, buffered events newer than `id` are
    /// yielded first, then live events, without duplicates.
    #[must_use]
    pub fn subscribe(&self, last_event_id: Option<EventId>) -> EventStream {
        let live = BroadcastStream::new(self.sender.subscribe());
        let backlog = last_event_id
            .map(|id| self.backlog_since(id))
            .unwrap_or_default();
        let replayed_through = backlog.last().map_or(0, |envelope| envelope.id);
        let live = live.filter(move |item| {
            !matches!(item, Ok(envelope) if envelope.id <= replayed_through)
        });
        Box::pin(tokio_stream::iter(backlog.into_iter().map(Ok)).chain(live))
    }

    /// Publish `event`, returning its id. Ids are assigned in publish order.
    pub fn publish(&self, event: Event) -> EventId {
        let mut ring = self.lock();
        let id = ring.next_id;
        ring.next_id += 1;
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        if ring.envelopes.len() == self.capacity {
            let _ = ring.envelopes.pop_front();
        }
        ring.envelopes.push_back(envelope.clone());
        // No receivers is fine; the ring still records the event.
        let _ = self.sender.send(envelope);
        id
    }

    /// Id of the newest buffered event.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock().envelopes.back().map(|envelope| envelope.id)
    }

    /// Buffered events with ids greater than `id`, oldest first.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        self.lock()
            .envelopes
            .iter()
            .filter(|envelope| envelope.id > id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::WorkflowState;
    use uuid::Uuid;

    fn entered(state: WorkflowState) -> Event {
        Event::StateEntered {
            run_id: Uuid::nil(),
            state,
        }
    }

    #[test]
    fn backlog_is_bounded_and_ordered() {
        let bus = EventBus::with_capacity(2);
        let ids: Vec<EventId> = [
            WorkflowState::Validate,
            WorkflowState::AcquireCredential,
            WorkflowState::FetchMetadata,
        ]
        .into_iter()
        .map(|state| bus.publish(entered(state)))
        .collect();

        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(bus.last_event_id(), Some(3));
        let backlog: Vec<EventId> = bus.backlog_since(0).iter().map(|env| env.id).collect();
        assert_eq!(backlog, vec![2, 3]);
        assert!(bus.backlog_since(3).is_empty());
    }

    #[tokio::test]
    async fn resuming_replays_then_follows_live_events() -> Result<(), BroadcastStreamRecvError> {
        let bus = EventBus::new();
        let seen = bus.publish(entered(WorkflowState::Validate));
        let _ = bus.publish(entered(WorkflowState::AcquireCredential));
        let _ = bus.publish(entered(WorkflowState::FetchMetadata));

        let mut stream = bus.subscribe(Some(seen));
        let live = bus.publish(Event::RunFailed {
            run_id: Uuid::nil(),
            kind: "validation".into(),
            detail: "missing bucket".into(),
        });

        let mut ids = Vec::new();
        while ids.len() < 3 {
            let Some(item) = stream.next().await else { break };
            ids.push(item?.id);
        }
        assert_eq!(ids, vec![2, 3, live]);
        Ok(())
    }

    #[tokio::test]
    async fn fresh_subscribers_only_see_new_events() -> Result<(), BroadcastStreamRecvError> {
        let bus = EventBus::new();
        let _ = bus.publish(entered(WorkflowState::Validate));
        let mut stream = bus.subscribe(None);
        let id = bus.publish(entered(WorkflowState::Done));
        let envelope = stream.next().await.transpose()?;
        assert_eq!(envelope.map(|env| env.id), Some(id));
        Ok(())
    }
}
