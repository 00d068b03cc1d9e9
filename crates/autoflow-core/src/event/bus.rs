//! Broadcast event bus for distributing `AutomationEvent` to subscribers.
//!
//! Publishing with no active subscribers is a no-op.

use autoflow_types::event::AutomationEvent;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Multi-consumer event bus for execution events.
///
/// Cloning the bus clones the sender, so the engine, scheduler and
/// classifier can all publish into the same channel.
pub struct EventBus {
    sender: broadcast::Sender<AutomationEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: AutomationEvent) {
        let _ = self.sender.send(event);
    }

    /// Receive events of one execution until it finishes.
    ///
    /// Lagged receivers skip the missed events and keep going.
    pub async fn follow_execution(
        mut rx: broadcast::Receiver<AutomationEvent>,
        execution_id: Uuid,
        mut on_event: impl FnMut(&AutomationEvent),
    ) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.execution_id() != Some(execution_id) {
                        continue;
                    }
                    on_event(&event);
                    if matches!(event, AutomationEvent::ExecutionFinished { .. }) {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoflow_types::execution::ExecutionStatus;

    fn step_completed(execution_id: Uuid) -> AutomationEvent {
        AutomationEvent::StepCompleted {
            execution_id,
            step_id: "a".to_string(),
            duration_ms: 3,
        }
    }

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(step_completed(Uuid::now_v7()));

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, AutomationEvent::StepCompleted { .. }));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(step_completed(Uuid::now_v7()));
    }

    #[tokio::test]
    async fn follow_execution_filters_and_stops_on_finish() {
        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        let mine = Uuid::now_v7();
        let other = Uuid::now_v7();

        bus.publish(step_completed(other));
        bus.publish(step_completed(mine));
        bus.publish(AutomationEvent::ExecutionFinished {
            execution_id: mine,
            automation_id: Uuid::now_v7(),
            status: ExecutionStatus::Completed,
            duration_ms: 10,
        });
        bus.publish(step_completed(mine));

        let mut seen = Vec::new();
        EventBus::follow_execution(rx, mine, |e| seen.push(e.clone())).await;
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[1], AutomationEvent::ExecutionFinished { .. }));
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();
        bus2.publish(step_completed(Uuid::now_v7()));
        assert!(rx.try_recv().is_ok());
    }
}
