//! Event system for progress operations
//!
//! Events are emitted after the fact they describe is durable. Delivery is
//! fire-and-forget: a missing or lagging subscriber never affects the
//! request that emitted the event.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Progress events emitted by services
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    TaskCompleted {
        user_id: String,
        quest_id: String,
        task_id: String,
        xp_awarded: i64,
    },
    XpGranted {
        user_id: String,
        pillar: String,
        amount: i64,
        new_total: i64,
    },
    QuestCompleted {
        user_id: String,
        quest_id: String,
        enrollment_id: String,
    },
    BonusAwarded {
        user_id: String,
        quest_id: String,
        pillar: String,
        bonus_xp: i64,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &ProgressEvent);
}

/// Event bus for broadcasting progress events
pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: ProgressEvent) {
        trace!(event = ?event, "Emitting progress event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::TaskCompleted { user_id, task_id, xp_awarded, .. } => {
                debug!(user_id = %user_id, task_id = %task_id, xp = xp_awarded, "Task completed");
            }
            ProgressEvent::QuestCompleted { user_id, quest_id, enrollment_id } => {
                info!(
                    user_id = %user_id,
                    quest_id = %quest_id,
                    enrollment_id = %enrollment_id,
                    "Quest completed"
                );
            }
            ProgressEvent::BonusAwarded { user_id, pillar, bonus_xp, .. } => {
                info!(
                    user_id = %user_id,
                    pillar = %pillar,
                    bonus = bonus_xp,
                    "Completion bonus awarded"
                );
            }
            _ => {
                trace!(event = ?event, "Progress event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(ProgressEvent::QuestCompleted {
            user_id: "u1".into(),
            quest_id: "q1".into(),
            enrollment_id: "e1".into(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            ProgressEvent::QuestCompleted { quest_id, enrollment_id, .. } => {
                assert_eq!(quest_id, "q1");
                assert_eq!(enrollment_id, "e1");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        // Should not panic even with no subscribers
        bus.emit(ProgressEvent::XpGranted {
            user_id: "u1".into(),
            pillar: "stem".into(),
            amount: 10,
            new_total: 10,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
