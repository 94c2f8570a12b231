//! Session event dispatch with explicit per-event targeting.
//!
//! Game systems push `(event, target)` pairs during the tick; the network
//! layer drains the queue exactly once at flush time and routes each event
//! over the reliable-ordered class. Push order is preserved, which together
//! with the channel guarantee gives receivers events in send order.

use shared::protocol::{EntityId, SessionEvent};

/// Who receives an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Unicast to one connection (e.g. a rejected team choice).
    To(EntityId),
    /// Everyone except the originator (e.g. a new player's join).
    AllExcept(EntityId),
    /// Everyone including the originator (e.g. score sync).
    All,
}

impl Target {
    /// Whether a connection is a recipient under this targeting rule.
    pub fn includes(&self, conn_id: EntityId) -> bool {
        match self {
            Target::To(id) => *id == conn_id,
            Target::AllExcept(id) => *id != conn_id,
            Target::All => true,
        }
    }
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    queue: Vec<(SessionEvent, Target)>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: SessionEvent, target: Target) {
        self.queue.push((event, target));
    }

    /// Drains every queued event in push order. Called once per tick.
    pub fn drain(&mut self) -> Vec<(SessionEvent, Target)> {
        std::mem::take(&mut self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targeting_rules() {
        assert!(Target::To(3).includes(3));
        assert!(!Target::To(3).includes(4));
        assert!(Target::AllExcept(3).includes(4));
        assert!(!Target::AllExcept(3).includes(3));
        assert!(Target::All.includes(3));
    }

    #[test]
    fn test_drain_preserves_push_order_and_empties() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.push(SessionEvent::TimeSync { elapsed_ms: 1 }, Target::All);
        dispatcher.push(
            SessionEvent::Chat {
                conn_id: 2,
                text: "gg".to_string(),
            },
            Target::AllExcept(2),
        );
        dispatcher.push(SessionEvent::TimeSync { elapsed_ms: 3 }, Target::All);

        let drained = dispatcher.drain();
        assert_eq!(drained.len(), 3);
        assert!(matches!(
            drained[0].0,
            SessionEvent::TimeSync { elapsed_ms: 1 }
        ));
        assert!(matches!(drained[1].0, SessionEvent::Chat { .. }));
        assert!(matches!(
            drained[2].0,
            SessionEvent::TimeSync { elapsed_ms: 3 }
        ));

        assert!(dispatcher.is_empty());
        assert!(dispatcher.drain().is_empty());
    }
}
