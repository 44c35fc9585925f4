//! Background revalidation bookkeeping for stale-while-revalidate reads
//!
//! At most one refresh runs per store key. Outcomes are published on a
//! broadcast channel; publishing with no subscribers is not an error.

use dashmap::DashSet;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Outcome of a background refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RevalidationEvent {
    /// The fetch succeeded and the entry was rewritten
    Refreshed { key: String },
    /// The fetch or the write failed; the stale entry is left in place
    Failed { key: String, error: String },
}

impl RevalidationEvent {
    /// Full store key the event refers to
    pub fn key(&self) -> &str {
        match self {
            RevalidationEvent::Refreshed { key } | RevalidationEvent::Failed { key, .. } => key,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Revalidator {
    in_flight: Arc<DashSet<String>>,
    events: broadcast::Sender<RevalidationEvent>,
}

impl Revalidator {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            in_flight: Arc::new(DashSet::new()),
            events,
        }
    }

    /// Claim the refresh slot for `key`; `None` if one is already running
    pub(crate) fn begin(&self, key: &str) -> Option<InFlightRefresh> {
        if !self.in_flight.insert(key.to_string()) {
            return None;
        }
        Some(InFlightRefresh {
            key: key.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub(crate) fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains(key)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<RevalidationEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: RevalidationEvent) {
        if self.events.send(event).is_err() {
            trace!("No revalidation subscribers");
        }
    }
}

/// Releases the per-key refresh slot on drop
#[derive(Debug)]
pub(crate) struct InFlightRefresh {
    key: String,
    in_flight: Arc<DashSet<String>>,
}

impl Drop for InFlightRefresh {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_refresh_slot_per_key() {
        let revalidator = Revalidator::new();

        let first = revalidator.begin("app:report");
        assert!(first.is_some());
        assert!(revalidator.begin("app:report").is_none());
        assert!(revalidator.begin("app:other").is_some());

        drop(first);
        assert!(!revalidator.is_in_flight("app:report"));
        assert!(revalidator.begin("app:report").is_some());
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let revalidator = Revalidator::new();
        revalidator.publish(RevalidationEvent::Refreshed {
            key: "unobserved".to_string(),
        });

        let mut events = revalidator.subscribe();
        revalidator.publish(RevalidationEvent::Failed {
            key: "app:k".to_string(),
            error: "boom".to_string(),
        });

        let event = events.recv().await.unwrap();
        assert_eq!(event.key(), "app:k");
        assert!(matches!(event, RevalidationEvent::Failed { ref error, .. } if error == "boom"));
    }
}
