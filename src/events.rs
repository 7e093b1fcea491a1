//! Progress events emitted while a run is in flight.
//!
//! The orchestrator emits via [`EventBus::emit`] and callers subscribe via
//! [`EventBus::subscribe`]. Built on [`tokio::sync::broadcast`] so
//! multiple listeners can react independently. A lagging or absent
//! listener never slows down or fails a run.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::{Phase, Step};
use crate::model::AssessmentStatus;

/// Events that flow out of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// The app under test was launched on the device.
    AppLaunched { bundle_id: String },
    /// The keyword wordlist was uploaded.
    WordlistUploaded { artifact_id: Option<String> },
    /// The remote assigned an id to the new assessment.
    AssessmentCreated { assessment_id: String },
    /// A phase transition call was issued.
    TransitionRequested { assessment_id: String, step: Step },
    /// One poll of the assessment status.
    StatusObserved {
        assessment_id: String,
        phase: Phase,
        status: AssessmentStatus,
        attempt: usize,
    },
    /// Device input was accepted; `eta` is how long the run will pause.
    InputSubmitted { eta: Option<Duration> },
    /// The assessment reached `complete`.
    Completed { assessment_id: String },
}

/// A broadcast channel the orchestrator emits to and callers subscribe from.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all current subscribers.
    /// Returns the number of receivers that will see it.
    pub fn emit(&self, event: RunEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(RunEvent::AssessmentCreated {
            assessment_id: "A1".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            RunEvent::AssessmentCreated {
                assessment_id: "A1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(RunEvent::Completed {
            assessment_id: "A1".to_string(),
        });

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1, e2);
    }

    #[test]
    fn emit_without_subscribers_returns_zero() {
        let bus = EventBus::default();
        let count = bus.emit(RunEvent::InputSubmitted { eta: None });
        assert_eq!(count, 0);
    }
}
