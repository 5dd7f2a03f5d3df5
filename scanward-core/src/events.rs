use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{JobId, ScanState};

/// State change delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    #[serde(skip)]
    pub sequence: u64,
    pub id: JobId,
    pub state: ScanState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Fire-and-forget fan-out of scan state changes.
///
/// There is no replay: subscribers only see events published after they
/// subscribed, and a subscriber that falls behind the channel capacity
/// loses the oldest events.
#[derive(Debug)]
pub struct EventNotifier {
    tx: broadcast::Sender<ScanEvent>,
    sequence: AtomicU64,
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish(
        &self,
        id: &JobId,
        state: ScanState,
        failure_reason: Option<&str>,
    ) -> ScanEvent {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let event = ScanEvent {
            sequence,
            id: id.clone(),
            state,
            failure_reason: failure_reason.map(str::to_string),
        };

        // No subscribers is not an error.
        let _ = self.tx.send(event.clone());
        event
    }
}
