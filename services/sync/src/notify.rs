use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events pushed to live subscribers (dashboards, WS bridges). Delivery
/// is best-effort; losing a lagging subscriber never fails the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateEvent {
    ShipmentSynced { external_id: String },
    JobUpdated { job_id: Uuid, status: String },
}

#[derive(Clone)]
pub struct UpdateBroadcaster {
    tx: broadcast::Sender<UpdateEvent>,
}

impl UpdateBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, event: UpdateEvent) {
        // Err only means nobody is listening right now
        let _ = self.tx.send(event);
    }
}

impl Default for UpdateBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
