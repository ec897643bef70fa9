use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Events pushed from the radio to listeners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum RadioEvent {
    /// A new current track was selected.
    #[serde(rename = "radio:track")]
    Track(String),
    /// Whether the rotation is playing.
    #[serde(rename = "radio:status")]
    Status(bool),
}

/// Control commands a listener may send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "event")]
pub enum ClientCommand {
    #[serde(rename = "radio:start")]
    Start,
    #[serde(rename = "radio:stop")]
    Stop,
    #[serde(rename = "radio:getStatus")]
    GetStatus,
}

/// Fan-out of radio events to every subscribed listener.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<RadioEvent>,
}

impl Broadcaster {
    /// `capacity` is how many events a slow subscriber may fall behind before it lags.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Sends to all current subscribers. Having none is not an error.
    pub fn broadcast(&self, event: RadioEvent) {
        match self.tx.send(event) {
            Ok(count) => debug!("Broadcast event to {} subscribers", count),
            Err(broadcast::error::SendError(event)) => {
                debug!("No subscribers for {:?}", event)
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.tx.subscribe()
    }
}
