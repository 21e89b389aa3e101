//! In-process message bus
//!
//! Frames are published as JSON text and fanned out to every current
//! subscriber. Each subscription keeps only the envelopes addressed to its
//! participant and never sees its own messages. Nothing is queued for
//! participants that are not subscribed at publish time.

use std::sync::Arc;

use derec_core::{Envelope, ParticipantId};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::Result;

/// A serialized envelope as carried on the bus
pub type Frame = Arc<str>;

/// Default per-subscriber buffer
const DEFAULT_CAPACITY: usize = 256;

/// Publish/subscribe transport shared by all participants
pub trait MessageBus: Send + Sync {
    /// Fire-and-forget delivery to every current subscriber but the sender
    fn publish(&self, envelope: &Envelope) -> Result<()>;

    /// Start receiving envelopes addressed to `participant`
    fn subscribe(&self, participant: ParticipantId) -> Subscription;
}

/// Broadcast bus living inside one process
#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<Frame>,
}

impl LocalBus {
    /// Create a new bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus whose subscribers buffer up to `capacity` frames
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish a raw frame, bypassing serialization
    pub fn publish_frame(&self, frame: Frame) {
        if self.sender.send(frame).is_err() {
            debug!("Published frame with no subscribers");
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for LocalBus {
    fn publish(&self, envelope: &Envelope) -> Result<()> {
        let frame: Frame = envelope.to_json()?.into();
        debug!(
            "{} -> {}: {}",
            envelope.from,
            envelope.to.map_or_else(|| "*".to_string(), |to| to.to_string()),
            envelope.message.kind()
        );
        self.publish_frame(frame);
        Ok(())
    }

    fn subscribe(&self, participant: ParticipantId) -> Subscription {
        Subscription::new(participant, self.sender.subscribe())
    }
}

/// Inbound envelope stream for one participant
#[derive(Debug)]
pub struct Subscription {
    participant: ParticipantId,
    receiver: Option<broadcast::Receiver<Frame>>,
}

impl Subscription {
    /// Wrap a frame receiver for `participant`
    pub fn new(participant: ParticipantId, receiver: broadcast::Receiver<Frame>) -> Self {
        Self {
            participant,
            receiver: Some(receiver),
        }
    }

    /// The participant this subscription delivers to
    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// Whether the subscription still delivers
    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }

    /// Wait for the next envelope addressed to this participant
    ///
    /// Returns `None` once unsubscribed or when the bus is gone. Malformed
    /// frames are dropped with a warning.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(frame) => match Envelope::from_json(&frame) {
                    Ok(envelope) if envelope.is_for(self.participant) => return Some(envelope),
                    Ok(_) => continue,
                    Err(e) => warn!("{} dropped malformed frame: {}", self.participant, e),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("{} lagged behind the bus, {} frames lost", self.participant, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Stop delivery; calling it again has no effect
    pub fn unsubscribe(&mut self) {
        if self.receiver.take().is_some() {
            debug!("{} unsubscribed", self.participant);
        }
    }
}
