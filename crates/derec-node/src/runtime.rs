//! Async node driver
//!
//! Runs one participant per tokio task. The task owns the participant
//! outright and feeds it bus messages, timer ticks and user commands one
//! at a time, so a participant's state is never touched concurrently.

use std::time::Duration;

use derec_core::{now_millis, Envelope, ParticipantId, Timestamp};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::bus::{MessageBus, Subscription};
use crate::error::{NodeError, Result};

/// Command queue depth per node
const COMMAND_CAPACITY: usize = 32;

/// A protocol role that can be driven by [`spawn_node`]
pub trait Participant: Send + 'static {
    /// Bus address of this participant
    fn id(&self) -> ParticipantId;

    /// Called once after subscribing
    fn on_connect(&mut self, now: Timestamp) -> Vec<Envelope>;

    /// Called for every inbound envelope
    fn on_message(&mut self, envelope: &Envelope, now: Timestamp) -> Vec<Envelope>;

    /// Called on every runtime tick
    fn on_tick(&mut self, now: Timestamp) -> Vec<Envelope>;

    /// Called once before the subscription closes
    fn on_disconnect(&mut self) {}
}

type Command<P> = Box<dyn FnOnce(&mut P, Timestamp) -> Vec<Envelope> + Send>;

/// Millisecond clock anchored at wall-clock time but advanced by tokio
///
/// Follows tokio's paused clock in tests.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin_ms: Timestamp,
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin_ms: now_millis(),
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.origin_ms + self.start.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running node
pub struct NodeHandle<P> {
    id: ParticipantId,
    commands: mpsc::Sender<Command<P>>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<P>,
}

impl<P: Participant> NodeHandle<P> {
    pub fn id(&self) -> ParticipantId {
        self.id
    }

    /// Run a user action on the participant and publish what it returns
    ///
    /// The action's error is handed back unchanged; nothing is published
    /// in that case.
    pub async fn act<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce(&mut P, Timestamp) -> Result<Vec<Envelope>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let command: Command<P> = Box::new(move |participant, now| match action(participant, now) {
            Ok(out) => {
                let _ = tx.send(Ok(()));
                out
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                Vec::new()
            }
        });
        self.commands
            .send(command)
            .await
            .map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)?
    }

    /// Read something from the participant's state
    pub async fn inspect<T, F>(&self, read: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&P) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let command: Command<P> = Box::new(move |participant, _| {
            let _ = tx.send(read(participant));
            Vec::new()
        });
        self.commands
            .send(command)
            .await
            .map_err(|_| NodeError::Stopped)?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    /// Stop timers, unsubscribe, and hand the participant back
    pub async fn shutdown(self) -> Result<P> {
        let _ = self.shutdown.send(());
        self.task
            .await
            .map_err(|e| NodeError::Bus(format!("node task failed: {}", e)))
    }
}

/// Subscribe `participant` to `bus` and run it on a new task
///
/// The subscription is opened before this returns, so nothing published
/// afterwards is missed.
pub fn spawn_node<P, B>(participant: P, bus: B, tick_interval: Duration) -> NodeHandle<P>
where
    P: Participant,
    B: MessageBus + 'static,
{
    let id = participant.id();
    let subscription = bus.subscribe(id);
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(run_node(
        participant,
        bus,
        subscription,
        commands_rx,
        shutdown_rx,
        tick_interval,
    ));

    NodeHandle {
        id,
        commands: commands_tx,
        shutdown: shutdown_tx,
        task,
    }
}

fn publish_all<B: MessageBus>(bus: &B, envelopes: Vec<Envelope>) {
    for envelope in envelopes {
        if let Err(e) = bus.publish(&envelope) {
            error!(
                "{} failed to publish {}: {}",
                envelope.from,
                envelope.message.kind(),
                e
            );
        }
    }
}

async fn run_node<P, B>(
    mut participant: P,
    bus: B,
    mut subscription: Subscription,
    mut commands: mpsc::Receiver<Command<P>>,
    mut shutdown: oneshot::Receiver<()>,
    tick_interval: Duration,
) -> P
where
    P: Participant,
    B: MessageBus,
{
    let clock = Clock::new();
    let id = participant.id();
    publish_all(&bus, participant.on_connect(clock.now()));

    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("{} shutting down", id);
                break;
            }
            Some(envelope) = subscription.recv() => {
                let out = participant.on_message(&envelope, clock.now());
                publish_all(&bus, out);
            }
            Some(command) = commands.recv() => {
                let out = command(&mut participant, clock.now());
                publish_all(&bus, out);
            }
            _ = ticker.tick() => {
                let out = participant.on_tick(clock.now());
                publish_all(&bus, out);
            }
        }
    }

    participant.on_disconnect();
    subscription.unsubscribe();
    debug!("{} stopped", id);
    participant
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use derec_core::{HelperId, Message, Role};

    /// Counts what it sees and echoes announcements
    struct Probe {
        id: ParticipantId,
        seen: Vec<String>,
        ticks: usize,
        disconnected: bool,
    }

    impl Probe {
        fn new(id: ParticipantId) -> Self {
            Self {
                id,
                seen: Vec::new(),
                ticks: 0,
                disconnected: false,
            }
        }
    }

    impl Participant for Probe {
        fn id(&self) -> ParticipantId {
            self.id
        }

        fn on_connect(&mut self, now: Timestamp) -> Vec<Envelope> {
            vec![Envelope::broadcast(
                self.id,
                Message::Announce {
                    role: self.id.role(),
                    helper_id: self.id.helper_id(),
                    transport_uri: self.id.transport_uri(),
                },
                now,
            )]
        }

        fn on_message(&mut self, envelope: &Envelope, _now: Timestamp) -> Vec<Envelope> {
            self.seen.push(format!("{}:{}", envelope.from, envelope.message.kind()));
            Vec::new()
        }

        fn on_tick(&mut self, _now: Timestamp) -> Vec<Envelope> {
            self.ticks += 1;
            Vec::new()
        }

        fn on_disconnect(&mut self) {
            self.disconnected = true;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_nodes_exchange_messages_and_tick() {
        let bus = LocalBus::new();
        let helper = ParticipantId::Helper(HelperId::new(1).unwrap());

        let a = spawn_node(Probe::new(ParticipantId::Owner), bus.clone(), Duration::from_millis(100));
        let b = spawn_node(Probe::new(helper), bus.clone(), Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let a_seen = a.inspect(|p| p.seen.clone()).await.unwrap();
        assert_eq!(a_seen, vec!["helper-1:ANNOUNCE".to_string()]);
        let b_seen = b.inspect(|p| p.seen.clone()).await.unwrap();
        assert_eq!(b_seen, vec!["owner:ANNOUNCE".to_string()]);

        let ticks = a.inspect(|p| p.ticks).await.unwrap();
        assert!(ticks >= 9, "expected ~10 ticks, got {}", ticks);

        let owner = a.shutdown().await.unwrap();
        assert!(owner.disconnected);
        b.shutdown().await.unwrap();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_act_publishes_and_reports_errors() {
        let bus = LocalBus::new();
        let mut listener = bus.subscribe(ParticipantId::Owner);
        let helper = ParticipantId::Helper(HelperId::new(2).unwrap());
        let node = spawn_node(Probe::new(helper), bus.clone(), Duration::from_millis(100));

        // Connect announcement
        let first = listener.recv().await.unwrap();
        assert!(matches!(first.message, Message::Announce { role: Role::Helper, .. }));

        node.act(move |_, now| {
            Ok(vec![Envelope::direct(helper, ParticipantId::Owner, Message::ListSharesRequest, now)])
        })
        .await
        .unwrap();
        assert_eq!(listener.recv().await.unwrap().message, Message::ListSharesRequest);

        let err = node
            .act(|_, _| Err(NodeError::PreconditionNotMet("nope".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::PreconditionNotMet(_)));

        node.shutdown().await.unwrap();
    }

    #[test]
    fn test_clock_is_monotonic() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let clock = Clock::new();
            let first = clock.now();
            assert!(clock.now() >= first);
        });
    }
}
