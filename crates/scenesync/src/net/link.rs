use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::connection::{Connection, ConnectionId, MessageSink};
use super::inbound::{InboundMessage, InboundQueue};
use super::protocol::{MessageFlags, MessageKind};

/// Latency and loss applied to traffic crossing a [`Link`].
/// Loss only ever hits unreliable messages.
#[derive(Debug, Clone, Default)]
pub struct LinkSimulation {
    pub enabled: bool,
    /// Percentage in `0..=100`.
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl LinkSimulation {
    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand_unit() * 100.0 < self.loss_percent
    }

    pub fn delay_ms(&self) -> u32 {
        if !self.enabled || self.max_latency_ms == 0 {
            return 0;
        }
        let range = self.max_latency_ms.saturating_sub(self.min_latency_ms);
        let jitter = if self.jitter_ms > 0 {
            (rand_unit() * self.jitter_ms as f32) as u32
        } else {
            0
        };
        self.min_latency_ms + (rand_unit() * range as f32) as u32 + jitter
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub bytes_sent: u64,
}

pub(crate) fn random_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hash, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    Instant::now().hash(&mut hasher);
    hasher.finish()
}

fn rand_unit() -> f32 {
    (random_u64() % 10_000) as f32 / 10_000.0
}

#[derive(Debug)]
struct DelayedMessage {
    release_ms: u64,
    sequence: u64,
    target: InboundQueue,
    message: InboundMessage,
}

impl PartialEq for DelayedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.release_ms == other.release_ms && self.sequence == other.sequence
    }
}

impl Eq for DelayedMessage {}

impl PartialOrd for DelayedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        (other.release_ms, other.sequence).cmp(&(self.release_ms, self.sequence))
    }
}

#[derive(Debug)]
struct LinkState {
    start: Instant,
    manual_time_ms: Option<u64>,
    in_flight: BinaryHeap<DelayedMessage>,
    next_sequence: u64,
    next_lane: u64,
    reliable_release: HashMap<u64, u64>,
    stats: LinkStats,
}

impl LinkState {
    fn now_ms(&self) -> u64 {
        self.manual_time_ms
            .unwrap_or_else(|| self.start.elapsed().as_millis() as u64)
    }
}

/// In-process transport joining an authority with its observers.
///
/// Every [`LinkConnection`] is one direction of one peer pair. Messages sit in
/// flight until their simulated latency elapses and are then pushed into the
/// receiver's [`InboundQueue`], from whichever thread calls [`Link::pump`].
#[derive(Debug, Clone)]
pub struct Link {
    state: Arc<Mutex<LinkState>>,
    simulation: LinkSimulation,
}

impl Link {
    pub fn new(simulation: LinkSimulation) -> Self {
        Self::with_clock(simulation, None)
    }

    /// Link whose clock only moves through [`Link::advance_clock`].
    pub fn with_manual_clock(simulation: LinkSimulation) -> Self {
        Self::with_clock(simulation, Some(0))
    }

    fn with_clock(simulation: LinkSimulation, manual_time_ms: Option<u64>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState {
                start: Instant::now(),
                manual_time_ms,
                in_flight: BinaryHeap::new(),
                next_sequence: 0,
                next_lane: 0,
                reliable_release: HashMap::new(),
                stats: LinkStats::default(),
            })),
            simulation,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn now_ms(&self) -> u64 {
        self.lock().now_ms()
    }

    pub fn advance_clock(&self, ms: u64) {
        let mut state = self.lock();
        if let Some(time) = state.manual_time_ms.as_mut() {
            *time += ms;
        }
    }

    /// Creates both directions of a peer pair. The first connection lives on
    /// the authority and delivers into `observer_inbox`; the second lives on
    /// the observer and delivers into `authority_inbox`.
    pub fn connect(
        &self,
        id: ConnectionId,
        authority_inbox: &InboundQueue,
        observer_inbox: &InboundQueue,
    ) -> (LinkConnection, LinkConnection) {
        let (to_observer, to_authority) = {
            let mut state = self.lock();
            let lanes = (state.next_lane, state.next_lane + 1);
            state.next_lane += 2;
            lanes
        };
        (
            LinkConnection {
                id,
                lane: to_observer,
                link: self.clone(),
                target: observer_inbox.clone(),
            },
            LinkConnection {
                id,
                lane: to_authority,
                link: self.clone(),
                target: authority_inbox.clone(),
            },
        )
    }

    fn enqueue(&self, lane: u64, target: &InboundQueue, message: InboundMessage, flags: MessageFlags) {
        let reliable = flags.contains(MessageFlags::RELIABLE);
        let dropped = !reliable && self.simulation.should_drop();
        let delay = self.simulation.delay_ms() as u64;

        let mut state = self.lock();
        state.stats.messages_sent += 1;
        state.stats.bytes_sent += message.payload.len() as u64;
        if dropped {
            state.stats.messages_dropped += 1;
            return;
        }

        let mut release_ms = state.now_ms() + delay;
        if reliable {
            let previous = state.reliable_release.entry(lane).or_insert(0);
            release_ms = release_ms.max(*previous);
            *previous = release_ms;
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.in_flight.push(DelayedMessage {
            release_ms,
            sequence,
            target: target.clone(),
            message,
        });
    }

    /// Delivers every message whose latency has elapsed.
    pub fn pump(&self) -> usize {
        self.deliver(false)
    }

    /// Delivers everything in flight regardless of latency.
    pub fn flush(&self) -> usize {
        self.deliver(true)
    }

    fn deliver(&self, everything: bool) -> usize {
        let due = {
            let mut state = self.lock();
            let now = state.now_ms();
            let mut due = Vec::new();
            while let Some(next) = state.in_flight.peek() {
                if !everything && next.release_ms > now {
                    break;
                }
                if let Some(delayed) = state.in_flight.pop() {
                    due.push(delayed);
                }
            }
            state.stats.messages_delivered += due.len() as u64;
            due
        };

        let count = due.len();
        for delayed in due {
            delayed.target.push(delayed.message);
        }
        count
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn stats(&self) -> LinkStats {
        self.lock().stats.clone()
    }

    /// Runs [`Link::pump`] on a background thread until `running` clears.
    pub fn spawn_pump(&self, running: Arc<AtomicBool>, interval: Duration) -> JoinHandle<()> {
        let link = self.clone();
        thread::spawn(move || {
            while running.load(AtomicOrdering::SeqCst) {
                link.pump();
                thread::sleep(interval);
            }
            link.flush();
        })
    }
}

/// One direction of a peer pair on a [`Link`].
#[derive(Debug)]
pub struct LinkConnection {
    id: ConnectionId,
    lane: u64,
    link: Link,
    target: InboundQueue,
}

impl MessageSink for LinkConnection {
    fn send_message(&mut self, kind: MessageKind, payload: &[u8], flags: MessageFlags) {
        let message = InboundMessage {
            connection: self.id,
            kind,
            payload: payload.to_vec(),
        };
        self.link.enqueue(self.lane, &self.target, message, flags);
    }
}

impl Connection for LinkConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn local_time_ms(&self) -> u64 {
        self.link.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lossy(loss_percent: f32, min_latency_ms: u32, max_latency_ms: u32) -> LinkSimulation {
        LinkSimulation {
            enabled: true,
            loss_percent,
            min_latency_ms,
            max_latency_ms,
            jitter_ms: 0,
        }
    }

    #[test]
    fn test_delivers_after_latency() {
        let link = Link::with_manual_clock(lossy(0.0, 50, 50));
        let authority_inbox = InboundQueue::new();
        let observer_inbox = InboundQueue::new();
        let id = ConnectionId::new(1).unwrap();
        let (mut to_observer, _) = link.connect(id, &authority_inbox, &observer_inbox);

        to_observer.send_message(MessageKind::Ping, &[1, 2], MessageFlags::empty());
        assert_eq!(link.pump(), 0);
        link.advance_clock(49);
        assert_eq!(link.pump(), 0);
        link.advance_clock(1);
        assert_eq!(link.pump(), 1);

        let received = observer_inbox.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].connection, id);
        assert_eq!(received[0].payload, vec![1, 2]);
        assert!(authority_inbox.is_empty());
    }

    #[test]
    fn test_loss_spares_reliable_messages() {
        let link = Link::with_manual_clock(lossy(100.0, 0, 0));
        let authority_inbox = InboundQueue::new();
        let observer_inbox = InboundQueue::new();
        let (_, mut to_authority) =
            link.connect(ConnectionId::new(2).unwrap(), &authority_inbox, &observer_inbox);

        to_authority.send_message(MessageKind::ObjectsFeedbackUnreliable, &[0], MessageFlags::empty());
        to_authority.send_message(MessageKind::Synchronized, &[1], MessageFlags::RELIABLE);
        link.flush();

        let received = authority_inbox.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, MessageKind::Synchronized);
        assert_eq!(link.stats().messages_dropped, 1);
    }

    #[test]
    fn test_reliable_messages_keep_order() {
        let link = Link::with_manual_clock(lossy(0.0, 0, 100));
        let authority_inbox = InboundQueue::new();
        let observer_inbox = InboundQueue::new();
        let (mut to_observer, _) =
            link.connect(ConnectionId::new(3).unwrap(), &authority_inbox, &observer_inbox);

        let reliable = MessageFlags::RELIABLE | MessageFlags::ORDERED;
        for i in 0..50u8 {
            to_observer.send_message(MessageKind::AddObjects, &[i], reliable);
        }
        link.flush();

        let order: Vec<u8> = observer_inbox.drain().iter().map(|m| m.payload[0]).collect();
        assert_eq!(order, (0..50).collect::<Vec<u8>>());
    }
}
