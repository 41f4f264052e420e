//! Scheduled simulation events and the queue that orders them.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use pushpull_core::services::TimerId;
use pushpull_core::{ClientId, ClientTimer, PeerDirection, PeerKey, PlaybackEvent, TrackerResponse};

/// Something that happens to one client at one instant.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// Start the client
    Start { client: ClientId },
    /// A timer the client scheduled fires
    Timer {
        client: ClientId,
        timer_id: TimerId,
        timer: ClientTimer,
    },
    /// A connection came up at this client
    ConnectionEstablished {
        client: ClientId,
        peer: PeerKey,
        remote: SocketAddr,
        direction: PeerDirection,
    },
    /// An outbound connection found no listener
    ConnectionFailed { client: ClientId, peer: PeerKey },
    /// The remote side closed a connection
    ConnectionClosed { client: ClientId, peer: PeerKey },
    /// Bytes arrive on a connection
    DataReceived {
        client: ClientId,
        peer: PeerKey,
        data: Bytes,
    },
    /// The tracker answers a join
    TrackerResponse {
        client: ClientId,
        response: TrackerResponse,
    },
    /// A player reports playback progress
    Playback {
        client: ClientId,
        event: PlaybackEvent,
    },
}

impl SimEvent {
    /// Client the event is delivered to.
    pub fn client(&self) -> ClientId {
        match self {
            SimEvent::Start { client }
            | SimEvent::Timer { client, .. }
            | SimEvent::ConnectionEstablished { client, .. }
            | SimEvent::ConnectionFailed { client, .. }
            | SimEvent::ConnectionClosed { client, .. }
            | SimEvent::DataReceived { client, .. }
            | SimEvent::TrackerResponse { client, .. }
            | SimEvent::Playback { client, .. } => *client,
        }
    }

    /// Event name for per-kind counters.
    pub fn as_str(&self) -> &'static str {
        match self {
            SimEvent::Start { .. } => "Start",
            SimEvent::Timer { .. } => "Timer",
            SimEvent::ConnectionEstablished { .. } => "ConnectionEstablished",
            SimEvent::ConnectionFailed { .. } => "ConnectionFailed",
            SimEvent::ConnectionClosed { .. } => "ConnectionClosed",
            SimEvent::DataReceived { .. } => "DataReceived",
            SimEvent::TrackerResponse { .. } => "TrackerResponse",
            SimEvent::Playback { .. } => "Playback",
        }
    }
}

/// Event with its delivery time and insertion id.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// Simulation time of delivery
    pub at: Duration,
    /// Insertion order, breaks ties between equal times
    pub id: u64,
    /// What happens
    pub event: SimEvent,
}

impl Eq for ScheduledEvent {}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the earliest event, then the oldest.
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Time-ordered queue of pending events.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    next_id: u64,
}

impl EventQueue {
    /// Queues `event` for delivery at absolute time `at`. Returns its id.
    pub fn push(&mut self, at: Duration, event: SimEvent) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(ScheduledEvent { at, id, event });
        id
    }

    /// Removes the earliest event.
    pub fn pop(&mut self) -> Option<ScheduledEvent> {
        self.heap.pop()
    }

    /// Delivery time of the earliest event.
    pub fn next_time(&self) -> Option<Duration> {
        self.heap.peek().map(|scheduled| scheduled.at)
    }

    /// Pending events.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(id: u32) -> SimEvent {
        SimEvent::Start {
            client: ClientId(id),
        }
    }

    #[test]
    fn test_queue_pops_earliest_first() {
        let mut queue = EventQueue::default();
        queue.push(Duration::from_millis(30), start(3));
        queue.push(Duration::from_millis(10), start(1));
        queue.push(Duration::from_millis(20), start(2));

        let order: Vec<ClientId> = std::iter::from_fn(|| queue.pop())
            .map(|scheduled| scheduled.event.client())
            .collect();
        assert_eq!(order, vec![ClientId(1), ClientId(2), ClientId(3)]);
    }

    #[test]
    fn test_queue_equal_times_keep_insertion_order() {
        let mut queue = EventQueue::default();
        for id in 1..=4 {
            queue.push(Duration::from_millis(5), start(id));
        }
        assert_eq!(queue.next_time(), Some(Duration::from_millis(5)));

        let order: Vec<u32> = std::iter::from_fn(|| queue.pop())
            .map(|scheduled| scheduled.event.client().0)
            .collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(start(1).as_str(), "Start");
        let closed = SimEvent::ConnectionClosed {
            client: ClientId(2),
            peer: PeerKey(7),
        };
        assert_eq!(closed.as_str(), "ConnectionClosed");
        assert_eq!(closed.client(), ClientId(2));
    }
}
