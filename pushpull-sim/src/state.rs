//! Shared world state: clock, queue, network, tracker and metrics.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

use pushpull_core::services::TimerId;
use pushpull_core::{ClientId, ClientTimer};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::SimulationConfig;
use crate::events::{EventQueue, ScheduledEvent, SimEvent};
use crate::metrics::MetricsLog;
use crate::network::Network;
use crate::tracker::Tracker;

/// State every simulated service handle shares.
pub type SharedState = Rc<RefCell<SimState>>;

/// The simulated world outside the clients.
#[derive(Debug)]
pub struct SimState {
    pub(crate) now: Duration,
    pub(crate) queue: EventQueue,
    pub(crate) network: Network,
    pub(crate) tracker: Tracker,
    pub(crate) metrics: MetricsLog,
    pub(crate) rng: ChaCha8Rng,
    cancelled: HashSet<TimerId>,
    next_timer: u64,
}

impl SimState {
    /// Creates an empty world at time zero.
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            now: Duration::ZERO,
            queue: EventQueue::default(),
            network: Network::new(config),
            tracker: Tracker::new(config),
            metrics: MetricsLog::default(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            cancelled: HashSet::new(),
            next_timer: 0,
        }
    }

    /// Current simulation time.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Queues `event` after `delay`.
    pub fn schedule_in(&mut self, delay: Duration, event: SimEvent) {
        let at = self.now + delay;
        self.queue.push(at, event);
    }

    /// Schedules a client timer and returns its handle.
    pub fn schedule_timer(&mut self, client: ClientId, delay: Duration, timer: ClientTimer) -> TimerId {
        let timer_id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.schedule_in(
            delay,
            SimEvent::Timer {
                client,
                timer_id,
                timer,
            },
        );
        timer_id
    }

    /// Marks a timer cancelled; it is skipped when its time comes.
    pub fn cancel_timer(&mut self, timer: TimerId) {
        if timer.0 < self.next_timer {
            self.cancelled.insert(timer);
        }
    }

    /// Pops the next live event due no later than `deadline` and advances
    /// the clock to it.
    pub fn next_event(&mut self, deadline: Duration) -> Option<ScheduledEvent> {
        while let Some(at) = self.queue.next_time() {
            if at > deadline {
                return None;
            }
            let scheduled = self.queue.pop()?;
            if let SimEvent::Timer { timer_id, .. } = &scheduled.event {
                if self.cancelled.remove(timer_id) {
                    continue;
                }
            }
            self.now = scheduled.at;
            return Some(scheduled);
        }
        None
    }

    /// Moves the clock forward to `time`; never backwards.
    pub fn advance_to(&mut self, time: Duration) {
        self.now = self.now.max(time);
    }

    /// Pending events, cancelled timers included.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }
}
