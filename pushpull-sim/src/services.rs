//! Client service implementations backed by the shared simulation state.
//!
//! Each handle borrows the state only for the duration of one call, so a
//! client may call into its services from any handler.

use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use pushpull_core::services::{CloudService, MetricsSink, Scheduler, TimerId, Transport};
use pushpull_core::{
    ClientId, ClientServices, ClientTimer, CloudAnnounce, FakeDataStore, MetricsReport, PeerKey,
    SyntheticContent, TransportError,
};

use crate::state::SharedState;

/// Builds the service set of one simulated node.
pub fn node_services(state: &SharedState, client: ClientId, content_seed: u64) -> ClientServices {
    ClientServices {
        transport: Box::new(SimTransport::new(state, client)),
        scheduler: Box::new(SimScheduler::new(state, client)),
        cloud: Box::new(SimCloud::new(state, client)),
        storage: Box::new(FakeDataStore::new(SyntheticContent::new(content_seed))),
        metrics: Box::new(SimMetrics::new(state)),
    }
}

/// Transport over the simulated network.
#[derive(Debug)]
pub struct SimTransport {
    state: SharedState,
    client: ClientId,
}

impl SimTransport {
    /// Creates a handle for `client`.
    pub fn new(state: &SharedState, client: ClientId) -> Self {
        Self {
            state: Rc::clone(state),
            client,
        }
    }
}

impl Transport for SimTransport {
    fn listen(&mut self, port: u16) -> Result<(), TransportError> {
        self.state.borrow_mut().network.listen(self.client, port)
    }

    fn connect(&mut self, address: SocketAddr) -> PeerKey {
        let mut state = self.state.borrow_mut();
        let now = state.now;
        let state = &mut *state;
        state
            .network
            .connect(&mut state.queue, now, self.client, address)
    }

    fn send(&mut self, peer: PeerKey, data: Bytes) {
        let mut state = self.state.borrow_mut();
        let now = state.now;
        let state = &mut *state;
        state
            .network
            .send(&mut state.queue, now, self.client, peer, data);
    }

    fn close(&mut self, peer: PeerKey) {
        let mut state = self.state.borrow_mut();
        let now = state.now;
        let state = &mut *state;
        state.network.close(&mut state.queue, now, self.client, peer);
    }
}

/// Timers on the simulation clock.
#[derive(Debug)]
pub struct SimScheduler {
    state: SharedState,
    client: ClientId,
}

impl SimScheduler {
    /// Creates a handle for `client`.
    pub fn new(state: &SharedState, client: ClientId) -> Self {
        Self {
            state: Rc::clone(state),
            client,
        }
    }
}

impl Scheduler for SimScheduler {
    fn now(&self) -> Duration {
        self.state.borrow().now
    }

    fn schedule(&mut self, delay: Duration, timer: ClientTimer) -> TimerId {
        self.state
            .borrow_mut()
            .schedule_timer(self.client, delay, timer)
    }

    fn cancel(&mut self, timer: TimerId) {
        self.state.borrow_mut().cancel_timer(timer);
    }
}

/// Access to the simulated tracker.
#[derive(Debug)]
pub struct SimCloud {
    state: SharedState,
    client: ClientId,
}

impl SimCloud {
    /// Creates a handle for `client`.
    pub fn new(state: &SharedState, client: ClientId) -> Self {
        Self {
            state: Rc::clone(state),
            client,
        }
    }
}

impl CloudService for SimCloud {
    fn join(&mut self, announce: &CloudAnnounce) {
        let mut state = self.state.borrow_mut();
        let now = state.now;
        let state = &mut *state;
        state
            .tracker
            .join(&mut state.queue, now, &mut state.rng, self.client, announce);
    }

    fn leave(&mut self, announce: &CloudAnnounce) {
        self.state.borrow_mut().tracker.leave(self.client, announce);
    }

    fn announce_seeder(&mut self, announce: &CloudAnnounce) {
        self.state
            .borrow_mut()
            .tracker
            .announce_seeder(self.client, announce);
    }
}

/// Metrics sink appending to the shared log.
#[derive(Debug)]
pub struct SimMetrics {
    state: SharedState,
}

impl SimMetrics {
    /// Creates a handle on the shared log.
    pub fn new(state: &SharedState) -> Self {
        Self {
            state: Rc::clone(state),
        }
    }
}

impl MetricsSink for SimMetrics {
    fn announce(&mut self, node: ClientId, at: Duration, text: &str) {
        self.state.borrow_mut().metrics.announce(node, at, text);
    }

    fn record(&mut self, node: ClientId, at: Duration, report: &MetricsReport) {
        self.state.borrow_mut().metrics.record(node, at, report);
    }
}
