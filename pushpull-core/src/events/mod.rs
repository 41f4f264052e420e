//! Publish/subscribe channels connecting client lifecycle events to strategies.
//!
//! A [`Channel`] holds handlers in subscription order. Handlers receive the
//! owning context (the client) mutably, so they never need a pointer back to
//! it. Firing works on a snapshot of the handler list and re-checks each
//! handle before the call, which makes unsubscribing during a firing safe.

mod payloads;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub use payloads::{
    ChokeChange, ExtensionReceived, InterestChange, OptionChange, PeerBlock, PeerPiece,
    PlaybackEvent, PlaybackState, PortReceived,
};

use crate::client::Client;
use crate::peers::PeerKey;
use crate::services::TrackerResponse;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque token returned by [`Channel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

type Handler<C, A, R> = Rc<dyn Fn(&mut C, &A) -> R>;

/// One named event with a fixed argument type `A` and handler result `R`.
pub struct Channel<C, A, R = ()> {
    handlers: Vec<(SubscriptionHandle, Handler<C, A, R>)>,
}

impl<C, A, R> Default for Channel<C, A, R> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

impl<C, A, R> Clone for Channel<C, A, R> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<C, A, R> fmt::Debug for Channel<C, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("subscribers", &self.handlers.len())
            .finish()
    }
}

impl<C, A, R> Channel<C, A, R> {
    /// Appends a handler; it runs after every handler subscribed before it.
    pub fn subscribe(
        &mut self,
        handler: impl Fn(&mut C, &A) -> R + 'static,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle::next();
        self.handlers.push((handle, Rc::new(handler)));
        handle
    }

    /// Removes a handler. Returns false for handles not on this channel.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(existing, _)| *existing != handle);
        self.handlers.len() != before
    }

    /// Whether `handle` is currently subscribed here.
    pub fn is_subscribed(&self, handle: SubscriptionHandle) -> bool {
        self.handlers.iter().any(|(existing, _)| *existing == handle)
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nobody listens.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn snapshot(&self) -> Vec<(SubscriptionHandle, Handler<C, A, R>)> {
        self.handlers.clone()
    }

    /// Fires the channel selected from `context`, returning handler results
    /// in subscription order.
    ///
    /// Handlers unsubscribed by an earlier handler in the same firing are
    /// skipped; handlers subscribed during the firing first run next time.
    pub fn fire_in(context: &mut C, select: fn(&C) -> &Self, args: &A) -> Vec<R> {
        Self::fire_where(context, |context| Some(select(context)), args)
    }

    /// Like [`Channel::fire_in`] for channels that may not exist, such as
    /// keyed extension channels. A missing channel fires nothing.
    pub fn fire_where<F>(context: &mut C, select: F, args: &A) -> Vec<R>
    where
        F: Fn(&C) -> Option<&Self>,
    {
        let Some(channel) = select(context) else {
            return Vec::new();
        };
        let snapshot = channel.snapshot();
        let mut results = Vec::with_capacity(snapshot.len());
        for (handle, handler) in snapshot {
            if select(context).is_some_and(|channel| channel.is_subscribed(handle)) {
                results.push(handler(context, args));
            }
        }
        results
    }
}

/// Gather-metrics handler output: one key/value map per subscriber.
pub type MetricsMap = BTreeMap<String, String>;

/// Every channel a client fires.
///
/// Cloning shares the handlers, so a clone works as a snapshot of the
/// current subscriptions.
#[derive(Debug, Default, Clone)]
pub struct EventBus {
    pub piece_have_received: Channel<Client, PeerPiece>,
    pub bitfield_received: Channel<Client, PeerKey>,
    pub block_request_received: Channel<Client, PeerBlock>,
    pub block_cancel_received: Channel<Client, PeerBlock>,
    pub block_transfer_complete: Channel<Client, PeerBlock>,
    pub block_upload_complete: Channel<Client, PeerBlock>,
    pub piece_requested: Channel<Client, PeerPiece>,
    pub piece_complete: Channel<Client, PeerPiece>,
    pub piece_cancelled: Channel<Client, PeerPiece>,
    pub piece_timeout: Channel<Client, PeerPiece>,
    pub download_complete: Channel<Client, ()>,
    pub peer_connected: Channel<Client, PeerKey>,
    pub peer_connect_failed: Channel<Client, PeerKey>,
    pub peer_closed: Channel<Client, PeerKey>,
    pub choke_state_changing: Channel<Client, ChokeChange>,
    pub interest_state_changing: Channel<Client, InterestChange>,
    pub port_message_received: Channel<Client, PortReceived>,
    /// Extension channels keyed by sub-message id
    pub extension_message_received: HashMap<u8, Channel<Client, ExtensionReceived>>,
    pub tracker_response_received: Channel<Client, TrackerResponse>,
    pub cloud_connection_established: Channel<Client, ()>,
    pub cloud_connection_suspended: Channel<Client, ()>,
    pub strategy_options_changed: Channel<Client, OptionChange>,
    pub application_initialized: Channel<Client, ()>,
    pub playback_position_will_change: Channel<Client, ()>,
    pub playback_position_changed: Channel<Client, Duration>,
    pub playback_state_changed: Channel<Client, PlaybackState>,
    pub gather_metrics: Channel<Client, (), MetricsMap>,
}

impl EventBus {
    /// Extension channel for `id`, created on first use.
    pub fn extension(&mut self, id: u8) -> &mut Channel<Client, ExtensionReceived> {
        self.extension_message_received.entry(id).or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        channel: Channel<Recorder, u32>,
        calls: Vec<String>,
        pending_unsubscribe: Option<SubscriptionHandle>,
    }

    fn fire(recorder: &mut Recorder, value: u32) {
        Channel::fire_in(recorder, |r| &r.channel, &value);
    }

    #[test]
    fn test_fire_runs_in_subscription_order() {
        let mut recorder = Recorder::default();
        recorder
            .channel
            .subscribe(|r: &mut Recorder, v: &u32| r.calls.push(format!("a{v}")));
        recorder
            .channel
            .subscribe(|r: &mut Recorder, v: &u32| r.calls.push(format!("b{v}")));

        fire(&mut recorder, 1);
        assert_eq!(recorder.calls, vec!["a1", "b1"]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_handle() {
        let mut recorder = Recorder::default();
        let first = recorder
            .channel
            .subscribe(|r: &mut Recorder, _: &u32| r.calls.push("first".into()));
        recorder
            .channel
            .subscribe(|r: &mut Recorder, _: &u32| r.calls.push("second".into()));

        assert!(recorder.channel.unsubscribe(first));
        assert!(!recorder.channel.unsubscribe(first));
        fire(&mut recorder, 0);
        assert_eq!(recorder.calls, vec!["second"]);
    }

    #[test]
    fn test_unsubscribing_later_handler_mid_fire_skips_it() {
        let mut recorder = Recorder::default();
        recorder.channel.subscribe(|r: &mut Recorder, _: &u32| {
            r.calls.push("remover".into());
            if let Some(handle) = r.pending_unsubscribe.take() {
                r.channel.unsubscribe(handle);
            }
        });
        let victim = recorder
            .channel
            .subscribe(|r: &mut Recorder, _: &u32| r.calls.push("victim".into()));
        recorder.pending_unsubscribe = Some(victim);

        fire(&mut recorder, 0);
        assert_eq!(recorder.calls, vec!["remover"]);
        assert_eq!(recorder.channel.len(), 1);
    }

    #[test]
    fn test_self_unsubscribe_mid_fire_keeps_others() {
        let mut recorder = Recorder::default();
        let own_handle = Rc::new(RefCell::new(None::<SubscriptionHandle>));
        let captured = Rc::clone(&own_handle);
        let handle = recorder.channel.subscribe(move |r: &mut Recorder, _: &u32| {
            r.calls.push("once".into());
            if let Some(handle) = *captured.borrow() {
                r.channel.unsubscribe(handle);
            }
        });
        *own_handle.borrow_mut() = Some(handle);
        recorder
            .channel
            .subscribe(|r: &mut Recorder, _: &u32| r.calls.push("always".into()));

        fire(&mut recorder, 0);
        fire(&mut recorder, 0);
        assert_eq!(recorder.calls, vec!["once", "always", "always"]);
    }

    #[test]
    fn test_subscribe_during_fire_runs_next_time() {
        let mut recorder = Recorder::default();
        recorder.channel.subscribe(|r: &mut Recorder, _: &u32| {
            if r.calls.is_empty() {
                r.channel
                    .subscribe(|r: &mut Recorder, _: &u32| r.calls.push("late".into()));
            }
            r.calls.push("early".into());
        });

        fire(&mut recorder, 0);
        assert_eq!(recorder.calls, vec!["early"]);
        fire(&mut recorder, 0);
        assert_eq!(recorder.calls, vec!["early", "early", "late"]);
    }

    #[test]
    fn test_fire_collects_results_in_order() {
        struct Gatherer(Channel<Gatherer, (), MetricsMap>);
        let mut gatherer = Gatherer(Channel::default());
        gatherer
            .0
            .subscribe(|_, _| MetricsMap::from([("fluency".to_string(), "1".to_string())]));
        gatherer
            .0
            .subscribe(|_, _| MetricsMap::from([("fluency".to_string(), "2".to_string())]));

        let results = Channel::fire_in(&mut gatherer, |g| &g.0, &());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["fluency"], "1");
        assert_eq!(results[1]["fluency"], "2");
    }

    #[test]
    fn test_fire_where_missing_channel_is_silent() {
        struct Keyed(HashMap<u8, Channel<Keyed, u32>>, u32);
        let mut keyed = Keyed(HashMap::new(), 0);
        keyed
            .0
            .entry(7)
            .or_default()
            .subscribe(|k: &mut Keyed, v: &u32| k.1 += v);

        let id = 3;
        assert!(Channel::fire_where(&mut keyed, |k| k.0.get(&id), &5).is_empty());
        let id = 7;
        Channel::fire_where(&mut keyed, |k| k.0.get(&id), &5);
        assert_eq!(keyed.1, 5);
    }
}
