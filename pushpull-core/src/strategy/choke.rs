//! Choke/unchoke: which interested peers we serve.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{Strategy, StrategyKind};
use crate::client::Client;
use crate::events::{InterestChange, OptionChange};
use crate::peers::PeerKey;

/// Serves interested peers up to `max_unchoked_peers` (0 = unlimited).
///
/// Peers that become interested while every slot is taken wait in arrival
/// order and get the next free slot.
#[derive(Debug, Default, Clone)]
pub struct ChokeUnchokeStrategy {
    waiting: Rc<RefCell<VecDeque<PeerKey>>>,
}

impl ChokeUnchokeStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interested peers waiting for a slot, longest waiting first.
    pub fn waiting(&self) -> Vec<PeerKey> {
        self.waiting.borrow().iter().copied().collect()
    }
}

impl Strategy for ChokeUnchokeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ChokeUnchoke
    }

    fn initialize(&mut self, client: &mut Client) {
        let events = client.events_mut();

        let waiting = Rc::clone(&self.waiting);
        events
            .interest_state_changing
            .subscribe(move |client, change: &InterestChange| {
                if change.interested {
                    if has_free_slot(client) {
                        client.set_choking(change.peer, false);
                    } else {
                        waiting.borrow_mut().push_back(change.peer);
                    }
                    return;
                }
                waiting.borrow_mut().retain(|peer| *peer != change.peer);
                if client.set_choking(change.peer, true) {
                    promote(&waiting, client);
                }
            });

        let waiting = Rc::clone(&self.waiting);
        events.peer_closed.subscribe(move |client, closed: &PeerKey| {
            waiting.borrow_mut().retain(|peer| peer != closed);
            let was_unchoked = client
                .peers()
                .get(*closed)
                .is_some_and(|peer| !peer.am_choking());
            if was_unchoked {
                promote(&waiting, client);
            }
        });

        let waiting = Rc::clone(&self.waiting);
        events
            .strategy_options_changed
            .subscribe(move |client, change: &OptionChange| {
                if change.name == "max_unchoked_peers" {
                    promote(&waiting, client);
                }
            });
    }
}

fn has_free_slot(client: &Client) -> bool {
    let limit = client.config().max_unchoked_peers;
    limit == 0 || unchoked_count(client) < limit
}

fn unchoked_count(client: &Client) -> usize {
    client
        .peers()
        .active()
        .filter(|peer| !peer.am_choking())
        .count()
}

/// Unchokes waiting peers while slots are free.
fn promote(waiting: &RefCell<VecDeque<PeerKey>>, client: &mut Client) {
    while has_free_slot(client) {
        let Some(next) = waiting.borrow_mut().pop_front() else {
            return;
        };
        let still_interested = client
            .peers()
            .get(next)
            .is_some_and(|peer| peer.is_active() && peer.peer_interested());
        if still_interested {
            client.set_choking(next, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_mocks::{connect_remote, deliver, remote_bitfield, started_client};
    use crate::config::ClientConfig;
    use crate::protocol::PeerMessage;

    fn seeder(max_unchoked_peers: usize) -> Client {
        let config = ClientConfig {
            protocol: "default".to_string(),
            initial_bitfield: "full".to_string(),
            max_unchoked_peers,
            ..ClientConfig::for_testing()
        };
        started_client(config).unwrap().0
    }

    fn unchoked(client: &Client) -> Vec<PeerKey> {
        client
            .peers()
            .iter()
            .filter(|peer| !peer.am_choking())
            .map(|peer| peer.key())
            .collect()
    }

    #[test]
    fn test_unchokes_up_to_limit_then_queues() {
        let mut client = seeder(2);
        for key in 1..=3 {
            connect_remote(&mut client, PeerKey(key), &remote_bitfield(&[]));
            deliver(&mut client, PeerKey(key), &PeerMessage::Interested);
        }

        assert_eq!(unchoked(&client), vec![PeerKey(1), PeerKey(2)]);
        let strategy = client
            .strategy(StrategyKind::ChokeUnchoke)
            .and_then(|strategy| strategy.as_choke_unchoke())
            .unwrap();
        assert_eq!(strategy.waiting(), vec![PeerKey(3)]);
    }

    #[test]
    fn test_lost_interest_frees_slot_for_longest_waiting() {
        let mut client = seeder(1);
        for key in 1..=3 {
            connect_remote(&mut client, PeerKey(key), &remote_bitfield(&[]));
            deliver(&mut client, PeerKey(key), &PeerMessage::Interested);
        }

        deliver(&mut client, PeerKey(1), &PeerMessage::NotInterested);
        assert_eq!(unchoked(&client), vec![PeerKey(2)]);
    }

    #[test]
    fn test_closed_unchoked_peer_frees_slot() {
        let mut client = seeder(1);
        for key in 1..=2 {
            connect_remote(&mut client, PeerKey(key), &remote_bitfield(&[]));
            deliver(&mut client, PeerKey(key), &PeerMessage::Interested);
        }

        client.handle_connection_closed(PeerKey(1));
        assert_eq!(unchoked(&client), vec![PeerKey(2)]);
    }

    #[test]
    fn test_zero_limit_unchokes_everyone() {
        let mut client = seeder(0);
        for key in 1..=5 {
            connect_remote(&mut client, PeerKey(key), &remote_bitfield(&[]));
            deliver(&mut client, PeerKey(key), &PeerMessage::Interested);
        }
        assert_eq!(unchoked(&client).len(), 5);
    }

    #[test]
    fn test_raising_limit_promotes_waiting_peers() {
        let mut client = seeder(1);
        for key in 1..=3 {
            connect_remote(&mut client, PeerKey(key), &remote_bitfield(&[]));
            deliver(&mut client, PeerKey(key), &PeerMessage::Interested);
        }

        client.set_max_unchoked_peers(3);
        assert_eq!(unchoked(&client).len(), 3);
    }
}
