//! Serving block requests from peers we have unchoked.

use std::cell::RefCell;
use std::rc::Rc;

use super::{Strategy, StrategyKind};
use crate::client::Client;
use crate::events::{PeerBlock, PeerPiece};

/// Request outcomes since the strategy was initialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStats {
    /// Requests turned into queued uploads
    pub accepted: u64,
    /// Requests from choked peers or for pieces we lack
    pub dropped: u64,
    /// Queued uploads withdrawn by the requester
    pub cancelled: u64,
}

/// Accepts requests from unchoked peers for pieces we own and silently
/// drops everything else.
#[derive(Debug, Default, Clone)]
pub struct RequestSchedulingStrategy {
    stats: Rc<RefCell<RequestStats>>,
}

impl RequestSchedulingStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters so far.
    pub fn stats(&self) -> RequestStats {
        *self.stats.borrow()
    }
}

impl Strategy for RequestSchedulingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RequestScheduling
    }

    fn initialize(&mut self, client: &mut Client) {
        let events = client.events_mut();

        let stats = Rc::clone(&self.stats);
        events
            .block_request_received
            .subscribe(move |client, request: &PeerBlock| {
                let unchoked = client
                    .peers()
                    .get(request.peer)
                    .is_some_and(|peer| !peer.am_choking());
                let accepted = unchoked
                    && client.bitfield().has_piece(request.block.piece)
                    && client
                        .start_block_upload(request.peer, request.block)
                        .is_some();
                if !accepted {
                    stats.borrow_mut().dropped += 1;
                    return;
                }
                stats.borrow_mut().accepted += 1;
                client.notify_piece_requested(PeerPiece {
                    peer: request.peer,
                    piece: request.block.piece,
                });
            });

        let stats = Rc::clone(&self.stats);
        events
            .block_cancel_received
            .subscribe(move |client, request: &PeerBlock| {
                if client.abort_block_upload(request.peer, request.block) {
                    stats.borrow_mut().cancelled += 1;
                }
            });
    }
}
