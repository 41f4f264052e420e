//! Part selection: interest, piece availability and request filling.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::piece_picker::{PiecePicker, RarestFirstPicker, SequentialPicker};
use super::{Strategy, StrategyKind};
use crate::bitfield::Bitfield;
use crate::client::Client;
use crate::events::{ChokeChange, PeerBlock, PeerPiece};
use crate::peers::PeerKey;
use crate::protocol::PieceIndex;

struct PartState {
    picker: Box<dyn PiecePicker>,
    /// Connected peers holding each piece
    availability: Vec<u32>,
    /// Pieces already counted per peer, whatever order Have and Bitfield came in
    counted: HashMap<PeerKey, Bitfield>,
}

impl PartState {
    fn count(&mut self, peer: PeerKey, piece: PieceIndex) {
        let piece_count = self.availability.len() as u32;
        let counted = self
            .counted
            .entry(peer)
            .or_insert_with(|| Bitfield::new(piece_count));
        if counted.set_piece(piece) {
            if let Some(count) = self.availability.get_mut(piece.as_usize()) {
                *count += 1;
            }
        }
    }

    fn forget(&mut self, peer: PeerKey) {
        let Some(counted) = self.counted.remove(&peer) else {
            return;
        };
        for piece in counted.pieces() {
            if let Some(count) = self.availability.get_mut(piece.as_usize()) {
                *count = count.saturating_sub(1);
            }
        }
    }
}

type Shared = Rc<RefCell<PartState>>;

/// Drives downloading for a client with a pluggable [`PiecePicker`].
///
/// Requests are refilled whenever a peer unchokes us, delivers a block, or
/// loses a request to a timeout or cancel, and after every completed piece.
/// In-progress pieces the peer has are continued before a new one is picked.
#[derive(Clone)]
pub struct PartSelectionStrategy {
    kind: StrategyKind,
    state: Shared,
}

impl PartSelectionStrategy {
    /// In-order selection.
    pub fn sequential() -> Self {
        Self::with_picker(StrategyKind::SequentialPartSelection, Box::new(SequentialPicker))
    }

    /// Rarest-first selection.
    pub fn rarest_first() -> Self {
        Self::with_picker(StrategyKind::RarestFirstPartSelection, Box::new(RarestFirstPicker))
    }

    fn with_picker(kind: StrategyKind, picker: Box<dyn PiecePicker>) -> Self {
        Self {
            kind,
            state: Rc::new(RefCell::new(PartState {
                picker,
                availability: Vec::new(),
                counted: HashMap::new(),
            })),
        }
    }

    /// Holder count of every piece as currently tracked.
    pub fn availability(&self) -> Vec<u32> {
        self.state.borrow().availability.clone()
    }
}

impl Strategy for PartSelectionStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn initialize(&mut self, client: &mut Client) {
        self.state.borrow_mut().availability = vec![0; client.media().piece_count() as usize];
        let events = client.events_mut();

        let state = Rc::clone(&self.state);
        events.bitfield_received.subscribe(move |client, peer: &PeerKey| {
            if let Some(remote) = client.peers().get(*peer) {
                let mut state = state.borrow_mut();
                for piece in remote.bitfield().pieces() {
                    state.count(*peer, piece);
                }
            }
            update_interest(client, *peer);
            fill(&state, client, *peer);
        });

        let state = Rc::clone(&self.state);
        events.piece_have_received.subscribe(move |client, event: &PeerPiece| {
            state.borrow_mut().count(event.peer, event.piece);
            if !client.bitfield().has_piece(event.piece) {
                client.set_interested(event.peer, true);
            }
            fill(&state, client, event.peer);
        });

        let state = Rc::clone(&self.state);
        events
            .peer_closed
            .subscribe(move |_, peer: &PeerKey| state.borrow_mut().forget(*peer));

        let state = Rc::clone(&self.state);
        events.choke_state_changing.subscribe(move |client, change: &ChokeChange| {
            if !change.choked {
                fill(&state, client, change.peer);
            }
        });

        let state = Rc::clone(&self.state);
        events
            .block_transfer_complete
            .subscribe(move |client, event: &PeerBlock| fill(&state, client, event.peer));

        let state = Rc::clone(&self.state);
        events
            .piece_cancelled
            .subscribe(move |client, event: &PeerPiece| fill(&state, client, event.peer));

        let state = Rc::clone(&self.state);
        events
            .piece_timeout
            .subscribe(move |client, _: &PeerPiece| fill_all(&state, client));

        let state = Rc::clone(&self.state);
        events.piece_complete.subscribe(move |client, _: &PeerPiece| {
            for peer in client.peers().keys() {
                update_interest(client, peer);
            }
            fill_all(&state, client);
        });
    }
}

/// Interested exactly when the peer has a piece we lack.
fn update_interest(client: &mut Client, peer: PeerKey) {
    let wanted = client.peers().get(peer).is_some_and(|remote| {
        remote
            .bitfield()
            .pieces()
            .any(|piece| !client.bitfield().has_piece(piece))
    });
    client.set_interested(peer, wanted);
}

fn fill_all(state: &Shared, client: &mut Client) {
    for peer in client.peers().keys() {
        fill(state, client, peer);
    }
}

/// Tops up the request pipeline to `peer`.
fn fill(state: &Shared, client: &mut Client, peer: PeerKey) {
    while client.can_request_more(peer) {
        for piece in client.in_progress_pieces() {
            if !client.can_request_more(peer) {
                return;
            }
            if client.has_requestable_blocks(peer, piece) {
                client.request_piece(peer, piece);
            }
        }
        if !client.can_request_more(peer) {
            return;
        }

        let next = {
            let state = state.borrow();
            let Some(remote) = client.peers().get(peer) else {
                return;
            };
            let eligible = |piece: PieceIndex| !client.is_piece_in_progress(piece);
            state.picker.pick(
                client.bitfield(),
                remote.bitfield(),
                &state.availability,
                &eligible,
            )
        };
        match next {
            Some(piece) if client.request_piece(peer, piece) > 0 => {}
            _ => return,
        }
    }
}
