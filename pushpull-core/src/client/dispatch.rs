//! Inbound driver: connection, data, timer, tracker and playback callbacks.

use std::net::SocketAddr;

use crate::events::{Channel, ExtensionReceived, PeerBlock, PlaybackEvent, PortReceived};
use crate::peers::{Peer, PeerDirection, PeerKey, PeerState};
use crate::protocol::{Handshake, MessageCodec, PeerMessage, WireError, WireMessage};
use crate::services::{ClientTimer, TrackerResponse};

use super::Client;

impl Client {
    /// A transport connection came up.
    ///
    /// Outbound connections must have been opened by this client. Inbound
    /// connections beyond `max_peers` are closed immediately.
    pub fn handle_connection_established(
        &mut self,
        peer: PeerKey,
        remote: SocketAddr,
        direction: PeerDirection,
    ) {
        match direction {
            PeerDirection::Outbound => {
                let Some(existing) = self.peers.get_mut(peer) else {
                    tracing::debug!(node = %self.node.id, %peer, "Unknown outbound connection");
                    self.services.transport.close(peer);
                    return;
                };
                existing.state = PeerState::Handshaking;
            }
            PeerDirection::Inbound => {
                if self.peers.live_count() >= self.config.max_peers {
                    tracing::debug!(node = %self.node.id, %peer, %remote, "Refusing inbound connection");
                    self.services.transport.close(peer);
                    return;
                }
                let piece_count = self.media.piece_count();
                self.peers
                    .insert(Peer::new(peer, remote, direction, piece_count));
            }
        }
        tracing::debug!(node = %self.node.id, %peer, %remote, ?direction, "Connection established");
        self.send_handshake(peer);
    }

    /// An outbound connection attempt failed.
    pub fn handle_connection_failed(&mut self, peer: PeerKey) {
        let Some(existing) = self.peers.get_mut(peer) else {
            return;
        };
        existing.state = PeerState::Closing;
        tracing::debug!(node = %self.node.id, %peer, "Connection failed");
        Channel::fire_in(self, |c| &c.events.peer_connect_failed, &peer);
        self.peers.remove(peer);
    }

    /// The remote side closed a connection.
    pub fn handle_connection_closed(&mut self, peer: PeerKey) {
        self.drop_peer(peer);
    }

    /// Closes a connection from this side.
    pub fn close_peer(&mut self, peer: PeerKey) {
        if self.peers.get(peer).is_some() {
            self.services.transport.close(peer);
            self.drop_peer(peer);
        }
    }

    /// Releases the peer's requests and uploads, fires peer-closed while the
    /// peer is still registered, then removes it.
    fn drop_peer(&mut self, peer: PeerKey) {
        let Some(existing) = self.peers.get_mut(peer) else {
            return;
        };
        if existing.state == PeerState::Closing {
            return;
        }
        let was_active = existing.is_active();
        existing.state = PeerState::Closing;
        self.release_requests(peer, None);
        self.abort_uploads_to(peer);
        tracing::debug!(node = %self.node.id, %peer, "Connection closed");
        if was_active {
            Channel::fire_in(self, |c| &c.events.peer_closed, &peer);
        } else {
            Channel::fire_in(self, |c| &c.events.peer_connect_failed, &peer);
        }
        self.peers.remove(peer);
    }

    /// Bytes arrived on a connection.
    pub fn handle_data_received(&mut self, peer: PeerKey, data: &[u8]) {
        let Some(existing) = self.peers.get_mut(peer) else {
            return;
        };
        existing.receive_buffer.extend_from_slice(data);
        let frame_limit = MessageCodec::max_frame_len(
            self.media.bitfield_size(),
            self.media.piece_length() as usize,
        );

        loop {
            let Some(existing) = self.peers.get_mut(peer) else {
                return;
            };
            match existing.state {
                PeerState::Handshaking => {
                    let Some(len) = Handshake::complete_len(&existing.receive_buffer) else {
                        return;
                    };
                    let frame = existing.receive_buffer.split_to(len);
                    let mut handshake = Handshake::default();
                    if let Err(error) = handshake.deserialize(&frame) {
                        self.reject(peer, &error);
                        return;
                    }
                    let expected = self.media.info_hash();
                    if handshake.info_hash != expected {
                        let error = WireError::InfoHashMismatch {
                            expected,
                            received: handshake.info_hash,
                        };
                        self.reject(peer, &error);
                        return;
                    }
                    self.accept_handshake(peer, &handshake);
                }
                PeerState::Active => {
                    if let Err(error) =
                        MessageCodec::check_frame_limit(&existing.receive_buffer, frame_limit)
                    {
                        self.reject(peer, &error);
                        return;
                    }
                    let Some(len) = MessageCodec::frame_len(&existing.receive_buffer) else {
                        return;
                    };
                    let frame = existing.receive_buffer.split_to(len).freeze();
                    match MessageCodec::decode_frame(&frame, self.media.bitfield_size()) {
                        Ok((message, _)) => self.handle_message(peer, message),
                        Err(error) => {
                            self.reject(peer, &error);
                            return;
                        }
                    }
                }
                PeerState::Connecting | PeerState::Closing => return,
            }
        }
    }

    pub(super) fn reject(&mut self, peer: PeerKey, error: &WireError) {
        tracing::warn!(node = %self.node.id, %peer, %error, "Closing connection");
        self.close_peer(peer);
    }

    fn accept_handshake(&mut self, peer: PeerKey, handshake: &Handshake) {
        if let Some(existing) = self.peers.get_mut(peer) {
            existing.remote_id = Some(handshake.peer_id);
            existing.state = PeerState::Active;
        }
        self.send_bitfield(peer);
        tracing::debug!(node = %self.node.id, %peer, remote = %handshake.peer_id, "Handshake complete");
        Channel::fire_in(self, |c| &c.events.peer_connected, &peer);
    }

    fn handle_message(&mut self, peer: PeerKey, message: PeerMessage) {
        if self.peers.get(peer).is_none() {
            return;
        }
        match message {
            PeerMessage::KeepAlive => {}
            PeerMessage::Choke => self.remote_choke(peer, true),
            PeerMessage::Unchoke => self.remote_choke(peer, false),
            PeerMessage::Interested => self.remote_interest(peer, true),
            PeerMessage::NotInterested => self.remote_interest(peer, false),
            PeerMessage::Have { piece } => self.remote_have(peer, piece),
            PeerMessage::Bitfield { bitfield } => self.remote_bitfield(peer, &bitfield),
            PeerMessage::Request(block) => {
                let event = PeerBlock { peer, block };
                Channel::fire_in(self, |c| &c.events.block_request_received, &event);
            }
            PeerMessage::Cancel(block) => {
                let event = PeerBlock { peer, block };
                Channel::fire_in(self, |c| &c.events.block_cancel_received, &event);
            }
            PeerMessage::Piece {
                piece,
                offset,
                data,
            } => self.receive_block(peer, piece, offset, data),
            PeerMessage::Port { port } => {
                if let Some(existing) = self.peers.get_mut(peer) {
                    existing.listen_port = Some(port);
                }
                let event = PortReceived { peer, port };
                Channel::fire_in(self, |c| &c.events.port_message_received, &event);
            }
            PeerMessage::Extension { id, payload } => {
                let event = ExtensionReceived { peer, payload };
                Channel::fire_where(
                    self,
                    |c| c.events.extension_message_received.get(&id),
                    &event,
                );
            }
        }
    }

    /// A timer this client scheduled fired.
    pub fn handle_timer(&mut self, timer: ClientTimer) {
        match timer {
            ClientTimer::JoinCloud => self.join_cloud(),
            ClientTimer::GatherMetrics => self.gather_metrics(),
            ClientTimer::PieceTimeout { peer, piece } => self.handle_piece_timeout(peer, piece),
            ClientTimer::UploadBlock { upload } => self.send_pending_upload(upload),
            ClientTimer::SeedingExpired => {
                self.seeding_timer = None;
                tracing::info!(node = %self.node.id, "Seeding period over");
                self.leave_cloud();
            }
        }
    }

    /// The tracker answered a join.
    ///
    /// The first response after joining also fires cloud-connection-established.
    pub fn handle_tracker_response(&mut self, response: TrackerResponse) {
        if !self.cloud_joined {
            return;
        }
        if !self.cloud_established {
            self.cloud_established = true;
            Channel::fire_in(self, |c| &c.events.cloud_connection_established, &());
        }
        tracing::debug!(node = %self.node.id, peers = response.peers.len(), "Tracker response");
        Channel::fire_in(self, |c| &c.events.tracker_response_received, &response);
    }

    /// A video player reported playback progress.
    pub fn handle_playback_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::PositionWillChange => {
                Channel::fire_in(self, |c| &c.events.playback_position_will_change, &());
            }
            PlaybackEvent::PositionChanged(position) => {
                Channel::fire_in(self, |c| &c.events.playback_position_changed, &position);
            }
            PlaybackEvent::StateChanged(state) => {
                Channel::fire_in(self, |c| &c.events.playback_state_changed, &state);
            }
        }
    }
}
