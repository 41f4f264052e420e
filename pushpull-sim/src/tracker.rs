//! In-process tracker handing out peer lists per info hash.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::time::Duration;

use pushpull_core::{ClientId, CloudAnnounce, InfoHash, TrackerResponse};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::config::SimulationConfig;
use crate::events::{EventQueue, SimEvent};

#[derive(Debug, Default)]
struct Cloud {
    members: BTreeMap<ClientId, SocketAddr>,
    seeders: BTreeSet<ClientId>,
}

/// Cloud membership for every shared content.
#[derive(Debug)]
pub struct Tracker {
    clouds: HashMap<InfoHash, Cloud>,
    latency: Duration,
    peer_limit: usize,
}

impl Tracker {
    /// Creates a tracker with the configured response delay and list size.
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            clouds: HashMap::new(),
            latency: config.tracker_latency(),
            peer_limit: config.tracker_peer_limit,
        }
    }

    /// Registers `client` and answers with a shuffled list of the other
    /// members after the tracker latency.
    pub fn join(
        &mut self,
        queue: &mut EventQueue,
        now: Duration,
        rng: &mut ChaCha8Rng,
        client: ClientId,
        announce: &CloudAnnounce,
    ) {
        let cloud = self.clouds.entry(announce.info_hash).or_default();
        cloud.members.insert(client, announce.address);
        if announce.seeder {
            cloud.seeders.insert(client);
        }

        let mut peers: Vec<SocketAddr> = cloud
            .members
            .iter()
            .filter(|(member, _)| **member != client)
            .map(|(_, address)| *address)
            .collect();
        peers.shuffle(rng);
        peers.truncate(self.peer_limit);
        tracing::debug!(node = %client, peers = peers.len(), "Tracker join");
        queue.push(
            now + self.latency,
            SimEvent::TrackerResponse {
                client,
                response: TrackerResponse { peers },
            },
        );
    }

    /// Unregisters `client`.
    pub fn leave(&mut self, client: ClientId, announce: &CloudAnnounce) {
        if let Some(cloud) = self.clouds.get_mut(&announce.info_hash) {
            cloud.members.remove(&client);
            cloud.seeders.remove(&client);
        }
        tracing::debug!(node = %client, "Tracker leave");
    }

    /// Marks a member as seeder. Non-members are ignored.
    pub fn announce_seeder(&mut self, client: ClientId, announce: &CloudAnnounce) {
        if let Some(cloud) = self.clouds.get_mut(&announce.info_hash) {
            if cloud.members.contains_key(&client) {
                cloud.seeders.insert(client);
            }
        }
    }

    /// Members of the cloud for `info_hash`, ascending.
    pub fn members(&self, info_hash: InfoHash) -> Vec<ClientId> {
        self.clouds
            .get(&info_hash)
            .map(|cloud| cloud.members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Seeders of the cloud for `info_hash`, ascending.
    pub fn seeders(&self, info_hash: InfoHash) -> Vec<ClientId> {
        self.clouds
            .get(&info_hash)
            .map(|cloud| cloud.seeders.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use pushpull_core::PeerId;
    use rand::SeedableRng;

    use super::*;

    fn announce(last: u8, seeder: bool) -> CloudAnnounce {
        CloudAnnounce {
            info_hash: InfoHash::default(),
            peer_id: PeerId::from_text("peer"),
            address: SocketAddr::from(([10, 0, 0, last], 6881)),
            bytes_completed: 0,
            seeder,
        }
    }

    fn response_peers(queue: &mut EventQueue) -> Vec<SocketAddr> {
        match queue.pop().map(|scheduled| scheduled.event) {
            Some(SimEvent::TrackerResponse { response, .. }) => response.peers,
            other => panic!("expected a tracker response, got {other:?}"),
        }
    }

    #[test]
    fn test_join_answers_with_other_members() {
        let config = SimulationConfig::for_testing();
        let mut tracker = Tracker::new(&config);
        let mut queue = EventQueue::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        tracker.join(&mut queue, Duration::ZERO, &mut rng, ClientId(1), &announce(1, true));
        assert!(response_peers(&mut queue).is_empty());

        tracker.join(&mut queue, Duration::ZERO, &mut rng, ClientId(2), &announce(2, false));
        assert_eq!(queue.next_time(), Some(config.tracker_latency()));
        assert_eq!(
            response_peers(&mut queue),
            vec![SocketAddr::from(([10, 0, 0, 1], 6881))]
        );
        assert_eq!(tracker.seeders(InfoHash::default()), vec![ClientId(1)]);
    }

    #[test]
    fn test_join_respects_peer_limit() {
        let config = SimulationConfig {
            tracker_peer_limit: 2,
            ..SimulationConfig::for_testing()
        };
        let mut tracker = Tracker::new(&config);
        let mut queue = EventQueue::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for id in 1..=5u8 {
            tracker.join(&mut queue, Duration::ZERO, &mut rng, ClientId(id.into()), &announce(id, false));
            response_peers(&mut queue);
        }

        tracker.join(&mut queue, Duration::ZERO, &mut rng, ClientId(6), &announce(6, false));
        assert_eq!(response_peers(&mut queue).len(), 2);
    }

    #[test]
    fn test_leave_forgets_member_and_seeder() {
        let config = SimulationConfig::for_testing();
        let mut tracker = Tracker::new(&config);
        let mut queue = EventQueue::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        tracker.join(&mut queue, Duration::ZERO, &mut rng, ClientId(1), &announce(1, false));
        tracker.announce_seeder(ClientId(1), &announce(1, true));
        tracker.announce_seeder(ClientId(9), &announce(9, true));
        assert_eq!(tracker.seeders(InfoHash::default()), vec![ClientId(1)]);

        tracker.leave(ClientId(1), &announce(1, true));

        assert!(tracker.members(InfoHash::default()).is_empty());
        assert!(tracker.seeders(InfoHash::default()).is_empty());
    }
}
