//! Whole swarms driven through the deterministic simulator.

use std::time::Duration;

use anyhow::{Context, Result};
use pushpull_core::tracing_setup::init_test_tracing;
use pushpull_core::{ClientConfig, ClientId, PlaybackEvent, PlaybackState};
use pushpull_sim::{SimulationConfig, SwarmSimulation};

const FILE_LENGTH: u64 = 64_000;
const PIECE_LENGTH: u32 = 4_096;
const DEADLINE: Duration = Duration::from_secs(120);

fn swarm(config: SimulationConfig) -> Result<SwarmSimulation> {
    init_test_tracing();
    Ok(SwarmSimulation::with_synthetic_media(
        config,
        "clip",
        FILE_LENGTH,
        PIECE_LENGTH,
    )?)
}

fn client(protocol: &str, initial_bitfield: &str) -> ClientConfig {
    ClientConfig {
        protocol: protocol.to_string(),
        initial_bitfield: initial_bitfield.to_string(),
        check_downloaded_data: true,
        ..ClientConfig::for_testing()
    }
}

/// One seeder at t=0 and `leechers` leechers joining at t=100ms.
fn seeded_swarm(
    config: SimulationConfig,
    protocol: &str,
    leechers: usize,
    seeding_duration: Option<Duration>,
) -> Result<(SwarmSimulation, ClientId, Vec<ClientId>)> {
    let mut sim = swarm(config)?;
    let seeder = sim.add_client(client(protocol, "full"))?;
    let mut ids = Vec::new();
    for _ in 0..leechers {
        let config = ClientConfig {
            seeding_duration,
            ..client(protocol, "empty")
        };
        ids.push(sim.add_client_at(Duration::from_millis(100), config)?);
    }
    Ok((sim, seeder, ids))
}

fn assert_swarm_completes(protocol: &str) -> Result<()> {
    let (mut sim, seeder, leechers) =
        seeded_swarm(SimulationConfig::for_testing(), protocol, 3, None)?;

    let report = sim.run_until_complete(DEADLINE)?;

    assert!(report.pending.is_empty(), "{protocol}: {}", report.summary());
    assert!(report.elapsed < DEADLINE);
    for id in leechers {
        let leecher = sim.client(id).context("leecher missing")?;
        assert_eq!(leecher.bitfield().pieces_completed(), sim.media().piece_count());
        assert_eq!(leecher.bitfield().bytes_completed(), FILE_LENGTH);
    }
    let mut seeders = sim.cloud_seeders();
    seeders.sort();
    assert_eq!(seeders, sim.client_ids(), "every leecher announced itself");
    assert!(sim.client_ids().contains(&seeder));
    Ok(())
}

#[test]
fn test_swarm_completes_with_default_protocol() -> Result<()> {
    assert_swarm_completes("default")
}

#[test]
fn test_swarm_completes_with_rarest_first() -> Result<()> {
    assert_swarm_completes("rarest-first")
}

#[test]
fn test_swarm_completes_over_limited_uplinks() -> Result<()> {
    let config = SimulationConfig {
        latency_ms: 25,
        uplink_bytes_per_sec: 64_000,
        ..SimulationConfig::for_testing()
    };
    let (mut sim, _seeder, _leechers) = seeded_swarm(config, "rarest-first", 4, None)?;

    let report = sim.run_until_complete(DEADLINE)?;

    assert!(report.pending.is_empty(), "{}", report.summary());
    // Four leechers cannot all be fed by one 64 KB/s uplink in one second.
    assert!(report.elapsed > Duration::from_secs(1));
    assert!(sim.bytes_sent() >= 4 * FILE_LENGTH);
    Ok(())
}

#[test]
fn test_give_to_get_leechers_receive_no_data() -> Result<()> {
    let (mut sim, _seeder, leechers) =
        seeded_swarm(SimulationConfig::for_testing(), "give-to-get", 3, None)?;

    let report = sim.run_until(Duration::from_secs(30))?;

    assert_eq!(report.pending, leechers);
    for id in leechers {
        let leecher = sim.client(id).context("leecher missing")?;
        assert!(leecher.peer_count() > 0, "leechers still connect");
        assert_eq!(leecher.bitfield().pieces_completed(), 0);
        assert!(leecher.peers().iter().all(|peer| peer.downloaded_bytes() == 0));
    }
    Ok(())
}

#[test]
fn test_leechers_leave_after_seeding_duration() -> Result<()> {
    let (mut sim, seeder, leechers) = seeded_swarm(
        SimulationConfig::for_testing(),
        "default",
        3,
        Some(Duration::from_secs(2)),
    )?;

    let report = sim.run_until_complete(DEADLINE)?;
    assert!(report.pending.is_empty(), "{}", report.summary());
    assert_eq!(sim.cloud_members().len(), 4);

    let later = sim.now() + Duration::from_secs(5);
    sim.run_until(later)?;

    assert_eq!(sim.cloud_members(), vec![seeder]);
    for id in leechers {
        let leecher = sim.client(id).context("leecher missing")?;
        assert!(!leecher.is_cloud_joined());
        assert_eq!(leecher.peer_count(), 0);
        assert!(leecher.is_download_completed());
    }
    let seeder = sim.client(seeder).context("seeder missing")?;
    assert!(seeder.is_cloud_joined());
    assert_eq!(seeder.peer_count(), 0);
    Ok(())
}

#[test]
fn test_same_seed_reproduces_run() -> Result<()> {
    let run = || -> Result<_> {
        let (mut sim, _, _) =
            seeded_swarm(SimulationConfig::for_testing(), "rarest-first", 3, None)?;
        let report = sim.run_until_complete(DEADLINE)?;
        Ok((report, sim.bytes_sent()))
    };

    let (first, first_bytes) = run()?;
    let (second, second_bytes) = run()?;

    assert_eq!(first, second);
    assert_eq!(first_bytes, second_bytes);
    Ok(())
}

#[test]
fn test_fluency_reported_by_video_client() -> Result<()> {
    let mut sim = swarm(SimulationConfig::for_testing())?;
    let viewer = sim.add_client(client("rarest-first-vod", "full"))?;
    let state = |paused, seconds| {
        PlaybackEvent::StateChanged(PlaybackState {
            playing: true,
            paused,
            position: Duration::from_secs(seconds),
        })
    };
    // Stalled until t=2s, then plays positions 0..8 and stalls again at t=9s.
    sim.schedule_playback(viewer, Duration::from_secs(2), state(false, 0))?;
    sim.schedule_playback(viewer, Duration::from_secs(9), state(true, 8))?;

    sim.run_until(Duration::from_secs(15))?;

    let metrics = sim.metrics();
    let gathered: Vec<Duration> = metrics.records_for(viewer).map(|record| record.at).collect();
    assert_eq!(gathered, vec![Duration::from_secs(10)]);
    assert_eq!(metrics.latest(viewer, "fluency"), vec!["0.75"]);
    Ok(())
}
