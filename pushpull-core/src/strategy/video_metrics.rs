//! Playback fluency reported through the metrics gather.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use super::{Strategy, StrategyKind};
use crate::client::Client;
use crate::events::{MetricsMap, PlaybackState};

/// Accumulated playback and buffering spans.
#[derive(Debug, Default)]
struct FluencyState {
    position_will_change: bool,
    playback_start: Duration,
    playback_end: Duration,
    buffer_start: Duration,
    buffer_end: Duration,
    /// Playback time minus time spent buffering, over finished cycles
    numerator: f64,
    /// Playback time over finished cycles
    denominator: f64,
}

impl FluencyState {
    fn position_changed(&mut self, position: Duration) {
        // Periodic updates are announced first; anything else is a seek.
        if !self.position_will_change {
            self.playback_start = position;
        }
        self.position_will_change = false;
    }

    fn state_changed(&mut self, state: &PlaybackState, now: Duration) {
        if state.playing && !state.paused {
            self.buffer_end = now;
            self.playback_start = state.position;
        } else if state.paused {
            // The stall that preceded this playback span ended at buffer_end.
            let buffered = self.buffer_end.saturating_sub(self.buffer_start);
            self.buffer_start = now;
            self.playback_end = state.position;
            let played = self.playback_end.saturating_sub(self.playback_start);
            self.numerator += played.as_secs_f64() - buffered.as_secs_f64();
            self.denominator += played.as_secs_f64();
        }
    }

    fn fluency(&self) -> String {
        if self.denominator == 0.0 {
            "div/0".to_string()
        } else {
            format!("{}", self.numerator / self.denominator)
        }
    }
}

/// Measures how smoothly a video client played back the content.
#[derive(Debug, Default, Clone)]
pub struct VideoMetricsStrategy {
    state: Rc<RefCell<FluencyState>>,
}

impl VideoMetricsStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current fluency ratio, or `div/0` before any playback was accounted.
    pub fn fluency(&self) -> String {
        self.state.borrow().fluency()
    }
}

impl Strategy for VideoMetricsStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::VideoMetrics
    }

    fn initialize(&mut self, client: &mut Client) {
        let now = client.now();
        {
            let mut state = self.state.borrow_mut();
            state.buffer_start = now;
            state.buffer_end = now;
        }
        let events = client.events_mut();

        let state = Rc::clone(&self.state);
        events
            .playback_position_will_change
            .subscribe(move |_, _: &()| state.borrow_mut().position_will_change = true);

        let state = Rc::clone(&self.state);
        events
            .playback_position_changed
            .subscribe(move |_, position: &Duration| state.borrow_mut().position_changed(*position));

        let state = Rc::clone(&self.state);
        events
            .playback_state_changed
            .subscribe(move |client, playback: &PlaybackState| {
                let now = client.now();
                state.borrow_mut().state_changed(playback, now);
            });

        let state = Rc::clone(&self.state);
        events.gather_metrics.subscribe(move |_, _: &()| {
            MetricsMap::from([("fluency".to_string(), state.borrow().fluency())])
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing(position: u64) -> PlaybackState {
        PlaybackState {
            playing: true,
            paused: false,
            position: Duration::from_secs(position),
        }
    }

    fn paused(position: u64) -> PlaybackState {
        PlaybackState {
            playing: true,
            paused: true,
            position: Duration::from_secs(position),
        }
    }

    #[test]
    fn test_fluency_without_playback_is_div_zero() {
        assert_eq!(FluencyState::default().fluency(), "div/0");
    }

    #[test]
    fn test_fluency_subtracts_buffering_time() {
        let mut state = FluencyState::default();
        // Buffer from t=0 to t=2, play positions 0..8, pause at t=10.
        state.state_changed(&playing(0), Duration::from_secs(2));
        state.state_changed(&paused(8), Duration::from_secs(10));

        assert_eq!(state.fluency(), "0.75");
    }

    #[test]
    fn test_periodic_position_updates_keep_playback_start() {
        let mut state = FluencyState::default();
        state.state_changed(&playing(0), Duration::ZERO);
        state.position_will_change = true;
        state.position_changed(Duration::from_secs(4));
        assert_eq!(state.playback_start, Duration::ZERO);

        state.position_changed(Duration::from_secs(30));
        assert_eq!(state.playback_start, Duration::from_secs(30));
    }
}
