//! Runtime and pre-start configuration changes.
//!
//! Every runtime setter records the change and fires
//! strategy-options-changed with the option name and its old and new value
//! rendered as text. Setting a value equal to the current one fires nothing.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::events::{Channel, OptionChange};

use super::{Client, ClientError};

impl Client {
    fn change_option<T>(&mut self, name: &str, value: T, field: fn(&mut ClientConfig) -> &mut T)
    where
        T: PartialEq + Display,
    {
        let slot = field(&mut self.config);
        if *slot == value {
            return;
        }
        let old = std::mem::replace(slot, value).to_string();
        let new = field(&mut self.config).to_string();
        self.record_change(name, old, new);
    }

    fn record_change(&mut self, name: &str, old: String, new: String) {
        tracing::debug!(node = %self.node.id, name, %old, %new, "Option changed");
        self.option_changes
            .insert(name.to_string(), (old.clone(), new.clone()));
        let change = OptionChange {
            name: name.to_string(),
            old,
            new,
        };
        Channel::fire_in(self, |c| &c.events.strategy_options_changed, &change);
    }

    /// Last recorded change of `name` as `(old, new)`.
    pub fn strategy_option_change(&self, name: &str) -> Option<(&str, &str)> {
        self.option_changes
            .get(name)
            .map(|(old, new)| (old.as_str(), new.as_str()))
    }

    /// Free-form strategy options set so far.
    pub fn strategy_options(&self) -> &BTreeMap<String, String> {
        &self.strategy_options
    }

    /// Merges free-form options, firing once per key whose value changed.
    pub fn set_strategy_options(&mut self, options: BTreeMap<String, String>) {
        for (name, value) in options {
            let old = self.strategy_options.get(&name).cloned().unwrap_or_default();
            if old == value && self.strategy_options.contains_key(&name) {
                continue;
            }
            self.strategy_options.insert(name.clone(), value.clone());
            self.record_change(&name, old, value);
        }
    }

    pub fn set_desired_peers(&mut self, value: usize) {
        self.change_option("desired_peers", value, |c| &mut c.desired_peers);
    }

    pub fn set_max_peers(&mut self, value: usize) {
        self.change_option("max_peers", value, |c| &mut c.max_peers);
    }

    /// Zero means unlimited.
    pub fn set_max_unchoked_peers(&mut self, value: usize) {
        self.change_option("max_unchoked_peers", value, |c| &mut c.max_unchoked_peers);
    }

    pub fn set_max_requests_per_peer(&mut self, value: usize) {
        self.change_option("max_requests_per_peer", value, |c| {
            &mut c.max_requests_per_peer
        });
    }

    pub fn set_max_requests_per_piece(&mut self, value: usize) {
        self.change_option("max_requests_per_piece", value, |c| {
            &mut c.max_requests_per_piece
        });
    }

    pub fn set_max_requests_per_block(&mut self, value: usize) {
        self.change_option("max_requests_per_block", value, |c| {
            &mut c.max_requests_per_block
        });
    }

    pub fn set_max_requests_per_peer_per_piece(&mut self, value: usize) {
        self.change_option("max_requests_per_peer_per_piece", value, |c| {
            &mut c.max_requests_per_peer_per_piece
        });
    }

    /// Ignored when zero. Pieces already in progress keep their block size.
    pub fn set_request_block_size(&mut self, value: u32) {
        if value > 0 {
            self.change_option("request_block_size", value, |c| &mut c.request_block_size);
        }
    }

    /// Ignored when zero.
    pub fn set_send_block_size(&mut self, value: u32) {
        if value > 0 {
            self.change_option("send_block_size", value, |c| &mut c.send_block_size);
        }
    }

    /// Ignored when zero. Applies to timers armed afterwards.
    pub fn set_piece_timeout(&mut self, value: Duration) {
        if !value.is_zero() {
            self.change_millis("piece_timeout", value, |c| &mut c.piece_timeout);
        }
    }

    pub fn set_check_downloaded_data(&mut self, value: bool) {
        self.change_option("check_downloaded_data", value, |c| {
            &mut c.check_downloaded_data
        });
    }

    pub fn set_auto_connect(&mut self, value: bool) {
        self.change_option("auto_connect", value, |c| &mut c.auto_connect);
    }

    /// `None` seeds forever. Applies when the download completes next.
    pub fn set_seeding_duration(&mut self, value: Option<Duration>) {
        if self.config.seeding_duration == value {
            return;
        }
        let render = |duration: Option<Duration>| {
            duration.map_or_else(|| "-1".to_string(), |d| d.as_millis().to_string())
        };
        let old = render(std::mem::replace(&mut self.config.seeding_duration, value));
        self.record_change("seeding_duration", old, render(value));
    }

    /// Ignored when zero. Applies from the next gather.
    pub fn set_gather_metrics_period(&mut self, value: Duration) {
        if !value.is_zero() {
            self.change_millis("gather_metrics_period", value, |c| {
                &mut c.gather_metrics_period
            });
        }
    }

    fn change_millis(
        &mut self,
        name: &str,
        value: Duration,
        field: fn(&mut ClientConfig) -> &mut Duration,
    ) {
        let slot = field(&mut self.config);
        if *slot == value {
            return;
        }
        let old = std::mem::replace(slot, value);
        self.record_change(
            name,
            old.as_millis().to_string(),
            value.as_millis().to_string(),
        );
    }

    /// Selects the protocol bundle.
    ///
    /// # Errors
    ///
    /// - `ClientError::AlreadyStarted` - The bundle already exists
    pub fn set_protocol(&mut self, protocol: &str) -> Result<(), ClientError> {
        self.ensure_not_started()?;
        self.config.protocol = protocol.to_string();
        Ok(())
    }

    /// Replaces the initial bitfield policy string.
    ///
    /// # Errors
    ///
    /// - `ClientError::AlreadyStarted` - The bitfield already exists
    /// - `ClientError::Config` - Policy string cannot be parsed
    pub fn set_initial_bitfield(&mut self, policy: &str) -> Result<(), ClientError> {
        self.ensure_not_started()?;
        let candidate = ClientConfig {
            initial_bitfield: policy.to_string(),
            ..ClientConfig::default()
        };
        candidate.fill_policy()?;
        self.config.initial_bitfield = candidate.initial_bitfield;
        Ok(())
    }

    /// Overrides one bitfield byte after the fill policy runs at startup.
    ///
    /// # Errors
    ///
    /// - `ClientError::AlreadyStarted` - The bitfield already exists
    pub fn manipulate_initial_bitfield(&mut self, index: u32, value: u8) -> Result<(), ClientError> {
        self.ensure_not_started()?;
        self.bitfield_overrides.insert(index, value);
        Ok(())
    }

    fn ensure_not_started(&self) -> Result<(), ClientError> {
        if self.started {
            return Err(ClientError::AlreadyStarted { id: self.node.id });
        }
        Ok(())
    }
}
