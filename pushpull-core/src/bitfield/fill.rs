//! Initial bitfield fill policies

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use super::bit_mask;
use crate::config::ConfigError;

/// How the local bitfield is populated before the client starts.
///
/// Parsed from the `initial_bitfield` option. The first character selects the
/// policy: `e` empty, `f` full, `r` random pieces (`random:<fraction>`).
/// Any other leading character selects [`FillPolicy::PrefixThenRandom`] with
/// the remainder parsed as a fraction, e.g. `"p0.25"`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FillPolicy {
    /// No pieces owned
    #[default]
    Empty,
    /// Every piece owned
    Full,
    /// `round(piece_count * fraction)` pieces chosen without replacement
    Random { fraction: f64 },
    /// Leading bytes full, trailing `ceil(bytes * fraction)` bytes random
    PrefixThenRandom { fraction: f64 },
}

impl FillPolicy {
    /// Fills `bits` (already zeroed) according to the policy.
    pub fn apply<R: Rng>(&self, bits: &mut [u8], piece_count: u32, rng: &mut R) {
        match *self {
            FillPolicy::Empty => bits.fill(0),
            FillPolicy::Full => bits.fill(0xff),
            FillPolicy::Random { fraction } => {
                let total = piece_count as usize;
                let chosen = ((total as f64 * fraction).round() as usize).min(total);
                for index in rand::seq::index::sample(rng, total, chosen).iter() {
                    bits[index / 8] |= bit_mask(index as u32);
                }
            }
            FillPolicy::PrefixThenRandom { fraction } => {
                let size = bits.len();
                let random_len = ((size as f64 * fraction).ceil() as usize).min(size);
                let prefix = size - random_len;
                bits[..prefix].fill(0xff);
                for byte in &mut bits[prefix..] {
                    *byte = rng.random::<u8>();
                }
            }
        }
    }

    fn parse_fraction(value: &str, text: &str) -> Result<f64, ConfigError> {
        let fraction: f64 = text.trim().parse().map_err(|_| ConfigError::InvalidFillPolicy {
            value: value.to_string(),
            reason: format!("'{text}' is not a fraction"),
        })?;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ConfigError::InvalidFillPolicy {
                value: value.to_string(),
                reason: format!("fraction {fraction} outside [0, 1]"),
            });
        }
        Ok(fraction)
    }
}

impl FromStr for FillPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let Some(first) = value.chars().next() else {
            return Ok(FillPolicy::Empty);
        };

        match first {
            'e' => Ok(FillPolicy::Empty),
            'f' => Ok(FillPolicy::Full),
            'r' => {
                let (_, fraction) =
                    value
                        .split_once(':')
                        .ok_or_else(|| ConfigError::InvalidFillPolicy {
                            value: value.to_string(),
                            reason: "expected random:<fraction>".to_string(),
                        })?;
                Ok(FillPolicy::Random {
                    fraction: Self::parse_fraction(value, fraction)?,
                })
            }
            _ => Ok(FillPolicy::PrefixThenRandom {
                fraction: Self::parse_fraction(value, &value[first.len_utf8()..])?,
            }),
        }
    }
}

impl fmt::Display for FillPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillPolicy::Empty => write!(f, "empty"),
            FillPolicy::Full => write!(f, "full"),
            FillPolicy::Random { fraction } => write!(f, "random:{fraction}"),
            FillPolicy::PrefixThenRandom { fraction } => write!(f, "p{fraction}"),
        }
    }
}
