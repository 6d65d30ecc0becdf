//! Conversion of sample counts between a caller's clock and a timeline's
//! native clock. Lengths (durations, spans) round to the nearest sample:
//! `round(value * to_rate / from_rate)`. Instants round down, so a caller time
//! maps to the native sample that contains it.

use crate::timeline::{Result, TimelineError};

/// Rescales a length `value`, measured at `from_rate`, to `to_rate`. Halves
/// round up.
pub fn rescale(value: u64, from_rate: u32, to_rate: u32) -> Result<u64> {
    convert(value, from_rate, to_rate, |scaled, from| (scaled * 2 + from) / (from * 2))
}

/// Rescales an instant `value`, measured at `from_rate`, to `to_rate`,
/// rounding down.
pub fn rescale_floor(value: u64, from_rate: u32, to_rate: u32) -> Result<u64> {
    convert(value, from_rate, to_rate, |scaled, from| scaled / from)
}

fn convert(
    value: u64,
    from_rate: u32,
    to_rate: u32,
    divide: impl Fn(u128, u128) -> u128,
) -> Result<u64> {
    if from_rate == 0 || to_rate == 0 {
        return Err(TimelineError::invalid_query(format!(
            "sample rates must be positive (got {} -> {})",
            from_rate, to_rate
        )));
    }
    if from_rate == to_rate {
        return Ok(value);
    }
    let scaled = divide(value as u128 * to_rate as u128, from_rate as u128);
    u64::try_from(scaled).map_err(|_| {
        TimelineError::invalid_query(format!(
            "{} samples at {} Hz overflow at {} Hz",
            value, from_rate, to_rate
        ))
    })
}

/// Converts caller-side values into a timeline's native rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateAdapter {
    native_rate: u32,
}

impl RateAdapter {
    pub fn new(native_rate: u32) -> Self {
        Self { native_rate }
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    /// Native sample containing the caller instant `time` at `caller_rate`.
    pub fn time_to_native(&self, time: u64, caller_rate: u32) -> Result<u64> {
        rescale_floor(time, caller_rate, self.native_rate)
    }

    /// A caller length at `caller_rate` in native samples.
    pub fn to_native(&self, value: u64, caller_rate: u32) -> Result<u64> {
        rescale(value, caller_rate, self.native_rate)
    }

    /// Native samples to samples at `caller_rate`.
    pub fn from_native(&self, value: u64, caller_rate: u32) -> Result<u64> {
        rescale(value, self.native_rate, caller_rate)
    }
}
