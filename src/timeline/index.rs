//! Sparse time index: regularly spaced (time, byte offset) checkpoints over the
//! record area. Every checkpoint sits on a record boundary.

use crate::timeline::{Result, TimelineError};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    /// Elapsed time, in native samples, at `byte_offset`.
    pub time: u64,
    /// Offset from the start of the record area.
    pub byte_offset: u64,
}

impl Checkpoint {
    pub const START: Checkpoint = Checkpoint {
        time: 0,
        byte_offset: 0,
    };
}

/// Converts an index interval in seconds to native samples (at least one).
pub fn interval_samples(interval_secs: f64, sample_rate: u32) -> Result<u64> {
    if !interval_secs.is_finite() || interval_secs <= 0.0 {
        return Err(TimelineError::invalid_argument(format!(
            "index interval must be a positive number of seconds, got {}",
            interval_secs
        )));
    }
    let samples = (interval_secs * sample_rate as f64).round();
    if samples >= u64::MAX as f64 {
        return Err(TimelineError::invalid_argument(format!(
            "index interval of {}s overflows at {} Hz",
            interval_secs, sample_rate
        )));
    }
    Ok((samples as u64).max(1))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    interval: u64,
    checkpoints: Vec<Checkpoint>,
}

impl Index {
    /// Rebuilds an index read from disk, checking its invariants against the
    /// header it came with.
    pub(crate) fn from_parts(
        interval: u64,
        checkpoints: Vec<Checkpoint>,
        data_len: u64,
        total_duration: u64,
    ) -> Result<Self> {
        if interval == 0 {
            return Err(TimelineError::malformed("index interval is zero"));
        }
        match checkpoints.first() {
            Some(&Checkpoint::START) => {}
            Some(first) => {
                return Err(TimelineError::malformed(format!(
                    "first checkpoint is {:?}, expected the start of the record area",
                    first
                )))
            }
            None => return Err(TimelineError::malformed("index has no checkpoints")),
        }
        for pair in checkpoints.windows(2) {
            if pair[1].time < pair[0].time || pair[1].byte_offset < pair[0].byte_offset {
                return Err(TimelineError::malformed(format!(
                    "index goes backwards: {:?} after {:?}",
                    pair[1], pair[0]
                )));
            }
        }
        if let Some(last) = checkpoints.last() {
            if last.byte_offset > data_len || last.time > total_duration {
                return Err(TimelineError::malformed(format!(
                    "checkpoint {:?} lies past the record area ({} bytes, {} samples)",
                    last, data_len, total_duration
                )));
            }
        }
        Ok(Self {
            interval,
            checkpoints,
        })
    }

    /// Last checkpoint at or before `target`; the start of the record area when
    /// `target` precedes every checkpoint. Never lands after `target`.
    pub fn find_floor(&self, target: u64) -> Checkpoint {
        let upper = self.checkpoints.partition_point(|c| c.time <= target);
        match upper {
            0 => Checkpoint::START,
            n => self.checkpoints[n - 1],
        }
    }

    /// Checkpoint spacing in native samples.
    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

/// Accumulates checkpoints while records are appended.
#[derive(Debug)]
pub(crate) struct IndexBuilder {
    interval: u64,
    next_boundary: u64,
    checkpoints: Vec<Checkpoint>,
}

impl IndexBuilder {
    pub fn new(interval: u64) -> Self {
        let interval = interval.max(1);
        Self {
            interval,
            next_boundary: interval,
            checkpoints: vec![Checkpoint::START],
        }
    }

    /// Called after every record with the running totals at its end.
    pub fn feed(&mut self, time: u64, byte_offset: u64) {
        if time < self.next_boundary {
            return;
        }
        self.checkpoints.push(Checkpoint { time, byte_offset });
        // A long record may jump several intervals; one checkpoint covers them all.
        self.next_boundary = (time / self.interval)
            .saturating_add(1)
            .saturating_mul(self.interval);
    }

    pub fn finish(self) -> Index {
        Index {
            interval: self.interval,
            checkpoints: self.checkpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(interval: u64, durations: &[u64], record_len: u64) -> Index {
        let mut builder = IndexBuilder::new(interval);
        let (mut time, mut bytes) = (0, 0);
        for &d in durations {
            time += d;
            bytes += record_len;
            builder.feed(time, bytes);
        }
        builder.finish()
    }

    #[test]
    fn interval_conversion() {
        assert_eq!(interval_samples(0.1, 16000).unwrap(), 1600);
        assert_eq!(interval_samples(0.0001, 1000).unwrap(), 1);
        assert!(interval_samples(0.0, 16000).is_err());
        assert!(interval_samples(-1.0, 16000).is_err());
        assert!(interval_samples(f64::NAN, 16000).is_err());
    }

    #[test]
    fn checkpoints_follow_interval_crossings() {
        // Record ends: 2, 5, 7, 11, 13, 16
        let index = build(4, &[2, 3, 2, 4, 2, 3], 10);
        let times: Vec<u64> = index.checkpoints().iter().map(|c| c.time).collect();
        assert_eq!(times, vec![0, 5, 11, 13, 16]);
        assert_eq!(index.checkpoints()[1].byte_offset, 20);
    }

    #[test]
    fn long_record_adds_a_single_checkpoint() {
        let index = build(10, &[3, 95, 4], 1);
        assert_eq!(
            index.checkpoints(),
            &[
                Checkpoint::START,
                Checkpoint { time: 98, byte_offset: 2 },
                Checkpoint { time: 102, byte_offset: 3 },
            ]
        );
    }

    #[test]
    fn floor_never_overshoots() {
        let index = build(4, &[2, 3, 2, 4, 2, 3], 10);
        assert_eq!(index.find_floor(0), Checkpoint::START);
        assert_eq!(index.find_floor(4).time, 0);
        assert_eq!(index.find_floor(5).time, 5);
        assert_eq!(index.find_floor(10).time, 5);
        assert_eq!(index.find_floor(11).time, 11);
        assert_eq!(index.find_floor(u64::MAX).time, 16);
        for t in 0..20 {
            assert!(index.find_floor(t).time <= t);
        }
    }

    #[test]
    fn empty_index_floors_to_start() {
        let index = Index {
            interval: 1,
            checkpoints: Vec::new(),
        };
        assert_eq!(index.find_floor(42), Checkpoint::START);
    }

    #[test]
    fn from_parts_rejects_broken_tables() {
        let good = vec![Checkpoint::START, Checkpoint { time: 5, byte_offset: 20 }];
        assert!(Index::from_parts(4, good.clone(), 60, 16).is_ok());
        assert!(Index::from_parts(0, good.clone(), 60, 16).is_err());
        assert!(Index::from_parts(4, good, 10, 16).is_err());

        let backwards = vec![
            Checkpoint::START,
            Checkpoint { time: 5, byte_offset: 20 },
            Checkpoint { time: 4, byte_offset: 30 },
        ];
        assert!(Index::from_parts(4, backwards, 60, 16).is_err());

        let bad_start = vec![Checkpoint { time: 1, byte_offset: 0 }];
        assert!(Index::from_parts(4, bad_start, 60, 16).is_err());
        assert!(Index::from_parts(4, Vec::new(), 60, 16).is_err());
    }
}
