//! Creation-timestamp sequence allocation.
//!
//! Bundles produced by one source within the same millisecond are
//! disambiguated by a sequence number. The keeper hands out the next
//! sequence per `(source, dtn-time)` pair and prunes entries older than a
//! day — except the `dtn-time = 0` entry, which unclocked sources keep
//! incrementing for the life of the process.

use super::*;
use bpv7::creation_timestamp::CreationTimestamp;
use bpv7::dtn_time::DtnTime;
use bpv7::eid::Eid;
use std::collections::HashMap;
use std::sync::Mutex;

pub const PRUNE_AFTER: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

#[derive(Default)]
pub struct IdKeeper {
    sequences: Mutex<HashMap<(Eid, u64), u64>>,
}

impl IdKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps a creation timestamp for `source` at the current time,
    /// incrementing the sequence for repeated calls within a millisecond.
    pub fn stamp(&self, source: &Eid) -> CreationTimestamp {
        self.stamp_at(source, DtnTime::now())
    }

    pub fn stamp_at(&self, source: &Eid, time: DtnTime) -> CreationTimestamp {
        let mut sequences = self.sequences.lock().unwrap();
        let next = sequences
            .entry((source.clone(), time.millisecs()))
            .or_insert(0);
        let sequence = *next;
        *next += 1;
        CreationTimestamp::new(time, sequence)
    }

    /// Drops sequence state older than [`PRUNE_AFTER`], keeping the
    /// zero-time entries.
    pub fn prune(&self) {
        let cutoff = DtnTime::now()
            .millisecs()
            .saturating_sub(PRUNE_AFTER.as_millis() as u64);
        self.sequences
            .lock()
            .unwrap()
            .retain(|(_, time), _| *time == 0 || *time >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eid(s: &str) -> Eid {
        s.parse().unwrap()
    }

    #[test]
    fn sequences_are_monotonic_per_pair() {
        let keeper = IdKeeper::new();
        let t = DtnTime::new(5_000);

        let a1 = keeper.stamp_at(&eid("dtn://a/"), t);
        let a2 = keeper.stamp_at(&eid("dtn://a/"), t);
        let b1 = keeper.stamp_at(&eid("dtn://b/"), t);

        assert_eq!(a1.sequence_number, 0);
        assert_eq!(a2.sequence_number, 1);
        // Independent per source
        assert_eq!(b1.sequence_number, 0);

        // A different millisecond restarts the sequence
        let a3 = keeper.stamp_at(&eid("dtn://a/"), DtnTime::new(5_001));
        assert_eq!(a3.sequence_number, 0);
    }

    #[test]
    fn prune_keeps_recent_and_zero_time() {
        let keeper = IdKeeper::new();
        let old = DtnTime::new(1);
        let zero = DtnTime::new(0);
        let now = DtnTime::now();

        keeper.stamp_at(&eid("dtn://a/"), old);
        keeper.stamp_at(&eid("dtn://a/"), zero);
        keeper.stamp_at(&eid("dtn://a/"), now);
        keeper.prune();

        let sequences = keeper.sequences.lock().unwrap();
        assert!(!sequences.contains_key(&(eid("dtn://a/"), 1)));
        assert!(sequences.contains_key(&(eid("dtn://a/"), 0)));
        assert!(sequences.contains_key(&(eid("dtn://a/"), now.millisecs())));
    }
}
