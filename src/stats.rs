//! Aggregation of per-run trimming statistics.
//!
//! A [`TrimStats`] is a pure fold over the ordered stream of pair outcomes:
//! it is updated by exactly one consumer, one outcome at a time, so no
//! counter is ever shared between threads.

use crate::pair::PairOutcome;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrimStats {
    pub input_pairs: u64,
    pub both_surviving: u64,
    pub forward_only_surviving: u64,
    pub reverse_only_surviving: u64,
    pub dropped: u64,
    pub input_bases: u64,
    pub surviving_bases: u64,
}

impl TrimStats {
    pub fn new() -> TrimStats {
        TrimStats::default()
    }

    /// Folds one pair outcome into the running counters.
    pub fn record(&mut self, outcome: &PairOutcome) {
        self.input_pairs += 1;
        self.input_bases += outcome.info1.original_length as u64;
        if let Some(info2) = &outcome.info2 {
            self.input_bases += info2.original_length as u64;
        }

        if let Some(read1) = &outcome.read1 {
            self.surviving_bases += read1.len() as u64;
        }
        if let Some(read2) = &outcome.read2 {
            self.surviving_bases += read2.len() as u64;
        }

        match (&outcome.read1, &outcome.read2) {
            (Some(_), Some(_)) => self.both_surviving += 1,
            (Some(_), None) => {
                if outcome.info2.is_some() {
                    self.forward_only_surviving += 1;
                } else {
                    // single-end data has no mate to orphan against
                    self.both_surviving += 1;
                }
            }
            (None, Some(_)) => self.reverse_only_surviving += 1,
            (None, None) => self.dropped += 1,
        }
    }

    /// The summary line reported at the end of a paired-end run.
    pub fn summary(&self) -> String {
        format!(
            "Input Read Pairs: {} Both Surviving: {} ({:.2}%) Forward Only Surviving: {} ({:.2}%) Reverse Only Surviving: {} ({:.2}%) Dropped: {} ({:.2}%)",
            self.input_pairs,
            self.both_surviving,
            self.percent(self.both_surviving),
            self.forward_only_surviving,
            self.percent(self.forward_only_surviving),
            self.reverse_only_surviving,
            self.percent(self.reverse_only_surviving),
            self.dropped,
            self.percent(self.dropped),
        )
    }

    /// The summary line reported at the end of a single-end run.
    pub fn summary_single_end(&self) -> String {
        format!(
            "Input Reads: {} Surviving: {} ({:.2}%) Dropped: {} ({:.2}%)",
            self.input_pairs,
            self.both_surviving,
            self.percent(self.both_surviving),
            self.dropped,
            self.percent(self.dropped),
        )
    }

    fn percent(&self, count: u64) -> f64 {
        if self.input_pairs == 0 {
            0.0
        } else {
            count as f64 * 100.0 / self.input_pairs as f64
        }
    }
}
