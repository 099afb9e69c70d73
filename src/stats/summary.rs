use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Submissions whose trigger lies this far past the range end still belong to the range.
pub const TRIGGER_LOOKAHEAD_BLOCKS: u64 = 1_000;

/// A `TransactionSubmitted` event: the probe's trigger and the block it was sequenced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub trigger: u64,
    pub sequenced: u64,
}

/// A transfer to the submit account whose value names the trigger block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Success {
    pub trigger: u64,
    pub included: u64,
}

pub fn trigger_in_range(trigger: u64, start: u64, end: u64) -> bool {
    trigger >= start && trigger <= end.saturating_add(TRIGGER_LOOKAHEAD_BLOCKS)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelaySummary {
    pub samples: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
}

impl DelaySummary {
    /// `None` for an empty sample.
    pub fn from_delays(delays: &[f64]) -> Option<Self> {
        if delays.is_empty() {
            return None;
        }
        let mut sorted = delays.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        Some(Self {
            samples: n,
            min: sorted[0],
            max: sorted[n - 1],
            mean: sorted.iter().sum::<f64>() / n as f64,
            median,
        })
    }
}

impl fmt::Display for DelaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "delay max {:.0} min {:.0} avg {:.2} median {:.2}",
            self.max, self.min, self.mean, self.median
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Inclusion block minus sequenced block, one entry per matched submission.
    pub delays: Vec<f64>,
    pub failed: Vec<Submission>,
}

impl MatchResult {
    pub fn fail_pct(&self) -> f64 {
        percent(self.failed.len() as u64, (self.delays.len() + self.failed.len()) as u64)
    }

    pub fn delay_summary(&self) -> Option<DelaySummary> {
        DelaySummary::from_delays(&self.delays)
    }
}

/// Pairs each submission with the success for its trigger. The last success seen for a
/// trigger wins.
pub fn match_submissions(submissions: &[Submission], successes: &[Success]) -> MatchResult {
    let by_trigger: HashMap<u64, Success> = successes.iter().map(|s| (s.trigger, *s)).collect();
    let mut result = MatchResult::default();
    for submission in submissions {
        match by_trigger.get(&submission.trigger) {
            Some(success) => result
                .delays
                .push(success.included as f64 - submission.sequenced as f64),
            None => result.failed.push(*submission),
        }
    }
    result
}

/// Shutterized blocks that never got a probe, in ascending order.
pub fn missed_triggers(triggers: &[u64], submissions: &[Submission]) -> Vec<u64> {
    let submitted: BTreeSet<u64> = submissions.iter().map(|s| s.trigger).collect();
    let missed: BTreeSet<u64> = triggers
        .iter()
        .copied()
        .filter(|t| !submitted.contains(t))
        .collect();
    missed.into_iter().collect()
}

pub fn shutterized_pct(shutterized: usize, start: u64, end: u64) -> f64 {
    percent(shutterized as u64, end.saturating_sub(start))
}

pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}
