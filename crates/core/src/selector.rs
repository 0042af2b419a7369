//! Circuit breaking and health-weighted random selection among candidates.

use crate::catalog::Candidate;
use crate::history::count_recent_consecutive_failures;
use crate::model::HistoryWindow;
use rand::distr::{Distribution, weighted::WeightedIndex};
use std::collections::HashMap;

/// Cooldown, in milliseconds, indexed by leading-failure-run length.
fn cooldown_ms(consecutive_failures: usize) -> i64 {
    match consecutive_failures {
        3 => 5 * 60_000,
        4 => 10 * 60_000,
        5 => 30 * 60_000,
        6 => 2 * 60 * 60_000,
        7 => 6 * 60 * 60_000,
        8 => 24 * 60 * 60_000,
        9 => 48 * 60 * 60_000,
        _ => 24 * 60 * 60_000,
    }
}

/// Exclude candidates whose newest-first run of consecutive failures exceeds
/// 2 and whose cooldown (scaled to the run length) has not yet elapsed.
/// Fails open: if the filter would empty the list, the original list is
/// returned unchanged.
pub fn filter_circuit_broken(
    candidates: Vec<Candidate>,
    histories: &HashMap<String, HistoryWindow>,
    key_of: impl Fn(&Candidate) -> String,
    now_ms: i64,
) -> Vec<Candidate> {
    let filtered: Vec<Candidate> = candidates
        .iter()
        .filter(|c| {
            let key = key_of(c);
            let Some(window) = histories.get(&key) else {
                return true;
            };
            if window.is_empty() {
                return true;
            }
            let failures = count_recent_consecutive_failures(window);
            if failures <= 2 {
                return true;
            }
            let newest = window.front().expect("non-empty window has a front");
            now_ms - newest.request_time >= cooldown_ms(failures)
        })
        .cloned()
        .collect();

    if filtered.is_empty() {
        candidates
    } else {
        filtered
    }
}

/// Health-weighted pick among (already circuit-broken-filtered) candidates.
pub fn weighted_pick<'a>(
    candidates: &'a [Candidate],
    histories: &HashMap<String, HistoryWindow>,
    key_of: impl Fn(&Candidate) -> String,
    rng: &mut impl rand::Rng,
) -> &'a Candidate {
    if candidates.len() == 1 {
        return &candidates[0];
    }

    let weights: Vec<f64> = candidates
        .iter()
        .map(|c| weight_for(histories.get(&key_of(c))))
        .collect();

    let dist = WeightedIndex::new(&weights).expect("at least one positive weight");
    &candidates[dist.sample(rng)]
}

fn weight_for(window: Option<&HistoryWindow>) -> f64 {
    let Some(window) = window else {
        return 1.0;
    };
    if window.is_empty() {
        return 1.0;
    }

    let total = window.len() as f64;
    let successes: Vec<_> = window
        .iter()
        .filter(|r| r.request_success && r.first_token_rt > 0)
        .collect();

    if successes.is_empty() {
        return 0.2 / total;
    }

    let success_rate = window.iter().filter(|r| r.request_success).count() as f64 / total;
    let avg_first_token_rt = successes.iter().map(|r| r.first_token_rt as f64).sum::<f64>()
        / successes.len() as f64;
    let avg_clamped = avg_first_token_rt.max(100.0);

    (200.0 / avg_clamped) * success_rate.powi(2)
}
