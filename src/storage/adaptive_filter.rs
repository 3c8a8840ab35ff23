// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! Online reordering of conjunctive filter evaluation.
//!
//! The filter order starts as declared. After a short warm-up the filter
//! alternates between an execute phase (occasionally swapping a random
//! adjacent pair, weighted by how promising the swap still looks) and an
//! observe phase (keeping the swap if the mean per-batch latency improved,
//! otherwise halving that pair's swap likeliness and swapping back) — a
//! hill-climbing search that converges toward evaluating the most selective
//! filters first without any static statistics.

use std::time::Instant;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

/// Timing token handed from [`AdaptiveFilter::begin`] to
/// [`AdaptiveFilter::end`].
pub type AdaptiveFilterState = Option<Instant>;

const WARMUP_ITERATIONS: u64 = 5;
const OBSERVE_INTERVAL: u64 = 10;
const EXECUTE_INTERVAL: u64 = 20;
const INITIAL_SWAP_LIKELINESS: u64 = 100;

pub struct AdaptiveFilter {
    /// Current evaluation order: `permutation[i]` is the filter evaluated in
    /// position `i`.
    pub permutation: Vec<usize>,

    iteration_count: u64,
    swap_idx: usize,
    right_random_border: u64,
    runtime_sum: f64,
    prev_mean: f64,
    observe: bool,
    warmup: bool,
    swap_likeliness: Vec<u64>,
    rng: SmallRng,
}

impl AdaptiveFilter {
    pub fn new(filter_count: usize) -> Self {
        Self {
            permutation: (0..filter_count).collect(),
            iteration_count: 0,
            swap_idx: 0,
            right_random_border: (INITIAL_SWAP_LIKELINESS * filter_count.saturating_sub(1) as u64)
                .max(1),
            runtime_sum: 0.0,
            prev_mean: 0.0,
            observe: false,
            warmup: true,
            swap_likeliness: vec![INITIAL_SWAP_LIKELINESS; filter_count.saturating_sub(1)],
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn begin(&self) -> AdaptiveFilterState {
        if self.permutation.len() <= 1 {
            return None;
        }
        Some(Instant::now())
    }

    pub fn end(&mut self, state: AdaptiveFilterState) {
        let Some(start) = state else {
            return;
        };
        self.adapt_runtime_statistics(start.elapsed().as_secs_f64());
    }

    /// Feeds one batch's filter-evaluation latency into the search.
    pub fn adapt_runtime_statistics(&mut self, duration: f64) {
        self.iteration_count += 1;
        self.runtime_sum += duration;

        if self.warmup {
            if self.iteration_count == WARMUP_ITERATIONS {
                self.iteration_count = 0;
                self.runtime_sum = 0.0;
                self.observe = false;
                self.warmup = false;
            }
            return;
        }

        if self.observe && self.iteration_count == OBSERVE_INTERVAL {
            let mean = self.runtime_sum / self.iteration_count as f64;
            if self.prev_mean - mean <= 0.0 {
                // The swap did not pay off: revert it and make this pair
                // less likely to be tried again.
                self.permutation.swap(self.swap_idx, self.swap_idx + 1);
                if self.swap_likeliness[self.swap_idx] > 1 {
                    self.swap_likeliness[self.swap_idx] /= 2;
                }
            } else {
                trace!(swap_idx = self.swap_idx, "adaptive filter keeps swap");
                self.swap_likeliness[self.swap_idx] = INITIAL_SWAP_LIKELINESS;
            }
            self.observe = false;
            self.iteration_count = 0;
            self.runtime_sum = 0.0;
        } else if !self.observe && self.iteration_count == EXECUTE_INTERVAL {
            self.prev_mean = self.runtime_sum / self.iteration_count as f64;

            let random_number = self.rng.gen_range(0..self.right_random_border);
            self.swap_idx = (random_number / INITIAL_SWAP_LIKELINESS) as usize;
            let likeliness = random_number % INITIAL_SWAP_LIKELINESS;
            if self.swap_likeliness[self.swap_idx] > likeliness {
                self.permutation.swap(self.swap_idx, self.swap_idx + 1);
                self.observe = true;
            }
            self.iteration_count = 0;
            self.runtime_sum = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permutation_always_covers_all_filters() {
        let mut filter = AdaptiveFilter::new(4);
        // Feed latencies biased so swaps keep happening.
        for i in 0..2000 {
            filter.adapt_runtime_statistics(if i % 3 == 0 { 0.001 } else { 0.01 });
            let mut seen = filter.permutation.clone();
            seen.sort_unstable();
            assert_eq!(seen, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn single_filter_never_times() {
        let filter = AdaptiveFilter::new(1);
        assert!(filter.begin().is_none());
    }
}
