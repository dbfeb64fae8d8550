//! Token sampling pipeline.
//!
//! Raw score vectors become a probability distribution and finally a token
//! id through four stages, composed in order:
//!
//! ```text
//! Scores [vocab_size]
//!     │
//!     ▼ stable_softmax (temperature + log-sum-exp stabilization)
//! Probabilities
//!     │
//!     ▼ top_k_filter OR nucleus_top_p_filter
//! Filtered probabilities
//!     │
//!     ▼ sample_from_probs (single uniform draw)
//! Selected token index
//! ```
//!
//! The transforms are pure and deterministic; the only randomness is the one
//! uniform value consumed by the final draw, injected via the caller's RNG.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{SamplingMode, SamplingParams};
use crate::error::{Error, Result};

/// Numerically stable softmax with temperature scaling.
///
/// Scores are divided by `temperature`, shifted by their maximum before
/// exponentiating, and normalized. A zero or non-finite exponential sum
/// (possible with pathological inputs) falls back to a uniform distribution
/// instead of propagating NaN/Inf.
///
/// # Errors
///
/// Returns [`Error::InvalidSamplingParameter`] when `temperature <= 0`.
pub fn stable_softmax(scores: &[f32], temperature: f32) -> Result<Vec<f32>> {
    if temperature <= 0.0 || !temperature.is_finite() {
        return Err(Error::InvalidSamplingParameter(format!(
            "temperature must be positive, got {temperature}"
        )));
    }
    if scores.is_empty() {
        return Ok(Vec::new());
    }

    let scaled: Vec<f32> = scores.iter().map(|&score| score / temperature).collect();
    let max = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let mut exps: Vec<f32> = scaled.iter().map(|&value| (value - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    if sum == 0.0 || !sum.is_finite() {
        let uniform = 1.0 / scores.len() as f32;
        return Ok(vec![uniform; scores.len()]);
    }

    for exp in &mut exps {
        *exp /= sum;
    }
    Ok(exps)
}

/// Keep only the `k` most probable entries, renormalized to sum to 1.
///
/// A `k` of zero, or one exceeding the distribution length, means "no
/// filtering" and returns the input unchanged. Ties rank by original index
/// ascending. If the survivors sum to exactly zero the zero vector is
/// returned as-is.
pub fn top_k_filter(probs: &[f32], k: usize) -> Vec<f32> {
    if k == 0 || k > probs.len() {
        return probs.to_vec();
    }

    let ranked = rank_descending(probs);
    let mut filtered = vec![0.0; probs.len()];
    for &(index, prob) in ranked.iter().take(k) {
        filtered[index] = prob;
    }
    renormalize(&mut filtered);
    filtered
}

/// Nucleus filtering: keep the probability-ranked prefix whose cumulative
/// mass reaches `p`, renormalized to sum to 1.
///
/// Every entry visited up to and including the one that crosses the
/// threshold survives. An out-of-range `p` returns the input unchanged.
pub fn nucleus_top_p_filter(probs: &[f32], p: f32) -> Vec<f32> {
    if p <= 0.0 || p > 1.0 {
        return probs.to_vec();
    }

    let ranked = rank_descending(probs);
    let mut filtered = vec![0.0; probs.len()];
    let mut cumulative = 0.0f32;
    for &(index, prob) in &ranked {
        cumulative += prob;
        filtered[index] = prob;
        if cumulative >= p {
            break;
        }
    }
    renormalize(&mut filtered);
    filtered
}

/// Draw one index from a probability distribution.
///
/// Walks the entries in original order accumulating mass until the running
/// sum reaches the drawn value. Rounding error that leaves the total just
/// under 1 resolves to the last index; the draw never fails.
pub fn sample_from_probs<R: Rng + ?Sized>(probs: &[f32], rng: &mut R) -> usize {
    let draw: f32 = rng.gen();
    let mut cumulative = 0.0f32;
    for (index, &prob) in probs.iter().enumerate() {
        cumulative += prob;
        if draw <= cumulative {
            return index;
        }
    }
    probs.len().saturating_sub(1)
}

/// Apply the configured filtering stage to a score vector.
///
/// This is the distribution the cache stores: already softmaxed and
/// filtered, ready for a direct draw on a cache hit.
pub fn filter_scores(scores: &[f32], params: &SamplingParams) -> Result<Vec<f32>> {
    let probs = stable_softmax(scores, params.temperature)?;
    Ok(match params.mode {
        SamplingMode::TopK => top_k_filter(&probs, params.top_k),
        SamplingMode::TopP => nucleus_top_p_filter(&probs, params.top_p),
    })
}

/// Token sampler owning the random source for the final draw.
#[derive(Debug)]
pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    /// Create a sampler seeded from system entropy.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a sampler with a specific seed for reproducibility.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Run the full pipeline over raw scores and draw a token index.
    pub fn sample_scores(&mut self, scores: &[f32], params: &SamplingParams) -> Result<usize> {
        let filtered = filter_scores(scores, params)?;
        Ok(self.sample_probs(&filtered))
    }

    /// Draw a token index from an already-filtered distribution.
    pub fn sample_probs(&mut self, probs: &[f32]) -> usize {
        sample_from_probs(probs, &mut self.rng)
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Indices paired with probabilities, sorted by probability descending with
/// ties broken by original index ascending.
fn rank_descending(probs: &[f32]) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    ranked
}

fn renormalize(probs: &mut [f32]) {
    let sum: f32 = probs.iter().sum();
    if sum > 0.0 {
        for prob in probs {
            *prob /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = stable_softmax(&[1.0, 2.0, 3.0, 4.0, 5.0], 1.0).unwrap();
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
        // Higher score, higher probability.
        assert!(probs[4] > probs[0]);
    }

    #[test]
    fn test_softmax_rejects_bad_temperature() {
        assert!(matches!(
            stable_softmax(&[1.0], 0.0),
            Err(Error::InvalidSamplingParameter(_))
        ));
        assert!(matches!(
            stable_softmax(&[1.0], -1.0),
            Err(Error::InvalidSamplingParameter(_))
        ));
    }

    #[test]
    fn test_softmax_uniform_fallback() {
        let probs = stable_softmax(&[f32::NEG_INFINITY, f32::NEG_INFINITY], 1.0).unwrap();
        assert_eq!(probs, vec![0.5, 0.5]);
    }

    #[test]
    fn test_softmax_extreme_scores_stay_finite() {
        let probs = stable_softmax(&[1000.0, 999.0, -1000.0], 1.0).unwrap();
        assert!(probs.iter().all(|p| p.is_finite()));
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_top_k_keeps_exactly_k() {
        let probs = stable_softmax(&[1.0, 2.0, 3.0, 4.0, 5.0], 1.0).unwrap();
        let filtered = top_k_filter(&probs, 3);
        let survivors: Vec<usize> = filtered
            .iter()
            .enumerate()
            .filter(|(_, &p)| p > 0.0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(survivors, vec![2, 3, 4]);
        let sum: f32 = filtered.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_top_k_out_of_range_is_noop() {
        let probs = vec![0.25, 0.25, 0.5];
        assert_eq!(top_k_filter(&probs, 0), probs);
        assert_eq!(top_k_filter(&probs, 10), probs);
    }

    #[test]
    fn test_top_p_keeps_minimal_prefix() {
        let probs = vec![0.1, 0.2, 0.3, 0.15, 0.25];
        // Descending: 0.3 (2), 0.25 (4), 0.2 (1). 0.3 + 0.25 >= 0.5.
        let filtered = nucleus_top_p_filter(&probs, 0.5);
        assert!(filtered[2] > 0.0);
        assert!(filtered[4] > 0.0);
        assert_eq!(filtered[0], 0.0);
        assert_eq!(filtered[1], 0.0);
        assert_eq!(filtered[3], 0.0);
        let sum: f32 = filtered.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_top_p_out_of_range_is_noop() {
        let probs = vec![0.5, 0.5];
        assert_eq!(nucleus_top_p_filter(&probs, 0.0), probs);
        assert_eq!(nucleus_top_p_filter(&probs, 1.5), probs);
    }

    #[test]
    fn test_top_p_one_keeps_everything() {
        let probs = vec![0.5, 0.3, 0.2];
        let filtered = nucleus_top_p_filter(&probs, 1.0);
        assert!(filtered.iter().all(|&p| p > 0.0));
    }

    #[test]
    fn test_sample_index_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let probs = vec![0.1, 0.2, 0.3, 0.15, 0.25];
        for _ in 0..200 {
            let index = sample_from_probs(&probs, &mut rng);
            assert!(index < probs.len());
        }
    }

    #[test]
    fn test_sample_degenerate_distribution_picks_the_one() {
        let mut rng = StdRng::seed_from_u64(7);
        let probs = vec![0.0, 0.0, 1.0, 0.0];
        for _ in 0..50 {
            assert_eq!(sample_from_probs(&probs, &mut rng), 2);
        }
    }

    #[test]
    fn test_sample_underflow_falls_back_to_last() {
        // Sum well under any possible draw above it; the walk runs off the
        // end and resolves to the final index.
        let mut rng = StdRng::seed_from_u64(3);
        let probs = vec![0.0, 0.0, 0.0];
        assert_eq!(sample_from_probs(&probs, &mut rng), 2);
    }

    #[test]
    fn test_sampler_reproducible_with_seed() {
        let params = SamplingParams::default();
        let scores = vec![1.0, 1.0, 1.0, 1.0, 1.0];
        let mut first = Sampler::with_seed(42);
        let mut second = Sampler::with_seed(42);
        for _ in 0..10 {
            assert_eq!(
                first.sample_scores(&scores, &params).unwrap(),
                second.sample_scores(&scores, &params).unwrap()
            );
        }
    }

    #[test]
    fn test_filter_scores_dispatches_on_mode() {
        let scores = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let top_k = SamplingParams {
            top_k: 2,
            ..SamplingParams::default()
        };
        let filtered = filter_scores(&scores, &top_k).unwrap();
        assert_eq!(filtered.iter().filter(|&&p| p > 0.0).count(), 2);

        let top_p = SamplingParams {
            mode: SamplingMode::TopP,
            top_p: 1.0,
            ..SamplingParams::default()
        };
        let filtered = filter_scores(&scores, &top_p).unwrap();
        assert_eq!(filtered.iter().filter(|&&p| p > 0.0).count(), 5);
    }
}
