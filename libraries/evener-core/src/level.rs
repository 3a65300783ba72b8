//! Weighted-average level model
//!
//! The model has two policies:
//! - a weight formula `w(ratio)` where `ratio = |sample| / mean(|sample|)`,
//!   used to compute `Σ(|s|·w) / Σw`
//! - an adjustment formula `f(sample, target, current)` that maps a sample
//!   of a file with weighted average `current` to one whose file reaches
//!   `target`
//!
//! The defaults are a uniform weight of 1 (a plain mean of magnitudes) and
//! linear scaling by `target / current`.

use crate::error::{LevelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Weight of a sample given its magnitude relative to the mean magnitude
pub type WeightFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Adjusted sample given `(sample, target_average, current_average)`
pub type AdjustFn = Arc<dyn Fn(f64, f64, f64) -> f64 + Send + Sync>;

/// Default weight: every sample counts once
pub fn uniform_weight(_ratio: f64) -> f64 {
    1.0
}

/// Default adjustment: scale linearly by `target / current`
pub fn linear_adjustment(sample: f64, target_average: f64, current_average: f64) -> f64 {
    sample * target_average / current_average
}

/// Level measurements of one file, fixed when the file is opened
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelMetrics {
    /// Weighted average magnitude, in (0, 1]
    pub weighted_average: f64,
    /// Largest sample magnitude
    pub peak: f64,
    /// Number of samples measured (all channels)
    pub sample_count: usize,
}

impl LevelMetrics {
    /// Largest factor on the file's own average that stays below full scale
    /// under linear adjustment
    pub fn max_linear_factor(&self) -> f64 {
        if self.peak > 0.0 {
            1.0 / self.peak
        } else {
            f64::INFINITY
        }
    }
}

/// Weight and adjustment policies for measuring and leveling samples
#[derive(Clone)]
pub struct LevelModel {
    weight: WeightFn,
    adjustment: AdjustFn,
}

impl Default for LevelModel {
    fn default() -> Self {
        Self {
            weight: Arc::new(uniform_weight),
            adjustment: Arc::new(linear_adjustment),
        }
    }
}

impl fmt::Debug for LevelModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelModel").finish_non_exhaustive()
    }
}

impl LevelModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the weight formula
    pub fn with_weight<F>(mut self, weight: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        self.weight = Arc::new(weight);
        self
    }

    /// Replace the adjustment formula
    pub fn with_adjustment<F>(mut self, adjustment: F) -> Self
    where
        F: Fn(f64, f64, f64) -> f64 + Send + Sync + 'static,
    {
        self.adjustment = Arc::new(adjustment);
        self
    }

    pub fn weight(&self, ratio: f64) -> f64 {
        (self.weight)(ratio)
    }

    pub fn adjust(&self, sample: f64, target_average: f64, current_average: f64) -> f64 {
        (self.adjustment)(sample, target_average, current_average)
    }

    /// Whether the loudest sample stays at or below full scale at `target_average`
    pub fn would_fit(&self, peak: f64, target_average: f64, current_average: f64) -> bool {
        self.adjust(peak, target_average, current_average) <= 1.0
    }

    /// Adjust every sample in place
    pub fn adjust_all(&self, samples: &mut [f64], target_average: f64, current_average: f64) {
        for sample in samples.iter_mut() {
            *sample = self.adjust(*sample, target_average, current_average);
        }
    }

    /// Measure weighted average and peak over all samples
    ///
    /// # Errors
    /// - [`LevelError::NoSamples`] for an empty buffer
    /// - [`LevelError::SilentAudio`] if every sample is zero
    /// - [`LevelError::InvalidWeights`] if a weight is negative or non-finite,
    ///   or all weights are zero
    pub fn metrics(&self, samples: &[f64]) -> Result<LevelMetrics> {
        if samples.is_empty() {
            return Err(LevelError::NoSamples);
        }

        let (sum_abs, peak) = samples.iter().fold((0.0_f64, 0.0_f64), |(sum, peak), s| {
            let magnitude = s.abs();
            (sum + magnitude, peak.max(magnitude))
        });
        let mean_abs = sum_abs / samples.len() as f64;
        if mean_abs <= 0.0 || !mean_abs.is_finite() {
            return Err(LevelError::SilentAudio);
        }

        let mut dividend = 0.0;
        let mut divisor = 0.0;
        for sample in samples {
            let magnitude = sample.abs();
            let weight = self.weight(magnitude / mean_abs);
            if !weight.is_finite() || weight < 0.0 {
                return Err(LevelError::InvalidWeights);
            }
            dividend += magnitude * weight;
            divisor += weight;
        }
        if divisor <= 0.0 {
            return Err(LevelError::InvalidWeights);
        }

        let weighted_average = dividend / divisor;
        if weighted_average <= 0.0 || !weighted_average.is_finite() {
            return Err(LevelError::SilentAudio);
        }

        Ok(LevelMetrics {
            weighted_average,
            peak,
            sample_count: samples.len(),
        })
    }
}
