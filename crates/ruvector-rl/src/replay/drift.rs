//! Running feature statistics for distribution-shift detection.

use serde::{Deserialize, Serialize};

/// Per-feature running mean and variance of state vectors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureDriftStats {
    /// Running mean per feature
    pub mean: Vec<f64>,
    /// Sum of squared deviations per feature (Welford's M2)
    pub m2: Vec<f64>,
    /// Number of samples folded in
    pub count: usize,
}

impl FeatureDriftStats {
    /// Empty statistics for `dimension` features
    pub fn new(dimension: usize) -> Self {
        Self {
            mean: vec![0.0; dimension],
            m2: vec![0.0; dimension],
            count: 0,
        }
    }

    /// Fold in one sample using Welford's online algorithm.
    ///
    /// The dimension is fixed by the first sample; later samples of a
    /// different length are ignored and `false` is returned.
    pub fn update(&mut self, sample: &[f64]) -> bool {
        if self.count == 0 && self.mean.len() != sample.len() {
            self.mean = vec![0.0; sample.len()];
            self.m2 = vec![0.0; sample.len()];
        }
        if self.mean.len() != sample.len() {
            return false;
        }

        self.count += 1;
        let n = self.count as f64;
        for ((mean, m2), &x) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(sample) {
            let delta = x - *mean;
            *mean += delta / n;
            *m2 += delta * (x - *mean);
        }
        true
    }

    /// Sample standard deviation per feature (zeros below two samples)
    pub fn std_dev(&self) -> Vec<f64> {
        if self.count <= 1 {
            return vec![0.0; self.m2.len()];
        }
        let denom = (self.count - 1) as f64;
        self.m2.iter().map(|&v| (v / denom).sqrt()).collect()
    }

    /// Mean absolute z-score of `recent`'s mean against these statistics.
    ///
    /// Features with (near) zero spread are skipped; 0.0 if none remain.
    pub fn shift_score(&self, recent: &FeatureDriftStats) -> f64 {
        if self.mean.is_empty() || recent.mean.len() != self.mean.len() {
            return 0.0;
        }
        let std = self.std_dev();
        let (sum, n) = self
            .mean
            .iter()
            .zip(&recent.mean)
            .zip(&std)
            .filter(|(_, s)| **s > 1e-8)
            .fold((0.0, 0usize), |(sum, n), ((&overall, &rec), &s)| {
                (sum + (rec - overall).abs() / s, n + 1)
            });
        if n == 0 {
            0.0
        } else {
            sum / n as f64
        }
    }

    /// Forget all samples, keeping the dimension
    pub fn reset(&mut self) {
        let dim = self.mean.len();
        *self = Self::new(dim);
    }
}
