//! Prioritized experience replay over a sum-tree.
//!
//! New experiences enter at the current maximum priority so each one is
//! likely to be replayed at least once before its TD error is known. Sampling
//! is stratified: `[0, total)` is split into `batch_size` equal segments and
//! one uniform draw is made per segment, which keeps a batch spread across
//! the priority mass. Importance-sampling weights correct the resulting bias
//! and are normalised so the largest weight in a batch is exactly 1.0.

use super::drift::FeatureDriftStats;
use super::experience::Experience;
use super::sum_tree::SumTree;
use crate::error::{Result, RlError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Thresholds and multipliers for tagging critical market events.
///
/// Boosts compound: an experience meeting every condition has its initial
/// priority multiplied by all three factors. Each boost is at least 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalEventConfig {
    /// Volatility above which the volatility boost applies
    pub volatility_threshold: f64,
    /// Multiplier for high volatility
    pub volatility_boost: f64,
    /// Volume above which the volume boost applies
    pub volume_threshold: f64,
    /// Multiplier for high volume
    pub volume_boost: f64,
    /// Absolute reward above which the reward boost applies
    pub reward_threshold: f64,
    /// Multiplier for large rewards
    pub reward_boost: f64,
}

impl Default for CriticalEventConfig {
    fn default() -> Self {
        Self {
            volatility_threshold: 0.05,
            volatility_boost: 2.0,
            volume_threshold: 1_000_000.0,
            volume_boost: 1.5,
            reward_threshold: 0.03,
            reward_boost: 1.8,
        }
    }
}

impl CriticalEventConfig {
    /// Compounded boost for `exp` and whether any condition fired
    pub fn boost(&self, exp: &Experience) -> (f64, bool) {
        let mut factor = 1.0;
        let mut critical = false;
        if exp.metadata.volatility > self.volatility_threshold {
            factor *= self.volatility_boost;
            critical = true;
        }
        if exp.metadata.volume > self.volume_threshold {
            factor *= self.volume_boost;
            critical = true;
        }
        if exp.reward.abs() > self.reward_threshold {
            factor *= self.reward_boost;
            critical = true;
        }
        (factor, critical)
    }

    fn validate(&self) -> Result<()> {
        let boosts = [
            ("critical.volatility_boost", self.volatility_boost),
            ("critical.volume_boost", self.volume_boost),
            ("critical.reward_boost", self.reward_boost),
        ];
        for (field, value) in boosts {
            if !(value.is_finite() && value >= 1.0) {
                return Err(RlError::invalid_config(
                    field,
                    format!("must be finite and >= 1, got {value}"),
                ));
            }
        }
        let thresholds = [
            ("critical.volatility_threshold", self.volatility_threshold),
            ("critical.volume_threshold", self.volume_threshold),
            ("critical.reward_threshold", self.reward_threshold),
        ];
        for (field, value) in thresholds {
            if value.is_nan() {
                return Err(RlError::invalid_config(field, "must not be NaN"));
            }
        }
        Ok(())
    }
}

/// Replay buffer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Maximum number of stored experiences
    pub capacity: usize,
    /// Prioritization exponent (0 = uniform)
    pub alpha: f64,
    /// Initial importance-sampling exponent
    pub beta: f64,
    /// Added to beta after every sample call
    pub beta_increment: f64,
    /// Added to |TD error| so no priority reaches zero
    pub epsilon: f64,
    /// Priority given to the first experiences
    pub max_priority: f64,
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
    /// Critical-event tagging
    pub critical: CriticalEventConfig,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            alpha: 0.6,
            beta: 0.4,
            beta_increment: 0.001,
            epsilon: 1e-6,
            max_priority: 1.0,
            seed: None,
            critical: CriticalEventConfig::default(),
        }
    }
}

impl BufferConfig {
    /// Default config with the given capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Check every field against its valid range
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(RlError::invalid_config("capacity", "must be positive"));
        }
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(RlError::invalid_config(
                "alpha",
                format!("must be finite and >= 0, got {}", self.alpha),
            ));
        }
        if !(0.0..=1.0).contains(&self.beta) {
            return Err(RlError::invalid_config(
                "beta",
                format!("must be in [0, 1], got {}", self.beta),
            ));
        }
        if !(self.beta_increment.is_finite() && self.beta_increment >= 0.0) {
            return Err(RlError::invalid_config(
                "beta_increment",
                format!("must be finite and >= 0, got {}", self.beta_increment),
            ));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(RlError::invalid_config(
                "epsilon",
                format!("must be finite and positive, got {}", self.epsilon),
            ));
        }
        if !(self.max_priority.is_finite() && self.max_priority >= self.epsilon) {
            return Err(RlError::invalid_config(
                "max_priority",
                format!(
                    "must be finite and >= epsilon ({}), got {}",
                    self.epsilon, self.max_priority
                ),
            ));
        }
        self.critical.validate()
    }
}

/// One prioritized batch
#[derive(Debug, Clone, PartialEq)]
pub struct SampledBatch {
    /// Copies of the sampled experiences
    pub experiences: Vec<Experience>,
    /// Buffer slots, for `update_priorities`
    pub indices: Vec<usize>,
    /// Normalised importance-sampling weights (max is 1.0)
    pub weights: Vec<f64>,
    /// Beta used for this batch
    pub beta: f64,
}

impl SampledBatch {
    /// Batch size
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True if the batch holds no experiences
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Snapshot of buffer occupancy and priorities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferStats {
    /// Stored experiences
    pub len: usize,
    /// Sum of stored priorities
    pub total_priority: f64,
    /// Priority assigned to the next non-critical insert
    pub max_priority: f64,
    /// Smallest stored priority (0 when empty)
    pub min_priority: f64,
    /// Stored experiences tagged critical
    pub critical_count: usize,
    /// Experiences ever added, including overwritten ones
    pub total_added: u64,
}

/// Fixed-capacity prioritized replay buffer
#[derive(Debug, Clone)]
pub struct PrioritizedReplayBuffer {
    config: BufferConfig,
    tree: SumTree,
    experiences: Vec<Experience>,
    cursor: usize,
    max_priority: f64,
    beta: f64,
    feature_dim: Option<usize>,
    total_added: u64,
    drift: FeatureDriftStats,
    rng: StdRng,
}

impl PrioritizedReplayBuffer {
    /// Create an empty buffer after validating the config
    pub fn new(config: BufferConfig) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            tree: SumTree::new(config.capacity),
            experiences: Vec::with_capacity(config.capacity),
            cursor: 0,
            max_priority: config.max_priority,
            beta: config.beta,
            feature_dim: None,
            total_added: 0,
            drift: FeatureDriftStats::default(),
            rng,
            config,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Insert `experience` at the cursor and return its slot.
    ///
    /// The experience gets the current maximum priority, multiplied by any
    /// critical-event boosts. Once full, the oldest slot is overwritten.
    ///
    /// # Errors
    /// `DimensionMismatch` if `state` and `next_state` differ in length or
    /// disagree with experiences already stored; `InvalidConfig` for a
    /// non-finite reward, feature, or metadata value, or a boosted priority
    /// that overflows.
    pub fn add(&mut self, mut experience: Experience) -> Result<usize> {
        let dim = experience.state.len();
        if experience.next_state.len() != dim {
            return Err(RlError::dimension_mismatch(
                format!("next_state length {dim}"),
                experience.next_state.len().to_string(),
            ));
        }
        if let Some(expected) = self.feature_dim {
            if dim != expected {
                return Err(RlError::dimension_mismatch(
                    format!("state length {expected}"),
                    dim.to_string(),
                ));
            }
        }
        check_finite(&experience)?;

        let (boost, critical) = self.config.critical.boost(&experience);
        let priority = (self.max_priority * boost).max(self.config.epsilon);
        if !priority.is_finite() {
            return Err(RlError::invalid_config(
                "critical",
                format!("boosted priority overflows: {} x {boost}", self.max_priority),
            ));
        }
        experience.priority = priority;
        experience.critical = critical;

        self.feature_dim = Some(dim);
        self.drift.update(&experience.state);

        let slot = self.cursor;
        if slot < self.experiences.len() {
            self.experiences[slot] = experience;
        } else {
            self.experiences.push(experience);
        }
        self.tree.update(slot, priority);
        self.cursor = (self.cursor + 1) % self.config.capacity;
        self.total_added += 1;

        trace!(slot, priority, critical, "replay add");
        Ok(slot)
    }

    /// Draw a stratified prioritized batch, then anneal beta.
    ///
    /// # Errors
    /// `InvalidConfig` for a zero batch size, `InsufficientSamples` if the
    /// buffer holds fewer than `batch_size` experiences.
    pub fn sample(&mut self, batch_size: usize) -> Result<SampledBatch> {
        if batch_size == 0 {
            return Err(RlError::invalid_config("batch_size", "must be positive"));
        }
        let n = self.len();
        if batch_size > n {
            return Err(RlError::InsufficientSamples {
                requested: batch_size,
                available: n,
            });
        }

        let total = self.tree.total();
        let segment = total / batch_size as f64;
        let beta = self.beta;

        let mut indices = Vec::with_capacity(batch_size);
        let mut weights = Vec::with_capacity(batch_size);
        for i in 0..batch_size {
            let mass = segment * i as f64 + self.rng.gen::<f64>() * segment;
            let slot = self.tree.find(mass).min(n - 1);
            let prob = self.tree.get(slot) / total;
            indices.push(slot);
            weights.push((n as f64 * prob).powf(-beta));
        }

        let max_weight = weights.iter().copied().fold(0.0, f64::max);
        if max_weight > 0.0 {
            for w in &mut weights {
                *w /= max_weight;
            }
        }

        let experiences = indices
            .iter()
            .map(|&slot| self.experiences[slot].clone())
            .collect();

        self.beta = (self.beta + self.config.beta_increment).min(1.0);
        debug!(batch_size, total, beta, next_beta = self.beta, "replay sample");

        Ok(SampledBatch {
            experiences,
            indices,
            weights,
            beta,
        })
    }

    /// Set `priority = max((|td| + epsilon)^alpha, epsilon)` for each slot.
    ///
    /// Every input, and every resulting priority, is checked before anything
    /// is written.
    pub fn update_priorities(&mut self, indices: &[usize], td_errors: &[f64]) -> Result<()> {
        if indices.len() != td_errors.len() {
            return Err(RlError::dimension_mismatch(
                format!("{} td errors", indices.len()),
                td_errors.len().to_string(),
            ));
        }
        let len = self.len();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(RlError::IndexOutOfRange { index, len });
        }
        if let Some(pos) = td_errors.iter().position(|td| !td.is_finite()) {
            return Err(RlError::invalid_config(
                format!("td_errors[{pos}]"),
                format!("must be finite, got {}", td_errors[pos]),
            ));
        }

        let BufferConfig { alpha, epsilon, .. } = self.config;
        let priorities: Vec<f64> = td_errors
            .iter()
            .map(|td| (td.abs() + epsilon).powf(alpha).max(epsilon))
            .collect();
        if let Some(pos) = priorities.iter().position(|p| !p.is_finite()) {
            return Err(RlError::invalid_config(
                format!("td_errors[{pos}]"),
                format!(
                    "priority (|{}| + {epsilon})^{alpha} is not finite",
                    td_errors[pos]
                ),
            ));
        }

        for ((&slot, &td), priority) in indices.iter().zip(td_errors).zip(priorities) {
            let exp = &mut self.experiences[slot];
            exp.td_error = td;
            exp.priority = priority;
            self.tree.update(slot, priority);
            self.max_priority = self.max_priority.max(priority);
        }
        debug_assert_eq!(self.tree.check_consistency(), None);
        Ok(())
    }

    /// Stored experiences
    pub fn len(&self) -> usize {
        self.experiences.len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.experiences.is_empty()
    }

    /// Maximum number of stored experiences
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Sum of stored priorities
    pub fn total_priority(&self) -> f64 {
        self.tree.total()
    }

    /// Beta that the next `sample` call will use
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Priority assigned to the next non-critical insert
    pub fn max_priority(&self) -> f64 {
        self.max_priority
    }

    /// Experience at `slot`, if occupied
    pub fn get(&self, slot: usize) -> Option<&Experience> {
        self.experiences.get(slot)
    }

    /// Iterate stored experiences in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Experience> {
        self.experiences.iter()
    }

    /// Underlying sum-tree
    pub fn tree(&self) -> &SumTree {
        &self.tree
    }

    /// Running statistics over every state ever added
    pub fn drift_stats(&self) -> &FeatureDriftStats {
        &self.drift
    }

    /// Snapshot of occupancy and priorities
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            len: self.len(),
            total_priority: self.tree.total(),
            max_priority: self.max_priority,
            min_priority: self.tree.min_leaf(self.len()).unwrap_or(0.0),
            critical_count: self.experiences.iter().filter(|e| e.critical).count(),
            total_added: self.total_added,
        }
    }

    /// Shift of the `recent_window` newest states against all states seen.
    ///
    /// Mean absolute z-score of the recent mean; 0.0 when the window is zero
    /// or larger than the buffer.
    pub fn detect_distribution_shift(&self, recent_window: usize) -> f64 {
        let len = self.len();
        if recent_window == 0 || len < recent_window {
            return 0.0;
        }

        let capacity = self.config.capacity;
        let mut recent = FeatureDriftStats::default();
        for back in 1..=recent_window {
            let slot = (self.cursor + capacity - back) % capacity;
            recent.update(&self.experiences[slot].state);
        }
        self.drift.shift_score(&recent)
    }

    /// Drop every experience and restore the configured max priority and beta
    pub fn clear(&mut self) {
        self.tree.clear();
        self.experiences.clear();
        self.cursor = 0;
        self.max_priority = self.config.max_priority;
        self.beta = self.config.beta;
        self.feature_dim = None;
        self.total_added = 0;
        self.drift = FeatureDriftStats::default();
    }
}

fn check_finite(exp: &Experience) -> Result<()> {
    if !exp.reward.is_finite() {
        return Err(RlError::invalid_config(
            "reward",
            format!("must be finite, got {}", exp.reward),
        ));
    }
    let features = [("state", &exp.state), ("next_state", &exp.next_state)];
    for (field, values) in features {
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(RlError::invalid_config(
                format!("{field}[{pos}]"),
                format!("must be finite, got {}", values[pos]),
            ));
        }
    }
    let meta = &exp.metadata;
    let fields = [
        ("metadata.price", meta.price),
        ("metadata.volume", meta.volume),
        ("metadata.volatility", meta.volatility),
        ("metadata.confidence", meta.confidence),
    ];
    for (field, value) in fields {
        if !value.is_finite() {
            return Err(RlError::invalid_config(
                field,
                format!("must be finite, got {value}"),
            ));
        }
    }
    Ok(())
}
