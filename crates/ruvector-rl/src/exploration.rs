//! Action-selection policies for the data-collection loop.
//!
//! Three strategies share one entry point, [`ExplorationPolicy::select_action`]:
//!
//! - **Epsilon-greedy**: epsilon decays linearly from `initial_epsilon` to
//!   `final_epsilon` over `decay_steps` calls; with probability epsilon a
//!   uniformly random action is taken, otherwise the argmax.
//! - **Temperature softmax**: temperature decays exponentially to a floor;
//!   the action is drawn from `softmax(values / T)` by inverse CDF.
//! - **Entropy guided**: explores when the softmax entropy or the largest
//!   supplied uncertainty crosses a threshold, otherwise acts greedily.

use crate::error::{Result, RlError};
use crate::schedule::DecaySchedule;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::trace;

/// Strategy and its hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExplorationStrategy {
    /// Linearly decaying epsilon-greedy
    EpsilonGreedy {
        /// Epsilon at step 0
        initial_epsilon: f64,
        /// Epsilon from `decay_steps` onwards
        final_epsilon: f64,
        /// Number of calls over which epsilon decays
        decay_steps: u64,
    },
    /// Boltzmann sampling with exponentially decaying temperature
    TemperatureSoftmax {
        /// Temperature at step 0
        initial_temperature: f64,
        /// Temperature floor
        final_temperature: f64,
        /// Per-call multiplier in (0, 1]
        decay_rate: f64,
    },
    /// Explore when the value distribution or the model is uncertain
    EntropyGuided {
        /// Softmax entropy (nats) above which the policy explores
        entropy_threshold: f64,
        /// Per-action uncertainty above which the policy explores
        uncertainty_threshold: f64,
    },
}

impl ExplorationStrategy {
    /// Default epsilon-greedy parameters
    pub fn epsilon_greedy() -> Self {
        ExplorationStrategy::EpsilonGreedy {
            initial_epsilon: 1.0,
            final_epsilon: 0.01,
            decay_steps: 10_000,
        }
    }

    /// Default softmax parameters
    pub fn temperature_softmax() -> Self {
        ExplorationStrategy::TemperatureSoftmax {
            initial_temperature: 1.0,
            final_temperature: 0.1,
            decay_rate: 0.995,
        }
    }

    /// Default entropy-guided parameters
    pub fn entropy_guided() -> Self {
        ExplorationStrategy::EntropyGuided {
            entropy_threshold: 1.0,
            uncertainty_threshold: 0.5,
        }
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ExplorationStrategy::EpsilonGreedy { .. } => "epsilon_greedy",
            ExplorationStrategy::TemperatureSoftmax { .. } => "temperature_softmax",
            ExplorationStrategy::EntropyGuided { .. } => "entropy_guided",
        }
    }

    /// Check hyperparameters
    pub fn validate(&self) -> Result<()> {
        match *self {
            ExplorationStrategy::EpsilonGreedy {
                initial_epsilon,
                final_epsilon,
                decay_steps,
            } => {
                if !(0.0..=1.0).contains(&initial_epsilon) || !(0.0..=1.0).contains(&final_epsilon)
                {
                    return Err(RlError::invalid_config(
                        "epsilon",
                        format!("must lie in [0, 1], got {initial_epsilon} -> {final_epsilon}"),
                    ));
                }
                if final_epsilon > initial_epsilon {
                    return Err(RlError::invalid_config(
                        "final_epsilon",
                        "must not exceed initial_epsilon",
                    ));
                }
                if decay_steps == 0 {
                    return Err(RlError::invalid_config("decay_steps", "must be positive"));
                }
            }
            ExplorationStrategy::TemperatureSoftmax {
                initial_temperature,
                final_temperature,
                decay_rate,
            } => {
                if !(final_temperature.is_finite() && final_temperature > 0.0) {
                    return Err(RlError::invalid_config(
                        "final_temperature",
                        format!("must be finite and positive, got {final_temperature}"),
                    ));
                }
                if !(initial_temperature.is_finite() && initial_temperature >= final_temperature)
                {
                    return Err(RlError::invalid_config(
                        "initial_temperature",
                        "must be finite and at least final_temperature",
                    ));
                }
                if !(decay_rate > 0.0 && decay_rate <= 1.0) {
                    return Err(RlError::invalid_config(
                        "decay_rate",
                        format!("must be in (0, 1], got {decay_rate}"),
                    ));
                }
            }
            ExplorationStrategy::EntropyGuided {
                entropy_threshold,
                uncertainty_threshold,
            } => {
                for (name, v) in [
                    ("entropy_threshold", entropy_threshold),
                    ("uncertainty_threshold", uncertainty_threshold),
                ] {
                    if !(v.is_finite() && v >= 0.0) {
                        return Err(RlError::invalid_config(
                            name,
                            format!("must be finite and non-negative, got {v}"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Epsilon as a function of step (0 for non-epsilon strategies)
    fn epsilon_at(&self, step: u64) -> f64 {
        match *self {
            ExplorationStrategy::EpsilonGreedy {
                initial_epsilon,
                final_epsilon,
                decay_steps,
            } => DecaySchedule::Linear {
                start: initial_epsilon,
                end: final_epsilon,
                steps: decay_steps,
            }
            .value_at(step)
            .clamp(final_epsilon, initial_epsilon),
            _ => 0.0,
        }
    }

    /// Temperature as a function of step (1 for non-softmax strategies)
    fn temperature_at(&self, step: u64) -> f64 {
        match *self {
            ExplorationStrategy::TemperatureSoftmax {
                initial_temperature,
                final_temperature,
                decay_rate,
            } => DecaySchedule::Exponential {
                start: initial_temperature,
                end: final_temperature,
                rate: decay_rate,
            }
            .value_at(step),
            _ => 1.0,
        }
    }
}

impl FromStr for ExplorationStrategy {
    type Err = RlError;

    /// Parse a strategy name into its default parameters
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "epsilon_greedy" | "epsilon" | "egreedy" => Ok(Self::epsilon_greedy()),
            "temperature_softmax" | "softmax" | "boltzmann" => Ok(Self::temperature_softmax()),
            "entropy_guided" | "entropy" => Ok(Self::entropy_guided()),
            other => Err(RlError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Exploration policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationConfig {
    /// Strategy and hyperparameters
    pub strategy: ExplorationStrategy,
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            strategy: ExplorationStrategy::epsilon_greedy(),
            seed: None,
        }
    }
}

/// Counters and decayed hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationState {
    /// Number of `select_action` calls
    pub current_step: u64,
    /// Epsilon used by the next call
    pub current_epsilon: f64,
    /// Temperature used by the next call
    pub current_temperature: f64,
    /// Calls that explored
    pub exploration_count: u64,
    /// Calls that exploited
    pub exploitation_count: u64,
    /// All calls
    pub total_actions: u64,
}

impl ExplorationState {
    fn initial(strategy: &ExplorationStrategy) -> Self {
        Self {
            current_step: 0,
            current_epsilon: strategy.epsilon_at(0),
            current_temperature: strategy.temperature_at(0),
            exploration_count: 0,
            exploitation_count: 0,
            total_actions: 0,
        }
    }

    /// Fraction of calls that explored
    pub fn exploration_rate(&self) -> f64 {
        if self.total_actions == 0 {
            0.0
        } else {
            self.exploration_count as f64 / self.total_actions as f64
        }
    }
}

/// Outcome of one action selection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionSelection {
    /// Chosen action index, always `< values.len()`
    pub action: usize,
    /// Whether the choice deviated from pure exploitation
    pub is_exploration: bool,
    /// Epsilon in effect for this call
    pub epsilon: f64,
    /// Temperature in effect for this call
    pub temperature: f64,
}

/// Stateful exploration policy
#[derive(Debug, Clone)]
pub struct ExplorationPolicy {
    config: ExplorationConfig,
    state: ExplorationState,
    rng: StdRng,
}

impl ExplorationPolicy {
    /// Create a policy after validating the strategy
    pub fn new(config: ExplorationConfig) -> Result<Self> {
        config.strategy.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let state = ExplorationState::initial(&config.strategy);
        Ok(Self { config, state, rng })
    }

    /// Policy for a named strategy with default parameters
    pub fn from_name(name: &str, seed: Option<u64>) -> Result<Self> {
        Self::new(ExplorationConfig {
            strategy: name.parse()?,
            seed,
        })
    }

    /// Current counters
    pub fn state(&self) -> &ExplorationState {
        &self.state
    }

    /// Active configuration
    pub fn config(&self) -> &ExplorationConfig {
        &self.config
    }

    /// Restore the step-0 state; the RNG stream continues
    pub fn reset(&mut self) {
        self.state = ExplorationState::initial(&self.config.strategy);
    }

    /// Choose an action from `values`.
    ///
    /// `uncertainties`, when given, must have one entry per action; only the
    /// entropy-guided strategy reads it.
    ///
    /// # Errors
    /// Returns `RlError::InvalidConfig` for empty or non-finite values and
    /// `RlError::DimensionMismatch` for a mismatched uncertainty vector.
    pub fn select_action(
        &mut self,
        values: &[f64],
        uncertainties: Option<&[f64]>,
    ) -> Result<ActionSelection> {
        validate_values(values, uncertainties)?;

        let epsilon = self.state.current_epsilon;
        let temperature = self.state.current_temperature;
        let greedy = argmax(values);

        let (action, is_exploration) = match self.config.strategy {
            ExplorationStrategy::EpsilonGreedy { .. } => {
                if self.rng.gen::<f64>() < epsilon {
                    (self.rng.gen_range(0..values.len()), true)
                } else {
                    (greedy, false)
                }
            }
            ExplorationStrategy::TemperatureSoftmax { .. } => {
                let probs = softmax(values, temperature);
                let sampled = sample_categorical(&probs, self.rng.gen::<f64>());
                (sampled, sampled != greedy)
            }
            ExplorationStrategy::EntropyGuided {
                entropy_threshold,
                uncertainty_threshold,
            } => {
                let h = entropy(&softmax(values, 1.0));
                let max_uncertainty = uncertainties
                    .map(|u| u.iter().copied().fold(f64::NEG_INFINITY, f64::max))
                    .unwrap_or(f64::NEG_INFINITY);
                if h > entropy_threshold || max_uncertainty > uncertainty_threshold {
                    let action = match uncertainties {
                        Some(u) => argmax(u),
                        None => self.rng.gen_range(0..values.len()),
                    };
                    (action, true)
                } else {
                    (greedy, false)
                }
            }
        };

        self.advance(is_exploration);
        trace!(
            strategy = self.config.strategy.name(),
            action,
            is_exploration,
            epsilon,
            temperature,
            "selected action"
        );

        Ok(ActionSelection {
            action,
            is_exploration,
            epsilon,
            temperature,
        })
    }

    fn advance(&mut self, explored: bool) {
        let state = &mut self.state;
        state.total_actions += 1;
        if explored {
            state.exploration_count += 1;
        } else {
            state.exploitation_count += 1;
        }
        state.current_step += 1;
        state.current_epsilon = self.config.strategy.epsilon_at(state.current_step);
        state.current_temperature = self.config.strategy.temperature_at(state.current_step);
    }
}

fn validate_values(values: &[f64], uncertainties: Option<&[f64]>) -> Result<()> {
    if values.is_empty() {
        return Err(RlError::invalid_config("values", "action-value vector is empty"));
    }
    if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
        return Err(RlError::invalid_config(
            "values",
            format!("non-finite action value at index {idx}"),
        ));
    }
    if let Some(u) = uncertainties {
        if u.len() != values.len() {
            return Err(RlError::dimension_mismatch(
                format!("{} uncertainties", values.len()),
                format!("{}", u.len()),
            ));
        }
        if let Some(idx) = u.iter().position(|v| !v.is_finite()) {
            return Err(RlError::invalid_config(
                "uncertainties",
                format!("non-finite uncertainty at index {idx}"),
            ));
        }
    }
    Ok(())
}

/// Index of the largest value; ties resolve to the lowest index
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (idx, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = idx;
        }
    }
    best
}

/// `softmax(values / temperature)`, shifted by the max for stability
pub fn softmax(values: &[f64], temperature: f64) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values
        .iter()
        .map(|&v| ((v - max) / temperature).exp())
        .collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Shannon entropy in nats
pub fn entropy(probs: &[f64]) -> f64 {
    -probs
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| p * p.ln())
        .sum::<f64>()
}

/// Inverse-CDF draw from a categorical distribution given `u` in [0, 1)
fn sample_categorical(probs: &[f64], u: f64) -> usize {
    let mut cumulative = 0.0;
    for (idx, &p) in probs.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return idx;
        }
    }
    // Rounding left the total just under u; take the last action with mass
    probs.iter().rposition(|&p| p > 0.0).unwrap_or(0)
}
