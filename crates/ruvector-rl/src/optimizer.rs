//! AdamW optimizer.
//!
//! Adam with decoupled weight decay (Loshchilov & Hutter). Per scalar:
//!
//! 1. `m = beta1 * m + (1 - beta1) * g`
//! 2. `v = beta2 * v + (1 - beta2) * g^2`
//! 3. `lr_t = lr * sqrt(1 - beta2^t) / (1 - beta1^t)`
//! 4. `denom = sqrt(amsgrad ? max(v, v_max) : v) + epsilon`
//! 5. `p = p - lr_t * m / denom - lr * weight_decay * p`
//!
//! The decay term in step 5 acts on the parameter directly and never passes
//! through the moment estimates. This is what separates AdamW from Adam with
//! an L2 penalty folded into the gradient.

use crate::error::{Result, RlError};
use crate::tensor::{ensure_same_shape, ParamSet, Shape};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// AdamW hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamWConfig {
    /// Learning rate
    pub learning_rate: f64,
    /// Decay rate of the first moment
    pub beta1: f64,
    /// Decay rate of the second moment
    pub beta2: f64,
    /// Added to the denominator for numerical stability
    pub epsilon: f64,
    /// Decoupled weight decay coefficient
    pub weight_decay: f64,
    /// Use the running maximum of the second moment (AMSGrad)
    pub amsgrad: bool,
}

impl Default for AdamWConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.01,
            amsgrad: false,
        }
    }
}

impl AdamWConfig {
    /// Check every hyperparameter is in range
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(RlError::invalid_config(
                "learning_rate",
                format!("must be finite and positive, got {}", self.learning_rate),
            ));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(RlError::invalid_config(
                    name,
                    format!("must be in [0, 1), got {beta}"),
                ));
            }
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(RlError::invalid_config(
                "epsilon",
                format!("must be finite and positive, got {}", self.epsilon),
            ));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(RlError::invalid_config(
                "weight_decay",
                format!("must be finite and non-negative, got {}", self.weight_decay),
            ));
        }
        Ok(())
    }
}

/// Moment buffers for one layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerMoments {
    /// First moment estimate
    pub momentum: Array2<f64>,
    /// Second raw moment estimate
    pub velocity: Array2<f64>,
    /// Running maximum of `velocity` (AMSGrad only)
    pub max_velocity: Option<Array2<f64>>,
}

/// Persistent optimizer state for a training session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Number of completed steps; drives bias correction
    pub step: u64,
    /// Moment buffers, one per layer
    pub layers: Vec<LayerMoments>,
}

impl OptimizerState {
    /// Zeroed state for the given layer shapes
    pub fn initialize_state(shapes: &[Shape], amsgrad: bool) -> Self {
        let layers = shapes
            .iter()
            .map(|&shape| LayerMoments {
                momentum: Array2::zeros(shape),
                velocity: Array2::zeros(shape),
                max_velocity: amsgrad.then(|| Array2::zeros(shape)),
            })
            .collect();
        Self { step: 0, layers }
    }

    /// Layer shapes this state was built for
    pub fn shapes(&self) -> Vec<Shape> {
        self.layers.iter().map(|l| l.momentum.dim()).collect()
    }
}

/// Diagnostics from one optimizer step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Step counter after this update
    pub step: u64,
    /// Bias-corrected learning rate used for the Adam term
    pub effective_lr: f64,
    /// L2 norm of the total parameter change
    pub update_norm: f64,
    /// L2 norm of the parameters after the update
    pub param_norm: f64,
}

/// AdamW optimizer
#[derive(Debug, Clone)]
pub struct AdamWOptimizer {
    config: AdamWConfig,
}

impl AdamWOptimizer {
    /// Create an optimizer after validating the config
    pub fn new(config: AdamWConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Active configuration
    pub fn config(&self) -> &AdamWConfig {
        &self.config
    }

    /// Change the learning rate, e.g. from a [`crate::schedule::Scheduler`]
    pub fn set_learning_rate(&mut self, learning_rate: f64) -> Result<()> {
        let candidate = AdamWConfig {
            learning_rate,
            ..self.config.clone()
        };
        candidate.validate()?;
        self.config = candidate;
        Ok(())
    }

    /// Fresh state matching `params`
    pub fn initialize_state(&self, params: &ParamSet) -> OptimizerState {
        OptimizerState::initialize_state(&params.shapes(), self.config.amsgrad)
    }

    /// Apply one AdamW update to `params` in place.
    ///
    /// # Errors
    /// Returns `RlError::DimensionMismatch` if params, grads and state do not
    /// share layer shapes, and `RlError::InvalidConfig` if AMSGrad is enabled
    /// but the state carries no `max_velocity`. Nothing is mutated on error.
    pub fn step(
        &self,
        params: &mut ParamSet,
        grads: &ParamSet,
        state: &mut OptimizerState,
    ) -> Result<StepInfo> {
        let shapes = params.shapes();
        ensure_same_shape(&shapes, &grads.shapes())?;
        ensure_same_shape(&shapes, &state.shapes())?;
        if self.config.amsgrad && state.layers.iter().any(|l| l.max_velocity.is_none()) {
            return Err(RlError::invalid_config(
                "amsgrad",
                "state was initialized without max_velocity",
            ));
        }

        let AdamWConfig {
            learning_rate: lr,
            beta1,
            beta2,
            epsilon,
            weight_decay,
            amsgrad,
        } = self.config;

        state.step += 1;
        let t = i32::try_from(state.step).unwrap_or(i32::MAX);
        let bias_correction1 = 1.0 - beta1.powi(t);
        let bias_correction2 = 1.0 - beta2.powi(t);
        let effective_lr = lr * bias_correction2.sqrt() / bias_correction1;
        let decay = lr * weight_decay;

        let mut update_sq = 0.0;
        for ((p, g), moments) in params
            .layers_mut()
            .iter_mut()
            .zip(grads.layers())
            .zip(state.layers.iter_mut())
        {
            let LayerMoments {
                momentum,
                velocity,
                max_velocity,
            } = moments;

            Zip::from(&mut *momentum)
                .and(g)
                .for_each(|m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
            Zip::from(&mut *velocity)
                .and(g)
                .for_each(|v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

            let second: &Array2<f64> = match max_velocity.as_mut() {
                Some(max_v) if amsgrad => {
                    Zip::from(&mut *max_v)
                        .and(&*velocity)
                        .for_each(|mv, &v| *mv = mv.max(v));
                    max_v
                }
                _ => velocity,
            };

            Zip::from(p)
                .and(&*momentum)
                .and(second)
                .for_each(|p, &m, &v| {
                    let adam = effective_lr * m / (v.sqrt() + epsilon);
                    let delta = adam + decay * *p;
                    *p -= delta;
                    update_sq += delta * delta;
                });
        }

        let info = StepInfo {
            step: state.step,
            effective_lr,
            update_norm: update_sq.sqrt(),
            param_norm: params.l2_norm(),
        };
        trace!(
            step = info.step,
            effective_lr,
            update_norm = info.update_norm,
            param_norm = info.param_norm,
            "adamw step"
        );
        Ok(info)
    }
}
