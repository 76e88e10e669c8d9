//! Training context tying the components together.
//!
//! One [`TrainerContext`] owns the parameters, optimizer state, replay
//! buffer, clipper and exploration policy. Every mutating method takes
//! `&mut self`, so a context has exactly one writer at a time; independent
//! runs use independent contexts.
//!
//! A training step is
//! `sample -> GradientSource::compute -> clip -> AdamW step -> update_priorities`.

use crate::clip::{ClipConfig, ClipStats, GradientClipper};
use crate::error::{Result, RlError};
use crate::exploration::{ActionSelection, ExplorationConfig, ExplorationPolicy};
use crate::init::{InitConfig, LayerSpec, VarianceReport, WeightInitializer};
use crate::optimizer::{AdamWConfig, AdamWOptimizer, OptimizerState};
use crate::replay::{BufferConfig, Experience, PrioritizedReplayBuffer, SampledBatch};
use crate::schedule::{DecaySchedule, Scheduler};
use crate::tensor::{ensure_same_shape, ParamSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Smallest learning rate a schedule may push into the optimizer
pub const MIN_LEARNING_RATE: f64 = 1e-12;

/// Output of the external model for one batch
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    /// Loss gradients, shaped like the parameters
    pub grads: ParamSet,
    /// TD error per sampled experience, in batch order
    pub td_errors: Vec<f64>,
    /// Batch loss
    pub loss: f64,
}

/// The model/backprop collaborator
pub trait GradientSource {
    /// Compute gradients of the loss on `batch` at `params`
    fn compute(&mut self, params: &ParamSet, batch: &SampledBatch) -> Result<Gradients>;
}

impl<F> GradientSource for F
where
    F: FnMut(&ParamSet, &SampledBatch) -> Result<Gradients>,
{
    fn compute(&mut self, params: &ParamSet, batch: &SampledBatch) -> Result<Gradients> {
        self(params, batch)
    }
}

/// Configuration for every component of a [`TrainerContext`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Replay buffer
    pub buffer: BufferConfig,
    /// AdamW hyperparameters
    pub optimizer: AdamWConfig,
    /// Gradient clipping
    pub clip: ClipConfig,
    /// Action selection
    pub exploration: ExplorationConfig,
    /// Weight initialization
    pub init: InitConfig,
    /// Optional learning-rate schedule, advanced once per train step
    pub lr_schedule: Option<DecaySchedule>,
}

impl TrainerConfig {
    /// Validate every component config
    pub fn validate(&self) -> Result<()> {
        self.buffer.validate()?;
        self.optimizer.validate()?;
        self.clip.validate()?;
        self.exploration.strategy.validate()?;
        if let Some(schedule) = &self.lr_schedule {
            schedule.validate()?;
        }
        Ok(())
    }
}

/// Diagnostics for one training step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainStepReport {
    /// Optimizer step after this update
    pub step: u64,
    /// Loss reported by the gradient source
    pub loss: f64,
    /// Global gradient norm before clipping
    pub grad_norm: f64,
    /// Whether the gradients were rescaled or zeroed
    pub clipped: bool,
    /// Bias-corrected learning rate of this step
    pub effective_lr: f64,
    /// Base learning rate of this step
    pub learning_rate: f64,
    /// Importance-sampling exponent used for the batch
    pub beta: f64,
    /// Number of sampled experiences
    pub batch_size: usize,
    /// L2 norm of the parameter change
    pub update_norm: f64,
}

/// Single-writer training context
#[derive(Debug, Clone)]
pub struct TrainerContext {
    config: TrainerConfig,
    params: ParamSet,
    optimizer: AdamWOptimizer,
    opt_state: OptimizerState,
    clipper: GradientClipper,
    buffer: PrioritizedReplayBuffer,
    exploration: ExplorationPolicy,
    lr_scheduler: Option<Scheduler>,
    variance_report: VarianceReport,
}

impl TrainerContext {
    /// Build a context whose parameters are initialized from `layers`
    pub fn new(config: TrainerConfig, layers: &[LayerSpec]) -> Result<Self> {
        config.validate()?;
        if layers.is_empty() {
            return Err(RlError::invalid_config("layers", "need at least one layer"));
        }
        let mut initializer = WeightInitializer::new(config.init.clone());
        let params = initializer.initialize_network(layers)?;
        Self::with_parameters(config, params)
    }

    /// Build a context around existing parameters
    pub fn with_parameters(config: TrainerConfig, params: ParamSet) -> Result<Self> {
        config.validate()?;
        ensure_finite_params(&params, 0)?;

        let mut optimizer = AdamWOptimizer::new(config.optimizer.clone())?;
        let lr_scheduler = match &config.lr_schedule {
            Some(schedule) => {
                let scheduler = Scheduler::new(schedule.clone())?;
                optimizer.set_learning_rate(scheduler.current().max(MIN_LEARNING_RATE))?;
                Some(scheduler)
            }
            None => None,
        };
        let opt_state = optimizer.initialize_state(&params);
        let clipper = GradientClipper::new(config.clip.clone())?;
        let buffer = PrioritizedReplayBuffer::new(config.buffer.clone())?;
        let exploration = ExplorationPolicy::new(config.exploration.clone())?;
        let variance_report = WeightInitializer::verify_variance(&params);

        info!(
            layers = params.num_layers(),
            parameters = params.num_elements(),
            capacity = buffer.capacity(),
            strategy = exploration.config().strategy.name(),
            learning_rate = optimizer.config().learning_rate,
            "trainer context created"
        );

        Ok(Self {
            config,
            params,
            optimizer,
            opt_state,
            clipper,
            buffer,
            exploration,
            lr_scheduler,
            variance_report,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Current parameters
    pub fn parameters(&self) -> &ParamSet {
        &self.params
    }

    /// Replace the parameters, keeping optimizer moments.
    ///
    /// Shapes must match the current parameters and every value must be
    /// finite; on error the current parameters are kept.
    pub fn load_parameters(&mut self, params: ParamSet) -> Result<()> {
        ensure_same_shape(&self.params.shapes(), &params.shapes())?;
        ensure_finite_params(&params, self.opt_state.step)?;
        self.params = params;
        self.variance_report = WeightInitializer::verify_variance(&self.params);
        Ok(())
    }

    /// Optimizer moments and step counter
    pub fn optimizer_state(&self) -> &OptimizerState {
        &self.opt_state
    }

    /// Replay buffer
    pub fn buffer(&self) -> &PrioritizedReplayBuffer {
        &self.buffer
    }

    /// Exploration policy
    pub fn exploration(&self) -> &ExplorationPolicy {
        &self.exploration
    }

    /// Clipping counters
    pub fn clip_stats(&self) -> &ClipStats {
        self.clipper.stats()
    }

    /// Variance diagnostics of the current parameters
    pub fn variance_report(&self) -> &VarianceReport {
        &self.variance_report
    }

    /// Completed optimizer steps
    pub fn step_count(&self) -> u64 {
        self.opt_state.step
    }

    /// Store a transition in the replay buffer
    pub fn observe(&mut self, experience: Experience) -> Result<usize> {
        self.buffer.add(experience)
    }

    /// Pick an action for the given value estimates
    pub fn select_action(
        &mut self,
        values: &[f64],
        uncertainties: Option<&[f64]>,
    ) -> Result<ActionSelection> {
        self.exploration.select_action(values, uncertainties)
    }

    /// Run one sample/compute/clip/step/reprioritize cycle.
    ///
    /// Parameters are left untouched if the gradient source fails, returns
    /// the wrong number of TD errors, or returns non-finite TD errors.
    pub fn train_step(
        &mut self,
        source: &mut dyn GradientSource,
        batch_size: usize,
    ) -> Result<TrainStepReport> {
        let batch = self.buffer.sample(batch_size)?;
        let Gradients {
            mut grads,
            td_errors,
            loss,
        } = source.compute(&self.params, &batch)?;

        if td_errors.len() != batch.len() {
            return Err(RlError::dimension_mismatch(
                format!("{} td errors", batch.len()),
                td_errors.len().to_string(),
            ));
        }
        if let Some(pos) = td_errors.iter().position(|td| !td.is_finite()) {
            return Err(RlError::NumericalInstability {
                step: self.opt_state.step,
                layer: None,
                norm_type: self.clipper.config().norm_type.to_string(),
                detail: format!("td error {pos} is {}", td_errors[pos]),
            });
        }
        ensure_same_shape(&self.params.shapes(), &grads.shapes())?;

        let (grad_norm, clipped, _) = self.clipper.clip_in_place(&mut grads)?;
        let learning_rate = self.optimizer.config().learning_rate;
        let info = self
            .optimizer
            .step(&mut self.params, &grads, &mut self.opt_state)?;
        self.buffer.update_priorities(&batch.indices, &td_errors)?;

        if let Some(scheduler) = self.lr_scheduler.as_mut() {
            let next = scheduler.step().max(MIN_LEARNING_RATE);
            self.optimizer.set_learning_rate(next)?;
        }

        debug!(
            step = info.step,
            loss,
            grad_norm,
            clipped,
            effective_lr = info.effective_lr,
            beta = batch.beta,
            batch_size = batch.len(),
            "train step"
        );

        Ok(TrainStepReport {
            step: info.step,
            loss,
            grad_norm,
            clipped,
            effective_lr: info.effective_lr,
            learning_rate,
            beta: batch.beta,
            batch_size: batch.len(),
            update_norm: info.update_norm,
        })
    }
}

fn ensure_finite_params(params: &ParamSet, step: u64) -> Result<()> {
    match params.first_non_finite_layer() {
        Some(layer) => Err(RlError::NumericalInstability {
            step,
            layer: Some(layer),
            norm_type: "none".to_string(),
            detail: "loaded parameters contain a non-finite value".to_string(),
        }),
        None => Ok(()),
    }
}
