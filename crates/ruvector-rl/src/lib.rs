//! # RuVector RL
//!
//! Numeric core of a reinforcement-learning trainer for directional market
//! prediction. Parameters and gradients are explicit per-layer matrices
//! ([`ParamSet`]); the model and its backpropagation live outside this crate
//! and plug in through [`GradientSource`].
//!
//! ## Components
//!
//! - **Prioritized replay**: sum-tree backed ring buffer with stratified
//!   sampling, importance-sampling weights and critical-event boosts
//! - **AdamW**: Adam with decoupled weight decay and optional AMSGrad
//! - **Gradient clipping**: global L1/L2/Inf norm with an explicit non-finite policy
//! - **Weight initialization**: Glorot scaling with per-layer-type gain and
//!   variance diagnostics
//! - **Exploration**: epsilon-greedy, temperature softmax and entropy-guided
//!   action selection with decay schedules
//!
//! ### Usage Example
//!
//! ```rust,ignore
//! use ruvector_rl::{
//!     Experience, Gradients, LayerSpec, LayerType, ParamSet, SampledBatch, TrainerConfig,
//!     TrainerContext,
//! };
//!
//! let layers = [
//!     LayerSpec::new(LayerType::Dense, 8, 32),
//!     LayerSpec::new(LayerType::Dense, 32, 3),
//! ];
//! let mut ctx = TrainerContext::new(TrainerConfig::default(), &layers)?;
//!
//! ctx.observe(Experience::new(state, action, reward, next_state, false))?;
//! let choice = ctx.select_action(&q_values, None)?;
//!
//! let mut model = |params: &ParamSet, batch: &SampledBatch| -> ruvector_rl::Result<Gradients> {
//!     backprop(params, batch)
//! };
//! let report = ctx.train_step(&mut model, 32)?;
//! ```

#![warn(missing_docs)]

pub mod clip;
pub mod error;
pub mod exploration;
pub mod features;
pub mod init;
pub mod optimizer;
pub mod replay;
pub mod schedule;
pub mod tensor;
pub mod trainer;

// Re-export commonly used types
pub use clip::{ClipConfig, ClipOutcome, ClipStats, GradientClipper, NonFinitePolicy, NormType};
pub use error::{Result, RlError};
pub use exploration::{
    argmax, entropy, softmax, ActionSelection, ExplorationConfig, ExplorationPolicy,
    ExplorationState, ExplorationStrategy,
};
pub use features::{extract_series, Candle, FeatureVector, FEATURE_DIM};
pub use init::{
    InitConfig, InitDistribution, LayerSpec, LayerType, VarianceReport, WeightInitializer,
    VARIANCE_RATIO_BAND,
};
pub use optimizer::{AdamWConfig, AdamWOptimizer, LayerMoments, OptimizerState, StepInfo};
pub use replay::{
    BufferConfig, BufferStats, CriticalEventConfig, Experience, ExperienceMetadata,
    FeatureDriftStats, PrioritizedReplayBuffer, SampledBatch, SumTree,
};
pub use schedule::{DecaySchedule, Scheduler};
pub use tensor::{ParamSet, Shape};
pub use trainer::{Gradients, GradientSource, TrainStepReport, TrainerConfig, TrainerContext};
