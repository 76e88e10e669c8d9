//! Prioritized experience replay.
//!
//! - [`SumTree`]: O(log n) priority updates and mass lookups
//! - [`PrioritizedReplayBuffer`]: ring buffer with stratified sampling,
//!   importance-sampling weights and critical-event boosts
//! - [`FeatureDriftStats`]: running state statistics for shift detection

mod buffer;
mod drift;
mod experience;
mod sum_tree;

pub use buffer::{
    BufferConfig, BufferStats, CriticalEventConfig, PrioritizedReplayBuffer, SampledBatch,
};
pub use drift::FeatureDriftStats;
pub use experience::{Experience, ExperienceMetadata};
pub use sum_tree::SumTree;
