//! Stored transitions.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Market context attached to a transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceMetadata {
    /// Price at the time of the decision
    pub price: f64,
    /// Traded volume
    pub volume: f64,
    /// Realised volatility
    pub volatility: f64,
    /// Model confidence in the chosen action
    pub confidence: f64,
}

/// A single `(state, action, reward, next_state)` transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    /// Feature vector before acting
    pub state: Vec<f64>,
    /// Discrete action index
    pub action: usize,
    /// Observed reward
    pub reward: f64,
    /// Feature vector after acting
    pub next_state: Vec<f64>,
    /// Episode ended on this transition
    pub terminal: bool,
    /// Most recent TD error (0 until the first priority update)
    pub td_error: f64,
    /// Sampling priority, assigned by the buffer
    pub priority: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Instrument symbol
    pub symbol: String,
    /// Market context
    pub metadata: ExperienceMetadata,
    /// Tagged as a critical event on insert
    pub critical: bool,
}

impl Experience {
    /// Create a transition stamped with the current time
    pub fn new(
        state: Vec<f64>,
        action: usize,
        reward: f64,
        next_state: Vec<f64>,
        terminal: bool,
    ) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            state,
            action,
            reward,
            next_state,
            terminal,
            td_error: 0.0,
            priority: 0.0,
            timestamp,
            symbol: String::new(),
            metadata: ExperienceMetadata::default(),
            critical: false,
        }
    }

    /// Set the instrument symbol
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    /// Set the market context
    pub fn with_metadata(mut self, metadata: ExperienceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Feature length shared by `state` and `next_state`
    pub fn feature_len(&self) -> usize {
        self.state.len()
    }
}
