//! Step-indexed decay schedules.
//!
//! Used for exploration epsilon/temperature annealing and for driving the
//! optimizer learning rate. Every schedule is a pure function of the step
//! counter, so a run can be reproduced from the step alone.

use crate::error::{Result, RlError};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Decay schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecaySchedule {
    /// Fixed value
    Constant {
        /// Value returned at every step
        value: f64,
    },

    /// Linear interpolation from `start` to `end` over `steps`, then held at `end`
    Linear {
        /// Value at step 0
        start: f64,
        /// Value from `steps` onwards
        end: f64,
        /// Length of the ramp
        steps: u64,
    },

    /// `max(end, start * rate^step)`
    Exponential {
        /// Value at step 0
        start: f64,
        /// Floor
        end: f64,
        /// Per-step multiplier in (0, 1]
        rate: f64,
    },

    /// Half-cosine from `start` to `end` over `steps`, then held at `end`
    Cosine {
        /// Value at step 0
        start: f64,
        /// Value from `steps` onwards
        end: f64,
        /// Length of the ramp
        steps: u64,
    },

    /// Linear warmup from 0 to `peak`, then linear decay to 0 at `total_steps`
    WarmupLinear {
        /// Value at the end of warmup
        peak: f64,
        /// Warmup length
        warmup_steps: u64,
        /// Step at which the value reaches 0
        total_steps: u64,
    },
}

impl DecaySchedule {
    /// Value of the schedule at `step`
    pub fn value_at(&self, step: u64) -> f64 {
        match *self {
            DecaySchedule::Constant { value } => value,

            DecaySchedule::Linear { start, end, steps } => {
                if step >= steps {
                    end
                } else {
                    let progress = step as f64 / steps as f64;
                    start + (end - start) * progress
                }
            }

            DecaySchedule::Exponential { start, end, rate } => {
                let exponent = i32::try_from(step).unwrap_or(i32::MAX);
                (start * rate.powi(exponent)).max(end)
            }

            DecaySchedule::Cosine { start, end, steps } => {
                if step >= steps {
                    end
                } else {
                    let progress = step as f64 / steps as f64;
                    end + 0.5 * (start - end) * (1.0 + (PI * progress).cos())
                }
            }

            DecaySchedule::WarmupLinear {
                peak,
                warmup_steps,
                total_steps,
            } => {
                if step < warmup_steps {
                    peak * step as f64 / warmup_steps as f64
                } else if step < total_steps {
                    let remaining = (total_steps - step) as f64;
                    peak * remaining / (total_steps - warmup_steps) as f64
                } else {
                    0.0
                }
            }
        }
    }

    /// Value at step 0
    pub fn initial(&self) -> f64 {
        self.value_at(0)
    }

    /// Check the schedule parameters
    pub fn validate(&self) -> Result<()> {
        match *self {
            DecaySchedule::Constant { value } if !value.is_finite() => {
                Err(RlError::invalid_config("value", "must be finite"))
            }
            DecaySchedule::Linear { steps: 0, .. } | DecaySchedule::Cosine { steps: 0, .. } => {
                Err(RlError::invalid_config("steps", "must be positive"))
            }
            DecaySchedule::Exponential { rate, .. } if !(rate > 0.0 && rate <= 1.0) => {
                Err(RlError::invalid_config(
                    "rate",
                    format!("must be in (0, 1], got {rate}"),
                ))
            }
            DecaySchedule::WarmupLinear {
                warmup_steps,
                total_steps,
                ..
            } if warmup_steps == 0 || total_steps <= warmup_steps => Err(RlError::invalid_config(
                "warmup_steps/total_steps",
                format!("need 0 < warmup ({warmup_steps}) < total ({total_steps})"),
            )),
            _ => Ok(()),
        }
    }
}

/// Stateful wrapper that advances a [`DecaySchedule`] one step at a time
#[derive(Debug, Clone)]
pub struct Scheduler {
    schedule: DecaySchedule,
    step: u64,
    current: f64,
}

impl Scheduler {
    /// Create a scheduler positioned at step 0
    pub fn new(schedule: DecaySchedule) -> Result<Self> {
        schedule.validate()?;
        let current = schedule.initial();
        Ok(Self {
            schedule,
            step: 0,
            current,
        })
    }

    /// Advance one step and return the new value
    pub fn step(&mut self) -> f64 {
        self.step += 1;
        self.current = self.schedule.value_at(self.step);
        self.current
    }

    /// Current value without advancing
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Number of steps taken
    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// Back to step 0
    pub fn reset(&mut self) {
        self.step = 0;
        self.current = self.schedule.initial();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    fn assert_close(a: f64, b: f64, msg: &str) {
        assert!((a - b).abs() < EPS, "{}: {} != {}", msg, a, b);
    }

    #[test]
    fn test_linear_reaches_end_exactly() {
        let s = DecaySchedule::Linear {
            start: 1.0,
            end: 0.05,
            steps: 100,
        };
        assert_close(s.value_at(0), 1.0, "start");
        assert_close(s.value_at(50), 0.525, "midpoint");
        assert_eq!(s.value_at(100), 0.05);
        assert_eq!(s.value_at(10_000), 0.05);
    }

    #[test]
    fn test_exponential_floors() {
        let s = DecaySchedule::Exponential {
            start: 1.0,
            end: 0.1,
            rate: 0.5,
        };
        assert_close(s.value_at(1), 0.5, "step 1");
        assert_close(s.value_at(2), 0.25, "step 2");
        assert_eq!(s.value_at(10), 0.1);
        assert_eq!(s.value_at(u64::MAX), 0.1);
    }

    #[test]
    fn test_cosine_midpoint() {
        let s = DecaySchedule::Cosine {
            start: 1.0,
            end: 0.0,
            steps: 10,
        };
        assert_close(s.value_at(0), 1.0, "start");
        assert_close(s.value_at(5), 0.5, "midpoint");
        assert_eq!(s.value_at(10), 0.0);
    }

    #[test]
    fn test_warmup_linear() {
        let s = DecaySchedule::WarmupLinear {
            peak: 1.0,
            warmup_steps: 5,
            total_steps: 10,
        };
        assert_close(s.value_at(0), 0.0, "step 0");
        assert_close(s.value_at(2), 0.4, "warmup");
        assert_close(s.value_at(5), 1.0, "peak");
        assert_close(s.value_at(8), 0.4, "decay");
        assert_close(s.value_at(12), 0.0, "after total");
    }

    #[test]
    fn test_validate() {
        assert!(DecaySchedule::Linear {
            start: 1.0,
            end: 0.0,
            steps: 0
        }
        .validate()
        .is_err());
        assert!(DecaySchedule::Exponential {
            start: 1.0,
            end: 0.0,
            rate: 1.5
        }
        .validate()
        .is_err());
        assert!(DecaySchedule::WarmupLinear {
            peak: 1.0,
            warmup_steps: 10,
            total_steps: 10
        }
        .validate()
        .is_err());
        assert!(DecaySchedule::Constant { value: 0.1 }.validate().is_ok());
    }

    #[test]
    fn test_scheduler_step_and_reset() {
        let mut sched = Scheduler::new(DecaySchedule::Linear {
            start: 0.01,
            end: 0.001,
            steps: 3,
        })
        .unwrap();
        assert_close(sched.current(), 0.01, "initial");
        sched.step();
        sched.step();
        assert_eq!(sched.step(), 0.001);
        assert_eq!(sched.step_count(), 3);
        sched.reset();
        assert_close(sched.current(), 0.01, "after reset");
        assert_eq!(sched.step_count(), 0);
    }

    #[test]
    fn test_serde_tagged() {
        let s = DecaySchedule::Exponential {
            start: 1.0,
            end: 0.1,
            rate: 0.99,
        };
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"kind\":\"exponential\""));
        let back: DecaySchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
