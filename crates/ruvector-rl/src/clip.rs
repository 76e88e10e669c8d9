//! Global-norm gradient clipping.
//!
//! One norm is computed jointly across every layer. If it exceeds
//! `max_norm`, every element is rescaled by `max_norm / norm`; otherwise the
//! gradients pass through untouched, so clipping compliant gradients is a
//! no-op.

use crate::error::{Result, RlError};
use crate::tensor::ParamSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Relative slack on `max_norm`, so re-clipping an already clipped set
/// is a no-op despite rounding in the rescale
pub const NORM_TOLERANCE: f64 = 1e-12;

/// Norm used to measure the gradient set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormType {
    /// Sum of absolute values
    L1,
    /// Euclidean norm
    #[default]
    L2,
    /// Largest absolute value
    Inf,
}

impl NormType {
    /// Global norm of `grads` under this norm
    pub fn compute(self, grads: &ParamSet) -> f64 {
        match self {
            NormType::L1 => grads.l1_norm(),
            NormType::L2 => grads.l2_norm(),
            NormType::Inf => grads.max_abs(),
        }
    }
}

impl fmt::Display for NormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NormType::L1 => "l1",
            NormType::L2 => "l2",
            NormType::Inf => "inf",
        };
        f.write_str(name)
    }
}

impl FromStr for NormType {
    type Err = RlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l1" | "1" => Ok(NormType::L1),
            "l2" | "2" => Ok(NormType::L2),
            "inf" | "linf" | "l_inf" | "max" => Ok(NormType::Inf),
            other => Err(RlError::UnknownNormType(other.to_string())),
        }
    }
}

/// What to do when a gradient element is NaN or infinite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonFinitePolicy {
    /// Return `RlError::NumericalInstability`
    #[default]
    Error,
    /// Replace the gradients with zeros and log a warning
    ZeroAndContinue,
}

/// Clipper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipConfig {
    /// Largest allowed global norm
    pub max_norm: f64,
    /// Norm used for the check
    pub norm_type: NormType,
    /// Handling of NaN or infinite gradient elements
    pub non_finite: NonFinitePolicy,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            max_norm: 1.0,
            norm_type: NormType::L2,
            non_finite: NonFinitePolicy::Error,
        }
    }
}

impl ClipConfig {
    /// Check `max_norm` is finite and positive
    pub fn validate(&self) -> Result<()> {
        if !(self.max_norm.is_finite() && self.max_norm > 0.0) {
            return Err(RlError::invalid_config(
                "max_norm",
                format!("must be finite and positive, got {}", self.max_norm),
            ));
        }
        Ok(())
    }
}

/// Result of a clipping call
#[derive(Debug, Clone, PartialEq)]
pub struct ClipOutcome {
    /// Gradients after clipping
    pub clipped: ParamSet,
    /// Global norm before clipping
    pub norm: f64,
    /// Whether rescaling (or zeroing) happened
    pub was_clipped: bool,
    /// Factor applied to every element
    pub scale: f64,
}

/// Running counters over every clip call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipStats {
    /// Number of calls
    pub calls: u64,
    /// Calls where the norm exceeded `max_norm`
    pub clipped: u64,
    /// Calls with a NaN or infinite gradient element
    pub non_finite: u64,
    /// Calls whose norm overflowed f64 although every element was finite
    #[serde(default)]
    pub overflowed: u64,
    /// Mean of the finite pre-clip norms
    pub mean_norm: f64,
    /// Largest finite pre-clip norm
    pub max_norm_seen: f64,
}

impl ClipStats {
    fn record(&mut self, norm: f64, clipped: bool) {
        self.calls += 1;
        if !norm.is_finite() {
            self.non_finite += 1;
            return;
        }
        if clipped {
            self.clipped += 1;
        }
        let finite = (self.calls - self.non_finite - self.overflowed) as f64;
        self.mean_norm += (norm - self.mean_norm) / finite;
        self.max_norm_seen = self.max_norm_seen.max(norm);
    }

    fn record_overflow(&mut self) {
        self.calls += 1;
        self.clipped += 1;
        self.overflowed += 1;
    }

    /// Fraction of calls that rescaled the gradients
    pub fn clip_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.clipped as f64 / self.calls as f64
        }
    }
}

/// Gradient clipper
#[derive(Debug, Clone)]
pub struct GradientClipper {
    config: ClipConfig,
    stats: ClipStats,
}

impl GradientClipper {
    /// Create a clipper after validating the config
    pub fn new(config: ClipConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stats: ClipStats::default(),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &ClipConfig {
        &self.config
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> &ClipStats {
        &self.stats
    }

    /// Clip a copy of `grads`.
    ///
    /// # Errors
    /// With [`NonFinitePolicy::Error`], a NaN or infinite element returns
    /// `RlError::NumericalInstability` naming the first offending layer.
    /// Large but finite gradients are always rescaled, never rejected.
    pub fn clip(&mut self, grads: &ParamSet) -> Result<ClipOutcome> {
        let mut clipped = grads.clone();
        let (norm, was_clipped, scale) = self.clip_in_place(&mut clipped)?;
        Ok(ClipOutcome {
            clipped,
            norm,
            was_clipped,
            scale,
        })
    }

    /// Clip `grads` in place, returning `(norm, was_clipped, scale)`.
    ///
    /// On error the gradients are left untouched.
    pub fn clip_in_place(&mut self, grads: &mut ParamSet) -> Result<(f64, bool, f64)> {
        let norm_type = self.config.norm_type;
        let norm = norm_type.compute(grads);

        if let Some(layer) = grads.first_non_finite_layer() {
            let layer = Some(layer);
            self.stats.record(norm, true);
            return match self.config.non_finite {
                NonFinitePolicy::Error => Err(RlError::NumericalInstability {
                    step: self.stats.calls,
                    layer,
                    norm_type: norm_type.to_string(),
                    detail: format!("gradient norm is {norm}"),
                }),
                NonFinitePolicy::ZeroAndContinue => {
                    warn!(
                        call = self.stats.calls,
                        ?layer,
                        %norm_type,
                        norm,
                        "non-finite gradient norm, zeroing gradients"
                    );
                    for l in grads.layers_mut() {
                        l.fill(0.0);
                    }
                    Ok((norm, true, 0.0))
                }
            };
        }

        if !norm.is_finite() {
            // Finite elements whose norm overflows f64: normalise by the
            // largest magnitude first, then clip the unit-scale set.
            let max_abs = grads.max_abs();
            grads.scale_in_place(1.0 / max_abs);
            let scale = self.config.max_norm / norm_type.compute(grads);
            grads.scale_in_place(scale);
            self.stats.record_overflow();
            debug!(max_abs, scale, max_norm = self.config.max_norm, %norm_type, "clipped overflowing gradients");
            return Ok((norm, true, scale / max_abs));
        }

        if norm > self.config.max_norm * (1.0 + NORM_TOLERANCE) {
            let scale = self.config.max_norm / norm;
            grads.scale_in_place(scale);
            self.stats.record(norm, true);
            debug!(norm, scale, max_norm = self.config.max_norm, %norm_type, "clipped gradients");
            Ok((norm, true, scale))
        } else {
            self.stats.record(norm, false);
            Ok((norm, false, 1.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grads(values: Vec<Vec<Vec<f64>>>) -> ParamSet {
        ParamSet::from_nested(values).unwrap()
    }

    fn clipper(max_norm: f64, norm_type: NormType) -> GradientClipper {
        GradientClipper::new(ClipConfig {
            max_norm,
            norm_type,
            ..ClipConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_global_l2_norm_across_layers() {
        let g = grads(vec![vec![vec![3.0]], vec![vec![4.0]]]);
        let mut c = clipper(1.0, NormType::L2);
        let out = c.clip(&g).unwrap();
        assert!((out.norm - 5.0).abs() < 1e-12);
        assert!(out.was_clipped);
        assert!((out.scale - 0.2).abs() < 1e-12);
        assert!((out.clipped.get(0, 0, 0).unwrap() - 0.6).abs() < 1e-12);
        assert!((out.clipped.get(1, 0, 0).unwrap() - 0.8).abs() < 1e-12);
        assert!((out.clipped.l2_norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_compliant_gradients_unchanged() {
        let g = grads(vec![vec![vec![0.1, -0.2], vec![0.05, 0.0]]]);
        let mut c = clipper(1.0, NormType::L2);
        let out = c.clip(&g).unwrap();
        assert!(!out.was_clipped);
        assert_eq!(out.scale, 1.0);
        assert_eq!(out.clipped, g);
    }

    #[test]
    fn test_l1_and_inf_norms() {
        let g = grads(vec![vec![vec![1.0, -2.0]], vec![vec![3.0]]]);
        assert_eq!(NormType::L1.compute(&g), 6.0);
        assert_eq!(NormType::Inf.compute(&g), 3.0);

        let mut c = clipper(1.5, NormType::Inf);
        let out = c.clip(&g).unwrap();
        assert!((out.scale - 0.5).abs() < 1e-12);
        assert!((NormType::Inf.compute(&out.clipped) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_error_policy() {
        let g = grads(vec![vec![vec![1.0]], vec![vec![f64::NAN]]]);
        let mut c = clipper(1.0, NormType::L2);
        match c.clip(&g) {
            Err(RlError::NumericalInstability { layer, norm_type, .. }) => {
                assert_eq!(layer, Some(1));
                assert_eq!(norm_type, "l2");
            }
            other => panic!("expected instability error, got {other:?}"),
        }
        assert_eq!(c.stats().non_finite, 1);
    }

    #[test]
    fn test_non_finite_inf_norm_detected() {
        let g = grads(vec![vec![vec![1.0, f64::NAN]]]);
        assert!(NormType::Inf.compute(&g).is_nan());
    }

    #[test]
    fn test_non_finite_zero_policy() {
        let g = grads(vec![vec![vec![f64::INFINITY, 1.0]]]);
        let mut c = GradientClipper::new(ClipConfig {
            non_finite: NonFinitePolicy::ZeroAndContinue,
            ..ClipConfig::default()
        })
        .unwrap();
        let out = c.clip(&g).unwrap();
        assert!(out.was_clipped);
        assert_eq!(out.scale, 0.0);
        assert!(out.clipped.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_huge_finite_gradients_rescaled() {
        let g = grads(vec![vec![vec![1e200, 1e200]]]);
        for policy in [NonFinitePolicy::Error, NonFinitePolicy::ZeroAndContinue] {
            let mut c = GradientClipper::new(ClipConfig {
                non_finite: policy,
                ..ClipConfig::default()
            })
            .unwrap();
            let out = c.clip(&g).unwrap();
            assert!(out.was_clipped);
            assert!(out.norm.is_finite());
            assert!(out.scale > 0.0);
            let half = std::f64::consts::FRAC_1_SQRT_2;
            assert!((out.clipped.get(0, 0, 0).unwrap() - half).abs() < 1e-12);
            assert!((out.clipped.l2_norm() - 1.0).abs() < 1e-12);
            assert_eq!(c.stats().non_finite, 0);
        }
    }

    #[test]
    fn test_overflowing_norm_still_rescaled() {
        let g = grads(vec![vec![vec![1e308, -1e308]], vec![vec![1e308]]]);
        let mut c = clipper(2.0, NormType::L1);
        let out = c.clip(&g).unwrap();
        assert!(out.norm.is_infinite());
        assert!(out.was_clipped);
        assert!(out.clipped.iter().all(|v| v.is_finite()));
        assert!((NormType::L1.compute(&out.clipped) - 2.0).abs() < 1e-12);
        assert!((out.clipped.get(0, 0, 1).unwrap() + 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(c.stats().non_finite, 0);
        assert_eq!(c.stats().clipped, 1);
        assert_eq!(c.stats().overflowed, 1);

        c.clip(&grads(vec![vec![vec![0.5]]])).unwrap();
        assert_eq!(c.stats().mean_norm, 0.5);
    }

    #[test]
    fn test_reclip_is_noop() {
        let g = grads(vec![vec![vec![0.3, 0.7, -1.1]], vec![vec![2.9]]]);
        let mut c = clipper(0.7, NormType::L2);
        let once = c.clip(&g).unwrap();
        let twice = c.clip(&once.clipped).unwrap();
        assert!(!twice.was_clipped);
        assert_eq!(twice.clipped, once.clipped);
    }

    #[test]
    fn test_invalid_max_norm() {
        assert!(GradientClipper::new(ClipConfig {
            max_norm: 0.0,
            ..ClipConfig::default()
        })
        .is_err());
        assert!("l3".parse::<NormType>().is_err());
        assert_eq!("LInf".parse::<NormType>().unwrap(), NormType::Inf);
    }

    #[test]
    fn test_stats_track_calls() {
        let mut c = clipper(1.0, NormType::L2);
        c.clip(&grads(vec![vec![vec![0.5]]])).unwrap();
        c.clip(&grads(vec![vec![vec![2.0]]])).unwrap();
        let stats = c.stats();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.clipped, 1);
        assert!((stats.mean_norm - 1.25).abs() < 1e-12);
        assert_eq!(stats.max_norm_seen, 2.0);
        assert!((stats.clip_rate() - 0.5).abs() < 1e-12);
    }
}
