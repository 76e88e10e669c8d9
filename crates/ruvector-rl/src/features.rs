//! OHLCV feature vectors fed to the replay buffer and exploration policy.

use crate::error::{Result, RlError};
use serde::{Deserialize, Serialize};

/// Length of every [`FeatureVector`]
pub const FEATURE_DIM: usize = 8;

/// A single candlestick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Opening price
    pub open: f64,
    /// Highest price
    pub high: f64,
    /// Lowest price
    pub low: f64,
    /// Closing price
    pub close: f64,
    /// Traded volume
    pub volume: f64,
}

impl Candle {
    /// Create a candle
    pub fn new(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// High minus low
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// `[open, high, low, close, volume, range/close, return, volume/mean_volume]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector([f64; FEATURE_DIM]);

impl FeatureVector {
    /// Build the vector for `current`, with `prev` supplying the return and
    /// `mean_volume` normalising volume.
    ///
    /// Any ratio with a zero denominator is reported as 0.0.
    pub fn from_candles(prev: &Candle, current: &Candle, mean_volume: f64) -> Self {
        let range_ratio = ratio(current.range(), current.close);
        let ret = ratio(current.close - prev.close, prev.close);
        let rel_volume = ratio(current.volume, mean_volume);
        Self([
            current.open,
            current.high,
            current.low,
            current.close,
            current.volume,
            range_ratio,
            ret,
            rel_volume,
        ])
    }

    /// Features as a slice
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Features as an owned vector, ready for [`crate::replay::Experience`]
    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }

    /// True if every feature is finite
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl AsRef<[f64]> for FeatureVector {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

/// Feature vectors for every candle after the first.
///
/// Volume is normalised by the trailing mean over the last `volume_window`
/// candles, current included.
pub fn extract_series(candles: &[Candle], volume_window: usize) -> Result<Vec<FeatureVector>> {
    if volume_window == 0 {
        return Err(RlError::invalid_config("volume_window", "must be positive"));
    }
    if candles.len() < 2 {
        return Err(RlError::InsufficientSamples {
            requested: 2,
            available: candles.len(),
        });
    }

    let features = candles
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let end = i + 2;
            let start = end.saturating_sub(volume_window);
            let window = &candles[start..end];
            let mean_volume = window.iter().map(|c| c.volume).sum::<f64>() / window.len() as f64;
            FeatureVector::from_candles(&pair[0], &pair[1], mean_volume)
        })
        .collect();
    Ok(features)
}

fn ratio(num: f64, denom: f64) -> f64 {
    if denom == 0.0 {
        0.0
    } else {
        num / denom
    }
}
