//! Layered parameter and gradient storage.
//!
//! A [`ParamSet`] is an ordered list of dense row-major matrices, one per
//! layer. Each layer is a single contiguous `Array2<f64>`; callers that think
//! in `[layer][row][col]` terms use [`ParamSet::get`] / [`ParamSet::set`] or
//! convert at the boundary with [`ParamSet::from_nested`] / [`ParamSet::to_nested`].

use crate::error::{Result, RlError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// `(rows, cols)` of a single layer
pub type Shape = (usize, usize);

/// Parameters or gradients for a whole network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSet {
    layers: Vec<Array2<f64>>,
}

impl ParamSet {
    /// Wrap existing layer matrices
    pub fn new(layers: Vec<Array2<f64>>) -> Self {
        Self { layers }
    }

    /// Zero-filled set with the given shapes
    pub fn zeros(shapes: &[Shape]) -> Self {
        Self {
            layers: shapes.iter().map(|&s| Array2::zeros(s)).collect(),
        }
    }

    /// Zero-filled set with the same shapes as `other`
    pub fn zeros_like(other: &ParamSet) -> Self {
        Self::zeros(&other.shapes())
    }

    /// Build from the host's nested `float[layer][i][j]` representation.
    ///
    /// # Errors
    /// Returns `RlError::DimensionMismatch` if any layer has ragged rows.
    pub fn from_nested(nested: Vec<Vec<Vec<f64>>>) -> Result<Self> {
        let mut layers = Vec::with_capacity(nested.len());
        for (idx, rows) in nested.into_iter().enumerate() {
            let n_rows = rows.len();
            let n_cols = rows.first().map_or(0, Vec::len);
            let mut flat = Vec::with_capacity(n_rows * n_cols);
            for (r, row) in rows.into_iter().enumerate() {
                if row.len() != n_cols {
                    return Err(RlError::dimension_mismatch(
                        format!("layer {idx} row {r} with {n_cols} columns"),
                        format!("{} columns", row.len()),
                    ));
                }
                flat.extend(row);
            }
            let layer = Array2::from_shape_vec((n_rows, n_cols), flat).map_err(|e| {
                RlError::dimension_mismatch(format!("layer {idx} ({n_rows}, {n_cols})"), e.to_string())
            })?;
            layers.push(layer);
        }
        Ok(Self { layers })
    }

    /// Convert back to nested vectors
    pub fn to_nested(&self) -> Vec<Vec<Vec<f64>>> {
        self.layers
            .iter()
            .map(|layer| layer.rows().into_iter().map(|row| row.to_vec()).collect())
            .collect()
    }

    /// Shapes of every layer, in order
    pub fn shapes(&self) -> Vec<Shape> {
        self.layers.iter().map(|l| l.dim()).collect()
    }

    /// Number of layers
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Total number of scalars across all layers
    pub fn num_elements(&self) -> usize {
        self.layers.iter().map(|l| l.len()).sum()
    }

    /// True when there are no scalars at all
    pub fn is_empty(&self) -> bool {
        self.num_elements() == 0
    }

    /// Element at `[layer][row][col]`, or `None` when out of range
    pub fn get(&self, layer: usize, row: usize, col: usize) -> Option<f64> {
        self.layers.get(layer)?.get((row, col)).copied()
    }

    /// Overwrite the element at `[layer][row][col]`.
    ///
    /// # Errors
    /// Returns `RlError::IndexOutOfRange` for an unknown layer and
    /// `RlError::DimensionMismatch` for an out-of-range row or column.
    pub fn set(&mut self, layer: usize, row: usize, col: usize, value: f64) -> Result<()> {
        let len = self.layers.len();
        let matrix = self
            .layers
            .get_mut(layer)
            .ok_or(RlError::IndexOutOfRange { index: layer, len })?;
        let dim = matrix.dim();
        let slot = matrix.get_mut((row, col)).ok_or_else(|| {
            RlError::dimension_mismatch(format!("index within {dim:?}"), format!("({row}, {col})"))
        })?;
        *slot = value;
        Ok(())
    }

    /// Borrow a single layer
    pub fn layer(&self, idx: usize) -> Option<&Array2<f64>> {
        self.layers.get(idx)
    }

    /// Borrow all layers
    pub fn layers(&self) -> &[Array2<f64>] {
        &self.layers
    }

    /// Mutably borrow all layers
    pub fn layers_mut(&mut self) -> &mut [Array2<f64>] {
        &mut self.layers
    }

    /// Iterate every scalar in layer order
    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.layers.iter().flat_map(|l| l.iter())
    }

    /// Index of the first layer holding a NaN or infinite value
    pub fn first_non_finite_layer(&self) -> Option<usize> {
        self.layers
            .iter()
            .position(|l| l.iter().any(|v| !v.is_finite()))
    }

    /// Multiply every element by `factor`
    pub fn scale_in_place(&mut self, factor: f64) {
        for layer in &mut self.layers {
            layer.mapv_inplace(|v| v * factor);
        }
    }

    /// Largest absolute value; NaN if any element is NaN
    pub fn max_abs(&self) -> f64 {
        self.iter().fold(0.0, |acc: f64, &v| {
            if acc.is_nan() || v.is_nan() {
                f64::NAN
            } else {
                acc.max(v.abs())
            }
        })
    }

    /// Global L1 norm across all layers.
    ///
    /// Accumulated relative to `max_abs` so large finite values do not
    /// overflow before the final multiply.
    pub fn l1_norm(&self) -> f64 {
        let max = self.max_abs();
        if max == 0.0 || !max.is_finite() {
            return max;
        }
        max * self.iter().map(|v| v.abs() / max).sum::<f64>()
    }

    /// Global L2 norm across all layers, scaled like [`ParamSet::l1_norm`]
    pub fn l2_norm(&self) -> f64 {
        let max = self.max_abs();
        if max == 0.0 || !max.is_finite() {
            return max;
        }
        let sum: f64 = self
            .iter()
            .map(|v| {
                let s = v / max;
                s * s
            })
            .sum();
        max * sum.sqrt()
    }
}

/// Fail unless `a` and `b` have identical layer shapes.
///
/// The error names the first layer that differs.
pub fn ensure_same_shape(a: &[Shape], b: &[Shape]) -> Result<()> {
    if a.len() != b.len() {
        return Err(RlError::dimension_mismatch(
            format!("{} layers", a.len()),
            format!("{} layers", b.len()),
        ));
    }
    for (idx, (sa, sb)) in a.iter().zip(b).enumerate() {
        if sa != sb {
            return Err(RlError::dimension_mismatch(
                format!("layer {idx} shape {sa:?}"),
                format!("{sb:?}"),
            ));
        }
    }
    Ok(())
}
