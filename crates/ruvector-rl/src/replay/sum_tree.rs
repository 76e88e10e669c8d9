//! Binary sum-tree over slot priorities.
//!
//! Layout: a flat array of length `2T` where `T` is the smallest power of two
//! not below the capacity. Leaves live at `[T, 2T)`, node `k` has children
//! `2k` and `2k + 1`, and the root at index 1 holds the total mass. Index 0 is
//! unused.
//!
//! Every leaf write recomputes its ancestors from their children before
//! returning, so `tree[k] == tree[2k] + tree[2k + 1]` holds bit-for-bit at
//! all times.

use tracing::trace;

/// Sum-tree of non-negative priorities
#[derive(Debug, Clone, PartialEq)]
pub struct SumTree {
    nodes: Vec<f64>,
    leaves: usize,
    capacity: usize,
}

impl SumTree {
    /// Tree with `capacity` zero-priority slots
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "sum-tree capacity must be positive");
        let leaves = capacity.next_power_of_two();
        Self {
            nodes: vec![0.0; 2 * leaves],
            leaves,
            capacity,
        }
    }

    /// Number of addressable slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of leaves (power of two)
    pub fn leaf_count(&self) -> usize {
        self.leaves
    }

    /// Total mass held at the root
    pub fn total(&self) -> f64 {
        self.nodes[1]
    }

    /// Priority stored at `slot`
    pub fn get(&self, slot: usize) -> f64 {
        debug_assert!(slot < self.capacity, "slot {slot} out of range");
        self.nodes[self.leaves + slot]
    }

    /// Write `priority` at `slot` and propagate to the root.
    pub fn update(&mut self, slot: usize, priority: f64) {
        debug_assert!(slot < self.capacity, "slot {slot} out of range");
        debug_assert!(
            priority.is_finite() && priority >= 0.0,
            "priority must be finite and non-negative, got {priority}"
        );

        let mut idx = self.leaves + slot;
        self.nodes[idx] = priority;
        while idx > 1 {
            idx /= 2;
            self.nodes[idx] = self.nodes[2 * idx] + self.nodes[2 * idx + 1];
        }
        trace!(slot, priority, total = self.nodes[1], "sum-tree update");
    }

    /// Locate the slot whose cumulative-mass interval contains `mass`.
    ///
    /// Descends from the root: go left when `mass` is below the left
    /// subtree's sum, otherwise subtract it and go right. A subtree with zero
    /// mass is never entered, so rounding at the upper edge cannot land on an
    /// empty slot as long as the total is positive.
    pub fn find(&self, mass: f64) -> usize {
        let mut mass = mass.max(0.0);
        let mut idx = 1;
        while idx < self.leaves {
            let left = 2 * idx;
            let right = left + 1;
            if mass < self.nodes[left] || self.nodes[right] <= 0.0 {
                idx = left;
            } else {
                mass -= self.nodes[left];
                idx = right;
            }
        }
        idx - self.leaves
    }

    /// Largest priority over all addressable slots
    pub fn max_leaf(&self) -> f64 {
        self.leaf_slice(self.capacity).iter().copied().fold(0.0, f64::max)
    }

    /// Smallest priority among the first `occupied` slots
    pub fn min_leaf(&self, occupied: usize) -> Option<f64> {
        self.leaf_slice(occupied.min(self.capacity))
            .iter()
            .copied()
            .reduce(f64::min)
    }

    fn leaf_slice(&self, n: usize) -> &[f64] {
        &self.nodes[self.leaves..self.leaves + n]
    }

    /// Reset every slot to zero
    pub fn clear(&mut self) {
        self.nodes.iter_mut().for_each(|n| *n = 0.0);
    }

    /// First internal node whose value differs from the sum of its children
    pub fn check_consistency(&self) -> Option<usize> {
        (1..self.leaves).find(|&k| self.nodes[k] != self.nodes[2 * k] + self.nodes[2 * k + 1])
    }
}
