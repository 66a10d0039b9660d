//! Weighted random operation selection

use rand::Rng;

use super::operation::Operation;
use crate::error::{HarnessError, Result};

/// Immutable table of `(operation, weight)` pairs
///
/// Operation `i` is chosen with probability `weight_i / total`. The draw is a
/// uniform integer in `[0, total)` located by a cumulative scan in insertion
/// order. Entry `i` owns the half-open range `[start_i, end_i)`, so a draw
/// equal to a boundary belongs to the entry that starts there.
#[derive(Debug, Clone)]
pub struct OperationSelector {
    entries: Vec<(Operation, u32)>,
    /// cumulative[i] = sum of weights of entries 0..=i
    cumulative: Vec<u64>,
    total: u64,
}

/// Builder for [`OperationSelector`]
#[derive(Debug, Default)]
pub struct OperationSelectorBuilder {
    entries: Vec<(Operation, u32)>,
}

impl OperationSelectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation with the given weight
    ///
    /// Zero weights are accepted and skipped, so a configured ratio of 0
    /// simply disables that operation.
    pub fn add(mut self, operation: Operation, weight: u32) -> Self {
        self.entries.push((operation, weight));
        self
    }

    pub fn build(self) -> Result<OperationSelector> {
        let mut entries: Vec<(Operation, u32)> = Vec::with_capacity(self.entries.len());
        for (operation, weight) in self.entries {
            if entries.iter().any(|(existing, _)| *existing == operation) {
                return Err(HarnessError::InvalidSelector(format!(
                    "operation {} added twice",
                    operation
                )));
            }
            if weight > 0 {
                entries.push((operation, weight));
            }
        }

        if entries.is_empty() {
            return Err(HarnessError::InvalidSelector(
                "no operation has a positive weight".to_string(),
            ));
        }

        let mut cumulative = Vec::with_capacity(entries.len());
        let mut total = 0u64;
        for (_, weight) in &entries {
            total += u64::from(*weight);
            cumulative.push(total);
        }

        Ok(OperationSelector {
            entries,
            cumulative,
            total,
        })
    }
}

impl OperationSelector {
    pub fn builder() -> OperationSelectorBuilder {
        OperationSelectorBuilder::new()
    }

    /// Selector that always returns `operation`
    pub fn single(operation: Operation) -> Self {
        OperationSelector {
            entries: vec![(operation, 1)],
            cumulative: vec![1],
            total: 1,
        }
    }

    /// Choose the next operation using the caller's random stream
    pub fn next<R: Rng + ?Sized>(&self, rng: &mut R) -> Operation {
        if self.entries.len() == 1 {
            return self.entries[0].0;
        }
        let draw = rng.random_range(0..self.total);
        let index = self.cumulative.partition_point(|&bound| bound <= draw);
        self.entries[index].0
    }

    /// Operations with a positive weight, in insertion order
    pub fn operations(&self) -> impl Iterator<Item = Operation> + '_ {
        self.entries.iter().map(|(op, _)| *op)
    }

    /// Selection probability of `operation` (0 if absent)
    pub fn probability(&self, operation: Operation) -> f64 {
        self.entries
            .iter()
            .find(|(op, _)| *op == operation)
            .map(|(_, weight)| f64::from(*weight) / self.total as f64)
            .unwrap_or(0.0)
    }
}
