//! History of counter values observed by stressors
//!
//! Every successful mutating counter call returns the value it produced.
//! Stressors keep those values in call order; workers ship them to the
//! coordinator which checks the union across the cluster.

use serde::{Deserialize, Serialize};

/// Values one stressor observed, in the order they were returned
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSequence {
    /// Worker that ran the stressor
    pub worker_index: usize,
    /// Cluster-wide stressor index
    pub stressor_index: usize,
    pub values: Vec<i64>,
}

impl ValueSequence {
    pub fn new(worker_index: usize, stressor_index: usize, values: Vec<i64>) -> Self {
        ValueSequence {
            worker_index,
            stressor_index,
            values,
        }
    }
}

/// Observed value of one counter call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Observation {
    pub value: i64,
    pub worker_index: usize,
    pub stressor_index: usize,
}

/// Collection of value sequences from a stage
#[derive(Clone, Debug, Default)]
pub struct CounterHistory {
    sequences: Vec<ValueSequence>,
}

impl CounterHistory {
    /// Create a new empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the sequence of one stressor
    pub fn add(&mut self, sequence: ValueSequence) {
        self.sequences.push(sequence);
    }

    pub fn extend(&mut self, sequences: impl IntoIterator<Item = ValueSequence>) {
        self.sequences.extend(sequences);
    }

    /// Every observation, sequence by sequence
    pub fn observations(&self) -> impl Iterator<Item = Observation> + '_ {
        self.sequences.iter().flat_map(|seq| {
            seq.values.iter().map(move |&value| Observation {
                value,
                worker_index: seq.worker_index,
                stressor_index: seq.stressor_index,
            })
        })
    }

    /// Total number of observed values
    pub fn len(&self) -> usize {
        self.sequences.iter().map(|s| s.values.len()).sum()
    }

    /// Check if no value was observed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observations_keep_origin() {
        let mut history = CounterHistory::new();
        assert!(history.is_empty());

        history.add(ValueSequence::new(0, 0, vec![1, 3]));
        history.add(ValueSequence::new(1, 5, vec![2]));
        history.add(ValueSequence::new(1, 6, vec![]));

        assert_eq!(history.len(), 3);
        let observed: Vec<_> = history.observations().collect();
        assert_eq!(
            observed[2],
            Observation {
                value: 2,
                worker_index: 1,
                stressor_index: 5
            }
        );
    }
}
