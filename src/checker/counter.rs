//! Cross-worker consistency check for strong counters
//!
//! The union of all values returned by successful mutating calls must
//! contain no duplicates and, sorted in the direction of `delta`, every
//! value must be exactly `delta` away from the one before it.

use std::collections::HashMap;

use super::history::{CounterHistory, Observation};

/// Result of a counter consistency check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    /// Whether the history is consistent
    pub is_consistent: bool,
    /// Number of values examined
    pub checked: usize,
    /// Description of the first violation found
    pub error: Option<String>,
}

impl CheckResult {
    fn consistent(checked: usize) -> Self {
        CheckResult {
            is_consistent: true,
            checked,
            error: None,
        }
    }

    fn inconsistent(checked: usize, reason: String) -> Self {
        CheckResult {
            is_consistent: false,
            checked,
            error: Some(reason),
        }
    }
}

/// Gapless, duplicate-free history checker
pub struct CounterChecker;

impl CounterChecker {
    /// Check the history for duplicates and skipped values
    ///
    /// An empty history is consistent: a stage that issued no successful
    /// calls has nothing to contradict.
    pub fn check(history: &CounterHistory, delta: i64) -> CheckResult {
        let checked = history.len();
        if delta == 0 {
            return CheckResult::inconsistent(checked, "counter delta must not be 0".to_string());
        }

        let mut seen: HashMap<i64, Observation> = HashMap::with_capacity(checked);
        for observation in history.observations() {
            if let Some(first) = seen.insert(observation.value, observation) {
                return CheckResult::inconsistent(
                    checked,
                    format!(
                        "Inconsistent counter! The value {} returned to worker {} stressor {} was already returned to worker {} stressor {}",
                        observation.value,
                        observation.worker_index,
                        observation.stressor_index,
                        first.worker_index,
                        first.stressor_index
                    ),
                );
            }
        }

        let mut values: Vec<i64> = seen.into_keys().collect();
        values.sort_unstable();
        if delta < 0 {
            values.reverse();
        }

        for pair in values.windows(2) {
            let expected = pair[0].wrapping_add(delta);
            if pair[1] != expected {
                return CheckResult::inconsistent(
                    checked,
                    format!(
                        "The value {} skipped by the counter! Current value: {}",
                        expected, pair[1]
                    ),
                );
            }
        }

        CheckResult::consistent(checked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::ValueSequence;

    fn history(sequences: &[&[i64]]) -> CounterHistory {
        let mut history = CounterHistory::new();
        for (i, values) in sequences.iter().enumerate() {
            history.add(ValueSequence::new(i % 2, i, values.to_vec()));
        }
        history
    }

    #[test]
    fn test_interleaved_increments_are_consistent() {
        let result = CounterChecker::check(&history(&[&[1, 4, 5], &[2, 3, 6]]), 1);
        assert!(result.is_consistent, "{:?}", result.error);
        assert_eq!(result.checked, 6);
    }

    #[test]
    fn test_duplicate_detected() {
        let result = CounterChecker::check(&history(&[&[1, 2], &[2, 3]]), 1);
        assert!(!result.is_consistent);
        let error = result.error.unwrap();
        assert!(error.contains("The value 2"), "{}", error);
        assert!(error.contains("already returned"), "{}", error);
    }

    #[test]
    fn test_skipped_value_detected() {
        let result = CounterChecker::check(&history(&[&[1, 2], &[4, 5]]), 1);
        assert!(!result.is_consistent);
        assert_eq!(
            result.error.as_deref(),
            Some("The value 3 skipped by the counter! Current value: 4")
        );
    }

    #[test]
    fn test_negative_delta_sorts_descending() {
        let result = CounterChecker::check(&history(&[&[-1, -3], &[-2, -4]]), -1);
        assert!(result.is_consistent, "{:?}", result.error);

        let result = CounterChecker::check(&history(&[&[-2, -4], &[-6]]), -2);
        assert!(result.is_consistent, "{:?}", result.error);

        let result = CounterChecker::check(&history(&[&[-2, -8]]), -2);
        assert!(!result.is_consistent);
    }

    #[test]
    fn test_empty_history_is_consistent() {
        let result = CounterChecker::check(&CounterHistory::new(), 1);
        assert!(result.is_consistent);
        assert_eq!(result.checked, 0);
    }
}
