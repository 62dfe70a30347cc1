//! Assertion helpers for test unit bodies.
//!
//! Every helper returns `Result<(), AssertionFailure>` so a body can use `?`
//! and the lifecycle can tell an assertion mismatch (`failed`) apart from
//! any other error (`error`) with a plain `match`.

use std::fmt::Debug;

use thiserror::Error;

/// A condition checked by a test body did not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AssertionFailure {
    pub message: String,
}

impl AssertionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type AssertResult = Result<(), AssertionFailure>;

/// Unconditional failure with a message.
pub fn fail(message: impl Into<String>) -> AssertResult {
    Err(AssertionFailure::new(message))
}

pub fn assert_true(condition: bool, message: impl Into<String>) -> AssertResult {
    if condition {
        Ok(())
    } else {
        fail(message)
    }
}

pub fn assert_false(condition: bool, message: impl Into<String>) -> AssertResult {
    assert_true(!condition, message)
}

/// Fails with `expected {expected:?} got {actual:?}` when the values differ.
pub fn assert_eq<T: PartialEq + Debug>(expected: T, actual: T) -> AssertResult {
    if expected == actual {
        Ok(())
    } else {
        fail(format!("expected {:?} got {:?}", expected, actual))
    }
}

pub fn assert_ne<T: PartialEq + Debug>(left: T, right: T) -> AssertResult {
    if left != right {
        Ok(())
    } else {
        fail(format!("expected values to differ, both were {:?}", left))
    }
}

pub fn assert_some<T>(value: &Option<T>, what: &str) -> AssertResult {
    assert_true(value.is_some(), format!("expected {} to be present", what))
}

pub fn assert_contains(haystack: &str, needle: &str) -> AssertResult {
    assert_true(
        haystack.contains(needle),
        format!("expected {:?} to contain {:?}", haystack, needle),
    )
}

/// `actual <= limit`.
pub fn assert_at_most(actual: f64, limit: f64, what: &str) -> AssertResult {
    assert_true(
        actual <= limit,
        format!("{} {:.3} exceeds limit {:.3}", what, actual, limit),
    )
}

/// `actual >= floor`.
pub fn assert_at_least(actual: f64, floor: f64, what: &str) -> AssertResult {
    assert_true(
        actual >= floor,
        format!("{} {:.3} is below minimum {:.3}", what, actual, floor),
    )
}

/// Inclusive range check.
pub fn assert_in_range(actual: f64, low: f64, high: f64, what: &str) -> AssertResult {
    assert_true(
        (low..=high).contains(&actual),
        format!("{} {:.3} outside [{:.3}, {:.3}]", what, actual, low, high),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_eq_message() {
        let err = assert_eq(2, 3).unwrap_err();
        assert_eq!(err.message, "expected 2 got 3");
        assert!(assert_eq("a", "a").is_ok());
    }

    #[test]
    fn test_threshold_helpers() {
        assert!(assert_at_most(1.0, 2.0, "latency").is_ok());
        let err = assert_at_most(3.0, 2.0, "latency").unwrap_err();
        assert!(err.message.contains("exceeds limit"));
        assert!(assert_at_least(500.0, 1000.0, "tps").is_err());
        assert!(assert_in_range(5.0, 1.0, 5.0, "x").is_ok());
        assert!(assert_in_range(5.1, 1.0, 5.0, "x").is_err());
    }

    #[test]
    fn test_contains_and_some() {
        assert!(assert_contains("hello world", "world").is_ok());
        assert!(assert_contains("hello", "bye").is_err());
        assert!(assert_some(&Some(1), "value").is_ok());
        assert!(assert_some::<u8>(&None, "value").is_err());
    }
}
