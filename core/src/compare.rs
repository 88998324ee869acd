//! Payload equality used by the cache to suppress redundant notifications.

/// Decides whether two payloads are interchangeable.
///
/// When the cache holds a payload equal to an incoming one, it keeps the old
/// allocation so downstream consumers can detect "unchanged" by identity.
pub trait DataComparator<T>: Send + Sync {
    /// Return `true` when `previous` and `next` are equivalent.
    fn equals(&self, previous: &T, next: &T) -> bool;
}

/// Structural equality via [`PartialEq`].
///
/// Total over every pair of values: mismatched shapes compare unequal rather
/// than failing.
///
/// # Examples
///
/// ```
/// use observable_request_core::compare::{DataComparator, DeepEquality};
/// use serde_json::json;
///
/// assert!(DeepEquality.equals(&json!({ "a": [1, 2] }), &json!({ "a": [1, 2] })));
/// assert!(!DeepEquality.equals(&json!("1"), &json!(1)));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DeepEquality;

impl<T: PartialEq> DataComparator<T> for DeepEquality {
    fn equals(&self, previous: &T, next: &T) -> bool {
        previous == next
    }
}

impl<T, F> DataComparator<T> for F
where
    F: Fn(&T, &T) -> bool + Send + Sync,
{
    fn equals(&self, previous: &T, next: &T) -> bool {
        self(previous, next)
    }
}
