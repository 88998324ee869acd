//! Request lifecycle state.
//!
//! A [`RequestState`] is the externally visible snapshot of one logical
//! request. Payload and error are held behind `Arc` so that snapshots are cheap
//! to clone into every subscriber, and so that "the same payload" can be told
//! apart from "an equal payload" ([`Arc::ptr_eq`]).
//!
//! # State machine
//!
//! ```text
//! idle ──▶ in-progress ──▶ succeeded
//!               ▲     └──▶ failed
//!               └──────────────┘  (refetch)
//! ```

use crate::error::ApiError;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// State of a request whose payload is decoded JSON.
pub type ApiState = RequestState<serde_json::Value, ApiError>;

/// Lifecycle snapshot for one logical request.
///
/// Invariants upheld by the orchestrator:
/// - `loading && completed` is never true on the same snapshot
/// - `called` never goes back to `false` for a key
#[derive(Debug)]
pub struct RequestState<T, E = ApiError> {
    /// Last successfully retrieved payload
    pub data: Option<Arc<T>>,
    /// Last error payload
    pub error: Option<Arc<E>>,
    /// A call is outstanding
    pub loading: bool,
    /// A call has been initiated at least once
    pub called: bool,
    /// A call has reached a terminal state at least once
    pub completed: bool,
}

/// Coarse phase derived from the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// Nothing has been called yet
    Idle,
    /// A call is outstanding
    InProgress,
    /// The last call settled with data
    Succeeded,
    /// The last call settled with an error
    Failed,
}

impl<T, E> RequestState<T, E> {
    /// Nothing called yet.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            data: None,
            error: None,
            loading: false,
            called: false,
            completed: false,
        }
    }

    /// The "call outstanding" state with no payload.
    ///
    /// This is also the base the cache merges onto when a key has no entry.
    #[must_use]
    pub const fn in_progress() -> Self {
        Self {
            data: None,
            error: None,
            loading: true,
            called: true,
            completed: false,
        }
    }

    /// Terminal success carrying `data` and no error.
    #[must_use]
    pub fn succeeded(data: T) -> Self {
        Self::succeeded_shared(Arc::new(data))
    }

    /// Terminal success reusing an already shared payload.
    #[must_use]
    pub const fn succeeded_shared(data: Arc<T>) -> Self {
        Self {
            data: Some(data),
            error: None,
            loading: false,
            called: true,
            completed: true,
        }
    }

    /// Derive the coarse phase from the flags.
    #[must_use]
    pub const fn phase(&self) -> RequestPhase {
        if self.loading {
            RequestPhase::InProgress
        } else if !self.called {
            RequestPhase::Idle
        } else if self.error.is_some() {
            RequestPhase::Failed
        } else {
            RequestPhase::Succeeded
        }
    }

    /// Borrow the payload
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        self.data.as_deref()
    }

    /// Borrow the error
    #[must_use]
    pub fn error(&self) -> Option<&E> {
        self.error.as_deref()
    }

    /// Compare `error`, `loading`, `called` and `completed` with another
    /// snapshot. Errors match only when both are absent or both point to the
    /// same allocation.
    #[must_use]
    pub fn same_flags(&self, other: &Self) -> bool {
        let same_error = match (&self.error, &other.error) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        same_error
            && self.loading == other.loading
            && self.called == other.called
            && self.completed == other.completed
    }
}

impl<E> RequestState<serde_json::Value, E> {
    /// Decode the JSON payload into a typed view.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the payload does not match `U`.
    pub fn decode<U: DeserializeOwned>(&self) -> Result<Option<U>, serde_json::Error> {
        self.data
            .as_deref()
            .map(<U as serde::Deserialize>::deserialize)
            .transpose()
    }
}

impl<T, E> Clone for RequestState<T, E> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            error: self.error.clone(),
            loading: self.loading,
            called: self.called,
            completed: self.completed,
        }
    }
}

impl<T: PartialEq, E: PartialEq> PartialEq for RequestState<T, E> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
            && self.error == other.error
            && self.loading == other.loading
            && self.called == other.called
            && self.completed == other.completed
    }
}

impl<T, E> Default for RequestState<T, E> {
    fn default() -> Self {
        Self::idle()
    }
}

/// Partial update applied by [`merge`](StatePatch::apply).
///
/// `None` leaves a field untouched. For `data` and `error`, `Some(None)`
/// explicitly clears the field.
#[derive(Debug)]
pub struct StatePatch<T, E = ApiError> {
    /// Replacement payload
    pub data: Option<Option<Arc<T>>>,
    /// Replacement error
    pub error: Option<Option<Arc<E>>>,
    /// Replacement `loading` flag
    pub loading: Option<bool>,
    /// Replacement `called` flag
    pub called: Option<bool>,
    /// Replacement `completed` flag
    pub completed: Option<bool>,
}

impl<T, E> StatePatch<T, E> {
    /// A patch that changes nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            data: None,
            error: None,
            loading: None,
            called: None,
            completed: None,
        }
    }

    /// `loading: true, called: true, completed: false`, payload untouched.
    #[must_use]
    pub const fn in_progress() -> Self {
        Self {
            data: None,
            error: None,
            loading: Some(true),
            called: Some(true),
            completed: Some(false),
        }
    }

    /// `loading: false, called: true, completed: true`, payload untouched.
    #[must_use]
    pub const fn completed() -> Self {
        Self {
            data: None,
            error: None,
            loading: Some(false),
            called: Some(true),
            completed: Some(true),
        }
    }

    /// Terminal failure: completed flags plus `error`. The previous payload is kept.
    #[must_use]
    pub fn failed(error: E) -> Self {
        Self {
            error: Some(Some(Arc::new(error))),
            ..Self::completed()
        }
    }

    /// Builder: Set the payload
    #[must_use]
    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(Some(Arc::new(data)));
        self
    }

    /// Builder: Set the error
    #[must_use]
    pub fn with_error(mut self, error: E) -> Self {
        self.error = Some(Some(Arc::new(error)));
        self
    }

    /// Overlay this patch onto `base`.
    #[must_use]
    pub fn apply(self, base: RequestState<T, E>) -> RequestState<T, E> {
        RequestState {
            data: self.data.unwrap_or(base.data),
            error: self.error.unwrap_or(base.error),
            loading: self.loading.unwrap_or(base.loading),
            called: self.called.unwrap_or(base.called),
            completed: self.completed.unwrap_or(base.completed),
        }
    }
}

impl<T, E> Default for StatePatch<T, E> {
    fn default() -> Self {
        Self::empty()
    }
}
