//! Tri-state result container.
//!
//! A cache lookup has three honest outcomes: "here is the value", "the value
//! is legitimately empty" and "I cannot answer". The first two are both
//! [`Optional::Present`] (an empty page is still a present page), the third is
//! [`Optional::Absent`]. Keeping this distinct from [`Option`] means the value
//! domain itself may contain `None`, empty collections or zero without being
//! mistaken for a cold cache.

/// A value that is either known to the cache or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "an Optional must be checked before the value is used"]
pub enum Optional<T> {
    /// The cache can answer, and this is the answer.
    Present(T),
    /// The cache cannot answer this query.
    Absent,
}

impl<T> Optional<T> {
    /// Wrap a known value.
    pub fn present(value: T) -> Self {
        Self::Present(value)
    }

    /// The "cannot answer" state.
    pub fn absent() -> Self {
        Self::Absent
    }

    /// `Present(value)` when `condition` holds, `Absent` otherwise.
    pub fn present_if(condition: bool, value: T) -> Self {
        if condition {
            Self::Present(value)
        } else {
            Self::Absent
        }
    }

    /// Returns true if a value is present.
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Returns true if the cache could not answer.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Borrow the wrapped value.
    pub fn as_ref(&self) -> Optional<&T> {
        match self {
            Self::Present(value) => Optional::Present(value),
            Self::Absent => Optional::Absent,
        }
    }

    /// Map the wrapped value, keeping `Absent` as is.
    pub fn map<U, F>(self, f: F) -> Optional<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Present(value) => Optional::Present(f(value)),
            Self::Absent => Optional::Absent,
        }
    }

    /// Keep the value only if it satisfies `predicate`.
    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: FnOnce(&T) -> bool,
    {
        match self {
            Self::Present(value) if predicate(&value) => Self::Present(value),
            _ => Self::Absent,
        }
    }

    /// Run `f` on the value if present, returning `self` for chaining.
    pub fn on_present<F>(self, f: F) -> Self
    where
        F: FnOnce(&T),
    {
        if let Self::Present(value) = &self {
            f(value);
        }
        self
    }

    /// Run `f` if absent, returning `self` for chaining.
    pub fn on_absent<F>(self, f: F) -> Self
    where
        F: FnOnce(),
    {
        if self.is_absent() {
            f();
        }
        self
    }

    /// Convert into a plain [`Option`], losing the tri-state meaning.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent => None,
        }
    }
}

impl<T> Default for Optional<T> {
    fn default() -> Self {
        Self::Absent
    }
}

/// `Some(v)` becomes `Present(v)`, `None` becomes `Absent`.
///
/// Only use this where `None` really means "not cached"; a point lookup in a
/// key-value cache store is the typical case.
impl<T> From<Option<T>> for Optional<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::Present(value),
            None => Self::Absent,
        }
    }
}
