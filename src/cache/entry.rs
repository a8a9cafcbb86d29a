//! Cache Entry Module
//!
//! Resident entries of the memory tier and the removal notices it hands back.

// == Cache Entry ==
/// A value resident in the memory tier together with its measured size.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    /// Size in bytes, measured once at insertion and never re-measured
    pub size: usize,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, size: usize) -> Self {
        Self { value, size }
    }
}

// == Removal Cause ==
/// Why an entry left the memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Removed by the store to get back under capacity
    Evicted,
    /// Overwritten by a `put` for the same key
    Replaced,
    /// Removed by the caller
    Explicit,
}

// == Removal ==
/// Notice of an entry leaving the memory tier.
///
/// Returned from every mutating call instead of being pushed through a
/// listener; the receiver owns `old_value` and decides what to do with it.
#[derive(Debug, Clone)]
pub struct Removal<V> {
    pub key: String,
    pub old_value: V,
    /// The value that took its place, only set for [`RemovalCause::Replaced`]
    pub new_value: Option<V>,
    pub cause: RemovalCause,
}

impl<V> Removal<V> {
    pub(crate) fn evicted(key: String, old_value: V) -> Self {
        Self {
            key,
            old_value,
            new_value: None,
            cause: RemovalCause::Evicted,
        }
    }

    pub(crate) fn replaced(key: String, old_value: V, new_value: V) -> Self {
        Self {
            key,
            old_value,
            new_value: Some(new_value),
            cause: RemovalCause::Replaced,
        }
    }

    pub(crate) fn explicit(key: String, old_value: V) -> Self {
        Self {
            key,
            old_value,
            new_value: None,
            cause: RemovalCause::Explicit,
        }
    }

    /// True when the store removed the entry on its own to satisfy capacity.
    pub fn is_eviction(&self) -> bool {
        self.cause == RemovalCause::Evicted
    }
}
