// Protocol-visible object identifiers.
//
// Every protocol-visible object carries a 64-bit unsigned identifier,
// unique within one process lifetime, assigned by the batch at
// request-creation time. Zero is the sentinel "none".
//
// We represent that invariant in the type itself: `Id` wraps a `NonZeroU64`
// so the "zero is none" rule is `Option<Id> == None` rather than an
// in-band magic value a caller could forget to check.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(NonZeroU64);

impl Id {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0.get())
    }
}

/// The process-wide 64-bit counter: the only global mutable state besides
/// the id assignment itself, a single thread-safe monotonically-increasing
/// counter. One `IdCounter` is owned by the `Context` (context.rs); batches
/// borrow it when their typed constructors assign an id to a create-action
/// request.
pub struct IdCounter {
    next: AtomicU64,
}

impl IdCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Assigns the next id. The assigned id of the k-th create request in
    /// a fresh process equals k, starting from 1.
    pub fn next(&self) -> Id {
        let raw = self.next.fetch_add(1, Ordering::SeqCst);
        Id(NonZeroU64::new(raw).expect("id counter wrapped past u64::MAX"))
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_increment() {
        let counter = IdCounter::new();
        assert_eq!(counter.next().get(), 1);
        assert_eq!(counter.next().get(), 2);
        assert_eq!(counter.next().get(), 3);
    }

    #[test]
    fn zero_is_not_constructible() {
        assert!(NonZeroU64::new(0).is_none());
    }
}
