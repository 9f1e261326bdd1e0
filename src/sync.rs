//! Small synchronization helpers shared across the crate.

use core::ops::Deref;
use portable_atomic::{AtomicUsize, Ordering};

/// Pads and aligns a value to a full cache line to avoid false sharing
/// between fields that are written by different threads.
#[derive(Debug, Default)]
#[repr(align(64))]
pub(crate) struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// Returns a small, stable identifier for the calling OS thread.
///
/// Identifiers are handed out from a process-wide monotonic counter the first
/// time a thread asks, and never reused. Epoch domains use this directly as
/// the index into their slot array, so a thread keeps the same slot in every
/// domain for the lifetime of the process.
pub(crate) fn current_thread_slot() -> usize {
    static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);
    thread_local! {
        static SLOT: usize = NEXT_SLOT.fetch_add(1, Ordering::Relaxed);
    }
    SLOT.with(|slot| *slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_is_stable_within_a_thread() {
        let first = current_thread_slot();
        let second = current_thread_slot();
        assert_eq!(first, second);
    }

    #[test]
    fn slots_differ_across_threads() {
        let mine = current_thread_slot();
        let other = std::thread::spawn(current_thread_slot).join().unwrap();
        assert_ne!(mine, other);
    }

    #[test]
    fn cache_padded_is_a_full_line() {
        assert!(core::mem::size_of::<CachePadded<u8>>() >= 64);
        assert_eq!(core::mem::align_of::<CachePadded<u64>>(), 64);
    }
}
