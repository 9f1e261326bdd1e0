//! Per-thread epoch records and the version handles they hand out.
//!
//! Each participating thread owns exactly one [`EpochRecord`] slot inside a
//! domain. The owning thread is the only writer of the record's held version
//! and the only pusher onto its waiting list; any thread may drain the
//! waiting list with a single atomic swap during a sweep. Cross-thread calls
//! to owner-only operations are caller bugs and abort the process, because
//! continuing could silently free a node that is still referenced.

use core::ptr::{self, NonNull};
use portable_atomic::{AtomicBool, AtomicI64, AtomicPtr, AtomicU32, AtomicU64, Ordering};

use crate::error::{HazardError, HazardResult};
use crate::node::{DrainedChain, NodeHeader, NO_VERSION};
use crate::sync::{current_thread_slot, CachePadded};

/// Proof that the calling thread is observing the structure as of some
/// global version.
///
/// Deliberately neither `Copy` nor `Clone`: a handle is created by one
/// acquire and consumed by exactly one matching release, on the same thread.
#[derive(Debug)]
pub struct VersionHandle {
    pub(crate) slot: u16,
    pub(crate) _reserved: u16,
    pub(crate) seq: u32,
}

/// One thread's slice of the reclamation protocol.
pub(crate) struct EpochRecord {
    enabled: AtomicBool,
    slot: u16,
    last_swept: AtomicU64,
    seq: AtomicU32,
    /// Version this thread is currently protecting; `NO_VERSION` when idle.
    held_version: CachePadded<AtomicU64>,
    /// Retired-but-not-destroyed nodes owned by this record.
    waiting_head: CachePadded<AtomicPtr<NodeHeader>>,
    /// May transiently go negative: the list and the counter are not updated
    /// as one atomic step.
    waiting_count: CachePadded<AtomicI64>,
    /// Link in the domain's registry of registered records.
    registry_next: CachePadded<AtomicPtr<EpochRecord>>,
}

impl EpochRecord {
    pub(crate) fn new(slot: u16) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            slot,
            last_swept: AtomicU64::new(0),
            seq: AtomicU32::new(0),
            held_version: CachePadded::new(AtomicU64::new(NO_VERSION)),
            waiting_head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            waiting_count: CachePadded::new(AtomicI64::new(0)),
            registry_next: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
        }
    }

    pub(crate) fn slot(&self) -> u16 {
        self.slot
    }

    pub(crate) fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub(crate) fn held_version(&self) -> u64 {
        self.held_version.load(Ordering::SeqCst)
    }

    pub(crate) fn waiting_count(&self) -> i64 {
        self.waiting_count.load(Ordering::Acquire)
    }

    pub(crate) fn registry_next(&self) -> &AtomicPtr<EpochRecord> {
        &self.registry_next
    }

    /// Starts protecting `version`. Owner thread only.
    pub(crate) fn acquire(&self, version: u64) -> HazardResult<VersionHandle> {
        self.assert_owner();
        if self.held_version.load(Ordering::Relaxed) != NO_VERSION {
            return Err(HazardError::HandleAlreadyAcquired);
        }
        // SeqCst: the horizon scan must never see this thread as idle once
        // it can observe anything the thread loads after this point.
        self.held_version.store(version, Ordering::SeqCst);
        Ok(VersionHandle {
            slot: self.slot,
            _reserved: 0,
            seq: self.seq.load(Ordering::Relaxed),
        })
    }

    /// Stops protecting and invalidates any stale handle. Owner thread only.
    pub(crate) fn release(&self, handle: VersionHandle) {
        self.assert_owner();
        if handle.slot != self.slot || handle.seq != self.seq.load(Ordering::Relaxed) {
            tracing::error!(
                handle_slot = handle.slot,
                handle_seq = handle.seq,
                record_slot = self.slot,
                "ignoring stale version handle"
            );
            return;
        }
        self.held_version.store(NO_VERSION, Ordering::SeqCst);
        self.seq.fetch_add(1, Ordering::Relaxed);
    }

    /// Stamps `node` with its retirement version and queues it. Owner thread
    /// only; the node must not already be on a waiting list.
    pub(crate) fn add_node(&self, version: u64, node: NonNull<NodeHeader>) {
        unsafe { (*node.as_ptr()).set_version(version) };
        self.push_chain(node, node, 1);
    }

    /// Destroys every waiting node retired strictly before `horizon` and
    /// moves the rest onto `receiver`'s waiting list. Returns the number
    /// destroyed.
    ///
    /// Safe to call from any thread when `receiver` is the caller's own
    /// record; sweeping a record into itself is owner-only.
    pub(crate) fn sweep(&self, horizon: u64, receiver: &EpochRecord) -> i64 {
        if ptr::eq(self, receiver) {
            self.assert_owner();
        }
        // Redundant sweeps at an unchanged horizon cannot free anything new.
        if self.last_swept.load(Ordering::Acquire) == horizon {
            return 0;
        }
        self.last_swept.store(horizon, Ordering::Release);

        let mut current = self.waiting_head.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut destroyed = 0i64;
        let mut kept = DrainedChain::new();
        while let Some(node) = NonNull::new(current) {
            current = unsafe { node.as_ref().next() };
            // Strict `<`: a node whose version equals a held snapshot could
            // still be referenced by that holder.
            if unsafe { node.as_ref().version() } < horizon {
                unsafe { NodeHeader::destroy(node) };
                destroyed += 1;
            } else {
                kept.push(node);
            }
        }

        let moved = kept.len();
        if let Some((head, tail, count)) = kept.into_parts() {
            receiver.push_chain(head, tail, count);
        }
        self.waiting_count
            .fetch_add(-(destroyed + moved), Ordering::AcqRel);

        tracing::trace!(
            slot = self.slot,
            receiver = receiver.slot,
            horizon,
            destroyed,
            moved,
            "swept epoch record"
        );
        destroyed
    }

    /// Lock-free push of an already-linked chain onto the waiting list.
    /// Owner thread only: receivers are always the calling thread's record.
    fn push_chain(&self, head: NonNull<NodeHeader>, tail: NonNull<NodeHeader>, count: i64) {
        self.assert_owner();
        let mut old = self.waiting_head.load(Ordering::Relaxed);
        loop {
            unsafe { (*tail.as_ptr()).set_next(old) };
            match self.waiting_head.compare_exchange_weak(
                old,
                head.as_ptr(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => old = actual,
            }
        }
        self.waiting_count.fetch_add(count, Ordering::AcqRel);
    }

    fn assert_owner(&self) {
        let current = current_thread_slot();
        if current != self.slot as usize {
            tracing::error!(
                record_slot = self.slot,
                thread_slot = current,
                "epoch record used from a thread that does not own it, aborting"
            );
            std::process::abort();
        }
    }
}

impl Drop for EpochRecord {
    fn drop(&mut self) {
        // Exclusive access: destroy whatever is still waiting, regardless of
        // version.
        let mut current = self.waiting_head.swap(ptr::null_mut(), Ordering::AcqRel);
        while let Some(node) = NonNull::new(current) {
            current = unsafe { node.as_ref().next() };
            unsafe { NodeHeader::destroy(node) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Reclaim, ReclaimNode};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct Counted(Arc<AtomicUsize>);

    impl Reclaim for Counted {
        fn retire(&mut self) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    fn owned_record() -> EpochRecord {
        EpochRecord::new(current_thread_slot() as u16)
    }

    fn counted_node(retired: &Arc<AtomicUsize>) -> NonNull<NodeHeader> {
        ReclaimNode::allocate(Counted(retired.clone()))
    }

    fn retired_count(retired: &Arc<AtomicUsize>) -> usize {
        retired.load(std::sync::atomic::Ordering::SeqCst)
    }

    #[test]
    fn second_acquire_without_release_fails() {
        let record = owned_record();
        let handle = record.acquire(7).unwrap();
        assert_eq!(
            record.acquire(8).unwrap_err(),
            HazardError::HandleAlreadyAcquired
        );
        record.release(handle);
        let handle = record.acquire(8).unwrap();
        record.release(handle);
    }

    #[test]
    fn release_advances_the_sequence() {
        let record = owned_record();
        let first = record.acquire(1).unwrap();
        let first_seq = first.seq;
        record.release(first);
        let second = record.acquire(2).unwrap();
        assert_eq!(second.seq, first_seq + 1);
        record.release(second);
    }

    #[test]
    fn held_version_visible_until_release() {
        let record = owned_record();
        assert_eq!(record.held_version(), NO_VERSION);
        let handle = record.acquire(42).unwrap();
        assert_eq!(record.held_version(), 42);
        record.release(handle);
        assert_eq!(record.held_version(), NO_VERSION);
    }

    #[test]
    fn sweep_destroys_only_below_the_horizon() {
        let retired = Arc::new(AtomicUsize::new(0));
        let record = owned_record();
        for version in 0..3 {
            record.add_node(version, counted_node(&retired));
        }
        assert_eq!(record.waiting_count(), 3);

        // Version 2 equals the horizon and must survive.
        let destroyed = record.sweep(2, &record);
        assert_eq!(destroyed, 2);
        assert_eq!(retired_count(&retired), 2);
        assert_eq!(record.waiting_count(), 1);

        let destroyed = record.sweep(10, &record);
        assert_eq!(destroyed, 1);
        assert_eq!(retired_count(&retired), 3);
        assert_eq!(record.waiting_count(), 0);
    }

    #[test]
    fn sweep_is_idempotent_at_the_same_horizon() {
        let retired = Arc::new(AtomicUsize::new(0));
        let record = owned_record();
        for version in 0..4 {
            record.add_node(version, counted_node(&retired));
        }

        assert_eq!(record.sweep(4, &record), 4);
        assert_eq!(retired_count(&retired), 4);

        // Same horizon again: no work, even if new nodes arrived meanwhile.
        record.add_node(5, counted_node(&retired));
        assert_eq!(record.sweep(4, &record), 0);
        assert_eq!(retired_count(&retired), 4);
        assert_eq!(record.waiting_count(), 1);
    }

    #[test]
    fn cross_record_sweep_moves_instead_of_destroying() {
        let retired = Arc::new(AtomicUsize::new(0));
        let source = owned_record();
        let receiver = owned_record();
        for version in 10..13 {
            source.add_node(version, counted_node(&retired));
        }

        let destroyed = source.sweep(5, &receiver);
        assert_eq!(destroyed, 0);
        assert_eq!(retired_count(&retired), 0);
        // The move conserves the total waiting count.
        assert_eq!(source.waiting_count(), 0);
        assert_eq!(receiver.waiting_count(), 3);
    }

    #[test]
    fn drop_destroys_leftover_nodes() {
        let retired = Arc::new(AtomicUsize::new(0));
        {
            let record = owned_record();
            for version in 0..6 {
                record.add_node(version, counted_node(&retired));
            }
        }
        assert_eq!(retired_count(&retired), 6);
    }
}
