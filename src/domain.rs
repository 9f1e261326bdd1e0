//! The reclamation coordinator: a bounded table of epoch records, a global
//! version counter, and the sweep machinery that decides when retired nodes
//! are safe to destroy.
//!
//! A node retired at version `v` may only be destroyed once the minimum
//! version held across all outstanding handles is strictly greater than `v`.
//! Any thread that could still dereference the node has been inside a
//! protected section since before the retirement, so its held version is at
//! most `v` and holds the horizon back until it releases.

use core::ptr::{self, NonNull};
use std::time::{Duration, Instant};

use portable_atomic::{AtomicI64, AtomicPtr, AtomicU64, Ordering};

use crate::error::{HazardError, HazardResult};
use crate::node::{NodeHeader, NO_VERSION};
use crate::record::{EpochRecord, VersionHandle};
use crate::sync::{current_thread_slot, CachePadded};

/// Tuning knobs for a [`HazardDomain`]. All values are fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct DomainConfig {
    /// Number of epoch record slots. A slot binds permanently to the first
    /// thread that uses it; threads beyond this count get
    /// [`HazardError::ThreadSlotsExhausted`].
    pub max_threads: usize,
    /// Per-record backlog that triggers a local sweep on release.
    pub waiting_threshold: i64,
    /// How long a computed minimum version may be served from cache.
    pub min_version_cache_window: Duration,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            max_threads: 1024,
            waiting_threshold: 64,
            min_version_cache_window: Duration::from_millis(200),
        }
    }
}

/// Point-in-time counters for a domain.
#[derive(Debug, Clone, Copy)]
pub struct DomainStats {
    /// Threads that have registered an epoch record.
    pub registered_threads: i64,
    /// Retired nodes currently waiting across all records.
    pub waiting_nodes: i64,
    /// Nodes destroyed by domain-triggered sweeps so far.
    pub destroyed_nodes: u64,
}

/// Process-local epoch domain shared by the structures built on it.
pub struct HazardDomain {
    waiting_threshold: i64,
    cache_window_micros: u64,
    started: Instant,
    global_version: CachePadded<AtomicU64>,
    /// One slot per distinct calling thread, allocated once, never recycled.
    records: Box<[EpochRecord]>,
    /// Lock-free list of records that have registered, for sweeps to scan.
    registry: AtomicPtr<EpochRecord>,
    registered: AtomicI64,
    waiting: CachePadded<AtomicI64>,
    cached_min_version: CachePadded<AtomicU64>,
    /// Microseconds since `started` when the cache was last filled; 0 means
    /// never.
    cached_min_stamp: CachePadded<AtomicU64>,
    destroyed: CachePadded<AtomicU64>,
}

impl HazardDomain {
    pub fn new() -> HazardResult<Self> {
        Self::with_config(DomainConfig::default())
    }

    pub fn with_config(config: DomainConfig) -> HazardResult<Self> {
        assert!(
            config.max_threads >= 1 && config.max_threads <= u16::MAX as usize + 1,
            "max_threads must fit the 16-bit slot id space"
        );
        let mut records = Vec::new();
        records
            .try_reserve_exact(config.max_threads)
            .map_err(|_| HazardError::AllocationFailed)?;
        records.extend((0..config.max_threads).map(|slot| EpochRecord::new(slot as u16)));

        Ok(Self {
            waiting_threshold: config.waiting_threshold,
            cache_window_micros: config.min_version_cache_window.as_micros() as u64,
            started: Instant::now(),
            global_version: CachePadded::new(AtomicU64::new(0)),
            records: records.into_boxed_slice(),
            registry: AtomicPtr::new(ptr::null_mut()),
            registered: AtomicI64::new(0),
            waiting: CachePadded::new(AtomicI64::new(0)),
            cached_min_version: CachePadded::new(AtomicU64::new(0)),
            cached_min_stamp: CachePadded::new(AtomicU64::new(0)),
            destroyed: CachePadded::new(AtomicU64::new(0)),
        })
    }

    /// Number of thread slots this domain was built with.
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Captures a consistent snapshot of the global version and starts
    /// protecting it.
    ///
    /// Retries when the global version advances between the read and the
    /// local publish; that handle would describe an already-stale version.
    pub fn acquire(&self) -> HazardResult<VersionHandle> {
        let record = self.record_for_current_thread()?;
        loop {
            let version = self.global_version.load(Ordering::SeqCst);
            let handle = record.acquire(version)?;
            if self.global_version.load(Ordering::SeqCst) != version {
                record.release(handle);
                continue;
            }
            return Ok(handle);
        }
    }

    /// Stops protecting and, when backlogs warrant it, sweeps.
    pub fn release(&self, handle: VersionHandle) {
        let slot = handle.slot as usize;
        if slot >= self.records.len() {
            tracing::error!(slot, "release with out-of-range slot, dropping handle");
            return;
        }
        let record = &self.records[slot];
        record.release(handle);

        if record.waiting_count() > self.waiting_threshold {
            let horizon = self.min_version(false);
            let destroyed = record.sweep(horizon, record);
            self.note_destroyed(destroyed);
        } else if self.waiting.load(Ordering::Acquire)
            > self.waiting_threshold * self.registered.load(Ordering::Acquire)
        {
            // Cannot fail here: this thread holds a record already.
            let _ = self.sweep();
        }
    }

    /// Tags `node` with the next retirement version and queues it on the
    /// calling thread's record for deferred destruction.
    ///
    /// # Safety
    ///
    /// `node` must point to a live allocation fronted by a [`NodeHeader`]
    /// whose destroy function releases it, must not already have been handed
    /// to a domain, and must no longer be reachable by threads that have not
    /// yet observed its removal. The domain owns the node from here on.
    pub unsafe fn add_node(&self, node: NonNull<NodeHeader>) -> HazardResult<()> {
        let record = self.record_for_current_thread()?;
        // Pre-increment value: every retirement gets a unique version no
        // future acquire can observe as current.
        let version = self.global_version.fetch_add(1, Ordering::SeqCst);
        record.add_node(version, node);
        self.waiting.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Global sweep: recomputes the horizon and sweeps every registered
    /// record, relocating not-yet-eligible nodes from other threads onto the
    /// calling thread's record. Returns the number of nodes destroyed.
    pub fn sweep(&self) -> HazardResult<i64> {
        let record = self.record_for_current_thread()?;
        let horizon = self.min_version(true);

        let mut total = record.sweep(horizon, record);
        self.note_destroyed(total);

        let mut current = self.registry.load(Ordering::Acquire);
        while !current.is_null() {
            let other = unsafe { &*current };
            if !ptr::eq(other, record) {
                let destroyed = other.sweep(horizon, record);
                self.note_destroyed(destroyed);
                total += destroyed;
            }
            current = other.registry_next().load(Ordering::Acquire);
        }
        Ok(total)
    }

    /// Retired nodes currently waiting for the horizon to pass them.
    pub fn waiting_count(&self) -> i64 {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> DomainStats {
        DomainStats {
            registered_threads: self.registered.load(Ordering::Acquire),
            waiting_nodes: self.waiting.load(Ordering::Acquire),
            destroyed_nodes: self.destroyed.load(Ordering::Acquire),
        }
    }

    /// The reclamation horizon: minimum held version across registered
    /// records, served from cache when fresh enough.
    fn min_version(&self, force_flush: bool) -> u64 {
        let now = self.elapsed_micros();
        if !force_flush {
            let stamp = self.cached_min_stamp.load(Ordering::Acquire);
            if stamp != 0 && now < stamp.saturating_add(self.cache_window_micros) {
                return self.cached_min_version.load(Ordering::Acquire);
            }
        }

        let mut min = NO_VERSION;
        let mut current = self.registry.load(Ordering::Acquire);
        while !current.is_null() {
            let record = unsafe { &*current };
            min = min.min(record.held_version());
            current = record.registry_next().load(Ordering::Acquire);
        }
        if min == NO_VERSION {
            // Nothing is protected; the global version bounds every
            // outstanding retirement and, unlike the sentinel, keeps
            // advancing past the idempotence check.
            min = self.global_version.load(Ordering::SeqCst);
        }

        self.cached_min_version.store(min, Ordering::Release);
        self.cached_min_stamp.store(now.max(1), Ordering::Release);
        min
    }

    /// Maps the calling thread to its slot, registering the record on first
    /// use.
    fn record_for_current_thread(&self) -> HazardResult<&EpochRecord> {
        let slot = current_thread_slot();
        if slot >= self.records.len() {
            tracing::error!(
                thread_slot = slot,
                capacity = self.records.len(),
                "thread slot table exhausted"
            );
            return Err(HazardError::ThreadSlotsExhausted);
        }

        let record = &self.records[slot];
        if !record.enabled() {
            // Only this thread ever reaches this slot, so the check cannot
            // race with itself.
            record.set_enabled();
            let record_ptr = record as *const EpochRecord as *mut EpochRecord;
            let mut head = self.registry.load(Ordering::Relaxed);
            loop {
                record.registry_next().store(head, Ordering::Relaxed);
                match self.registry.compare_exchange_weak(
                    head,
                    record_ptr,
                    Ordering::Release,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(actual) => head = actual,
                }
            }
            let registered = self.registered.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::debug!(slot = record.slot(), registered, "registered epoch record");
        }
        Ok(record)
    }

    fn note_destroyed(&self, destroyed: i64) {
        if destroyed > 0 {
            self.waiting.fetch_add(-destroyed, Ordering::AcqRel);
            self.destroyed.fetch_add(destroyed as u64, Ordering::AcqRel);
        }
    }

    fn elapsed_micros(&self) -> u64 {
        self.started.elapsed().as_micros() as u64
    }
}
