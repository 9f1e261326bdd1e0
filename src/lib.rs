//! Epoch-based safe memory reclamation with a lock-free stack built on it.
//!
//! The core is a [`HazardDomain`]: a process-local coordinator that tracks,
//! per thread, which logical version of the shared structure the thread is
//! currently observing. Removed nodes are stamped with the version in effect
//! when they were unlinked and parked on per-thread waiting lists; a periodic
//! sweep computes the minimum version still observed by anyone and destroys
//! only nodes retired strictly before it. [`LockFreeStack`] is the canonical
//! consumer: push needs no protection, pop wraps its unlink in a
//! [`VersionHandle`] and defers the node to the domain.
//!
//! Handles are strictly thread-owned. Releasing one from the wrong thread is
//! a caller bug that would silently break the reclamation invariant, so it
//! aborts the process instead of being recovered.

pub mod domain;
pub mod error;
pub mod node;
pub mod stack;

mod record;
mod sync;

pub use domain::{DomainConfig, DomainStats, HazardDomain};
pub use error::{HazardError, HazardResult};
pub use node::{NodeHeader, Reclaim, ReclaimNode};
pub use record::VersionHandle;
pub use stack::LockFreeStack;
