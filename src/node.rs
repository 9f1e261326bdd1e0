//! Reclaimable nodes: the unit of memory the epoch domain defers and frees.
//!
//! Every allocation handed to a [`HazardDomain`](crate::HazardDomain) starts
//! with a [`NodeHeader`]. The header carries the retirement version stamped at
//! enqueue time, the intrusive link used while the node sits on a waiting
//! list, and a destroy function that runs the retire hook and releases the
//! storage. Dispatch goes through that single function pointer, so the domain
//! never needs to know the concrete node type.

use core::ptr::{self, NonNull};

/// Hook invoked exactly once, immediately before a retired node's storage is
/// released.
///
/// Implementations use it to clear logical payload so that a stale reference
/// inspected after the fact can never look like valid data. The node must not
/// be touched again after the hook returns.
pub trait Reclaim: Send {
    fn retire(&mut self);
}

/// Version value meaning "not stamped yet" (headers) or "not observing"
/// (epoch records).
pub(crate) const NO_VERSION: u64 = u64::MAX;

/// Intrusive header that must sit at offset zero of every reclaimable
/// allocation.
///
/// The `next` link is meaningful only while the node is queued on a waiting
/// list; outside of one its value is unspecified. A node is enqueued at most
/// once and destroyed at most once.
#[repr(C)]
pub struct NodeHeader {
    version: u64,
    next: *mut NodeHeader,
    destroy: unsafe fn(NonNull<NodeHeader>),
}

unsafe impl Send for NodeHeader {}

impl NodeHeader {
    /// Creates a header whose `destroy` function runs the retire hook and
    /// frees the containing allocation.
    ///
    /// `destroy` receives the pointer that was handed to the domain, so the
    /// containing type must be `#[repr(C)]` with the header as its first
    /// field (or otherwise able to recover the allocation from the header
    /// address).
    pub const fn new(destroy: unsafe fn(NonNull<NodeHeader>)) -> Self {
        Self {
            version: NO_VERSION,
            next: ptr::null_mut(),
            destroy,
        }
    }

    pub(crate) fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub(crate) fn next(&self) -> *mut NodeHeader {
        self.next
    }

    pub(crate) fn set_next(&mut self, next: *mut NodeHeader) {
        self.next = next;
    }

    /// Runs the retire hook and releases the node's storage.
    ///
    /// # Safety
    ///
    /// `node` must point to a live reclaimable allocation that no thread can
    /// still reach. It must not be used afterwards.
    pub(crate) unsafe fn destroy(node: NonNull<NodeHeader>) {
        let destroy = unsafe { node.as_ref().destroy };
        unsafe { destroy(node) }
    }
}

/// A chain of nodes drained off a waiting list in one atomic swap.
///
/// Exactly one thread ever owns a given chain: whoever performed the swap.
/// The chain is consumed either by destroying its nodes or by splicing it
/// onto a receiving record's waiting list.
pub(crate) struct DrainedChain {
    head: *mut NodeHeader,
    tail: *mut NodeHeader,
    len: i64,
}

impl DrainedChain {
    pub(crate) fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            len: 0,
        }
    }

    pub(crate) fn push(&mut self, mut node: NonNull<NodeHeader>) {
        unsafe { node.as_mut().set_next(self.head) };
        if self.head.is_null() {
            self.tail = node.as_ptr();
        }
        self.head = node.as_ptr();
        self.len += 1;
    }

    pub(crate) fn len(&self) -> i64 {
        self.len
    }

    /// Decomposes the chain into `(head, tail, len)`, or `None` if empty.
    pub(crate) fn into_parts(self) -> Option<(NonNull<NodeHeader>, NonNull<NodeHeader>, i64)> {
        let head = NonNull::new(self.head)?;
        // tail is non-null whenever head is
        let tail = NonNull::new(self.tail)?;
        Some((head, tail, self.len))
    }
}

/// Owned wrapper for callers using a [`HazardDomain`](crate::HazardDomain)
/// directly, without an intrusive structure of their own.
#[repr(C)]
pub struct ReclaimNode<T: Reclaim> {
    header: NodeHeader,
    value: T,
}

impl<T: Reclaim> ReclaimNode<T> {
    /// Heap-allocates `value` behind a reclaimable header.
    ///
    /// The returned pointer is owned by the caller until it is handed to
    /// [`HazardDomain::add_node`](crate::HazardDomain::add_node), which takes
    /// over destruction.
    pub fn allocate(value: T) -> NonNull<NodeHeader> {
        let node = Box::new(Self {
            header: NodeHeader::new(Self::destroy),
            value,
        });
        // repr(C): the header sits at offset zero.
        unsafe { NonNull::new_unchecked(Box::into_raw(node).cast::<NodeHeader>()) }
    }

    unsafe fn destroy(node: NonNull<NodeHeader>) {
        let mut node = unsafe { Box::from_raw(node.as_ptr().cast::<Self>()) };
        node.value.retire();
    }
}
