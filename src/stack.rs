//! A lock-free LIFO built on the epoch domain.
//!
//! Push links a fresh node with a CAS loop and never touches the domain.
//! Pop runs its unlink inside a protected section and hands the unlinked
//! node to the domain instead of freeing it, which is exactly what makes a
//! concurrent pop that already read the old head safe: the memory outlives
//! every thread that could still be dereferencing it.

use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use std::sync::Arc;

use portable_atomic::{AtomicPtr, Ordering};

use crate::domain::HazardDomain;
use crate::error::HazardResult;
use crate::node::NodeHeader;
use crate::sync::CachePadded;

#[repr(C)]
struct LifoNode<T> {
    /// Reclamation header; its link is used only on waiting lists.
    header: NodeHeader,
    /// Stack link, live while the node is reachable from `head`.
    link: AtomicPtr<LifoNode<T>>,
    value: Option<T>,
}

impl<T: Send> LifoNode<T> {
    fn allocate(value: T) -> *mut LifoNode<T> {
        Box::into_raw(Box::new(Self {
            header: NodeHeader::new(Self::destroy),
            link: AtomicPtr::new(ptr::null_mut()),
            value: Some(value),
        }))
    }

    unsafe fn destroy(node: NonNull<NodeHeader>) {
        let mut node = unsafe { Box::from_raw(node.as_ptr().cast::<Self>()) };
        // Clear the payload before the storage goes away; a stale reader
        // must never see a plausible value.
        node.value = None;
    }
}

/// Lock-free stack with epoch-deferred node reclamation.
///
/// Values pushed from any thread, popped from any thread, LIFO among
/// linearized operations. The domain may be private to this stack or shared
/// with other structures via [`with_domain`](LockFreeStack::with_domain).
pub struct LockFreeStack<T> {
    domain: Arc<HazardDomain>,
    head: CachePadded<AtomicPtr<LifoNode<T>>>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for LockFreeStack<T> {}
unsafe impl<T: Send> Sync for LockFreeStack<T> {}

impl<T: Send> LockFreeStack<T> {
    /// Creates a stack owning a fresh default-configured domain.
    pub fn new() -> HazardResult<Self> {
        Ok(Self::with_domain(Arc::new(HazardDomain::new()?)))
    }

    /// Creates a stack on an existing shared domain.
    pub fn with_domain(domain: Arc<HazardDomain>) -> Self {
        Self {
            domain,
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            _marker: PhantomData,
        }
    }

    pub fn domain(&self) -> &Arc<HazardDomain> {
        &self.domain
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Pushes `value`. Nothing is freed on this path, so no protection is
    /// needed and it cannot fail.
    pub fn push(&self, value: T) {
        let node = LifoNode::allocate(value);
        let mut old = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).link.store(old, Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(old, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => old = actual,
            }
        }
    }

    /// Pops the most recently pushed value, `Ok(None)` when the stack is
    /// empty.
    ///
    /// Fails only when the calling thread cannot get an epoch record
    /// ([`HazardError::ThreadSlotsExhausted`](crate::HazardError)).
    pub fn pop(&self) -> HazardResult<Option<T>> {
        let handle = self.domain.acquire()?;

        let mut old = self.head.load(Ordering::Acquire);
        let unlinked = loop {
            let Some(node) = NonNull::new(old) else {
                break None;
            };
            // Protected dereference: the handle keeps `node` alive even if
            // another pop unlinks and retires it first.
            let next = unsafe { node.as_ref().link.load(Ordering::Acquire) };
            match self.head.compare_exchange_weak(
                old,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break Some(node),
                Err(actual) => old = actual,
            }
        };

        let value = unlinked.and_then(|node| {
            // Sole unlinker: taking the payload cannot race with anything
            // but atomic loads of the link field.
            let value = unsafe { (*node.as_ptr()).value.take() };
            // Cannot fail: the acquire above registered this thread's
            // record.
            let _ = unsafe { self.domain.add_node(node.cast::<NodeHeader>()) };
            value
        });

        self.domain.release(handle);
        Ok(value)
    }
}

impl<T> Drop for LockFreeStack<T> {
    fn drop(&mut self) {
        // Exclusive access: free whatever is still linked.
        let mut current = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        while !current.is_null() {
            let node = unsafe { Box::from_raw(current) };
            current = node.link.load(Ordering::Relaxed);
        }
    }
}
