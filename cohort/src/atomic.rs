//! Tagged atomic pointers whose loads are scoped to a guard.
//!
//! `Atomic<T>` stores a pointer plus a small tag in a single `AtomicUsize`.
//! The tag lives in the low bits the pointee's alignment leaves unused.
//! Loads return a `Shared<'g, T>` which cannot outlive the [`Guard`] it was
//! loaded under.

use crate::guard::Guard;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Mask of the tag bits a `T` pointer leaves free.
#[inline]
const fn low_bits<T>() -> usize {
    core::mem::align_of::<T>() - 1
}

/// A pointer to a heap-allocated value with atomic operations and a tag.
///
/// A `T` aligned to `2^n` bytes leaves `n` tag bits.
///
/// # Examples
///
/// ```
/// use cohort::{Atomic, Collector};
/// use std::sync::atomic::Ordering;
///
/// let collector: Collector<()> = Collector::new();
/// let atomic = Atomic::new(Box::into_raw(Box::new(42u64)));
/// let guard = collector.pin();
/// let ptr = atomic.load(Ordering::Acquire, &guard);
/// assert!(!ptr.is_null());
/// ```
pub struct Atomic<T> {
    data: AtomicUsize,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Send + Sync> Send for Atomic<T> {}
unsafe impl<T: Send + Sync> Sync for Atomic<T> {}

impl<T> Atomic<T> {
    /// Creates a new atomic pointer.
    #[inline]
    pub fn new(ptr: *mut T) -> Self {
        debug_assert_eq!(ptr as usize & low_bits::<T>(), 0, "cohort: pointer not aligned");
        Self {
            data: AtomicUsize::new(ptr as usize),
            _marker: PhantomData,
        }
    }

    /// Creates a null atomic pointer.
    #[inline]
    pub fn null() -> Self {
        Self::new(ptr::null_mut())
    }

    /// Loads the pointer (and its tag) under `guard`.
    #[inline]
    pub fn load<'g>(&self, order: Ordering, _guard: &'g Guard<'_>) -> Shared<'g, T> {
        Shared::from_usize(self.data.load(order))
    }

    /// Stores a pointer (and its tag).
    #[inline]
    pub fn store(&self, new: Shared<'_, T>, order: Ordering) {
        self.data.store(new.data, order);
    }

    /// Compares and exchanges the pointer, tag included.
    #[inline]
    pub fn compare_exchange<'g>(
        &self,
        current: Shared<'_, T>,
        new: Shared<'_, T>,
        success: Ordering,
        failure: Ordering,
        _guard: &'g Guard<'_>,
    ) -> Result<Shared<'g, T>, Shared<'g, T>> {
        self.data
            .compare_exchange(current.data, new.data, success, failure)
            .map(Shared::from_usize)
            .map_err(Shared::from_usize)
    }

    /// Swaps the pointer with a new value.
    #[inline]
    pub fn swap<'g>(&self, new: Shared<'_, T>, order: Ordering, _guard: &'g Guard<'_>) -> Shared<'g, T> {
        Shared::from_usize(self.data.swap(new.data, order))
    }

    /// Returns the untagged pointer through exclusive access.
    ///
    /// No guard is needed: `&mut self` proves no concurrent access exists.
    #[inline]
    pub fn get_mut(&mut self) -> *mut T {
        (*self.data.get_mut() & !low_bits::<T>()) as *mut T
    }
}

impl<T> Default for Atomic<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> core::fmt::Debug for Atomic<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let raw = self.data.load(Ordering::Relaxed);
        f.debug_struct("Atomic")
            .field("ptr", &((raw & !low_bits::<T>()) as *const T))
            .field("tag", &(raw & low_bits::<T>()))
            .finish()
    }
}

/// A (possibly tagged) pointer protected by a guard.
///
/// # Safety
///
/// The pointee is only guaranteed to be alive while the guard is alive and
/// only if it was reachable when loaded. Dereferencing is `unsafe`.
pub struct Shared<'g, T> {
    data: usize,
    _marker: PhantomData<(&'g (), *const T)>,
}

impl<T> Clone for Shared<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Shared<'_, T> {}

impl<T> PartialEq for Shared<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl<T> Eq for Shared<'_, T> {}

impl<'g, T> Shared<'g, T> {
    #[inline]
    fn from_usize(data: usize) -> Self {
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// A null pointer with tag 0.
    #[inline]
    pub fn null() -> Self {
        Self::from_usize(0)
    }

    /// Wraps a raw pointer with tag 0.
    #[inline]
    pub fn from_raw(ptr: *const T) -> Self {
        debug_assert_eq!(ptr as usize & low_bits::<T>(), 0, "cohort: pointer not aligned");
        Self::from_usize(ptr as usize)
    }

    /// Whether the untagged pointer is null.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.data & !low_bits::<T>() == 0
    }

    /// The tag.
    #[inline]
    pub fn tag(&self) -> usize {
        self.data & low_bits::<T>()
    }

    /// The same pointer with its tag replaced.
    #[inline]
    pub fn with_tag(&self, tag: usize) -> Self {
        Self::from_usize((self.data & !low_bits::<T>()) | (tag & low_bits::<T>()))
    }

    /// The untagged raw pointer.
    #[inline]
    pub fn as_raw(&self) -> *mut T {
        (self.data & !low_bits::<T>()) as *mut T
    }

    /// Dereferences the pointer.
    ///
    /// # Safety
    ///
    /// The pointee must have been reachable when this pointer was loaded, and
    /// must only be released through the collector whose guard produced it.
    #[inline]
    pub unsafe fn as_ref(&self) -> Option<&'g T> {
        // SAFETY: Caller guarantees validity for 'g
        unsafe { self.as_raw().as_ref() }
    }
}

impl<T> core::fmt::Debug for Shared<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Shared")
            .field("ptr", &self.as_raw())
            .field("tag", &self.tag())
            .finish()
    }
}
