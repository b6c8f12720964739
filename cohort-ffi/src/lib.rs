//! C function-table ABI over [`cohort_stm`].
//!
//! Handles cross the boundary as plain integers and pointers:
//!
//! - a region (`shared_t`) is a boxed [`Region`], `NULL` when creation failed
//! - a transaction (`tx_t`) is a boxed [`Transaction`] as `uintptr_t`,
//!   [`INVALID_TX`] when `tm_begin` failed
//! - a shared address (`void*`) carries the bits of an [`Addr`]; it is never
//!   dereferenced by the caller, only passed back in
//!
//! Every entry point opens a `tm_api` trace span.

#[cfg(not(target_pointer_width = "64"))]
compile_error!("cohort-ffi passes 64-bit shared addresses through pointers");

use cohort_stm::{Addr, Region, TmError, Transaction};
use core::ffi::{c_int, c_void};
use core::ptr;

/// Transaction handle
pub type TxHandle = usize;

/// Returned by `tm_begin` when no transaction could be started
pub const INVALID_TX: TxHandle = !0;
/// Allocation succeeded and the transaction can continue
pub const SUCCESS_ALLOC: c_int = 0;
/// The transaction was aborted and may be retried
pub const ABORT_ALLOC: c_int = 1;
/// Allocation failed but the transaction was not aborted
pub const NOMEM_ALLOC: c_int = 2;

#[inline]
fn addr_to_ptr(addr: Addr) -> *mut c_void {
    ptr::without_provenance_mut(addr.to_bits() as usize)
}

#[inline]
fn ptr_to_addr(ptr: *const c_void) -> Addr {
    Addr::from_bits(ptr.addr() as u64)
}

/// # Safety
///
/// `shared` must be NULL or come from `tm_create` and not be destroyed yet.
#[inline]
unsafe fn region<'a>(shared: *mut c_void) -> Option<&'a Region> {
    // SAFETY: guaranteed by the caller.
    unsafe { shared.cast::<Region>().as_ref() }
}

/// # Safety
///
/// `tx` must be [`INVALID_TX`] or come from `tm_begin` and not be ended yet.
#[inline]
unsafe fn transaction<'a>(tx: TxHandle) -> Option<&'a mut Transaction<'static>> {
    if tx == INVALID_TX {
        return None;
    }
    // SAFETY: guaranteed by the caller.
    unsafe { ptr::with_exposed_provenance_mut::<Transaction<'static>>(tx).as_mut() }
}

/// Create a region whose first segment has `size` bytes of `align`-byte words.
///
/// Returns NULL if the layout is invalid or memory ran out.
#[unsafe(no_mangle)]
pub extern "C" fn tm_create(size: usize, align: usize) -> *mut c_void {
    let _span = tracing::trace_span!("tm_api", api_func = "create").entered();
    match Region::create(size, align) {
        Ok(region) => Box::into_raw(Box::new(region)).cast(),
        Err(err) => {
            tracing::debug!(size, align, error = %err, "tm_create failed");
            ptr::null_mut()
        }
    }
}

/// Destroy a region.
///
/// # Safety
///
/// `shared` must come from `tm_create`, and no transaction on it may still
/// be running.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_destroy(shared: *mut c_void) {
    let _span = tracing::trace_span!("tm_api", api_func = "destroy").entered();
    if shared.is_null() {
        return;
    }
    // SAFETY: created by tm_create; no transaction borrows it any more.
    drop(unsafe { Box::from_raw(shared.cast::<Region>()) });
}

/// Shared address of the region's first segment.
///
/// # Safety
///
/// `shared` must be a live region handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_start(shared: *mut c_void) -> *mut c_void {
    let _span = tracing::trace_span!("tm_api", api_func = "start").entered();
    // SAFETY: guaranteed by the caller.
    match unsafe { region(shared) } {
        Some(region) => addr_to_ptr(region.start()),
        None => ptr::null_mut(),
    }
}

/// Size in bytes of the region's first segment.
///
/// # Safety
///
/// `shared` must be a live region handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_size(shared: *mut c_void) -> usize {
    let _span = tracing::trace_span!("tm_api", api_func = "size").entered();
    // SAFETY: guaranteed by the caller.
    unsafe { region(shared) }.map_or(0, Region::size)
}

/// Word size in bytes of the region.
///
/// # Safety
///
/// `shared` must be a live region handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_align(shared: *mut c_void) -> usize {
    let _span = tracing::trace_span!("tm_api", api_func = "align").entered();
    // SAFETY: guaranteed by the caller.
    unsafe { region(shared) }.map_or(0, Region::align)
}

/// Begin a transaction; [`INVALID_TX`] on failure.
///
/// # Safety
///
/// `shared` must be a live region handle, and must outlive the transaction.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_begin(shared: *mut c_void, is_ro: bool) -> TxHandle {
    let _span = tracing::trace_span!("tm_api", api_func = "begin").entered();
    // SAFETY: the caller keeps the region alive until every transaction ends.
    let region: Option<&'static Region> = unsafe { region(shared) };
    let Some(region) = region else {
        return INVALID_TX;
    };
    match region.begin(is_ro) {
        Ok(tx) => Box::into_raw(Box::new(tx)).expose_provenance(),
        Err(err) => {
            tracing::debug!(error = %err, "tm_begin failed");
            INVALID_TX
        }
    }
}

/// End a transaction, returning whether it committed.
///
/// # Safety
///
/// `tx` must come from `tm_begin` on `shared` and not be ended yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_end(_shared: *mut c_void, tx: TxHandle) -> bool {
    let _span = tracing::trace_span!("tm_api", api_func = "end").entered();
    // SAFETY: guaranteed by the caller.
    let Some(tx) = (unsafe { transaction(tx) }) else {
        return false;
    };
    // SAFETY: boxed by tm_begin; ending consumes the handle.
    let tx = unsafe { Box::from_raw(ptr::from_mut(tx)) };
    tx.end()
}

/// Read `size` bytes at shared address `source` into private `target`.
///
/// Returns false when the transaction must abort.
///
/// # Safety
///
/// `tx` must be a running transaction on `shared`; `target` must be valid
/// for `size` bytes of writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_read(
    _shared: *mut c_void,
    tx: TxHandle,
    source: *const c_void,
    size: usize,
    target: *mut c_void,
) -> bool {
    let _span = tracing::trace_span!("tm_api", api_func = "read").entered();
    // SAFETY: guaranteed by the caller.
    let Some(tx) = (unsafe { transaction(tx) }) else {
        return false;
    };
    if target.is_null() {
        tx.abort();
        return false;
    }
    // SAFETY: the caller provides `size` writable bytes at `target`.
    let dst = unsafe { core::slice::from_raw_parts_mut(target.cast::<u8>(), size) };
    tx.read(ptr_to_addr(source), dst).is_ok()
}

/// Write `size` private bytes at `source` to shared address `target`.
///
/// Returns false when the transaction must abort.
///
/// # Safety
///
/// `tx` must be a running transaction on `shared`; `source` must be valid
/// for `size` bytes of reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_write(
    _shared: *mut c_void,
    tx: TxHandle,
    source: *const c_void,
    size: usize,
    target: *mut c_void,
) -> bool {
    let _span = tracing::trace_span!("tm_api", api_func = "write").entered();
    // SAFETY: guaranteed by the caller.
    let Some(tx) = (unsafe { transaction(tx) }) else {
        return false;
    };
    if source.is_null() {
        tx.abort();
        return false;
    }
    // SAFETY: the caller provides `size` readable bytes at `source`.
    let src = unsafe { core::slice::from_raw_parts(source.cast::<u8>(), size) };
    tx.write(src, ptr_to_addr(target)).is_ok()
}

/// Allocate a segment of `size` bytes, storing its shared address in `*target`.
///
/// # Safety
///
/// `tx` must be a running transaction on `shared`; `target` must be valid
/// for one pointer write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_alloc(
    _shared: *mut c_void,
    tx: TxHandle,
    size: usize,
    target: *mut *mut c_void,
) -> c_int {
    let _span = tracing::trace_span!("tm_api", api_func = "alloc").entered();
    // SAFETY: guaranteed by the caller.
    let Some(tx) = (unsafe { transaction(tx) }) else {
        return ABORT_ALLOC;
    };
    if target.is_null() {
        tx.abort();
        return ABORT_ALLOC;
    }
    match tx.alloc(size) {
        Ok(addr) => {
            // SAFETY: checked non-null; validity guaranteed by the caller.
            unsafe { target.write(addr_to_ptr(addr)) };
            SUCCESS_ALLOC
        }
        Err(TmError::OutOfMemory) => NOMEM_ALLOC,
        Err(_) => ABORT_ALLOC,
    }
}

/// Free the segment at shared address `target`.
///
/// Returns false when the transaction must abort.
///
/// # Safety
///
/// `tx` must be a running transaction on `shared`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tm_free(_shared: *mut c_void, tx: TxHandle, target: *mut c_void) -> bool {
    let _span = tracing::trace_span!("tm_api", api_func = "free").entered();
    // SAFETY: guaranteed by the caller.
    let Some(tx) = (unsafe { transaction(tx) }) else {
        return false;
    };
    tx.free(ptr_to_addr(target)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let region = Region::create(64, 8).unwrap();
        let addr = region.start().byte_add(24);
        assert_eq!(ptr_to_addr(addr_to_ptr(addr)), addr);
        assert!(addr_to_ptr(Addr::NULL).is_null());
    }

    #[test]
    fn test_invalid_handles() {
        unsafe {
            assert_eq!(tm_begin(ptr::null_mut(), false), INVALID_TX);
            assert!(!tm_end(ptr::null_mut(), INVALID_TX));
            assert_eq!(tm_size(ptr::null_mut()), 0);
            assert!(tm_start(ptr::null_mut()).is_null());
            tm_destroy(ptr::null_mut());
        }
    }
}
