//! Handle plumbing for passing kernel objects across the C boundary.
//!
//! A handle is an opaque pointer the engine holds without knowing the Rust type behind it.
//! [`ArcHandle`] is for shared, reference-counted objects (the engine may hand the pointer to
//! several threads); [`BoxHandle`] is for uniquely-owned objects. Debug builds track every live
//! handle address and flag a double release instead of freeing twice.

use std::sync::Arc;

/// Shared handle over an `Arc<Target>`. The handle type itself is a zero-sized marker struct
/// that exists only to give the C side a distinct opaque pointer type.
pub trait ArcHandle: Sized {
    type Target: Send + Sync;

    fn into_handle(target: Arc<Self::Target>) -> *const Self {
        let ptr = Arc::into_raw(target) as *const Self;
        tracker::register(ptr as usize);
        ptr
    }

    /// Obtain a fresh `Arc` to the target without consuming the handle.
    ///
    /// # Safety
    /// `handle` must be a live pointer produced by [`ArcHandle::into_handle`].
    unsafe fn clone_as_arc(handle: *const Self) -> Arc<Self::Target> {
        let ptr = handle as *const Self::Target;
        unsafe {
            Arc::increment_strong_count(ptr);
            Arc::from_raw(ptr)
        }
    }

    /// Release the handle's reference.
    ///
    /// # Safety
    /// `handle` must be a live pointer produced by [`ArcHandle::into_handle`], and must not be
    /// used again afterwards.
    unsafe fn drop_handle(handle: *const Self) {
        if tracker::release(handle as usize) {
            unsafe { drop(Arc::from_raw(handle as *const Self::Target)) };
        }
    }
}

/// Uniquely-owned handle over a boxed value.
pub trait BoxHandle: Sized {
    fn into_handle(self) -> *mut Self {
        let ptr = Box::into_raw(Box::new(self));
        tracker::register(ptr as usize);
        ptr
    }

    /// Free the handle.
    ///
    /// # Safety
    /// `handle` must be a live pointer produced by [`BoxHandle::into_handle`], and must not be
    /// used again afterwards.
    unsafe fn drop_handle(handle: *mut Self) {
        if tracker::release(handle as usize) {
            unsafe { drop(Box::from_raw(handle)) };
        }
    }
}

/// Marker field type that keeps handle structs unconstructable outside this crate.
pub struct Unconstructable {
    _priv: (),
}

/// Live-handle bookkeeping. Release builds compile this down to nothing; debug builds keep a
/// table of live handle addresses so a double release is reported instead of corrupting the
/// allocator.
pub(crate) mod tracker {
    #[cfg(debug_assertions)]
    use std::collections::HashSet;
    #[cfg(debug_assertions)]
    use std::sync::atomic::{AtomicUsize, Ordering};
    #[cfg(debug_assertions)]
    use std::sync::{LazyLock, Mutex};

    #[cfg(debug_assertions)]
    static LIVE_HANDLES: LazyLock<Mutex<HashSet<usize>>> = LazyLock::new(Default::default);

    #[cfg(debug_assertions)]
    static DOUBLE_RELEASES: AtomicUsize = AtomicUsize::new(0);

    pub(crate) fn register(addr: usize) {
        #[cfg(debug_assertions)]
        {
            let mut live = LIVE_HANDLES.lock().unwrap();
            assert!(live.insert(addr), "handle {addr:#x} registered while live");
        }
        let _ = addr;
    }

    /// Returns true when the release is legitimate and the caller may deallocate.
    pub(crate) fn release(addr: usize) -> bool {
        #[cfg(debug_assertions)]
        {
            let mut live = LIVE_HANDLES.lock().unwrap();
            if !live.remove(&addr) {
                DOUBLE_RELEASES.fetch_add(1, Ordering::Relaxed);
                tracing::error!("double release of handle {addr:#x}");
                return false;
            }
        }
        let _ = addr;
        true
    }

    /// Number of double releases observed so far in this process.
    #[cfg(all(test, debug_assertions))]
    pub(crate) fn double_release_count() -> usize {
        DOUBLE_RELEASES.load(Ordering::Relaxed)
    }
}
