//! C boundary for the slate kernel.
//!
//! Everything crossing this boundary is either a plain `#[repr(C)]` value, an opaque handle
//! (see [`handle`]), or a callback the engine supplies. Fallible calls return an
//! [`ExternResult`]: errors are materialized through an engine-provided allocator so the
//! engine decides the representation and lifetime of error objects.
//!
//! Ownership rules, briefly: `drop_*`/`*_free` functions release handles exactly once;
//! [`KernelStringSlice`] arguments are borrowed for the duration of the call; string values
//! flow back through an [`AllocateStringFn`] so the kernel never hands out pointers into its
//! own heap; [`KernelBoolSlice`] values returned to the engine are owned by the engine and
//! must go back through [`free_bool_slice`].

use std::ffi::{c_char, c_void};
use std::sync::Arc;

use tracing::debug;
use url::Url;

use slate_kernel::engine::sync::SyncEngine;
use slate_kernel::{Engine, Error, SlateResult, Snapshot, Version};

pub mod handle;
use handle::{ArcHandle, Unconstructable};

pub mod expressions;
pub mod scan;

pub use expressions::{
    unwrap_kernel_expression, EnginePredicate, KernelExpressionVisitorState,
};

/// A non-owning slice of a UTF-8 string. Whoever constructs it guarantees the backing bytes
/// outlive the call it is passed to; the receiver must copy anything it wants to keep.
#[repr(C)]
pub struct KernelStringSlice {
    pub ptr: *const c_char,
    pub len: usize,
}

impl From<&str> for KernelStringSlice {
    fn from(s: &str) -> Self {
        Self {
            ptr: s.as_ptr().cast(),
            len: s.len(),
        }
    }
}

pub trait TryFromStringSlice: Sized {
    /// # Safety
    /// `slice` must point at `len` readable bytes that stay alive for the duration of the
    /// call.
    unsafe fn try_from_slice(slice: KernelStringSlice) -> SlateResult<Self>;
}

impl TryFromStringSlice for String {
    unsafe fn try_from_slice(slice: KernelStringSlice) -> SlateResult<String> {
        let bytes = unsafe { std::slice::from_raw_parts(slice.ptr.cast::<u8>(), slice.len) };
        let s = std::str::from_utf8(bytes)
            .map_err(|e| Error::generic(format!("invalid utf-8 in string slice: {e}")))?;
        Ok(s.to_string())
    }
}

/// An owned boolean slice handed to the engine. Free it with [`free_bool_slice`], exactly
/// once; the type is `Copy` like any C struct, so the single-free rule is on the caller.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct KernelBoolSlice {
    ptr: *mut bool,
    len: usize,
}

impl KernelBoolSlice {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    /// The slice must not have been freed yet.
    pub unsafe fn as_slice(&self) -> &[bool] {
        if self.ptr.is_null() {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
        }
    }
}

impl From<Vec<bool>> for KernelBoolSlice {
    fn from(vec: Vec<bool>) -> Self {
        if vec.is_empty() {
            // dangling boxed-slice pointers would collide in the handle tracker
            return Self {
                ptr: std::ptr::null_mut(),
                len: 0,
            };
        }
        let boxed = vec.into_boxed_slice();
        let len = boxed.len();
        let ptr = Box::into_raw(boxed) as *mut bool;
        handle::tracker::register(ptr as usize);
        Self { ptr, len }
    }
}

/// Free a bool slice previously returned by the kernel.
///
/// # Safety
/// `slice` must have been returned by this library and not freed before.
#[no_mangle]
pub unsafe extern "C" fn free_bool_slice(slice: KernelBoolSlice) {
    if slice.ptr.is_null() {
        return;
    }
    if handle::tracker::release(slice.ptr as usize) {
        let raw = std::ptr::slice_from_raw_parts_mut(slice.ptr, slice.len);
        unsafe { drop(Box::from_raw(raw)) };
        debug!("freed bool slice of length {}", slice.len);
    }
}

/// Engine-supplied function that copies a string value into engine-owned memory and returns
/// an opaque pointer to it (or NULL). The slice is only valid during the call.
pub type AllocateStringFn = extern "C" fn(kernel_str: KernelStringSlice) -> *mut c_void;

/// Stable error codes crossing the boundary. Everything the kernel can report maps onto one
/// of these; the engine gets the full message text through its error allocator.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    UnknownError,
    IoError,
    InvalidUrlError,
    MalformedJsonError,
    TableNotFoundError,
    CorruptLogError,
    UnsupportedProtocolError,
    VersionNotFoundError,
    InvalidProjectionError,
    UseAfterCloseError,
    DeletionVectorNotFoundError,
    MalformedDeletionVectorError,
    InvalidTableLocationError,
    MissingDataError,
    GenericError,
}

impl From<&Error> for KernelError {
    fn from(e: &Error) -> Self {
        match e {
            Error::IoFailure(_) => KernelError::IoError,
            Error::InvalidUrl(_) => KernelError::InvalidUrlError,
            Error::MalformedJson(_) => KernelError::MalformedJsonError,
            Error::TableNotFound(_) => KernelError::TableNotFoundError,
            Error::CorruptLog(_) => KernelError::CorruptLogError,
            Error::UnsupportedProtocol(_) => KernelError::UnsupportedProtocolError,
            Error::VersionNotFound(_) => KernelError::VersionNotFoundError,
            Error::InvalidProjection(_) => KernelError::InvalidProjectionError,
            Error::UseAfterClose => KernelError::UseAfterCloseError,
            Error::DeletionVectorNotFound(_) => KernelError::DeletionVectorNotFoundError,
            Error::MalformedDeletionVector(_) => KernelError::MalformedDeletionVectorError,
            Error::InvalidTableLocation(_) => KernelError::InvalidTableLocationError,
            Error::MissingData(_) => KernelError::MissingDataError,
            Error::Generic(_) => KernelError::GenericError,
            _ => KernelError::UnknownError,
        }
    }
}

/// Prefix of whatever error struct the engine's allocator actually returns. The kernel only
/// ever reads `etype`; the engine may allocate a larger struct with this as its first field.
#[repr(C)]
pub struct EngineError {
    pub etype: KernelError,
}

/// Semantics: kernel always allocates the message transiently; the engine must copy it if it
/// wants to keep it past the allocator call.
pub type AllocateErrorFn =
    extern "C" fn(etype: KernelError, msg: KernelStringSlice) -> *mut EngineError;

/// Result type for fallible boundary calls. `Err` carries a pointer produced by the engine's
/// own error allocator, so the engine both recognizes and owns it.
#[repr(C)]
pub enum ExternResult<T> {
    Ok(T),
    Err(*mut EngineError),
}

impl<T> ExternResult<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Something that can materialize a kernel error as an engine-owned [`EngineError`].
pub trait AllocateError {
    /// # Safety
    /// The message slice is only valid during the call.
    unsafe fn allocate_error(&self, etype: KernelError, msg: KernelStringSlice)
        -> *mut EngineError;
}

impl AllocateError for AllocateErrorFn {
    unsafe fn allocate_error(
        &self,
        etype: KernelError,
        msg: KernelStringSlice,
    ) -> *mut EngineError {
        (*self)(etype, msg)
    }
}

// Allows ffi functions that receive an engine-interface handle to report errors through it
// without first validating the rest of their arguments.
impl AllocateError for *const ExternEngineInterfaceHandle {
    unsafe fn allocate_error(
        &self,
        etype: KernelError,
        msg: KernelStringSlice,
    ) -> *mut EngineError {
        let interface = unsafe { ExternEngineInterfaceHandle::clone_as_arc(*self) };
        unsafe { interface.allocate_error(etype, msg) }
    }
}

pub trait IntoExternResult<T> {
    /// # Safety
    /// `allocator` must be safe to call (for the handle-pointer impl, a live handle).
    unsafe fn into_extern_result(self, allocator: &dyn AllocateError) -> ExternResult<T>;
}

impl<T> IntoExternResult<T> for SlateResult<T> {
    unsafe fn into_extern_result(self, allocator: &dyn AllocateError) -> ExternResult<T> {
        match self {
            Ok(value) => ExternResult::Ok(value),
            Err(err) => {
                let msg = err.to_string();
                let etype = KernelError::from(&err);
                ExternResult::Err(unsafe { allocator.allocate_error(etype, msg.as_str().into()) })
            }
        }
    }
}

/// The engine-facing wrapper around a kernel [`Engine`], bundled with the engine's error
/// allocator so every call made through this interface can report failures.
pub struct ExternEngineInterface {
    engine: Arc<dyn Engine>,
    allocate_error: AllocateErrorFn,
}

impl ExternEngineInterface {
    pub fn engine(&self) -> Arc<dyn Engine> {
        self.engine.clone()
    }
}

impl AllocateError for ExternEngineInterface {
    unsafe fn allocate_error(
        &self,
        etype: KernelError,
        msg: KernelStringSlice,
    ) -> *mut EngineError {
        (self.allocate_error)(etype, msg)
    }
}

pub struct ExternEngineInterfaceHandle {
    _unconstructable: Unconstructable,
}
impl ArcHandle for ExternEngineInterfaceHandle {
    type Target = ExternEngineInterface;
}

pub struct SnapshotHandle {
    _unconstructable: Unconstructable,
}
impl ArcHandle for SnapshotHandle {
    type Target = Snapshot;
}

/// Accepts either a proper URL or a bare filesystem path for the table root.
unsafe fn unwrap_and_parse_path_as_url(path: KernelStringSlice) -> SlateResult<Url> {
    let path = unsafe { String::try_from_slice(path) }?;
    if let Ok(url) = Url::parse(&path) {
        return Ok(url);
    }
    Url::from_directory_path(&path).map_err(|()| {
        Error::InvalidTableLocation(format!("cannot interpret {path} as a table root"))
    })
}

/// Build an engine interface backed by the bundled synchronous local-filesystem engine,
/// probing that `path` is a location it can serve.
///
/// # Safety
/// Caller is responsible for passing a valid path pointer and a non-null error allocator.
#[no_mangle]
pub unsafe extern "C" fn get_default_engine_interface(
    path: KernelStringSlice,
    allocate_error: AllocateErrorFn,
) -> ExternResult<*const ExternEngineInterfaceHandle> {
    let result = unsafe { get_default_engine_interface_impl(path, allocate_error) };
    unsafe { result.into_extern_result(&allocate_error) }
}

unsafe fn get_default_engine_interface_impl(
    path: KernelStringSlice,
    allocate_error: AllocateErrorFn,
) -> SlateResult<*const ExternEngineInterfaceHandle> {
    let url = unsafe { unwrap_and_parse_path_as_url(path) }?;
    let engine = SyncEngine::new();
    engine.probe(&url)?;
    debug!("built default engine interface for {url}");
    Ok(ExternEngineInterfaceHandle::into_handle(Arc::new(
        ExternEngineInterface {
            engine: Arc::new(engine),
            allocate_error,
        },
    )))
}

/// Resolve a snapshot of the table at `path` at the current head of its log.
///
/// # Safety
/// Caller is responsible for passing a valid path pointer and engine-interface handle.
#[no_mangle]
pub unsafe extern "C" fn snapshot(
    path: KernelStringSlice,
    engine_interface: *const ExternEngineInterfaceHandle,
) -> ExternResult<*const SnapshotHandle> {
    let result = unsafe { snapshot_impl(path, engine_interface, None) };
    unsafe { result.into_extern_result(&engine_interface) }
}

/// Resolve a snapshot of the table at `path` pinned to `version`.
///
/// # Safety
/// Caller is responsible for passing a valid path pointer and engine-interface handle.
#[no_mangle]
pub unsafe extern "C" fn snapshot_at_version(
    path: KernelStringSlice,
    engine_interface: *const ExternEngineInterfaceHandle,
    version: Version,
) -> ExternResult<*const SnapshotHandle> {
    let result = unsafe { snapshot_impl(path, engine_interface, Some(version)) };
    unsafe { result.into_extern_result(&engine_interface) }
}

unsafe fn snapshot_impl(
    path: KernelStringSlice,
    engine_interface: *const ExternEngineInterfaceHandle,
    requested_version: Option<Version>,
) -> SlateResult<*const SnapshotHandle> {
    let url = unsafe { unwrap_and_parse_path_as_url(path) }?;
    let interface = unsafe { ExternEngineInterfaceHandle::clone_as_arc(engine_interface) };
    let snapshot = Snapshot::try_new(url, interface.engine().as_ref(), requested_version)?;
    Ok(SnapshotHandle::into_handle(Arc::new(snapshot)))
}

/// Get the resolved version of a snapshot.
///
/// # Safety
/// Caller is responsible for passing a valid snapshot handle.
#[no_mangle]
pub unsafe extern "C" fn version(snapshot: *const SnapshotHandle) -> Version {
    let snapshot = unsafe { SnapshotHandle::clone_as_arc(snapshot) };
    snapshot.version()
}

/// # Safety
/// Caller is responsible for passing a valid snapshot handle, at most once.
#[no_mangle]
pub unsafe extern "C" fn drop_snapshot(snapshot: *const SnapshotHandle) {
    unsafe { ArcHandle::drop_handle(snapshot) };
}

/// # Safety
/// Caller is responsible for passing a valid engine-interface handle, at most once.
#[no_mangle]
pub unsafe extern "C" fn drop_engine_interface(
    engine_interface: *const ExternEngineInterfaceHandle,
) {
    unsafe { ArcHandle::drop_handle(engine_interface) };
}
