//! Scan planning and scan-data iteration over the C boundary.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Arc;

use tracing::{debug, error};
use url::Url;

use slate_kernel::scan::state::{
    visit_scan_files, DvInfo, GlobalScanState as KernelGlobalScanState, ScanDataIterator,
};
use slate_kernel::scan::{Scan as KernelScan, ScanBuilder};
use slate_kernel::{EngineData, Error, SlateResult};

use crate::handle::{ArcHandle, BoxHandle};
use crate::{
    unwrap_kernel_expression, AllocateStringFn, EnginePredicate, ExternEngineInterface,
    ExternEngineInterfaceHandle, ExternResult, IntoExternResult, KernelBoolSlice,
    KernelExpressionVisitorState, KernelStringSlice, SnapshotHandle, TryFromStringSlice,
};

/// Borrow a pointer created via `BoxHandle::into_handle` for the duration of `$body` without
/// freeing it. For example, if `raw_thing` was previously created by
/// `BoxHandle::into_handle`, one can return the result of `some_method` while leaving
/// `raw_thing` live:
/// ```ignore
/// asbox!(raw_thing as boxed_thing => {
///   boxed_thing.some_method()
/// })
/// ```
/// The body must not early-return (no `?`): the box has to reach the trailing leak.
macro_rules! asbox {
    ($raw_name:ident as $box_name:ident => $body:expr) => {{
        let $box_name = unsafe { Box::from_raw($raw_name) };
        let res = $body;
        // leak the box since we don't want this to free
        Box::leak($box_name);
        res
    }};
}

/// An opaque batch of scan-file metadata produced by the kernel. Passed back into
/// [`visit_scan_data`] to be exploded into per-file callbacks.
pub struct EngineDataHandle {
    data: Box<dyn EngineData>,
}
impl BoxHandle for EngineDataHandle {}

/// Number of file rows in a scan-data batch.
///
/// # Safety
/// `data` must be a valid pointer to a kernel allocated `EngineDataHandle`
#[no_mangle]
pub unsafe extern "C" fn engine_data_length(data: *mut EngineDataHandle) -> usize {
    asbox!(data as boxed_data => boxed_data.data.len())
}

/// A planned scan over the table specified by a snapshot.
pub struct Scan {
    kernel_scan: KernelScan,
}
impl BoxHandle for Scan {}

/// Get a handle to a [`Scan`] over the table specified by the passed snapshot. The snapshot
/// handle stays live; several scans may be planned from it.
///
/// # Safety
/// Caller is responsible for passing a valid snapshot pointer and engine-interface pointer.
#[no_mangle]
pub unsafe extern "C" fn scan(
    snapshot: *const SnapshotHandle,
    engine_interface: *const ExternEngineInterfaceHandle,
    predicate: Option<&mut EnginePredicate>,
) -> ExternResult<*mut Scan> {
    let result = unsafe { scan_impl(snapshot, predicate) };
    unsafe { result.into_extern_result(&engine_interface) }
}

unsafe fn scan_impl(
    snapshot: *const SnapshotHandle,
    predicate: Option<&mut EnginePredicate>,
) -> SlateResult<*mut Scan> {
    let snapshot = unsafe { SnapshotHandle::clone_as_arc(snapshot) };
    let mut scan_builder = ScanBuilder::new(snapshot);
    if let Some(predicate) = predicate {
        let mut visitor_state = KernelExpressionVisitorState::new();
        let exprid = (predicate.visitor)(predicate.predicate, &mut visitor_state);
        if let Some(predicate) = unwrap_kernel_expression(&mut visitor_state, exprid) {
            debug!("got predicate: {predicate}");
            scan_builder = scan_builder.with_predicate(predicate);
        }
    }
    let kernel_scan = scan_builder.build()?;
    Ok(Scan { kernel_scan }.into_handle())
}

/// # Safety
/// Caller is responsible for passing a valid scan handle, at most once.
#[no_mangle]
pub unsafe extern "C" fn drop_scan(scan: *mut Scan) {
    unsafe { BoxHandle::drop_handle(scan) };
}

/// Scan-wide invariants shared by every batch of one scan.
pub struct GlobalScanState {
    kernel_state: KernelGlobalScanState,
}
impl BoxHandle for GlobalScanState {}

/// Get the global state for a scan. See the docs for
/// [`slate_kernel::scan::state::GlobalScanState`] for more information.
///
/// # Safety
/// Engine is responsible for providing a valid scan pointer.
#[no_mangle]
pub unsafe extern "C" fn get_global_scan_state(scan: *mut Scan) -> *mut GlobalScanState {
    asbox!(scan as boxed_scan => {
        let kernel_state = boxed_scan.kernel_scan.global_scan_state();
        GlobalScanState { kernel_state }.into_handle()
    })
}

/// The snapshot version this scan was planned against.
///
/// # Safety
/// Engine is responsible for providing a valid global-scan-state pointer.
#[no_mangle]
pub unsafe extern "C" fn global_scan_state_version(state: *mut GlobalScanState) -> u64 {
    asbox!(state as boxed_state => boxed_state.kernel_state.version)
}

/// Copy the scan's table root through the engine's string allocator.
///
/// # Safety
/// Engine is responsible for providing a valid global-scan-state pointer.
#[no_mangle]
pub unsafe extern "C" fn global_scan_state_table_root(
    state: *mut GlobalScanState,
    allocate_fn: AllocateStringFn,
) -> *mut c_void {
    asbox!(state as boxed_state => {
        let root: KernelStringSlice = boxed_state.kernel_state.table_root.as_str().into();
        allocate_fn(root)
    })
}

/// # Safety
/// Engine is responsible for providing a valid global-scan-state pointer.
#[no_mangle]
pub unsafe extern "C" fn global_scan_state_partition_column_count(
    state: *mut GlobalScanState,
) -> usize {
    asbox!(state as boxed_state => boxed_state.kernel_state.partition_columns.len())
}

/// Copy the partition column at `index` through the engine's string allocator. Returns NULL
/// when `index` is out of bounds.
///
/// # Safety
/// Engine is responsible for providing a valid global-scan-state pointer.
#[no_mangle]
pub unsafe extern "C" fn global_scan_state_partition_column(
    state: *mut GlobalScanState,
    index: usize,
    allocate_fn: AllocateStringFn,
) -> *mut c_void {
    asbox!(state as boxed_state => {
        match boxed_state.kernel_state.partition_columns.get(index) {
            Some(column) => {
                let slice: KernelStringSlice = column.as_str().into();
                allocate_fn(slice)
            }
            None => std::ptr::null_mut(),
        }
    })
}

/// # Safety
/// Caller is responsible for passing a valid handle, at most once.
#[no_mangle]
pub unsafe extern "C" fn drop_global_scan_state(state: *mut GlobalScanState) {
    unsafe { BoxHandle::drop_handle(state) };
}

// Intentionally opaque to the engine.
pub struct KernelScanDataIterator {
    data: ScanDataIterator,

    // Also keep a reference to the external engine interface for its error allocator: batches
    // surfaced after init still need somewhere to send their failures.
    engine_interface: Arc<ExternEngineInterface>,
}

impl BoxHandle for KernelScanDataIterator {}

impl Drop for KernelScanDataIterator {
    fn drop(&mut self) {
        debug!("dropping KernelScanDataIterator");
    }
}

/// Get an iterator over the data needed to perform a scan. This will return a
/// [`KernelScanDataIterator`] which can be passed to [`kernel_scan_data_next`] to get the
/// actual data in the iterator. The scan handle is borrowed, not consumed: the same scan can
/// back several independent iterators.
///
/// # Safety
/// Engine is responsible for passing a valid [`ExternEngineInterfaceHandle`] and [`Scan`].
#[no_mangle]
pub unsafe extern "C" fn kernel_scan_data_init(
    engine_interface: *const ExternEngineInterfaceHandle,
    scan: *mut Scan,
) -> ExternResult<*mut KernelScanDataIterator> {
    let result = unsafe { kernel_scan_data_init_impl(engine_interface, scan) };
    unsafe { result.into_extern_result(&engine_interface) }
}

unsafe fn kernel_scan_data_init_impl(
    engine_interface: *const ExternEngineInterfaceHandle,
    scan: *mut Scan,
) -> SlateResult<*mut KernelScanDataIterator> {
    let interface = unsafe { ExternEngineInterfaceHandle::clone_as_arc(engine_interface) };
    let data = asbox!(scan as boxed_scan => {
        boxed_scan.kernel_scan.scan_data(interface.engine())
    });
    let iter = KernelScanDataIterator {
        data: data?,
        engine_interface: interface,
    };
    Ok(iter.into_handle())
}

/// Pull the next batch. When one exists, calls `engine_visitor` with the batch and its
/// selection vector and returns `true`; returns `false` once the iterator is exhausted
/// (repeatable). A closed iterator reports an error. The data handle passed to the visitor is
/// only valid during the visit; the selection vector is owned by the engine and must be
/// released with [`free_bool_slice`](crate::free_bool_slice).
///
/// # Safety
/// The iterator must be valid (returned by [`kernel_scan_data_init`]) and not yet freed by
/// [`kernel_scan_data_free`]. The visitor function pointer must be non-null.
#[no_mangle]
pub unsafe extern "C" fn kernel_scan_data_next(
    data: &mut KernelScanDataIterator,
    engine_context: *mut c_void,
    engine_visitor: extern "C" fn(
        engine_context: *mut c_void,
        engine_data: *mut EngineDataHandle,
        selection_vector: KernelBoolSlice,
    ),
) -> ExternResult<bool> {
    let allocator = data.engine_interface.clone();
    let result = kernel_scan_data_next_impl(data, engine_context, engine_visitor);
    unsafe { result.into_extern_result(allocator.as_ref()) }
}

fn kernel_scan_data_next_impl(
    data: &mut KernelScanDataIterator,
    engine_context: *mut c_void,
    engine_visitor: extern "C" fn(
        engine_context: *mut c_void,
        engine_data: *mut EngineDataHandle,
        selection_vector: KernelBoolSlice,
    ),
) -> SlateResult<bool> {
    if let Some((batch, selection_vector)) = data.data.next_batch()? {
        let bool_slice: KernelBoolSlice = selection_vector.into();
        let data_handle = EngineDataHandle {
            data: Box::new(batch),
        }
        .into_handle();
        (engine_visitor)(engine_context, data_handle, bool_slice);
        // ensure we free the data
        unsafe { BoxHandle::drop_handle(data_handle) };
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Release the iterator's resources without freeing the handle. Any later
/// [`kernel_scan_data_next`] on this iterator reports a use-after-close error; the handle
/// itself still needs [`kernel_scan_data_free`].
///
/// # Safety
/// The iterator must be valid and not yet freed.
#[no_mangle]
pub unsafe extern "C" fn kernel_scan_data_close(data: *mut KernelScanDataIterator) {
    let mut boxed_data = unsafe { Box::from_raw(data) };
    boxed_data.data.close();
    // leak the box: close releases resources, free releases the handle
    Box::leak(boxed_data);
}

/// # Safety
/// Caller is responsible for (at most once) passing a valid pointer returned by a call to
/// [`kernel_scan_data_init`].
#[no_mangle]
pub unsafe extern "C" fn kernel_scan_data_free(data: *mut KernelScanDataIterator) {
    unsafe { BoxHandle::drop_handle(data) };
}

pub type CScanCallback = extern "C" fn(
    engine_context: *mut c_void,
    path: KernelStringSlice,
    size: i64,
    dv_info: *mut CDvInfo,
    partition_map: *mut CStringMap,
);

/// Per-file deletion-vector information, resolvable into a row-level selection vector with
/// [`selection_vector_from_dv`]. Only valid for the duration of the scan callback it is
/// passed to.
pub struct CDvInfo {
    dv_info: DvInfo,
}
impl BoxHandle for CDvInfo {}

/// Whether this file carries a deletion vector at all. Files without one need no bitmap read:
/// every row survives.
///
/// # Safety
/// Engine is responsible for providing a valid [`CDvInfo`] pointer.
#[no_mangle]
pub unsafe extern "C" fn dv_info_has_vector(raw_info: *mut CDvInfo) -> bool {
    asbox!(raw_info as boxed_info => boxed_info.dv_info.has_vector())
}

pub struct CStringMap {
    values: HashMap<String, String>,
}
impl BoxHandle for CStringMap {}

/// Probe into a [`CStringMap`]. If the specified key is in the map, kernel will call
/// `allocate_fn` with the associated value and return whatever that function returns. If the
/// key is not in the map, this returns NULL.
///
/// # Safety
/// The engine is responsible for providing a valid [`CStringMap`] pointer and
/// [`KernelStringSlice`].
#[no_mangle]
pub unsafe extern "C" fn get_from_map(
    raw_map: *mut CStringMap,
    key: KernelStringSlice,
    allocate_fn: AllocateStringFn,
) -> *mut c_void {
    let string_key = match unsafe { String::try_from_slice(key) } {
        Ok(key) => key,
        Err(_) => return std::ptr::null_mut(),
    };
    asbox!(raw_map as boxed_map => {
        match boxed_map.values.get(&string_key) {
            Some(v) => {
                let slice: KernelStringSlice = v.as_str().into();
                allocate_fn(slice)
            }
            None => std::ptr::null_mut(),
        }
    })
}

/// Resolve a selection vector out of a [`CDvInfo`] struct: one bool per physical row of the
/// file, `true` meaning the row survives. Files without a deletion vector get an all-true
/// vector without touching storage.
///
/// # Safety
/// Engine is responsible for providing valid pointers for each argument.
#[no_mangle]
pub unsafe extern "C" fn selection_vector_from_dv(
    raw_info: *mut CDvInfo,
    engine_interface: *const ExternEngineInterfaceHandle,
    state: *mut GlobalScanState,
) -> ExternResult<KernelBoolSlice> {
    let result = unsafe { selection_vector_from_dv_impl(raw_info, engine_interface, state) };
    unsafe { result.into_extern_result(&engine_interface) }
}

unsafe fn selection_vector_from_dv_impl(
    raw_info: *mut CDvInfo,
    engine_interface: *const ExternEngineInterfaceHandle,
    state: *mut GlobalScanState,
) -> SlateResult<KernelBoolSlice> {
    let interface = unsafe { ExternEngineInterfaceHandle::clone_as_arc(engine_interface) };
    let vector = asbox!(raw_info as boxed_info => {
        asbox!(state as boxed_state => {
            Url::parse(&boxed_state.kernel_state.table_root)
                .map_err(Error::from)
                .and_then(|root| {
                    boxed_info
                        .dv_info
                        .get_selection_vector(interface.engine().as_ref(), &root)
                })
        })
    })?;
    Ok(vector.into())
}

// Wrapper function that gets called by the kernel, transforms the arguments to make them
// ffi-able, and then calls the engine-specified callback
fn rust_callback(
    context: &mut ContextWrapper,
    path: &str,
    size: i64,
    dv_info: DvInfo,
    partition_values: &HashMap<String, String>,
) {
    let path_slice: KernelStringSlice = path.into();
    let dv_handle = CDvInfo { dv_info }.into_handle();
    let partition_map_handle = CStringMap {
        values: partition_values.clone(),
    }
    .into_handle();
    (context.callback)(
        context.engine_context,
        path_slice,
        size,
        dv_handle,
        partition_map_handle,
    );
    // both handles were only loaned to the callback
    unsafe {
        BoxHandle::drop_handle(dv_handle);
        BoxHandle::drop_handle(partition_map_handle);
    }
}

// Wrap up stuff from C so we can pass it through to our callback
struct ContextWrapper {
    engine_context: *mut c_void,
    callback: CScanCallback,
}

/// Shim for ffi to call `visit_scan_files`. This will generally be called when iterating
/// through scan data, which provides the data handle and selection vector as each element in
/// the iterator. The `dv_info` and `partition_map` pointers handed to the callback are only
/// valid during that callback.
///
/// # Safety
/// Engine is responsible for passing a valid [`EngineDataHandle`] and selection vector.
#[no_mangle]
pub unsafe extern "C" fn visit_scan_data(
    data: *mut EngineDataHandle,
    selection_vector: KernelBoolSlice,
    engine_context: *mut c_void,
    callback: CScanCallback,
) {
    let selection = unsafe { selection_vector.as_slice() };
    let data: &dyn EngineData = unsafe { (*data).data.as_ref() };
    let context_wrapper = ContextWrapper {
        engine_context,
        callback,
    };
    if let Err(e) = visit_scan_files(data, selection, context_wrapper, rust_callback) {
        error!("visit_scan_data called with foreign data: {e}");
    }
}
