//! Drives the full extern "C" surface the way a host engine written in C would: opaque
//! handles in, callbacks out, explicit frees everywhere.

use std::ffi::c_void;
use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use tempfile::TempDir;
use url::Url;

use slate_kernel::actions::deletion_vector::serialize_deletion_bitmap;
use slate_kernel_ffi::expressions::{
    visit_expression_column, visit_expression_literal_long, visit_expression_lt,
};
use slate_kernel_ffi::scan::{
    drop_global_scan_state, drop_scan, engine_data_length, get_from_map, get_global_scan_state,
    kernel_scan_data_close, kernel_scan_data_free, kernel_scan_data_init, kernel_scan_data_next,
    scan, selection_vector_from_dv, visit_scan_data, CDvInfo, CStringMap, EngineDataHandle,
    GlobalScanState,
};
use slate_kernel_ffi::{
    drop_engine_interface, drop_snapshot, free_bool_slice, get_default_engine_interface, snapshot,
    snapshot_at_version, version, EngineError, EnginePredicate, ExternEngineInterfaceHandle,
    ExternResult, KernelBoolSlice, KernelError, KernelExpressionVisitorState, KernelStringSlice,
    TryFromStringSlice,
};

const SCHEMA_STRING: &str = r#"{"type":"struct","fields":[{"name":"id","type":"integer","nullable":true,"metadata":{}},{"name":"value","type":"string","nullable":true,"metadata":{}}]}"#;

fn protocol_action() -> Value {
    json!({"protocol": {
        "minReaderVersion": 3,
        "minWriterVersion": 7,
        "readerFeatures": ["deletionVectors"],
        "writerFeatures": ["deletionVectors"],
    }})
}

fn metadata_action() -> Value {
    json!({"metaData": {
        "id": "test-table-id",
        "format": {"provider": "parquet", "options": {}},
        "schemaString": SCHEMA_STRING,
        "partitionColumns": ["id"],
        "configuration": {},
        "createdTime": 1587968585495i64
    }})
}

fn add_action(path: &str, num_records: i64, partition_id: &str) -> Value {
    json!({"add": {
        "path": path,
        "partitionValues": {"id": partition_id},
        "size": 1024,
        "modificationTime": 1587968586000i64,
        "dataChange": true,
        "stats": {"numRecords": num_records}
    }})
}

fn write_commit(table_dir: &Path, version: u64, actions: &[Value]) {
    let log_dir = table_dir.join("_slate_log");
    fs::create_dir_all(&log_dir).unwrap();
    let lines: Vec<String> = actions.iter().map(ToString::to_string).collect();
    fs::write(log_dir.join(format!("{version:020}.json")), lines.join("\n")).unwrap();
}

// --- engine-side allocators ---------------------------------------------------------------

extern "C" fn allocate_err(etype: KernelError, _msg: KernelStringSlice) -> *mut EngineError {
    Box::into_raw(Box::new(EngineError { etype }))
}

fn error_code(err: *mut EngineError) -> KernelError {
    let boxed = unsafe { Box::from_raw(err) };
    boxed.etype
}

extern "C" fn allocate_str(slice: KernelStringSlice) -> *mut c_void {
    let copied = unsafe { String::try_from_slice(slice) }.unwrap();
    Box::into_raw(Box::new(copied)).cast()
}

fn take_string(ptr: *mut c_void) -> String {
    assert!(!ptr.is_null());
    *unsafe { Box::from_raw(ptr.cast::<String>()) }
}

fn ok_or_panic<T>(result: ExternResult<T>) -> T {
    match result {
        ExternResult::Ok(value) => value,
        ExternResult::Err(err) => panic!("ffi call failed: {:?}", error_code(err)),
    }
}

// --- scan visitors ------------------------------------------------------------------------

struct ScanContext {
    engine_interface: *const ExternEngineInterfaceHandle,
    state: *mut GlobalScanState,
    // per selected file: path, partition id, surviving rows
    files: Vec<(String, String, Vec<bool>)>,
    batches: usize,
}

extern "C" fn file_callback(
    context: *mut c_void,
    path: KernelStringSlice,
    size: i64,
    dv_info: *mut CDvInfo,
    partition_map: *mut CStringMap,
) {
    let context = unsafe { &mut *context.cast::<ScanContext>() };
    let path = unsafe { String::try_from_slice(path) }.unwrap();
    assert_eq!(size, 1024);

    let partition_id = take_string(unsafe { get_from_map(partition_map, "id".into(), allocate_str) });
    let missing = unsafe { get_from_map(partition_map, "no-such-column".into(), allocate_str) };
    assert!(missing.is_null());

    let selection =
        ok_or_panic(unsafe { selection_vector_from_dv(dv_info, context.engine_interface, context.state) });
    let rows = unsafe { selection.as_slice() }.to_vec();
    unsafe { free_bool_slice(selection) };

    context.files.push((path, partition_id, rows));
}

extern "C" fn batch_visitor(
    context: *mut c_void,
    data: *mut EngineDataHandle,
    selection_vector: KernelBoolSlice,
) {
    unsafe {
        assert!(engine_data_length(data) >= 1);
        {
            let context = &mut *context.cast::<ScanContext>();
            context.batches += 1;
        }
        visit_scan_data(data, selection_vector, context, file_callback);
        free_bool_slice(selection_vector);
    }
}

extern "C" fn id_below_four(
    _predicate: *mut c_void,
    state: &mut KernelExpressionVisitorState,
) -> usize {
    let col = unsafe { visit_expression_column(state, "id".into()) };
    let lit = visit_expression_literal_long(state, 4);
    visit_expression_lt(state, col, lit)
}

// --- tests --------------------------------------------------------------------------------

#[test]
fn end_to_end_scan_over_the_c_surface() {
    let tmp = TempDir::new().unwrap();
    let url = Url::from_directory_path(tmp.path()).unwrap();

    let (payload, size_in_bytes) = serialize_deletion_bitmap(&[0]);
    fs::write(tmp.path().join("dv-part-2.bin"), &payload).unwrap();
    let mut dv_add = add_action("part-2.parquet", 3, "8");
    dv_add["add"]["deletionVector"] = json!({
        "storageType": "p",
        "pathOrInlineDv": url.join("dv-part-2.bin").unwrap().to_string(),
        "offset": null,
        "sizeInBytes": size_in_bytes,
        "cardinality": 1
    });

    write_commit(tmp.path(), 0, &[protocol_action(), metadata_action()]);
    write_commit(tmp.path(), 1, &[add_action("part-1.parquet", 10, "7")]);
    write_commit(tmp.path(), 2, &[dv_add]);

    let path_str = tmp.path().to_str().unwrap();
    let interface =
        ok_or_panic(unsafe { get_default_engine_interface(path_str.into(), allocate_err) });
    let snap = ok_or_panic(unsafe { snapshot(path_str.into(), interface) });
    assert_eq!(unsafe { version(snap) }, 2);

    let scan_handle = ok_or_panic(unsafe { scan(snap, interface, None) });
    let state = unsafe { get_global_scan_state(scan_handle) };

    let root = take_string(unsafe {
        slate_kernel_ffi::scan::global_scan_state_table_root(state, allocate_str)
    });
    assert!(root.starts_with("file://"));
    assert_eq!(unsafe { slate_kernel_ffi::scan::global_scan_state_version(state) }, 2);
    assert_eq!(
        unsafe { slate_kernel_ffi::scan::global_scan_state_partition_column_count(state) },
        1
    );
    let column = take_string(unsafe {
        slate_kernel_ffi::scan::global_scan_state_partition_column(state, 0, allocate_str)
    });
    assert_eq!(column, "id");
    let out_of_bounds = unsafe {
        slate_kernel_ffi::scan::global_scan_state_partition_column(state, 1, allocate_str)
    };
    assert!(out_of_bounds.is_null());

    let iter = ok_or_panic(unsafe { kernel_scan_data_init(interface, scan_handle) });
    let mut context = ScanContext {
        engine_interface: interface,
        state,
        files: Vec::new(),
        batches: 0,
    };
    let context_ptr: *mut c_void = (&mut context as *mut ScanContext).cast();
    loop {
        let more =
            ok_or_panic(unsafe { kernel_scan_data_next(&mut *iter, context_ptr, batch_visitor) });
        if !more {
            break;
        }
    }
    // exhaustion is repeatable
    assert!(!ok_or_panic(unsafe {
        kernel_scan_data_next(&mut *iter, context_ptr, batch_visitor)
    }));

    // one batch per commit carrying file actions, newest first
    assert_eq!(context.batches, 2);
    assert_eq!(context.files.len(), 2);
    let (path, partition, rows) = &context.files[0];
    assert_eq!(path, "part-2.parquet");
    assert_eq!(partition, "8");
    assert_eq!(rows, &[false, true, true]);
    let (path, partition, rows) = &context.files[1];
    assert_eq!(path, "part-1.parquet");
    assert_eq!(partition, "7");
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|r| *r));

    unsafe {
        kernel_scan_data_free(iter);
        drop_global_scan_state(state);
        drop_scan(scan_handle);
        drop_snapshot(snap);
        drop_engine_interface(interface);
    }
}

#[test]
fn predicate_crosses_the_boundary() {
    let tmp = TempDir::new().unwrap();
    write_commit(tmp.path(), 0, &[protocol_action(), metadata_action()]);
    write_commit(tmp.path(), 1, &[add_action("part-1.parquet", 5, "1")]);

    let path_str = tmp.path().to_str().unwrap();
    let interface =
        ok_or_panic(unsafe { get_default_engine_interface(path_str.into(), allocate_err) });
    let snap = ok_or_panic(unsafe { snapshot(path_str.into(), interface) });

    let mut predicate = EnginePredicate {
        predicate: std::ptr::null_mut(),
        visitor: id_below_four,
    };
    let scan_handle = ok_or_panic(unsafe { scan(snap, interface, Some(&mut predicate)) });

    // the predicate is stored for the host, not evaluated: the file still surfaces
    let state = unsafe { get_global_scan_state(scan_handle) };
    let iter = ok_or_panic(unsafe { kernel_scan_data_init(interface, scan_handle) });
    let mut context = ScanContext {
        engine_interface: interface,
        state,
        files: Vec::new(),
        batches: 0,
    };
    let context_ptr: *mut c_void = (&mut context as *mut ScanContext).cast();
    while ok_or_panic(unsafe { kernel_scan_data_next(&mut *iter, context_ptr, batch_visitor) }) {}
    assert_eq!(context.files.len(), 1);
    assert_eq!(context.files[0].0, "part-1.parquet");

    unsafe {
        kernel_scan_data_free(iter);
        drop_global_scan_state(state);
        drop_scan(scan_handle);
        drop_snapshot(snap);
        drop_engine_interface(interface);
    }
}

#[test]
fn closed_iterator_reports_use_after_close() {
    let tmp = TempDir::new().unwrap();
    write_commit(tmp.path(), 0, &[protocol_action(), metadata_action()]);
    write_commit(tmp.path(), 1, &[add_action("part-1.parquet", 5, "1")]);

    let path_str = tmp.path().to_str().unwrap();
    let interface =
        ok_or_panic(unsafe { get_default_engine_interface(path_str.into(), allocate_err) });
    let snap = ok_or_panic(unsafe { snapshot(path_str.into(), interface) });
    let scan_handle = ok_or_panic(unsafe { scan(snap, interface, None) });
    let iter = ok_or_panic(unsafe { kernel_scan_data_init(interface, scan_handle) });

    unsafe { kernel_scan_data_close(iter) };
    let result = unsafe {
        kernel_scan_data_next(&mut *iter, std::ptr::null_mut(), batch_visitor)
    };
    match result {
        ExternResult::Ok(_) => panic!("expected a use-after-close error"),
        ExternResult::Err(err) => assert_eq!(error_code(err), KernelError::UseAfterCloseError),
    }

    unsafe {
        kernel_scan_data_free(iter);
        drop_scan(scan_handle);
        drop_snapshot(snap);
        drop_engine_interface(interface);
    }
}

#[test]
fn missing_version_surfaces_its_code() {
    let tmp = TempDir::new().unwrap();
    write_commit(tmp.path(), 0, &[protocol_action(), metadata_action()]);

    let path_str = tmp.path().to_str().unwrap();
    let interface =
        ok_or_panic(unsafe { get_default_engine_interface(path_str.into(), allocate_err) });

    let result = unsafe { snapshot_at_version(path_str.into(), interface, 9) };
    match result {
        ExternResult::Ok(_) => panic!("expected version-not-found"),
        ExternResult::Err(err) => assert_eq!(error_code(err), KernelError::VersionNotFoundError),
    }

    unsafe { drop_engine_interface(interface) };
}
