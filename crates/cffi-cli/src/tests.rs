//! Tests for CLI handlers and utilities

use super::abi::{AbiReport, handle_abi};
use super::eval::handle_eval;
use super::query::*;
use super::utils::*;
use cffi_core::Ffi;
use std::fs;

#[test]
fn test_read_source_from_file() {
    let temp_path = std::env::temp_dir().join("cffi_cli_test_read.h");
    let content = "struct point { int x, y; };";
    fs::write(&temp_path, content).unwrap();

    let result = read_source(temp_path.to_str().unwrap());
    assert_eq!(result.unwrap(), content);

    let _ = fs::remove_file(temp_path);
}

#[test]
fn test_read_source_nonexistent_file() {
    assert!(read_source("/nonexistent/file/path.h").is_err());
}

#[test]
fn test_make_runtime_loads_declarations() {
    let temp_path = std::env::temp_dir().join("cffi_cli_test_decls.h");
    fs::write(&temp_path, "struct pair { char tag; double value; };").unwrap();

    let ffi = make_runtime(&[temp_path.to_str().unwrap().to_string()]).unwrap();
    assert_eq!(handle_sizeof(&ffi, "struct pair", None).unwrap(), "16");
    assert_eq!(handle_offsetof(&ffi, "struct pair", "value").unwrap(), "8");
    assert_eq!(handle_alignof(&ffi, "struct pair").unwrap(), "8");

    let _ = fs::remove_file(temp_path);
}

#[test]
fn test_make_runtime_reports_bad_declarations() {
    let temp_path = std::env::temp_dir().join("cffi_cli_test_bad.h");
    fs::write(&temp_path, "struct { int").unwrap();

    let err = make_runtime(&[temp_path.to_str().unwrap().to_string()]).unwrap_err();
    assert!(err.contains("cffi_cli_test_bad.h"));

    let _ = fs::remove_file(temp_path);
}

#[test]
fn test_sizeof_queries() {
    let ffi = Ffi::new();
    assert_eq!(handle_sizeof(&ffi, "int[4]", None).unwrap(), "16");
    assert_eq!(handle_sizeof(&ffi, "int[?]", Some(3)).unwrap(), "12");
    assert!(handle_sizeof(&ffi, "int[?]", None).is_err());
    assert_eq!(
        handle_sizeof(&ffi, "int[?]", Some(1 << 62)).unwrap_err(),
        "size of 'int[?]' is not known"
    );
    assert!(handle_offsetof(&ffi, "int", "x").is_err());
}

#[test]
fn test_typeof_canonical_spelling() {
    let ffi = Ffi::new();
    assert_eq!(handle_typeof(&ffi, "int(*)(int,double)").unwrap(), "ctype<int (*)(int, double)>");
}

#[test]
fn test_eval_keeps_c_typing() {
    let ffi = Ffi::new();
    assert_eq!(handle_eval(&ffi, "42").unwrap(), "42 (int)");
    assert_eq!(handle_eval(&ffi, "1ULL").unwrap(), "1ULL (unsigned long long)");
    assert!(handle_eval(&ffi, "12abc").is_err());
}

#[test]
fn test_abi_report() {
    let report = AbiReport::collect().unwrap();
    assert_eq!(report.types["void *"].size, size_of::<usize>());
    assert_eq!(report.types["int"].size, 4);

    let json = handle_abi(true).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["os"], report.os);
    assert!(parsed["flags"].as_array().is_some());

    let text = handle_abi(false).unwrap();
    assert!(text.starts_with("os:"));
}
