//! Tests for argument checking helpers

use super::helpers::*;
use cffi_core::{FfiError, Value};

#[test]
fn test_missing_argument() {
    let err = arg(&[], 1, "cast").unwrap_err();
    assert_eq!(err.to_string(), "bad argument #1 to 'cast' (value expected)");
}

#[test]
fn test_nil_counts_as_present_but_not_as_optional() {
    let args = [Value::Null];
    assert!(arg(&args, 1, "istype").is_ok());
    assert!(opt_arg(&args, 1).is_none());
    assert!(opt_arg(&args, 2).is_none());
}

#[test]
fn test_string_arg() {
    let args = [Value::from("int"), Value::Integer(1)];
    assert_eq!(string_arg(&args, 1, "cdef").unwrap(), "int");
    let err = string_arg(&args, 2, "cdef").unwrap_err();
    assert_eq!(
        err,
        FfiError::argument(2, "cdef", "string expected, got number")
    );
    let err = string_arg(&args, 3, "cdef").unwrap_err();
    assert!(err.to_string().contains("got no value"));
    let err = string_arg(&[Value::bytes(vec![0xfe])], 1, "eval").unwrap_err();
    assert_eq!(err, FfiError::argument(1, "eval", "invalid UTF-8 in string"));
}

#[test]
fn test_integer_args() {
    let args = [Value::Number(4.0), Value::Number(1.5), Value::Integer(-1)];
    assert_eq!(integer_arg(&args, 1, "fill").unwrap(), 4);
    assert!(integer_arg(&args, 2, "fill").is_err());
    let err = length_arg(&args, 3, "fill").unwrap_err();
    assert_eq!(err.to_string(), "bad argument #3 to 'fill' (invalid length -1)");
    assert_eq!(opt_integer_arg(&args, 4, "fill").unwrap(), None);
    assert_eq!(opt_length_arg(&args, 1, "fill").unwrap(), Some(4));
}

#[test]
fn test_ctype_arg_accepts_strings_and_cdata() {
    let args = [Value::from("int"), Value::Boolean(true)];
    assert!(ctype_arg(&args, 1, "sizeof").is_ok());
    let err = ctype_arg(&args, 2, "sizeof").unwrap_err();
    assert_eq!(
        err.to_string(),
        "bad argument #2 to 'sizeof' (C type expected, got boolean)"
    );
}

#[test]
fn test_cdata_arg() {
    let err = cdata_arg(&[Value::Integer(1)], 1, "addressof").unwrap_err();
    assert_eq!(
        err.to_string(),
        "bad argument #1 to 'addressof' (cdata expected, got number)"
    );
}

#[test]
fn test_opt_bool_arg() {
    assert_eq!(opt_bool_arg(&[Value::from("x"), Value::Boolean(false)], 2), Some(false));
    assert_eq!(opt_bool_arg(&[Value::from("x")], 2), None);
}
