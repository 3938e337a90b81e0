//! Tests for the ffi module functions

use super::ffi::*;
use crate::{FUNCTIONS, create_ffi_module};
use cffi_core::{Ffi, FfiError, Value};

fn module_fn(module: &Value, name: &str) -> Value {
    let Value::Table(t) = module else {
        panic!("module should be a table");
    };
    t.borrow().get(name).cloned().unwrap_or_default()
}

fn call(module: &Value, name: &str, args: &[Value]) -> Result<Vec<Value>, FfiError> {
    match module_fn(module, name) {
        Value::Function(f) => f.call(args),
        other => panic!("{name} is not a function: {other:?}"),
    }
}

#[test]
fn test_module_exposes_every_function() {
    let ffi = Ffi::new();
    let module = create_ffi_module(&ffi).unwrap();
    for (name, _) in FUNCTIONS {
        assert!(
            matches!(module_fn(&module, name), Value::Function(_)),
            "missing {name}"
        );
    }
    assert!(matches!(module_fn(&module, "C"), Value::Library(_)));
    assert_eq!(module_fn(&module, "os"), Value::from(ffi.os()));
    let null = module_fn(&module, "nullptr");
    assert_eq!(null.as_cdata().unwrap().pointer_value(), 0);
}

#[test]
fn test_cdef_new_and_sizeof() {
    let ffi = Ffi::new();
    let module = create_ffi_module(&ffi).unwrap();
    call(&module, "cdef", &["struct pair { int a; double b; };".into()]).unwrap();
    let size = call(&module, "sizeof", &["struct pair".into()]).unwrap();
    assert_eq!(size, vec![Value::Integer(16)]);
    let offset = call(&module, "offsetof", &["struct pair".into(), "b".into()]).unwrap();
    assert_eq!(offset, vec![Value::Integer(8)]);
    let missing = call(&module, "offsetof", &["struct pair".into(), "c".into()]).unwrap();
    assert_eq!(missing, vec![Value::Null]);

    let pair = call(
        &module,
        "new",
        &["struct pair".into(), Value::Integer(1), Value::Number(2.5)],
    )
    .unwrap();
    assert_eq!(ffi.index(&pair[0], &"b".into()).unwrap(), Value::Number(2.5));
    let is = call(&module, "istype", &["struct pair".into(), pair[0].clone()]).unwrap();
    assert_eq!(is, vec![Value::Boolean(true)]);
}

#[test]
fn test_cdef_substitutes_type_parameters() {
    let ffi = Ffi::new();
    let int_t = Value::CData(ffi.type_of(&"int".into(), &[]).unwrap());
    native_cdef(&ffi, &["typedef $ myint;".into(), int_t]).unwrap();
    let size = native_sizeof(&ffi, &["myint".into()]).unwrap();
    assert_eq!(size, vec![Value::Integer(4)]);
}

#[test]
fn test_unbounded_sizeof_is_nil() {
    let ffi = Ffi::new();
    assert_eq!(native_sizeof(&ffi, &["int[?]".into()]).unwrap(), vec![Value::Null]);
    assert_eq!(
        native_sizeof(&ffi, &["int[?]".into(), Value::Integer(3)]).unwrap(),
        vec![Value::Integer(12)]
    );
    assert_eq!(
        native_sizeof(&ffi, &["int[?]".into(), Value::Integer(-1)]).unwrap(),
        vec![Value::Null]
    );
}

#[test]
fn test_argument_errors_name_the_function() {
    let ffi = Ffi::new();
    let err = native_new(&ffi, &[Value::Integer(1)]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "bad argument #1 to 'new' (C type expected, got number)"
    );
    let err = native_metatype(&ffi, &["int".into(), Value::Integer(1)]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "bad argument #2 to 'metatype' (table expected, got number)"
    );
    let err = native_gc(&ffi, &[Value::CData(ffi.nullptr().unwrap()), "x".into()]).unwrap_err();
    assert_eq!(err.to_string(), "bad argument #2 to 'gc' (function expected, got string)");
    let err = native_fill(&ffi, &[Value::Integer(0), Value::Integer(1)]).unwrap_err();
    assert!(matches!(err, FfiError::Argument { position: 1, .. }));
}

#[test]
fn test_string_copy_and_fill() {
    let ffi = Ffi::new();
    let buf = native_new(&ffi, &["char[8]".into()]).unwrap().remove(0);
    native_copy(&ffi, &[buf.clone(), "hi!".into()]).unwrap();
    assert_eq!(native_string(&ffi, &[buf.clone()]).unwrap(), vec![Value::from("hi!")]);
    assert_eq!(
        native_string(&ffi, &[buf.clone(), Value::Integer(2)]).unwrap(),
        vec![Value::from("hi")]
    );
    native_fill(&ffi, &[buf.clone(), Value::Integer(2), Value::Integer(b'x' as i64)]).unwrap();
    assert_eq!(native_string(&ffi, &[buf]).unwrap(), vec![Value::from("xx!")]);
}

#[test]
fn test_string_returns_binary_contents() {
    let ffi = Ffi::new();
    let buf = native_new(&ffi, &["char[4]".into()]).unwrap().remove(0);
    native_copy(&ffi, &[buf.clone(), Value::bytes(vec![0xff, 0x00, 0x41])]).unwrap();
    let out = native_string(&ffi, &[buf.clone(), Value::Integer(3)]).unwrap();
    assert_eq!(out, vec![Value::Bytes(vec![0xff, 0x00, 0x41])]);
    assert_eq!(out[0].type_name(), "string");
    let text = native_string(&ffi, &[buf, Value::Integer(0)]).unwrap();
    assert_eq!(text, vec![Value::from("")]);
}

#[test]
fn test_eval_type_and_tonumber() {
    let ffi = Ffi::new();
    let big = native_eval(&ffi, &["0xFFFFFFFFFFFFFFFFULL".into()]).unwrap().remove(0);
    assert_eq!(native_type(&ffi, &[big.clone()]).unwrap(), vec![Value::from("cdata")]);
    assert_eq!(
        native_tostring(&ffi, &[big.clone()]).unwrap(),
        vec![Value::from("18446744073709551615ULL")]
    );
    let n = native_tonumber(&ffi, &[big]).unwrap();
    assert_eq!(n, vec![Value::Number(18446744073709551615.0)]);
    assert_eq!(native_type(&ffi, &[Value::Integer(1)]).unwrap(), vec![Value::from("number")]);
}

#[test]
fn test_errno_roundtrip() {
    let ffi = Ffi::new();
    native_errno(&ffi, &[Value::Integer(5)]).unwrap();
    assert_eq!(native_errno(&ffi, &[]).unwrap(), vec![Value::Integer(5)]);
    let err = native_errno(&ffi, &[Value::Integer(1 << 40)]).unwrap_err();
    assert!(matches!(err, FfiError::Argument { position: 1, .. }));
}

#[test]
fn test_abi_flags() {
    let ffi = Ffi::new();
    let le = native_abi(&ffi, &["le".into()]).unwrap();
    let be = native_abi(&ffi, &["be".into()]).unwrap();
    assert_ne!(le, be);
}

#[test]
fn test_load_failure_is_reported() {
    let ffi = Ffi::new();
    let err = native_load(&ffi, &["no-such-library-anywhere".into()]).unwrap_err();
    assert!(matches!(err, FfiError::Library(_)));
}

#[test]
fn test_addressof_and_ref() {
    let ffi = Ffi::new();
    let n = native_new(&ffi, &["int".into(), Value::Integer(3)]).unwrap().remove(0);
    let p = native_addressof(&ffi, &[n.clone()]).unwrap().remove(0);
    assert_eq!(ffi.index(&p, &Value::Integer(0)).unwrap(), Value::Integer(3));
    let r = native_ref(&ffi, &[n]).unwrap().remove(0);
    let back = native_toretval(&ffi, &[r]).unwrap();
    assert_eq!(back, vec![Value::Integer(3)]);
}
