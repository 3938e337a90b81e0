//! End-to-end calls into the C library through the default namespace.
//!
//! Every test declares the prototypes it needs, resolves them through
//! `Ffi::default_library` and calls them like a script would.

#![cfg(unix)]

use cffi_core::{BinOp, Ffi, FfiConfig, FfiError, Value};
use std::cell::Cell;
use std::rc::Rc;

/// Declare `decl` and resolve `name` from the default library
fn native(ffi: &Ffi, decl: &str, name: &str) -> Value {
    ffi.cdef(decl).unwrap();
    ffi.resolve(&ffi.default_library(), name).unwrap()
}

fn int(i: i64) -> Value {
    Value::Integer(i)
}

#[test]
fn test_strlen_of_host_string() {
    let ffi = Ffi::new();
    let strlen = native(&ffi, "size_t strlen(const char *s);", "strlen");
    let result = ffi.call(&strlen, &["hello, world".into()]).unwrap();
    assert_eq!(ffi.tonumber(&result[0]).unwrap(), int(12));
}

#[test]
fn test_abs_returns_host_integer() {
    let ffi = Ffi::new();
    let abs = native(&ffi, "int abs(int x);", "abs");
    assert_eq!(ffi.call(&abs, &[int(-42)]).unwrap(), vec![int(42)]);
    // a cdata argument converts like a host number
    let n = Value::CData(ffi.new_cdata(&"short".into(), &[int(-7)]).unwrap());
    assert_eq!(ffi.call(&abs, &[n]).unwrap(), vec![int(7)]);
}

#[test]
fn test_missing_arguments_are_reported() {
    let ffi = Ffi::new();
    let abs = native(&ffi, "int abs(int x);", "abs");
    let err = ffi.call(&abs, &[]).unwrap_err();
    assert!(matches!(err, FfiError::Argument { position: 1, .. }));
}

#[test]
fn test_snprintf_variadic_arguments() {
    let ffi = Ffi::new();
    let snprintf = native(
        &ffi,
        "int snprintf(char *buf, size_t n, const char *fmt, ...);",
        "snprintf",
    );
    let buf = Value::CData(ffi.new_cdata(&"char[64]".into(), &[]).unwrap());
    let wide = Value::CData(ffi.new_cdata(&"long long".into(), &[int(1 << 40)]).unwrap());
    let written = ffi
        .call(
            &snprintf,
            &[
                buf.clone(),
                int(64),
                "%d|%s|%.2f|%lld".into(),
                int(-5),
                "abc".into(),
                Value::Number(2.5),
                wide,
            ],
        )
        .unwrap();
    let text = ffi.string(&buf, None).unwrap();
    assert_eq!(text, b"-5|abc|2.50|1099511627776");
    assert_eq!(written, vec![int(text.len() as i64)]);
}

#[test]
fn test_qsort_with_callback() {
    let ffi = Ffi::new();
    let qsort = native(
        &ffi,
        "void qsort(void *base, size_t nmemb, size_t size, \
         int (*compar)(const void *, const void *));",
        "qsort",
    );
    let arr = Value::CData(
        ffi.new_cdata(&"int[5]".into(), &[int(5), int(3), int(9), int(1), int(4)])
            .unwrap(),
    );

    let calls = Rc::new(Cell::new(0));
    let seen = calls.clone();
    let inner = ffi.clone();
    let compare = Value::function("compare", move |args| {
        seen.set(seen.get() + 1);
        let a = inner.cast(&"const int *".into(), &args[0])?;
        let b = inner.cast(&"const int *".into(), &args[1])?;
        let a = inner.index(&Value::CData(a), &int(0))?;
        let b = inner.index(&Value::CData(b), &int(0))?;
        let order = a.as_integer().unwrap_or(0) - b.as_integer().unwrap_or(0);
        Ok(vec![int(order.signum())])
    });
    let cb = Value::CData(
        ffi.new_cdata(&"int (*)(const void *, const void *)".into(), &[compare])
            .unwrap(),
    );

    let result = ffi.call(&qsort, &[arr.clone(), int(5), int(4), cb.clone()]).unwrap();
    assert!(result.is_empty());
    assert!(calls.get() > 0);
    let sorted: Vec<_> = (0..5).map(|i| ffi.index(&arr, &int(i)).unwrap()).collect();
    assert_eq!(sorted, vec![int(1), int(3), int(4), int(5), int(9)]);

    let free = ffi.index(&cb, &"free".into()).unwrap();
    ffi.call_value(&free, &[cb.clone()]).unwrap();
    let err = ffi.call(&qsort, &[arr, int(5), int(4), cb]).unwrap_err();
    assert_eq!(err, FfiError::BadCallback);
}

#[test]
fn test_host_function_converts_to_callback_argument() {
    let ffi = Ffi::new();
    let qsort = native(
        &ffi,
        "void qsort(void *base, size_t nmemb, size_t size, \
         int (*compar)(const void *, const void *));",
        "qsort",
    );
    let arr = Value::CData(ffi.new_cdata(&"int[2]".into(), &[int(2), int(1)]).unwrap());
    let inner = ffi.clone();
    let compare = Value::function("compare", move |args| {
        let a = inner.cast(&"int *".into(), &args[0])?;
        let b = inner.cast(&"int *".into(), &args[1])?;
        let a = inner.index(&Value::CData(a), &int(0))?;
        let b = inner.index(&Value::CData(b), &int(0))?;
        let order = a.as_integer().unwrap_or(0) - b.as_integer().unwrap_or(0);
        Ok(vec![int(order.signum())])
    });
    ffi.call(&qsort, &[arr.clone(), int(2), int(4), compare]).unwrap();
    assert_eq!(ffi.index(&arr, &int(0)).unwrap(), int(1));
    // the temporary callback does not outlive the call
    assert_eq!(ffi.live_callbacks(), 0);
}

#[test]
fn test_raising_callback_fails_the_native_call() {
    let reported = Rc::new(Cell::new(0));
    let seen = reported.clone();
    let ffi = Ffi::with_config(FfiConfig::default().with_fatal_handler(move |err| {
        assert!(matches!(err, FfiError::NativeCall(_)));
        seen.set(seen.get() + 1);
    }));
    let qsort = native(
        &ffi,
        "void qsort(void *base, size_t nmemb, size_t size, \
         int (*compar)(const void *, const void *));",
        "qsort",
    );
    let arr = Value::CData(ffi.new_cdata(&"int[3]".into(), &[int(3), int(2), int(1)]).unwrap());
    let cb = Value::CData(
        ffi.new_cdata(
            &"int (*)(const void *, const void *)".into(),
            &[Value::function("boom", |_| Err(FfiError::runtime("comparison failed")))],
        )
        .unwrap(),
    );
    let err = ffi.call(&qsort, &[arr, int(3), int(4), cb]).unwrap_err();
    assert_eq!(err, FfiError::NativeCall("comparison failed".into()));
    assert!(!err.is_recoverable());
    assert!(reported.get() >= 1);
}

#[test]
fn test_pointer_arithmetic_over_native_memory() {
    let ffi = Ffi::new();
    let memset = native(&ffi, "void *memset(void *s, int c, size_t n);", "memset");
    let buf = Value::CData(ffi.new_cdata(&"unsigned char[8]".into(), &[]).unwrap());
    let mid = ffi.arith(BinOp::Add, &buf, &int(4)).unwrap();
    let ret = ffi.call(&memset, &[mid.clone(), int(0xAB), int(4)]).unwrap();
    assert!(ffi.eq(&ret[0], &mid).unwrap());
    assert_eq!(ffi.index(&buf, &int(3)).unwrap(), int(0));
    assert_eq!(ffi.index(&buf, &int(4)).unwrap(), int(0xAB));
    assert_eq!(ffi.index(&mid, &int(3)).unwrap(), int(0xAB));
}

#[test]
fn test_errno_after_failed_call() {
    let ffi = Ffi::new();
    let close = native(&ffi, "int close(int fd);", "close");
    ffi.errno(Some(0));
    assert_eq!(ffi.call(&close, &[int(-1)]).unwrap(), vec![int(-1)]);
    assert_eq!(ffi.errno(None), libc::EBADF);
}
