//! Argument checking shared by the module functions.
//!
//! Positions are 1-based, as scripts count them.

use cffi_core::{CData, FfiError, Result, Value};

fn got(value: Option<&Value>) -> &'static str {
    value.map_or("no value", Value::type_name)
}

/// Argument `pos`, which must be present (a `nil` counts as present)
pub fn arg<'a>(args: &'a [Value], pos: usize, function: &str) -> Result<&'a Value> {
    args.get(pos - 1)
        .ok_or_else(|| FfiError::argument(pos, function, "value expected"))
}

/// Argument `pos` unless it is missing or `nil`
pub fn opt_arg(args: &[Value], pos: usize) -> Option<&Value> {
    args.get(pos - 1).filter(|v| !matches!(v, Value::Null))
}

pub fn string_arg<'a>(args: &'a [Value], pos: usize, function: &str) -> Result<&'a str> {
    let value = args.get(pos - 1);
    match value {
        Some(Value::Bytes(_)) => Err(FfiError::argument(pos, function, "invalid UTF-8 in string")),
        _ => value.and_then(Value::as_str).ok_or_else(|| {
            FfiError::argument(pos, function, format!("string expected, got {}", got(value)))
        }),
    }
}

pub fn integer_arg(args: &[Value], pos: usize, function: &str) -> Result<i64> {
    let value = args.get(pos - 1);
    value.and_then(Value::as_integer).ok_or_else(|| {
        FfiError::argument(pos, function, format!("number expected, got {}", got(value)))
    })
}

pub fn opt_integer_arg(args: &[Value], pos: usize, function: &str) -> Result<Option<i64>> {
    match opt_arg(args, pos) {
        Some(_) => integer_arg(args, pos, function).map(Some),
        None => Ok(None),
    }
}

/// A non-negative length argument
pub fn length_arg(args: &[Value], pos: usize, function: &str) -> Result<usize> {
    let n = integer_arg(args, pos, function)?;
    usize::try_from(n)
        .map_err(|_| FfiError::argument(pos, function, format!("invalid length {n}")))
}

pub fn opt_length_arg(args: &[Value], pos: usize, function: &str) -> Result<Option<usize>> {
    match opt_arg(args, pos) {
        Some(_) => length_arg(args, pos, function).map(Some),
        None => Ok(None),
    }
}

/// A cdata (or ctype) argument
pub fn cdata_arg<'a>(args: &'a [Value], pos: usize, function: &str) -> Result<&'a CData> {
    let value = args.get(pos - 1);
    value.and_then(Value::as_cdata).ok_or_else(|| {
        FfiError::argument(pos, function, format!("cdata expected, got {}", got(value)))
    })
}

/// A C type designator: a declaration string or a cdata
pub fn ctype_arg<'a>(args: &'a [Value], pos: usize, function: &str) -> Result<&'a Value> {
    match args.get(pos - 1) {
        Some(v @ (Value::String(_) | Value::CData(_))) => Ok(v),
        other => Err(FfiError::argument(
            pos,
            function,
            format!("C type expected, got {}", got(other)),
        )),
    }
}

pub fn opt_bool_arg(args: &[Value], pos: usize) -> Option<bool> {
    opt_arg(args, pos).map(Value::is_truthy)
}

