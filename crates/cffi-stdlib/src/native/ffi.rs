//! Native functions of the `ffi` module.
//!
//! Each function takes the runtime it is bound to and the positional
//! arguments of the script call.

use super::helpers::*;
use cffi_core::{Ffi, FfiError, Result, Value};

fn size_value(size: Option<usize>) -> Value {
    size.map_or(Value::Null, |n| Value::Integer(n as i64))
}

/// ffi.cdef(decls, ...) -> nothing
pub fn native_cdef(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let text = string_arg(args, 1, "cdef")?;
    ffi.declare(text, &args[1..])?;
    Ok(vec![])
}

/// ffi.new(ct, ...) -> cdata
pub fn native_new(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let ty = ctype_arg(args, 1, "new")?;
    Ok(vec![Value::CData(ffi.new_cdata(ty, &args[1..])?)])
}

/// ffi.cast(ct, value) -> cdata
pub fn native_cast(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let ty = ctype_arg(args, 1, "cast")?;
    let value = arg(args, 2, "cast")?;
    Ok(vec![Value::CData(ffi.cast(ty, value)?)])
}

/// ffi.metatype(ct, table) -> ctype
pub fn native_metatype(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let ty = ctype_arg(args, 1, "metatype")?;
    let table = match args.get(1) {
        Some(t @ Value::Table(_)) => t,
        other => {
            return Err(FfiError::argument(
                2,
                "metatype",
                format!("table expected, got {}", other.map_or("no value", Value::type_name)),
            ));
        }
    };
    Ok(vec![Value::CData(ffi.metatype(ty, table)?)])
}

/// ffi.typeof(ct, ...) -> ctype
pub fn native_typeof(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let ty = ctype_arg(args, 1, "typeof")?;
    Ok(vec![Value::CData(ffi.type_of(ty, &args[1..])?)])
}

/// ffi.addressof(cdata) -> pointer
pub fn native_addressof(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let cd = cdata_arg(args, 1, "addressof")?;
    Ok(vec![Value::CData(ffi.addressof(cd)?)])
}

/// ffi.ref(cdata) -> reference
pub fn native_ref(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let cd = cdata_arg(args, 1, "ref")?;
    Ok(vec![Value::CData(ffi.reference(cd)?)])
}

/// ffi.gc(cdata, finalizer) -> cdata
pub fn native_gc(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let cd = cdata_arg(args, 1, "gc")?;
    let finalizer = args.get(1).cloned().unwrap_or_default();
    if !matches!(finalizer, Value::Null | Value::Function(_)) {
        return Err(FfiError::argument(
            2,
            "gc",
            format!("function expected, got {}", finalizer.type_name()),
        ));
    }
    Ok(vec![Value::CData(ffi.gc(cd, &finalizer))])
}

/// ffi.sizeof(ct[, nelem]) -> number or nil
pub fn native_sizeof(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let ty = ctype_arg(args, 1, "sizeof")?;
    Ok(vec![size_value(ffi.sizeof(ty, opt_arg(args, 2))?)])
}

/// ffi.alignof(ct) -> number
pub fn native_alignof(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let ty = ctype_arg(args, 1, "alignof")?;
    Ok(vec![size_value(Some(ffi.alignof(ty)?))])
}

/// ffi.offsetof(ct, field) -> number or nil
pub fn native_offsetof(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let ty = ctype_arg(args, 1, "offsetof")?;
    let field = string_arg(args, 2, "offsetof")?;
    Ok(vec![size_value(ffi.offsetof(ty, field)?)])
}

/// ffi.istype(ct, value) -> boolean
pub fn native_istype(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let ty = ctype_arg(args, 1, "istype")?;
    let value = arg(args, 2, "istype")?;
    Ok(vec![Value::Boolean(ffi.istype(ty, value)?)])
}

/// ffi.errno([new]) -> previous errno
pub fn native_errno(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let new = opt_integer_arg(args, 1, "errno")?
        .map(|n| {
            i32::try_from(n)
                .map_err(|_| FfiError::argument(1, "errno", format!("invalid errno {n}")))
        })
        .transpose()?;
    Ok(vec![Value::Integer(ffi.errno(new) as i64)])
}

/// ffi.string(ptr[, len]) -> string
pub fn native_string(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let value = arg(args, 1, "string")?;
    let len = opt_length_arg(args, 2, "string")?;
    Ok(vec![Value::bytes(ffi.string(value, len)?)])
}

/// ffi.copy(dst, src[, len]) -> nothing
pub fn native_copy(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let dst = arg(args, 1, "copy")?;
    let src = arg(args, 2, "copy")?;
    let len = opt_length_arg(args, 3, "copy")?;
    ffi.copy(dst, src, len)?;
    Ok(vec![])
}

/// ffi.fill(dst, len[, byte]) -> nothing
pub fn native_fill(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let dst = arg(args, 1, "fill")?;
    let len = length_arg(args, 2, "fill")?;
    let byte = opt_integer_arg(args, 3, "fill")?;
    ffi.fill(dst, len, byte)?;
    Ok(vec![])
}

/// ffi.tonumber(value) -> number or nil
pub fn native_tonumber(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let value = arg(args, 1, "tonumber")?;
    Ok(vec![ffi.tonumber(value)?])
}

/// ffi.toretval(cdata) -> value
pub fn native_toretval(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let cd = cdata_arg(args, 1, "toretval")?;
    Ok(vec![ffi.toretval(cd)?])
}

/// ffi.eval(literal) -> cdata
pub fn native_eval(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let text = string_arg(args, 1, "eval")?;
    Ok(vec![Value::CData(ffi.eval(text)?)])
}

/// ffi.type(value) -> type name
pub fn native_type(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let value = arg(args, 1, "type")?;
    Ok(vec![ffi.type_name(value).into()])
}

/// ffi.load(name[, global]) -> library
pub fn native_load(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let name = string_arg(args, 1, "load")?;
    Ok(vec![Value::Library(ffi.load(name, opt_bool_arg(args, 2))?)])
}

/// ffi.abi(flag) -> boolean
pub fn native_abi(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let flag = string_arg(args, 1, "abi")?;
    Ok(vec![Value::Boolean(ffi.abi(flag))])
}

/// ffi.tostring(value) -> string, honouring `__tostring`
pub fn native_tostring(ffi: &Ffi, args: &[Value]) -> Result<Vec<Value>> {
    let value = arg(args, 1, "tostring")?;
    Ok(vec![Value::String(ffi.tostring(value)?)])
}
