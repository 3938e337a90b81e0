//! Type queries: `sizeof`, `alignof`, `offsetof` and `typeof`

use cffi_core::{Ffi, Value};

pub fn handle_sizeof(ffi: &Ffi, ty: &str, count: Option<i64>) -> Result<String, String> {
    let count = count.map(Value::Integer);
    match ffi.sizeof(&ty.into(), count.as_ref()) {
        Ok(Some(size)) => Ok(size.to_string()),
        Ok(None) => Err(format!("size of '{ty}' is not known")),
        Err(err) => Err(err.to_string()),
    }
}

pub fn handle_alignof(ffi: &Ffi, ty: &str) -> Result<String, String> {
    ffi.alignof(&ty.into())
        .map(|align| align.to_string())
        .map_err(|err| err.to_string())
}

pub fn handle_offsetof(ffi: &Ffi, ty: &str, field: &str) -> Result<String, String> {
    match ffi.offsetof(&ty.into(), field) {
        Ok(Some(offset)) => Ok(offset.to_string()),
        Ok(None) => Err(format!("'{ty}' has no member named '{field}'")),
        Err(err) => Err(err.to_string()),
    }
}

pub fn handle_typeof(ffi: &Ffi, ty: &str) -> Result<String, String> {
    ffi.type_of(&ty.into(), &[])
        .map(|ct| ct.to_string())
        .map_err(|err| err.to_string())
}
