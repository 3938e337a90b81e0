//! `eval` subcommand handler

use cffi_core::{Ffi, Value};

/// Evaluate a numeric literal; prints the value and its C type
pub fn handle_eval(ffi: &Ffi, literal: &str) -> Result<String, String> {
    let cd = ffi.eval(literal).map_err(|err| err.to_string())?;
    let ty = cd.ty().clone();
    let value = Value::CData(cd);
    // 64-bit integers keep their LL/ULL suffix
    let shown = if ty.is_integer() && ty.alloc_size() == 8 {
        ffi.tostring(&value)
    } else {
        ffi.tonumber(&value).map(|n| n.to_string())
    }
    .map_err(|err| err.to_string())?;
    Ok(format!("{shown} ({ty})"))
}
