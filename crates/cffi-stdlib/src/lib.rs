pub mod native;

use cffi_core::{Ffi, FfiConfig, HostFunction, Result, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

// Re-export native functions for convenience
pub use native::*;

/// Signature shared by every module function
pub type NativeFn = fn(&Ffi, &[Value]) -> Result<Vec<Value>>;

/// Every module function with its script-visible name
pub const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("cdef", native_cdef),
    ("new", native_new),
    ("cast", native_cast),
    ("metatype", native_metatype),
    ("typeof", native_typeof),
    ("addressof", native_addressof),
    ("ref", native_ref),
    ("gc", native_gc),
    ("sizeof", native_sizeof),
    ("alignof", native_alignof),
    ("offsetof", native_offsetof),
    ("istype", native_istype),
    ("errno", native_errno),
    ("string", native_string),
    ("copy", native_copy),
    ("fill", native_fill),
    ("tonumber", native_tonumber),
    ("toretval", native_toretval),
    ("eval", native_eval),
    ("type", native_type),
    ("load", native_load),
    ("abi", native_abi),
    ("tostring", native_tostring),
];

/// Bind a module function to `ffi`
fn bind(ffi: &Ffi, name: &str, func: NativeFn) -> Value {
    let ffi = ffi.clone();
    Value::Function(HostFunction::new(name, move |args| func(&ffi, args)))
}

/// Build the `ffi` module table for one runtime.
///
/// Besides the functions it holds `C` (the default library), `nullptr`,
/// and the target's `os` and `arch` names.
pub fn create_ffi_module(ffi: &Ffi) -> Result<Value> {
    let mut module: HashMap<String, Value> = FUNCTIONS
        .iter()
        .map(|(name, func)| (name.to_string(), bind(ffi, name, *func)))
        .collect();

    module.insert("C".to_string(), Value::Library(ffi.default_library()));
    module.insert("nullptr".to_string(), Value::CData(ffi.nullptr()?));
    module.insert("os".to_string(), ffi.os().into());
    module.insert("arch".to_string(), ffi.arch().into());

    debug!(entries = module.len(), "created ffi module");
    Ok(Value::Table(Rc::new(RefCell::new(module))))
}

/// Create a runtime from `config` together with its module table
pub fn init(config: FfiConfig) -> Result<(Ffi, Value)> {
    let ffi = Ffi::with_config(config);
    let module = create_ffi_module(&ffi)?;
    Ok((ffi, module))
}
