//! The runtime context.
//!
//! [`Ffi`] owns every registry of one embedding: the declaration store, the
//! metatype registry, the callback table and the default library handle.
//! It is a cheap handle around shared state and is deliberately `!Send`;
//! values created by one context must only be used with that context.

use crate::abi;
use crate::arith::Scalar;
use crate::cdata::{CData, Rule, read_prim, write_prim};
use crate::ctype::{ArrayLen, CType, CTypeKind, CTypeRef, DeclStore, Primitive, array_size};
use crate::errors::{FfiError, Result};
use crate::library::Library;
use crate::marshal::CallbackTable;
use crate::metatype::{MetaOp, Metatype, MetatypeRegistry};
use crate::parser::{CDeclParser, DeclParser, NumberLiteral};
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, error};

/// Hook invoked when a callback fails while native code is on the stack
pub type FatalHandler = Rc<dyn Fn(&FfiError)>;

/// Runtime configuration
#[derive(Clone)]
pub struct FfiConfig {
    /// Treat `long` as `long long` in arithmetic; true where they have the
    /// same width
    pub collapse_long: bool,
    /// Whether `load` exports symbols globally when not told otherwise
    pub global_load: bool,
    fatal_handler: Option<FatalHandler>,
}

impl Default for FfiConfig {
    fn default() -> Self {
        FfiConfig {
            collapse_long: size_of::<libc::c_long>() == size_of::<libc::c_longlong>(),
            global_load: false,
            fatal_handler: None,
        }
    }
}

impl FfiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collapse_long(mut self, collapse: bool) -> Self {
        self.collapse_long = collapse;
        self
    }

    pub fn with_global_load(mut self, global: bool) -> Self {
        self.global_load = global;
        self
    }

    pub fn with_fatal_handler(mut self, handler: impl Fn(&FfiError) + 'static) -> Self {
        self.fatal_handler = Some(Rc::new(handler));
        self
    }
}

impl fmt::Debug for FfiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfiConfig")
            .field("collapse_long", &self.collapse_long)
            .field("global_load", &self.global_load)
            .field("fatal_handler", &self.fatal_handler.is_some())
            .finish()
    }
}

pub(crate) struct FfiState {
    pub(crate) config: FfiConfig,
    pub(crate) parser: Box<dyn DeclParser>,
    pub(crate) store: RefCell<DeclStore>,
    pub(crate) metatypes: RefCell<MetatypeRegistry>,
    pub(crate) callbacks: Rc<RefCell<CallbackTable>>,
    pub(crate) default_library: Library,
    /// Error raised by a callback during the current native call
    pub(crate) pending: RefCell<Option<FfiError>>,
    /// Native calls currently on the stack
    pub(crate) native_depth: Cell<usize>,
}

impl FfiState {
    /// Record a callback failure. The first failure during a native call
    /// is the one reported once the call returns.
    pub(crate) fn report_callback_error(&self, err: FfiError) {
        match &self.config.fatal_handler {
            Some(handler) => handler(&err),
            None => error!(error = %err, "callback failed while native code was running"),
        }
        let mut pending = self.pending.borrow_mut();
        if pending.is_none() {
            *pending = Some(err);
        }
    }
}

/// Handle to one FFI runtime
#[derive(Clone)]
pub struct Ffi {
    pub(crate) inner: Rc<FfiState>,
}

impl Default for Ffi {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Ffi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ffi")
            .field("config", &self.inner.config)
            .field("callbacks", &self.inner.callbacks.borrow())
            .finish()
    }
}

mod errno {
    #[cfg(any(target_os = "linux", target_os = "emscripten"))]
    fn location() -> *mut libc::c_int {
        // SAFETY: always returns the calling thread's errno slot
        unsafe { libc::__errno_location() }
    }

    #[cfg(any(target_os = "android", target_os = "openbsd", target_os = "netbsd"))]
    fn location() -> *mut libc::c_int {
        // SAFETY: always returns the calling thread's errno slot
        unsafe { libc::__errno() }
    }

    #[cfg(any(target_vendor = "apple", target_os = "freebsd", target_os = "dragonfly"))]
    fn location() -> *mut libc::c_int {
        // SAFETY: always returns the calling thread's errno slot
        unsafe { libc::__error() }
    }

    #[cfg(any(
        target_os = "linux",
        target_os = "emscripten",
        target_os = "android",
        target_os = "openbsd",
        target_os = "netbsd",
        target_vendor = "apple",
        target_os = "freebsd",
        target_os = "dragonfly"
    ))]
    pub fn replace(new: Option<i32>) -> i32 {
        let slot = location();
        // SAFETY: the slot is valid for the lifetime of the thread
        unsafe {
            let old = *slot;
            if let Some(v) = new {
                *slot = v;
            }
            old
        }
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "emscripten",
        target_os = "android",
        target_os = "openbsd",
        target_os = "netbsd",
        target_vendor = "apple",
        target_os = "freebsd",
        target_os = "dragonfly"
    )))]
    pub fn replace(new: Option<i32>) -> i32 {
        if new.is_some() {
            tracing::debug!("setting errno is not supported on this target");
        }
        std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
    }
}

fn parse_host_number(text: &str) -> Value {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Value::Integer(i);
    }
    let hex = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .and_then(|digits| u64::from_str_radix(digits, 16).ok());
    if let Some(u) = hex {
        return Value::Integer(u as i64);
    }
    text.parse::<f64>().map(Value::Number).unwrap_or(Value::Null)
}

impl Ffi {
    pub fn new() -> Self {
        Self::with_config(FfiConfig::default())
    }

    pub fn with_config(config: FfiConfig) -> Self {
        Self::with_parser(config, CDeclParser)
    }

    /// A runtime whose types come from another declaration front end
    pub fn with_parser(config: FfiConfig, parser: impl DeclParser + 'static) -> Self {
        Ffi {
            inner: Rc::new(FfiState {
                config,
                parser: Box::new(parser),
                store: RefCell::new(DeclStore::new()),
                metatypes: RefCell::new(MetatypeRegistry::new()),
                callbacks: Rc::new(RefCell::new(CallbackTable::default())),
                default_library: Library::default_namespace(),
                pending: RefCell::new(None),
                native_depth: Cell::new(0),
            }),
        }
    }

    pub(crate) fn from_state(inner: Rc<FfiState>) -> Self {
        Ffi { inner }
    }

    pub fn config(&self) -> &FfiConfig {
        &self.inner.config
    }

    pub(crate) fn collapse_long(&self) -> bool {
        self.inner.config.collapse_long
    }

    /// Number of callbacks whose trampolines are still allocated
    pub fn live_callbacks(&self) -> usize {
        self.inner.callbacks.borrow().len()
    }

    pub(crate) fn metatype_of(&self, ty: &CType) -> Option<Rc<Metatype>> {
        let record = ty.metatype_record()?;
        self.inner.metatypes.borrow().get(record.id)
    }

    /// Install the record metatype's `__gc` on a freshly created record
    pub(crate) fn attach_gc(&self, cd: &CData) {
        let Some(record) = cd.ty().record_ref() else {
            return;
        };
        let metatype = self.inner.metatypes.borrow().get(record.id);
        if let Some(gc) = metatype.as_ref().and_then(|mt| mt.get(MetaOp::Gc)) {
            cd.set_finalizer(Some(gc.clone()));
        }
    }

    /// Read a cdata as a host value; references read their referent
    pub(crate) fn read_cdata(&self, cd: &CData, rule: Rule, lossy: bool) -> Result<Value> {
        let ty = cd.ty();
        match &ty.kind {
            CTypeKind::Reference(base) => self.to_host(base, cd.storage(), rule, lossy),
            CTypeKind::Function(_) => Ok(Value::CData(cd.clone())),
            _ => self.to_host(ty, cd.storage(), rule, lossy),
        }
    }

    fn type_params(&self, params: &[Value]) -> Result<Vec<CTypeRef>> {
        params
            .iter()
            .map(|p| match p {
                Value::CData(cd) => Ok(cd.ty().clone()),
                other => Err(FfiError::type_error(format!(
                    "'{}' cannot be used as a type parameter",
                    other.type_name()
                ))),
            })
            .collect()
    }

    /// Parse declarations; `$` in `text` is replaced by the types of
    /// `params` in order
    pub fn declare(&self, text: &str, params: &[Value]) -> Result<()> {
        let params = self.type_params(params)?;
        let mut store = self.inner.store.borrow_mut();
        self.inner.parser.declare(&mut store, text, &params)?;
        debug!(bytes = text.len(), params = params.len(), "declared C definitions");
        Ok(())
    }

    pub fn cdef(&self, text: &str) -> Result<()> {
        self.declare(text, &[])
    }

    /// The C type a host value designates: a type name, or the type of a
    /// cdata
    pub fn ctype_of(&self, value: &Value, params: &[Value]) -> Result<CTypeRef> {
        match value {
            Value::String(text) => {
                let params = self.type_params(params)?;
                let mut store = self.inner.store.borrow_mut();
                self.inner.parser.parse_type(&mut store, text, &params)
            }
            Value::CData(cd) => Ok(cd.ty().clone()),
            _ => Err(FfiError::type_error("invalid C type")),
        }
    }

    pub fn new_cdata(&self, ty: &Value, inits: &[Value]) -> Result<CData> {
        let ty = self.ctype_of(ty, &[])?;
        self.construct(&ty, inits, Rule::Conv)
    }

    pub fn cast(&self, ty: &Value, value: &Value) -> Result<CData> {
        let ty = self.ctype_of(ty, &[])?;
        self.construct(&ty, std::slice::from_ref(value), Rule::Cast)
    }

    /// Register operator overrides for a record type
    pub fn metatype(&self, ty: &Value, table: &Value) -> Result<CData> {
        let ty = self.ctype_of(ty, &[])?;
        let record = ty
            .record_ref()
            .ok_or_else(|| FfiError::argument(1, "metatype", "invalid C type"))?;
        let metatype = Metatype::from_table(table)?;
        self.inner
            .metatypes
            .borrow_mut()
            .register(record.id, metatype)?;
        debug!(ty = %ty, "registered metatype");
        Ok(CData::ctype(ty))
    }

    pub fn type_of(&self, value: &Value, params: &[Value]) -> Result<CData> {
        Ok(CData::ctype(self.ctype_of(value, params)?))
    }

    pub fn addressof(&self, cd: &CData) -> Result<CData> {
        self.address_of(cd)
    }

    pub fn reference(&self, cd: &CData) -> Result<CData> {
        self.make_reference(cd)
    }

    /// Set or, with `nil`, clear the finalizer of a value
    pub fn gc(&self, cd: &CData, finalizer: &Value) -> CData {
        let finalizer = match finalizer {
            Value::Null => None,
            other => Some(other.clone()),
        };
        cd.set_finalizer(finalizer);
        cd.clone()
    }

    /// Size in bytes, `None` when it cannot be known. `count` sizes
    /// variable-length arrays.
    pub fn sizeof(&self, ty: &Value, count: Option<&Value>) -> Result<Option<usize>> {
        if let Value::CData(cd) = ty
            && !cd.is_ctype()
        {
            return Ok(Some(cd.ty().deref().alloc_size()));
        }
        let ty = self.ctype_of(ty, &[])?;
        if let CTypeKind::Array {
            base,
            len: ArrayLen::Vla,
        } = &ty.kind
        {
            let Some(count) = count else {
                return Ok(None);
            };
            let count = self.scalar_from(count, &CType::prim(Primitive::LLong), Rule::Conv)?;
            let n = match count {
                Scalar::UInt(u) => u as usize,
                other if other.as_f64() < 0.0 => return Ok(None),
                other => other.as_i64() as usize,
            };
            return Ok(array_size(base.alloc_size(), n));
        }
        if ty.is_unbounded() {
            return Ok(None);
        }
        Ok(Some(ty.alloc_size()))
    }

    pub fn alignof(&self, ty: &Value) -> Result<usize> {
        Ok(self.ctype_of(ty, &[])?.align())
    }

    /// Offset of a record member; `None` for non-records and unknown names
    pub fn offsetof(&self, ty: &Value, field: &str) -> Result<Option<usize>> {
        let ty = self.ctype_of(ty, &[])?;
        Ok(ty.field_offset(field).map(|(offset, _)| offset))
    }

    /// Whether `value` is a cdata of type `ty`. A record type also matches
    /// pointers and references to it.
    pub fn istype(&self, ty: &Value, value: &Value) -> Result<bool> {
        let ty = self.ctype_of(ty, &[])?;
        let Value::CData(cd) = value else {
            return Ok(false);
        };
        let vty = cd.ty();
        if ty.is_record()
            && (vty.is_pointer() || vty.is_reference())
            && let Some(base) = vty.base()
        {
            return Ok(ty.is_same(base, true));
        }
        Ok(ty.is_same(vty, true))
    }

    /// The current `errno`, optionally replacing it
    pub fn errno(&self, new: Option<i32>) -> i32 {
        errno::replace(new)
    }

    /// Address behind a pointer, array or reference argument
    pub(crate) fn void_ptr(&self, value: &Value, position: usize, function: &str) -> Result<usize> {
        let message = match value {
            Value::CData(cd) if cd.is_ctype() => "cannot convert 'ctype' to 'void *'".to_string(),
            Value::CData(cd) => {
                let ty = cd.ty();
                if ty.is_pointer() || ty.is_reference() || ty.is_array() {
                    return Ok(cd.pointer_value());
                }
                format!("cannot convert '{ty}' to 'void *'")
            }
            other => format!("cannot convert '{}' to 'void *'", other.type_name()),
        };
        Err(FfiError::argument(position, function, message))
    }

    /// Bytes at a pointer, up to the first NUL unless `len` is given
    pub fn string(&self, value: &Value, len: Option<usize>) -> Result<Vec<u8>> {
        let cd = match value {
            Value::CData(cd) if !cd.is_ctype() => cd,
            Value::CData(_) => {
                return Err(FfiError::argument(
                    1,
                    "string",
                    "cannot convert 'ctype' to 'char const *'",
                ));
            }
            other => {
                return Err(FfiError::argument(
                    1,
                    "string",
                    format!("cannot convert '{}' to 'char const *'", other.type_name()),
                ));
            }
        };
        let addr = cd.pointer_value();
        if addr == 0 {
            if len == Some(0) {
                return Ok(Vec::new());
            }
            return Err(FfiError::argument(
                1,
                "string",
                "cannot convert 'NULL' to 'char const *'",
            ));
        }
        // SAFETY: the caller vouches for the pointer, as in C
        let bytes = unsafe {
            match len {
                Some(n) => std::slice::from_raw_parts(addr as *const u8, n),
                None => std::ffi::CStr::from_ptr(addr as *const libc::c_char).to_bytes(),
            }
        };
        Ok(bytes.to_vec())
    }

    /// Copy `len` bytes from `src` to `dst`; a string source defaults to
    /// its length
    pub fn copy(&self, dst: &Value, src: &Value, len: Option<usize>) -> Result<()> {
        let dst = self.void_ptr(dst, 1, "copy")?;
        let (src, len) = match src {
            Value::String(_) | Value::Bytes(_) => {
                let s = src.as_bytes().unwrap_or_default();
                (s.as_ptr() as usize, len.unwrap_or(s.len()))
            }
            other => {
                let src = self.void_ptr(other, 2, "copy")?;
                let len =
                    len.ok_or_else(|| FfiError::argument(3, "copy", "number expected, got no value"))?;
                (src, len)
            }
        };
        // SAFETY: the caller vouches for both regions, as with memcpy
        unsafe { std::ptr::copy(src as *const u8, dst as *mut u8, len) };
        Ok(())
    }

    /// Set `len` bytes at `dst` to `byte` (default 0)
    pub fn fill(&self, dst: &Value, len: usize, byte: Option<i64>) -> Result<()> {
        let dst = self.void_ptr(dst, 1, "fill")?;
        // SAFETY: the caller vouches for the region, as with memset
        unsafe { std::ptr::write_bytes(dst as *mut u8, byte.unwrap_or(0) as u8, len) };
        Ok(())
    }

    /// Arithmetic cdata as a host number; other cdata give `nil`, host
    /// values convert like the host's own `tonumber`
    pub fn tonumber(&self, value: &Value) -> Result<Value> {
        match value {
            Value::CData(cd) if cd.is_ctype() => Ok(Value::Null),
            Value::CData(cd) => {
                let ty = cd.ty().deref();
                if ty.is_arith() {
                    self.to_host(&ty, cd.storage(), Rule::Conv, true)
                } else {
                    Ok(Value::Null)
                }
            }
            Value::Integer(_) | Value::Number(_) => Ok(value.clone()),
            Value::String(s) => Ok(parse_host_number(s)),
            _ => Ok(Value::Null),
        }
    }

    /// Convert a cdata the way a function return value is converted
    pub fn toretval(&self, cd: &CData) -> Result<Value> {
        if cd.is_ctype() {
            return Err(FfiError::argument(1, "toretval", "cdata expected, got ctype"));
        }
        self.read_cdata(cd, Rule::Ret, false)
    }

    /// A numeric literal as an arithmetic cdata of its C type
    pub fn eval(&self, text: &str) -> Result<CData> {
        let (p, value) = match self.inner.parser.parse_number(text)? {
            NumberLiteral::Integer(u, p) => (p, Scalar::UInt(u)),
            NumberLiteral::Float(f, p) => (p, Scalar::Float(f)),
        };
        let cd = CData::alloc(CType::prim(p))?;
        // SAFETY: freshly allocated for `p`
        unsafe { write_prim(p, cd.addr(), value) };
        Ok(cd)
    }

    /// `"cdata"` for cdata, the host type name otherwise
    pub fn type_name(&self, value: &Value) -> &'static str {
        value.type_name()
    }

    /// Load a shared library, exporting its symbols globally when `global`
    /// (or the configured default) says so
    pub fn load(&self, name: &str, global: Option<bool>) -> Result<Library> {
        Library::open(name, global.unwrap_or(self.inner.config.global_load))
    }

    /// The process default namespace; every call returns the same handle
    pub fn default_library(&self) -> Library {
        self.inner.default_library.clone()
    }

    pub fn abi(&self, flag: &str) -> bool {
        abi::abi(flag)
    }

    pub fn os(&self) -> &'static str {
        abi::os()
    }

    pub fn arch(&self) -> &'static str {
        abi::arch()
    }

    /// A NULL `void *`
    pub fn nullptr(&self) -> Result<CData> {
        CData::pointer(CType::pointer_to(CType::void()), 0)
    }

    /// Numeric value of an arithmetic cdata as a raw scalar
    pub fn scalar_of(&self, cd: &CData) -> Option<Scalar> {
        let p = cd.ty().deref().primitive()?;
        if cd.is_ctype() {
            return None;
        }
        // SAFETY: the value (or its referent) holds a `p`
        Some(unsafe { read_prim(p, cd.addr()) })
    }
}
