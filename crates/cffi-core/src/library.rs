//! Library handles and symbol binding.
//!
//! A [`Library`] is either the process default namespace or a module loaded
//! with [`Library::open`]. Symbols are only reachable through a handle when
//! they have been declared; the declaration decides whether a symbol reads
//! as a function, a variable or an enumeration constant.

use crate::cdata::{Anchor, CData, Rule, Storage};
use crate::ctype::{Qualifiers, Symbol};
use crate::errors::{FfiError, Result};
use crate::runtime::Ffi;
use crate::value::Value;
use std::cell::RefCell;
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

enum Handle {
    /// Symbols already loaded into the process. On Windows the C runtime
    /// DLLs are searched in order.
    Default { runtimes: Vec<libloading::Library> },
    Loaded { lib: libloading::Library, path: String },
}

struct LibraryInner {
    handle: Handle,
    /// Memory that values stored into the library's variables point into
    stored: RefCell<Vec<Anchor>>,
}

#[derive(Clone)]
pub struct Library(Rc<LibraryInner>);

/// Map a bare library name to the platform's file name. Names with a path
/// separator or an extension are used as given.
pub fn platform_lib_name(name: &str) -> String {
    if name.contains(['/', '\\', '.']) {
        return name.to_string();
    }
    if cfg!(windows) {
        format!("{name}.dll")
    } else if cfg!(target_vendor = "apple") {
        format!("lib{name}.dylib")
    } else {
        format!("lib{name}.so")
    }
}

#[cfg(windows)]
fn runtime_libraries() -> Vec<libloading::Library> {
    ["ucrtbase.dll", "msvcrt.dll", "api-ms-win-crt-stdio-l1-1-0.dll"]
        .iter()
        // SAFETY: the C runtime has no initialization side effects
        .filter_map(|name| unsafe { libloading::Library::new(name) }.ok())
        .collect()
}

#[cfg(not(windows))]
fn runtime_libraries() -> Vec<libloading::Library> {
    Vec::new()
}

#[cfg(unix)]
fn open_module(path: &str, global: bool) -> Result<libloading::Library, libloading::Error> {
    use libloading::os::unix;
    let scope = if global { unix::RTLD_GLOBAL } else { unix::RTLD_LOCAL };
    // SAFETY: running the module's initializers is what loading asks for
    unsafe { unix::Library::open(Some(path), unix::RTLD_NOW | scope) }.map(Into::into)
}

#[cfg(not(unix))]
fn open_module(path: &str, _global: bool) -> Result<libloading::Library, libloading::Error> {
    // SAFETY: running the module's initializers is what loading asks for
    unsafe { libloading::Library::new(path) }
}

#[cfg(unix)]
fn default_symbol(_runtimes: &[libloading::Library], name: &str) -> Option<usize> {
    let name = std::ffi::CString::new(name).ok()?;
    // SAFETY: `name` is NUL-terminated
    let ptr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
    (!ptr.is_null()).then_some(ptr as usize)
}

#[cfg(not(unix))]
fn default_symbol(runtimes: &[libloading::Library], name: &str) -> Option<usize> {
    runtimes.iter().find_map(|lib| module_symbol(lib, name))
}

fn module_symbol(lib: &libloading::Library, name: &str) -> Option<usize> {
    // SAFETY: only the address is taken, nothing is called through it
    let sym = unsafe { lib.get::<*mut c_void>(name.as_bytes()) }.ok()?;
    let ptr = *sym;
    (!ptr.is_null()).then_some(ptr as usize)
}

impl Library {
    /// The process default namespace
    pub fn default_namespace() -> Library {
        Library(Rc::new(LibraryInner {
            handle: Handle::Default {
                runtimes: runtime_libraries(),
            },
            stored: RefCell::new(Vec::new()),
        }))
    }

    /// Load a shared library; `global` exports its symbols to modules
    /// loaded later
    pub fn open(name: &str, global: bool) -> Result<Library> {
        let path = platform_lib_name(name);
        let lib = open_module(&path, global)
            .map_err(|e| FfiError::Library(format!("could not load library '{name}': {e}")))?;
        debug!(path = %path, global, "loaded library");
        Ok(Library(Rc::new(LibraryInner {
            handle: Handle::Loaded { lib, path },
            stored: RefCell::new(Vec::new()),
        })))
    }

    pub fn is_default(&self) -> bool {
        matches!(self.0.handle, Handle::Default { .. })
    }

    pub fn path(&self) -> Option<&str> {
        match &self.0.handle {
            Handle::Loaded { path, .. } => Some(path),
            Handle::Default { .. } => None,
        }
    }

    pub fn ptr_eq(&self, other: &Library) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of `name`, if the library exports it
    pub fn symbol_address(&self, name: &str) -> Option<usize> {
        match &self.0.handle {
            Handle::Default { runtimes } => default_symbol(runtimes, name),
            Handle::Loaded { lib, .. } => module_symbol(lib, name),
        }
    }

    fn keep(&self, anchors: Vec<Anchor>) {
        self.0.stored.borrow_mut().extend(anchors);
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.handle {
            Handle::Default { .. } => write!(f, "library: default"),
            Handle::Loaded { .. } => write!(f, "library: {:p}", Rc::as_ptr(&self.0)),
        }
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Library")
            .field(&self.path().unwrap_or("default"))
            .finish()
    }
}

impl Ffi {
    fn declared_symbol(&self, name: &str) -> Result<Symbol> {
        self.inner
            .store
            .borrow()
            .symbol(name)
            .ok_or_else(|| FfiError::type_error(format!("missing declaration for symbol '{name}'")))
    }

    fn symbol_address(lib: &Library, name: &str) -> Result<usize> {
        lib.symbol_address(name)
            .ok_or_else(|| FfiError::type_error(format!("undefined symbol: {name}")))
    }

    /// Read a declared symbol through a library handle
    pub fn resolve(&self, lib: &Library, name: &str) -> Result<Value> {
        match self.declared_symbol(name)? {
            Symbol::Constant(value, _) => Ok(Value::Integer(value)),
            Symbol::Function(ty) => {
                let addr = Self::symbol_address(lib, name)?;
                let cd = CData::pointer(ty, addr)?;
                cd.anchor([Rc::new(lib.clone()) as Anchor]);
                Ok(Value::CData(cd))
            }
            Symbol::Variable(ty) => {
                let addr = Self::symbol_address(lib, name)?;
                let value = self.to_host(&ty, &Storage::Foreign(addr), Rule::Conv, false)?;
                if let Value::CData(cd) = &value {
                    cd.anchor([Rc::new(lib.clone()) as Anchor]);
                }
                Ok(value)
            }
        }
    }

    /// Assign to a declared variable through a library handle
    pub fn bind(&self, lib: &Library, name: &str, value: &Value) -> Result<()> {
        let ty = match self.declared_symbol(name)? {
            Symbol::Variable(ty) => ty,
            Symbol::Function(_) | Symbol::Constant(..) => {
                return Err(FfiError::type_error(format!(
                    "symbol '{name}' is not a variable"
                )));
            }
        };
        if ty.quals.contains(Qualifiers::CONST) {
            return Err(FfiError::type_error("attempt to write to constant location"));
        }
        let addr = Self::symbol_address(lib, name)?;
        let mut keep = Vec::new();
        self.from_host(&ty, addr, value, Rule::Conv, &mut keep)?;
        lib.keep(keep);
        Ok(())
    }
}
