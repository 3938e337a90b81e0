//! Reverse calls: native code calling host functions through libffi
//! closures.
//!
//! Every callback owns a libffi closure and the trampoline data it points
//! at. Both live in the runtime's [`CallbackTable`] under a numeric id; the
//! value that created the callback holds a [`CallbackHandle`] which removes
//! the entry when it is freed or dropped.
//!
//! Errors never unwind through native frames. A failing host function (or a
//! panic) zero-fills the return slot, records a `NativeCall` error on the
//! runtime and invokes the fatal-error hook. The enclosing [`Ffi::invoke`]
//! reports the recorded error once native code returns.

use super::{RET_WIDTH, build_cif};
use crate::arith::Scalar;
use crate::cdata::{Anchor, Block, CData, Rule, Storage, read_prim};
use crate::ctype::{CType, CTypeRef, FuncSig};
use crate::errors::{FfiError, Result};
use crate::runtime::{Ffi, FfiState};
use crate::value::HostFunction;
use libffi::middle::Closure;
use libffi::raw;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};
use tracing::debug;

pub(crate) struct TrampolineData {
    sig: Rc<FuncSig>,
    func: RefCell<HostFunction>,
    runtime: Weak<FfiState>,
    /// Memory referenced by the last value returned to native code
    returned: RefCell<Vec<Anchor>>,
}

struct CallbackEntry {
    closure: Option<Closure<'static>>,
    data: *mut TrampolineData,
}

impl Drop for CallbackEntry {
    fn drop(&mut self) {
        // the closure refers to the data, so it goes first
        self.closure.take();
        // SAFETY: `data` came from `Box::into_raw` and is only freed here
        drop(unsafe { Box::from_raw(self.data) });
    }
}

/// Live callbacks of one runtime, keyed by id
#[derive(Default)]
pub struct CallbackTable {
    next_id: u64,
    entries: HashMap<u64, CallbackEntry>,
}

impl CallbackTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, entry: CallbackEntry) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, entry);
        id
    }
}

impl fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTable")
            .field("live", &self.entries.len())
            .finish()
    }
}

/// Ownership of one callback entry
pub struct CallbackHandle {
    id: u64,
    code: usize,
    table: Weak<RefCell<CallbackTable>>,
}

impl CallbackHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Native entry point of the trampoline
    pub fn code_ptr(&self) -> usize {
        self.code
    }

    /// Rebind the callback to another host function
    pub fn set(&self, func: HostFunction) -> Result<()> {
        let table = self.table.upgrade().ok_or(FfiError::BadCallback)?;
        let table = table.borrow();
        let entry = table.entries.get(&self.id).ok_or(FfiError::BadCallback)?;
        // SAFETY: the entry owns `data` until it is removed from the table
        let data = unsafe { &*entry.data };
        let old = data.func.replace(func);
        drop(table);
        drop(old);
        Ok(())
    }

    /// Remove the trampoline from the table. Copies of the callback's
    /// address dangle afterwards; returns whether it was still live.
    pub fn release(&self) -> bool {
        let Some(table) = self.table.upgrade() else {
            return false;
        };
        // remove under the borrow, drop after it: dropping the bound host
        // function may release other callbacks
        let entry = table
            .try_borrow_mut()
            .ok()
            .and_then(|mut t| t.entries.remove(&self.id));
        let live = entry.is_some();
        if live {
            debug!(id = self.id, "freed callback");
        }
        drop(entry);
        live
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHandle")
            .field("id", &self.id)
            .field("code", &format_args!("{:#x}", self.code))
            .finish()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic in callback".to_string()
    }
}

impl TrampolineData {
    fn dispatch(&self, ret: usize, args: *const *const c_void) -> Result<()> {
        let state = self
            .runtime
            .upgrade()
            .ok_or_else(|| FfiError::runtime("callback outlived its runtime"))?;
        let ffi = Ffi::from_state(state);

        let mut values = Vec::with_capacity(self.sig.params.len());
        for (i, ty) in self.sig.params.iter().enumerate() {
            // SAFETY: libffi passes one pointer per declared parameter
            let arg = unsafe { *args.add(i) } as usize;
            values.push(ffi.to_host(ty, &Storage::Foreign(arg), Rule::Conv, false)?);
        }

        let func = self.func.borrow().clone();
        let results = func.call(&values)?;

        let ret_ty = &self.sig.ret;
        if ret_ty.is_void() {
            return Ok(());
        }
        let value = results.into_iter().next().unwrap_or_default();
        let mut keep = Vec::new();
        match ret_ty.primitive() {
            Some(p) if p.is_integer() && p.size() < RET_WIDTH => {
                // narrow to the declared type, then widen into the register
                let narrow = Block::new(RET_WIDTH, RET_WIDTH)?;
                ffi.from_host(ret_ty, narrow.addr(), &value, Rule::Conv, &mut keep)?;
                // SAFETY: `narrow` holds a `p`, `ret` an ffi_arg
                unsafe {
                    let s = read_prim(p, narrow.addr());
                    let wide = match s {
                        Scalar::Int(i) => i as raw::ffi_arg,
                        other => other.as_u64() as raw::ffi_arg,
                    };
                    (ret as *mut raw::ffi_arg).write(wide);
                }
            }
            _ => ffi.from_host(ret_ty, ret, &value, Rule::Conv, &mut keep)?,
        }
        *self.returned.borrow_mut() = keep;
        Ok(())
    }

    fn return_size(&self) -> usize {
        let ret = &self.sig.ret;
        if ret.is_void() {
            0
        } else {
            ret.alloc_size().max(RET_WIDTH)
        }
    }
}

unsafe extern "C" fn trampoline(
    _cif: &raw::ffi_cif,
    result: &mut c_void,
    args: *const *const c_void,
    data: &TrampolineData,
) {
    let ret = result as *mut c_void as usize;
    let error = match catch_unwind(AssertUnwindSafe(|| data.dispatch(ret, args))) {
        Ok(Ok(())) => return,
        Ok(Err(FfiError::NativeCall(msg))) => FfiError::NativeCall(msg),
        Ok(Err(e)) => FfiError::NativeCall(e.to_string()),
        Err(payload) => FfiError::NativeCall(panic_message(payload)),
    };
    // SAFETY: libffi sizes the result slot for the return type
    unsafe { std::ptr::write_bytes(ret as *mut u8, 0, data.return_size()) };
    match data.runtime.upgrade() {
        Some(state) => state.report_callback_error(error),
        None => tracing::error!(error = %error, "callback failed after its runtime was dropped"),
    }
}

impl Ffi {
    /// Create a callback of function pointer type `ty` bound to `func`
    pub(crate) fn create_callback(&self, ty: &CTypeRef, func: HostFunction) -> Result<CData> {
        let sig = ty
            .signature()
            .cloned()
            .ok_or_else(|| FfiError::type_error(format!("'{ty}' is not a function type")))?;
        if sig.variadic {
            return Err(FfiError::type_error(format!(
                "cannot create a callback for variadic function '{ty}'"
            )));
        }
        let fn_ptr = if ty.is_function() {
            CType::pointer_to(ty.clone())
        } else {
            ty.clone()
        };

        let cif = build_cif(&sig, &[])?;
        let data = Box::into_raw(Box::new(TrampolineData {
            sig,
            func: RefCell::new(func),
            runtime: Rc::downgrade(&self.inner),
            returned: RefCell::new(Vec::new()),
        }));
        // SAFETY: the data stays allocated until the entry owning the
        // closure is dropped, and the closure is dropped first
        let userdata: &'static TrampolineData = unsafe { &*data };
        let closure = Closure::new(cif, trampoline, userdata);
        let code = *closure.code_ptr() as usize;

        let callbacks = &self.inner.callbacks;
        let id = callbacks.borrow_mut().insert(CallbackEntry {
            closure: Some(closure),
            data,
        });
        debug!(id, ty = %fn_ptr, "created callback");

        let handle = Rc::new(CallbackHandle {
            id,
            code,
            table: Rc::downgrade(callbacks),
        });
        let cd = CData::pointer(fn_ptr, code)?;
        cd.bind_closure(handle);
        Ok(cd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctype::Primitive;
    use crate::value::Value;

    fn int_to_int() -> CTypeRef {
        let int = CType::prim(Primitive::Int);
        CType::pointer_to(CType::function(int.clone(), vec![int], false))
    }

    #[test]
    fn test_callback_is_registered_and_released() {
        let ffi = Ffi::new();
        let cb = ffi
            .create_callback(&int_to_int(), HostFunction::new("id", |a| Ok(a.to_vec())))
            .unwrap();
        assert!(cb.is_closure());
        assert_ne!(cb.pointer_value(), 0);
        assert_eq!(ffi.live_callbacks(), 1);
        cb.free_closure().unwrap();
        assert_eq!(ffi.live_callbacks(), 0);
        assert_eq!(cb.free_closure(), Err(FfiError::BadCallback));
    }

    #[test]
    fn test_dropping_value_releases_callback() {
        let ffi = Ffi::new();
        let cb = ffi
            .create_callback(&int_to_int(), HostFunction::new("id", |a| Ok(a.to_vec())))
            .unwrap();
        drop(cb);
        assert_eq!(ffi.live_callbacks(), 0);
    }

    #[test]
    fn test_variadic_callbacks_are_rejected() {
        let ffi = Ffi::new();
        let ty = CType::pointer_to(CType::function(CType::void(), vec![], true));
        let err = ffi
            .create_callback(&ty, HostFunction::new("f", |_| Ok(vec![])))
            .unwrap_err();
        assert!(err.to_string().contains("variadic"));
    }

    #[test]
    fn test_set_rebinds_function() {
        let ffi = Ffi::new();
        let cb = ffi
            .create_callback(&int_to_int(), HostFunction::new("a", |_| Ok(vec![Value::Integer(1)])))
            .unwrap();
        let handle = cb.closure_handle().unwrap();
        handle
            .set(HostFunction::new("b", |_| Ok(vec![Value::Integer(2)])))
            .unwrap();
        let result = ffi.invoke(&cb, &[Value::Integer(0)]).unwrap();
        assert_eq!(result, vec![Value::Integer(2)]);
    }

    #[test]
    fn test_free_releases_trampoline_held_by_derived_values() {
        let ffi = Ffi::new();
        let cb = ffi
            .create_callback(&int_to_int(), HostFunction::new("id", |a| Ok(a.to_vec())))
            .unwrap();
        let handle = cb.closure_handle().unwrap();
        let alias = ffi.cast(&"void *".into(), &Value::CData(cb.clone())).unwrap();
        assert_eq!(alias.pointer_value(), cb.pointer_value());
        cb.free_closure().unwrap();
        assert_eq!(ffi.live_callbacks(), 0);
        assert!(!handle.release());
        assert_eq!(
            handle.set(HostFunction::new("late", |_| Ok(vec![]))),
            Err(FfiError::BadCallback)
        );
        drop(alias);
        drop(handle);
        assert_eq!(ffi.live_callbacks(), 0);
    }
}
