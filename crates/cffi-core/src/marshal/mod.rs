//! Outbound calls through libffi.
//!
//! Arguments are converted into individually allocated slots, the call
//! interface is built from the prototype (plus the dynamic types of any
//! variadic arguments), and the return slot is converted back with the
//! return rule.

mod callback;

pub use callback::{CallbackHandle, CallbackTable};

use crate::arith::Scalar;
use crate::cdata::{Anchor, Block, CData, Rule, Storage, storage_size, write_prim};
use crate::ctype::{ArrayLen, CHAR_UNSIGNED, CType, CTypeKind, CTypeRef, FuncSig, Primitive, Qualifiers};
use crate::errors::{FfiError, Result};
use crate::runtime::Ffi;
use crate::value::Value;
use libffi::middle::{Cif, CodePtr, Type};
use libffi::raw;
use std::ffi::c_void;
use tracing::{debug, trace};

/// Width of the slot libffi widens small integer returns to
const RET_WIDTH: usize = size_of::<raw::ffi_arg>();

fn prim_type(p: Primitive) -> Type {
    match p {
        Primitive::Bool | Primitive::UChar => Type::u8(),
        Primitive::Char if CHAR_UNSIGNED => Type::u8(),
        Primitive::Char | Primitive::SChar => Type::i8(),
        Primitive::Short => Type::i16(),
        Primitive::UShort => Type::u16(),
        Primitive::Float => Type::f32(),
        Primitive::Double => Type::f64(),
        p => match (p.size(), p.is_unsigned()) {
            (4, false) => Type::i32(),
            (4, true) => Type::u32(),
            (_, false) => Type::i64(),
            (_, true) => Type::u64(),
        },
    }
}

/// libffi description of a C type as it is passed by value
pub(crate) fn ffi_type(ty: &CType) -> Result<Type> {
    Ok(match &ty.kind {
        CTypeKind::Void => Type::void(),
        CTypeKind::Prim(p) => prim_type(*p),
        CTypeKind::Pointer(_) | CTypeKind::Reference(_) | CTypeKind::Function(_) => Type::pointer(),
        CTypeKind::Array { base, len } => {
            let n = match len {
                ArrayLen::Fixed(n) => *n,
                _ => return Err(FfiError::type_error(format!("size of C type '{ty}' is unknown"))),
            };
            let elem = ffi_type(base)?;
            Type::structure(std::iter::repeat_n(elem, n))
        }
        CTypeKind::Record(record) => {
            if record.is_opaque() {
                return Err(FfiError::type_error(format!("size of C type '{ty}' is unknown")));
            }
            let fields = record.fields();
            if record.is_union {
                // the most aligned member, padded out to the union's size
                let widest = fields
                    .iter()
                    .max_by_key(|f| (f.ty.align(), f.ty.alloc_size()))
                    .ok_or_else(|| FfiError::type_error(format!("'{ty}' has no members")))?;
                let pad = record.size() - widest.ty.alloc_size();
                let members = std::iter::once(ffi_type(&widest.ty)?)
                    .chain(std::iter::repeat_n(Type::u8(), pad))
                    .collect::<Vec<_>>();
                Type::structure(members)
            } else {
                let members = fields
                    .iter()
                    .map(|f| ffi_type(&f.ty))
                    .collect::<Result<Vec<_>>>()?;
                Type::structure(members)
            }
        }
    })
}

/// Build the call interface; `extra` types the variadic tail
pub(crate) fn build_cif(sig: &FuncSig, extra: &[CTypeRef]) -> Result<Cif> {
    let mut args = Vec::with_capacity(sig.params.len() + extra.len());
    for p in sig.params.iter().chain(extra) {
        args.push(ffi_type(p)?);
    }
    let ret = ffi_type(&sig.ret)?;
    Ok(if sig.variadic {
        Cif::new_variadic(args, sig.params.len(), ret)
    } else {
        Cif::new(args, ret)
    })
}

/// C type a variadic argument is passed as, after default promotions
fn variadic_type(value: &Value, position: usize) -> Result<CTypeRef> {
    let ty = match value {
        Value::Integer(i) if i32::try_from(*i).is_ok() => CType::prim(Primitive::Int),
        Value::Integer(_) => CType::prim(Primitive::LLong),
        Value::Number(_) => CType::prim(Primitive::Double),
        Value::Boolean(_) => CType::prim(Primitive::Int),
        Value::String(_) | Value::Bytes(_) => CType::pointer_to(CType::qualified(
            &CType::prim(Primitive::Char),
            Qualifiers::CONST,
        )),
        Value::Null => CType::pointer_to(CType::void()),
        Value::CData(cd) if !cd.is_ctype() => {
            let ty = cd.ty().deref();
            match &ty.kind {
                CTypeKind::Prim(Primitive::Float) => CType::prim(Primitive::Double),
                CTypeKind::Prim(p) if p.size() < size_of::<libc::c_int>() => {
                    CType::prim(Primitive::Int)
                }
                CTypeKind::Array { base, .. } => CType::pointer_to(base.clone()),
                CTypeKind::Function(_) => CType::pointer_to(ty.clone()),
                _ => ty,
            }
        }
        other => {
            return Err(FfiError::type_error(format!(
                "bad argument #{position} (cannot pass '{}' as a variadic argument)",
                other.type_name()
            )));
        }
    };
    Ok(ty)
}

/// Allocate an argument or return slot large enough for libffi
fn slot(ty: &CType) -> Result<std::rc::Rc<Block>> {
    Block::new(storage_size(ty).max(RET_WIDTH), ty.align().max(16))
}

impl Ffi {
    /// Call the native function designated by `func` with host arguments
    pub(crate) fn invoke(&self, func: &CData, args: &[Value]) -> Result<Vec<Value>> {
        let ty = func.ty();
        let sig = ty
            .signature()
            .cloned()
            .ok_or_else(|| FfiError::type_error(format!("'{ty}' is not callable")))?;
        let code = func.pointer_value();
        if code == 0 {
            return Err(FfiError::type_error(format!(
                "attempt to call a NULL '{ty}'"
            )));
        }

        let nfixed = sig.params.len();
        if args.len() < nfixed {
            return Err(FfiError::argument(
                args.len() + 1,
                &ty.serialize(),
                format!("expected {nfixed} arguments, got {}", args.len()),
            ));
        }
        let passed = if sig.variadic { args.len() } else { nfixed };

        let mut types: Vec<CTypeRef> = sig.params.clone();
        for (i, value) in args.iter().enumerate().take(passed).skip(nfixed) {
            types.push(variadic_type(value, i + 1)?);
        }
        let cif = build_cif(&sig, &types[nfixed..])?;

        let mut keep: Vec<Anchor> = Vec::new();
        let mut slots = Vec::with_capacity(passed);
        let mut arg_ptrs: Vec<*mut c_void> = Vec::with_capacity(passed);
        for (i, (pty, value)) in types.iter().zip(args).enumerate() {
            let arg = slot(pty)?;
            self.from_host(pty, arg.addr(), value, Rule::Conv, &mut keep)
                .map_err(|e| match e {
                    FfiError::BadCallback => e,
                    e => FfiError::type_error(format!("bad argument #{} ({e})", i + 1)),
                })?;
            arg_ptrs.push(arg.addr() as *mut c_void);
            slots.push(arg);
        }

        let ret = slot(&sig.ret)?;
        let depth = self.inner.native_depth.get();
        // errors of an enclosing call wait until this one returns
        let earlier = self.inner.pending.take();
        if depth == 0
            && let Some(err) = &earlier
        {
            debug!(error = %err, "discarding callback error raised outside a native call");
        }
        trace!(function = %ty, address = code, args = passed, "native call");
        self.inner.native_depth.set(depth + 1);
        // SAFETY: the interface matches the prototype and every argument
        // slot holds a converted value of its parameter type
        unsafe {
            raw::ffi_call(
                cif.as_raw_ptr(),
                Some(*CodePtr(code as *mut c_void).as_safe_fun()),
                ret.addr() as *mut c_void,
                arg_ptrs.as_mut_ptr(),
            );
        }
        self.inner.native_depth.set(depth);
        drop(keep);

        let restored = if depth > 0 { earlier } else { None };
        if let Some(err) = self.inner.pending.replace(restored) {
            return Err(err);
        }

        let ret_ty = &sig.ret;
        if ret_ty.is_void() {
            return Ok(vec![]);
        }
        let storage = Storage::Block {
            block: ret,
            offset: 0,
        };
        let value = match ret_ty.primitive() {
            Some(p) if p.is_integer() && p.size() < RET_WIDTH => {
                // small integers come back widened to a full register
                // SAFETY: the return slot holds an ffi_arg
                let wide = unsafe { (storage.addr() as *const raw::ffi_arg).read() };
                let narrow = Block::new(RET_WIDTH, RET_WIDTH)?;
                // SAFETY: the block holds at least one `p`
                unsafe { write_prim(p, narrow.addr(), Scalar::UInt(wide as u64)) };
                let narrow = Storage::Block {
                    block: narrow,
                    offset: 0,
                };
                self.to_host(ret_ty, &narrow, Rule::Ret, false)?
            }
            _ => self.to_host(ret_ty, &storage, Rule::Ret, false)?,
        };
        Ok(vec![value])
    }
}
