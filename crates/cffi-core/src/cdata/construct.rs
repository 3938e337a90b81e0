use super::convert::{cannot_convert, too_many_initializers};
use super::{CData, Rule};
use crate::ctype::{ArrayLen, CType, CTypeKind, CTypeRef};
use crate::errors::{FfiError, Result};
use crate::runtime::Ffi;
use crate::value::Value;

/// Initializers that fill every element of an array
fn is_scalar_init(value: &Value) -> bool {
    match value {
        Value::Integer(_) | Value::Number(_) | Value::Boolean(_) => true,
        Value::CData(cd) => !cd.is_ctype() && cd.ty().deref().is_arith(),
        _ => false,
    }
}

fn vla_length(value: &Value) -> Option<i64> {
    match value {
        Value::CData(cd) if !cd.is_ctype() => {
            let ty = cd.ty().deref();
            let p = ty.primitive()?;
            // SAFETY: the value holds an arithmetic `p`
            Some(unsafe { super::read_prim(p, cd.addr()) }.as_i64())
        }
        other => other.as_integer(),
    }
}

impl Ffi {
    /// Create a value of `ty` and apply `inits` to it under `rule`
    pub(crate) fn construct(&self, ty: &CTypeRef, inits: &[Value], rule: Rule) -> Result<CData> {
        let (ty, inits) = match &ty.kind {
            CTypeKind::Array {
                base,
                len: ArrayLen::Vla,
            } => {
                let (first, rest) = inits
                    .split_first()
                    .ok_or_else(|| FfiError::type_error("size of C type is unknown"))?;
                let n = vla_length(first)
                    .filter(|n| *n >= 0)
                    .ok_or_else(|| {
                        FfiError::type_error(format!("invalid size '{}' for '{ty}'", first))
                    })?;
                let fixed = CType::array_of(base.clone(), ArrayLen::Fixed(n as usize));
                (CType::qualified(&fixed, ty.quals), rest)
            }
            _ => (ty.clone(), inits),
        };

        if ty.is_reference() {
            return self.construct_reference(&ty, inits);
        }
        if ty.is_unbounded() {
            return Err(FfiError::type_error("size of C type is unknown"));
        }
        if ty.checked_size().is_none() {
            return Err(FfiError::type_error(format!("size of C type '{ty}' is unknown")));
        }

        if ty.is_pointer()
            && ty.is_callable()
            && let [Value::Function(f)] = inits
        {
            return self.create_callback(&ty, f.clone());
        }

        let cd = CData::alloc(ty.clone())?;
        let addr = cd.addr();
        let mut keep = Vec::new();
        match (&ty.kind, inits) {
            (_, []) => {}
            (CTypeKind::Array { base, .. }, [single]) if is_scalar_init(single) => {
                let esize = base.alloc_size();
                for i in 0..ty.alloc_size() / esize.max(1) {
                    self.from_host(base, addr + i * esize, single, rule, &mut keep)?;
                }
            }
            (CTypeKind::Record(_), [single])
                if !matches!(single, Value::Table(_) | Value::Array(_) | Value::CData(_)) =>
            {
                self.positional_fields(&ty, addr, inits, rule, &mut keep)?;
            }
            (_, [single]) => self.from_host(&ty, addr, single, rule, &mut keep)?,
            (CTypeKind::Array { base, len }, many) => {
                let esize = base.alloc_size();
                if let ArrayLen::Fixed(n) = len
                    && many.len() > *n
                {
                    return Err(too_many_initializers(&ty));
                }
                for (i, v) in many.iter().enumerate() {
                    self.from_host(base, addr + i * esize, v, rule, &mut keep)?;
                }
            }
            (CTypeKind::Record(_), many) => {
                self.positional_fields(&ty, addr, many, rule, &mut keep)?;
            }
            _ => return Err(too_many_initializers(&ty)),
        }
        cd.anchor(keep);
        self.attach_gc(&cd);
        Ok(cd)
    }

    fn construct_reference(&self, ty: &CTypeRef, inits: &[Value]) -> Result<CData> {
        let base = ty.deref();
        match inits {
            [value @ Value::CData(src)] if !src.is_ctype() => {
                if !src.ty().deref().is_same(&base, true) {
                    return Err(cannot_convert(value, ty));
                }
                let cd = CData::aliasing(ty.clone(), src.storage().clone());
                cd.anchor(src.keepalive());
                Ok(cd)
            }
            [value] => Err(cannot_convert(value, ty)),
            _ => Err(FfiError::type_error(format!(
                "reference '{ty}' must be initialized with one value"
            ))),
        }
    }

    /// Pointer to a value: arrays decay to their first element, references
    /// yield their referent's address
    pub(crate) fn address_of(&self, cd: &CData) -> Result<CData> {
        if cd.is_ctype() {
            return Err(FfiError::type_error(format!(
                "cannot take the address of 'ctype<{}>'",
                cd.ty()
            )));
        }
        let ty = cd.ty();
        let pointee = match &ty.kind {
            CTypeKind::Reference(base) => base.clone(),
            CTypeKind::Array { base, .. } => base.clone(),
            _ => ty.clone(),
        };
        let ptr = CData::pointer(CType::pointer_to(pointee), cd.addr())?;
        ptr.anchor(cd.keepalive());
        Ok(ptr)
    }

    /// A reference aliasing the value's storage; references are returned
    /// unchanged
    pub(crate) fn make_reference(&self, cd: &CData) -> Result<CData> {
        if cd.is_ctype() {
            return Err(FfiError::type_error(format!(
                "cannot create a reference to 'ctype<{}>'",
                cd.ty()
            )));
        }
        if cd.ty().is_reference() {
            return Ok(cd.clone());
        }
        let r = CData::reference(cd.ty().clone(), cd.storage().clone());
        r.anchor(cd.keepalive());
        Ok(r)
    }
}
