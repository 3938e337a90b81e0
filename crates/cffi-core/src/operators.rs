//! Operator dispatch for cdata values.
//!
//! Every operator first looks for an override in the metatype of either
//! operand (left operand first). Only when neither operand overrides it do
//! the built-in semantics apply: pointer arithmetic, the 64-bit arithmetic
//! engine, address or value comparison, member access and calls.

use crate::arith::{BinOp, CmpOp, ExprType, Operand, UnOp, compare, eval_binary, eval_unary};
use crate::cdata::{CData, Rule, Storage, describe, read_addr, read_prim, write_prim};
use crate::ctype::{CType, CTypeKind, CTypeRef, Qualifiers};
use crate::errors::{FfiError, Result};
use crate::metatype::MetaOp;
use crate::runtime::Ffi;
use crate::value::{HostFunction, Value};

fn binop_meta(op: BinOp) -> MetaOp {
    match op {
        BinOp::Add => MetaOp::Add,
        BinOp::Sub => MetaOp::Sub,
        BinOp::Mul => MetaOp::Mul,
        BinOp::Div => MetaOp::Div,
        BinOp::Mod => MetaOp::Mod,
        BinOp::Pow => MetaOp::Pow,
        BinOp::IDiv => MetaOp::IDiv,
        BinOp::BAnd => MetaOp::BAnd,
        BinOp::BOr => MetaOp::BOr,
        BinOp::BXor => MetaOp::BXor,
        BinOp::Shl => MetaOp::Shl,
        BinOp::Shr => MetaOp::Shr,
    }
}

/// Element type and address of a pointer-like value: pointers, arrays
/// and references to either
fn pointer_target(cd: &CData) -> Option<(CTypeRef, usize)> {
    if cd.is_ctype() {
        return None;
    }
    let ty = cd.ty();
    match &ty.kind {
        CTypeKind::Pointer(base) => Some((base.clone(), cd.pointer_value())),
        CTypeKind::Array { base, .. } => Some((base.clone(), cd.addr())),
        CTypeKind::Reference(inner) => match &inner.kind {
            // SAFETY: a reference to a pointer aliases pointer storage
            CTypeKind::Pointer(base) => Some((base.clone(), unsafe { read_addr(cd.addr()) })),
            CTypeKind::Array { base, .. } => Some((base.clone(), cd.addr())),
            _ => None,
        },
        _ => None,
    }
}

/// Address used when comparing non-arithmetic values
fn identity_addr(cd: &CData) -> usize {
    match &cd.ty().kind {
        // SAFETY: a reference to a pointer aliases pointer storage
        CTypeKind::Reference(inner) if inner.is_pointer() => unsafe { read_addr(cd.addr()) },
        _ => cd.pointer_value(),
    }
}

fn is_arith_cdata(cd: &CData) -> bool {
    !cd.is_ctype() && cd.ty().deref().is_arith()
}

fn compare_error(lhs: &Value, rhs: &Value) -> FfiError {
    FfiError::type_error(format!(
        "attempt to compare '{}' with '{}'",
        describe(lhs),
        describe(rhs)
    ))
}

/// `free` pseudo-method of callbacks
fn callback_free(args: &[Value]) -> Result<Vec<Value>> {
    match args.first() {
        Some(Value::CData(cd)) if cd.is_closure() => {
            cd.free_closure()?;
            Ok(vec![])
        }
        _ => Err(FfiError::argument(1, "free", "not a callback")),
    }
}

/// `set` pseudo-method of callbacks
fn callback_set(args: &[Value]) -> Result<Vec<Value>> {
    let cd = match args.first() {
        Some(Value::CData(cd)) if cd.is_closure() => cd,
        _ => return Err(FfiError::argument(1, "set", "not a callback")),
    };
    let handle = cd.closure_handle()?;
    match args.get(1) {
        Some(Value::Function(f)) => {
            handle.set(f.clone())?;
            Ok(vec![])
        }
        other => Err(FfiError::argument(
            2,
            "set",
            format!(
                "function expected, got {}",
                other.map_or("no value", Value::type_name)
            ),
        )),
    }
}

impl Ffi {
    /// The override for `op` registered on the record type of `value`
    fn metamethod(&self, value: &Value, op: MetaOp) -> Option<Value> {
        let cd = value.as_cdata()?;
        self.metatype_of(cd.ty())?.get(op).cloned()
    }

    /// Call anything callable from the host side
    pub fn call_value(&self, callee: &Value, args: &[Value]) -> Result<Vec<Value>> {
        match callee {
            Value::Function(f) => f.call(args),
            Value::CData(_) => self.call(callee, args),
            other => Err(FfiError::type_error(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }

    fn first_result(&self, callee: &Value, args: &[Value]) -> Result<Value> {
        Ok(self.call_value(callee, args)?.into_iter().next().unwrap_or_default())
    }

    /// Run the binary override of either operand, left first
    fn binary_override(&self, op: MetaOp, lhs: &Value, rhs: &Value) -> Result<Option<Value>> {
        let Some(f) = self
            .metamethod(lhs, op)
            .or_else(|| self.metamethod(rhs, op))
        else {
            return Ok(None);
        };
        self.first_result(&f, &[lhs.clone(), rhs.clone()]).map(Some)
    }

    fn unary_override(&self, op: MetaOp, value: &Value) -> Result<Option<Vec<Value>>> {
        match self.metamethod(value, op) {
            Some(f) => self.call_value(&f, std::slice::from_ref(value)).map(Some),
            None => Ok(None),
        }
    }

    /// Arithmetic operand of a host number or arithmetic cdata
    fn operand(&self, value: &Value) -> Option<Operand> {
        match value {
            Value::Integer(i) => Some(Operand::host_integer(*i)),
            Value::Number(n) => Some(Operand::host_number(*n)),
            Value::CData(cd) if is_arith_cdata(cd) => {
                let p = cd.ty().deref().primitive()?;
                // SAFETY: the value (or its referent) holds a `p`
                let val = unsafe { read_prim(p, cd.addr()) };
                Some(Operand::new(ExprType::from_primitive(p), val))
            }
            _ => None,
        }
    }

    /// Wrap an arithmetic result in a new cdata of its type
    fn arith_value(&self, result: Operand) -> Result<Value> {
        let p = result.ty.primitive();
        let cd = CData::alloc(CType::prim(p))?;
        // SAFETY: freshly allocated for `p`
        unsafe { write_prim(p, cd.addr(), result.val) };
        Ok(Value::CData(cd))
    }

    /// Integer offset operand of pointer arithmetic
    fn ptrdiff(&self, value: &Value) -> Result<i64> {
        match self.operand(value) {
            Some(op) if !matches!(op.ty, ExprType::Float | ExprType::Double) || value.is_number() => {
                Ok(op.val.as_i64())
            }
            _ => Err(FfiError::type_error(format!(
                "cannot convert '{}' to 'ptrdiff_t'",
                describe(value)
            ))),
        }
    }

    /// `ptr + delta` in units of the pointee size
    fn offset_pointer(&self, ptr: &CData, delta: i64) -> Result<Value> {
        let Some((base, addr)) = pointer_target(ptr) else {
            return Err(FfiError::type_error(format!("'{}' is not a pointer", ptr.ty())));
        };
        let esize = base.alloc_size();
        if esize == 0 {
            return Err(FfiError::type_error("unknown C type size"));
        }
        let ty = match &ptr.ty().deref().kind {
            CTypeKind::Pointer(_) => ptr.ty().deref(),
            _ => CType::pointer_to(base),
        };
        let target = addr.wrapping_add((delta as isize).wrapping_mul(esize as isize) as usize);
        let result = CData::pointer(ty, target)?;
        result.anchor(ptr.keepalive());
        Ok(Value::CData(result))
    }

    fn pointer_add(&self, lhs: &Value, rhs: &Value) -> Result<Option<Value>> {
        if let Value::CData(cd) = lhs
            && pointer_target(cd).is_some()
        {
            let delta = self.ptrdiff(rhs)?;
            return self.offset_pointer(cd, delta).map(Some);
        }
        if let Value::CData(cd) = rhs
            && pointer_target(cd).is_some()
        {
            let delta = self.ptrdiff(lhs)?;
            return self.offset_pointer(cd, delta).map(Some);
        }
        Ok(None)
    }

    fn pointer_sub(&self, lhs: &Value, rhs: &Value) -> Result<Option<Value>> {
        let Value::CData(left) = lhs else {
            return Ok(None);
        };
        let Some((lbase, laddr)) = pointer_target(left) else {
            return Ok(None);
        };
        let esize = lbase.alloc_size();
        if esize == 0 {
            return Err(FfiError::type_error("unknown C type size"));
        }
        if let Value::CData(right) = rhs
            && let Some((rbase, raddr)) = pointer_target(right)
        {
            if !lbase.is_same(&rbase, true) {
                return Err(FfiError::type_error(format!(
                    "cannot convert '{}' to '{}'",
                    right.ty(),
                    left.ty()
                )));
            }
            let diff = (laddr as isize).wrapping_sub(raddr as isize) / esize as isize;
            return Ok(Some(Value::Integer(diff as i64)));
        }
        let delta = self.ptrdiff(rhs)?;
        self.offset_pointer(left, delta.wrapping_neg()).map(Some)
    }

    /// A binary arithmetic or bitwise operator
    pub fn arith(&self, op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        if let Some(v) = self.binary_override(binop_meta(op), lhs, rhs)? {
            return Ok(v);
        }
        let pointer_result = match op {
            BinOp::Add => self.pointer_add(lhs, rhs)?,
            BinOp::Sub => self.pointer_sub(lhs, rhs)?,
            _ => None,
        };
        if let Some(v) = pointer_result {
            return Ok(v);
        }
        let (Some(l), Some(r)) = (self.operand(lhs), self.operand(rhs)) else {
            return Err(FfiError::type_error(format!(
                "attempt to perform arithmetic on '{}' and '{}'",
                describe(lhs),
                describe(rhs)
            )));
        };
        let result = eval_binary(op, l, r, self.collapse_long())?;
        self.arith_value(result)
    }

    /// Unary minus or bitwise not
    pub fn unary(&self, op: UnOp, value: &Value) -> Result<Value> {
        let meta = match op {
            UnOp::Neg => MetaOp::Unm,
            UnOp::BNot => MetaOp::BNot,
        };
        if let Some(results) = self.unary_override(meta, value)? {
            return Ok(results.into_iter().next().unwrap_or_default());
        }
        let operand = self.operand(value).ok_or_else(|| {
            FfiError::type_error(format!(
                "attempt to perform arithmetic on '{}'",
                describe(value)
            ))
        })?;
        self.arith_value(eval_unary(op, operand, self.collapse_long()))
    }

    pub fn concat(&self, lhs: &Value, rhs: &Value) -> Result<Value> {
        match self.binary_override(MetaOp::Concat, lhs, rhs)? {
            Some(v) => Ok(v),
            None => Err(FfiError::type_error(format!(
                "attempt to concatenate '{}' and '{}'",
                describe(lhs),
                describe(rhs)
            ))),
        }
    }

    pub fn len(&self, value: &Value) -> Result<Value> {
        match self.unary_override(MetaOp::Len, value)? {
            Some(results) => Ok(results.into_iter().next().unwrap_or_default()),
            None => Err(FfiError::type_error(format!(
                "attempt to get length of '{}'",
                describe(value)
            ))),
        }
    }

    /// Iterator triple from `__pairs`
    pub fn pairs(&self, value: &Value) -> Result<Vec<Value>> {
        match self.unary_override(MetaOp::Pairs, value)? {
            Some(mut results) => {
                results.resize(3, Value::Null);
                Ok(results)
            }
            None => Err(FfiError::type_error(format!(
                "attempt to iterate '{}'",
                describe(value)
            ))),
        }
    }

    /// Equality. A non-cdata operand is never equal; non-arithmetic values
    /// compare by address.
    pub fn eq(&self, lhs: &Value, rhs: &Value) -> Result<bool> {
        if let Some(v) = self.binary_override(MetaOp::Eq, lhs, rhs)? {
            return Ok(v.is_truthy());
        }
        let (Value::CData(a), Value::CData(b)) = (lhs, rhs) else {
            return Ok(false);
        };
        if a.is_ctype() || b.is_ctype() {
            return Ok(a.is_ctype() && b.is_ctype() && a.ty().is_same(b.ty(), false));
        }
        if !is_arith_cdata(a) || !is_arith_cdata(b) {
            return Ok(identity_addr(a) == identity_addr(b));
        }
        self.compare_values(CmpOp::Eq, lhs, rhs)
    }

    fn compare_values(&self, op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool> {
        match (self.operand(lhs), self.operand(rhs)) {
            (Some(l), Some(r)) => Ok(compare(op, l, r, self.collapse_long())),
            _ => Err(compare_error(lhs, rhs)),
        }
    }

    /// Ordering shared by `<` and `<=`: arithmetic values compare by value,
    /// pointers to compatible types by address
    fn ordering(&self, op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool> {
        match (lhs, rhs) {
            (Value::CData(a), Value::CData(b)) => {
                if is_arith_cdata(a) && is_arith_cdata(b) {
                    return self.compare_values(op, lhs, rhs);
                }
                let (ta, tb) = (a.ty().deref(), b.ty().deref());
                match (&ta.kind, &tb.kind) {
                    (CTypeKind::Pointer(pa), CTypeKind::Pointer(pb))
                        if !a.is_ctype() && !b.is_ctype() && pa.is_same(pb, true) =>
                    {
                        let (x, y) = (identity_addr(a), identity_addr(b));
                        Ok(if op == CmpOp::Lt { x < y } else { x <= y })
                    }
                    _ => Err(compare_error(lhs, rhs)),
                }
            }
            (Value::CData(cd), other) | (other, Value::CData(cd))
                if is_arith_cdata(cd) && other.is_number() =>
            {
                self.compare_values(op, lhs, rhs)
            }
            _ => Err(compare_error(lhs, rhs)),
        }
    }

    pub fn lt(&self, lhs: &Value, rhs: &Value) -> Result<bool> {
        if let Some(v) = self.binary_override(MetaOp::Lt, lhs, rhs)? {
            return Ok(v.is_truthy());
        }
        self.ordering(CmpOp::Lt, lhs, rhs)
    }

    /// `<=`, falling back to `not (rhs < lhs)` through `__lt`
    pub fn le(&self, lhs: &Value, rhs: &Value) -> Result<bool> {
        if let Some(v) = self.binary_override(MetaOp::Le, lhs, rhs)? {
            return Ok(v.is_truthy());
        }
        if let Some(v) = self.binary_override(MetaOp::Lt, rhs, lhs)? {
            return Ok(!v.is_truthy());
        }
        self.ordering(CmpOp::Le, lhs, rhs)
    }

    /// Call a value: ctypes construct, callable cdata call native code
    pub fn call(&self, callee: &Value, args: &[Value]) -> Result<Vec<Value>> {
        let Value::CData(cd) = callee else {
            return self.call_value(callee, args);
        };
        if cd.is_ctype() {
            return Ok(vec![Value::CData(self.construct(cd.ty(), args, Rule::Conv)?)]);
        }
        if let Some(f) = self.metamethod(callee, MetaOp::Call) {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(callee.clone());
            full.extend_from_slice(args);
            return self.call_value(&f, &full);
        }
        if !cd.ty().is_callable() {
            return Err(FfiError::type_error(format!("'{}' is not callable", cd.ty())));
        }
        if cd.is_closure() {
            cd.closure_handle()?;
        }
        self.invoke(cd, args)
    }

    /// Type and location of the member `key` designates in data of type
    /// `ty` stored at `data`
    fn member(&self, ty: &CTypeRef, data: Storage, key: &Value) -> Result<(CTypeRef, Storage)> {
        match &ty.kind {
            CTypeKind::Pointer(base) | CTypeKind::Array { base, .. } => {
                let esize = base.alloc_size();
                if esize == 0 {
                    return Err(FfiError::type_error(format!(
                        "attempt to index an incomplete type '{ty}'"
                    )));
                }
                let index = match self.operand(key) {
                    Some(op) => op.val.as_i64(),
                    None => {
                        return Err(FfiError::type_error(format!(
                            "'{ty}' cannot be indexed with '{}'",
                            describe(key)
                        )));
                    }
                };
                let offset = (index as isize).wrapping_mul(esize as isize) as usize;
                let elem = match &ty.kind {
                    CTypeKind::Array { .. } if !ty.quals.is_empty() => {
                        CType::qualified(base, ty.quals)
                    }
                    _ => base.clone(),
                };
                Ok((elem, data.offset(offset)))
            }
            CTypeKind::Record(_) => {
                let Some(name) = key.as_str() else {
                    return Err(FfiError::type_error(format!(
                        "'{ty}' cannot be indexed with '{}'",
                        describe(key)
                    )));
                };
                let (offset, fty) = ty.field_offset(name).ok_or_else(|| {
                    FfiError::type_error(format!("'{ty}' has no member named '{name}'"))
                })?;
                Ok((CType::qualified(&fty, ty.quals), data.offset(offset)))
            }
            _ => Err(FfiError::type_error(format!("'{ty}' is not indexable"))),
        }
    }

    fn locate(&self, cd: &CData, key: &Value) -> Result<(CTypeRef, Storage)> {
        if cd.is_ctype() {
            return Err(FfiError::type_error("'ctype' is not indexable"));
        }
        let ty = cd.ty();
        match &ty.kind {
            CTypeKind::Reference(base) if base.is_record() || base.is_array() => {
                self.member(base, cd.storage().clone(), key)
            }
            // one level only: the key is ignored
            CTypeKind::Reference(base) => Ok((base.clone(), cd.storage().clone())),
            CTypeKind::Pointer(_) => self.member(ty, Storage::Foreign(cd.pointer_value()), key),
            _ => self.member(ty, cd.storage().clone(), key),
        }
    }

    fn closure_method(&self, cd: &CData, key: &Value) -> Result<Value> {
        match key {
            Value::String(name) if name == "free" => {
                Ok(Value::Function(HostFunction::new("free", callback_free)))
            }
            Value::String(name) if name == "set" => {
                Ok(Value::Function(HostFunction::new("set", callback_set)))
            }
            Value::String(name) => Err(FfiError::type_error(format!(
                "'{}' has no member named '{name}'",
                cd.ty()
            ))),
            other => Err(FfiError::type_error(format!(
                "'{}' cannot be indexed with '{}'",
                cd.ty(),
                other.type_name()
            ))),
        }
    }

    /// `value[key]`
    pub fn index(&self, target: &Value, key: &Value) -> Result<Value> {
        let cd = match target {
            Value::CData(cd) => cd,
            Value::Library(lib) => {
                let name = key.as_str().ok_or_else(|| {
                    FfiError::type_error(format!(
                        "library cannot be indexed with '{}'",
                        key.type_name()
                    ))
                })?;
                return self.resolve(lib, name);
            }
            other => {
                return Err(FfiError::type_error(format!(
                    "attempt to index a {} value",
                    other.type_name()
                )));
            }
        };
        if let Some(handler) = self.metamethod(target, MetaOp::Index) {
            return match &handler {
                Value::Table(map) => Ok(key
                    .as_str()
                    .and_then(|k| map.borrow().get(k).cloned())
                    .unwrap_or_default()),
                f => self.first_result(f, &[target.clone(), key.clone()]),
            };
        }
        if cd.is_closure() {
            return self.closure_method(cd, key);
        }
        let (ty, storage) = self.locate(cd, key)?;
        let value = self.to_host(&ty, &storage, Rule::Conv, false)?;
        if let (Value::CData(v), Storage::Foreign(_)) = (&value, &storage) {
            v.anchor(cd.keepalive());
        }
        Ok(value)
    }

    /// `target[key] = value`
    pub fn newindex(&self, target: &Value, key: &Value, value: &Value) -> Result<()> {
        let cd = match target {
            Value::CData(cd) => cd,
            Value::Library(lib) => {
                let name = key.as_str().ok_or_else(|| {
                    FfiError::type_error(format!(
                        "library cannot be indexed with '{}'",
                        key.type_name()
                    ))
                })?;
                return self.bind(lib, name, value);
            }
            other => {
                return Err(FfiError::type_error(format!(
                    "attempt to index a {} value",
                    other.type_name()
                )));
            }
        };
        if let Some(handler) = self.metamethod(target, MetaOp::NewIndex) {
            if let Value::Table(map) = &handler
                && let Some(k) = key.as_str()
            {
                map.borrow_mut().insert(k.to_string(), value.clone());
                return Ok(());
            }
            self.call_value(&handler, &[target.clone(), key.clone(), value.clone()])?;
            return Ok(());
        }
        let (ty, storage) = self.locate(cd, key)?;
        if ty.quals.contains(Qualifiers::CONST) {
            return Err(FfiError::type_error("attempt to write to constant location"));
        }
        let mut keep = Vec::new();
        self.from_host(&ty, storage.addr(), value, Rule::Conv, &mut keep)?;
        cd.anchor(keep);
        Ok(())
    }

    /// Rendering for the host's `tostring`
    pub fn tostring(&self, value: &Value) -> Result<String> {
        if let Some(results) = self.unary_override(MetaOp::ToString, value)? {
            return Ok(match results.into_iter().next().unwrap_or_default() {
                Value::String(s) => s,
                other => other.to_string(),
            });
        }
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn new(ffi: &Ffi, ty: &str, inits: &[Value]) -> Value {
        Value::CData(ffi.new_cdata(&ty.into(), inits).unwrap())
    }

    fn int(i: i64) -> Value {
        Value::Integer(i)
    }

    #[test]
    fn test_unsigned_64bit_contaminates() {
        let ffi = Ffi::new();
        let a = new(&ffi, "int", &[int(2147483647)]);
        let b = new(&ffi, "unsigned long long", &[int(1)]);
        let sum = ffi.arith(BinOp::Add, &a, &b).unwrap();
        assert_eq!(ffi.tostring(&sum).unwrap(), "2147483648ULL");
        let c = ffi.arith(BinOp::Sub, &new(&ffi, "int", &[int(0)]), &int(1)).unwrap();
        assert_eq!(ffi.tostring(&c).unwrap(), "-1LL");
    }

    #[test]
    fn test_pointer_addition_scales_by_pointee() {
        let ffi = Ffi::new();
        let cp = Value::CData(ffi.cast(&"char *".into(), &int(0x1000)).unwrap());
        let ip = Value::CData(ffi.cast(&"int *".into(), &int(0x1000)).unwrap());
        let c5 = ffi.arith(BinOp::Add, &cp, &int(5)).unwrap();
        let i5 = ffi.arith(BinOp::Add, &int(5), &ip).unwrap();
        assert_eq!(c5.as_cdata().unwrap().pointer_value(), 0x1005);
        assert_eq!(i5.as_cdata().unwrap().pointer_value(), 0x1014);
        assert_eq!(i5.as_cdata().unwrap().ty().serialize(), "int *");
    }

    #[test]
    fn test_pointer_difference_counts_elements() {
        let ffi = Ffi::new();
        let arr = new(&ffi, "int[8]", &[]);
        let p0 = ffi.arith(BinOp::Add, &arr, &int(0)).unwrap();
        let p4 = ffi.arith(BinOp::Add, &arr, &int(4)).unwrap();
        assert_eq!(ffi.arith(BinOp::Sub, &p4, &p0).unwrap(), int(4));
        let back = ffi.arith(BinOp::Sub, &p4, &int(1)).unwrap();
        assert_eq!(
            back.as_cdata().unwrap().pointer_value(),
            p0.as_cdata().unwrap().pointer_value() + 12
        );

        let dp = Value::CData(ffi.cast(&"double *".into(), &int(0)).unwrap());
        let err = ffi.arith(BinOp::Sub, &p4, &dp).unwrap_err();
        assert_eq!(err.to_string(), "cannot convert 'double *' to 'int *'");

        let vp = Value::CData(ffi.nullptr().unwrap());
        let err = ffi.arith(BinOp::Sub, &vp, &int(1)).unwrap_err();
        assert_eq!(err.to_string(), "unknown C type size");
    }

    #[test]
    fn test_pow_and_division() {
        let ffi = Ffi::new();
        let two = new(&ffi, "int", &[int(2)]);
        let p = ffi.arith(BinOp::Pow, &two, &int(10)).unwrap();
        assert_eq!(ffi.tonumber(&p).unwrap(), int(1024));
        let neg = ffi.arith(BinOp::Pow, &two, &int(-1)).unwrap();
        assert_eq!(ffi.tonumber(&neg).unwrap(), int(0));
        let err = ffi.arith(BinOp::Div, &two, &int(0)).unwrap_err();
        assert!(matches!(err, FfiError::Arithmetic(_)));
    }

    #[test]
    fn test_arithmetic_on_non_numbers_fails() {
        let ffi = Ffi::new();
        let two = new(&ffi, "int", &[int(2)]);
        let err = ffi.arith(BinOp::Mul, &two, &"x".into()).unwrap_err();
        assert_eq!(err.to_string(), "attempt to perform arithmetic on 'int' and 'string'");
        let neg = ffi.unary(UnOp::Neg, &two).unwrap();
        assert_eq!(ffi.tostring(&neg).unwrap(), "-2LL");
    }

    #[test]
    fn test_equality() {
        let ffi = Ffi::new();
        let a = Value::CData(ffi.cast(&"int *".into(), &int(64)).unwrap());
        let b = Value::CData(ffi.cast(&"int *".into(), &int(64)).unwrap());
        let c = Value::CData(ffi.cast(&"int *".into(), &int(128)).unwrap());
        assert!(ffi.eq(&a, &b).unwrap());
        assert!(!ffi.eq(&a, &c).unwrap());
        assert!(!ffi.eq(&a, &int(64)).unwrap());
        let x = new(&ffi, "long long", &[int(3)]);
        let y = new(&ffi, "char", &[int(3)]);
        assert!(ffi.eq(&x, &y).unwrap());
    }

    #[test]
    fn test_ordering() {
        let ffi = Ffi::new();
        let small = new(&ffi, "int", &[int(1)]);
        assert!(ffi.lt(&small, &int(2)).unwrap());
        assert!(ffi.le(&int(1), &small).unwrap());
        let p = Value::CData(ffi.cast(&"int *".into(), &int(8)).unwrap());
        let q = Value::CData(ffi.cast(&"int *".into(), &int(16)).unwrap());
        assert!(ffi.lt(&p, &q).unwrap());
        let d = Value::CData(ffi.cast(&"double *".into(), &int(16)).unwrap());
        let err = ffi.lt(&p, &d).unwrap_err();
        assert_eq!(err.to_string(), "attempt to compare 'int *' with 'double *'");
        let err = ffi.lt(&p, &int(1)).unwrap_err();
        assert_eq!(err.to_string(), "attempt to compare 'int *' with 'number'");
    }

    #[test]
    fn test_le_falls_back_to_lt() {
        let ffi = Ffi::new();
        ffi.cdef("struct num { int v; };").unwrap();
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let mt = Value::table([(
            "__lt",
            Value::function("lt", move |_| {
                seen.set(seen.get() + 1);
                Ok(vec![Value::Boolean(true)])
            }),
        )]);
        ffi.metatype(&"struct num".into(), &mt).unwrap();
        let a = new(&ffi, "struct num", &[int(1)]);
        let b = new(&ffi, "struct num", &[int(2)]);
        assert!(!ffi.le(&a, &b).unwrap());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_metatype_overrides_builtin() {
        let ffi = Ffi::new();
        ffi.cdef("struct vec2 { double x, y; };").unwrap();
        let mt = Value::table([
            ("__add", Value::function("add", |_| Ok(vec![Value::from("added")]))),
            ("__tostring", Value::function("str", |_| Ok(vec![Value::from("vec2")]))),
            ("__len", Value::function("len", |_| Ok(vec![Value::Integer(2)]))),
            ("__index", Value::table([("kind", Value::from("vector"))])),
        ]);
        ffi.metatype(&"struct vec2".into(), &mt).unwrap();
        let v = new(&ffi, "struct vec2", &[]);
        assert_eq!(ffi.arith(BinOp::Add, &int(1), &v).unwrap(), Value::from("added"));
        assert_eq!(ffi.tostring(&v).unwrap(), "vec2");
        assert_eq!(ffi.len(&v).unwrap(), int(2));
        assert_eq!(ffi.index(&v, &"kind".into()).unwrap(), Value::from("vector"));
        assert_eq!(ffi.index(&v, &"x".into()).unwrap(), Value::Null);

        let ptr = Value::CData(ffi.addressof(v.as_cdata().unwrap()).unwrap());
        assert_eq!(ffi.tostring(&ptr).unwrap(), "vec2");
    }

    #[test]
    fn test_metatype_only_operators() {
        let ffi = Ffi::new();
        let x = new(&ffi, "int", &[]);
        let err = ffi.concat(&x, &"s".into()).unwrap_err();
        assert_eq!(err.to_string(), "attempt to concatenate 'int' and 'string'");
        let err = ffi.len(&x).unwrap_err();
        assert_eq!(err.to_string(), "attempt to get length of 'int'");
        let err = ffi.pairs(&x).unwrap_err();
        assert_eq!(err.to_string(), "attempt to iterate 'int'");
    }

    #[test]
    fn test_field_subvalues_alias_parent() {
        let ffi = Ffi::new();
        ffi.cdef("struct inner { int a; }; struct outer { int tag; struct inner in; };")
            .unwrap();
        let outer = new(&ffi, "struct outer", &[]);
        let inner = ffi.index(&outer, &"in".into()).unwrap();
        assert_eq!(inner.as_cdata().unwrap().ty().serialize(), "struct inner &");
        ffi.newindex(&inner, &"a".into(), &int(42)).unwrap();
        let again = ffi.index(&outer, &"in".into()).unwrap();
        assert_eq!(ffi.index(&again, &"a".into()).unwrap(), int(42));
        drop(outer);
        // the reference keeps the parent's storage alive
        assert_eq!(ffi.index(&inner, &"a".into()).unwrap(), int(42));
    }

    #[test]
    fn test_index_errors() {
        let ffi = Ffi::new();
        ffi.cdef("struct s { int a; }; struct opaque;").unwrap();
        let s = new(&ffi, "struct s", &[]);
        let err = ffi.index(&s, &"b".into()).unwrap_err();
        assert_eq!(err.to_string(), "'struct s' has no member named 'b'");
        let n = new(&ffi, "int", &[]);
        let err = ffi.index(&n, &int(0)).unwrap_err();
        assert_eq!(err.to_string(), "'int' is not indexable");
        let ct = Value::CData(ffi.type_of(&"int *".into(), &[]).unwrap());
        let err = ffi.index(&ct, &int(0)).unwrap_err();
        assert_eq!(err.to_string(), "'ctype' is not indexable");
        let op = Value::CData(ffi.cast(&"struct opaque *".into(), &int(16)).unwrap());
        let err = ffi.index(&op, &int(0)).unwrap_err();
        assert_eq!(err.to_string(), "attempt to index an incomplete type 'struct opaque *'");
        let arr = new(&ffi, "int[2]", &[]);
        let err = ffi.index(&arr, &"x".into()).unwrap_err();
        assert_eq!(err.to_string(), "'int [2]' cannot be indexed with 'string'");
    }

    #[test]
    fn test_reference_to_scalar_ignores_key() {
        let ffi = Ffi::new();
        let v = ffi.new_cdata(&"int".into(), &[int(5)]).unwrap();
        let r = Value::CData(ffi.reference(&v).unwrap());
        assert_eq!(ffi.index(&r, &int(3)).unwrap(), int(5));
        ffi.newindex(&r, &"anything".into(), &int(6)).unwrap();
        assert_eq!(ffi.tonumber(&Value::CData(v)).unwrap(), int(6));
    }

    #[test]
    fn test_const_members_are_read_only() {
        let ffi = Ffi::new();
        ffi.cdef("struct k { const int a; int b; };").unwrap();
        let k = new(&ffi, "struct k", &[int(1), int(2)]);
        let err = ffi.newindex(&k, &"a".into(), &int(3)).unwrap_err();
        assert_eq!(err.to_string(), "attempt to write to constant location");
        ffi.newindex(&k, &"b".into(), &int(3)).unwrap();
    }

    #[test]
    fn test_pointer_index_reads_and_writes() {
        let ffi = Ffi::new();
        let arr = new(&ffi, "int[4]", &[int(1), int(2), int(3), int(4)]);
        let p = ffi.arith(BinOp::Add, &arr, &int(1)).unwrap();
        assert_eq!(ffi.index(&p, &int(1)).unwrap(), int(3));
        ffi.newindex(&p, &int(-1), &int(10)).unwrap();
        assert_eq!(ffi.index(&arr, &int(0)).unwrap(), int(10));
    }

    #[test]
    fn test_calling_ctype_constructs() {
        let ffi = Ffi::new();
        let ct = Value::CData(ffi.type_of(&"int".into(), &[]).unwrap());
        let made = ffi.call(&ct, &[int(7)]).unwrap();
        assert_eq!(ffi.tonumber(&made[0]).unwrap(), int(7));
        let n = new(&ffi, "int", &[]);
        let err = ffi.call(&n, &[]).unwrap_err();
        assert_eq!(err.to_string(), "'int' is not callable");
    }

    #[test]
    fn test_freed_callback_is_bad() {
        let ffi = Ffi::new();
        let cb = new(
            &ffi,
            "int (*)(int)",
            &[Value::function("twice", |args| {
                Ok(vec![Value::Integer(args[0].as_integer().unwrap_or(0) * 2)])
            })],
        );
        assert_eq!(ffi.call(&cb, &[int(21)]).unwrap(), vec![int(42)]);

        let set = ffi.index(&cb, &"set".into()).unwrap();
        let thrice = Value::function("thrice", |args| {
            Ok(vec![Value::Integer(args[0].as_integer().unwrap_or(0) * 3)])
        });
        ffi.call_value(&set, &[cb.clone(), thrice.clone()]).unwrap();
        assert_eq!(ffi.call(&cb, &[int(2)]).unwrap(), vec![int(6)]);

        let free = ffi.index(&cb, &"free".into()).unwrap();
        ffi.call_value(&free, &[cb.clone()]).unwrap();
        assert_eq!(ffi.live_callbacks(), 0);
        assert_eq!(ffi.call_value(&free, &[cb.clone()]), Err(FfiError::BadCallback));
        assert_eq!(
            ffi.call_value(&set, &[cb.clone(), thrice]),
            Err(FfiError::BadCallback)
        );
        assert_eq!(ffi.call(&cb, &[int(1)]), Err(FfiError::BadCallback));

        let err = ffi.index(&cb, &"other".into()).unwrap_err();
        assert_eq!(err.to_string(), "'int (*)(int)' has no member named 'other'");
    }

    #[test]
    fn test_raising_callback_reports_native_call_error() {
        let reported = Rc::new(Cell::new(0));
        let seen = reported.clone();
        let ffi = Ffi::with_config(
            crate::runtime::FfiConfig::default().with_fatal_handler(move |_| seen.set(seen.get() + 1)),
        );
        let cb = new(
            &ffi,
            "int (*)(int)",
            &[Value::function("boom", |_| Err(FfiError::runtime("boom")))],
        );
        let err = ffi.call(&cb, &[int(1)]).unwrap_err();
        assert_eq!(err, FfiError::NativeCall("boom".into()));
        assert!(!err.is_recoverable());
        assert_eq!(reported.get(), 1);
        // the runtime stays usable afterwards
        let ok = new(&ffi, "int (*)(int)", &[Value::function("id", |a| Ok(a.to_vec()))]);
        assert_eq!(ffi.call(&ok, &[int(3)]).unwrap(), vec![int(3)]);
    }
}
