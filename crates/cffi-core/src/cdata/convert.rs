//! Conversions between host values and native memory.

use super::{Anchor, Block, CData, Storage, storage_size};
use crate::arith::Scalar;
use crate::ctype::{ArrayLen, CType, CTypeKind, CTypeRef, Primitive};
use crate::errors::{FfiError, Result};
use crate::runtime::Ffi;
use crate::value::Value;
use std::rc::Rc;

/// Which conversion rule applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Implicit conversion: initializers, stores, arguments
    Conv,
    /// Explicit cast: also numbers to pointers and between any pointers
    Cast,
    /// Function return: references are dereferenced, aggregates copied
    Ret,
}

/// # Safety
/// `addr` must be valid for reading a value of `p`.
pub(crate) unsafe fn read_prim(p: Primitive, addr: usize) -> Scalar {
    let ptr = addr as *const u8;
    unsafe {
        match p {
            Primitive::Float => Scalar::Float(ptr.cast::<f32>().read_unaligned() as f64),
            Primitive::Double => Scalar::Float(ptr.cast::<f64>().read_unaligned()),
            Primitive::Bool => Scalar::Int((ptr.read() != 0) as i64),
            _ => match (p.size(), p.is_unsigned()) {
                (1, false) => Scalar::Int(ptr.cast::<i8>().read() as i64),
                (1, true) => Scalar::UInt(ptr.read() as u64),
                (2, false) => Scalar::Int(ptr.cast::<i16>().read_unaligned() as i64),
                (2, true) => Scalar::UInt(ptr.cast::<u16>().read_unaligned() as u64),
                (4, false) => Scalar::Int(ptr.cast::<i32>().read_unaligned() as i64),
                (4, true) => Scalar::UInt(ptr.cast::<u32>().read_unaligned() as u64),
                (_, false) => Scalar::Int(ptr.cast::<i64>().read_unaligned()),
                (_, true) => Scalar::UInt(ptr.cast::<u64>().read_unaligned()),
            },
        }
    }
}

/// Store `value` with C conversion semantics: integers truncate to the
/// target width, floats convert toward zero.
///
/// # Safety
/// `addr` must be valid for writing a value of `p`.
pub(crate) unsafe fn write_prim(p: Primitive, addr: usize, value: Scalar) {
    let ptr = addr as *mut u8;
    unsafe {
        match p {
            Primitive::Float => ptr.cast::<f32>().write_unaligned(value.as_f64() as f32),
            Primitive::Double => ptr.cast::<f64>().write_unaligned(value.as_f64()),
            Primitive::Bool => ptr.write(!value.is_zero() as u8),
            _ => {
                let bits = if p.is_unsigned() {
                    value.as_u64()
                } else {
                    value.as_i64() as u64
                };
                match p.size() {
                    1 => ptr.write(bits as u8),
                    2 => ptr.cast::<u16>().write_unaligned(bits as u16),
                    4 => ptr.cast::<u32>().write_unaligned(bits as u32),
                    _ => ptr.cast::<u64>().write_unaligned(bits),
                }
            }
        }
    }
}

/// # Safety
/// `addr` must be valid for reading a pointer.
pub(crate) unsafe fn read_addr(addr: usize) -> usize {
    unsafe { (addr as *const usize).read_unaligned() }
}

/// # Safety
/// `addr` must be valid for writing a pointer.
pub(crate) unsafe fn write_addr(addr: usize, value: usize) {
    unsafe { (addr as *mut usize).write_unaligned(value) }
}

/// How a value is named in conversion errors: cdata by C type, everything
/// else by host type
pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::CData(cd) => cd.ty().serialize(),
        other => other.type_name().to_string(),
    }
}

pub(crate) fn cannot_convert(value: &Value, ty: &CType) -> FfiError {
    FfiError::type_error(format!(
        "cannot convert '{}' to '{}'",
        describe(value),
        ty.serialize()
    ))
}

fn is_byte(ty: &CType) -> bool {
    ty.primitive()
        .is_some_and(|p| p.is_integer() && p.size() == 1 && p != Primitive::Bool)
}

/// Type and address a pointer-like cdata designates, if it designates one
fn designated(cd: &CData) -> Option<(CTypeRef, usize)> {
    let ty = cd.ty();
    match &ty.kind {
        CTypeKind::Pointer(base) => Some((base.clone(), cd.pointer_value())),
        CTypeKind::Function(_) => Some((ty.clone(), cd.pointer_value())),
        CTypeKind::Array { base, .. } => Some((base.clone(), cd.addr())),
        CTypeKind::Record(_) => Some((ty.clone(), cd.addr())),
        CTypeKind::Reference(base) => match &base.kind {
            // SAFETY: a reference to a pointer aliases pointer storage
            CTypeKind::Pointer(pointee) => Some((pointee.clone(), unsafe { read_addr(cd.addr()) })),
            CTypeKind::Array { base: elem, .. } => Some((elem.clone(), cd.addr())),
            CTypeKind::Record(_) => Some((base.clone(), cd.addr())),
            _ => None,
        },
        _ => None,
    }
}

fn pointee_compatible(from: &CType, to: &CType) -> bool {
    to.is_void() || from.is_void() || from.is_same(to, true)
}

impl Ffi {
    /// Read the value of type `ty` stored at `storage` as a host value
    pub(crate) fn to_host(
        &self,
        ty: &CTypeRef,
        storage: &Storage,
        rule: Rule,
        lossy: bool,
    ) -> Result<Value> {
        let addr = storage.addr();
        let value = match &ty.kind {
            CTypeKind::Void => Value::Null,
            CTypeKind::Prim(p) => {
                // SAFETY: storage of an arithmetic value holds `p`
                let s = unsafe { read_prim(*p, addr) };
                match p {
                    Primitive::Bool => Value::Boolean(!s.is_zero()),
                    Primitive::Float | Primitive::Double => Value::Number(s.as_f64()),
                    _ if p.size() == 8 && p.is_unsigned() => {
                        let u = s.as_u64();
                        if !lossy {
                            let boxed = CData::alloc(CType::prim(*p))?;
                            // SAFETY: freshly allocated for `p`
                            unsafe { write_prim(*p, boxed.addr(), s) };
                            Value::CData(boxed)
                        } else if u <= i64::MAX as u64 {
                            Value::Integer(u as i64)
                        } else {
                            Value::Number(u as f64)
                        }
                    }
                    _ => Value::Integer(s.as_i64()),
                }
            }
            CTypeKind::Pointer(_) => {
                // SAFETY: pointer storage holds one address
                let target = unsafe { read_addr(addr) };
                Value::CData(CData::pointer(ty.clone(), target)?)
            }
            CTypeKind::Function(_) => Value::CData(CData::pointer(ty.clone(), addr)?),
            CTypeKind::Reference(base) => {
                // SAFETY: a reference stored in memory is an address
                let target = Storage::Foreign(unsafe { read_addr(addr) });
                match rule {
                    Rule::Ret => self.to_host(base, &target, Rule::Conv, lossy)?,
                    _ => Value::CData(CData::aliasing(ty.clone(), target)),
                }
            }
            CTypeKind::Array { .. } | CTypeKind::Record(_) => match rule {
                Rule::Ret => {
                    let copy = CData::alloc(ty.clone())?;
                    let size = storage_size(ty);
                    // SAFETY: both regions hold `size` bytes of `ty`
                    unsafe {
                        std::ptr::copy_nonoverlapping(addr as *const u8, copy.addr() as *mut u8, size)
                    };
                    self.attach_gc(&copy);
                    Value::CData(copy)
                }
                _ => Value::CData(CData::reference(ty.clone(), storage.clone())),
            },
        };
        Ok(value)
    }

    /// Arithmetic value of a host value or arithmetic cdata
    pub(crate) fn scalar_from(&self, value: &Value, ty: &CType, rule: Rule) -> Result<Scalar> {
        match value {
            Value::Integer(i) => Ok(Scalar::Int(*i)),
            Value::Number(n) => Ok(Scalar::Float(*n)),
            Value::Boolean(b) => Ok(Scalar::Int(*b as i64)),
            Value::CData(cd) if !cd.is_ctype() => {
                let src = cd.ty().deref();
                if let Some(p) = src.primitive() {
                    // SAFETY: the value (or its referent) holds `p`
                    return Ok(unsafe { read_prim(p, cd.addr()) });
                }
                if rule == Rule::Cast
                    && let Some((_, addr)) = designated(cd)
                {
                    return Ok(Scalar::UInt(addr as u64));
                }
                Err(cannot_convert(value, ty))
            }
            _ => Err(cannot_convert(value, ty)),
        }
    }

    /// Address a pointer of type `ty` gets when assigned `value`
    fn address_from(
        &self,
        value: &Value,
        ty: &CTypeRef,
        base: &CTypeRef,
        rule: Rule,
        keep: &mut Vec<Anchor>,
    ) -> Result<usize> {
        match value {
            Value::Null => Ok(0),
            Value::String(_) | Value::Bytes(_) if base.is_void() || is_byte(base) => {
                let bytes = value.as_bytes().unwrap_or_default();
                let block = Block::new(bytes.len() + 1, 1)?;
                // SAFETY: the block has room for the bytes and a NUL
                unsafe {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), block.addr() as *mut u8, bytes.len())
                };
                let addr = block.addr();
                keep.push(block);
                Ok(addr)
            }
            Value::Function(f) if base.is_function() => {
                let cb = self.create_callback(ty, f.clone())?;
                let addr = cb.pointer_value();
                keep.push(Rc::new(cb));
                Ok(addr)
            }
            Value::Integer(_) | Value::Number(_) if rule == Rule::Cast => {
                Ok(self.scalar_from(value, ty, rule)?.as_u64() as usize)
            }
            Value::CData(cd) if cd.is_closure() && cd.closure_handle().is_err() => {
                Err(FfiError::BadCallback)
            }
            Value::CData(cd) if !cd.is_ctype() => match designated(cd) {
                Some((from, addr)) if rule == Rule::Cast || pointee_compatible(&from, base) => {
                    keep.extend(cd.keepalive());
                    Ok(addr)
                }
                None if rule == Rule::Cast && cd.ty().deref().is_integer() => {
                    Ok(self.scalar_from(value, ty, rule)?.as_u64() as usize)
                }
                _ => Err(cannot_convert(value, ty)),
            },
            _ => Err(cannot_convert(value, ty)),
        }
    }

    /// Address a reference of type `ty` binds to
    fn reference_target(
        &self,
        value: &Value,
        ty: &CTypeRef,
        base: &CTypeRef,
        rule: Rule,
        keep: &mut Vec<Anchor>,
    ) -> Result<usize> {
        if let Value::CData(cd) = value
            && !cd.is_ctype()
        {
            if cd.ty().deref().is_same(base, true) {
                keep.extend(cd.keepalive());
                return Ok(cd.addr());
            }
            if !base.is_arith() {
                return Err(cannot_convert(value, ty));
            }
        }
        // bind to a temporary holding the converted value
        let temp = Block::new(storage_size(base), base.align())?;
        self.from_host(base, temp.addr(), value, rule, keep)?;
        let addr = temp.addr();
        keep.push(temp);
        Ok(addr)
    }

    /// Store `value` into memory at `addr` holding a `ty`. Anything the
    /// stored bytes point into is pushed onto `keep`.
    pub(crate) fn from_host(
        &self,
        ty: &CTypeRef,
        addr: usize,
        value: &Value,
        rule: Rule,
        keep: &mut Vec<Anchor>,
    ) -> Result<()> {
        match &ty.kind {
            CTypeKind::Prim(p) => {
                let s = self.scalar_from(value, ty, rule)?;
                // SAFETY: the caller provides storage for `ty`
                unsafe { write_prim(*p, addr, s) };
                Ok(())
            }
            CTypeKind::Pointer(base) => {
                let target = self.address_from(value, ty, base, rule, keep)?;
                // SAFETY: pointer storage
                unsafe { write_addr(addr, target) };
                Ok(())
            }
            CTypeKind::Reference(base) => {
                let target = self.reference_target(value, ty, base, rule, keep)?;
                // SAFETY: reference storage in memory is an address
                unsafe { write_addr(addr, target) };
                Ok(())
            }
            CTypeKind::Array { base, len } => self.array_from(ty, base, *len, addr, value, rule, keep),
            CTypeKind::Record(_) => self.record_from(ty, addr, value, rule, keep),
            CTypeKind::Void | CTypeKind::Function(_) => Err(cannot_convert(value, ty)),
        }
    }

    fn copy_same_type(&self, ty: &CTypeRef, addr: usize, value: &Value) -> Result<()> {
        let Value::CData(cd) = value else {
            return Err(cannot_convert(value, ty));
        };
        if cd.is_ctype() || !cd.ty().deref().is_same(ty, true) {
            return Err(cannot_convert(value, ty));
        }
        let size = storage_size(ty);
        // SAFETY: both values have the layout of `ty`; `copy` tolerates overlap
        unsafe { std::ptr::copy(cd.addr() as *const u8, addr as *mut u8, size) };
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn array_from(
        &self,
        ty: &CTypeRef,
        base: &CTypeRef,
        len: ArrayLen,
        addr: usize,
        value: &Value,
        rule: Rule,
        keep: &mut Vec<Anchor>,
    ) -> Result<()> {
        let ArrayLen::Fixed(len) = len else {
            return Err(FfiError::type_error(format!(
                "size of C type '{ty}' is unknown"
            )));
        };
        let esize = base.alloc_size();
        match value {
            Value::Array(items) => {
                let items = items.borrow();
                if items.len() > len {
                    return Err(too_many_initializers(ty));
                }
                for (i, item) in items.iter().enumerate() {
                    self.from_host(base, addr + i * esize, item, rule, keep)?;
                }
                Ok(())
            }
            Value::String(_) | Value::Bytes(_) if is_byte(base) => {
                let bytes = value.as_bytes().unwrap_or_default();
                let n = bytes.len().min(len);
                // SAFETY: at most `len` bytes go into the array
                unsafe {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, n);
                    if n < len {
                        (addr as *mut u8).add(n).write(0);
                    }
                }
                Ok(())
            }
            _ => self.copy_same_type(ty, addr, value),
        }
    }

    fn record_from(
        &self,
        ty: &CTypeRef,
        addr: usize,
        value: &Value,
        rule: Rule,
        keep: &mut Vec<Anchor>,
    ) -> Result<()> {
        let Some(record) = ty.record_ref() else {
            return Err(cannot_convert(value, ty));
        };
        if record.is_opaque() {
            return Err(FfiError::type_error(format!(
                "size of C type '{ty}' is unknown"
            )));
        }
        let fields = record.fields();
        match value {
            Value::Table(map) => {
                let map = map.borrow();
                for field in &fields {
                    if let Some(v) = map.get(&field.name) {
                        self.from_host(&field.ty, addr + field.offset, v, rule, keep)?;
                    }
                }
                Ok(())
            }
            Value::Array(items) => {
                let items = items.borrow();
                self.positional_fields(ty, addr, &items, rule, keep)
            }
            _ => self.copy_same_type(ty, addr, value),
        }
    }

    /// Initialize record members in declaration order; a union only takes
    /// its first member
    pub(crate) fn positional_fields(
        &self,
        ty: &CTypeRef,
        addr: usize,
        items: &[Value],
        rule: Rule,
        keep: &mut Vec<Anchor>,
    ) -> Result<()> {
        let Some(record) = ty.record_ref() else {
            return Err(too_many_initializers(ty));
        };
        let fields = record.fields();
        let limit = if record.is_union { 1 } else { fields.len() };
        if items.len() > limit {
            return Err(too_many_initializers(ty));
        }
        for (field, item) in fields.iter().zip(items) {
            self.from_host(&field.ty, addr + field.offset, item, rule, keep)?;
        }
        Ok(())
    }
}

pub(crate) fn too_many_initializers(ty: &CType) -> FfiError {
    FfiError::type_error(format!("too many initializers for '{ty}'"))
}
