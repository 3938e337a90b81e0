//! C data values.
//!
//! A [`CData`] pairs a type descriptor with storage. Storage is either an
//! owned, aligned block (optionally viewed at an offset so that members and
//! elements alias their parent), foreign memory the runtime does not own, or
//! nothing at all for ctype values.
//!
//! Pointer and function values keep the address they hold inside their own
//! storage. Reference values do not: their storage *is* the referent.

mod construct;
mod convert;

pub use convert::Rule;
pub(crate) use convert::{cannot_convert, describe, read_addr, read_prim, write_addr, write_prim};

use crate::ctype::{CType, CTypeKind, CTypeRef};
use crate::errors::{FfiError, Result};
use crate::marshal::CallbackHandle;
use crate::value::Value;
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::NonNull;
use std::rc::Rc;
use tracing::warn;

/// Zero-initialized heap memory with a fixed layout
#[derive(Debug)]
pub struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Block {
    pub fn new(size: usize, align: usize) -> Result<Rc<Block>> {
        let layout = Layout::from_size_align(size.max(1), align.max(1))
            .map_err(|e| FfiError::type_error(format!("invalid C type layout: {e}")))?;
        // SAFETY: the layout has a non-zero size
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr)
            .ok_or_else(|| FfiError::runtime(format!("out of memory allocating {size} bytes")))?;
        Ok(Rc::new(Block { ptr, layout }))
    }

    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // SAFETY: allocated in `Block::new` with this exact layout
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// Where the bytes of a value live
#[derive(Debug, Clone)]
pub enum Storage {
    /// Type values carry no data
    None,
    /// Memory owned by the runtime, possibly shared with a parent value
    Block { block: Rc<Block>, offset: usize },
    /// Memory owned by native code
    Foreign(usize),
}

impl Storage {
    pub fn addr(&self) -> usize {
        match self {
            Storage::None => 0,
            Storage::Block { block, offset } => block.addr().wrapping_add(*offset),
            Storage::Foreign(addr) => *addr,
        }
    }

    /// A view `by` bytes further into the same memory
    pub fn offset(&self, by: usize) -> Storage {
        match self {
            Storage::None => Storage::None,
            Storage::Block { block, offset } => Storage::Block {
                block: block.clone(),
                offset: offset.wrapping_add(by),
            },
            Storage::Foreign(addr) => Storage::Foreign(addr.wrapping_add(by)),
        }
    }

    pub fn block(&self) -> Option<&Rc<Block>> {
        match self {
            Storage::Block { block, .. } => Some(block),
            _ => None,
        }
    }
}

/// Something a value keeps alive because its memory points into it
pub type Anchor = Rc<dyn Any>;

/// Callback state of a function pointer created from a host function
#[derive(Debug, Default)]
pub enum ClosureSlot {
    #[default]
    None,
    Bound(Rc<CallbackHandle>),
    Freed,
}

pub(crate) struct CDataInner {
    ty: CTypeRef,
    storage: Storage,
    is_ctype: bool,
    finalizer: RefCell<Option<Value>>,
    closure: RefCell<ClosureSlot>,
    anchors: RefCell<Vec<Anchor>>,
}

/// A C value or C type handed out to the host
#[derive(Clone)]
pub struct CData(Rc<CDataInner>);

/// Bytes a value of `ty` occupies in its own storage
pub(crate) fn storage_size(ty: &CType) -> usize {
    match ty.kind {
        CTypeKind::Function(_) => size_of::<usize>(),
        _ => ty.alloc_size(),
    }
}

impl CData {
    fn from_parts(ty: CTypeRef, storage: Storage, is_ctype: bool) -> CData {
        CData(Rc::new(CDataInner {
            ty,
            storage,
            is_ctype,
            finalizer: RefCell::new(None),
            closure: RefCell::new(ClosureSlot::None),
            anchors: RefCell::new(Vec::new()),
        }))
    }

    /// A type value usable as a constructor
    pub fn ctype(ty: CTypeRef) -> CData {
        CData::from_parts(ty, Storage::None, true)
    }

    /// Fresh zeroed storage for a value of `ty`
    pub fn alloc(ty: CTypeRef) -> Result<CData> {
        let block = Block::new(storage_size(&ty), ty.align().max(align_of::<usize>()))?;
        Ok(CData::from_parts(ty, Storage::Block { block, offset: 0 }, false))
    }

    /// A value viewing existing storage
    pub fn aliasing(ty: CTypeRef, storage: Storage) -> CData {
        CData::from_parts(ty, storage, false)
    }

    /// A pointer or function value holding `addr`
    pub fn pointer(ty: CTypeRef, addr: usize) -> Result<CData> {
        let cd = CData::alloc(ty)?;
        // SAFETY: pointer and function storage holds exactly one address
        unsafe { write_addr(cd.addr(), addr) };
        Ok(cd)
    }

    /// A reference value aliasing `storage`
    pub fn reference(base: CTypeRef, storage: Storage) -> CData {
        CData::aliasing(CType::reference_to(base), storage)
    }

    pub fn ty(&self) -> &CTypeRef {
        &self.0.ty
    }

    pub fn is_ctype(&self) -> bool {
        self.0.is_ctype
    }

    pub fn storage(&self) -> &Storage {
        &self.0.storage
    }

    /// Address of this value's own bytes (the referent for references)
    pub fn addr(&self) -> usize {
        self.0.storage.addr()
    }

    /// The address a pointer-like value designates: the stored address of
    /// pointers and functions, the first element of arrays, the referent of
    /// references and the value itself otherwise
    pub fn pointer_value(&self) -> usize {
        match self.0.ty.kind {
            CTypeKind::Pointer(_) | CTypeKind::Function(_) if !self.0.is_ctype => {
                // SAFETY: pointer and function storage holds one address
                unsafe { read_addr(self.addr()) }
            }
            _ => self.addr(),
        }
    }

    pub fn ptr_eq(&self, other: &CData) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn set_finalizer(&self, finalizer: Option<Value>) {
        *self.0.finalizer.borrow_mut() = finalizer;
    }

    pub fn finalizer(&self) -> Option<Value> {
        self.0.finalizer.borrow().clone()
    }

    /// Keep `anchors` alive as long as this value
    pub fn anchor(&self, anchors: impl IntoIterator<Item = Anchor>) {
        self.0.anchors.borrow_mut().extend(anchors);
    }

    /// Anchors this value holds, plus the block it lives in
    pub fn keepalive(&self) -> Vec<Anchor> {
        let mut out: Vec<Anchor> = self.0.anchors.borrow().clone();
        if let Some(block) = self.0.storage.block() {
            out.push(block.clone());
        }
        if let ClosureSlot::Bound(handle) = &*self.0.closure.borrow() {
            out.push(handle.clone());
        }
        out
    }

    pub fn is_closure(&self) -> bool {
        !matches!(*self.0.closure.borrow(), ClosureSlot::None)
    }

    pub fn bind_closure(&self, handle: Rc<CallbackHandle>) {
        *self.0.closure.borrow_mut() = ClosureSlot::Bound(handle);
    }

    /// The live callback, or `BadCallback` once it has been freed
    pub fn closure_handle(&self) -> Result<Rc<CallbackHandle>> {
        match &*self.0.closure.borrow() {
            ClosureSlot::Bound(handle) => Ok(handle.clone()),
            _ => Err(FfiError::BadCallback),
        }
    }

    /// Release the callback; its entry point becomes invalid
    pub fn free_closure(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.0.closure.borrow_mut(), ClosureSlot::Freed);
        match previous {
            ClosureSlot::Bound(handle) => {
                handle.release();
                Ok(())
            }
            other => {
                *self.0.closure.borrow_mut() = other;
                Err(FfiError::BadCallback)
            }
        }
    }

    /// Raw bytes of the value, for byte-wise copies
    pub(crate) fn bytes(&self) -> &[u8] {
        let len = storage_size(&self.0.ty);
        if len == 0 || self.addr() == 0 {
            return &[];
        }
        // SAFETY: the storage is valid for the size of the value's type
        unsafe { std::slice::from_raw_parts(self.addr() as *const u8, len) }
    }
}

impl Drop for CDataInner {
    fn drop(&mut self) {
        let Some(finalizer) = self.finalizer.get_mut().take() else {
            return;
        };
        let snapshot = CData::aliasing(self.ty.clone(), self.storage.clone());
        let run = || match &finalizer {
            Value::Function(f) => f.call(&[Value::CData(snapshot)]).map(|_| ()),
            other => Err(FfiError::type_error(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        };
        match catch_unwind(AssertUnwindSafe(run)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(ty = %self.ty, error = %e, "finalizer failed"),
            Err(_) => warn!(ty = %self.ty, "finalizer panicked"),
        }
    }
}

impl fmt::Debug for CData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CData")
            .field("ty", &self.0.ty.serialize())
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("is_ctype", &self.0.is_ctype)
            .finish()
    }
}

/// Built-in rendering, without metatype overrides
impl fmt::Display for CData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ty = &self.0.ty;
        if self.0.is_ctype {
            return write!(f, "ctype<{ty}>");
        }
        let target = ty.deref();
        if let Some(p) = target.primitive()
            && p.is_integer()
            && p.size() == 8
        {
            // SAFETY: the value (or its referent) holds an 8-byte integer
            let v = unsafe { read_prim(p, self.addr()) };
            return if p.is_unsigned() {
                write!(f, "{}ULL", v.as_u64())
            } else {
                write!(f, "{}LL", v.as_i64())
            };
        }
        write!(f, "cdata<{ty}>: {:#x}", self.pointer_value())
    }
}
