//! C type descriptors.
//!
//! A [`CType`] is an immutable description of a native type: its kind,
//! qualifiers, size and alignment. Records are the one exception to
//! immutability: a forward-declared `struct foo;` gets its body filled in
//! when the full definition is declared later, so that pointers created in
//! between see the completed layout.

mod layout;
mod store;

pub use layout::{RecordBody, compute_layout};
pub use store::{DeclStore, Symbol};

use bitflags::bitflags;
use std::cell::RefCell;
use std::fmt;
use std::mem::{align_of, size_of};
use std::rc::Rc;

pub type CTypeRef = Rc<CType>;
pub type RecordRef = Rc<Record>;

/// Whether plain `char` is unsigned on this target
pub const CHAR_UNSIGNED: bool = libc::c_char::MIN == 0;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Qualifiers: u8 {
        const CONST = 1 << 0;
        const VOLATILE = 1 << 1;
    }
}

/// Arithmetic primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Char,
    SChar,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LLong,
    ULLong,
    Float,
    Double,
}

impl Primitive {
    pub fn size(self) -> usize {
        match self {
            Primitive::Bool => size_of::<bool>(),
            Primitive::Char | Primitive::SChar | Primitive::UChar => 1,
            Primitive::Short | Primitive::UShort => size_of::<libc::c_short>(),
            Primitive::Int | Primitive::UInt => size_of::<libc::c_int>(),
            Primitive::Long | Primitive::ULong => size_of::<libc::c_long>(),
            Primitive::LLong | Primitive::ULLong => size_of::<libc::c_longlong>(),
            Primitive::Float => size_of::<libc::c_float>(),
            Primitive::Double => size_of::<libc::c_double>(),
        }
    }

    pub fn align(self) -> usize {
        match self {
            Primitive::Bool => align_of::<bool>(),
            Primitive::Char | Primitive::SChar | Primitive::UChar => 1,
            Primitive::Short | Primitive::UShort => align_of::<libc::c_short>(),
            Primitive::Int | Primitive::UInt => align_of::<libc::c_int>(),
            Primitive::Long | Primitive::ULong => align_of::<libc::c_long>(),
            Primitive::LLong | Primitive::ULLong => align_of::<libc::c_longlong>(),
            Primitive::Float => align_of::<libc::c_float>(),
            Primitive::Double => align_of::<libc::c_double>(),
        }
    }

    pub fn is_unsigned(self) -> bool {
        match self {
            Primitive::Bool
            | Primitive::UChar
            | Primitive::UShort
            | Primitive::UInt
            | Primitive::ULong
            | Primitive::ULLong => true,
            Primitive::Char => CHAR_UNSIGNED,
            _ => false,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::Float | Primitive::Double)
    }

    pub fn is_integer(self) -> bool {
        !self.is_float()
    }

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Char => "char",
            Primitive::SChar => "signed char",
            Primitive::UChar => "unsigned char",
            Primitive::Short => "short",
            Primitive::UShort => "unsigned short",
            Primitive::Int => "int",
            Primitive::UInt => "unsigned int",
            Primitive::Long => "long",
            Primitive::ULong => "unsigned long",
            Primitive::LLong => "long long",
            Primitive::ULLong => "unsigned long long",
            Primitive::Float => "float",
            Primitive::Double => "double",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayLen {
    Fixed(usize),
    /// `T[?]`: the length is supplied at construction time
    Vla,
    /// `T[]`: no length, cannot be instantiated
    Unbounded,
}

/// Stable identity of a struct/union declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u32);

#[derive(Debug)]
pub struct Record {
    pub id: RecordId,
    /// Empty for anonymous records
    pub tag: String,
    pub is_union: bool,
    body: RefCell<Option<RecordBody>>,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: CTypeRef,
    pub offset: usize,
}

impl Record {
    pub fn new(id: RecordId, tag: impl Into<String>, is_union: bool) -> Self {
        Record {
            id,
            tag: tag.into(),
            is_union,
            body: RefCell::new(None),
        }
    }

    pub fn is_opaque(&self) -> bool {
        self.body.borrow().is_none()
    }

    pub fn set_body(&self, body: RecordBody) {
        *self.body.borrow_mut() = Some(body);
    }

    pub fn size(&self) -> usize {
        self.body.borrow().as_ref().map_or(0, |b| b.size)
    }

    pub fn align(&self) -> usize {
        self.body.borrow().as_ref().map_or(1, |b| b.align)
    }

    pub fn fields(&self) -> Vec<Field> {
        self.body
            .borrow()
            .as_ref()
            .map(|b| b.fields.clone())
            .unwrap_or_default()
    }

    /// Look up a field, returning its byte offset and type
    pub fn field_offset(&self, name: &str) -> Option<(usize, CTypeRef)> {
        let body = self.body.borrow();
        body.as_ref()?
            .fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| (f.offset, f.ty.clone()))
    }

    fn keyword(&self) -> &'static str {
        if self.is_union { "union" } else { "struct" }
    }
}

#[derive(Debug, Clone)]
pub struct FuncSig {
    pub ret: CTypeRef,
    pub params: Vec<CTypeRef>,
    pub variadic: bool,
}

#[derive(Debug, Clone)]
pub enum CTypeKind {
    Void,
    Prim(Primitive),
    Pointer(CTypeRef),
    Reference(CTypeRef),
    Array { base: CTypeRef, len: ArrayLen },
    Record(RecordRef),
    Function(Rc<FuncSig>),
}

#[derive(Debug, Clone)]
pub struct CType {
    pub kind: CTypeKind,
    pub quals: Qualifiers,
}

/// Byte size of `n` elements of `esize` bytes, if it fits an allocation
pub fn array_size(esize: usize, n: usize) -> Option<usize> {
    esize.checked_mul(n).filter(|size| *size <= isize::MAX as usize)
}

impl CType {
    pub fn new(kind: CTypeKind) -> CTypeRef {
        Rc::new(CType {
            kind,
            quals: Qualifiers::empty(),
        })
    }

    pub fn void() -> CTypeRef {
        CType::new(CTypeKind::Void)
    }

    pub fn prim(p: Primitive) -> CTypeRef {
        CType::new(CTypeKind::Prim(p))
    }

    pub fn pointer_to(base: CTypeRef) -> CTypeRef {
        CType::new(CTypeKind::Pointer(base))
    }

    pub fn reference_to(base: CTypeRef) -> CTypeRef {
        CType::new(CTypeKind::Reference(base))
    }

    pub fn array_of(base: CTypeRef, len: ArrayLen) -> CTypeRef {
        CType::new(CTypeKind::Array { base, len })
    }

    pub fn record(record: RecordRef) -> CTypeRef {
        CType::new(CTypeKind::Record(record))
    }

    pub fn function(ret: CTypeRef, params: Vec<CTypeRef>, variadic: bool) -> CTypeRef {
        CType::new(CTypeKind::Function(Rc::new(FuncSig {
            ret,
            params,
            variadic,
        })))
    }

    /// Copy of `ty` with extra qualifiers
    pub fn qualified(ty: &CTypeRef, quals: Qualifiers) -> CTypeRef {
        if quals.is_empty() {
            return ty.clone();
        }
        Rc::new(CType {
            kind: ty.kind.clone(),
            quals: ty.quals | quals,
        })
    }

    /// Size of one instance in bytes; 0 when unknown (incomplete types)
    pub fn alloc_size(&self) -> usize {
        self.checked_size().unwrap_or(0)
    }

    /// Like [`CType::alloc_size`], but `None` when an array is too large
    /// to be allocated
    pub fn checked_size(&self) -> Option<usize> {
        match &self.kind {
            CTypeKind::Void | CTypeKind::Function(_) => Some(0),
            CTypeKind::Prim(p) => Some(p.size()),
            CTypeKind::Pointer(_) | CTypeKind::Reference(_) => Some(size_of::<usize>()),
            CTypeKind::Array { base, len } => match len {
                ArrayLen::Fixed(n) => array_size(base.checked_size()?, *n),
                ArrayLen::Vla | ArrayLen::Unbounded => Some(0),
            },
            CTypeKind::Record(r) => Some(r.size()),
        }
    }

    pub fn align(&self) -> usize {
        match &self.kind {
            CTypeKind::Void => 1,
            CTypeKind::Prim(p) => p.align(),
            CTypeKind::Pointer(_) | CTypeKind::Reference(_) | CTypeKind::Function(_) => {
                align_of::<usize>()
            }
            CTypeKind::Array { base, .. } => base.align(),
            CTypeKind::Record(r) => r.align(),
        }
    }

    pub fn primitive(&self) -> Option<Primitive> {
        match self.kind {
            CTypeKind::Prim(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, CTypeKind::Void)
    }

    pub fn is_arith(&self) -> bool {
        matches!(self.kind, CTypeKind::Prim(_))
    }

    pub fn is_integer(&self) -> bool {
        self.primitive().is_some_and(Primitive::is_integer)
    }

    pub fn is_unsigned(&self) -> bool {
        self.primitive().is_some_and(Primitive::is_unsigned)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, CTypeKind::Pointer(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, CTypeKind::Reference(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, CTypeKind::Array { .. })
    }

    pub fn is_record(&self) -> bool {
        matches!(self.kind, CTypeKind::Record(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, CTypeKind::Function(_))
    }

    /// Function or pointer to function
    pub fn is_callable(&self) -> bool {
        self.signature().is_some()
    }

    pub fn is_vla(&self) -> bool {
        matches!(
            self.kind,
            CTypeKind::Array {
                len: ArrayLen::Vla,
                ..
            }
        )
    }

    /// Types which cannot be instantiated because their size is unknown
    pub fn is_unbounded(&self) -> bool {
        match &self.kind {
            CTypeKind::Array { len, base } => {
                matches!(len, ArrayLen::Unbounded) || base.is_unbounded()
            }
            CTypeKind::Record(r) => r.is_opaque(),
            CTypeKind::Void | CTypeKind::Function(_) => true,
            _ => false,
        }
    }

    /// Pointee of pointers/references, element type of arrays
    pub fn base(&self) -> Option<&CTypeRef> {
        match &self.kind {
            CTypeKind::Pointer(b) | CTypeKind::Reference(b) => Some(b),
            CTypeKind::Array { base, .. } => Some(base),
            _ => None,
        }
    }

    pub fn record_ref(&self) -> Option<&RecordRef> {
        match &self.kind {
            CTypeKind::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Signature of a function or function pointer
    pub fn signature(&self) -> Option<&Rc<FuncSig>> {
        match &self.kind {
            CTypeKind::Function(sig) => Some(sig),
            CTypeKind::Pointer(b) => match &b.kind {
                CTypeKind::Function(sig) => Some(sig),
                _ => None,
            },
            _ => None,
        }
    }

    /// Strip exactly one level of reference. Never recursive.
    pub fn deref(self: &CTypeRef) -> CTypeRef {
        match &self.kind {
            CTypeKind::Reference(b) => b.clone(),
            _ => self.clone(),
        }
    }

    /// The record a metatype lookup applies to: the record itself, or the
    /// pointee of a pointer/reference to a record.
    pub fn metatype_record(&self) -> Option<&RecordRef> {
        match &self.kind {
            CTypeKind::Record(r) => Some(r),
            CTypeKind::Pointer(b) | CTypeKind::Reference(b) => b.record_ref(),
            _ => None,
        }
    }

    pub fn field_offset(&self, name: &str) -> Option<(usize, CTypeRef)> {
        self.record_ref()?.field_offset(name)
    }

    /// Structural equality; `relaxed` ignores cv-qualifiers at every level
    pub fn is_same(&self, other: &CType, relaxed: bool) -> bool {
        if !relaxed && self.quals != other.quals {
            return false;
        }
        match (&self.kind, &other.kind) {
            (CTypeKind::Void, CTypeKind::Void) => true,
            (CTypeKind::Prim(a), CTypeKind::Prim(b)) => a == b,
            (CTypeKind::Pointer(a), CTypeKind::Pointer(b))
            | (CTypeKind::Reference(a), CTypeKind::Reference(b)) => a.is_same(b, relaxed),
            (
                CTypeKind::Array { base: a, len: la },
                CTypeKind::Array { base: b, len: lb },
            ) => la == lb && a.is_same(b, relaxed),
            (CTypeKind::Record(a), CTypeKind::Record(b)) => a.id == b.id,
            (CTypeKind::Function(a), CTypeKind::Function(b)) => {
                a.variadic == b.variadic
                    && a.params.len() == b.params.len()
                    && a.ret.is_same(&b.ret, relaxed)
                    && a
                        .params
                        .iter()
                        .zip(b.params.iter())
                        .all(|(x, y)| x.is_same(y, relaxed))
            }
            _ => false,
        }
    }

    /// Canonical C rendering, e.g. `int (*)(int, double)` or `char *[4]`
    pub fn serialize(&self) -> String {
        self.serialize_with(String::new())
    }

    fn serialize_with(&self, declarator: String) -> String {
        match &self.kind {
            CTypeKind::Void => self.leaf("void", declarator),
            CTypeKind::Prim(p) => self.leaf(p.name(), declarator),
            CTypeKind::Record(r) => {
                let name = if r.tag.is_empty() {
                    format!("{} {}", r.keyword(), r.id.0)
                } else {
                    format!("{} {}", r.keyword(), r.tag)
                };
                self.leaf(&name, declarator)
            }
            CTypeKind::Pointer(base) | CTypeKind::Reference(base) => {
                let sigil = if self.is_pointer() { "*" } else { "&" };
                let mut inner = String::from(sigil);
                if self.quals.contains(Qualifiers::CONST) {
                    inner.push_str("const");
                }
                if self.quals.contains(Qualifiers::VOLATILE) {
                    if inner.len() > 1 {
                        inner.push(' ');
                    }
                    inner.push_str("volatile");
                }
                if !declarator.is_empty() {
                    if inner.len() > 1 {
                        inner.push(' ');
                    }
                    inner.push_str(&declarator);
                }
                match base.kind {
                    CTypeKind::Array { .. } | CTypeKind::Function(_) => {
                        base.serialize_with(format!("({inner})"))
                    }
                    _ => base.serialize_with(inner),
                }
            }
            CTypeKind::Array { base, len } => {
                let dim = match len {
                    ArrayLen::Fixed(n) => format!("[{n}]"),
                    ArrayLen::Vla => "[?]".to_string(),
                    ArrayLen::Unbounded => "[]".to_string(),
                };
                base.serialize_with(format!("{declarator}{dim}"))
            }
            CTypeKind::Function(sig) => {
                let mut params: Vec<String> = sig.params.iter().map(|p| p.serialize()).collect();
                if sig.variadic {
                    params.push("...".to_string());
                }
                let params = if params.is_empty() {
                    "void".to_string()
                } else {
                    params.join(", ")
                };
                sig.ret.serialize_with(format!("{declarator}({params})"))
            }
        }
    }

    fn leaf(&self, name: &str, declarator: String) -> String {
        let mut out = String::new();
        if self.quals.contains(Qualifiers::CONST) {
            out.push_str("const ");
        }
        if self.quals.contains(Qualifiers::VOLATILE) {
            out.push_str("volatile ");
        }
        out.push_str(name);
        if !declarator.is_empty() {
            out.push(' ');
            out.push_str(&declarator);
        }
        out
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}
