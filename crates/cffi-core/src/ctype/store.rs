//! Declaration storage: typedefs, record tags and symbols.

use super::{CType, CTypeRef, Primitive, Record, RecordBody, RecordId, RecordRef};
use crate::errors::{FfiError, Result};
use std::collections::HashMap;
use std::mem::size_of;
use std::rc::Rc;

/// A declared external symbol
#[derive(Debug, Clone)]
pub enum Symbol {
    /// A function; the type is of function kind
    Function(CTypeRef),
    /// An `extern` variable
    Variable(CTypeRef),
    /// An enumeration constant
    Constant(i64, CTypeRef),
}

impl Symbol {
    pub fn ty(&self) -> &CTypeRef {
        match self {
            Symbol::Function(t) | Symbol::Variable(t) | Symbol::Constant(_, t) => t,
        }
    }
}

#[derive(Debug)]
pub struct DeclStore {
    typedefs: HashMap<String, CTypeRef>,
    records: HashMap<String, RecordRef>,
    symbols: HashMap<String, Symbol>,
    next_record: u32,
}

impl Default for DeclStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Integer type with the same width as the platform's pointer-sized values
fn pointer_sized(unsigned: bool) -> Primitive {
    let long_matches = size_of::<libc::c_long>() == size_of::<usize>();
    match (long_matches, size_of::<usize>(), unsigned) {
        (true, _, false) => Primitive::Long,
        (true, _, true) => Primitive::ULong,
        (false, 4, false) => Primitive::Int,
        (false, 4, true) => Primitive::UInt,
        (false, _, false) => Primitive::LLong,
        (false, _, true) => Primitive::ULLong,
    }
}

impl DeclStore {
    pub fn new() -> Self {
        let mut store = DeclStore {
            typedefs: HashMap::new(),
            records: HashMap::new(),
            symbols: HashMap::new(),
            next_record: 1,
        };
        store.install_builtin_typedefs();
        store
    }

    fn install_builtin_typedefs(&mut self) {
        let builtins = [
            ("int8_t", Primitive::SChar),
            ("uint8_t", Primitive::UChar),
            ("int16_t", Primitive::Short),
            ("uint16_t", Primitive::UShort),
            ("int32_t", Primitive::Int),
            ("uint32_t", Primitive::UInt),
            ("int64_t", Primitive::LLong),
            ("uint64_t", Primitive::ULLong),
            ("size_t", pointer_sized(true)),
            ("ssize_t", pointer_sized(false)),
            ("intptr_t", pointer_sized(false)),
            ("uintptr_t", pointer_sized(true)),
            ("ptrdiff_t", pointer_sized(false)),
            (
                "wchar_t",
                if size_of::<libc::wchar_t>() == 2 {
                    Primitive::UShort
                } else {
                    Primitive::Int
                },
            ),
        ];
        for (name, prim) in builtins {
            self.typedefs.insert(name.to_string(), CType::prim(prim));
        }
        self.typedefs
            .insert("va_list".to_string(), CType::pointer_to(CType::void()));
    }

    pub fn typedef(&self, name: &str) -> Option<CTypeRef> {
        self.typedefs.get(name).cloned()
    }

    /// Register `name` as an alias. Redeclaring with an identical type is
    /// allowed, as in C11.
    pub fn add_typedef(&mut self, name: &str, ty: CTypeRef) -> Result<()> {
        if let Some(existing) = self.typedefs.get(name)
            && !existing.is_same(&ty, false)
        {
            return Err(FfiError::declaration(format!(
                "conflicting types for '{name}'"
            )));
        }
        self.typedefs.insert(name.to_string(), ty);
        Ok(())
    }

    pub fn record(&self, tag: &str) -> Option<RecordRef> {
        self.records.get(tag).cloned()
    }

    fn new_record_id(&mut self) -> RecordId {
        let id = RecordId(self.next_record);
        self.next_record += 1;
        id
    }

    /// Find or forward-declare the record with `tag`. Anonymous records
    /// (empty tag) always get a fresh identity.
    pub fn declare_record(&mut self, tag: &str, is_union: bool) -> Result<RecordRef> {
        if !tag.is_empty()
            && let Some(existing) = self.records.get(tag)
        {
            if existing.is_union != is_union {
                return Err(FfiError::declaration(format!(
                    "'{tag}' defined as wrong kind of tag"
                )));
            }
            return Ok(existing.clone());
        }
        let record = Rc::new(Record::new(self.new_record_id(), tag, is_union));
        if !tag.is_empty() {
            self.records.insert(tag.to_string(), record.clone());
        }
        Ok(record)
    }

    /// Complete a record declaration with its layout
    pub fn define_record(&mut self, record: &RecordRef, body: RecordBody) -> Result<()> {
        if !record.is_opaque() {
            return Err(FfiError::declaration(format!(
                "redefinition of '{}'",
                CType::record(record.clone()).serialize()
            )));
        }
        record.set_body(body);
        Ok(())
    }

    pub fn symbol(&self, name: &str) -> Option<Symbol> {
        self.symbols.get(name).cloned()
    }

    pub fn add_symbol(&mut self, name: &str, symbol: Symbol) -> Result<()> {
        if let Some(existing) = self.symbols.get(name)
            && !existing.ty().is_same(symbol.ty(), true)
        {
            return Err(FfiError::declaration(format!(
                "conflicting types for '{name}'"
            )));
        }
        self.symbols.insert(name.to_string(), symbol);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctype::compute_layout;

    #[test]
    fn test_builtin_typedefs() {
        let store = DeclStore::new();
        assert_eq!(store.typedef("int32_t").unwrap().alloc_size(), 4);
        assert_eq!(store.typedef("uint8_t").unwrap().alloc_size(), 1);
        assert_eq!(store.typedef("size_t").unwrap().alloc_size(), size_of::<usize>());
        assert!(store.typedef("size_t").unwrap().is_unsigned());
    }

    #[test]
    fn test_forward_declared_record_is_completed_in_place() {
        let mut store = DeclStore::new();
        let fwd = store.declare_record("node", false).unwrap();
        assert!(fwd.is_opaque());

        let again = store.declare_record("node", false).unwrap();
        assert_eq!(fwd.id, again.id);

        let body = compute_layout(vec![("v".into(), CType::prim(Primitive::Int))], false).unwrap();
        store.define_record(&again, body).unwrap();
        assert!(!fwd.is_opaque());
        assert_eq!(fwd.size(), 4);
    }

    #[test]
    fn test_record_redefinition_fails() {
        let mut store = DeclStore::new();
        let rec = store.declare_record("p", false).unwrap();
        let body = compute_layout(vec![("v".into(), CType::prim(Primitive::Int))], false).unwrap();
        store.define_record(&rec, body.clone()).unwrap();
        assert!(store.define_record(&rec, body).is_err());
    }

    #[test]
    fn test_conflicting_typedef() {
        let mut store = DeclStore::new();
        store.add_typedef("myint", CType::prim(Primitive::Int)).unwrap();
        store.add_typedef("myint", CType::prim(Primitive::Int)).unwrap();
        assert!(store.add_typedef("myint", CType::prim(Primitive::Long)).is_err());
    }
}
