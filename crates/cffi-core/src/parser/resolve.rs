//! Turns parsed declarations into type descriptors and store entries.

use super::ast::{BaseSpec, Decl, Declarator, FieldDecl, TypeSpec};
use crate::ctype::{CType, CTypeRef, DeclStore, Primitive, Symbol, compute_layout};
use crate::errors::{FfiError, Result};
use tracing::debug;

pub struct Resolver<'s> {
    store: &'s mut DeclStore,
    params: &'s [CTypeRef],
    next_param: usize,
}

fn builtin_type(words: &[String]) -> Result<CTypeRef> {
    let count = |w: &str| words.iter().filter(|x| x.as_str() == w).count();
    let invalid = || FfiError::declaration(format!("invalid type '{}'", words.join(" ")));

    let signed = count("signed");
    let unsigned = count("unsigned");
    if signed + unsigned > 1 {
        return Err(invalid());
    }
    let has_sign = signed + unsigned == 1;
    let pick = |s: Primitive, u: Primitive| if unsigned == 1 { u } else { s };

    let shape = (
        count("void"),
        count("bool") + count("_Bool"),
        count("char"),
        count("short"),
        count("int"),
        count("long"),
        count("float"),
        count("double"),
    );
    let prim = match shape {
        (1, 0, 0, 0, 0, 0, 0, 0) if !has_sign => return Ok(CType::void()),
        (0, 1, 0, 0, 0, 0, 0, 0) if !has_sign => Primitive::Bool,
        (0, 0, 1, 0, 0, 0, 0, 0) => match (signed, unsigned) {
            (1, _) => Primitive::SChar,
            (_, 1) => Primitive::UChar,
            _ => Primitive::Char,
        },
        (0, 0, 0, 1, 0 | 1, 0, 0, 0) => pick(Primitive::Short, Primitive::UShort),
        (0, 0, 0, 0, 0 | 1, 0, 0, 0) => pick(Primitive::Int, Primitive::UInt),
        (0, 0, 0, 0, 0 | 1, 1, 0, 0) => pick(Primitive::Long, Primitive::ULong),
        (0, 0, 0, 0, 0 | 1, 2, 0, 0) => pick(Primitive::LLong, Primitive::ULLong),
        (0, 0, 0, 0, 0, 0, 1, 0) if !has_sign => Primitive::Float,
        (0, 0, 0, 0, 0, 0, 0, 1) if !has_sign => Primitive::Double,
        (0, 0, 0, 0, 0, 1, 0, 1) => {
            return Err(FfiError::declaration("'long double' is not supported"));
        }
        _ => return Err(invalid()),
    };
    Ok(CType::prim(prim))
}

/// Parameter types decay the way C adjusts them: arrays to pointers to the
/// element type, functions to function pointers.
fn adjust_param(ty: CTypeRef) -> CTypeRef {
    match ty.base() {
        Some(elem) if ty.is_array() => CType::qualified(&CType::pointer_to(elem.clone()), ty.quals),
        _ if ty.is_function() => CType::pointer_to(ty),
        _ => ty,
    }
}

impl<'s> Resolver<'s> {
    pub fn new(store: &'s mut DeclStore, params: &'s [CTypeRef]) -> Self {
        Resolver {
            store,
            params,
            next_param: 0,
        }
    }

    pub fn declare(&mut self, decl: &Decl) -> Result<()> {
        match decl {
            Decl::Typedef(spec, declarators) => {
                let base = self.spec(spec)?;
                for d in declarators {
                    let (name, ty) = self.declarator(d, base.clone())?;
                    let name = name.ok_or_else(|| {
                        FfiError::declaration(format!("typedef of '{ty}' requires a name"))
                    })?;
                    debug!(name = %name, ty = %ty, "typedef");
                    self.store.add_typedef(&name, ty)?;
                }
            }
            Decl::Object(spec, declarators) => {
                let base = self.spec(spec)?;
                for d in declarators.iter().filter(|d| !d.is_empty()) {
                    let (name, ty) = self.declarator(d, base.clone())?;
                    let name = name.ok_or_else(|| {
                        FfiError::declaration(format!(
                            "declaration of '{ty}' does not declare anything"
                        ))
                    })?;
                    let symbol = if ty.is_function() {
                        Symbol::Function(ty)
                    } else {
                        Symbol::Variable(ty)
                    };
                    debug!(name = %name, ty = %symbol.ty(), "declared symbol");
                    self.store.add_symbol(&name, symbol)?;
                }
            }
        }
        Ok(())
    }

    /// Resolve an abstract type name; a declared name is rejected
    pub fn type_name(&mut self, spec: &TypeSpec, decl: &Declarator) -> Result<CTypeRef> {
        let base = self.spec(spec)?;
        let (name, ty) = self.declarator(decl, base)?;
        if let Some(name) = name {
            return Err(FfiError::declaration(format!(
                "unexpected name '{name}' in type '{ty}'"
            )));
        }
        Ok(ty)
    }

    fn next_param(&mut self) -> Result<CTypeRef> {
        let ty = self
            .params
            .get(self.next_param)
            .cloned()
            .ok_or_else(|| FfiError::declaration("not enough parameters for '$'"))?;
        self.next_param += 1;
        Ok(ty)
    }

    fn spec(&mut self, spec: &TypeSpec) -> Result<CTypeRef> {
        let ty = match &spec.base {
            BaseSpec::Builtin(words) => builtin_type(words)?,
            BaseSpec::Named(name) => self
                .store
                .typedef(name)
                .ok_or_else(|| FfiError::declaration(format!("undeclared type '{name}'")))?,
            BaseSpec::Record {
                is_union,
                tag,
                fields,
            } => self.record(*is_union, tag.as_deref(), fields.as_deref())?,
            BaseSpec::Enum { items, .. } => {
                if let Some(items) = items {
                    self.enumeration(items)?;
                }
                CType::prim(Primitive::Int)
            }
            BaseSpec::Param => self.next_param()?,
        };
        Ok(CType::qualified(&ty, spec.quals))
    }

    fn record(
        &mut self,
        is_union: bool,
        tag: Option<&str>,
        fields: Option<&[FieldDecl]>,
    ) -> Result<CTypeRef> {
        let record = self.store.declare_record(tag.unwrap_or(""), is_union)?;
        let Some(fields) = fields else {
            return Ok(CType::record(record));
        };

        let mut members = Vec::new();
        for field in fields {
            let base = self.spec(&field.spec)?;
            for d in &field.declarators {
                let (name, ty) = self.declarator(d, base.clone())?;
                let name = name.ok_or_else(|| {
                    FfiError::declaration(format!("expected a member name after '{ty}'"))
                })?;
                members.push((name, ty));
            }
        }
        let body = compute_layout(members, is_union)?;
        self.store.define_record(&record, body)?;
        let ty = CType::record(record);
        debug!(record = %ty, size = ty.alloc_size(), align = ty.align(), "defined record");
        Ok(ty)
    }

    fn enumeration(&mut self, items: &[(String, Option<i64>)]) -> Result<()> {
        let int = CType::prim(Primitive::Int);
        let mut next = 0i64;
        for (name, value) in items {
            let value = value.unwrap_or(next);
            self.store
                .add_symbol(name, Symbol::Constant(value, int.clone()))?;
            next = value.wrapping_add(1);
        }
        Ok(())
    }

    fn declarator(&mut self, decl: &Declarator, base: CTypeRef) -> Result<(Option<String>, CTypeRef)> {
        match decl {
            Declarator::Name(name) => Ok((name.clone(), base)),
            Declarator::Pointer { quals, inner } => {
                let ptr = CType::qualified(&CType::pointer_to(base), *quals);
                self.declarator(inner, ptr)
            }
            Declarator::Reference(inner) => {
                if base.is_reference() {
                    return Err(FfiError::declaration(format!(
                        "cannot declare a reference to '{base}'"
                    )));
                }
                self.declarator(inner, CType::reference_to(base))
            }
            Declarator::Array { inner, len } => {
                if base.is_unbounded() || base.is_vla() {
                    return Err(FfiError::declaration(format!(
                        "array has incomplete element type '{base}'"
                    )));
                }
                self.declarator(inner, CType::array_of(base, *len))
            }
            Declarator::Function {
                inner,
                params,
                variadic,
            } => {
                if base.is_array() || base.is_function() {
                    return Err(FfiError::declaration(format!(
                        "function cannot return '{base}'"
                    )));
                }
                let mut types = Vec::with_capacity(params.len());
                for p in params {
                    let pbase = self.spec(&p.spec)?;
                    let (_, ty) = self.declarator(&p.decl, pbase)?;
                    if ty.is_void() {
                        if params.len() == 1 && !variadic && p.decl.is_empty() {
                            break;
                        }
                        return Err(FfiError::declaration("'void' must be the only parameter"));
                    }
                    types.push(adjust_param(ty));
                }
                self.declarator(inner, CType::function(base, types, *variadic))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_words() {
        let words = |s: &str| s.split(' ').map(str::to_string).collect::<Vec<_>>();
        assert_eq!(
            builtin_type(&words("unsigned long long int")).unwrap().primitive(),
            Some(Primitive::ULLong)
        );
        assert_eq!(
            builtin_type(&words("signed char")).unwrap().primitive(),
            Some(Primitive::SChar)
        );
        assert_eq!(
            builtin_type(&words("unsigned")).unwrap().primitive(),
            Some(Primitive::UInt)
        );
        assert!(builtin_type(&words("void")).unwrap().is_void());
        assert!(builtin_type(&words("signed unsigned int")).is_err());
        assert!(builtin_type(&words("long double")).is_err());
        assert!(builtin_type(&words("short float")).is_err());
    }

    #[test]
    fn test_array_parameter_decays() {
        let arr = CType::array_of(CType::prim(Primitive::Int), crate::ctype::ArrayLen::Fixed(4));
        assert_eq!(adjust_param(arr).serialize(), "int *");
    }
}
