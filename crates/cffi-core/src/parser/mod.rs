//! Parser for the C declaration subset the runtime understands.
//!
//! Declarations go through two passes: a chumsky grammar producing a small
//! syntax tree ([`ast`]), then a resolver which looks names up in the
//! [`DeclStore`] and builds [`CType`](crate::ctype::CType) descriptors.
//!
//! The runtime only talks to this module through [`DeclParser`], so a fuller
//! C front end can be plugged in without touching the value runtime.

use crate::ctype::{CTypeRef, DeclStore};
use crate::errors::{FfiError, Result};
use chumsky::Parser;

mod ast;
mod declarations;
mod errors;
mod lexer;
mod literals;
mod resolve;

pub use literals::NumberLiteral;

use errors::errors_to_declaration;
use resolve::Resolver;

/// Source of type descriptors for declaration text
pub trait DeclParser {
    /// Parse and apply `text` to the store. `params` substitute `$` in order.
    fn declare(&self, store: &mut DeclStore, text: &str, params: &[CTypeRef]) -> Result<()>;

    /// Parse a single abstract type name such as `"int *[4]"`
    fn parse_type(&self, store: &mut DeclStore, text: &str, params: &[CTypeRef])
    -> Result<CTypeRef>;

    /// Parse a numeric literal and type it like a C constant
    fn parse_number(&self, text: &str) -> Result<NumberLiteral>;
}

/// The bundled parser for the declaration subset
#[derive(Debug, Default, Clone, Copy)]
pub struct CDeclParser;

impl DeclParser for CDeclParser {
    fn declare(&self, store: &mut DeclStore, text: &str, params: &[CTypeRef]) -> Result<()> {
        let decls = declarations::declarations()
            .parse(text)
            .into_result()
            .map_err(|errs| errors_to_declaration(errs, text))?;
        let mut resolver = Resolver::new(store, params);
        for decl in &decls {
            resolver.declare(decl)?;
        }
        Ok(())
    }

    fn parse_type(
        &self,
        store: &mut DeclStore,
        text: &str,
        params: &[CTypeRef],
    ) -> Result<CTypeRef> {
        let (spec, decl) = declarations::type_name()
            .parse(text)
            .into_result()
            .map_err(|errs| errors_to_declaration(errs, text))?;
        Resolver::new(store, params).type_name(&spec, &decl)
    }

    fn parse_number(&self, text: &str) -> Result<NumberLiteral> {
        literals::literal()
            .parse(text)
            .into_result()
            .map_err(|errs| match errors_to_declaration(errs, text) {
                FfiError::Declaration(msg) => {
                    FfiError::type_error(format!("malformed number '{text}': {msg}"))
                }
                other => other,
            })
    }
}
