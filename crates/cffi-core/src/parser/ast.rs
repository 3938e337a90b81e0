//! Syntax tree for the declaration subset. Nothing here is resolved yet:
//! names refer to typedefs and tags by string until the resolver walks it.

use crate::ctype::{ArrayLen, Qualifiers};

#[derive(Debug, Clone, PartialEq)]
pub enum BaseSpec {
    /// Builtin words in source order, e.g. `["unsigned", "long", "long"]`
    Builtin(Vec<String>),
    /// A typedef name
    Named(String),
    Record {
        is_union: bool,
        tag: Option<String>,
        fields: Option<Vec<FieldDecl>>,
    },
    Enum {
        tag: Option<String>,
        items: Option<Vec<(String, Option<i64>)>>,
    },
    /// `$`: substituted with the next declaration parameter
    Param,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeSpec {
    pub quals: Qualifiers,
    pub base: BaseSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub spec: TypeSpec,
    pub declarators: Vec<Declarator>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub spec: TypeSpec,
    pub decl: Declarator,
}

/// C declarators read inside-out: the outermost node is applied to the base
/// type first.
#[derive(Debug, Clone, PartialEq)]
pub enum Declarator {
    /// Innermost position: a declared name, or nothing for abstract declarators
    Name(Option<String>),
    Pointer {
        quals: Qualifiers,
        inner: Box<Declarator>,
    },
    Reference(Box<Declarator>),
    Array {
        inner: Box<Declarator>,
        len: ArrayLen,
    },
    Function {
        inner: Box<Declarator>,
        params: Vec<ParamDecl>,
        variadic: bool,
    },
}

impl Declarator {
    /// Whether this declarator introduces no name and no derived type
    pub fn is_empty(&self) -> bool {
        matches!(self, Declarator::Name(None))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Typedef(TypeSpec, Vec<Declarator>),
    /// Tag declarations, prototypes and `extern` variables
    Object(TypeSpec, Vec<Declarator>),
}
