use super::ast::{BaseSpec, Decl, Declarator, FieldDecl, ParamDecl, TypeSpec};
use super::lexer::{BUILTIN_WORDS, Extra, ident, keyword, punct, ws};
use super::literals;
use crate::ctype::{ArrayLen, Qualifiers};
use chumsky::prelude::*;
use chumsky::recursive::Indirect;

type Grammar<'a, T> = chumsky::Boxed<'a, 'a, &'a str, T, Extra<'a>>;

#[derive(Clone)]
enum PtrOp {
    Pointer(Qualifiers),
    Reference,
}

#[derive(Clone)]
enum Suffix {
    Array(ArrayLen),
    Function(Vec<ParamDecl>, bool),
}

/// Fold the pieces of one declarator level into the inside-out tree.
/// Suffixes bind tighter than the pointer prefix.
fn build_declarator(ptrs: Vec<PtrOp>, direct: Declarator, suffixes: Vec<Suffix>) -> Declarator {
    let mut decl = direct;
    for suffix in suffixes {
        decl = match suffix {
            Suffix::Array(len) => Declarator::Array {
                inner: Box::new(decl),
                len,
            },
            Suffix::Function(params, variadic) => Declarator::Function {
                inner: Box::new(decl),
                params,
                variadic,
            },
        };
    }
    for op in ptrs.into_iter().rev() {
        decl = match op {
            PtrOp::Pointer(quals) => Declarator::Pointer {
                quals,
                inner: Box::new(decl),
            },
            PtrOp::Reference => Declarator::Reference(Box::new(decl)),
        };
    }
    decl
}

/// Type specifiers and declarators, which are mutually recursive through
/// record bodies and parameter lists.
fn grammar<'a>() -> (Grammar<'a, TypeSpec>, Grammar<'a, Declarator>) {
    let mut spec: Recursive<Indirect<'a, 'a, &'a str, TypeSpec, Extra<'a>>> = Recursive::declare();
    let mut declarator: Recursive<Indirect<'a, 'a, &'a str, Declarator, Extra<'a>>> =
        Recursive::declare();

    let quals = choice((
        keyword("const").to(Qualifiers::CONST),
        keyword("volatile").to(Qualifiers::VOLATILE),
    ))
    .repeated()
    .collect::<Vec<_>>()
    .map(|qs| qs.into_iter().fold(Qualifiers::empty(), |acc, q| acc | q));

    let builtin = text::ident()
        .try_map(|s: &str, span| {
            if BUILTIN_WORDS.contains(&s) {
                Ok(s.to_string())
            } else {
                Err(Rich::custom(span, "expected a type name"))
            }
        })
        .padded_by(ws())
        .repeated()
        .at_least(1)
        .collect::<Vec<String>>()
        .map(BaseSpec::Builtin);

    // Record bodies: `struct tag { T a, *b; U c[4]; }`
    let field = spec
        .clone()
        .then(
            declarator
                .clone()
                .separated_by(punct(','))
                .collect::<Vec<_>>(),
        )
        .then_ignore(punct(';'))
        .map(|(spec, declarators)| FieldDecl { spec, declarators });

    let record = choice((keyword("struct").to(false), keyword("union").to(true)))
        .then(ident().or_not())
        .then(
            field
                .repeated()
                .collect::<Vec<_>>()
                .delimited_by(punct('{'), punct('}'))
                .or_not(),
        )
        .map(|((is_union, tag), fields)| BaseSpec::Record {
            is_union,
            tag: tag.map(str::to_string),
            fields,
        });

    let enum_value = punct('-')
        .or_not()
        .then(literals::integer().padded_by(ws()))
        .map(|(neg, (value, _))| {
            let value = value as i64;
            if neg.is_some() { value.wrapping_neg() } else { value }
        });

    let enum_item = ident()
        .then(punct('=').ignore_then(enum_value).or_not())
        .map(|(name, value)| (name.to_string(), value));

    let enumeration = keyword("enum")
        .ignore_then(ident().or_not())
        .then(
            enum_item
                .separated_by(punct(','))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(punct('{'), punct('}'))
                .or_not(),
        )
        .map(|(tag, items)| BaseSpec::Enum {
            tag: tag.map(str::to_string),
            items,
        });

    let base = choice((
        record,
        enumeration,
        builtin,
        punct('$').to(BaseSpec::Param),
        ident().map(|name: &str| BaseSpec::Named(name.to_string())),
    ));

    spec.define(
        quals
            .clone()
            .then(base)
            .then(quals.clone())
            .map(|((before, base), after)| TypeSpec {
                quals: before | after,
                base,
            }),
    );

    let ptr_op = choice((
        punct('*').ignore_then(quals).map(PtrOp::Pointer),
        punct('&').to(PtrOp::Reference),
    ));

    let array_suffix = choice((
        punct('?').to(ArrayLen::Vla),
        literals::integer()
            .padded_by(ws())
            .map(|(n, _)| ArrayLen::Fixed(n as usize)),
    ))
    .or_not()
    .map(|len| len.unwrap_or(ArrayLen::Unbounded))
    .delimited_by(punct('['), punct(']'))
    .map(Suffix::Array);

    let ellipsis = just("...").padded_by(ws());
    let param = spec
        .clone()
        .then(declarator.clone())
        .map(|(spec, decl)| ParamDecl { spec, decl });

    let function_suffix = choice((
        ellipsis.clone().to((Vec::new(), true)),
        param
            .separated_by(punct(','))
            .at_least(1)
            .collect::<Vec<_>>()
            .then(
                punct(',')
                    .ignore_then(ellipsis)
                    .or_not()
                    .map(|e| e.is_some()),
            ),
    ))
    .or_not()
    .map(|list| list.unwrap_or_default())
    .delimited_by(punct('('), punct(')'))
    .map(|(params, variadic)| Suffix::Function(params, variadic));

    // A parenthesized declarator is tried first so `(*fp)` groups; when it
    // fails the parenthesis is re-read as a parameter list.
    let direct = choice((
        declarator.clone().delimited_by(punct('('), punct(')')),
        ident().map(|name: &str| Declarator::Name(Some(name.to_string()))),
        empty().to(Declarator::Name(None)),
    ));

    declarator.define(
        ptr_op
            .repeated()
            .collect::<Vec<_>>()
            .then(direct)
            .then(
                choice((array_suffix, function_suffix))
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|((ptrs, direct), suffixes)| build_declarator(ptrs, direct, suffixes)),
    );

    (spec.boxed(), declarator.boxed())
}

/// A sequence of top-level declarations, each terminated by `;`
pub fn declarations<'a>() -> impl Parser<'a, &'a str, Vec<Decl>, Extra<'a>> {
    let (spec, declarator) = grammar();
    let declarators = declarator
        .separated_by(punct(','))
        .collect::<Vec<_>>();

    let typedef = keyword("typedef")
        .ignore_then(spec.clone())
        .then(declarators.clone())
        .map(|(spec, decls)| Decl::Typedef(spec, decls));

    let object = choice((keyword("extern"), keyword("static")))
        .or_not()
        .ignore_then(spec)
        .then(declarators)
        .map(|(spec, decls)| Decl::Object(spec, decls));

    ws().ignore_then(
        choice((typedef, object))
            .then_ignore(punct(';'))
            .repeated()
            .collect::<Vec<_>>(),
    )
    .then_ignore(end())
}

/// A single abstract type such as `int (*)(void *)` or `struct point[?]`
pub fn type_name<'a>() -> impl Parser<'a, &'a str, (TypeSpec, Declarator), Extra<'a>> {
    let (spec, declarator) = grammar();
    ws().ignore_then(spec).then(declarator).then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_decls(src: &str) -> Vec<Decl> {
        declarations().parse(src).into_result().unwrap()
    }

    #[test]
    fn test_function_pointer_declarator() {
        let decls = parse_decls("int (*cmp)(const void *, const void *);");
        let Decl::Object(_, decls) = &decls[0] else {
            panic!("expected object declaration");
        };
        match &decls[0] {
            Declarator::Function {
                inner,
                params,
                variadic,
            } => {
                assert!(!variadic);
                assert_eq!(params.len(), 2);
                assert!(matches!(**inner, Declarator::Pointer { .. }));
            }
            other => panic!("unexpected declarator {other:?}"),
        }
    }

    #[test]
    fn test_variadic_prototype() {
        let decls = parse_decls("int printf(const char *fmt, ...);");
        let Decl::Object(_, decls) = &decls[0] else {
            panic!("expected object declaration");
        };
        assert!(matches!(
            &decls[0],
            Declarator::Function { variadic: true, .. }
        ));
    }

    #[test]
    fn test_record_with_comments() {
        let decls = parse_decls(
            "/* a point */ struct point { int x; // first\n int y; };\ntypedef struct point point_t;",
        );
        assert_eq!(decls.len(), 2);
        match &decls[0] {
            Decl::Object(spec, _) => match &spec.base {
                BaseSpec::Record { tag, fields, .. } => {
                    assert_eq!(tag.as_deref(), Some("point"));
                    assert_eq!(fields.as_ref().map(Vec::len), Some(2));
                }
                other => panic!("unexpected base {other:?}"),
            },
            other => panic!("unexpected decl {other:?}"),
        }
    }

    #[test]
    fn test_arrays_and_qualifiers() {
        let (spec, decl) = type_name().parse("const char *[?]").into_result().unwrap();
        assert!(spec.quals.contains(Qualifiers::CONST));
        // the pointer applies to the element type, the array is innermost
        let Declarator::Pointer { inner, .. } = decl else {
            panic!("expected pointer declarator");
        };
        assert!(matches!(
            *inner,
            Declarator::Array {
                len: ArrayLen::Vla,
                ..
            }
        ));
    }

    #[test]
    fn test_enum_values() {
        let decls = parse_decls("enum color { RED, GREEN = 5, BLUE, };");
        match &decls[0] {
            Decl::Object(spec, _) => match &spec.base {
                BaseSpec::Enum { items: Some(items), .. } => {
                    assert_eq!(items[1], ("GREEN".to_string(), Some(5)));
                    assert_eq!(items[2], ("BLUE".to_string(), None));
                }
                other => panic!("unexpected base {other:?}"),
            },
            other => panic!("unexpected decl {other:?}"),
        }
    }

    #[test]
    fn test_missing_semicolon_is_an_error() {
        assert!(declarations().parse("int x").into_result().is_err());
    }
}
