use chumsky::prelude::*;

pub type Extra<'a> = extra::Err<Rich<'a, char>>;

/// Parser for line comments (// to end of line)
pub fn line_comment<'a>() -> impl Parser<'a, &'a str, (), Extra<'a>> + Clone {
    just("//").then(none_of("\n").repeated()).ignored()
}

/// Parser for block comments (/* ... */)
pub fn block_comment<'a>() -> impl Parser<'a, &'a str, (), Extra<'a>> + Clone {
    just("/*")
        .then(any().and_is(just("*/").not()).repeated())
        .then(just("*/"))
        .ignored()
}

/// Preprocessor lines are skipped like comments
pub fn directive<'a>() -> impl Parser<'a, &'a str, (), Extra<'a>> + Clone {
    just('#').then(none_of("\n").repeated()).ignored()
}

/// Parser for all whitespace and comments
pub fn ws<'a>() -> impl Parser<'a, &'a str, (), Extra<'a>> + Clone {
    let comment = choice((block_comment(), line_comment(), directive()));
    let ws_item = comment.or(one_of(" \t\r\n").ignored());
    ws_item.repeated()
}

/// Words that can never be identifiers
pub const KEYWORDS: &[&str] = &[
    "const", "volatile", "struct", "union", "enum", "typedef", "extern", "static", "signed",
    "unsigned", "char", "short", "int", "long", "float", "double", "void", "bool", "_Bool",
];

/// Keywords that make up builtin arithmetic type names
pub const BUILTIN_WORDS: &[&str] = &[
    "signed", "unsigned", "char", "short", "int", "long", "float", "double", "void", "bool",
    "_Bool",
];

/// A non-keyword identifier
pub fn ident<'a>() -> impl Parser<'a, &'a str, &'a str, Extra<'a>> + Clone {
    text::ident()
        .try_map(|s: &str, span| {
            if KEYWORDS.contains(&s) {
                Err(Rich::custom(
                    span,
                    format!("'{s}' is a keyword and cannot be used as an identifier"),
                ))
            } else {
                Ok(s)
            }
        })
        .padded_by(ws())
}

/// Exactly the keyword `kw`, not a prefix of a longer identifier
pub fn keyword<'a>(kw: &'static str) -> impl Parser<'a, &'a str, &'a str, Extra<'a>> + Clone {
    text::ident()
        .try_map(move |s: &str, span| {
            if s == kw {
                Ok(s)
            } else {
                Err(Rich::custom(span, format!("expected '{kw}'")))
            }
        })
        .padded_by(ws())
}

pub fn punct<'a>(c: char) -> impl Parser<'a, &'a str, char, Extra<'a>> + Clone {
    just(c).padded_by(ws())
}
