use super::lexer::Extra;
use crate::ctype::Primitive;
use chumsky::prelude::*;

/// A parsed numeric literal together with the C type it gets
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberLiteral {
    /// Raw two's-complement bits; the primitive says how to read them
    Integer(u64, Primitive),
    Float(f64, Primitive),
}

fn max_value(prim: Primitive) -> u64 {
    let bits = prim.size() * 8;
    match (prim.is_unsigned(), bits) {
        (true, 64) => u64::MAX,
        (true, _) => (1u64 << bits) - 1,
        (false, _) => (1u64 << (bits - 1)) - 1,
    }
}

/// Pick the type of an integer constant: the first candidate the value fits
/// in, in C order, falling back to `unsigned long long`.
fn type_integer(digits: &str, radix: u32, suffix: &str) -> Result<(u64, Primitive), String> {
    use Primitive::*;

    let value = u64::from_str_radix(digits, radix)
        .map_err(|_| "integer constant is too large".to_string())?;
    let (unsigned, longs) = match suffix.to_ascii_lowercase().as_str() {
        "" => (false, 0),
        "u" => (true, 0),
        "l" => (false, 1),
        "ul" | "lu" => (true, 1),
        "ll" => (false, 2),
        "ull" | "llu" => (true, 2),
        _ => return Err(format!("invalid suffix '{suffix}' on integer constant")),
    };
    let decimal = radix == 10;
    let candidates: &[Primitive] = match (unsigned, longs, decimal) {
        (false, 0, true) => &[Int, LLong],
        (false, 0, false) => &[Int, UInt, LLong, ULLong],
        (true, 0, _) => &[UInt, ULLong],
        (false, 1, true) => &[Long, LLong],
        (false, 1, false) => &[Long, ULong, LLong, ULLong],
        (true, 1, _) => &[ULong, ULLong],
        (false, _, true) => &[LLong],
        (false, _, false) => &[LLong, ULLong],
        (true, _, _) => &[ULLong],
    };
    let prim = candidates
        .iter()
        .copied()
        .find(|p| value <= max_value(*p))
        .unwrap_or(ULLong);
    Ok((value, prim))
}

/// Integer constants: decimal, hex, octal and binary with C suffixes
pub fn integer<'a>() -> impl Parser<'a, &'a str, (u64, Primitive), Extra<'a>> + Clone {
    let hex = just("0x")
        .or(just("0X"))
        .ignore_then(
            one_of("0123456789abcdefABCDEF")
                .repeated()
                .at_least(1)
                .to_slice(),
        )
        .map(|s: &str| (s, 16));

    let binary = just("0b")
        .or(just("0B"))
        .ignore_then(one_of("01").repeated().at_least(1).to_slice())
        .map(|s: &str| (s, 2));

    let octal = just('0')
        .ignore_then(one_of("01234567").repeated().at_least(1).to_slice())
        .map(|s: &str| (s, 8));

    let decimal = text::digits(10).to_slice().map(|s: &str| (s, 10));

    let suffix = one_of("uUlL").repeated().to_slice();

    choice((hex, binary, octal, decimal))
        .then(suffix)
        .try_map(|((digits, radix), suffix): ((&str, u32), &str), span| {
            type_integer(digits, radix, suffix).map_err(|msg| Rich::custom(span, msg))
        })
}

/// Floating constants; an `f` suffix makes them `float`
pub fn float<'a>() -> impl Parser<'a, &'a str, (f64, Primitive), Extra<'a>> + Clone {
    let exponent = one_of("eE")
        .then(one_of("+-").or_not())
        .then(text::digits(10));

    let body = choice((
        text::digits(10)
            .then(just('.'))
            .then(text::digits(10).or_not())
            .then(exponent.clone().or_not())
            .ignored(),
        just('.')
            .then(text::digits(10))
            .then(exponent.clone().or_not())
            .ignored(),
        text::digits(10).then(exponent).ignored(),
    ))
    .to_slice();

    body.then(one_of("fF").or_not())
        .try_map(|(s, single): (&str, Option<char>), span| {
            let value = s
                .parse::<f64>()
                .map_err(|e| Rich::custom(span, format!("malformed number: {e}")))?;
            Ok(match single {
                Some(_) => (value as f32 as f64, Primitive::Float),
                None => (value, Primitive::Double),
            })
        })
}

/// A complete literal, optionally negated, with nothing else around it
pub fn literal<'a>() -> impl Parser<'a, &'a str, NumberLiteral, Extra<'a>> {
    let number = choice((
        float().map(|(v, p)| NumberLiteral::Float(v, p)),
        integer().map(|(v, p)| NumberLiteral::Integer(v, p)),
    ));

    just('-')
        .or_not()
        .then(number)
        .map(|(neg, lit)| match (neg, lit) {
            (None, lit) => lit,
            (Some(_), NumberLiteral::Integer(v, p)) => NumberLiteral::Integer(v.wrapping_neg(), p),
            (Some(_), NumberLiteral::Float(v, p)) => NumberLiteral::Float(-v, p),
        })
        .padded()
        .then_ignore(end())
}
