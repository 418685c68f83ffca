/* Tokenizer for method source text */

use crate::synth::SynthError;
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_until, take_while, take_while1, take_while_m_n};
use nom::character::complete::{char, digit1, hex_digit1, multispace1, none_of, not_line_ending, one_of, satisfy};
use nom::combinator::{map, map_opt, opt, recognize, value};
use nom::multi::{many0, many1};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Keyword(&'static str),
    /// An integer literal; it may still need a leading minus to fit in an `int`.
    Int(i64),
    Long(i64),
    Char(u16),
    Str(String),
    /// Floating point literals are recognised only so they can be reported as unsupported.
    Float(String),
    Symbol(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

const KEYWORDS: &[&str] = &[
    "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class", "const", "continue",
    "default", "do", "double", "else", "enum", "extends", "false", "final", "finally", "float", "for", "goto", "if",
    "implements", "import", "instanceof", "int", "interface", "long", "native", "new", "null", "package",
    "private", "protected", "public", "return", "short", "static", "strictfp", "super", "switch", "synchronized",
    "this", "throw", "throws", "transient", "true", "try", "void", "volatile", "while",
];

// longest first so that "&&" wins over "&"
const SYMBOLS: &[&str] = &[
    ">>>=", "<<=", ">>=", ">>>", "...", "->", "::", "++", "--", "&&", "||", "==", "!=", "<=", ">=", "+=", "-=", "*=",
    "/=", "%=", "&=", "|=", "^=", "<<", ">>", "(", ")", "{", "}", "[", "]", ";", ",", ".", "@", "=", ">", "<", "!",
    "~", "?", ":", "+", "-", "*", "/", "&", "|", "^", "%",
];

fn skip(input: &str) -> IResult<&str, Vec<&str>> {
    many0(alt((
        multispace1,
        recognize(pair(tag("//"), not_line_ending)),
        recognize(tuple((tag("/*"), take_until("*/"), tag("*/")))),
    )))(input)
}

fn identifier(input: &str) -> IResult<&str, Token> {
    map(
        recognize(pair(
            satisfy(|c| c.is_alphabetic() || c == '_' || c == '$'),
            take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '$'),
        )),
        |word: &str| match KEYWORDS.iter().find(|k| **k == word) {
            Some(k) => Token::Keyword(*k),
            None => Token::Ident(word.to_string()),
        },
    )(input)
}

fn symbol(input: &str) -> IResult<&str, Token> {
    for s in SYMBOLS {
        if let Some(rest) = input.strip_prefix(s) {
            return Ok((rest, Token::Symbol(*s)));
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)))
}

fn digits(input: &str) -> IResult<&str, &str> {
    recognize(pair(digit1, take_while(|c: char| c.is_ascii_digit() || c == '_')))(input)
}

/// Hex and octal literals give the bit pattern, so `0xFFFFFFFF` is `-1`.
fn from_bits(bits: u64, suffix: Option<char>) -> Option<Token> {
    match suffix {
        Some(_) => Some(Token::Long(bits as i64)),
        None => u32::try_from(bits).ok().map(|v| Token::Int(v as i32 as i64)),
    }
}

fn number(input: &str) -> IResult<&str, Token> {
    let float = map(
        recognize(tuple((
            digits,
            alt((
                recognize(tuple((char('.'), opt(digits), opt(pair(one_of("eE"), digits)), opt(one_of("fFdD"))))),
                recognize(pair(pair(one_of("eE"), digits), opt(one_of("fFdD")))),
                recognize(one_of("fFdD")),
            )),
        ))),
        |text: &str| Token::Float(text.to_string()),
    );
    let hex = map_opt(
        pair(preceded(alt((tag("0x"), tag("0X"))), hex_digit1), opt(one_of("lL"))),
        |(text, suffix): (&str, Option<char>)| from_bits(u64::from_str_radix(text, 16).ok()?, suffix),
    );
    // a leading zero makes the literal octal; 8 and 9 are not octal digits
    let octal = map_opt(
        pair(
            recognize(pair(char('0'), take_while1(|c: char| c.is_ascii_digit() || c == '_'))),
            opt(one_of("lL")),
        ),
        |(text, suffix): (&str, Option<char>)| from_bits(u64::from_str_radix(&text.replace('_', ""), 8).ok()?, suffix),
    );
    let decimal = map_opt(pair(digits, opt(one_of("lL"))), |(text, suffix): (&str, Option<char>)| {
        if text.len() > 1 && text.starts_with('0') {
            return None;
        }
        let cleaned = text.replace('_', "");
        match suffix {
            // 9223372036854775808L is only valid negated; it parses as i64::MIN either way
            Some(_) => cleaned.parse::<u64>().ok().filter(|v| *v <= 1 << 63).map(|v| Token::Long(v as i64)),
            None => cleaned.parse::<i64>().ok().filter(|v| *v <= 1 << 31).map(Token::Int),
        }
    });
    alt((float, hex, octal, decimal))(input)
}

fn escape(input: &str) -> IResult<&str, char> {
    preceded(
        char('\\'),
        alt((
            value('\n', char('n')),
            value('\t', char('t')),
            value('\r', char('r')),
            value('\u{8}', char('b')),
            value('\u{c}', char('f')),
            value('\\', char('\\')),
            value('\'', char('\'')),
            value('"', char('"')),
            map_opt(preceded(many1(char('u')), take_while_m_n(4, 4, |c: char| c.is_ascii_hexdigit())), |hex: &str| {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            }),
            // three digits only when the first is 0-3, so \477 is \47 then a literal 7
            map_opt(
                alt((
                    recognize(tuple((one_of("0123"), one_of("01234567"), one_of("01234567")))),
                    take_while_m_n(1, 2, |c: char| ('0'..='7').contains(&c)),
                )),
                |oct: &str| u32::from_str_radix(oct, 8).ok().and_then(char::from_u32),
            ),
        )),
    )(input)
}

fn string_literal(input: &str) -> IResult<&str, Token> {
    let part = alt((map(is_not("\\\"\n"), str::to_string), map(escape, String::from)));
    map(delimited(char('"'), many0(part), char('"')), |parts: Vec<String>| Token::Str(parts.concat()))(input)
}

fn char_literal(input: &str) -> IResult<&str, Token> {
    map_opt(delimited(char('\''), alt((escape, none_of("\\'\n"))), char('\'')), |c: char| {
        let mut units = [0u16; 2];
        match c.encode_utf16(&mut units).len() {
            1 => Some(Token::Char(units[0])),
            _ => None,
        }
    })(input)
}

fn token(input: &str) -> IResult<&str, Token> {
    alt((number, string_literal, char_literal, identifier, symbol))(input)
}

/// Splits source text into tokens, each tagged with its 1-based line.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, SynthError> {
    let mut tokens = vec![];
    let mut rest = source;
    let mut line = 1;
    loop {
        let (after_skip, _) = skip(rest).map_err(|_| SynthError::syntax(line, "malformed comment"))?;
        line += rest[..rest.len() - after_skip.len()].matches('\n').count();
        rest = after_skip;
        if rest.is_empty() {
            break;
        }
        if rest.starts_with("/*") {
            return Err(SynthError::syntax(line, "unclosed comment"));
        }
        match token(rest) {
            Ok((after, token)) => {
                tokens.push(Spanned { token, line });
                rest = after;
            }
            Err(_) => {
                let message = match rest.chars().next() {
                    Some('"') => "unclosed string literal".to_string(),
                    Some('\'') => "malformed character literal".to_string(),
                    Some(c) if c.is_ascii_digit() => "integer number too large".to_string(),
                    Some(c) => format!("illegal character '{}'", c),
                    None => "unexpected end of input".to_string(),
                };
                return Err(SynthError::syntax(line, &message));
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn words_and_symbols() {
        assert_eq!(
            kinds("if (a != null && b) return x.y();"),
            vec![
                Token::Keyword("if"),
                Token::Symbol("("),
                Token::Ident("a".into()),
                Token::Symbol("!="),
                Token::Keyword("null"),
                Token::Symbol("&&"),
                Token::Ident("b".into()),
                Token::Symbol(")"),
                Token::Keyword("return"),
                Token::Ident("x".into()),
                Token::Symbol("."),
                Token::Ident("y".into()),
                Token::Symbol("("),
                Token::Symbol(")"),
                Token::Symbol(";"),
            ]
        );
    }

    #[test]
    fn literals() {
        assert_eq!(
            kinds(r#"42 0x1F 7L 1.5f "a\"b\n" 'c' '\u0041'"#),
            vec![
                Token::Int(42),
                Token::Int(31),
                Token::Long(7),
                Token::Float("1.5f".into()),
                Token::Str("a\"b\n".into()),
                Token::Char('c' as u16),
                Token::Char('A' as u16),
            ]
        );
        assert_eq!(kinds("\"\""), vec![Token::Str(String::new())]);
        assert_eq!(kinds("0xFFFFFFFF"), vec![Token::Int(-1)]);
    }

    #[test]
    fn octal_literals_and_escapes() {
        assert_eq!(
            kinds("010 0_17 0777L 0 00 037777777777"),
            vec![Token::Int(8), Token::Int(15), Token::Long(511), Token::Int(0), Token::Int(0), Token::Int(-1)]
        );
        assert_eq!(
            kinds(r#""\101" "\477" "\400" "\0""#),
            vec![
                Token::Str("A".into()),
                Token::Str("'7".into()),
                Token::Str(" 0".into()),
                Token::Str("\u{0}".into()),
            ]
        );
        assert!(matches!(tokenize("09"), Err(SynthError::Syntax { .. })));
        assert!(matches!(tokenize("040000000000"), Err(SynthError::Syntax { .. })));
    }

    #[test]
    fn lines_and_comments() {
        let tokens = tokenize("a // one\n/* two\nthree */ b\n\nc").unwrap();
        let lines: Vec<usize> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 3, 5]);
    }

    #[test]
    fn errors() {
        assert!(matches!(tokenize("\"open"), Err(SynthError::Syntax { line: 1, .. })));
        assert!(matches!(tokenize("a\n#"), Err(SynthError::Syntax { line: 2, .. })));
        assert!(matches!(tokenize("/* never closed"), Err(SynthError::Syntax { .. })));
        assert!(matches!(tokenize("99999999999"), Err(SynthError::Syntax { .. })));
    }
}
