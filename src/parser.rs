//! PDF object parser.
//!
//! A nom-based tokenizer and recursive-descent object parser, sufficient to
//! read the indirect objects that signature handling touches: dictionaries,
//! arrays, strings, references and streams.

use std::collections::HashMap;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit1, one_of},
    combinator::{opt, value},
    sequence::preceded,
    IResult,
};

use crate::error::{Error, Result};
use crate::object::{Object, ObjectRef};

/// Lexical tokens of PDF syntax.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number
    Integer(i64),
    /// Real number
    Real(f64),
    /// Raw literal string content, escapes not yet decoded
    LiteralString(&'a [u8]),
    /// Raw hexadecimal string content
    HexString(&'a [u8]),
    /// Name with `#XX` escapes decoded
    Name(String),
    True,
    False,
    Null,
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
    ObjStart,
    ObjEnd,
    StreamStart,
    StreamEnd,
    R,
}

fn is_pdf_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

fn is_delimiter(c: u8) -> bool {
    matches!(c, b'/' | b'%' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}')
}

/// Skip whitespace and `%` comments.
fn skip_ws(mut input: &[u8]) -> &[u8] {
    loop {
        let before = input.len();
        let whitespace = take_while1::<_, _, nom::error::Error<&[u8]>>(is_pdf_whitespace)(input);
        if let Ok((rest, _)) = whitespace {
            input = rest;
        }
        if let Ok((rest, _)) = preceded(
            char::<_, nom::error::Error<&[u8]>>('%'),
            take_till(|c| c == b'\r' || c == b'\n'),
        )(input)
        {
            input = rest;
        }
        if input.len() == before {
            return input;
        }
    }
}

fn digit_error(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
}

fn parse_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, sign) = opt(one_of("+-"))(input)?;
    let (rest, int_part) = opt(digit1)(rest)?;
    let (rest, frac_part) = opt(preceded(char('.'), opt(digit1)))(rest)?;

    if int_part.is_none() && frac_part.is_none() {
        return Err(digit_error(input));
    }

    let negative = sign == Some('-');
    match frac_part {
        Some(frac) => {
            let int_str = int_part
                .map(std::str::from_utf8)
                .transpose()
                .map_err(|_| digit_error(input))?
                .unwrap_or("0");
            let frac_str = frac
                .map(std::str::from_utf8)
                .transpose()
                .map_err(|_| digit_error(input))?
                .unwrap_or("0");
            let num: f64 = format!("{}.{}", int_str, frac_str)
                .parse()
                .map_err(|_| digit_error(input))?;
            Ok((rest, Token::Real(if negative { -num } else { num })))
        },
        None => {
            let digits = int_part.ok_or_else(|| digit_error(input))?;
            let num: i64 = std::str::from_utf8(digits)
                .map_err(|_| digit_error(input))?
                .parse()
                .map_err(|_| digit_error(input))?;
            Ok((rest, Token::Integer(if negative { -num } else { num })))
        },
    }
}

/// Literal strings may nest balanced parentheses; escapes are skipped, not decoded.
fn parse_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (body, _) = char('(')(input)?;
    let mut depth = 1usize;
    let mut pos = 0usize;
    while pos < body.len() {
        match body[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&body[pos + 1..], Token::LiteralString(&body[..pos])));
                }
                pos += 1;
            },
            _ => pos += 1,
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Char)))
}

fn parse_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }
    let (rest, _) = char('<')(input)?;
    let (rest, body) = take_while(|c: u8| c.is_ascii_hexdigit() || is_pdf_whitespace(c))(rest)?;
    let (rest, _) = char('>')(rest)?;
    Ok((rest, Token::HexString(body)))
}

/// Decode `#XX` escape sequences in a name.
pub fn decode_name_escapes(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            let pair = std::str::from_utf8(&raw[i + 1..i + 3]).ok();
            if let Some(byte) = pair.and_then(|p| u8::from_str_radix(p, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, _) = char('/')(input)?;
    let (rest, raw) = take_while(|c| !is_pdf_whitespace(c) && !is_delimiter(c))(rest)?;
    Ok((rest, Token::Name(decode_name_escapes(raw))))
}

fn parse_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    alt((
        value(Token::False, tag(b"false")),
        value(Token::True, tag(b"true")),
        value(Token::Null, tag(b"null")),
        value(Token::ObjStart, tag(b"obj")),
        value(Token::ObjEnd, tag(b"endobj")),
        value(Token::StreamEnd, tag(b"endstream")),
        value(Token::StreamStart, tag(b"stream")),
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
        value(Token::R, tag(b"R")),
    ))(input)
}

/// Read one token after skipping whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let input = skip_ws(input);
    alt((parse_keyword, parse_name, parse_number, parse_literal_string, parse_hex_string))(input)
}

/// Decode escape sequences of a literal string.
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        let next = raw[i + 1];
        i += 2;
        match next {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'\n' => {},
            b'0'..=b'7' => {
                let mut code = u32::from(next - b'0');
                let mut digits = 1;
                while digits < 3 && i < raw.len() && (b'0'..=b'7').contains(&raw[i]) {
                    code = code * 8 + u32::from(raw[i] - b'0');
                    i += 1;
                    digits += 1;
                }
                out.push((code & 0xFF) as u8);
            },
            other => out.push(other),
        }
    }
    out
}

/// Decode a hex string body; whitespace is ignored and an odd digit is padded with 0.
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut digits: Vec<u8> = hex_bytes
        .iter()
        .copied()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 == 1 {
        digits.push(b'0');
    }
    hex::decode(&digits).map_err(|e| Error::ParseError {
        offset: 0,
        reason: format!("Invalid hex string: {}", e),
    })
}

fn failure(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
}

/// Parse one direct object (which may be a stream when followed by `stream`).
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let (rest, tok) = token(input)?;
    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Boolean(true))),
        Token::False => Ok((rest, Object::Boolean(false))),
        Token::Integer(i) => {
            if let Ok((after_gen, Token::Integer(gen))) = token(rest) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    return Ok((after_r, Object::Reference(ObjectRef::new(i as u32, gen as u16))));
                }
            }
            Ok((rest, Object::Integer(i)))
        },
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::LiteralString(raw) => Ok((rest, Object::String(decode_literal_string_escapes(raw)))),
        Token::HexString(raw) => {
            let bytes = decode_hex(raw).map_err(|_| failure(input))?;
            Ok((rest, Object::String(bytes)))
        },
        Token::Name(name) => Ok((rest, Object::Name(name))),
        Token::ArrayStart => parse_array(rest),
        Token::DictStart => {
            let (rest, dict) = parse_dictionary(rest)?;
            match token(rest) {
                Ok((after, Token::StreamStart)) => {
                    let (after, data) = parse_stream_data(after, &dict)?;
                    Ok((
                        after,
                        Object::Stream {
                            dict,
                            data: bytes::Bytes::from(data),
                        },
                    ))
                },
                _ => Ok((rest, Object::Dictionary(dict))),
            }
        },
        _ => Err(failure(input)),
    }
}

fn parse_array(mut input: &[u8]) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    loop {
        if let Ok((rest, Token::ArrayEnd)) = token(input) {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, item) = parse_object(input)?;
        items.push(item);
        input = rest;
    }
}

fn parse_dictionary(mut input: &[u8]) -> IResult<&[u8], HashMap<String, Object>> {
    let mut dict = HashMap::new();
    loop {
        match token(input)? {
            (rest, Token::DictEnd) => return Ok((rest, dict)),
            (rest, Token::Name(key)) => {
                let (rest, value) = parse_object(rest)?;
                dict.insert(key, value);
                input = rest;
            },
            _ => return Err(failure(input)),
        }
    }
}

/// Stream data follows `stream` plus CRLF or LF and spans `/Length` bytes.
fn parse_stream_data<'a>(
    input: &'a [u8],
    dict: &HashMap<String, Object>,
) -> IResult<&'a [u8], Vec<u8>> {
    let body = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        input
    };

    if let Some(length) = dict.get("Length").and_then(Object::as_integer) {
        let length = length as usize;
        if body.len() >= length {
            if let Ok((rest, Token::StreamEnd)) = token(&body[length..]) {
                return Ok((rest, body[..length].to_vec()));
            }
        }
    }

    // /Length missing, indirect or wrong: fall back to the endstream keyword
    let keyword = b"endstream";
    let pos = body
        .windows(keyword.len())
        .position(|w| w == keyword)
        .ok_or_else(|| nom::Err::Error(nom::error::Error::new(body, nom::error::ErrorKind::Eof)))?;
    let mut data = &body[..pos];
    if data.ends_with(b"\r\n") {
        data = &data[..data.len() - 2];
    } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
        data = &data[..data.len() - 1];
    }
    Ok((&body[pos + keyword.len()..], data.to_vec()))
}

/// Parse `N G obj <object> endobj` at the start of `input`.
pub fn parse_indirect_object(input: &[u8]) -> Result<(ObjectRef, Object)> {
    let err = |reason: &str| Error::ParseError {
        offset: 0,
        reason: reason.to_string(),
    };
    let (rest, id) = match token(input) {
        Ok((rest, Token::Integer(id))) => (rest, id),
        _ => return Err(err("expected object number")),
    };
    let (rest, gen) = match token(rest) {
        Ok((rest, Token::Integer(gen))) => (rest, gen),
        _ => return Err(err("expected generation number")),
    };
    let rest = match token(rest) {
        Ok((rest, Token::ObjStart)) => rest,
        _ => return Err(err("expected 'obj' keyword")),
    };
    let (_, object) = parse_object(rest).map_err(|e| err(&format!("malformed object: {:?}", e)))?;
    Ok((ObjectRef::new(id as u32, gen as u16), object))
}
