//! HTTP/1.1 head parser
//!
//! Streaming nom parsers over raw bytes: `Incomplete` means "feed me
//! more", an error means the head is malformed. Both request and
//! response heads produce borrowed slices; the connection copies what
//! it keeps before shifting its buffer.
//!
//! As of writing, the authoritative document for HTTP/1.1 is
//! <https://www.rfc-editor.org/rfc/rfc9112>

use nom::{
    bytes::streaming::{tag, take, take_until, take_while, take_while1},
    combinator::opt,
    sequence::terminated,
    IResult,
};
use smallvec::SmallVec;

use crate::types::MAX_HEADERS;

const CRLF: &[u8] = b"\r\n";

pub(crate) struct RawHeader<'a> {
    pub(crate) name: &'a [u8],
    pub(crate) value: &'a [u8],
}

pub(crate) type RawHeaders<'a> = SmallVec<[RawHeader<'a>; 32]>;

pub(crate) struct RawRequest<'a> {
    pub(crate) method: &'a [u8],
    pub(crate) path: &'a [u8],
    /// The 'b' in 'HTTP/1.b'
    pub(crate) minor: u8,
    pub(crate) headers: RawHeaders<'a>,
}

pub(crate) struct RawResponse<'a> {
    pub(crate) code: u16,
    pub(crate) minor: u8,
    pub(crate) headers: RawHeaders<'a>,
}

// Looks like `GET /path HTTP/1.1\r\n`, then headers
pub(crate) fn request(i: &[u8]) -> IResult<&[u8], RawRequest<'_>> {
    let (i, method) = terminated(token, space1)(i)?;
    let (i, path) = terminated(take_while1(|c| c != b' '), space1)(i)?;
    let (i, minor) = terminated(http_version, tag(CRLF))(i)?;
    let (i, headers) = headers_and_crlf(i)?;

    let request = RawRequest {
        method,
        path,
        minor,
        headers,
    };
    Ok((i, request))
}

// Looks like `HTTP/1.1 200 OK\r\n` or `HTTP/1.1 404 Not Found\r\n`,
// then headers. The reason phrase is decorative and discarded.
pub(crate) fn response(i: &[u8]) -> IResult<&[u8], RawResponse<'_>> {
    let (i, minor) = terminated(http_version, space1)(i)?;
    let (i, code) = u16_text(i)?;
    let (i, _reason) = terminated(take_until(CRLF), tag(CRLF))(i)?;
    let (i, headers) = headers_and_crlf(i)?;

    let response = RawResponse {
        code,
        minor,
        headers,
    };
    Ok((i, response))
}

/// A short textual identifier that does not include whitespace or
/// delimiters, cf. <https://httpwg.org/specs/rfc9110.html#rule.token.separators>
fn token(i: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(is_tchar)(i)
}

/// cf. <https://httpwg.org/specs/rfc9110.html#rule.token.separators>
fn is_tchar(c: u8) -> bool {
    c.is_ascii_graphic() && !is_delimiter(c)
}

/// cf. <https://httpwg.org/specs/rfc9110.html#rule.token.separators>
fn is_delimiter(c: u8) -> bool {
    memchr::memchr(c, br#"(),/:;<=>?@[\]{}""#).is_some()
}

fn http_version(i: &[u8]) -> IResult<&[u8], u8> {
    let (i, _) = tag(&b"HTTP/1."[..])(i)?;
    let (i, version) = take(1usize)(i)?;
    let version = match version[0] {
        b'0' => 0,
        b'1' => 1,
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Digit,
            )));
        }
    };
    Ok((i, version))
}

/// Parses the status code: exactly three digits, per RFC 9112.
fn u16_text(i: &[u8]) -> IResult<&[u8], u16> {
    let (i, digits) = take_while1(|c: u8| c.is_ascii_digit())(i)?;
    if digits.len() != 3 {
        return Err(nom::Err::Error(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Digit,
        )));
    }
    let code = digits.iter().fold(0u16, |n, d| n * 10 + u16::from(d - b'0'));
    Ok((i, code))
}

fn headers_and_crlf(mut i: &[u8]) -> IResult<&[u8], RawHeaders<'_>> {
    let mut headers = RawHeaders::new();
    loop {
        if let (i, Some(_)) = opt(tag(CRLF))(i)? {
            // end of headers
            return Ok((i, headers));
        }
        if headers.len() >= MAX_HEADERS {
            return Err(nom::Err::Error(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Count,
            )));
        }

        let (i2, header) = header(i)?;
        headers.push(header);
        i = i2;
    }
}

/// Parse a single `name: value\r\n` record. Leading and trailing
/// whitespace around the value is not part of it.
fn header(i: &[u8]) -> IResult<&[u8], RawHeader<'_>> {
    let (i, name) = terminated(
        take_while1(|c| c != b':' && c != b'\r' && c != b'\n'),
        tag(&b":"[..]),
    )(i)?;
    let (i, _) = take_while(|c| c == b' ' || c == b'\t')(i)?;
    let (i, value) = terminated(take_until(CRLF), tag(CRLF))(i)?;

    let value = trim_trailing_ws(value);
    Ok((i, RawHeader { name, value }))
}

fn trim_trailing_ws(mut v: &[u8]) -> &[u8] {
    while let [rest @ .., b' ' | b'\t'] = v {
        v = rest;
    }
    v
}

fn space1(i: &[u8]) -> IResult<&[u8], ()> {
    let (i, _) = take_while1(|c| c == b' ')(i)?;
    Ok((i, ()))
}
