//! Types for HTTP headers

use std::fmt;

use bytes::Bytes;
use smallvec::SmallVec;

use crate::util::parse_decimal;

/// Maximum number of header records per message, not counting the
/// pseudo-header slots.
pub const MAX_HEADERS: usize = 128;

/// An ordered list of header records. Lookups are linear; messages are
/// small and order must be preserved for proxying.
#[derive(Clone, Default)]
pub struct Headers {
    headers: SmallVec<[Header; 16]>,
}

impl Headers {
    /// Append a new header. Does not replace anything.
    pub fn push(&mut self, header: Header) {
        self.headers.push(header);
    }

    /// Convenience form of [`Headers::push`].
    pub fn append(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.push(Header::new(name, value));
    }

    /// The first value stored under `name` (ASCII case-insensitive).
    pub fn get(&self, name: impl AsRef<[u8]>) -> Option<&[u8]> {
        let name = name.as_ref();
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| &h.value[..])
    }

    /// Returns true if we have this key/value combination.
    pub fn has_kv(&self, k: impl AsRef<[u8]>, v: impl AsRef<[u8]>) -> bool {
        let (k, v) = (k.as_ref(), v.as_ref());
        self.headers
            .iter()
            .any(|h| h.name.eq_ignore_ascii_case(k) && h.value.eq_ignore_ascii_case(v))
    }

    /// The declared content-length, if present and parseable.
    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length").and_then(parse_decimal)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.headers.iter()
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.headers.iter()
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<T: IntoIterator<Item = Header>>(iter: T) -> Self {
        Self {
            headers: iter.into_iter().collect(),
        }
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.headers.iter()).finish()
    }
}

#[derive(Clone)]
pub struct Header {
    pub name: Bytes,
    pub value: Bytes,
}

impl Header {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            String::from_utf8_lossy(&self.name),
            String::from_utf8_lossy(&self.value)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut headers = Headers::default();
        headers.append("Content-Length", "42");
        assert_eq!(headers.get("content-length"), Some(&b"42"[..]));
        assert_eq!(headers.content_length(), Some(42));
        assert!(headers.has_kv("CONTENT-LENGTH", "42"));
        assert!(!headers.has_kv("content-length", "43"));
    }

    #[test]
    fn unparseable_content_length_is_none() {
        let mut headers = Headers::default();
        headers.append("content-length", "4x2");
        assert_eq!(headers.content_length(), None);
    }
}
