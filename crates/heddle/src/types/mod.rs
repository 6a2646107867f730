use bytes::Bytes;

mod headers;
pub use headers::*;

mod method;
pub use method::*;

/// A normalized HTTP message head: a request when `code == 0`, a
/// response otherwise. Push promises reuse the request shape.
///
/// `:method`, `:path` and `:status` are projected onto the fields;
/// `:scheme` and `:authority` stay in `headers` (the h1 parser
/// synthesizes them server-side so hosts see the same shape on both
/// protocol versions).
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Status code for responses, 0 for requests.
    pub code: u16,

    /// Request method. Meaningless for responses.
    pub method: Method,

    /// Request target. Empty for responses.
    pub path: Bytes,

    pub headers: Headers,
}

impl Message {
    pub fn request(method: Method, path: impl Into<Bytes>, headers: Headers) -> Self {
        Self {
            code: 0,
            method,
            path: path.into(),
            headers,
        }
    }

    pub fn response(code: u16, headers: Headers) -> Self {
        Self {
            code,
            method: Method::Get,
            path: Bytes::new(),
            headers,
        }
    }

    /// 1xx responses carry no payload and do not consume the stream.
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }
}
