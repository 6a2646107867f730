use loona_hpack::decoder::DecoderError;

/// Any error the engine can surface to the host.
///
/// Stream-scoped protocol violations never show up here: they are
/// answered with RST_STREAM and recorded in the reset history instead.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Caller misuse: the call can never be valid, regardless of peer
    /// behavior (a ping over h1, a response with a path, ...).
    #[error("assertion failed: {0}")]
    Assertion(&'static str),

    /// The stream named in a local call is unknown or on the wrong side.
    #[error("invalid stream: {0}")]
    InvalidStream(&'static str),

    /// Our own stream limit is reached; retry after a stream ends.
    #[error("would block: {0}")]
    WouldBlock(&'static str),

    /// The peer broke the protocol. In h2 mode a GOAWAY has already
    /// been written by the time this surfaces.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Header block decoding failed. Fatal: the dynamic table state is
    /// desynchronized. A GOAWAY(COMPRESSION_ERROR) precedes this.
    #[error("compression error: {0:?}")]
    Compression(#[from] DecoderError),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Terminal; the host must stop feeding and writing.
    #[error("disconnected: {0}")]
    Disconnect(&'static str),
}
