//! HTTP/2 wire format: frame headers, typed flags, settings, error codes.
//!
//! This crate only knows about bytes. Frame *semantics* (stream states,
//! flow control, header validation) live in the `heddle` engine crate.
//!
//! HTTP/2 <https://httpwg.org/specs/rfc9113.html>

use std::{fmt, io, ops::RangeInclusive};

use enum_repr::EnumRepr;
pub use enumflags2::{bitflags, BitFlags};
pub use nom;

use byteorder::{BigEndian, WriteBytesExt};
use nom::{
    number::streaming::{be_u24, be_u32, be_u8},
    sequence::tuple,
    IResult,
};

/// Length of a frame header on the wire.
pub const FRAME_HEADER_LEN: usize = 9;

/// This is sent by h2 clients after negotiating over ALPN, or when doing h2c.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub fn preface(i: &[u8]) -> IResult<&[u8], ()> {
    let (i, _) = nom::bytes::streaming::tag(PREFACE)(i)?;
    Ok((i, ()))
}

/// See <https://httpwg.org/specs/rfc9113.html#FrameTypes>
#[EnumRepr(type = "u8")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFrameType {
    Data = 0x00,
    Headers = 0x01,
    Priority = 0x02,
    RstStream = 0x03,
    Settings = 0x04,
    PushPromise = 0x05,
    Ping = 0x06,
    GoAway = 0x07,
    WindowUpdate = 0x08,
    Continuation = 0x09,
}

/// Typed flags for the frame types that have any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data(BitFlags<DataFlags>),
    Headers(BitFlags<HeadersFlags>),
    Priority,
    RstStream,
    Settings(BitFlags<SettingsFlags>),
    PushPromise(BitFlags<PushPromiseFlags>),
    Ping(BitFlags<PingFlags>),
    GoAway,
    WindowUpdate,
    Continuation(BitFlags<ContinuationFlags>),
    Unknown(EncodedFrameType),
}

/// See <https://httpwg.org/specs/rfc9113.html#DATA>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataFlags {
    Padded = 0x08,
    EndStream = 0x01,
}

/// See <https://httpwg.org/specs/rfc9113.html#HEADERS>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeadersFlags {
    Priority = 0x20,
    Padded = 0x08,
    EndHeaders = 0x04,
    EndStream = 0x01,
}

/// See <https://httpwg.org/specs/rfc9113.html#SETTINGS>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SettingsFlags {
    Ack = 0x01,
}

/// See <https://httpwg.org/specs/rfc9113.html#PUSH_PROMISE>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PushPromiseFlags {
    Padded = 0x08,
    EndHeaders = 0x04,
}

/// See <https://httpwg.org/specs/rfc9113.html#PING>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PingFlags {
    Ack = 0x01,
}

/// See <https://httpwg.org/specs/rfc9113.html#CONTINUATION>
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContinuationFlags {
    EndHeaders = 0x04,
}

/// A frame type and its flags, as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedFrameType {
    pub ty: u8,
    pub flags: u8,
}

impl EncodedFrameType {
    fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, (ty, flags)) = tuple((be_u8, be_u8))(i)?;
        Ok((i, Self { ty, flags }))
    }
}

impl From<(RawFrameType, u8)> for EncodedFrameType {
    fn from((ty, flags): (RawFrameType, u8)) -> Self {
        Self {
            ty: ty.repr(),
            flags,
        }
    }
}

impl FrameType {
    pub fn encode(self) -> EncodedFrameType {
        match self {
            FrameType::Data(f) => (RawFrameType::Data, f.bits()).into(),
            FrameType::Headers(f) => (RawFrameType::Headers, f.bits()).into(),
            FrameType::Priority => (RawFrameType::Priority, 0).into(),
            FrameType::RstStream => (RawFrameType::RstStream, 0).into(),
            FrameType::Settings(f) => (RawFrameType::Settings, f.bits()).into(),
            FrameType::PushPromise(f) => (RawFrameType::PushPromise, f.bits()).into(),
            FrameType::Ping(f) => (RawFrameType::Ping, f.bits()).into(),
            FrameType::GoAway => (RawFrameType::GoAway, 0).into(),
            FrameType::WindowUpdate => (RawFrameType::WindowUpdate, 0).into(),
            FrameType::Continuation(f) => (RawFrameType::Continuation, f.bits()).into(),
            FrameType::Unknown(ft) => ft,
        }
    }

    pub fn decode(ft: EncodedFrameType) -> Self {
        match RawFrameType::from_repr(ft.ty) {
            Some(ty) => match ty {
                RawFrameType::Data => {
                    FrameType::Data(BitFlags::<DataFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::Headers => {
                    FrameType::Headers(BitFlags::<HeadersFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::Priority => FrameType::Priority,
                RawFrameType::RstStream => FrameType::RstStream,
                RawFrameType::Settings => {
                    FrameType::Settings(BitFlags::<SettingsFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::PushPromise => FrameType::PushPromise(
                    BitFlags::<PushPromiseFlags>::from_bits_truncate(ft.flags),
                ),
                RawFrameType::Ping => {
                    FrameType::Ping(BitFlags::<PingFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::GoAway => FrameType::GoAway,
                RawFrameType::WindowUpdate => FrameType::WindowUpdate,
                RawFrameType::Continuation => FrameType::Continuation(
                    BitFlags::<ContinuationFlags>::from_bits_truncate(ft.flags),
                ),
            },
            None => FrameType::Unknown(ft),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FrameType::Data(_) => "Data",
            FrameType::Headers(_) => "Headers",
            FrameType::Priority => "Priority",
            FrameType::RstStream => "RstStream",
            FrameType::Settings(_) => "Settings",
            FrameType::PushPromise(_) => "PushPromise",
            FrameType::Ping(_) => "Ping",
            FrameType::GoAway => "GoAway",
            FrameType::WindowUpdate => "WindowUpdate",
            FrameType::Continuation(_) => "Continuation",
            FrameType::Unknown(_) => "Unknown",
        }
    }
}

/// A 31-bit stream identifier. Zero is the connection itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Stream ID used for connection control frames.
    pub const CONNECTION: Self = Self(0);

    /// Server-initiated streams have even IDs.
    pub fn is_server_initiated(&self) -> bool {
        self.0 % 2 == 0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid stream id: {0}")]
pub struct StreamIdOutOfRange(pub u32);

impl TryFrom<u32> for StreamId {
    type Error = StreamIdOutOfRange;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value & 0x8000_0000 != 0 {
            Err(StreamIdOutOfRange(value))
        } else {
            Ok(Self(value))
        }
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// See <https://httpwg.org/specs/rfc9113.html#FrameHeader>
#[derive(Clone, Copy)]
pub struct Frame {
    pub frame_type: FrameType,
    pub reserved: u8,
    pub stream_id: StreamId,
    pub len: u32,
}

// Compact one-line rendering: `#1:Headers(len=13) [EndHeaders | EndStream]`.
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stream_id == StreamId::CONNECTION {
            write!(f, "Conn:")?;
        } else {
            write!(f, "#{}:", self.stream_id.0)?;
        }
        if let FrameType::Unknown(EncodedFrameType { ty, flags }) = self.frame_type {
            return write!(f, "UnknownFrame({ty:#x}, {flags:#x})");
        }
        write!(f, "{}", self.frame_type.name())?;
        if self.len > 0 {
            write!(f, "(len={})", self.len)?;
        }
        match &self.frame_type {
            FrameType::Data(fl) if !fl.is_empty() => write!(f, " [{fl}]"),
            FrameType::Headers(fl) if !fl.is_empty() => write!(f, " [{fl}]"),
            FrameType::Settings(fl) if !fl.is_empty() => write!(f, " [{fl}]"),
            FrameType::PushPromise(fl) if !fl.is_empty() => write!(f, " [{fl}]"),
            FrameType::Ping(fl) if !fl.is_empty() => write!(f, " [{fl}]"),
            FrameType::Continuation(fl) if !fl.is_empty() => write!(f, " [{fl}]"),
            _ => Ok(()),
        }
    }
}

impl Frame {
    /// Create a new frame with the given type and stream ID.
    pub fn new(frame_type: FrameType, stream_id: StreamId) -> Self {
        Self {
            frame_type,
            reserved: 0,
            stream_id,
            len: 0,
        }
    }

    /// Set the frame's payload length.
    pub fn with_len(mut self, len: u32) -> Self {
        self.len = len;
        self
    }

    /// Parse a 9-byte frame header. Streaming: returns `Incomplete` on
    /// short input.
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, (len, frame_type, (reserved, stream_id))) =
            tuple((be_u24, EncodedFrameType::parse, parse_reserved_and_stream_id))(i)?;

        let frame = Frame {
            frame_type: FrameType::decode(frame_type),
            reserved,
            stream_id,
            len,
        };
        Ok((i, frame))
    }

    pub fn write_into(self, mut w: impl io::Write) -> io::Result<()> {
        w.write_all(&self.header_bytes())
    }

    /// The 9 header bytes, packed. The reserved bit is always sent as
    /// zero.
    pub fn header_bytes(self) -> [u8; FRAME_HEADER_LEN] {
        let ft = self.frame_type.encode();
        let len = self.len;
        let sid = self.stream_id.0.to_be_bytes();
        [
            (len >> 16) as u8,
            (len >> 8) as u8,
            len as u8,
            ft.ty,
            ft.flags,
            sid[0],
            sid[1],
            sid[2],
            sid[3],
        ]
    }

    pub fn is_end_stream(&self) -> bool {
        match self.frame_type {
            FrameType::Data(f) => f.contains(DataFlags::EndStream),
            FrameType::Headers(f) => f.contains(HeadersFlags::EndStream),
            _ => false,
        }
    }

    pub fn is_end_headers(&self) -> bool {
        match self.frame_type {
            FrameType::Headers(f) => f.contains(HeadersFlags::EndHeaders),
            FrameType::PushPromise(f) => f.contains(PushPromiseFlags::EndHeaders),
            FrameType::Continuation(f) => f.contains(ContinuationFlags::EndHeaders),
            _ => false,
        }
    }

    pub fn has_padding(&self) -> bool {
        match self.frame_type {
            FrameType::Data(f) => f.contains(DataFlags::Padded),
            FrameType::Headers(f) => f.contains(HeadersFlags::Padded),
            FrameType::PushPromise(f) => f.contains(PushPromiseFlags::Padded),
            _ => false,
        }
    }
}

/// See <https://httpwg.org/specs/rfc9113.html#FrameHeader> - the first bit
/// is reserved, the rest is a 31-bit stream id.
pub fn parse_reserved_and_u31(i: &[u8]) -> IResult<&[u8], (u8, u32)> {
    let (i, word) = be_u32(i)?;
    Ok((i, ((word >> 31) as u8, word & 0x7FFF_FFFF)))
}

fn parse_reserved_and_stream_id(i: &[u8]) -> IResult<&[u8], (u8, StreamId)> {
    let (i, (reserved, stream_id)) = parse_reserved_and_u31(i)?;
    Ok((i, (reserved, StreamId(stream_id))))
}

// cf. https://httpwg.org/specs/rfc9113.html#HEADERS
#[derive(Debug)]
pub struct PrioritySpec {
    pub exclusive: bool,
    pub stream_dependency: StreamId,
    // 0-255 => 1-256
    pub weight: u8,
}

impl PrioritySpec {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, ((exclusive, stream_dependency), weight)) =
            tuple((parse_reserved_and_stream_id, be_u8))(i)?;
        Ok((
            i,
            Self {
                exclusive: exclusive != 0,
                stream_dependency,
                weight,
            },
        ))
    }
}

/// See <https://httpwg.org/specs/rfc9113.html#WINDOW_UPDATE>
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdate {
    pub reserved: u8,
    pub increment: u32,
}

impl WindowUpdate {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, (reserved, increment)) = parse_reserved_and_u31(i)?;
        Ok((i, Self { reserved, increment }))
    }
}

/// See <https://httpwg.org/specs/rfc9113.html#GOAWAY> (without debug data)
#[derive(Debug, Clone, Copy)]
pub struct GoAway {
    pub last_stream_id: StreamId,
    pub error_code: ErrorCode,
}

impl GoAway {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, ((_, last_stream_id), code)) =
            tuple((parse_reserved_and_stream_id, be_u32))(i)?;
        Ok((
            i,
            Self {
                last_stream_id,
                error_code: ErrorCode(code),
            },
        ))
    }

    pub fn write_into(self, mut w: impl io::Write) -> io::Result<()> {
        w.write_u32::<BigEndian>(self.last_stream_id.0)?;
        w.write_u32::<BigEndian>(self.error_code.0)?;
        Ok(())
    }
}

/// An error code as it appears in RST_STREAM and GOAWAY frames. May be
/// outside the set of codes the RFC defines.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u32);

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match KnownErrorCode::from_repr(self.0) {
            Some(e) => fmt::Debug::fmt(&e, f),
            None => write!(f, "ErrorCode(0x{:02x})", self.0),
        }
    }
}

impl From<KnownErrorCode> for ErrorCode {
    fn from(e: KnownErrorCode) -> Self {
        Self(e as u32)
    }
}

/// See <https://httpwg.org/specs/rfc9113.html#ErrorCodes>
#[EnumRepr(type = "u32")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownErrorCode {
    /// Not a result of an error; e.g. graceful shutdown via GOAWAY.
    NoError = 0x00,

    /// Unspecific protocol error, for when nothing better fits.
    ProtocolError = 0x01,

    /// The endpoint encountered an unexpected internal error.
    InternalError = 0x02,

    /// The peer violated the flow-control protocol.
    FlowControlError = 0x03,

    /// SETTINGS was not acknowledged in a timely manner.
    SettingsTimeout = 0x04,

    /// A frame was received after a stream was half-closed.
    StreamClosed = 0x05,

    /// A frame had an invalid size.
    FrameSizeError = 0x06,

    /// The stream was refused before any application processing.
    RefusedStream = 0x07,

    /// The stream is no longer needed.
    Cancel = 0x08,

    /// The field section compression context cannot be maintained.
    CompressionError = 0x09,

    /// A CONNECT tunnel was reset or abnormally closed.
    ConnectError = 0x0a,

    /// The peer is exhibiting behavior that might generate excessive load.
    EnhanceYourCalm = 0x0b,

    /// The transport does not meet minimum security requirements.
    InadequateSecurity = 0x0c,

    /// HTTP/1.1 is required instead of HTTP/2.
    Http1_1Required = 0x0d,
}

impl TryFrom<ErrorCode> for KnownErrorCode {
    type Error = ();

    fn try_from(e: ErrorCode) -> Result<Self, Self::Error> {
        KnownErrorCode::from_repr(e.0).ok_or(())
    }
}

/// Identifiers for the settings defined by the RFC.
/// cf. <https://httpwg.org/specs/rfc9113.html#SettingValues>
#[EnumRepr(type = "u16")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    HeaderTableSize = 0x01,
    EnablePush = 0x02,
    MaxConcurrentStreams = 0x03,
    InitialWindowSize = 0x04,
    MaxFrameSize = 0x05,
    MaxHeaderListSize = 0x06,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("ENABLE_PUSH must be 0 or 1, got {0}")]
    EnablePushOutOfBounds(u32),

    #[error("initial window size {0} larger than 2^31-1")]
    InitialWindowSizeTooLarge(u32),

    #[error("max frame size {0} out of the allowed 2^14..=2^24-1 range")]
    MaxFrameSizeOutOfBounds(u32),
}

/// A snapshot of the six RFC-defined settings.
/// cf. <https://httpwg.org/specs/rfc9113.html#SettingValues>
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Maximum size of the compression table used to decode field
    /// blocks, in octets. The initial value is 4,096.
    pub header_table_size: u32,

    /// Whether the sender is willing to receive PUSH_PROMISE frames.
    /// Only meaningful when sent by a client.
    pub enable_push: bool,

    /// Maximum number of concurrent streams the sender allows its peer
    /// to create. Unlimited initially (represented as `u32::MAX`).
    pub max_concurrent_streams: u32,

    /// The sender's initial window size for stream-level flow control,
    /// in octets. The initial value is 2^16-1. Values above 2^31-1 are
    /// a FLOW_CONTROL_ERROR.
    pub initial_window_size: u32,

    /// Size of the largest frame payload the sender is willing to
    /// receive, in octets. Must stay within 2^14..=2^24-1.
    pub max_frame_size: u32,

    /// Advisory maximum field section size. Unlimited initially
    /// (represented as `u32::MAX`).
    pub max_header_list_size: u32,
}

impl Default for Settings {
    /// The standard-defined pre-SETTINGS values.
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: u32::MAX,
            initial_window_size: (1 << 16) - 1,
            max_frame_size: 1 << 14,
            max_header_list_size: u32::MAX,
        }
    }
}

impl Settings {
    pub const MAX_INITIAL_WINDOW_SIZE: u32 = (1 << 31) - 1;
    pub const MAX_FRAME_SIZE_ALLOWED_RANGE: RangeInclusive<u32> = (1 << 14)..=((1 << 24) - 1);

    /// Apply a single setting, validating its value.
    pub fn apply(&mut self, setting: Setting, value: u32) -> Result<(), SettingsError> {
        match setting {
            Setting::HeaderTableSize => self.header_table_size = value,
            Setting::EnablePush => {
                self.enable_push = match value {
                    0 => false,
                    1 => true,
                    _ => return Err(SettingsError::EnablePushOutOfBounds(value)),
                }
            }
            Setting::MaxConcurrentStreams => self.max_concurrent_streams = value,
            Setting::InitialWindowSize => {
                if value > Self::MAX_INITIAL_WINDOW_SIZE {
                    return Err(SettingsError::InitialWindowSizeTooLarge(value));
                }
                self.initial_window_size = value;
            }
            Setting::MaxFrameSize => {
                if !Self::MAX_FRAME_SIZE_ALLOWED_RANGE.contains(&value) {
                    return Err(SettingsError::MaxFrameSizeOutOfBounds(value));
                }
                self.max_frame_size = value;
            }
            Setting::MaxHeaderListSize => self.max_header_list_size = value,
        }
        Ok(())
    }

    /// Walk a SETTINGS payload (a sequence of 6-byte records), invoking
    /// `on_pair` for every *known* identifier. Unknown identifiers are
    /// ignored, as the RFC requires. The caller is responsible for
    /// checking that the payload length is a multiple of six.
    pub fn parse<E>(
        payload: &[u8],
        mut on_pair: impl FnMut(Setting, u32) -> Result<(), E>,
    ) -> Result<(), E> {
        for chunk in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([chunk[0], chunk[1]]);
            let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
            tracing::trace!(%id, %value, "got setting pair");
            match Setting::from_repr(id) {
                None => {
                    // ignore unknown settings
                }
                Some(setting) => on_pair(setting, value)?,
            }
        }
        Ok(())
    }

    /// All six settings as id/value pairs, in identifier order.
    pub fn pairs(&self) -> [(Setting, u32); 6] {
        [
            (Setting::HeaderTableSize, self.header_table_size),
            (Setting::EnablePush, self.enable_push as u32),
            (Setting::MaxConcurrentStreams, self.max_concurrent_streams),
            (Setting::InitialWindowSize, self.initial_window_size),
            (Setting::MaxFrameSize, self.max_frame_size),
            (Setting::MaxHeaderListSize, self.max_header_list_size),
        ]
    }

    /// The pairs whose value differs between `self` and `newer` — what
    /// a SETTINGS frame announcing the change from `self` to `newer`
    /// should carry.
    pub fn diff(&self, newer: &Settings) -> Vec<(Setting, u32)> {
        self.pairs()
            .into_iter()
            .zip(newer.pairs())
            .filter(|(old, new)| old.1 != new.1)
            .map(|(_, new)| new)
            .collect()
    }

    /// Encode all six settings as 6-byte records.
    pub fn write_into(self, mut w: impl io::Write) -> io::Result<()> {
        for (id, value) in self.pairs() {
            w.write_u16::<BigEndian>(id.repr())?;
            w.write_u32::<BigEndian>(value)?;
        }
        Ok(())
    }
}

/// Encode a list of setting pairs as 6-byte records.
pub fn write_setting_pairs(pairs: &[(Setting, u32)], mut w: impl io::Write) -> io::Result<()> {
    for (id, value) in pairs {
        w.write_u16::<BigEndian>(id.repr())?;
        w.write_u32::<BigEndian>(*value)?;
    }
    Ok(())
}
