//! The connection state machine.
//!
//! A [`Connection`] is a self-contained protocol engine: the host
//! feeds it inbound bytes and calls the write API; the engine invokes
//! the [`Events`] sink for everything it produces. No sockets, no
//! timers, no threads.

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

use heddle_h2::{KnownErrorCode, Settings, StreamId, PREFACE};

use crate::{
    h1,
    stream::{HalfState, Side, Stream, StreamTable},
    types::{Header, Headers, Message, Method},
    util::{is_informational, parse_decimal, remove_chunked_te, HEADER_TRANSFORM},
    Error, Events,
};

mod frames;
mod write;

/// Hard cap on CONTINUATION frames per header block. Bounds reassembly
/// memory to `MAX_CONTINUATIONS * max_frame_size`.
pub const MAX_CONTINUATIONS: usize = 8;

/// Which end of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Client,
    Server,
}

/// The protocol version `begin` starts the connection in. h1
/// connections may still upgrade to h2 later (h2c).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http1,
    Http2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Uninitialized,
    H1,
    H2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    H2Init,
    H2Preface,
    H2Settings,
    H2Frame,
    H1Head,
    H1Body,
    H1Tail,
    H1Chunk,
    H1ChunkBody,
    H1ChunkTail,
    H1Trailers,
}

/// What a state handler decided: wait for more input, or move on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Pending,
    Transition(State),
}

/// How much payload the current h1 message still owes us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum H1Payload {
    Length(u64),
    Chunked,
    /// Raw passthrough after a 101 response.
    UntilEof,
}

/// Connection-level configuration, applied at construction.
pub struct Config {
    /// The local SETTINGS to announce. Also bounds h1 message sizes.
    pub settings: Settings,

    /// Refuse `upgrade: h2c` requests (on by default; flip it off to
    /// serve h2c upgrades).
    pub disallow_h2_upgrade: bool,

    /// Refuse h2-with-prior-knowledge on h1 server connections.
    pub disallow_h2_prior_knowledge: bool,

    /// Let the host replenish stream receive windows via `open_flow`
    /// instead of auto-replenishing on delivery.
    pub manual_flow_control: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: initial_settings(),
            disallow_h2_upgrade: true,
            disallow_h2_prior_knowledge: false,
            manual_flow_control: false,
        }
    }
}

/// The values we announce in our first SETTINGS frame.
pub(crate) fn initial_settings() -> Settings {
    Settings {
        max_concurrent_streams: 1024,
        ..Settings::default()
    }
}

/// What we assume about the peer before its SETTINGS frame arrives.
/// Deliberately tighter than the standard defaults, in case we want to
/// send frames before the peer's preamble is in.
pub(crate) fn conservative_settings() -> Settings {
    Settings {
        enable_push: false,
        max_concurrent_streams: 100,
        ..Settings::default()
    }
}

/// A socketless HTTP/1.1 + HTTP/2 connection, generic over its event
/// sink.
pub struct Connection<E: Events> {
    pub(crate) events: E,
    kind: Kind,
    pub(crate) mode: Mode,
    state: State,

    pub(crate) disallow_h2_upgrade: bool,
    pub(crate) disallow_h2_prior_knowledge: bool,
    pub(crate) manual_flow_control: bool,

    pub(crate) local_settings: Settings,
    pub(crate) remote_settings: Settings,

    /// Connection-scope flow windows; h2 only. Absolute, unlike the
    /// per-stream deltas.
    pub(crate) window_recv: i64,
    pub(crate) window_send: i64,

    buffer: BytesMut,
    pub(crate) streams: StreamTable,

    /// `last_stream[remote]` as recorded by the first GOAWAY we sent.
    pub(crate) goaway_sent: Option<StreamId>,

    pub(crate) remaining_h1_payload: H1Payload,

    pub(crate) hpack_dec: loona_hpack::Decoder<'static>,
    pub(crate) hpack_enc: loona_hpack::Encoder<'static>,
}

impl<E: Events> Connection<E> {
    pub fn client(events: E) -> Self {
        Self::new(Kind::Client, Config::default(), events)
    }

    pub fn server(events: E) -> Self {
        Self::new(Kind::Server, Config::default(), events)
    }

    pub fn new(kind: Kind, config: Config, events: E) -> Self {
        let mut hpack_dec = loona_hpack::Decoder::new();
        hpack_dec.set_max_allowed_table_size(config.settings.header_table_size as usize);
        let hpack_enc = loona_hpack::Encoder::new();

        let standard = Settings::default();
        Self {
            events,
            kind,
            mode: Mode::Uninitialized,
            state: State::Closed,
            disallow_h2_upgrade: config.disallow_h2_upgrade,
            disallow_h2_prior_knowledge: config.disallow_h2_prior_knowledge,
            manual_flow_control: config.manual_flow_control,
            local_settings: config.settings,
            remote_settings: conservative_settings(),
            window_recv: standard.initial_window_size as i64,
            window_send: standard.initial_window_size as i64,
            buffer: BytesMut::new(),
            streams: StreamTable::default(),
            goaway_sent: None,
            remaining_h1_payload: H1Payload::Length(0),
            hpack_dec,
            hpack_enc,
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut E {
        &mut self.events
    }

    pub fn into_events(self) -> E {
        self.events
    }

    /// The id the next locally-initiated stream would get.
    pub fn next_stream_id(&self) -> StreamId {
        let last = self.streams.last(Side::Local).0;
        StreamId(match self.kind {
            Kind::Client => (last + 1) | 1,
            Kind::Server => last + 2,
        })
    }

    /// Replace the local settings at runtime. Emits a SETTINGS delta
    /// frame when already on an established h2 connection.
    pub fn configure(&mut self, settings: Settings) -> Result<(), Error> {
        if !Settings::MAX_FRAME_SIZE_ALLOWED_RANGE.contains(&settings.max_frame_size) {
            return Err(Error::Assertion(
                "maximum frame size out of bounds (2^14..2^24-1)",
            ));
        }
        if self.mode == Mode::H2 && self.state != State::H2Init {
            let old = self.local_settings;
            self.write_settings_delta(&old, &settings)?;
        }
        self.hpack_dec
            .set_max_allowed_table_size(settings.header_table_size as usize);
        self.local_settings = settings;
        Ok(())
    }

    /// Start the connection in the given protocol version. May produce
    /// output (the client preface, initial SETTINGS) immediately.
    pub fn begin(&mut self, version: Version) -> Result<(), Error> {
        if self.state != State::Closed {
            return Err(Error::Assertion("begin called twice"));
        }
        self.state = match version {
            Version::Http2 => State::H2Init,
            Version::Http1 => State::H1Head,
        };
        self.run()
    }

    /// Feed inbound transport bytes. Advances the state machine as far
    /// as the buffered data allows, firing events along the way.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), Error> {
        self.buffer.extend_from_slice(data);
        self.run()
    }

    /// The transport hit EOF. In h2 mode this tears down every stream;
    /// in h1 mode it is an error unless the current message was
    /// delimited by EOF (or fully delivered).
    pub fn eof(&mut self) -> Result<(), Error> {
        if self.mode != Mode::H2 {
            let sid = self.h1_stream_id();
            if let Some(s) = self.streams.get(sid) {
                if s.r_state != HalfState::Closed {
                    if self.remaining_h1_payload != H1Payload::UntilEof {
                        return Err(Error::Disconnect("unclean http/1.x termination"));
                    }
                    self.events.message_tail(sid, None)?;
                    if let Some(s) = self.streams.get_mut(sid) {
                        s.r_state = HalfState::Closed;
                        if s.w_state == HalfState::Closed {
                            self.stream_end(sid)?;
                        }
                    }
                }
            }
            return Ok(());
        }

        // h2 won't work over half-closed connections due to pings and
        // flow control.
        self.state = State::Closed;
        for sid in self.streams.ids() {
            self.stream_end(sid)?;
        }
        Ok(())
    }

    /// Announce a graceful shutdown (GOAWAY with NO_ERROR).
    pub fn shutdown(&mut self) -> Result<(), Error> {
        self.write_reset(StreamId::CONNECTION, KnownErrorCode::NoError)
    }

    fn run(&mut self) -> Result<(), Error> {
        loop {
            let step = match self.state {
                State::Closed => return Err(Error::Disconnect("connection closed")),
                State::H2Init => self.when_h2_init(),
                State::H2Preface => self.when_h2_preface(),
                State::H2Settings => self.when_h2_settings(),
                State::H2Frame => self.when_h2_frame(),
                State::H1Head => self.when_h1_head(),
                State::H1Body | State::H1ChunkBody => self.when_h1_body(),
                State::H1Tail => self.when_h1_tail(),
                State::H1Chunk => self.when_h1_chunk(),
                State::H1ChunkTail => self.when_h1_chunk_tail(),
                State::H1Trailers => self.when_h1_trailers(),
            }?;
            match step {
                Step::Pending => return Ok(()),
                Step::Transition(next) => self.state = next,
            }
        }
    }

    pub(crate) fn stream_is_local(&self, sid: StreamId) -> bool {
        (sid.0 % 2 == 1) == (self.kind == Kind::Client)
    }

    pub(crate) fn stream_side(&self, sid: StreamId) -> Side {
        if self.stream_is_local(sid) {
            Side::Local
        } else {
            Side::Remote
        }
    }

    /// The stream the current h1 message belongs to: the last request
    /// we sent (client) or received (server).
    fn h1_stream_id(&self) -> StreamId {
        self.streams.last(match self.kind {
            Kind::Client => Side::Local,
            Kind::Server => Side::Remote,
        })
    }

    /// Create a stream, enforcing parity, monotonicity and the
    /// concurrent-stream limit. Peer violations tear the connection
    /// down; local ones only fail the call.
    pub(crate) fn stream_new(&mut self, sid: StreamId, side: Side) -> Result<(), Error> {
        let local = side == Side::Local;
        if self.stream_is_local(sid) != local {
            return if local {
                Err(Error::InvalidStream("incorrect stream id parity"))
            } else {
                self.connection_error(KnownErrorCode::ProtocolError, "incorrect stream id parity")
            };
        }
        if sid <= self.streams.last(side) {
            return if local {
                Err(Error::InvalidStream("nonmonotonic stream id"))
            } else {
                self.connection_error(KnownErrorCode::ProtocolError, "nonmonotonic stream id")
            };
        }
        let limit: u64 = if self.mode == Mode::H2 {
            // the peer of the initiating side sets the limit
            match side {
                Side::Local => self.remote_settings.max_concurrent_streams as u64,
                Side::Remote => self.local_settings.max_concurrent_streams as u64,
            }
        } else {
            // TODO h1 pipelining: would need to track multiple h1
            // streams and pick the lowest id in the h1 states
            1
        };
        if self.streams.count(side) as u64 >= limit {
            return if local {
                Err(Error::WouldBlock("wait for stream_end"))
            } else {
                self.connection_error(KnownErrorCode::ProtocolError, "peer exceeded stream limit")
            };
        }

        self.streams.insert(Stream::new(sid, side), side);
        debug!(%sid, total = self.streams.len(), "new stream");
        if let Err(e) = self.events.stream_start(sid) {
            self.streams.remove(sid, side);
            return Err(e);
        }
        Ok(())
    }

    /// Remove a stream and tell the host about it.
    pub(crate) fn stream_end(&mut self, sid: StreamId) -> Result<(), Error> {
        let side = self.stream_side(sid);
        if self.streams.remove(sid, side).is_some() {
            debug!(%sid, total = self.streams.len(), "closed stream");
            self.events.stream_end(sid)?;
        }
        Ok(())
    }

    /// Remove a stream we closed while the peer's write half may still
    /// be active; remembers it so in-flight frames are tolerated.
    pub(crate) fn stream_end_by_local(&mut self, sid: StreamId) -> Result<(), Error> {
        if let Some(s) = self.streams.get(sid) {
            if s.r_state != HalfState::Closed {
                self.streams
                    .reset_history
                    .record(sid, s.r_state == HalfState::Headers);
            }
        }
        self.stream_end(sid)
    }

    // ---- h2 preamble states ----

    /// Entered via `begin(Http2)`, an h2c upgrade, or prior knowledge.
    pub(crate) fn when_h2_init(&mut self) -> Result<Step, Error> {
        self.mode = Mode::H2;
        if self.kind == Kind::Client {
            self.events.writev(&[PREFACE])?;
        }
        let local = self.local_settings;
        self.write_settings_delta(&Settings::default(), &local)?;
        Ok(Step::Transition(State::H2Preface))
    }

    fn when_h2_preface(&mut self) -> Result<Step, Error> {
        if self.kind == Kind::Server {
            let n = self.buffer.len().min(PREFACE.len());
            if self.buffer[..n] != PREFACE[..n] {
                return Err(Error::Protocol("invalid HTTP 2 client preface"));
            }
            if self.buffer.len() < PREFACE.len() {
                return Ok(Step::Pending);
            }
            self.buffer.advance(PREFACE.len());
        }
        Ok(Step::Transition(State::H2Settings))
    }

    /// The first frame after the preface must be a non-ACK SETTINGS.
    fn when_h2_settings(&mut self) -> Result<Step, Error> {
        if self.buffer.len() < 5 {
            return Ok(Step::Pending);
        }
        if self.buffer[3] != heddle_h2::RawFrameType::Settings.repr() || self.buffer[4] != 0 {
            return Err(Error::Protocol("invalid HTTP 2 preface: no initial SETTINGS"));
        }
        let len =
            u32::from_be_bytes([0, self.buffer[0], self.buffer[1], self.buffer[2]]) as usize;
        if len > initial_settings().max_frame_size as usize {
            // couldn't have ACKed our settings yet!
            return Err(Error::Protocol(
                "invalid HTTP 2 preface: initial SETTINGS too big",
            ));
        }
        if self.buffer.len() < heddle_h2::FRAME_HEADER_LEN + len {
            return Ok(Step::Pending);
        }
        // Now that the peer is known to speak h2, its actual settings
        // apply as deltas to the values we announce ourselves.
        self.remote_settings = initial_settings();
        Ok(Step::Transition(State::H2Frame))
    }

    // ---- h1 states ----

    fn when_h1_head(&mut self) -> Result<Step, Error> {
        if self.buffer.is_empty() {
            return Ok(Step::Pending);
        }

        if self.kind == Kind::Client {
            let sid = self.h1_stream_id();
            match self.streams.get(sid) {
                Some(s) if s.r_state == HalfState::Headers => {}
                _ => {
                    return Err(Error::Protocol(
                        "server sent an HTTP/1.x response, but there was no request",
                    ))
                }
            }
        } else {
            if self.streams.get(self.h1_stream_id()).is_none() {
                // Upgrading with prior knowledge is only allowed before
                // any h1 request has been received.
                if !self.disallow_h2_prior_knowledge
                    && self.streams.last(Side::Remote) == StreamId(0)
                {
                    let n = self.buffer.len().min(PREFACE.len());
                    if self.buffer[..n] == PREFACE[..n] {
                        return Ok(if self.buffer.len() < PREFACE.len() {
                            Step::Pending
                        } else {
                            Step::Transition(State::H2Init)
                        });
                    }
                }
                let sid = StreamId((self.streams.last(Side::Remote).0 + 1) | 1);
                self.stream_new(sid, Side::Remote)?;
            }
            let sid = self.h1_stream_id();
            if self.streams.get(sid).map(|s| s.r_state) != Some(HalfState::Headers) {
                return Err(Error::WouldBlock("already handling an HTTP/1.x message"));
            }
        }
        let sid = self.h1_stream_id();

        // Parse the head, copying everything we keep out of the buffer.
        let head = match OwnedHead::parse(self.kind, &self.buffer[..]) {
            Ok(Some(head)) => head,
            Ok(None) => {
                let cap =
                    (MAX_CONTINUATIONS + 1) * self.local_settings.max_frame_size as usize;
                if self.buffer.len() > cap {
                    return Err(Error::Protocol("HTTP/1.x message too big"));
                }
                return Ok(Step::Pending);
            }
            Err(e) => return Err(e),
        };
        self.buffer.advance(head.consumed);

        let mut upgrade = false;
        let mut remaining = H1Payload::Length(0);
        let mut authority: Option<Bytes> = None;
        let mut rest = Headers::default();

        for (mut name, value) in head.headers {
            for b in name.iter_mut() {
                let t = HEADER_TRANSFORM[*b as usize];
                if t == 0 {
                    return Err(Error::Protocol("invalid character in h1 header"));
                }
                *b = t;
            }
            let name = Bytes::from(name);

            if self.kind == Kind::Server && name == "host" {
                authority = Some(value);
                continue;
            } else if name == "http2-settings" {
                // TODO decode the base64url SETTINGS payload and route
                // it through the frame hook
                continue;
            } else if name == "upgrade" {
                if self.mode != Mode::H1 {
                    // already switching to h2c; ignore other upgrades
                    continue;
                } else if value == "h2c" {
                    if self.disallow_h2_upgrade
                        || self.kind == Kind::Client
                        || sid != StreamId(1)
                        || upgrade
                    {
                        continue;
                    }
                    // Technically we should refuse unless HTTP2-Settings
                    // is present. We let that slide.
                    self.events.writev(&[
                        &b"HTTP/1.1 101 Switching Protocols\r\nconnection: upgrade\r\nupgrade: h2c\r\n\r\n"[..],
                    ])?;
                    // mode flips to h2; the h1 tail reroutes to the
                    // preface state
                    self.when_h2_init()?;
                    continue;
                } else if self.kind == Kind::Server {
                    upgrade = true;
                }
            } else if name == "content-length" {
                if remaining == H1Payload::Chunked {
                    // chunked takes precedence; drop the header
                    continue;
                }
                if remaining != H1Payload::Length(0) {
                    return Err(Error::Protocol("multiple content-lengths"));
                }
                match parse_decimal(&value) {
                    Some(n) => remaining = H1Payload::Length(n),
                    None => return Err(Error::Protocol("invalid content-length")),
                }
            } else if name == "transfer-encoding" {
                if value == "identity" {
                    continue;
                }
                // Any non-identity coding implies chunked framing on
                // the wire; strip the trailing "chunked" token and let
                // the rest (e.g. gzip) pass through.
                remaining = H1Payload::Chunked;
                let stripped = remove_chunked_te(&value);
                if stripped.is_empty() {
                    continue;
                }
                let stripped = value.slice(0..stripped.len());
                rest.push(Header::new(name, stripped));
                continue;
            }

            rest.push(Header::new(name, value));
        }

        if head.code == 101 {
            // Everything after the head is stream payload now.
            remaining = H1Payload::UntilEof;
        } else if is_informational(head.code) && remaining != H1Payload::Length(0) {
            return Err(Error::Protocol("informational response with a payload"));
        }

        // A HEAD response describes a payload but never carries one.
        // This also keeps HEAD requests from triggering upgrades.
        if self
            .streams
            .get(sid)
            .is_some_and(|s| s.reading_head_response)
        {
            remaining = H1Payload::Length(0);
        }

        self.remaining_h1_payload = remaining;

        let mut headers = Headers::default();
        if self.kind == Kind::Server {
            // The host sets the real scheme above the core.
            headers.append(&b":scheme"[..], &b"unknown"[..]);
            headers.push(Header::new(
                &b":authority"[..],
                authority.unwrap_or_else(|| Bytes::from_static(b"unknown")),
            ));
        }
        for h in &rest {
            headers.push(h.clone());
        }
        let message = Message {
            code: head.code,
            // responses carry no method; the field is filler there
            method: if self.kind == Kind::Client {
                Method::Get
            } else {
                Method::from_bytes(&head.method)
            },
            path: head.path,
            headers,
        };

        self.events.message_head(sid, &message)?;
        if upgrade {
            // The sink decides synchronously whether to switch
            // protocols; this stands in for the "block in on_upgrade"
            // contract of a threaded host.
            if let Some(response) = self.events.upgrade(sid)? {
                self.write_head(sid, &response, false)?;
            }
        }

        if is_informational(head.code) && head.code != 101 {
            // r_state stays at HEADERS: the real response is still due
            return Ok(Step::Transition(State::H1Head));
        }

        if let Some(s) = self.streams.get_mut(sid) {
            s.r_state = HalfState::Data;
        }
        Ok(Step::Transition(match self.remaining_h1_payload {
            H1Payload::Chunked => State::H1Chunk,
            H1Payload::Length(0) => State::H1Tail,
            H1Payload::Length(_) | H1Payload::UntilEof => State::H1Body,
        }))
    }

    /// Shared by the plain-body and chunk-body states.
    fn when_h1_body(&mut self) -> Result<Step, Error> {
        loop {
            let take = match self.remaining_h1_payload {
                H1Payload::Length(0) => break,
                H1Payload::Length(n) => self
                    .buffer
                    .len()
                    .min(usize::try_from(n).unwrap_or(usize::MAX)),
                H1Payload::UntilEof => self.buffer.len(),
                H1Payload::Chunked => break,
            };
            if take == 0 {
                return Ok(Step::Pending);
            }
            let chunk = self.buffer.split_to(take).freeze();
            if let H1Payload::Length(n) = self.remaining_h1_payload {
                self.remaining_h1_payload = H1Payload::Length(n - take as u64);
            }
            let sid = self.h1_stream_id();
            if self.streams.get(sid).is_some() {
                self.events.message_data(sid, &chunk)?;
            }
        }
        Ok(Step::Transition(if self.state == State::H1Body {
            State::H1Tail
        } else {
            State::H1ChunkTail
        }))
    }

    fn when_h1_tail(&mut self) -> Result<Step, Error> {
        let sid = self.h1_stream_id();
        if self.streams.get(sid).is_some() {
            self.events.message_tail(sid, None)?;
            if let Some(s) = self.streams.get_mut(sid) {
                s.r_state = HalfState::Closed;
                if s.w_state == HalfState::Closed {
                    self.stream_end(sid)?;
                }
            }
        }
        Ok(Step::Transition(if self.mode == Mode::H2 {
            State::H2Preface
        } else {
            State::H1Head
        }))
    }

    /// Parse a chunk-size line: hex digits, optional `;extension`,
    /// CRLF.
    fn when_h1_chunk(&mut self) -> Result<Step, Error> {
        let Some(eol) = memchr::memchr(b'\n', &self.buffer) else {
            if self.buffer.len() >= self.local_settings.max_frame_size as usize {
                return Err(Error::Protocol("too many h1 chunk extensions"));
            }
            return Ok(Step::Pending);
        };

        let mut length: u64 = 0;
        let mut p = 0;
        while p < eol {
            let digit = match self.buffer[p] {
                c @ b'0'..=b'9' => c - b'0',
                c @ b'a'..=b'f' => c - b'a' + 10,
                c @ b'A'..=b'F' => c - b'A' + 10,
                _ => break,
            };
            length = length
                .checked_mul(16)
                .and_then(|l| l.checked_add(u64::from(digit)))
                .ok_or(Error::Protocol("invalid h1 chunk length"))?;
            p += 1;
        }
        if p == 0 {
            return Err(Error::Protocol("invalid h1 chunk length"));
        }
        let consumed = match self.buffer[p] {
            b';' => eol + 1,
            b'\r' if self.buffer[p + 1] == b'\n' => p + 2,
            _ => return Err(Error::Protocol("invalid h1 line separator")),
        };
        self.buffer.advance(consumed);
        self.remaining_h1_payload = H1Payload::Length(length);
        Ok(Step::Transition(if length > 0 {
            State::H1ChunkBody
        } else {
            State::H1Trailers
        }))
    }

    fn when_h1_chunk_tail(&mut self) -> Result<Step, Error> {
        if self.buffer.len() < 2 {
            return Ok(Step::Pending);
        }
        if &self.buffer[..2] != b"\r\n" {
            return Err(Error::Protocol("invalid h1 chunk terminator"));
        }
        self.buffer.advance(2);
        Ok(Step::Transition(State::H1Chunk))
    }

    fn when_h1_trailers(&mut self) -> Result<Step, Error> {
        // TODO parse trailer records and surface them via message_tail
        // (they would arrive before the terminating CRLF)
        match self.when_h1_chunk_tail()? {
            Step::Pending => Ok(Step::Pending),
            Step::Transition(_) => Ok(Step::Transition(State::H1Tail)),
        }
    }

}

/// An h1 head with everything the engine keeps copied out of the
/// receive buffer, so the buffer can be shifted before processing.
struct OwnedHead {
    code: u16,
    method: Bytes,
    path: Bytes,
    headers: Vec<(Vec<u8>, Bytes)>,
    consumed: usize,
}

impl OwnedHead {
    /// `Ok(None)` means the head is not complete yet.
    fn parse(kind: Kind, buf: &[u8]) -> Result<Option<OwnedHead>, Error> {
        fn copy_headers(raw: &h1::RawHeaders<'_>) -> Vec<(Vec<u8>, Bytes)> {
            raw.iter()
                .map(|h| (h.name.to_vec(), Bytes::copy_from_slice(h.value)))
                .collect()
        }

        let total = buf.len();
        match kind {
            Kind::Client => match h1::response(buf) {
                Ok((rest, r)) => Ok(Some(OwnedHead {
                    code: r.code,
                    method: Bytes::new(),
                    path: Bytes::new(),
                    headers: copy_headers(&r.headers),
                    consumed: total - rest.len(),
                })),
                Err(nom::Err::Incomplete(_)) => Ok(None),
                Err(_) => Err(Error::Protocol("bad HTTP/1.x message")),
            },
            Kind::Server => match h1::request(buf) {
                Ok((rest, r)) => Ok(Some(OwnedHead {
                    code: 0,
                    method: Bytes::copy_from_slice(r.method),
                    path: Bytes::copy_from_slice(r.path),
                    headers: copy_headers(&r.headers),
                    consumed: total - rest.len(),
                })),
                Err(nom::Err::Incomplete(_)) => Ok(None),
                Err(_) => Err(Error::Protocol("bad HTTP/1.x message")),
            },
        }
    }
}
