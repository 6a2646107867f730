//! The write path: public send API, frame serialization with
//! size-splitting, and the error-emission helpers shared with the
//! receive side.

use tracing::debug;

use heddle_h2::{
    BitFlags, DataFlags, EncodedFrameType, Frame, FrameType, HeadersFlags, KnownErrorCode,
    PushPromiseFlags, RawFrameType, Settings, StreamId,
};

use super::{Connection, H1Payload, Kind, Mode, State};
use crate::{
    stream::{HalfState, Side},
    util::{reason_phrase, remove_chunked_te},
    Error, Events, Message, Method,
};

impl<E: Events> Connection<E> {
    /// Serialize one frame. Oversized HEADERS/PUSH_PROMISE turn into a
    /// head frame plus CONTINUATIONs, oversized DATA into several DATA
    /// frames. Flow control is the caller's concern; this only cuts
    /// frames to `remote.max_frame_size`.
    pub(crate) fn frame_write(&mut self, frame: Frame, payload: &[u8]) -> Result<(), Error> {
        let limit = self.remote_settings.max_frame_size as usize;
        let enc = frame.frame_type.encode();
        if payload.len() <= limit {
            return self.frame_write_raw(enc, frame.stream_id, payload);
        }

        match RawFrameType::from_repr(enc.ty) {
            Some(RawFrameType::Data | RawFrameType::Headers | RawFrameType::PushPromise) => {}
            // the *lowest possible* limit is 16 KiB; a control frame
            // that size means the engine miscounted somewhere
            _ => return Err(Error::Assertion("control frame too big")),
        }
        if frame.has_padding() {
            return Err(Error::NotImplemented("don't know how to split padded frames"));
        }

        let is_data = enc.ty == RawFrameType::Data.repr();
        // END_HEADERS belongs on the last CONTINUATION while END_STREAM
        // stays on the first HEADERS; for DATA, END_STREAM moves to the
        // last frame instead
        let carry = enc.flags
            & if is_data {
                DataFlags::EndStream as u8
            } else {
                HeadersFlags::EndHeaders as u8
            };
        let mut ty = enc.ty;
        let mut flags = enc.flags & !carry;
        let mut rest = payload;
        while rest.len() > limit {
            let (chunk, tail) = rest.split_at(limit);
            self.frame_write_raw(EncodedFrameType { ty, flags }, frame.stream_id, chunk)?;
            if !is_data {
                ty = RawFrameType::Continuation.repr();
            }
            flags &= !(HeadersFlags::Priority as u8 | HeadersFlags::EndStream as u8);
            rest = tail;
        }
        self.frame_write_raw(
            EncodedFrameType {
                ty,
                flags: flags | carry,
            },
            frame.stream_id,
            rest,
        )
    }

    fn frame_write_raw(
        &mut self,
        enc: EncodedFrameType,
        stream_id: StreamId,
        payload: &[u8],
    ) -> Result<(), Error> {
        let frame = Frame {
            frame_type: FrameType::decode(enc),
            reserved: 0,
            stream_id,
            len: payload.len() as u32,
        };
        debug!(?frame, ">");
        let head = frame.header_bytes();
        self.events.writev(&[&head[..], payload])
    }

    /// Announce a settings change as the difference between two
    /// snapshots.
    pub(crate) fn write_settings_delta(
        &mut self,
        old: &Settings,
        new: &Settings,
    ) -> Result<(), Error> {
        let pairs = old.diff(new);
        let mut payload = Vec::with_capacity(pairs.len() * 6);
        for (id, value) in pairs {
            payload.extend_from_slice(&id.repr().to_be_bytes());
            payload.extend_from_slice(&value.to_be_bytes());
        }
        self.frame_write(
            Frame::new(FrameType::Settings(Default::default()), StreamId::CONNECTION),
            &payload,
        )
    }

    pub(crate) fn write_goaway(&mut self, code: KnownErrorCode) -> Result<(), Error> {
        // the first GOAWAY pins the last stream we will process
        let last = *self
            .goaway_sent
            .get_or_insert(self.streams.last(Side::Remote));
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&last.0.to_be_bytes());
        payload[4..].copy_from_slice(&code.repr().to_be_bytes());
        self.frame_write(Frame::new(FrameType::GoAway, StreamId::CONNECTION), &payload)
    }

    /// Shut the connection down, *then* surface a protocol error.
    pub(crate) fn connection_error<T>(
        &mut self,
        code: KnownErrorCode,
        msg: &'static str,
    ) -> Result<T, Error> {
        self.write_goaway(code)?;
        Err(Error::Protocol(msg))
    }

    pub(crate) fn write_rst_stream_by_id(
        &mut self,
        sid: StreamId,
        code: KnownErrorCode,
    ) -> Result<(), Error> {
        let payload = code.repr().to_be_bytes();
        self.frame_write(Frame::new(FrameType::RstStream, sid), &payload)
    }

    /// Answer a stream-scoped violation: RST_STREAM, then forget the
    /// stream. If its HEADERS have not arrived yet they may still do;
    /// the reset-history entry keeps them decodable.
    pub(crate) fn stream_error(&mut self, sid: StreamId, code: KnownErrorCode) -> Result<(), Error> {
        self.write_rst_stream_by_id(sid, code)?;
        self.stream_end_by_local(sid)
    }

    // ---- public send API ----

    /// Send a message head. Clients writing to a fresh stream id
    /// create the stream (the id must be the next free local one, see
    /// [`Connection::next_stream_id`]).
    pub fn write_head(
        &mut self,
        sid: StreamId,
        message: &Message,
        final_: bool,
    ) -> Result<(), Error> {
        if self.state == State::Closed {
            return Err(Error::Disconnect("connection closed"));
        }
        match self.kind() {
            Kind::Client if message.code != 0 => {
                return Err(Error::Assertion("request with a code"))
            }
            Kind::Server if !message.path.is_empty() => {
                return Err(Error::Assertion("response with a path"))
            }
            _ => {}
        }
        if message.is_informational() && final_ {
            return Err(Error::Assertion("1xx codes cannot end the stream"));
        }
        for h in &message.headers {
            if h.name.iter().any(u8::is_ascii_uppercase) {
                return Err(Error::Assertion("header names should be lowercase"));
            }
        }

        if self.kind() == Kind::Client && self.streams.get(sid).is_none() {
            self.stream_new(sid, Side::Local)?;
        }
        match self.streams.get(sid) {
            Some(s) if s.w_state == HalfState::Headers => {}
            _ => return Err(Error::InvalidStream("this stream is not writable")),
        }
        if let Some(s) = self.streams.get_mut(sid) {
            // the response to a HEAD request describes a payload that
            // never arrives
            s.reading_head_response = message.method == Method::Head;
        }

        if self.mode == Mode::H2 {
            self.h2_write_head(sid, message, final_)?;
        } else {
            self.h1_write_head(sid, message, final_)?;
        }

        if message.code == 101 || !message.is_informational() {
            if let Some(s) = self.streams.get_mut(sid) {
                s.w_state = HalfState::Data;
            }
        }
        if final_ {
            self.discard_remaining_payload(sid)?;
        }
        Ok(())
    }

    fn h2_write_head(&mut self, sid: StreamId, m: &Message, final_: bool) -> Result<(), Error> {
        if m.code == 101 {
            return Err(Error::Assertion("cannot switch protocols over an http2 connection"));
        }
        let code = m.code.to_string();
        let mut fields: Vec<(&[u8], &[u8])> = Vec::with_capacity(m.headers.len() + 2);
        if self.kind() == Kind::Client {
            fields.push((b":method", m.method.as_bytes()));
            fields.push((b":path", &m.path));
        } else {
            fields.push((b":status", code.as_bytes()));
        }
        for h in &m.headers {
            fields.push((&h.name, &h.value));
        }
        let block = self.hpack_enc.encode(fields);

        let mut flags: BitFlags<HeadersFlags> = HeadersFlags::EndHeaders.into();
        if final_ {
            flags |= HeadersFlags::EndStream;
        }
        self.frame_write(Frame::new(FrameType::Headers(flags), sid), &block)
    }

    fn h1_write_head(&mut self, sid: StreamId, m: &Message, final_: bool) -> Result<(), Error> {
        if self.kind() == Kind::Client {
            self.events.writev(&[
                m.method.as_bytes(),
                &b" "[..],
                &m.path[..],
                &b" HTTP/1.1\r\n"[..],
            ])?;
        } else {
            let status = format!("HTTP/1.1 {} {}\r\n", m.code, reason_phrase(m.code));
            self.events.writev(&[status.as_bytes()])?;
        }

        let mut writing_chunked = !m.is_informational() && !final_;
        for h in &m.headers {
            let name: &[u8] = &h.name;
            let mut value: &[u8] = &h.value;
            let name: &[u8] = if name == b":authority" {
                b"host"
            } else if name.starts_with(b":") {
                // :scheme and friends have no h1 spelling
                continue;
            } else {
                if name == b"content-length" || name == b"upgrade" {
                    // sized (or raw, for upgrades) - not chunked
                    writing_chunked = false;
                } else if name == b"transfer-encoding" {
                    // chunked framing is ours to apply; announcing it
                    // twice would corrupt the body
                    value = remove_chunked_te(value);
                    if value.is_empty() {
                        continue;
                    }
                }
                name
            };
            self.events.writev(&[name, &b": "[..], value, &b"\r\n"[..]])?;
        }
        self.events.writev(&[if writing_chunked {
            &b"transfer-encoding: chunked\r\n\r\n"[..]
        } else {
            &b"\r\n"[..]
        }])?;

        if m.code == 101 {
            // only valid while the upgrade decision is pending, i.e.
            // from within the upgrade callback
            let reading = self
                .streams
                .get(sid)
                .is_some_and(|s| s.r_state != HalfState::Closed);
            if self.state != State::H1Head || !reading {
                return Err(Error::Assertion(
                    "accepted an upgrade outside the upgrade callback",
                ));
            }
            self.remaining_h1_payload = H1Payload::UntilEof;
        }
        if let Some(s) = self.streams.get_mut(sid) {
            s.writing_chunked = writing_chunked;
        }
        Ok(())
    }

    /// Send payload bytes; returns how many were actually accepted.
    /// Under h2 flow control this may be short, in which case the
    /// write half stays open (even with `final_` set) and the rest
    /// should be retried after `flow_increase`.
    pub fn write_data(&mut self, sid: StreamId, data: &[u8], final_: bool) -> Result<usize, Error> {
        if self.state == State::Closed {
            return Err(Error::Disconnect("connection closed"));
        }
        match self.streams.get(sid) {
            Some(s) if s.w_state == HalfState::Data => {}
            _ => return Err(Error::InvalidStream("this stream is not writable")),
        }
        let (written, finished) = if self.mode == Mode::H2 {
            self.h2_write_data(sid, data, final_)?
        } else {
            self.h1_write_data(sid, data, final_)?;
            (data.len(), final_)
        };
        if finished {
            self.discard_remaining_payload(sid)?;
        }
        Ok(written)
    }

    fn h2_write_data(
        &mut self,
        sid: StreamId,
        data: &[u8],
        final_: bool,
    ) -> Result<(usize, bool), Error> {
        let stream_window = match self.streams.get(sid) {
            Some(s) => s.window_send,
            None => return Err(Error::InvalidStream("this stream is not writable")),
        };
        let limit = (stream_window + i64::from(self.remote_settings.initial_window_size))
            .min(self.window_send)
            .max(0) as u64;
        let size = data.len().min(limit.min(usize::MAX as u64) as usize);
        // a clamped write cannot end the stream
        let finished = final_ && size == data.len();

        if size > 0 || finished {
            let flags: BitFlags<DataFlags> = if finished {
                DataFlags::EndStream.into()
            } else {
                BitFlags::empty()
            };
            self.frame_write(Frame::new(FrameType::Data(flags), sid), &data[..size])?;
        }
        self.window_send -= size as i64;
        if let Some(s) = self.streams.get_mut(sid) {
            s.window_send -= size as i64;
        }
        Ok((size, finished))
    }

    fn h1_write_data(&mut self, sid: StreamId, data: &[u8], final_: bool) -> Result<(), Error> {
        let chunked = self
            .streams
            .get(sid)
            .is_some_and(|s| s.writing_chunked);
        if !chunked {
            if !data.is_empty() {
                self.events.writev(&[data])?;
            }
            return Ok(());
        }
        if data.is_empty() {
            if final_ {
                self.events.writev(&[&b"0\r\n\r\n"[..]])?;
            }
            return Ok(());
        }
        let size_line = format!("{:X}\r\n", data.len());
        let tail: &[u8] = if final_ { b"\r\n0\r\n\r\n" } else { b"\r\n" };
        self.events.writev(&[size_line.as_bytes(), data, tail])
    }

    /// The local side is done writing. If the peer is also done, the
    /// stream dies now; otherwise an h2 server tells the peer not to
    /// bother finishing the request body.
    fn discard_remaining_payload(&mut self, sid: StreamId) -> Result<(), Error> {
        let r_state = match self.streams.get_mut(sid) {
            Some(s) => {
                s.w_state = HalfState::Closed;
                s.r_state
            }
            None => return Ok(()),
        };
        if r_state == HalfState::Closed {
            return self.stream_end_by_local(sid);
        }
        if self.kind() == Kind::Server && self.mode == Mode::H2 {
            self.write_rst_stream_by_id(sid, KnownErrorCode::NoError)?;
            return self.stream_end_by_local(sid);
        }
        Ok(())
    }

    /// Promise a pushed response on a new server-initiated stream. The
    /// request `m` is echoed back through `message_head`/`message_tail`
    /// as if the client had sent it. Silently skipped when the peer
    /// disabled push or the parent is already done.
    pub fn write_push(&mut self, parent: StreamId, m: &Message) -> Result<(), Error> {
        if self.state == State::Closed {
            return Err(Error::Disconnect("connection closed"));
        }
        if self.kind() == Kind::Client {
            return Err(Error::Assertion("clients can't push"));
        }
        if self.mode != Mode::H2
            || !self.remote_settings.enable_push
            || self.stream_is_local(parent)
        {
            return Ok(());
        }
        // pushed requests are safe, so best-effort is fine here
        match self.streams.get(parent) {
            Some(s) if s.w_state != HalfState::Closed => {}
            _ => return Ok(()),
        }

        let child = self.next_stream_id();
        self.stream_new(child, Side::Local)?;

        let mut fields: Vec<(&[u8], &[u8])> = Vec::with_capacity(m.headers.len() + 2);
        fields.push((b":method", m.method.as_bytes()));
        fields.push((b":path", &m.path));
        for h in &m.headers {
            fields.push((&h.name, &h.value));
        }
        let block = self.hpack_enc.encode(fields);
        let mut payload = Vec::with_capacity(4 + block.len());
        payload.extend_from_slice(&child.0.to_be_bytes());
        payload.extend_from_slice(&block);
        self.frame_write(
            Frame::new(
                FrameType::PushPromise(PushPromiseFlags::EndHeaders.into()),
                parent,
            ),
            &payload,
        )?;

        self.events.message_head(child, m)?;
        self.events.message_tail(child, None)
    }

    /// Abort a stream (RST_STREAM) or, with stream id 0, the whole
    /// connection (GOAWAY). A no-op on h1 connections, where the only
    /// equivalent is closing the transport.
    pub fn write_reset(&mut self, sid: StreamId, code: KnownErrorCode) -> Result<(), Error> {
        if self.mode != Mode::H2 {
            return Ok(());
        }
        if sid == StreamId::CONNECTION {
            return self.write_goaway(code);
        }
        if self.streams.get(sid).is_some() {
            self.stream_error(sid, code)
        } else {
            // idle streams have presumably been reset already
            Ok(())
        }
    }

    pub fn write_ping(&mut self, data: [u8; 8]) -> Result<(), Error> {
        if self.mode != Mode::H2 {
            return Err(Error::Assertion("cannot ping HTTP/1.x endpoints"));
        }
        self.frame_write(
            Frame::new(FrameType::Ping(Default::default()), StreamId::CONNECTION),
            &data,
        )
    }

    /// Raw frame escape hatch. DATA is refused: it would bypass the
    /// flow-control accounting.
    pub fn write_frame(&mut self, frame: Frame, payload: &[u8]) -> Result<(), Error> {
        if self.mode != Mode::H2 {
            return Err(Error::Assertion("cannot send HTTP2 frames to HTTP/1.x endpoints"));
        }
        if matches!(frame.frame_type, FrameType::Data(_)) {
            return Err(Error::Assertion("cannot send flow-controlled DATA frames this way"));
        }
        self.frame_write(frame, payload)
    }

    /// Under manual flow control, grow a stream's receive window after
    /// consuming delivered data. Ignored otherwise-unknown streams and
    /// h1 connections.
    pub fn open_flow(&mut self, sid: StreamId, delta: u32) -> Result<(), Error> {
        if self.mode != Mode::H2 || sid == StreamId::CONNECTION || delta == 0 {
            // TODO connection-scope manual flow control
            return Ok(());
        }
        if let Some(s) = self.streams.get_mut(sid) {
            s.window_recv += i64::from(delta);
            let payload = delta.to_be_bytes();
            self.frame_write(Frame::new(FrameType::WindowUpdate, sid), &payload)?;
        }
        Ok(())
    }
}
