//! HTTP/2 frame dispatch: per-type validation and semantics, header
//! block reassembly and message normalization.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use heddle_h2::{
    ContinuationFlags, Frame, FrameType, GoAway, HeadersFlags, KnownErrorCode, PingFlags,
    PushPromiseFlags, RawFrameType, Settings, SettingsError, SettingsFlags, StreamId,
    WindowUpdate, FRAME_HEADER_LEN,
};

use super::{Connection, Kind, State, Step, MAX_CONTINUATIONS};
use crate::{
    stream::{HalfState, Side},
    types::{Header, Headers, Message, Method, MAX_HEADERS},
    util::{is_informational, parse_decimal, HEADER_TRANSFORM},
    Error, Events,
};

impl<E: Events> Connection<E> {
    /// One full frame's worth of buffered bytes, parsed and dispatched.
    pub(super) fn when_h2_frame(&mut self) -> Result<Step, Error> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(Step::Pending);
        }
        let frame = match Frame::parse(&self.buffer[..]) {
            Ok((_, frame)) => frame,
            Err(_) => return Err(Error::Protocol("bad frame header")),
        };
        if frame.len > self.local_settings.max_frame_size {
            return self.connection_error(KnownErrorCode::FrameSizeError, "frame too big");
        }
        if self.buffer.len() < FRAME_HEADER_LEN + frame.len as usize {
            return Ok(Step::Pending);
        }

        let needs_reassembly = matches!(
            frame.frame_type,
            FrameType::Headers(_) | FrameType::PushPromise(_)
        ) && !frame.is_end_headers();

        let (frame, payload) = if needs_reassembly {
            match self.gather_header_block(frame)? {
                Some(merged) => merged,
                None => return Ok(Step::Pending),
            }
        } else {
            self.buffer.advance(FRAME_HEADER_LEN);
            let payload = self.buffer.split_to(frame.len as usize).freeze();
            (frame, payload)
        };

        debug!(?frame, "<");
        self.events.frame(&frame, &payload)?;
        self.dispatch(frame, payload)?;
        Ok(Step::Transition(State::H2Frame))
    }

    /// A HEADERS/PUSH_PROMISE without END_HEADERS owns the connection
    /// until its CONTINUATIONs complete the block. Returns the merged
    /// frame (END_HEADERS set) and block, or `None` while frames are
    /// still in flight.
    fn gather_header_block(&mut self, head: Frame) -> Result<Option<(Frame, Bytes)>, Error> {
        let head_len = head.len as usize;
        let mut offset = FRAME_HEADER_LEN + head_len;
        let mut parts: Vec<(usize, usize)> = Vec::new();
        let mut count = 0;
        loop {
            count += 1;
            if count > MAX_CONTINUATIONS {
                return self
                    .connection_error(KnownErrorCode::EnhanceYourCalm, "too many CONTINUATIONs");
            }
            if self.buffer.len() < offset + FRAME_HEADER_LEN {
                return Ok(None);
            }
            let hdr = &self.buffer[offset..offset + FRAME_HEADER_LEN];
            let len = u32::from_be_bytes([0, hdr[0], hdr[1], hdr[2]]) as usize;
            let (ty, flags) = (hdr[3], hdr[4]);
            let sid = u32::from_be_bytes([hdr[5], hdr[6], hdr[7], hdr[8]]) & 0x7FFF_FFFF;
            if len > self.local_settings.max_frame_size as usize {
                return self.connection_error(KnownErrorCode::FrameSizeError, "frame too big");
            }
            if ty != RawFrameType::Continuation.repr() {
                return self
                    .connection_error(KnownErrorCode::ProtocolError, "expected CONTINUATION");
            }
            if flags & !(ContinuationFlags::EndHeaders as u8) != 0 {
                return self
                    .connection_error(KnownErrorCode::ProtocolError, "invalid CONTINUATION flags");
            }
            if sid != head.stream_id.0 {
                return self
                    .connection_error(KnownErrorCode::ProtocolError, "invalid CONTINUATION stream");
            }
            if self.buffer.len() < offset + FRAME_HEADER_LEN + len {
                return Ok(None);
            }
            parts.push((offset + FRAME_HEADER_LEN, len));
            offset += FRAME_HEADER_LEN + len;
            if flags != 0 {
                break;
            }
        }

        let total = head_len + parts.iter().map(|(_, len)| len).sum::<usize>();
        let mut block = BytesMut::with_capacity(total);
        block.extend_from_slice(&self.buffer[FRAME_HEADER_LEN..FRAME_HEADER_LEN + head_len]);
        for (start, len) in parts {
            block.extend_from_slice(&self.buffer[start..start + len]);
        }
        self.buffer.advance(offset);

        let frame_type = match head.frame_type {
            FrameType::Headers(f) => FrameType::Headers(f | HeadersFlags::EndHeaders),
            FrameType::PushPromise(f) => {
                FrameType::PushPromise(f | PushPromiseFlags::EndHeaders)
            }
            other => other,
        };
        let block = block.freeze();
        let frame = Frame {
            frame_type,
            reserved: head.reserved,
            stream_id: head.stream_id,
            len: block.len() as u32,
        };
        Ok(Some((frame, block)))
    }

    fn dispatch(&mut self, frame: Frame, payload: Bytes) -> Result<(), Error> {
        match frame.frame_type {
            FrameType::Data(_) => self.handle_data(frame, payload),
            FrameType::Headers(_) => self.handle_headers(frame, payload),
            FrameType::Priority => {
                let mut payload = payload;
                self.strip_priority(&frame, &mut payload)
            }
            FrameType::RstStream => self.handle_rst_stream(frame, payload),
            FrameType::Settings(_) => self.handle_settings(frame, payload),
            FrameType::PushPromise(_) => self.handle_push_promise(frame, payload),
            FrameType::Ping(_) => self.handle_ping(frame, payload),
            FrameType::GoAway => self.handle_goaway(frame, payload),
            FrameType::WindowUpdate => self.handle_window_update(frame, payload),
            FrameType::Continuation(_) => {
                // a HEADERS would have swallowed it during reassembly
                self.connection_error(KnownErrorCode::ProtocolError, "unexpected CONTINUATION")
            }
            FrameType::Unknown(ft) => {
                trace!(ty = ft.ty, flags = ft.flags, "ignoring unknown frame");
                Ok(())
            }
        }
    }

    /// Frames may arrive on streams we recently reset; those are
    /// dropped. Anything else on an unknown stream kills the
    /// connection.
    fn frame_on_invalid_stream(&mut self, frame: &Frame) -> Result<(), Error> {
        let sid = frame.stream_id;
        if sid != StreamId::CONNECTION && sid <= self.streams.last(self.stream_side(sid)) {
            let is_headers = matches!(frame.frame_type, FrameType::Headers(_));
            let is_data = matches!(frame.frame_type, FrameType::Data(_));
            if self.streams.reset_history.tolerates(sid, is_headers, is_data) {
                return Ok(());
            }
        }
        self.connection_error(KnownErrorCode::ProtocolError, "invalid stream")
    }

    fn strip_padding(&mut self, frame: &Frame, payload: &mut Bytes) -> Result<(), Error> {
        if frame.has_padding() {
            if payload.is_empty() {
                return self.connection_error(KnownErrorCode::FrameSizeError, "no padding found");
            }
            let padding = payload[0] as usize + 1;
            if padding > payload.len() {
                return self
                    .connection_error(KnownErrorCode::ProtocolError, "more padding than data");
            }
            payload.advance(1);
            payload.truncate(payload.len() - (padding - 1));
        }
        Ok(())
    }

    /// HEADERS may carry a priority spec; PRIORITY frames are nothing
    /// but one. Either way it is validated and then ignored (stream
    /// prioritization is not implemented).
    fn strip_priority(&mut self, frame: &Frame, payload: &mut Bytes) -> Result<(), Error> {
        let standalone = matches!(frame.frame_type, FrameType::Priority);
        let flagged = matches!(
            frame.frame_type,
            FrameType::Headers(f) if f.contains(HeadersFlags::Priority)
        );
        if !standalone && !flagged {
            return Ok(());
        }
        if payload.len() < 5 || (standalone && payload.len() != 5) {
            return self.connection_error(KnownErrorCode::FrameSizeError, "PRIORITY of invalid size");
        }
        if frame.stream_id == StreamId::CONNECTION {
            return self.connection_error(KnownErrorCode::ProtocolError, "PRIORITY on stream 0");
        }
        let dep =
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
        if dep == frame.stream_id.0 {
            return if self.streams.get(frame.stream_id).is_some() {
                self.stream_error(frame.stream_id, KnownErrorCode::ProtocolError)
            } else {
                self.connection_error(KnownErrorCode::ProtocolError, "PRIORITY depends on itself")
            };
        }
        payload.advance(5);
        Ok(())
    }

    fn handle_data(&mut self, frame: Frame, mut payload: Bytes) -> Result<(), Error> {
        // for flow-control purposes padding counts
        let flow = payload.len() as u32;
        self.strip_padding(&frame, &mut payload)?;

        // frames on invalid streams still count against the
        // connection-scope window, which is replenished right away
        if flow > 0 {
            let buf = flow.to_be_bytes();
            self.frame_write(
                Frame::new(FrameType::WindowUpdate, StreamId::CONNECTION),
                &buf,
            )?;
        }

        let sid = frame.stream_id;
        let (r_state, window_recv) = match self.streams.get(sid) {
            Some(s) => (s.r_state, s.window_recv),
            None => return self.frame_on_invalid_stream(&frame),
        };
        if r_state != HalfState::Data {
            return self.stream_error(sid, KnownErrorCode::StreamClosed);
        }
        if flow > 0
            && i64::from(flow) > window_recv + i64::from(self.local_settings.initial_window_size)
        {
            return self.stream_error(sid, KnownErrorCode::FlowControlError);
        }

        let len = payload.len();
        if let Some(s) = self.streams.get_mut(sid) {
            if let Some(remaining) = s.remaining_payload {
                // an overrun leaves a nonzero remainder, so END_STREAM
                // still reports the content-length mismatch
                s.remaining_payload =
                    Some(remaining.checked_sub(len as u64).unwrap_or(u64::MAX));
            }
        }
        if !payload.is_empty() {
            self.events.message_data(sid, &payload)?;
        }
        if frame.is_end_stream() {
            return self.handle_end_stream(sid, None);
        }

        let mut replenish = flow;
        if self.manual_flow_control {
            if let Some(s) = self.streams.get_mut(sid) {
                s.window_recv -= len as i64;
            }
            // padding is replenished right away even in manual mode
            replenish = flow - len as u32;
        }
        if replenish > 0 {
            let buf = replenish.to_be_bytes();
            self.frame_write(Frame::new(FrameType::WindowUpdate, sid), &buf)?;
        }
        Ok(())
    }

    /// The read half finished: verify content-length, fire the tail,
    /// and drop the stream if the write half is done too.
    pub(super) fn handle_end_stream(
        &mut self,
        sid: StreamId,
        trailers: Option<&Message>,
    ) -> Result<(), Error> {
        let (head_response, remaining) = match self.streams.get(sid) {
            Some(s) => (s.reading_head_response, s.remaining_payload),
            None => return Ok(()),
        };
        if !head_response && matches!(remaining, Some(n) if n != 0) {
            return self.stream_error(sid, KnownErrorCode::ProtocolError);
        }
        self.events.message_tail(sid, trailers)?;
        if let Some(s) = self.streams.get_mut(sid) {
            s.r_state = HalfState::Closed;
            if s.w_state == HalfState::Closed {
                return self.stream_end(sid);
            }
        }
        Ok(())
    }

    fn handle_headers(&mut self, frame: Frame, mut payload: Bytes) -> Result<(), Error> {
        self.strip_padding(&frame, &mut payload)?;
        self.strip_priority(&frame, &mut payload)?;

        let sid = frame.stream_id;
        let end_stream = frame.is_end_stream();
        // `None` still decodes the block (the compression state must
        // advance) but discards the message.
        let mut target = Some(sid);

        match self.streams.get(sid).map(|s| s.r_state) {
            None => {
                if self.kind() == Kind::Client || sid <= self.streams.last(Side::Remote) {
                    self.frame_on_invalid_stream(&frame)?;
                    target = None;
                } else if self.goaway_sent.is_some()
                    || self.streams.count(Side::Remote) as u64
                        >= u64::from(self.local_settings.max_concurrent_streams)
                {
                    self.write_rst_stream_by_id(sid, KnownErrorCode::RefusedStream)?;
                    target = None;
                } else {
                    self.stream_new(sid, Side::Remote)?;
                }
            }
            Some(HalfState::Data) => {
                if !end_stream {
                    return self.connection_error(
                        KnownErrorCode::ProtocolError,
                        "trailers without END_STREAM",
                    );
                }
            }
            Some(HalfState::Headers) => {}
            Some(HalfState::Closed) => {
                return self
                    .connection_error(KnownErrorCode::ProtocolError, "unexpected HEADERS");
            }
        }

        self.handle_header_block(target, &frame, payload)
    }

    fn handle_push_promise(&mut self, frame: Frame, mut payload: Bytes) -> Result<(), Error> {
        self.strip_padding(&frame, &mut payload)?;
        if payload.len() < 4 {
            return self.connection_error(KnownErrorCode::FrameSizeError, "PUSH_PROMISE too short");
        }
        let parent = frame.stream_id;
        let parent_open = self
            .streams
            .get(parent)
            .is_some_and(|s| s.r_state != HalfState::Closed);
        if !self.local_settings.enable_push || !self.stream_is_local(parent) || !parent_open {
            return self
                .connection_error(KnownErrorCode::ProtocolError, "unexpected PUSH_PROMISE");
        }
        let promised = StreamId(
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF,
        );
        self.stream_new(promised, Side::Remote)?;
        payload.advance(4);
        self.handle_header_block(Some(promised), &frame, payload)
    }

    /// HPACK-decode a complete header block, then run message
    /// normalization against `target` (if it still exists).
    fn handle_header_block(
        &mut self,
        target: Option<StreamId>,
        frame: &Frame,
        payload: Bytes,
    ) -> Result<(), Error> {
        if !frame.is_end_headers() {
            return Err(Error::Assertion(
                "HEADERS/PUSH_PROMISE not merged with CONTINUATION",
            ));
        }

        let mut fields: Vec<(Bytes, Bytes)> = Vec::new();
        let mut overflow = false;
        let result = self.hpack_dec.decode_with_cb(&payload, |name, value| {
            if fields.len() >= MAX_HEADERS + 4 {
                overflow = true;
                return;
            }
            fields.push((
                Bytes::copy_from_slice(&name),
                Bytes::copy_from_slice(&value),
            ));
        });
        if let Err(e) = result {
            // the dynamic table is desynchronized; nothing to salvage
            self.write_goaway(KnownErrorCode::CompressionError)?;
            return Err(e.into());
        }
        if overflow {
            self.write_goaway(KnownErrorCode::CompressionError)?;
            return Err(Error::Protocol("too many headers"));
        }

        match target {
            None => Ok(()),
            Some(sid) => self.handle_message(sid, frame, fields),
        }
    }

    /// Message normalization: partition pseudo-headers, project them
    /// onto the message record, validate the regular fields, then fire
    /// the head (or push, or trailers-tail).
    fn handle_message(
        &mut self,
        sid: StreamId,
        frame: &Frame,
        fields: Vec<(Bytes, Bytes)>,
    ) -> Result<(), Error> {
        let is_push = matches!(frame.frame_type, FrameType::PushPromise(_));
        let is_response = self.kind() == Kind::Client && !is_push;
        let end_stream = frame.is_end_stream();

        let r_state = match self.streams.get(sid) {
            Some(s) => s.r_state,
            None => return Ok(()),
        };
        let is_trailers = r_state != HalfState::Headers;

        let pseudo_count = fields
            .iter()
            .take_while(|(name, _)| name.starts_with(b":"))
            .count();
        if is_trailers && pseudo_count > 0 {
            return self.stream_error(sid, KnownErrorCode::ProtocolError);
        }

        let mut code: u16 = 0;
        let mut method: Option<Bytes> = None;
        let mut path: Option<Bytes> = None;
        let mut has_scheme = false;
        let mut has_authority = false;
        // :scheme and :authority stay visible to the host
        let mut kept_pseudo: Vec<Header> = Vec::new();

        for (name, value) in &fields[..pseudo_count] {
            match &name[..] {
                b":status" if is_response && code == 0 => match parse_decimal(value) {
                    Some(n) if n <= 0xFFFF => code = n as u16,
                    _ => return self.stream_error(sid, KnownErrorCode::ProtocolError),
                },
                b":path" if !is_response && path.is_none() => path = Some(value.clone()),
                b":method" if !is_response && method.is_none() => method = Some(value.clone()),
                b":authority" if !is_response && !has_authority => {
                    has_authority = true;
                    kept_pseudo.push(Header::new(name.clone(), value.clone()));
                }
                b":scheme" if !is_response && !has_scheme => {
                    has_scheme = true;
                    kept_pseudo.push(Header::new(name.clone(), value.clone()));
                }
                // unknown pseudo-headers and duplicates of the
                // recognised ones
                _ => return self.stream_error(sid, KnownErrorCode::ProtocolError),
            }
        }

        let mut content_length: Option<u64> = None;
        for (name, value) in &fields[pseudo_count..] {
            // names must arrive lowercase in h2; the table also rejects
            // ':', so a pseudo-header after a regular field lands here
            if name
                .iter()
                .any(|&b| HEADER_TRANSFORM[b as usize] != b || b == 0)
            {
                return self.stream_error(sid, KnownErrorCode::ProtocolError);
            }
            if &name[..] == b"connection" {
                return self.stream_error(sid, KnownErrorCode::ProtocolError);
            }
            if &name[..] == b"te" && &value[..] != b"trailers" {
                return self.stream_error(sid, KnownErrorCode::ProtocolError);
            }
            if &name[..] == b"content-length" {
                match parse_decimal(value) {
                    None => return self.stream_error(sid, KnownErrorCode::ProtocolError),
                    Some(n) => {
                        if content_length.is_some_and(|prev| prev != n) {
                            return self.stream_error(sid, KnownErrorCode::ProtocolError);
                        }
                        content_length = Some(n);
                    }
                }
            }
        }

        if is_trailers {
            // END_STREAM was verified before decoding; content-length
            // in trailers does not amend the stream's accounting
            let trailers = Message {
                code: 0,
                method: Method::Get,
                path: Bytes::new(),
                headers: fields[pseudo_count..]
                    .iter()
                    .map(|(name, value)| Header::new(name.clone(), value.clone()))
                    .collect(),
            };
            return self.handle_end_stream(sid, Some(&trailers));
        }

        if let Some(s) = self.streams.get_mut(sid) {
            s.remaining_payload = content_length;
        }

        // requests must carry exactly one valid :method, :scheme and
        // :path, unless CONNECT; responses must carry :status
        let malformed = if is_response {
            code == 0
        } else {
            method.as_deref() != Some(&b"CONNECT"[..])
                && (path.as_deref().map_or(true, <[u8]>::is_empty)
                    || method.as_deref().map_or(true, <[u8]>::is_empty)
                    || !has_scheme)
        };
        if malformed {
            return self.stream_error(sid, KnownErrorCode::ProtocolError);
        }

        let mut headers = Headers::default();
        for header in kept_pseudo {
            headers.push(header);
        }
        for (name, value) in &fields[pseudo_count..] {
            headers.push(Header::new(name.clone(), value.clone()));
        }
        let message = Message {
            code,
            method: method.as_deref().map(Method::from_bytes).unwrap_or_default(),
            path: path.unwrap_or_default(),
            headers,
        };

        if is_push {
            // the promised stream stays in HEADERS, awaiting a response
            return self.events.message_push(sid, &message, frame.stream_id);
        }

        if !is_informational(code) {
            if let Some(s) = self.streams.get_mut(sid) {
                s.r_state = HalfState::Data;
            }
        } else if end_stream || content_length.is_some() {
            // 1xx responses neither end the stream nor carry a payload
            return self.stream_error(sid, KnownErrorCode::ProtocolError);
        }

        self.events.message_head(sid, &message)?;

        if end_stream {
            return self.handle_end_stream(sid, None);
        }
        Ok(())
    }

    fn handle_rst_stream(&mut self, frame: Frame, payload: Bytes) -> Result<(), Error> {
        if self.streams.get(frame.stream_id).is_none() {
            return self.frame_on_invalid_stream(&frame);
        }
        if payload.len() != 4 {
            return self.connection_error(KnownErrorCode::FrameSizeError, "bad RST_STREAM");
        }
        // TODO surface the carried error code through stream_end
        self.stream_end(frame.stream_id)
    }

    fn handle_settings(&mut self, frame: Frame, payload: Bytes) -> Result<(), Error> {
        if frame.stream_id != StreamId::CONNECTION {
            return self.connection_error(KnownErrorCode::ProtocolError, "SETTINGS on a stream");
        }
        if let FrameType::Settings(flags) = frame.frame_type {
            if flags.contains(SettingsFlags::Ack) {
                if !payload.is_empty() {
                    return self
                        .connection_error(KnownErrorCode::FrameSizeError, "bad SETTINGS ack");
                }
                trace!("peer acknowledged our settings");
                return Ok(());
            }
        }
        if payload.len() % 6 != 0 {
            return self.connection_error(KnownErrorCode::FrameSizeError, "bad SETTINGS");
        }

        let old_window = self.remote_settings.initial_window_size;
        let mut updated = self.remote_settings;
        if let Err(e) = Settings::parse(&payload, |setting, value| updated.apply(setting, value))
        {
            let (error_code, msg) = match e {
                SettingsError::EnablePushOutOfBounds(_) => {
                    (KnownErrorCode::ProtocolError, "enable_push out of bounds")
                }
                SettingsError::InitialWindowSizeTooLarge(_) => (
                    KnownErrorCode::FlowControlError,
                    "initial_window_size too big",
                ),
                SettingsError::MaxFrameSizeOutOfBounds(_) => {
                    (KnownErrorCode::ProtocolError, "max_frame_size out of bounds")
                }
            };
            return self.connection_error(error_code, msg);
        }
        self.remote_settings = updated;

        if updated.initial_window_size > old_window {
            // stream send windows are deltas, so they all just grew
            self.events.flow_increase(StreamId::CONNECTION)?;
        }

        // never let the encoder's table outgrow what either side is
        // willing to keep
        let limit = updated
            .header_table_size
            .min(self.local_settings.header_table_size);
        self.hpack_enc.set_max_table_size(limit as usize);

        self.frame_write(
            Frame::new(
                FrameType::Settings(SettingsFlags::Ack.into()),
                StreamId::CONNECTION,
            ),
            &[],
        )?;
        self.events.settings()
    }

    fn handle_ping(&mut self, frame: Frame, payload: Bytes) -> Result<(), Error> {
        if frame.stream_id != StreamId::CONNECTION {
            return self.connection_error(KnownErrorCode::ProtocolError, "PING on a stream");
        }
        if payload.len() != 8 {
            return self.connection_error(KnownErrorCode::FrameSizeError, "bad PING frame");
        }
        if let FrameType::Ping(flags) = frame.frame_type {
            if flags.contains(PingFlags::Ack) {
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload);
                return self.events.pong(data);
            }
        }
        self.frame_write(
            Frame::new(FrameType::Ping(PingFlags::Ack.into()), StreamId::CONNECTION),
            &payload,
        )
    }

    fn handle_goaway(&mut self, frame: Frame, payload: Bytes) -> Result<(), Error> {
        if frame.stream_id != StreamId::CONNECTION {
            return self.connection_error(KnownErrorCode::ProtocolError, "GOAWAY on a stream");
        }
        if payload.len() < 8 {
            return self.connection_error(KnownErrorCode::FrameSizeError, "bad GOAWAY");
        }
        let goaway = match GoAway::parse(&payload) {
            Ok((_, goaway)) => goaway,
            Err(_) => return self.connection_error(KnownErrorCode::FrameSizeError, "bad GOAWAY"),
        };
        if KnownErrorCode::try_from(goaway.error_code) != Ok(KnownErrorCode::NoError) {
            debug!(code = ?goaway.error_code, "peer tore the connection down");
            return Err(Error::Protocol("peer disconnected with an error"));
        }
        // TODO clean shutdown: refuse local streams above last_stream_id
        Err(Error::Disconnect("peer disconnected"))
    }

    fn handle_window_update(&mut self, frame: Frame, payload: Bytes) -> Result<(), Error> {
        if payload.len() != 4 {
            return self.connection_error(KnownErrorCode::FrameSizeError, "bad WINDOW_UPDATE");
        }
        let increment = match WindowUpdate::parse(&payload) {
            Ok((_, update)) => update.increment,
            Err(_) => {
                return self.connection_error(KnownErrorCode::FrameSizeError, "bad WINDOW_UPDATE")
            }
        };
        if increment == 0 {
            return self
                .connection_error(KnownErrorCode::ProtocolError, "window increment out of bounds");
        }

        let sid = frame.stream_id;
        let max = i64::from(Settings::MAX_INITIAL_WINDOW_SIZE);
        if sid == StreamId::CONNECTION {
            self.window_send += i64::from(increment);
            if self.window_send > max {
                return self
                    .connection_error(KnownErrorCode::FlowControlError, "window increment too big");
            }
        } else {
            let initial = i64::from(self.remote_settings.initial_window_size);
            match self.streams.get_mut(sid) {
                Some(s) => {
                    s.window_send += i64::from(increment);
                    if s.window_send + initial > max {
                        return self.stream_error(sid, KnownErrorCode::FlowControlError);
                    }
                }
                None => return self.frame_on_invalid_stream(&frame),
            }
        }
        self.events.flow_increase(sid)
    }
}
