#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use heddle::{
    h2::{Frame, PREFACE},
    Connection, Error, Events, Message, StreamId,
};

/// Everything a connection did, flattened for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StreamStart(u32),
    StreamEnd(u32),
    Head {
        id: u32,
        code: u16,
        method: String,
        path: Vec<u8>,
        headers: Vec<(Vec<u8>, Vec<u8>)>,
    },
    Data {
        id: u32,
        data: Vec<u8>,
    },
    Tail {
        id: u32,
        trailers: Option<Vec<(Vec<u8>, Vec<u8>)>>,
    },
    Push {
        id: u32,
        parent: u32,
        method: String,
        path: Vec<u8>,
        headers: Vec<(Vec<u8>, Vec<u8>)>,
    },
    Settings,
    FlowIncrease(u32),
    Pong([u8; 8]),
    Upgrade(u32),
}

fn headers_of(message: &Message) -> Vec<(Vec<u8>, Vec<u8>)> {
    message
        .headers
        .iter()
        .map(|h| (h.name.to_vec(), h.value.to_vec()))
        .collect()
}

#[derive(Default)]
pub struct Record {
    pub out: Vec<u8>,
    pub events: Vec<Event>,
    pub upgrade_response: Option<Message>,
}

/// An [`Events`] impl that records everything. Cloning shares the
/// record, so tests keep a handle while the connection owns the sink.
#[derive(Default, Clone)]
pub struct RecordingSink(pub Rc<RefCell<Record>>);

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.borrow_mut().out)
    }

    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut self.0.borrow_mut().events)
    }

    /// Pre-arm the answer the sink gives to the next `upgrade` query.
    pub fn set_upgrade_response(&self, message: Message) {
        self.0.borrow_mut().upgrade_response = Some(message);
    }

    fn push(&self, event: Event) {
        self.0.borrow_mut().events.push(event);
    }
}

impl Events for RecordingSink {
    fn writev(&mut self, bufs: &[&[u8]]) -> Result<(), Error> {
        let mut inner = self.0.borrow_mut();
        for buf in bufs {
            inner.out.extend_from_slice(buf);
        }
        Ok(())
    }

    fn stream_start(&mut self, id: StreamId) -> Result<(), Error> {
        self.push(Event::StreamStart(id.0));
        Ok(())
    }

    fn stream_end(&mut self, id: StreamId) -> Result<(), Error> {
        self.push(Event::StreamEnd(id.0));
        Ok(())
    }

    fn message_head(&mut self, id: StreamId, msg: &Message) -> Result<(), Error> {
        self.push(Event::Head {
            id: id.0,
            code: msg.code,
            method: msg.method.to_string(),
            path: msg.path.to_vec(),
            headers: headers_of(msg),
        });
        Ok(())
    }

    fn message_data(&mut self, id: StreamId, data: &[u8]) -> Result<(), Error> {
        self.push(Event::Data {
            id: id.0,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn message_tail(&mut self, id: StreamId, trailers: Option<&Message>) -> Result<(), Error> {
        self.push(Event::Tail {
            id: id.0,
            trailers: trailers.map(headers_of),
        });
        Ok(())
    }

    fn message_push(&mut self, id: StreamId, msg: &Message, parent: StreamId) -> Result<(), Error> {
        self.push(Event::Push {
            id: id.0,
            parent: parent.0,
            method: msg.method.to_string(),
            path: msg.path.to_vec(),
            headers: headers_of(msg),
        });
        Ok(())
    }

    fn settings(&mut self) -> Result<(), Error> {
        self.push(Event::Settings);
        Ok(())
    }

    fn flow_increase(&mut self, id: StreamId) -> Result<(), Error> {
        self.push(Event::FlowIncrease(id.0));
        Ok(())
    }

    fn pong(&mut self, payload: [u8; 8]) -> Result<(), Error> {
        self.push(Event::Pong(payload));
        Ok(())
    }

    fn upgrade(&mut self, id: StreamId) -> Result<Option<Message>, Error> {
        let mut inner = self.0.borrow_mut();
        inner.events.push(Event::Upgrade(id.0));
        Ok(inner.upgrade_response.take())
    }
}

/// Serialize a frame header + payload, fixing up the length field.
pub fn frame_bytes(frame: Frame, payload: &[u8]) -> Vec<u8> {
    let mut out = frame
        .with_len(payload.len() as u32)
        .header_bytes()
        .to_vec();
    out.extend_from_slice(payload);
    out
}

/// Parse an outbound byte stream back into frames.
pub fn parse_frames(mut buf: &[u8]) -> Vec<(Frame, Vec<u8>)> {
    let mut frames = Vec::new();
    while !buf.is_empty() {
        let (rest, frame) = Frame::parse(buf).expect("well-formed frame stream");
        let (payload, tail) = rest.split_at(frame.len as usize);
        frames.push((frame, payload.to_vec()));
        buf = tail;
    }
    frames
}

pub fn strip_preface(buf: &[u8]) -> &[u8] {
    assert!(buf.starts_with(PREFACE), "expected client preface");
    &buf[PREFACE.len()..]
}

/// Shuttle bytes between two connections until both go quiet.
pub fn pump(a: &mut Connection<RecordingSink>, b: &mut Connection<RecordingSink>) {
    loop {
        let from_a = a.events().take_output();
        let from_b = b.events().take_output();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        if !from_a.is_empty() {
            b.feed(&from_a).unwrap();
        }
        if !from_b.is_empty() {
            a.feed(&from_b).unwrap();
        }
    }
}

/// Merge adjacent data events for the same stream: chunk boundaries
/// depend on how bytes were fed and are not semantically meaningful.
pub fn coalesce_data(events: Vec<Event>) -> Vec<Event> {
    let mut out: Vec<Event> = Vec::with_capacity(events.len());
    for event in events {
        if let (Some(Event::Data { id, data }), Event::Data { id: next_id, data: next }) =
            (out.last_mut(), &event)
        {
            if id == next_id {
                data.extend_from_slice(next);
                continue;
            }
        }
        out.push(event);
    }
    out
}
