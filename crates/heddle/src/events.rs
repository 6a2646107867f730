use heddle_h2::{Frame, StreamId};

use crate::{Error, Message};

/// The sink a [`Connection`](crate::Connection) drives: one trait
/// covering both egress bytes and protocol events, invoked
/// synchronously on the feeding/writing thread.
///
/// Every method defaults to "do nothing"; implement only what you
/// need. Returning an `Err` from any method unwinds the current
/// state-machine step with that error, after which the connection
/// should be discarded.
pub trait Events {
    /// Emit bytes to the transport. Buffers must be written (or
    /// queued) in order, as one contiguous byte stream.
    fn writev(&mut self, bufs: &[&[u8]]) -> Result<(), Error> {
        let _ = bufs;
        Ok(())
    }

    /// A stream now exists. Always the first event for an id.
    fn stream_start(&mut self, id: StreamId) -> Result<(), Error> {
        let _ = id;
        Ok(())
    }

    /// The stream is gone; no further events will fire for this id.
    fn stream_end(&mut self, id: StreamId) -> Result<(), Error> {
        let _ = id;
        Ok(())
    }

    /// A complete (non-informational or informational) message head.
    fn message_head(&mut self, id: StreamId, msg: &Message) -> Result<(), Error> {
        let _ = (id, msg);
        Ok(())
    }

    /// A chunk of payload.
    fn message_data(&mut self, id: StreamId, data: &[u8]) -> Result<(), Error> {
        let _ = (id, data);
        Ok(())
    }

    /// The read half finished. Fires at most once per message, after
    /// all of its data.
    fn message_tail(&mut self, id: StreamId, trailers: Option<&Message>) -> Result<(), Error> {
        let _ = (id, trailers);
        Ok(())
    }

    /// The peer promised a pushed request on stream `id`, associated
    /// with `parent`. The promised stream will later carry a response.
    fn message_push(
        &mut self,
        id: StreamId,
        msg: &Message,
        parent: StreamId,
    ) -> Result<(), Error> {
        let _ = (id, msg, parent);
        Ok(())
    }

    /// Raw observation hook: every received h2 frame, after
    /// CONTINUATION reassembly, before dispatch. Includes unknown
    /// frame types.
    fn frame(&mut self, frame: &Frame, payload: &[u8]) -> Result<(), Error> {
        let _ = (frame, payload);
        Ok(())
    }

    /// The peer's SETTINGS have been applied (and ACKed).
    fn settings(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// More data may now be written to stream `id` (0 = the connection
    /// window grew).
    fn flow_increase(&mut self, id: StreamId) -> Result<(), Error> {
        let _ = id;
        Ok(())
    }

    /// A PING we sent was acknowledged.
    fn pong(&mut self, payload: [u8; 8]) -> Result<(), Error> {
        let _ = payload;
        Ok(())
    }

    /// An h1 request carried a non-h2c `upgrade:` header. Return
    /// `Some(response)` (typically code 101) to accept: the response
    /// head is written immediately and the stream switches to raw
    /// until-EOF payload in both directions. Return `None` to decline
    /// and handle the request as ordinary HTTP.
    fn upgrade(&mut self, id: StreamId) -> Result<Option<Message>, Error> {
        let _ = id;
        Ok(None)
    }
}

/// A sink that discards everything; useful for tests and draining.
impl Events for () {}
