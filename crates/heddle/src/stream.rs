use std::collections::HashMap;

use heddle_h2::StreamId;

/// How many recently locally-closed streams we remember. Frames may
/// legitimately arrive for a stream we reset before the peer saw the
/// reset; entries in this ring make them non-errors.
pub(crate) const RESET_HISTORY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HalfState {
    Headers,
    Data,
    Closed,
}

/// Which endpoint initiated (or would initiate) a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Local,
    Remote,
}

#[derive(Debug)]
pub(crate) struct Stream {
    pub(crate) id: StreamId,
    pub(crate) r_state: HalfState,
    pub(crate) w_state: HalfState,
    pub(crate) writing_chunked: bool,
    pub(crate) reading_head_response: bool,
    /// Flow-window deltas relative to the respective side's
    /// initial_window_size; the effective window is delta + initial.
    pub(crate) window_recv: i64,
    pub(crate) window_send: i64,
    /// Declared content-length minus delivered payload; `None` when
    /// unknown/unbounded.
    pub(crate) remaining_payload: Option<u64>,
}

impl Stream {
    pub(crate) fn new(id: StreamId, side: Side) -> Self {
        // The side that will never read (or write) a stream starts
        // with that half pre-closed: a server receives on odd ids and
        // writes on even (pushed) ids.
        let odd = id.0 % 2 == 1;
        Self {
            id,
            r_state: if odd || side == Side::Remote {
                HalfState::Headers
            } else {
                HalfState::Closed
            },
            w_state: if odd || side == Side::Local {
                HalfState::Headers
            } else {
                HalfState::Closed
            },
            writing_chunked: false,
            reading_head_response: false,
            window_recv: 0,
            window_send: 0,
            remaining_payload: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ResetEntry {
    pub(crate) id: StreamId,
    /// Whether the read half was still waiting for HEADERS when we
    /// closed the stream. Such a stream may still legitimately receive
    /// HEADERS (which must be HPACK-decoded and discarded), but never
    /// DATA; a stream reset mid-body is the other way around.
    pub(crate) was_reading_headers: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ResetHistory {
    entries: [Option<ResetEntry>; RESET_HISTORY],
    next: usize,
}

impl ResetHistory {
    pub(crate) fn record(&mut self, id: StreamId, was_reading_headers: bool) {
        self.entries[self.next] = Some(ResetEntry {
            id,
            was_reading_headers,
        });
        self.next = (self.next + 1) % RESET_HISTORY;
    }

    /// Whether a frame of the given shape on `id` should be silently
    /// dropped rather than treated as a protocol violation.
    pub(crate) fn tolerates(&self, id: StreamId, is_headers: bool, is_data: bool) -> bool {
        self.entries.iter().flatten().any(|e| {
            e.id == id
                && if e.was_reading_headers {
                    !is_data
                } else {
                    !is_headers
                }
        })
    }
}

/// All per-connection stream bookkeeping: the records themselves plus
/// the monotonic id counters, per-side open-stream counts, and the
/// reset history.
#[derive(Debug)]
pub(crate) struct StreamTable {
    streams: HashMap<StreamId, Stream>,
    last_local: StreamId,
    last_remote: StreamId,
    count_local: usize,
    count_remote: usize,
    pub(crate) reset_history: ResetHistory,
}

impl Default for StreamTable {
    fn default() -> Self {
        Self {
            streams: HashMap::new(),
            last_local: StreamId(0),
            last_remote: StreamId(0),
            count_local: 0,
            count_remote: 0,
            reset_history: ResetHistory::default(),
        }
    }
}

impl StreamTable {
    pub(crate) fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    /// Insert a pre-validated stream record and bump the side's
    /// counters. Validation (parity, monotonicity, limits) happens in
    /// the connection, which knows the settings.
    pub(crate) fn insert(&mut self, stream: Stream, side: Side) {
        match side {
            Side::Local => {
                self.last_local = stream.id;
                self.count_local += 1;
            }
            Side::Remote => {
                self.last_remote = stream.id;
                self.count_remote += 1;
            }
        }
        self.streams.insert(stream.id, stream);
    }

    /// Remove a stream record, decrementing the side's open count.
    pub(crate) fn remove(&mut self, id: StreamId, side: Side) -> Option<Stream> {
        let stream = self.streams.remove(&id)?;
        match side {
            Side::Local => self.count_local -= 1,
            Side::Remote => self.count_remote -= 1,
        }
        Some(stream)
    }

    pub(crate) fn last(&self, side: Side) -> StreamId {
        match side {
            Side::Local => self.last_local,
            Side::Remote => self.last_remote,
        }
    }

    pub(crate) fn count(&self, side: Side) -> usize {
        match side {
            Side::Local => self.count_local,
            Side::Remote => self.count_remote,
        }
    }

    pub(crate) fn ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }
}
