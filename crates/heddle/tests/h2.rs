//! HTTP/2 server-side scenarios: handshake, frame semantics, flow
//! control, reset tolerance.

mod helpers;

use helpers::*;

use heddle::{
    h2::{
        ContinuationFlags, DataFlags, Frame, FrameType, HeadersFlags, KnownErrorCode, PingFlags,
        SettingsFlags, PREFACE,
    },
    Connection, Error, Headers, Message, StreamId, Version,
};

fn h2_server() -> (Connection<RecordingSink>, RecordingSink) {
    let sink = RecordingSink::new();
    let mut conn = Connection::server(sink.clone());
    conn.begin(Version::Http2).unwrap();
    (conn, sink)
}

fn empty_settings_frame() -> Vec<u8> {
    frame_bytes(
        Frame::new(FrameType::Settings(Default::default()), StreamId::CONNECTION),
        &[],
    )
}

fn settings_frame(pairs: &[(u16, u32)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (id, value) in pairs {
        payload.extend_from_slice(&id.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
    }
    frame_bytes(
        Frame::new(FrameType::Settings(Default::default()), StreamId::CONNECTION),
        &payload,
    )
}

/// Complete the preface + SETTINGS exchange and drain the records.
fn handshake(conn: &mut Connection<RecordingSink>, sink: &RecordingSink) {
    let mut bytes = PREFACE.to_vec();
    bytes.extend_from_slice(&empty_settings_frame());
    conn.feed(&bytes).unwrap();
    sink.take_output();
    sink.take_events();
}

fn request_block(
    encoder: &mut loona_hpack::Encoder<'_>,
    path: &[u8],
    extra: &[(&[u8], &[u8])],
) -> Vec<u8> {
    let mut fields: Vec<(&[u8], &[u8])> = vec![
        (&b":method"[..], &b"GET"[..]),
        (&b":scheme"[..], &b"http"[..]),
        (&b":path"[..], path),
        (&b":authority"[..], &b"h"[..]),
    ];
    fields.extend_from_slice(extra);
    encoder.encode(fields)
}

#[test]
fn server_handshake() {
    let (mut conn, sink) = h2_server();

    let mut bytes = PREFACE.to_vec();
    bytes.extend_from_slice(&empty_settings_frame());
    conn.feed(&bytes).unwrap();

    let frames = parse_frames(&sink.take_output());
    assert_eq!(frames.len(), 2);

    // our initial SETTINGS carry the delta from the standard defaults:
    // only the concurrent-stream cap
    match frames[0].0.frame_type {
        FrameType::Settings(flags) => assert!(!flags.contains(SettingsFlags::Ack)),
        other => panic!("expected SETTINGS, got {other:?}"),
    }
    assert_eq!(frames[0].1, [0x00, 0x03, 0x00, 0x00, 0x04, 0x00]);

    // and the peer's SETTINGS get ACKed
    match frames[1].0.frame_type {
        FrameType::Settings(flags) => assert!(flags.contains(SettingsFlags::Ack)),
        other => panic!("expected SETTINGS ack, got {other:?}"),
    }
    assert!(frames[1].1.is_empty());

    assert_eq!(sink.take_events(), vec![Event::Settings]);
}

#[test]
fn handshake_requires_settings_first() {
    let (mut conn, _sink) = h2_server();
    let mut bytes = PREFACE.to_vec();
    bytes.extend_from_slice(&frame_bytes(
        Frame::new(FrameType::Ping(Default::default()), StreamId::CONNECTION),
        &[0; 8],
    ));
    assert!(matches!(conn.feed(&bytes), Err(Error::Protocol(_))));
}

#[test]
fn bad_preface_is_rejected_early() {
    let (mut conn, _sink) = h2_server();
    assert!(matches!(
        conn.feed(b"GET / HTTP/1.1\r\n"),
        Err(Error::Protocol(_))
    ));
}

#[test]
fn get_request_and_response() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    let mut encoder = loona_hpack::Encoder::new();
    let block = request_block(&mut encoder, b"/p", &[]);
    conn.feed(&frame_bytes(
        Frame::new(
            FrameType::Headers(HeadersFlags::EndHeaders | HeadersFlags::EndStream),
            StreamId(1),
        ),
        &block,
    ))
    .unwrap();

    assert_eq!(
        sink.take_events(),
        vec![
            Event::StreamStart(1),
            Event::Head {
                id: 1,
                code: 0,
                method: "GET".into(),
                path: b"/p".to_vec(),
                headers: vec![
                    (b":scheme".to_vec(), b"http".to_vec()),
                    (b":authority".to_vec(), b"h".to_vec()),
                ],
            },
            Event::Tail {
                id: 1,
                trailers: None
            },
        ]
    );

    let mut headers = Headers::default();
    headers.append(&b"content-length"[..], &b"2"[..]);
    conn.write_head(StreamId(1), &Message::response(200, headers), false)
        .unwrap();
    conn.write_data(StreamId(1), b"hi", true).unwrap();

    let frames = parse_frames(&sink.take_output());
    assert_eq!(frames.len(), 2);
    assert!(frames[0].0.is_end_headers());
    assert!(!frames[0].0.is_end_stream());
    assert_eq!(frames[1].1, b"hi");
    assert!(frames[1].0.is_end_stream());

    assert_eq!(sink.take_events(), vec![Event::StreamEnd(1)]);
}

#[test]
fn request_with_body_checks_content_length() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    let mut encoder = loona_hpack::Encoder::new();
    let block = request_block(
        &mut encoder,
        b"/upload",
        &[(&b"content-length"[..], &b"3"[..])],
    );
    conn.feed(&frame_bytes(
        Frame::new(FrameType::Headers(HeadersFlags::EndHeaders.into()), StreamId(1)),
        &block,
    ))
    .unwrap();
    conn.feed(&frame_bytes(
        Frame::new(
            FrameType::Data(DataFlags::EndStream.into()),
            StreamId(1),
        ),
        b"abc",
    ))
    .unwrap();

    let events = sink.take_events();
    assert!(events.contains(&Event::Data {
        id: 1,
        data: b"abc".to_vec()
    }));
    assert!(events.contains(&Event::Tail {
        id: 1,
        trailers: None
    }));
}

#[test]
fn content_length_mismatch_resets_the_stream() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    let mut encoder = loona_hpack::Encoder::new();
    let block = request_block(
        &mut encoder,
        b"/upload",
        &[(&b"content-length"[..], &b"5"[..])],
    );
    conn.feed(&frame_bytes(
        Frame::new(FrameType::Headers(HeadersFlags::EndHeaders.into()), StreamId(1)),
        &block,
    ))
    .unwrap();
    sink.take_events();
    sink.take_output();

    conn.feed(&frame_bytes(
        Frame::new(
            FrameType::Data(DataFlags::EndStream.into()),
            StreamId(1),
        ),
        b"ab",
    ))
    .unwrap();

    let frames = parse_frames(&sink.take_output());
    let (rst, payload) = frames.last().unwrap();
    assert!(matches!(rst.frame_type, FrameType::RstStream));
    assert_eq!(
        payload[..4],
        (KnownErrorCode::ProtocolError as u32).to_be_bytes()
    );
    // the data itself was still delivered before the mismatch surfaced
    let events = sink.take_events();
    assert!(events.contains(&Event::Data {
        id: 1,
        data: b"ab".to_vec()
    }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::Tail { .. })));
}

#[test]
fn trailers_arrive_in_the_tail() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    let mut encoder = loona_hpack::Encoder::new();
    let block = request_block(
        &mut encoder,
        b"/upload",
        &[(&b"content-length"[..], &b"3"[..])],
    );
    conn.feed(&frame_bytes(
        Frame::new(FrameType::Headers(HeadersFlags::EndHeaders.into()), StreamId(1)),
        &block,
    ))
    .unwrap();
    conn.feed(&frame_bytes(
        Frame::new(FrameType::Data(Default::default()), StreamId(1)),
        b"abc",
    ))
    .unwrap();

    let trailer_block = encoder.encode(vec![(&b"x-checksum"[..], &b"900150"[..])]);
    conn.feed(&frame_bytes(
        Frame::new(
            FrameType::Headers(HeadersFlags::EndHeaders | HeadersFlags::EndStream),
            StreamId(1),
        ),
        &trailer_block,
    ))
    .unwrap();

    let events = sink.take_events();
    assert_eq!(
        events.last(),
        Some(&Event::Tail {
            id: 1,
            trailers: Some(vec![(b"x-checksum".to_vec(), b"900150".to_vec())]),
        })
    );
}

#[test]
fn trailers_without_end_stream_kill_the_connection() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    let mut encoder = loona_hpack::Encoder::new();
    let block = request_block(&mut encoder, b"/upload", &[]);
    conn.feed(&frame_bytes(
        Frame::new(FrameType::Headers(HeadersFlags::EndHeaders.into()), StreamId(1)),
        &block,
    ))
    .unwrap();

    let trailer_block = encoder.encode(vec![(&b"x-checksum"[..], &b"1"[..])]);
    let err = conn
        .feed(&frame_bytes(
            Frame::new(FrameType::Headers(HeadersFlags::EndHeaders.into()), StreamId(1)),
            &trailer_block,
        ))
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));

    let frames = parse_frames(&sink.take_output());
    assert!(matches!(
        frames.last().unwrap().0.frame_type,
        FrameType::GoAway
    ));
}

#[test]
fn ping_echo_and_pong() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    conn.feed(&frame_bytes(
        Frame::new(FrameType::Ping(Default::default()), StreamId::CONNECTION),
        b"12345678",
    ))
    .unwrap();
    let frames = parse_frames(&sink.take_output());
    assert_eq!(frames.len(), 1);
    match frames[0].0.frame_type {
        FrameType::Ping(flags) => assert!(flags.contains(PingFlags::Ack)),
        other => panic!("expected PING ack, got {other:?}"),
    }
    assert_eq!(frames[0].1, b"12345678");

    conn.feed(&frame_bytes(
        Frame::new(FrameType::Ping(PingFlags::Ack.into()), StreamId::CONNECTION),
        b"abcdefgh",
    ))
    .unwrap();
    assert_eq!(sink.take_events(), vec![Event::Pong(*b"abcdefgh")]);
}

#[test]
fn continuation_flood_enhances_calm() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    let mut bytes = frame_bytes(
        Frame::new(FrameType::Headers(Default::default()), StreamId(1)),
        b"",
    );
    for _ in 0..9 {
        bytes.extend_from_slice(&frame_bytes(
            Frame::new(FrameType::Continuation(Default::default()), StreamId(1)),
            b"",
        ));
    }
    let err = conn.feed(&bytes).unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));

    let frames = parse_frames(&sink.take_output());
    let (goaway, payload) = frames.last().unwrap();
    assert!(matches!(goaway.frame_type, FrameType::GoAway));
    assert_eq!(
        payload[4..8],
        (KnownErrorCode::EnhanceYourCalm as u32).to_be_bytes()
    );
}

#[test]
fn split_headers_are_reassembled() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    let mut encoder = loona_hpack::Encoder::new();
    let block = request_block(&mut encoder, b"/split", &[(&b"x-filler"[..], &b"yes"[..])]);
    let cut = block.len() / 2;

    let mut bytes = frame_bytes(
        Frame::new(FrameType::Headers(HeadersFlags::EndStream.into()), StreamId(1)),
        &block[..cut],
    );
    bytes.extend_from_slice(&frame_bytes(
        Frame::new(
            FrameType::Continuation(ContinuationFlags::EndHeaders.into()),
            StreamId(1),
        ),
        &block[cut..],
    ));
    conn.feed(&bytes).unwrap();

    let events = sink.take_events();
    assert!(events.iter().any(
        |e| matches!(e, Event::Head { id: 1, path, .. } if path.as_slice() == b"/split")
    ));
}

#[test]
fn write_data_clamps_to_peer_window() {
    let (mut conn, sink) = h2_server();
    let mut bytes = PREFACE.to_vec();
    // the peer only gives us a 5-byte stream window
    bytes.extend_from_slice(&settings_frame(&[(0x04, 5)]));
    conn.feed(&bytes).unwrap();

    let mut encoder = loona_hpack::Encoder::new();
    let block = request_block(&mut encoder, b"/big", &[]);
    conn.feed(&frame_bytes(
        Frame::new(
            FrameType::Headers(HeadersFlags::EndHeaders | HeadersFlags::EndStream),
            StreamId(1),
        ),
        &block,
    ))
    .unwrap();
    sink.take_output();
    sink.take_events();

    conn.write_head(StreamId(1), &Message::response(200, Headers::default()), false)
        .unwrap();
    let written = conn.write_data(StreamId(1), b"hello world", true).unwrap();
    assert_eq!(written, 5);

    let frames = parse_frames(&sink.take_output());
    assert_eq!(frames.len(), 2); // HEADERS + clamped DATA
    assert_eq!(frames[1].1, b"hello");
    assert!(!frames[1].0.is_end_stream());

    // the window grows, the rest goes out with END_STREAM
    conn.feed(&frame_bytes(
        Frame::new(FrameType::WindowUpdate, StreamId(1)),
        &100u32.to_be_bytes(),
    ))
    .unwrap();
    assert_eq!(sink.take_events(), vec![Event::FlowIncrease(1)]);

    let written = conn.write_data(StreamId(1), b" world", true).unwrap();
    assert_eq!(written, 6);
    let frames = parse_frames(&sink.take_output());
    assert_eq!(frames[0].1, b" world");
    assert!(frames[0].0.is_end_stream());
    assert_eq!(sink.take_events(), vec![Event::StreamEnd(1)]);
}

#[test]
fn frames_on_reset_streams_are_tolerated() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    let mut encoder = loona_hpack::Encoder::new();
    let block = request_block(&mut encoder, b"/slow", &[]);
    conn.feed(&frame_bytes(
        Frame::new(FrameType::Headers(HeadersFlags::EndHeaders.into()), StreamId(1)),
        &block,
    ))
    .unwrap();
    conn.write_reset(StreamId(1), KnownErrorCode::Cancel).unwrap();
    sink.take_output();
    sink.take_events();

    // a DATA frame racing our reset: no events, no protocol error,
    // just the connection-scope window replenishment
    conn.feed(&frame_bytes(
        Frame::new(FrameType::Data(Default::default()), StreamId(1)),
        b"late",
    ))
    .unwrap();

    let frames = parse_frames(&sink.take_output());
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0].0.frame_type, FrameType::WindowUpdate));
    assert_eq!(frames[0].0.stream_id, StreamId::CONNECTION);
    assert!(sink.take_events().is_empty());
}

#[test]
fn streams_after_goaway_are_refused() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    conn.shutdown().unwrap();
    let frames = parse_frames(&sink.take_output());
    assert!(matches!(frames[0].0.frame_type, FrameType::GoAway));
    assert_eq!(frames[0].1[4..8], (KnownErrorCode::NoError as u32).to_be_bytes());

    let mut encoder = loona_hpack::Encoder::new();
    let block = request_block(&mut encoder, b"/late", &[]);
    conn.feed(&frame_bytes(
        Frame::new(
            FrameType::Headers(HeadersFlags::EndHeaders | HeadersFlags::EndStream),
            StreamId(1),
        ),
        &block,
    ))
    .unwrap();

    let frames = parse_frames(&sink.take_output());
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0].0.frame_type, FrameType::RstStream));
    assert_eq!(
        frames[0].1,
        (KnownErrorCode::RefusedStream as u32).to_be_bytes()
    );
    assert!(sink.take_events().is_empty());
}

#[test]
fn settings_window_increase_fires_flow_event() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    conn.feed(&settings_frame(&[(0x04, 70_000)])).unwrap();
    assert_eq!(
        sink.take_events(),
        vec![Event::FlowIncrease(0), Event::Settings]
    );
    let frames = parse_frames(&sink.take_output());
    assert_eq!(frames.len(), 1);
    match frames[0].0.frame_type {
        FrameType::Settings(flags) => assert!(flags.contains(SettingsFlags::Ack)),
        other => panic!("expected SETTINGS ack, got {other:?}"),
    }
}

#[test]
fn bad_enable_push_kills_the_connection() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    let err = conn.feed(&settings_frame(&[(0x02, 2)])).unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    let frames = parse_frames(&sink.take_output());
    assert!(matches!(
        frames.last().unwrap().0.frame_type,
        FrameType::GoAway
    ));
}

#[test]
fn unknown_frame_types_are_ignored() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    let unknown = FrameType::decode(heddle::h2::EncodedFrameType { ty: 0x42, flags: 0x07 });
    conn.feed(&frame_bytes(Frame::new(unknown, StreamId(1)), b"abc"))
        .unwrap();
    assert!(sink.take_output().is_empty());
    assert!(sink.take_events().is_empty());
}

#[test]
fn priority_frames_are_parsed_and_ignored() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    let mut payload = Vec::new();
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.push(15);
    conn.feed(&frame_bytes(Frame::new(FrameType::Priority, StreamId(1)), &payload))
        .unwrap();
    assert!(sink.take_output().is_empty());
    assert!(sink.take_events().is_empty());
}

#[test]
fn data_after_end_stream_resets() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    let mut encoder = loona_hpack::Encoder::new();
    let block = request_block(&mut encoder, b"/done", &[]);
    conn.feed(&frame_bytes(
        Frame::new(
            FrameType::Headers(HeadersFlags::EndHeaders | HeadersFlags::EndStream),
            StreamId(1),
        ),
        &block,
    ))
    .unwrap();
    sink.take_output();
    sink.take_events();

    conn.feed(&frame_bytes(
        Frame::new(FrameType::Data(Default::default()), StreamId(1)),
        b"x",
    ))
    .unwrap();

    let frames = parse_frames(&sink.take_output());
    let (rst, payload) = frames.last().unwrap();
    assert!(matches!(rst.frame_type, FrameType::RstStream));
    assert_eq!(
        payload[..4],
        (KnownErrorCode::StreamClosed as u32).to_be_bytes()
    );
    assert_eq!(sink.take_events(), vec![Event::StreamEnd(1)]);
}

#[test]
fn uppercase_header_names_reset_the_stream() {
    let (mut conn, sink) = h2_server();
    handshake(&mut conn, &sink);

    let mut encoder = loona_hpack::Encoder::new();
    let block = request_block(&mut encoder, b"/x", &[(&b"X-Bad"[..], &b"1"[..])]);
    conn.feed(&frame_bytes(
        Frame::new(
            FrameType::Headers(HeadersFlags::EndHeaders | HeadersFlags::EndStream),
            StreamId(1),
        ),
        &block,
    ))
    .unwrap();

    let frames = parse_frames(&sink.take_output());
    let (rst, payload) = frames.last().unwrap();
    assert!(matches!(rst.frame_type, FrameType::RstStream));
    assert_eq!(
        payload[..4],
        (KnownErrorCode::ProtocolError as u32).to_be_bytes()
    );
    // no head for the malformed request, and the stream is gone
    let events = sink.take_events();
    assert!(!events.iter().any(|e| matches!(e, Event::Head { .. })));
    assert_eq!(events.last(), Some(&Event::StreamEnd(1)));
}
