//! Two engines wired back-to-back, plus feeding-granularity
//! determinism.

mod helpers;

use helpers::*;

use heddle::{
    h2::{Frame, FrameType},
    Connection, Header, Headers, Message, Method, StreamId, Version,
};

fn h2_pair() -> (
    Connection<RecordingSink>,
    RecordingSink,
    Connection<RecordingSink>,
    RecordingSink,
) {
    let client_sink = RecordingSink::new();
    let server_sink = RecordingSink::new();
    let mut client = Connection::client(client_sink.clone());
    let mut server = Connection::server(server_sink.clone());
    client.begin(Version::Http2).unwrap();
    server.begin(Version::Http2).unwrap();
    pump(&mut client, &mut server);
    client_sink.take_events();
    server_sink.take_events();
    (client, client_sink, server, server_sink)
}

fn request_headers() -> Headers {
    let mut headers = Headers::default();
    headers.push(Header::new(&b":scheme"[..], &b"http"[..]));
    headers.push(Header::new(&b":authority"[..], &b"example.org"[..]));
    headers
}

#[test]
fn h2_round_trip() {
    let (mut client, client_sink, mut server, server_sink) = h2_pair();

    let mut headers = request_headers();
    headers.push(Header::new(&b"x-request"[..], &b"hello"[..]));
    headers.push(Header::new(&b"content-length"[..], &b"4"[..]));
    client
        .write_head(
            StreamId(1),
            &Message::request(Method::Post, "/submit", headers),
            false,
        )
        .unwrap();
    assert_eq!(client.write_data(StreamId(1), b"ping", true).unwrap(), 4);
    pump(&mut client, &mut server);

    // the server sees the request exactly as sent, normalization aside
    assert_eq!(
        server_sink.take_events(),
        vec![
            Event::StreamStart(1),
            Event::Head {
                id: 1,
                code: 0,
                method: "POST".into(),
                path: b"/submit".to_vec(),
                headers: vec![
                    (b":scheme".to_vec(), b"http".to_vec()),
                    (b":authority".to_vec(), b"example.org".to_vec()),
                    (b"x-request".to_vec(), b"hello".to_vec()),
                    (b"content-length".to_vec(), b"4".to_vec()),
                ],
            },
            Event::Data {
                id: 1,
                data: b"ping".to_vec()
            },
            Event::Tail {
                id: 1,
                trailers: None
            },
        ]
    );

    let mut headers = Headers::default();
    headers.push(Header::new(&b"content-length"[..], &b"2"[..]));
    server
        .write_head(StreamId(1), &Message::response(200, headers), false)
        .unwrap();
    assert_eq!(server.write_data(StreamId(1), b"ok", true).unwrap(), 2);
    pump(&mut client, &mut server);

    // the client replenishes the connection window for "ok", which is
    // why the server sees one more flow event after the stream died
    assert_eq!(
        server_sink.take_events(),
        vec![Event::StreamEnd(1), Event::FlowIncrease(0)]
    );
    let client_events = client_sink.take_events();
    assert_eq!(
        client_events,
        vec![
            Event::FlowIncrease(0),
            Event::Head {
                id: 1,
                code: 200,
                method: "GET".into(),
                path: Vec::new(),
                headers: vec![(b"content-length".to_vec(), b"2".to_vec())],
            },
            Event::Data {
                id: 1,
                data: b"ok".to_vec()
            },
            Event::Tail {
                id: 1,
                trailers: None
            },
            Event::StreamEnd(1),
        ]
    );
}

#[test]
fn h2_server_push() {
    let (mut client, client_sink, mut server, server_sink) = h2_pair();

    client
        .write_head(
            StreamId(1),
            &Message::request(Method::Get, "/page", request_headers()),
            true,
        )
        .unwrap();
    pump(&mut client, &mut server);
    client_sink.take_events();
    server_sink.take_events();

    // the server promises /style.css alongside the real response
    server
        .write_push(
            StreamId(1),
            &Message::request(Method::Get, "/style.css", request_headers()),
        )
        .unwrap();
    // locally the pushed request is echoed as if the client sent it
    assert_eq!(
        server_sink.take_events(),
        vec![
            Event::StreamStart(2),
            Event::Head {
                id: 2,
                code: 0,
                method: "GET".into(),
                path: b"/style.css".to_vec(),
                headers: vec![
                    (b":scheme".to_vec(), b"http".to_vec()),
                    (b":authority".to_vec(), b"example.org".to_vec()),
                ],
            },
            Event::Tail {
                id: 2,
                trailers: None
            },
        ]
    );

    server
        .write_head(StreamId(2), &Message::response(200, Headers::default()), true)
        .unwrap();
    server
        .write_head(StreamId(1), &Message::response(200, Headers::default()), true)
        .unwrap();
    pump(&mut client, &mut server);

    let client_events = client_sink.take_events();
    assert_eq!(client_events[0], Event::StreamStart(2));
    assert_eq!(
        client_events[1],
        Event::Push {
            id: 2,
            parent: 1,
            method: "GET".into(),
            path: b"/style.css".to_vec(),
            headers: vec![
                (b":scheme".to_vec(), b"http".to_vec()),
                (b":authority".to_vec(), b"example.org".to_vec()),
            ],
        }
    );
    assert!(client_events.contains(&Event::StreamStart(2)));
    assert!(client_events
        .iter()
        .any(|e| matches!(e, Event::Head { id: 2, code: 200, .. })));
    assert!(client_events.contains(&Event::StreamEnd(2)));
    assert!(client_events.contains(&Event::StreamEnd(1)));
}

#[test]
fn h2_feeding_granularity_is_irrelevant() {
    // one canned inbound byte stream for a server connection
    let session = {
        let sink = RecordingSink::new();
        let mut client = Connection::client(sink.clone());
        client.begin(Version::Http2).unwrap();
        // pretend the server's part of the handshake happened
        client
            .feed(&frame_bytes(
                Frame::new(
                    FrameType::Settings(Default::default()),
                    StreamId::CONNECTION,
                ),
                &[],
            ))
            .unwrap();

        let mut headers = request_headers();
        headers.push(Header::new(&b"content-length"[..], &b"6"[..]));
        client
            .write_head(
                StreamId(1),
                &Message::request(Method::Post, "/echo", headers),
                false,
            )
            .unwrap();
        client.write_data(StreamId(1), b"abc", false).unwrap();
        client.write_data(StreamId(1), b"def", true).unwrap();
        client
            .write_ping(*b"feedfeed")
            .unwrap();
        sink.take_output()
    };

    let run = |chunk: usize| -> (Vec<Event>, Vec<u8>) {
        let sink = RecordingSink::new();
        let mut server = Connection::server(sink.clone());
        server.begin(Version::Http2).unwrap();
        for piece in session.chunks(chunk) {
            server.feed(piece).unwrap();
        }
        (coalesce_data(sink.take_events()), sink.take_output())
    };

    let whole = run(session.len());
    for chunk in [1, 2, 3, 7] {
        assert_eq!(run(chunk), whole, "chunk size {chunk} diverged");
    }
}

#[test]
fn h1_feeding_granularity_is_irrelevant() {
    let session: &[u8] =
        b"POST /up HTTP/1.1\r\nhost: h\r\ntransfer-encoding: chunked\r\n\r\n3\r\nxyz\r\n8\r\nabcdefgh\r\n0\r\n\r\n";

    let run = |chunk: usize| -> Vec<Event> {
        let sink = RecordingSink::new();
        let mut server = Connection::server(sink.clone());
        server.begin(Version::Http1).unwrap();
        for piece in session.chunks(chunk) {
            server.feed(piece).unwrap();
        }
        coalesce_data(sink.take_events())
    };

    let whole = run(session.len());
    for chunk in [1, 2, 5] {
        assert_eq!(run(chunk), whole, "chunk size {chunk} diverged");
    }
}

#[test]
fn h2_headers_split_across_continuations_round_trip() {
    let (mut client, _client_sink, mut server, server_sink) = h2_pair();

    // a header block larger than the peer's max frame size gets split
    // into HEADERS + CONTINUATION on the way out and reassembled on
    // the way in
    let mut headers = request_headers();
    let big = vec![b'v'; 40_000];
    headers.push(Header::new(&b"x-big"[..], big.clone()));
    client
        .write_head(
            StreamId(1),
            &Message::request(Method::Get, "/big", headers),
            true,
        )
        .unwrap();
    pump(&mut client, &mut server);

    let events = server_sink.take_events();
    match &events[1] {
        Event::Head { headers, .. } => {
            let value = headers
                .iter()
                .find(|(name, _)| name == b"x-big")
                .map(|(_, value)| value.clone())
                .unwrap();
            assert_eq!(value, big);
        }
        other => panic!("expected head, got {other:?}"),
    }
}
