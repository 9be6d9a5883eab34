//! End-to-end protocol scenarios over a real socket.

mod support;

use std::time::{Duration, Instant};

use support::*;

use pg_porter::{CleartextPassword, PipelineConfig, ServerConfig};

#[tokio::test]
async fn trivial_simple_query() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.query("SELECT 1").await;
    let frames = client.read_until_ready().await;
    assert_eq!(codes(&frames), "TDCZ");

    // RowDescription: one field named ?column?, type int4, text format.
    let row_description = &frames[0].1;
    assert_eq!(&row_description[..2], &1i16.to_be_bytes());
    assert_eq!(&row_description[2..11], b"?column?\0");

    // DataRow: one column, canonical text "1".
    let data_row = &frames[1].1;
    assert_eq!(&data_row[..2], &1i16.to_be_bytes());
    assert_eq!(&data_row[2..6], &1i32.to_be_bytes());
    assert_eq!(&data_row[6..7], b"1");

    // CommandComplete tag and idle ReadyForQuery.
    assert_eq!(&frames[2].1[..], b"SELECT 1\0");
    assert_eq!(&frames[3].1[..], b"I");
}

#[tokio::test]
async fn compound_simple_query_emits_one_ready() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.query("SELECT 1; SELECT 2").await;
    let frames = client.read_until_ready().await;
    assert_eq!(codes(&frames), "TDCTDCZ");
}

#[tokio::test]
async fn empty_query_response() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.query("  ;; ").await;
    let frames = client.read_until_ready().await;
    assert_eq!(codes(&frames), "IZ");
}

#[tokio::test]
async fn simple_query_error_aborts_batch() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.query("SELECT 1; ERROR; SELECT 2").await;
    let frames = client.read_until_ready().await;
    // First statement completes, the bad one errors, the third never runs,
    // and the batch still ends in exactly one ReadyForQuery.
    assert_eq!(codes(&frames), "TDCEZ");
    assert_eq!(sqlstate_of(&frames[3].1), "22012");
}

#[tokio::test]
async fn extended_batch() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.parse("", "SELECT 1").await;
    client.bind("", "", &[], 0, None).await;
    client.describe(b'P', "").await;
    client.execute("", 0).await;
    client.sync().await;

    let frames = client.read_until_ready().await;
    assert_eq!(codes(&frames), "12TDCZ");
}

#[tokio::test]
async fn describe_statement_lists_parameters() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.parse("q1", "SELECT $1").await;
    client.describe(b'S', "q1").await;
    client.sync().await;

    let frames = client.read_until_ready().await;
    assert_eq!(codes(&frames), "1tTZ");

    // ParameterDescription: one parameter, oid 23.
    let parameter_description = &frames[1].1;
    assert_eq!(&parameter_description[..2], &1i16.to_be_bytes());
    assert_eq!(&parameter_description[2..6], &23i32.to_be_bytes());
}

#[tokio::test]
async fn binary_parameter_round_trip() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.parse("", "SELECT $1").await;
    client
        .bind("", "", &[Some(&7i32.to_be_bytes())], 1, Some(1))
        .await;
    client.execute("", 0).await;
    client.sync().await;

    let frames = client.read_until_ready().await;
    assert_eq!(codes(&frames), "12DCZ");

    // The echoed row comes back binary: 4-byte big-endian 7.
    let data_row = &frames[2].1;
    assert_eq!(&data_row[2..6], &4i32.to_be_bytes());
    assert_eq!(&data_row[6..10], &7i32.to_be_bytes());
}

#[tokio::test]
async fn skip_mode_discards_until_sync() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.parse("", "BOGUS").await;
    client.bind("", "", &[], 0, None).await;
    client.execute("", 0).await;
    client.sync().await;

    let frames = client.read_until_ready().await;
    // ErrorResponse, then nothing until ReadyForQuery.
    assert_eq!(codes(&frames), "EZ");
    assert_eq!(sqlstate_of(&frames[0].1), "42601");

    // The connection is usable again after Sync.
    client.query("SELECT 1").await;
    let frames = client.read_until_ready().await;
    assert_eq!(codes(&frames), "TDCZ");
}

#[tokio::test]
async fn unknown_message_enters_skip_mode() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.send(b'!', &[]).await;
    client.execute("", 0).await; // discarded
    client.sync().await;

    let frames = client.read_until_ready().await;
    assert_eq!(codes(&frames), "EZ");
    assert_eq!(sqlstate_of(&frames[0].1), "08P01");
}

#[tokio::test]
async fn portal_suspension_and_reexecute() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.parse("", "MANY").await;
    client.bind("", "", &[], 0, None).await;
    client.execute("", 2).await;
    client.execute("", 0).await;
    client.sync().await;

    let frames = client.read_until_ready().await;
    // Two rows then PortalSuspended; the portal stays bound, and the free
    // re-execute runs the statement again to completion.
    assert_eq!(codes(&frames), "12DDsDDDDDCZ");
}

#[tokio::test]
async fn close_statement_and_portal() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.parse("q1", "SELECT 1").await;
    let mut payload = Vec::new();
    payload.push(b'S');
    payload.extend_from_slice(b"q1\0");
    client.send(b'C', &payload).await;
    // Closing what does not exist is still CloseComplete.
    let mut payload = Vec::new();
    payload.push(b'P');
    payload.extend_from_slice(b"nope\0");
    client.send(b'C', &payload).await;
    client.sync().await;

    let frames = client.read_until_ready().await;
    assert_eq!(codes(&frames), "133Z");

    // The closed statement is gone.
    client.bind("", "q1", &[], 0, None).await;
    client.sync().await;
    let frames = client.read_until_ready().await;
    assert_eq!(codes(&frames), "EZ");
    assert_eq!(sqlstate_of(&frames[0].1), "26000");
}

#[tokio::test]
async fn copy_in_binary_counts_tuples() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.parse("", "LOAD").await;
    client.bind("", "", &[], 0, None).await;
    client.execute("", 0).await;

    let stream = binary_copy_stream(&[&[Some(1), Some(2)], &[Some(3), None]]);
    // Split the stream across two CopyData frames at an arbitrary point.
    let (first, second) = stream.split_at(23);
    client.copy_data(first).await;
    client.copy_data(second).await;
    client.copy_done().await;
    client.sync().await;

    let frames = client.read_until_ready().await;
    assert_eq!(codes(&frames), "12GCZ");
    // CopyInResponse declares binary format.
    assert_eq!(frames[2].1[0], 1);
    // The handler saw exactly two tuples.
    assert_eq!(&frames[3].1[..], b"COPY 2\0");
}

#[tokio::test]
async fn pipelined_output_matches_serial_output() {
    async fn run_batch(addr: std::net::SocketAddr) -> (String, Vec<(u8, Vec<u8>)>) {
        let mut client = TestClient::connect(addr).await;
        for value in [1, 2, 3] {
            client.parse("", &format!("SELECT {value}")).await;
            client.bind("", "", &[], 0, None).await;
            client.execute("", 0).await;
        }
        client.sync().await;
        let frames = client.read_until_ready().await;
        (codes(&frames), frames)
    }

    let (_serial, serial_addr) = start_default().await;
    let (_parallel, parallel_addr) = start(
        ServerConfig::new(TestParser).with_pipeline(PipelineConfig {
            enabled: true,
            max_concurrency: 4,
            max_queue_depth: 64,
        }),
    )
    .await;

    let (serial_codes, serial_frames) = run_batch(serial_addr).await;
    let (parallel_codes, parallel_frames) = run_batch(parallel_addr).await;

    assert_eq!(serial_codes, "12DC12DC12DCZ");
    assert_eq!(parallel_codes, serial_codes);
    // Byte-identical output, frame by frame.
    for (serial, parallel) in serial_frames.iter().zip(parallel_frames.iter()) {
        assert_eq!(serial, parallel);
    }
}

#[tokio::test]
async fn pipelined_executes_overlap() {
    let (_server, addr) = start(
        ServerConfig::new(TestParser).with_pipeline(PipelineConfig {
            enabled: true,
            max_concurrency: 4,
            max_queue_depth: 64,
        }),
    )
    .await;
    let mut client = TestClient::connect(addr).await;

    let started = Instant::now();
    for _ in 0..3 {
        client.parse("", "SLEEP 100").await;
        client.bind("", "", &[], 0, None).await;
        client.execute("", 0).await;
    }
    client.sync().await;
    let frames = client.read_until_ready().await;
    let elapsed = started.elapsed();

    assert_eq!(codes(&frames), "12DC12DC12DCZ");
    assert!(
        elapsed < Duration::from_millis(250),
        "pipelined batch took {elapsed:?}"
    );
}

#[tokio::test]
async fn serial_executes_do_not_overlap() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    let started = Instant::now();
    for _ in 0..3 {
        client.parse("", "SLEEP 100").await;
        client.bind("", "", &[], 0, None).await;
        client.execute("", 0).await;
    }
    client.sync().await;
    let frames = client.read_until_ready().await;
    let elapsed = started.elapsed();

    assert_eq!(codes(&frames), "12DC12DC12DCZ");
    assert!(
        elapsed >= Duration::from_millis(300),
        "serial batch took {elapsed:?}"
    );
}

#[tokio::test]
async fn pipelined_failure_cancels_successors() {
    let (_server, addr) = start(
        ServerConfig::new(TestParser).with_pipeline(PipelineConfig {
            enabled: true,
            max_concurrency: 4,
            max_queue_depth: 64,
        }),
    )
    .await;
    let mut client = TestClient::connect(addr).await;

    client.parse("", "SELECT 1").await;
    client.bind("", "", &[], 0, None).await;
    client.execute("", 0).await;
    client.parse("", "BOGUS").await; // fails here
    client.bind("", "", &[], 0, None).await;
    client.execute("", 0).await;
    client.sync().await;

    let frames = client.read_until_ready().await;
    // The first execute's output survives, the error follows, and nothing
    // else is emitted until ReadyForQuery.
    assert_eq!(codes(&frames), "12DCEZ");
}

#[tokio::test]
async fn graceful_close_with_active_connection() {
    let (server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    // A two-second statement keeps the connection busy past the shutdown
    // timeout.
    client.query("SLEEP 2000").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    server.close().await.unwrap();
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_millis(900) && elapsed < Duration::from_millis(1300),
        "close took {elapsed:?}"
    );

    // Idempotent and immediate the second time.
    let started = Instant::now();
    server.close().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(50));
}

#[tokio::test]
async fn close_refuses_new_connections() {
    let (server, addr) = start_default().await;
    // Prove the listener is live first.
    let client = TestClient::connect(addr).await;
    drop(client);

    server.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The listener is gone; a fresh connection fails or is closed
    // immediately.
    match tokio::net::TcpStream::connect(addr).await {
        Err(_) => {}
        Ok(mut stream) => {
            use tokio::io::AsyncReadExt;
            let mut buf = [0u8; 1];
            assert_eq!(stream.read(&mut buf).await.unwrap_or(0), 0);
        }
    }
}

#[tokio::test]
async fn warning_severity_is_a_notice_not_an_abort() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.query("WARN; SELECT 1").await;
    let frames = client.read_until_ready().await;
    // NoticeResponse, synthetic completion, then the next statement runs.
    assert_eq!(codes(&frames), "NCTDCZ");
    assert_eq!(&frames[1].1[..], b"OK\0");
}

#[tokio::test]
async fn old_protocol_version_is_rejected() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect_raw(addr).await;

    // Protocol 2.0 startup.
    let mut frame = Vec::new();
    frame.extend_from_slice(&12i32.to_be_bytes());
    frame.extend_from_slice(&131072i32.to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0, 0]);
    use tokio::io::AsyncWriteExt;
    client.stream.write_all(&frame).await.unwrap();

    let (code, payload) = client.read_frame().await;
    assert_eq!(code, b'E');
    assert_eq!(sqlstate_of(&payload), "08P01");
}

#[tokio::test]
async fn terminate_closes_cleanly() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;
    client.terminate().await;

    use tokio::io::AsyncReadExt;
    let mut buf = [0u8; 1];
    assert_eq!(client.stream.read(&mut buf).await.unwrap_or(0), 0);
}

#[tokio::test]
async fn cleartext_authentication_flow() {
    let (_server, addr) = start(
        ServerConfig::new(TestParser)
            .with_auth(CleartextPassword::new(|user, password| {
                user == "alice" && password == "s3cret"
            })),
    )
    .await;

    // Good password: challenge, then the ordinary setup burst.
    let mut client = TestClient::connect_raw(addr).await;
    client.send_startup("alice").await;
    let (code, payload) = client.read_frame().await;
    assert_eq!(code, b'R');
    assert_eq!(&payload[..], &3i32.to_be_bytes());
    client.send(b'p', b"s3cret\0").await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames[0].0, b'R'); // AuthenticationOk
    assert_eq!(&frames[0].1[..], &0i32.to_be_bytes());
    assert!(frames.iter().any(|(code, _)| *code == b'K'));

    // Bad password: ErrorResponse 28P01 and the connection closes.
    let mut client = TestClient::connect_raw(addr).await;
    client.send_startup("alice").await;
    let _ = client.read_frame().await;
    client.send(b'p', b"wrong\0").await;
    let (code, payload) = client.read_frame().await;
    assert_eq!(code, b'E');
    assert_eq!(sqlstate_of(&payload), "28P01");
}

#[tokio::test]
async fn flush_forces_partial_batch_output() {
    let (_server, addr) = start_default().await;
    let mut client = TestClient::connect(addr).await;

    client.parse("", "SELECT 1").await;
    client.send(b'H', &[]).await; // Flush
    let (code, _) = client.read_frame().await;
    assert_eq!(code, b'1'); // ParseComplete arrives without a Sync

    client.sync().await;
    let frames = client.read_until_ready().await;
    assert_eq!(codes(&frames), "Z");
}

#[tokio::test]
async fn session_parameters_are_announced() {
    let (_server, addr) = start(
        ServerConfig::new(TestParser)
            .with_version("16.3")
            .with_parameter("TimeZone", "UTC"),
    )
    .await;

    let mut client = TestClient::connect_raw(addr).await;
    client.send_startup("tester").await;
    let frames = client.read_until_ready().await;

    let mut saw_version = false;
    let mut saw_timezone = false;
    for (code, payload) in &frames {
        if *code != b'S' {
            continue;
        }
        let text = String::from_utf8_lossy(payload);
        if text.starts_with("server_version\0") {
            assert_eq!(text, "server_version\016.3\0");
            saw_version = true;
        }
        if text.starts_with("TimeZone\0") {
            assert_eq!(text, "TimeZone\0UTC\0");
            saw_timezone = true;
        }
    }
    assert!(saw_version && saw_timezone);
}
