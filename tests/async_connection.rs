#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Async connection against an in-process duplex peer

mod common;

use std::time::Duration;

use common::{greeting, greeting_with, opcode};
use iproto_client::core::packet::{decode_length, HEADER_SIZE};
use iproto_client::error::{PacketFault, WelcomeFault};
use iproto_client::{tuple, AsyncConnection, IprotoError, Response, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Read one framed message from the peer side
async fn read_request(peer: &mut DuplexStream) -> Option<(Value, Value)> {
    let mut header = [0u8; HEADER_SIZE];
    peer.read_exact(&mut header).await.ok()?;
    let mut payload = vec![0u8; decode_length(&header).ok()?];
    peer.read_exact(&mut payload).await.ok()?;
    let message = Response::decode(&payload).ok()?;
    Some((message.header, message.body))
}

/// Peer that greets, then answers each request with `handler`
fn serve<F>(mut peer: DuplexStream, handler: F) -> tokio::task::JoinHandle<Vec<u64>>
where
    F: Fn(&Value, &Value) -> Response + Send + 'static,
{
    tokio::spawn(async move {
        peer.write_all(&greeting()).await.unwrap();
        let mut seen = Vec::new();
        while let Some((header, body)) = read_request(&mut peer).await {
            seen.push(opcode(&header));
            let reply = handler(&header, &body).to_bytes().unwrap();
            peer.write_all(&reply).await.unwrap();
        }
        seen
    })
}

#[tokio::test]
async fn test_ping_call_and_eval() {
    let (client, server) = tokio::io::duplex(4096);
    let peer = serve(server, |header, body| match opcode(header) {
        0x40 => Response::empty(),
        0x0A => Response::ok(vec![tuple![body.get_key(0x22).unwrap().clone()]]),
        0x08 => Response::ok(vec![tuple![2]]),
        _ => Response::error(0x8000 | 48, "Unknown request type"),
    });

    let mut conn = AsyncConnection::handshake(client).await.unwrap();
    assert!(conn.welcome().version().starts_with("Tarantool"));

    conn.ping().await.unwrap();
    let called = conn.call("box.info", tuple![]).await.unwrap();
    assert_eq!(called, vec![Value::Array(tuple!["box.info"])]);
    let evaluated = conn.eval("return 1 + 1", tuple![]).await.unwrap();
    assert_eq!(evaluated, vec![Value::Array(tuple![2])]);

    conn.close().await;
    assert_eq!(peer.await.unwrap(), vec![0x40, 0x0A, 0x08]);
}

#[tokio::test]
async fn test_auth_and_server_error() {
    let (client, server) = tokio::io::duplex(4096);
    let peer = serve(server, |header, body| {
        if opcode(header) == 0x07 && body.get_key(0x23) == Some(&Value::from("guest")) {
            Response::empty()
        } else {
            Response::error(0x8000 | 45, "User 'root' is not found")
        }
    });

    let mut conn = AsyncConnection::handshake(client).await.unwrap();
    conn.auth("guest", "").await.unwrap();

    match conn.auth("root", "pw").await {
        Err(IprotoError::BadRequest { code, message }) => {
            assert_eq!(code, 0x802D);
            assert!(message.contains("not found"));
        }
        other => panic!("Unexpected result: {other:?}"),
    }

    conn.close().await;
    assert_eq!(peer.await.unwrap(), vec![0x07, 0x07]);
}

#[tokio::test]
async fn test_short_greeting() {
    let (client, mut server) = tokio::io::duplex(4096);
    server.write_all(&greeting()[..64]).await.unwrap();
    drop(server);

    let err = AsyncConnection::handshake(client).await.unwrap_err();
    assert!(matches!(
        err,
        IprotoError::InvalidWelcome(WelcomeFault::InvalidSize)
    ));
}

#[tokio::test]
async fn test_foreign_greeting() {
    let (client, mut server) = tokio::io::duplex(4096);
    server.write_all(&greeting_with("SSH-2.0-OpenSSH")).await.unwrap();

    let err = AsyncConnection::handshake(client).await.unwrap_err();
    assert!(matches!(
        err,
        IprotoError::InvalidWelcome(WelcomeFault::InvalidHeader)
    ));
}

#[tokio::test]
async fn test_peer_hangup_mid_request() {
    let (client, mut server) = tokio::io::duplex(4096);
    server.write_all(&greeting()).await.unwrap();

    let mut conn = AsyncConnection::handshake(client).await.unwrap();
    drop(server);

    let err = conn.ping().await.unwrap_err();
    assert!(
        matches!(
            err,
            IprotoError::Io(_) | IprotoError::InvalidPacket(PacketFault::InvalidSize)
        ),
        "Unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_request_timeout() {
    let (client, mut server) = tokio::io::duplex(4096);
    server.write_all(&greeting()).await.unwrap();

    let mut conn = AsyncConnection::handshake(client)
        .await
        .unwrap()
        .with_timeout(Some(Duration::from_millis(50)));

    // The peer stays open but never answers
    let err = conn.ping().await.unwrap_err();
    assert!(matches!(err, IprotoError::Timeout));
    drop(server);
}

#[tokio::test]
async fn test_oversized_response() {
    let (client, server) = tokio::io::duplex(8192);
    let _peer = serve(server, |_, _| Response::ok(vec![tuple!["y".repeat(2048)]]));

    let mut conn = AsyncConnection::handshake_with_limit(client, 1024).await.unwrap();
    assert!(matches!(
        conn.ping().await,
        Err(IprotoError::InvalidPacket(PacketFault::InvalidSize))
    ));
}

#[tokio::test]
async fn test_late_reply_after_timeout_is_never_returned() {
    let (client, mut server) = tokio::io::duplex(4096);
    let peer = tokio::spawn(async move {
        server.write_all(&greeting()).await.unwrap();
        let mut requests = 0;
        while read_request(&mut server).await.is_some() {
            requests += 1;
            let reply = if requests == 1 {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Response::ok(vec![tuple![1]])
            } else {
                Response::ok(vec![tuple![2]])
            };
            server.write_all(&reply.to_bytes().unwrap()).await.unwrap();
        }
        requests
    });

    let mut conn = AsyncConnection::handshake(client)
        .await
        .unwrap()
        .with_timeout(Some(Duration::from_millis(50)));

    assert!(matches!(
        conn.call("first", tuple![]).await,
        Err(IprotoError::Timeout)
    ));
    assert!(conn.is_broken());

    // Let the stale reply land in the stream
    tokio::time::sleep(Duration::from_millis(300)).await;
    let err = conn.call("second", tuple![]).await.unwrap_err();
    assert!(matches!(err, IprotoError::ConnectionBroken), "Unexpected error: {err:?}");

    drop(conn);
    assert_eq!(peer.await.unwrap(), 1);
}

#[tokio::test]
async fn test_debug_shows_server() {
    let (client, mut server) = tokio::io::duplex(4096);
    server.write_all(&greeting()).await.unwrap();

    let conn = AsyncConnection::handshake(client).await.unwrap();
    let rendered = format!("{conn:?}");
    assert!(rendered.contains("Tarantool"));
    assert!(rendered.contains("broken: false"));
}
