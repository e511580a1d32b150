//! End-to-end tests driving the real `Service`/`Scheduler`/`Connection` stack over loopback
//! TCP sockets, one per scenario from the connection-management core's test plan: happy-path
//! relay, a split request that first reports `NeedMore`, a malformed peek, a backend dial
//! failure, and a half-close drain with data still queued.

use std::time::Duration;

use test_env_log::test;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::sniproxy::route::{HostParser, SniffParser};
use crate::sniproxy::Service;
use crate::tests::common::{bind_listener, test_listener_config, FailingResolver, FixedResolver};

const HOST_REQUEST: &[u8] = b"GET /widgets HTTP/1.1\r\nHost: example.com\r\n\r\n";

async fn echoing_backend() -> (TcpListener, std::net::SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind backend listener");
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[test(tokio::test)]
async fn happy_path_relays_bytes_both_directions() {
    let (backend_listener, backend_addr) = echoing_backend().await;
    let resolver = Box::leak(Box::new(FixedResolver { backend: backend_addr }));
    let parser = Box::leak(Box::new(SniffParser));
    let proxy_listener = bind_listener(parser, resolver);
    let proxy_addr = proxy_listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut backend_sock, _) = backend_listener.accept().await.expect("backend accept");
        let mut received = vec![0u8; HOST_REQUEST.len()];
        backend_sock.read_exact(&mut received).await.expect("backend read request");
        assert_eq!(received, HOST_REQUEST);
        backend_sock.write_all(b"HTTP/1.1 200 OK\r\n\r\nhello").await.expect("backend write response");
    });

    let mut conf = test_listener_config();
    conf.idle_timeout_seconds = 0;
    let mut service = Service::new(proxy_listener, &conf);
    tokio::spawn(async move { service.run().await });

    let mut client = TcpStream::connect(proxy_addr).await.expect("client connect");
    client.write_all(HOST_REQUEST).await.expect("client write request");

    let mut response = vec![0u8; b"HTTP/1.1 200 OK\r\n\r\nhello".len()];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut response))
        .await
        .expect("timed out waiting for relayed response")
        .expect("client read response");
    assert_eq!(&response, b"HTTP/1.1 200 OK\r\n\r\nhello");
}

#[test(tokio::test)]
async fn split_request_needs_more_then_connects() {
    let (backend_listener, backend_addr) = echoing_backend().await;
    let resolver = Box::leak(Box::new(FixedResolver { backend: backend_addr }));
    let parser = Box::leak(Box::new(SniffParser));
    let proxy_listener = bind_listener(parser, resolver);
    let proxy_addr = proxy_listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut backend_sock, _) = backend_listener.accept().await.expect("backend accept");
        let mut received = vec![0u8; HOST_REQUEST.len()];
        backend_sock.read_exact(&mut received).await.expect("backend read request");
        assert_eq!(received, HOST_REQUEST, "split request must arrive intact and reassembled");
        backend_sock.write_all(b"ok").await.expect("backend write response");
    });

    let conf = test_listener_config();
    let mut service = Service::new(proxy_listener, &conf);
    tokio::spawn(async move { service.run().await });

    let mut client = TcpStream::connect(proxy_addr).await.expect("client connect");
    // Send the first few bytes only -- not enough for SniffParser to even decide between
    // TLS and HTTP -- then pause before completing the request.
    let split_at = 3;
    client.write_all(&HOST_REQUEST[..split_at]).await.expect("client write partial request");
    tokio::time::sleep(Duration::from_millis(200)).await;
    client.write_all(&HOST_REQUEST[split_at..]).await.expect("client write rest of request");

    let mut response = vec![0u8; 2];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut response))
        .await
        .expect("timed out waiting for relayed response")
        .expect("client read response");
    assert_eq!(&response, b"ok");
}

#[test(tokio::test)]
async fn malformed_peek_closes_without_dialing_backend() {
    let (backend_listener, backend_addr) = echoing_backend().await;
    let resolver = Box::leak(Box::new(FixedResolver { backend: backend_addr }));
    let parser = Box::leak(Box::new(SniffParser));
    let proxy_listener = bind_listener(parser, resolver);
    let proxy_addr = proxy_listener.local_addr().unwrap();

    let conf = test_listener_config();
    let mut service = Service::new(proxy_listener, &conf);
    tokio::spawn(async move { service.run().await });

    let mut client = TcpStream::connect(proxy_addr).await.expect("client connect");
    client.write_all(b"\x00\x01\x02\x03garbage-not-a-protocol").await.expect("client write garbage");

    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("timed out waiting for connection to close")
        .expect("client read after malformed peek");
    assert_eq!(n, 0, "client socket should observe orderly close, not data");

    // Nothing should ever have connected to the backend listener.
    let accept_result = tokio::time::timeout(Duration::from_millis(200), backend_listener.accept()).await;
    assert!(accept_result.is_err(), "backend dial must not be attempted for a malformed peek");
}

#[test(tokio::test)]
async fn backend_dial_failure_closes_connection() {
    let resolver = Box::leak(Box::new(FailingResolver));
    let parser = Box::leak(Box::new(SniffParser));
    let proxy_listener = bind_listener(parser, resolver);
    let proxy_addr = proxy_listener.local_addr().unwrap();

    let conf = test_listener_config();
    let mut service = Service::new(proxy_listener, &conf);
    tokio::spawn(async move { service.run().await });

    let mut client = TcpStream::connect(proxy_addr).await.expect("client connect");
    client.write_all(HOST_REQUEST).await.expect("client write request");

    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("timed out waiting for connection to close")
        .expect("client read after dial failure");
    assert_eq!(n, 0, "client socket should be closed when the resolver fails");
}

#[test(tokio::test)]
async fn server_half_close_drains_pending_bytes_before_closing_client() {
    let (backend_listener, backend_addr) = echoing_backend().await;
    let resolver = Box::leak(Box::new(FixedResolver { backend: backend_addr }));
    let parser = Box::leak(Box::new(HostParser));
    let proxy_listener = bind_listener(parser, resolver);
    let proxy_addr = proxy_listener.local_addr().unwrap();

    let payload = vec![b'x'; 4096];
    let payload_for_backend = payload.clone();
    tokio::spawn(async move {
        let (mut backend_sock, _) = backend_listener.accept().await.expect("backend accept");
        let mut received = vec![0u8; HOST_REQUEST.len()];
        backend_sock.read_exact(&mut received).await.expect("backend read request");
        backend_sock.write_all(&payload_for_backend).await.expect("backend write payload");
        // Close immediately after writing -- the bytes are still queued in server.buffer
        // when the backend socket goes away, exercising the SERVER_CLOSED drain.
        drop(backend_sock);
    });

    let mut conf = test_listener_config();
    conf.buffer_capacity = 8192;
    let mut service = Service::new(proxy_listener, &conf);
    tokio::spawn(async move { service.run().await });

    let mut client = TcpStream::connect(proxy_addr).await.expect("client connect");
    client.write_all(HOST_REQUEST).await.expect("client write request");

    let mut received = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut received))
        .await
        .expect("timed out waiting for the drained payload")
        .expect("client read payload");
    assert_eq!(received, payload, "every byte written before the backend closed must still arrive");

    // After the drain completes, the client side is closed too (SERVER_CLOSED -> CLOSED).
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("timed out waiting for final close")
        .expect("client read after drain");
    assert_eq!(n, 0);
}
