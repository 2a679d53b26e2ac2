//! Dialer behaviour: construction errors, retry exhaustion, deadlines and the
//! SOCKS5 handshake against an in-memory proxy

mod common;

use common::{FactoryTransport, FakeSocksTransport, OutageTransport, RefusingTransport};
use relayscan::dialer::{
    build_dialer, Dialer, DialerConfig, HttpProxyDialer, ProxyKind, RetryPolicy,
    Socks5ProxyDialer,
};
use relayscan::network::{BoxedStream, NetworkKind};
use relayscan::ScanError;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

#[test]
fn test_empty_proxy_address_fails_before_any_attempt() {
    assert!(matches!(
        HttpProxyDialer::new("", "", ""),
        Err(ScanError::EmptyProxyAddress)
    ));
    assert!(matches!(
        Socks5ProxyDialer::new("", "user", "pass"),
        Err(ScanError::EmptyProxyAddress)
    ));
    assert!(matches!(
        build_dialer(ProxyKind::Socks5, DialerConfig::new("")),
        Err(ScanError::EmptyProxyAddress)
    ));
    // Direct dialing has no proxy to validate
    assert!(build_dialer(ProxyKind::Direct, DialerConfig::new("")).is_ok());
}

#[tokio::test]
async fn test_http_dialer_exhausts_after_three_spaced_attempts() {
    let transport = Arc::new(RefusingTransport::default());
    let dialer = HttpProxyDialer::new("127.0.0.1:3128", "", "")
        .unwrap()
        .with_transport(transport.clone());

    let result = dialer.dial(NetworkKind::Tcp, "10.0.0.1:80").await;

    assert!(matches!(result, Err(ScanError::DialExhausted(3))));
    assert_eq!(transport.calls(), 3);
    for gap in transport.gaps() {
        assert!(gap >= Duration::from_millis(950), "attempts only {:?} apart", gap);
    }
    assert!(!dialer.is_connected());
    assert!(dialer.last_connection().is_none());
}

#[tokio::test]
async fn test_http_deadline_elapsing_during_backoff_is_timeout() {
    let transport = Arc::new(RefusingTransport::default());
    let mut dialer = HttpProxyDialer::new("127.0.0.1:3128", "", "")
        .unwrap()
        .with_transport(transport.clone());
    dialer.set_timeout(Duration::from_millis(150));

    let started = std::time::Instant::now();
    let result = dialer.dial(NetworkKind::Tcp, "10.0.0.1:80").await;

    assert!(matches!(result, Err(ScanError::Timeout)));
    assert_eq!(transport.calls(), 1);
    assert!(started.elapsed() < Duration::from_millis(900));
}

#[tokio::test]
async fn test_socks5_dialer_exhausts_with_custom_policy() {
    let transport = Arc::new(RefusingTransport::default());
    let mut dialer = Socks5ProxyDialer::new("127.0.0.1:1080", "", "")
        .unwrap()
        .with_transport(transport.clone());
    dialer.set_retry_policy(RetryPolicy::new(3, Duration::from_millis(20)));

    let result = dialer.dial(NetworkKind::Tcp, "scanme.example:22").await;

    assert!(matches!(result, Err(ScanError::DialExhausted(3))));
    assert_eq!(transport.calls(), 3);
    assert!(!dialer.is_connected());
}

#[tokio::test]
async fn test_socks5_handshake_through_fake_proxy() {
    let transport = Arc::new(FakeSocksTransport::new(b"SSH-2.0-Fake\r\n"));
    let requested = transport.requested.clone();
    let dialer = Socks5ProxyDialer::new("127.0.0.1:1080", "", "")
        .unwrap()
        .with_transport(transport);

    let mut conn = dialer.dial(NetworkKind::Tcp, "scanme.example:22").await.unwrap();
    let mut banner = Vec::new();
    conn.read_to_end(&mut banner).await.unwrap();

    assert_eq!(banner, b"SSH-2.0-Fake\r\n");
    assert_eq!(conn.info().peer, "scanme.example:22");
    assert_eq!(conn.info().attempts, 1);
    assert!(dialer.is_connected());
    assert_eq!(dialer.last_connection().map(|i| i.attempts), Some(1));
    assert_eq!(*requested.lock().unwrap(), vec!["scanme.example:22".to_string()]);

    // The dialer only held a weak reference to the handed-off connection
    drop(conn);
    assert!(dialer.last_connection().is_none());
    assert!(dialer.is_connected());
}

#[tokio::test]
async fn test_shared_dialer_is_usable_through_trait_object() {
    let transport = Arc::new(FakeSocksTransport::new(b"220 ready\r\n"));
    let dialer = Socks5ProxyDialer::new("127.0.0.1:1080", "", "")
        .unwrap()
        .with_transport(transport);
    let shared: relayscan::SharedDialer = Arc::new(dialer);

    let grabber = relayscan::BannerGrabber::new(shared);
    let banner = grabber.grab_banner("mail.example", 25, 64).await.unwrap();
    assert_eq!(banner.text(), "220 ready");
}

#[tokio::test]
async fn test_http_failed_reconnect_clears_connected() {
    let proxy = Arc::new(FactoryTransport::new(|| {
        let (client, _server) = tokio::io::duplex(64);
        Box::new(client) as BoxedStream
    }));
    let transport = Arc::new(OutageTransport::new(proxy.clone()));
    let mut dialer = HttpProxyDialer::new("127.0.0.1:3128", "", "")
        .unwrap()
        .with_transport(transport.clone());
    dialer.set_retry_policy(RetryPolicy::new(1, Duration::from_millis(10)));

    dialer.reconnect().await.unwrap();
    assert!(dialer.is_connected());
    assert_eq!(dialer.last_connection().map(|i| i.peer.clone()), Some("127.0.0.1:3128".to_string()));

    transport.go_down();
    let result = dialer.reconnect().await;

    assert!(matches!(result, Err(ScanError::DialExhausted(1))));
    assert!(!dialer.is_connected());
    assert!(dialer.last_connection().is_none());
    assert_eq!(proxy.connects.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_socks5_reconnect_resets_connected() {
    let fake = Arc::new(FakeSocksTransport::new(b""));
    let requested = fake.requested.clone();
    let transport = Arc::new(OutageTransport::new(fake));
    let mut dialer = Socks5ProxyDialer::new("127.0.0.1:1080", "", "")
        .unwrap()
        .with_transport(transport.clone());
    dialer.set_retry_policy(RetryPolicy::new(2, Duration::from_millis(10)));

    let conn = dialer.dial(NetworkKind::Tcp, "scanme.example:22").await.unwrap();
    assert!(dialer.is_connected());

    // Only the weak reference is released; the caller's stream stays usable
    dialer.reconnect().await.unwrap();
    assert!(!dialer.is_connected());
    assert_eq!(conn.info().peer, "scanme.example:22");
    let owned = dialer.last_connection().unwrap();
    assert_eq!(owned.peer, "127.0.0.1:1080");

    // The fake proxy records each CONNECT once its tunnel closes
    for _ in 0..50 {
        if requested.lock().unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let mut seen = requested.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["127.0.0.1:1080".to_string(), "scanme.example:22".to_string()]);
}

#[tokio::test]
async fn test_socks5_failed_reconnect_clears_state() {
    let transport = Arc::new(OutageTransport::new(Arc::new(FakeSocksTransport::new(b""))));
    let mut dialer = Socks5ProxyDialer::new("127.0.0.1:1080", "", "")
        .unwrap()
        .with_transport(transport.clone());
    dialer.set_retry_policy(RetryPolicy::new(2, Duration::from_millis(10)));

    dialer.reconnect().await.unwrap();
    assert!(dialer.last_connection().is_some());

    transport.go_down();
    let result = dialer.reconnect().await;

    assert!(matches!(result, Err(ScanError::DialExhausted(2))));
    assert!(!dialer.is_connected());
    assert!(dialer.last_connection().is_none());
}
