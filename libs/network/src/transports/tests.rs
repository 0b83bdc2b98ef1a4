//! Transport Layer Tests
//!
//! Framing, ordering and close semantics over real TCP sockets and the
//! in-memory pair.

use super::*;
use std::sync::Arc;

const MAX: usize = 16 * 1024 * 1024;

async fn tcp_pair() -> (TcpTransport, TcpTransport) {
    let listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap(), MAX)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, server) = tokio::join!(
        TcpTransport::connect(addr, Duration::from_secs(5), MAX),
        listener.accept()
    );
    (client.unwrap(), server.unwrap())
}

mod tcp_framing {
    use super::*;

    #[tokio::test]
    async fn test_message_sizes_preserved() {
        let (client, server) = tcp_pair().await;
        for size in [0usize, 1, 100, 1024, 65536, 1_048_576] {
            let data = Bytes::from(vec![0xAA; size]);
            client.send(data.clone()).await.unwrap();
            let received = server.receive().await.unwrap();
            assert_eq!(received, data);
        }
        assert_eq!(client.transport_info().transport_type, TransportType::Tcp);
    }

    #[tokio::test]
    async fn test_concurrent_send_and_receive() {
        let (client, server) = tcp_pair().await;
        let server = Arc::new(server);
        let echo = {
            let server = server.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let message = server.receive().await.unwrap();
                    server.send(message).await.unwrap();
                }
            })
        };

        for i in 0..50u32 {
            client.send(Bytes::from(i.to_be_bytes().to_vec())).await.unwrap();
            let reply = client.receive().await.unwrap();
            assert_eq!(&reply[..], &i.to_be_bytes());
        }
        echo.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap(), 8)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) =
            tokio::join!(TcpTransport::connect(addr, Duration::from_secs(5), MAX), listener.accept());
        let (client, server) = (client.unwrap(), server.unwrap());

        client.send(Bytes::from_static(b"way more than eight")).await.unwrap();
        assert!(matches!(server.receive().await, Err(TransportError::Framing { .. })));
    }

    #[tokio::test]
    async fn test_close_ends_peer_receive() {
        let (client, server) = tcp_pair().await;
        client.close().await.unwrap();
        assert!(!client.is_healthy());
        assert!(server.receive().await.unwrap_err().is_closed());
        assert!(client.send(Bytes::from_static(b"late")).await.is_err());
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let (client, _server) = tcp_pair().await;
        assert!(matches!(
            client.receive_timeout(Duration::from_millis(20)).await,
            Err(TransportError::Timeout { .. })
        ));
    }
}

mod memory {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (a, b) = MemoryTransport::pair("order");
        for i in 0..10u8 {
            a.send(Bytes::from(vec![i])).await.unwrap();
        }
        for i in 0..10u8 {
            assert_eq!(&b.receive().await.unwrap()[..], &[i]);
        }
    }

    #[tokio::test]
    async fn test_injected_failure_after_queued_messages() {
        let (a, b) = MemoryTransport::pair("failure");
        a.send(Bytes::from_static(b"first")).await.unwrap();
        b.inject_failure("cable pulled");

        assert_eq!(&b.receive().await.unwrap()[..], b"first");
        assert!(matches!(b.receive().await, Err(TransportError::Network { .. })));
    }

    #[tokio::test]
    async fn test_close_is_seen_by_both_ends() {
        let (a, b) = MemoryTransport::pair("close");
        a.close().await.unwrap();
        assert!(a.receive().await.unwrap_err().is_closed());
        assert!(b.receive().await.unwrap_err().is_closed());
        // Closed stays closed
        assert!(b.receive().await.unwrap_err().is_closed());
        assert!(a.send(Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_peer_closes() {
        let (a, b) = MemoryTransport::pair("drop");
        drop(a);
        assert!(b.receive().await.unwrap_err().is_closed());
    }
}
