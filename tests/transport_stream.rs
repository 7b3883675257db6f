// tests/transport_stream.rs

mod common;

use std::time::Duration;

use filter_mq::{
    // ---
    Error,
    Receiver,
    ReceiverConfig,
    Result,
    Sender,
    SenderConfig,
};

use common::{init_logging, topics, NOW, SHORT, WAIT};

/// Grab a port the OS considers free right now.
fn free_port() -> u16 {
    // ---
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    listener.local_addr().expect("probe addr").port()
}

async fn round_trip(output: &str, source: &str) -> Result<()> {
    // ---
    let mut tx = Sender::new(SenderConfig::new("server").output(output)).await?;
    let mut rx = Receiver::new(ReceiverConfig::new("client").source(source)).await?;
    assert!(rx.recv(None, NOW).await?.is_none());

    for i in 0..5u64 {
        let meta = format!("m{i}");
        assert_eq!(tx.send(topics(&[("main", &meta)]), None, WAIT).await?, Some(i + 1));

        let env = rx.recv(None, WAIT).await?.expect("envelope over the wire");
        assert_eq!(env.id, i);
        assert_eq!(env.topics, topics(&[("main", &meta)]));
    }
    Ok(())
}

#[tokio::test]
async fn tcp_round_trip() -> Result<()> {
    // ---
    init_logging();
    let port = free_port();
    round_trip(&format!("tcp://*:{port}"), &format!("tcp://127.0.0.1:{port}")).await
}

#[cfg(unix)]
#[tokio::test]
async fn ipc_round_trip() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("frames.sock");
    let uri = format!("ipc://{}", path.display());

    round_trip(&uri, &uri).await
}

#[tokio::test]
async fn tcp_receiver_started_first_connects_later() -> Result<()> {
    // ---
    // Arrange
    // ---
    let port = free_port();
    let config = ReceiverConfig::new("client")
        .source(format!("tcp://127.0.0.1:{port}"))
        .with_reconnect_interval(Duration::from_millis(5));
    let mut rx = Receiver::new(config).await?;
    assert!(rx.recv(None, SHORT).await?.is_none());
    assert_eq!(rx.connected_count(), 0);

    // ---
    // Act
    // ---
    let mut tx = Sender::new(SenderConfig::new("server").output(format!("tcp://*:{port}"))).await?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(rx.recv(None, SHORT).await?.is_none());

    // ---
    // Assert
    // ---
    assert_eq!(rx.connected_count(), 1);
    assert_eq!(tx.send(topics(&[("main", "late")]), None, WAIT).await?, Some(1));
    assert_eq!(rx.recv(None, WAIT).await?.expect("late").id, 0);
    Ok(())
}

#[tokio::test]
async fn tcp_sender_sees_receiver_leave() -> Result<()> {
    // ---
    let port = free_port();
    let mut tx = Sender::new(SenderConfig::new("server").output(format!("tcp://*:{port}"))).await?;
    let mut rx = Receiver::new(ReceiverConfig::new("client").source(format!("tcp://127.0.0.1:{port}"))).await?;
    rx.recv(None, NOW).await?;

    assert_eq!(tx.send(topics(&[("main", "m")]), None, WAIT).await?, Some(1));
    assert_eq!(tx.peer_count(), 1);

    rx.close();
    for _ in 0..100 {
        tx.poll();
        if tx.peer_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(tx.peer_count(), 0);
    Ok(())
}

#[tokio::test]
async fn tcp_double_bind_is_address_in_use() -> Result<()> {
    // ---
    let port = free_port();
    let _first = Sender::new(SenderConfig::new("a").output(format!("tcp://127.0.0.1:{port}"))).await?;

    let second = Sender::new(SenderConfig::new("b").output(format!("tcp://127.0.0.1:{port}"))).await;
    assert!(matches!(second, Err(Error::AddressInUse(_))));
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn ipc_double_bind_is_address_in_use() -> Result<()> {
    // ---
    // Arrange
    // ---
    let dir = tempfile::tempdir()?;
    let uri = format!("ipc://{}", dir.path().join("taken.sock").display());
    let mut first = Sender::new(SenderConfig::new("a").output(uri.as_str())).await?;

    // ---
    // Act
    // ---
    let second = Sender::new(SenderConfig::new("b").output(uri.as_str())).await;

    // ---
    // Assert
    // ---
    assert!(matches!(second, Err(Error::AddressInUse(_))));

    // the first sender still serves its receivers
    let mut rx = Receiver::new(ReceiverConfig::new("client").source(uri.as_str())).await?;
    rx.recv(None, NOW).await?;
    assert_eq!(first.send(topics(&[("main", "m")]), None, WAIT).await?, Some(1));
    assert_eq!(rx.recv(None, WAIT).await?.expect("still bound").id, 0);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn ipc_stale_socket_is_replaced() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stale.sock");
    let uri = format!("ipc://{}", path.display());

    // a socket file with no listener behind it
    drop(std::os::unix::net::UnixListener::bind(&path)?);
    assert!(path.exists());

    let _tx = Sender::new(SenderConfig::new("a").output(uri.as_str())).await?;
    Ok(())
}
