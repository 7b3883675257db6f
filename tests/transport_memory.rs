// tests/transport_memory.rs

use tokio::sync::mpsc;

use filter_mq::{
    // ---
    create_memory_transport_with_hub,
    Delivery,
    Downstream,
    Endpoint,
    EventSink,
    FrameTx,
    LinkEvent,
    ListenerEvent,
    MemoryHub,
    Result,
    Upstream,
};

#[tokio::test]
async fn memory_link_carries_frames_both_ways() -> Result<()> {
    // ---
    // Arrange
    // ---
    let transport = create_memory_transport_with_hub(MemoryHub::new());

    let (listen_tx, mut listen_rx) = mpsc::channel(16);
    let _binding = transport
        .bind(&Endpoint::bind("memory://frames")?, EventSink::new(3, listen_tx))
        .await?;

    let (link_tx, mut link_rx) = mpsc::channel(16);
    let link = transport
        .connect(&Endpoint::connect("memory://frames")?, EventSink::new(5, link_tx))
        .await?;

    // ---
    // Act
    // ---
    let hello = Upstream::Hello {
        peer_id: "client".into(),
        level: Delivery::Synced,
    };
    link.send(hello.clone()).expect("hello");

    // ---
    // Assert
    // ---
    let Ok((slot, ListenerEvent::Opened { conn, outbox })) = listen_rx.try_recv() else {
        panic!("expected Opened first");
    };
    assert_eq!(slot, 3);
    assert_eq!(conn, link.conn());

    let Ok((_, ListenerEvent::Frame { frame, .. })) = listen_rx.try_recv() else {
        panic!("expected the hello frame");
    };
    assert_eq!(frame, hello);

    let welcome = Downstream::Welcome {
        sender_id: "server".into(),
        next_id: 0,
    };
    outbox.try_send(welcome.clone()).expect("welcome");

    let Ok((slot, LinkEvent::Frame { conn: got, frame })) = link_rx.try_recv() else {
        panic!("expected the welcome frame");
    };
    assert_eq!(slot, 5);
    assert_eq!(got, conn);
    assert_eq!(frame, welcome);

    Ok(())
}

#[tokio::test]
async fn dropping_link_reports_closed() -> Result<()> {
    // ---
    let transport = create_memory_transport_with_hub(MemoryHub::new());

    let (listen_tx, mut listen_rx) = mpsc::channel(16);
    let _binding = transport
        .bind(&Endpoint::bind("memory://drop")?, EventSink::new(0, listen_tx))
        .await?;

    let (link_tx, _link_rx) = mpsc::channel(16);
    let link = transport
        .connect(&Endpoint::connect("memory://drop")?, EventSink::new(0, link_tx))
        .await?;
    let conn = link.conn();

    drop(link);

    assert!(matches!(listen_rx.try_recv(), Ok((_, ListenerEvent::Opened { .. }))));
    assert!(matches!(
        listen_rx.try_recv(),
        Ok((_, ListenerEvent::Closed { conn: closed })) if closed == conn
    ));
    Ok(())
}

#[tokio::test]
async fn dropping_listener_closes_links() -> Result<()> {
    // ---
    let hub = MemoryHub::new();
    let transport = create_memory_transport_with_hub(hub.clone());

    let (listen_tx, listen_rx) = mpsc::channel(16);
    let binding = transport
        .bind(&Endpoint::bind("memory://gone")?, EventSink::new(0, listen_tx))
        .await?;

    let (link_tx, _link_rx) = mpsc::channel(16);
    let link = transport
        .connect(&Endpoint::connect("memory://gone")?, EventSink::new(0, link_tx))
        .await?;
    assert!(!link.is_closed());
    assert_eq!(hub.bound_count().await, 1);

    drop(listen_rx);
    drop(binding);

    assert!(link.is_closed());
    assert_eq!(hub.bound_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn hubs_are_isolated() -> Result<()> {
    // ---
    let a = create_memory_transport_with_hub(MemoryHub::new());
    let b = create_memory_transport_with_hub(MemoryHub::new());

    let (listen_tx, _listen_rx) = mpsc::channel(16);
    let _binding = a
        .bind(&Endpoint::bind("memory://shared-name")?, EventSink::new(0, listen_tx))
        .await?;

    let (link_tx, _link_rx) = mpsc::channel(16);
    let result = b
        .connect(&Endpoint::connect("memory://shared-name")?, EventSink::new(0, link_tx))
        .await;
    assert!(result.is_err());
    Ok(())
}
