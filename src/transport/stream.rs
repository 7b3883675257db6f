// src/transport/stream.rs

//! Socket transports: `tcp://` and, on unix, `ipc://`.
//!
//! Every connection runs two tasks. The reader decodes length-prefixed CBOR
//! frames and pushes them into the owner's event queue. The writer drains a
//! bounded per-connection queue onto the socket; once that queue is full,
//! further frames are dropped. All tasks belong to the binding or link that
//! created them and are aborted when it drops, which closes the socket and
//! lets the remote side observe end of stream.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

use crate::{
    // ---
    domain::{
        Binding, ConnId, EventSink, Link, LinkEvent, ListenerEvent, TaskSet, Transport,
        TransportPtr,
    },
    endpoint::{Endpoint, TransportKind},
    log_debug, log_warn,
    protocol::{self, Downstream, Upstream},
    Error, Result,
};

/// Default per-connection write queue length.
pub const DEFAULT_QUEUE_LEN: usize = 64;

struct StreamTransport {
    // ---
    kind: TransportKind,
    queue_len: usize,
}

#[async_trait::async_trait]
impl Transport for StreamTransport {
    // ---
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn bind(&self, endpoint: &Endpoint, sink: EventSink<ListenerEvent>) -> Result<Binding> {
        // ---
        let tasks = TaskSet::default();
        let queue_len = self.queue_len;

        match self.kind {
            TransportKind::Tcp => {
                let listener = TcpListener::bind(&endpoint.address)
                    .await
                    .map_err(|e| bind_error(endpoint, e))?;
                log_debug!("{endpoint}: listening on {:?}", listener.local_addr().ok());

                let conn_tasks = tasks.clone();
                tasks.push(tokio::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, _peer)) => {
                                let _ = stream.set_nodelay(true);
                                serve(stream, sink.clone(), &conn_tasks, queue_len);
                            }
                            Err(_e) => log_warn!("tcp accept failed: {_e}"),
                        }
                    }
                }));
                Ok(Binding::new(endpoint.uri(), tasks))
            }
            #[cfg(unix)]
            TransportKind::Ipc => {
                let path = std::path::PathBuf::from(&endpoint.address);
                if tokio::fs::metadata(&path).await.is_ok() {
                    // only a socket nobody answers on is stale
                    if tokio::net::UnixStream::connect(&path).await.is_ok() {
                        return Err(Error::AddressInUse(endpoint.uri()));
                    }
                    log_debug!("{endpoint}: removing stale socket");
                    tokio::fs::remove_file(&path).await?;
                }
                let listener = tokio::net::UnixListener::bind(&path)
                    .map_err(|e| bind_error(endpoint, e))?;
                log_debug!("{endpoint}: listening");

                let conn_tasks = tasks.clone();
                tasks.push(tokio::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, _peer)) => {
                                serve(stream, sink.clone(), &conn_tasks, queue_len)
                            }
                            Err(_e) => log_warn!("ipc accept failed: {_e}"),
                        }
                    }
                }));
                Ok(Binding::new(endpoint.uri(), tasks).on_drop(move || {
                    let _ = std::fs::remove_file(path);
                }))
            }
            _ => Err(unsupported(endpoint)),
        }
    }

    async fn connect(&self, endpoint: &Endpoint, sink: EventSink<LinkEvent>) -> Result<Link> {
        // ---
        match self.kind {
            TransportKind::Tcp => {
                let stream = TcpStream::connect(&endpoint.address)
                    .await
                    .map_err(|e| connect_error(endpoint, e))?;
                let _ = stream.set_nodelay(true);
                Ok(dial(stream, sink, self.queue_len))
            }
            #[cfg(unix)]
            TransportKind::Ipc => {
                let stream = tokio::net::UnixStream::connect(&endpoint.address)
                    .await
                    .map_err(|e| connect_error(endpoint, e))?;
                Ok(dial(stream, sink, self.queue_len))
            }
            _ => Err(unsupported(endpoint)),
        }
    }
}

/// Sender side of one accepted connection.
fn serve<S>(stream: S, sink: EventSink<ListenerEvent>, tasks: &TaskSet, queue_len: usize)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    // ---
    let conn = ConnId::next();
    let (reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel::<Downstream>(queue_len);

    tasks.push(tokio::spawn(write_loop(conn, writer, rx)));
    tasks.push(tokio::spawn(async move {
        // ---
        if sink
            .emit(ListenerEvent::Opened {
                conn,
                outbox: Box::new(tx),
            })
            .await
            .is_err()
        {
            return;
        }
        read_loop(conn, reader, |frame| ListenerEvent::Frame { conn, frame }, &sink).await;
        let _ = sink.emit(ListenerEvent::Closed { conn }).await;
    }));
}

/// Receiver side of one outgoing connection.
fn dial<S>(stream: S, sink: EventSink<LinkEvent>, queue_len: usize) -> Link
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    // ---
    let conn = ConnId::next();
    let tasks = TaskSet::default();
    let (reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel::<Upstream>(queue_len);

    tasks.push(tokio::spawn(write_loop(conn, writer, rx)));
    tasks.push(tokio::spawn(async move {
        read_loop(conn, reader, |frame| LinkEvent::Frame { conn, frame }, &sink).await;
        let _ = sink.emit(LinkEvent::Closed { conn }).await;
    }));

    Link::new(conn, Box::new(tx), tasks)
}

async fn read_loop<R, F, E>(
    _conn: ConnId,
    mut reader: R,
    wrap: impl Fn(F) -> E,
    sink: &EventSink<E>,
) where
    R: AsyncRead + Unpin,
    F: DeserializeOwned,
{
    // ---
    loop {
        match protocol::read_frame::<_, F>(&mut reader).await {
            Ok(Some(frame)) => {
                if sink.emit(wrap(frame)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                log_debug!("{_conn}: end of stream");
                break;
            }
            Err(_e) => {
                log_warn!("{_conn}: dropping connection: {_e}");
                break;
            }
        }
    }
}

async fn write_loop<W, F>(_conn: ConnId, mut writer: W, mut rx: mpsc::Receiver<F>)
where
    W: AsyncWrite + Unpin,
    F: Serialize,
{
    // ---
    while let Some(frame) = rx.recv().await {
        if let Err(_e) = protocol::write_frame(&mut writer, &frame).await {
            log_debug!("{_conn}: write failed: {_e}");
            break;
        }
    }
}

fn bind_error(endpoint: &Endpoint, e: std::io::Error) -> Error {
    // ---
    match e.kind() {
        std::io::ErrorKind::AddrInUse => Error::AddressInUse(endpoint.uri()),
        _ => Error::Io(e),
    }
}

fn connect_error(endpoint: &Endpoint, e: std::io::Error) -> Error {
    // ---
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
            Error::NotBound(endpoint.uri())
        }
        _ => Error::Io(e),
    }
}

fn unsupported(endpoint: &Endpoint) -> Error {
    Error::InvalidEndpoint(endpoint.to_string(), "unsupported on this platform".into())
}

/// Create the `tcp://` transport.
pub fn create_tcp_transport() -> TransportPtr {
    Arc::new(StreamTransport {
        kind: TransportKind::Tcp,
        queue_len: DEFAULT_QUEUE_LEN,
    })
}

/// Create the `ipc://` transport (unix domain sockets).
#[cfg(unix)]
pub fn create_ipc_transport() -> TransportPtr {
    Arc::new(StreamTransport {
        kind: TransportKind::Ipc,
        queue_len: DEFAULT_QUEUE_LEN,
    })
}
