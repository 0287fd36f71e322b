//! Message transports underneath a [`Peer`](crate::peer::Peer).
//!
//! The networking core never touches sockets directly. It reads and writes
//! whole [`Msg`] frames through the [`MsgReadWriter`] trait, which has two
//! implementations here:
//!
//! - [`FramedTransport`]: a TCP stream carrying length-prefixed frames
//!   (see [`crate::message`] for the layout).
//! - [`MemoryTransport`]: one end of an in-memory pipe created by
//!   [`msg_pipe`], used by tests and by embedders that multiplex their own
//!   connections.
//!
//! Reads and writes may run concurrently on the same transport; each
//! direction is serialized by its own lock. `disconnect` fails every
//! pending and future operation with [`ConsensusNetError::Disconnected`],
//! even one that could otherwise complete immediately.

use {
    crate::{
        error::{ConsensusNetError, Result},
        message::{Msg, FRAME_HEADER_LEN},
    },
    async_trait::async_trait,
    log::{debug, trace},
    std::net::SocketAddr,
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{
            tcp::{OwnedReadHalf, OwnedWriteHalf},
            TcpStream,
        },
        sync::{mpsc, Mutex},
    },
    tokio_util::sync::CancellationToken,
};

/// Reads and writes whole consensus frames.
#[async_trait]
pub trait MsgReadWriter: Send + Sync {
    /// Wait for the next frame from the remote.
    async fn read_msg(&self) -> Result<Msg>;

    /// Send one frame to the remote.
    async fn write_msg(&self, msg: &Msg) -> Result<()>;

    /// Tear the connection down. Idempotent.
    fn disconnect(&self);
}

// ── TCP ─────────────────────────────────────────────────────────────────────

/// Length-prefixed frames over a TCP stream.
pub struct FramedTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    remote_addr: SocketAddr,
    max_message_size: usize,
    closed: CancellationToken,
}

impl FramedTransport {
    pub fn new(stream: TcpStream, max_message_size: usize) -> Result<Self> {
        let remote_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            remote_addr,
            max_message_size,
            closed: CancellationToken::new(),
        })
    }

    /// Dial `addr` and wrap the resulting stream.
    pub async fn connect(addr: SocketAddr, max_message_size: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        debug!("connected consensus transport to {addr}");
        Self::new(stream, max_message_size)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    async fn read_frame(reader: &mut OwnedReadHalf, max_message_size: usize) -> Result<Msg> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        reader.read_exact(&mut header).await.map_err(eof_to_disconnect)?;
        let (code, len) = Msg::read_frame_header(&header);
        if len > max_message_size {
            // The stream cannot be resynchronised past a payload we refuse
            // to read, so the caller must drop the connection.
            return Err(ConsensusNetError::MessageTooLarge {
                size: len,
                max: max_message_size,
            });
        }
        let mut payload = vec![0u8; len];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(eof_to_disconnect)?;
        Ok(Msg { code, payload })
    }
}

fn eof_to_disconnect(e: std::io::Error) -> ConsensusNetError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ConsensusNetError::Disconnected
    } else {
        ConsensusNetError::Transport(e)
    }
}

#[async_trait]
impl MsgReadWriter for FramedTransport {
    async fn read_msg(&self) -> Result<Msg> {
        let mut reader = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(ConsensusNetError::Disconnected),
            reader = self.reader.lock() => reader,
        };
        let msg = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(ConsensusNetError::Disconnected),
            msg = Self::read_frame(&mut reader, self.max_message_size) => msg?,
        };
        trace!("read frame code={} size={} from {}", msg.code, msg.size(), self.remote_addr);
        Ok(msg)
    }

    async fn write_msg(&self, msg: &Msg) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ConsensusNetError::Disconnected);
        }
        let frame = msg.to_frame(self.max_message_size)?;
        let mut writer = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(ConsensusNetError::Disconnected),
            writer = self.writer.lock() => writer,
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(ConsensusNetError::Disconnected),
            res = async {
                writer.write_all(&frame).await?;
                writer.flush().await
            } => res.map_err(ConsensusNetError::from),
        }
    }

    fn disconnect(&self) {
        if !self.closed.is_cancelled() {
            debug!("disconnecting consensus transport to {}", self.remote_addr);
        }
        self.closed.cancel();
    }
}

// ── In-memory ───────────────────────────────────────────────────────────────

/// One end of an in-memory message pipe.
pub struct MemoryTransport {
    tx: mpsc::Sender<Msg>,
    rx: Mutex<mpsc::Receiver<Msg>>,
    /// Shared by both ends.
    closed: CancellationToken,
}

/// Create a connected pair of in-memory transports. Each direction buffers
/// up to `capacity` frames; disconnecting either end closes both.
pub fn msg_pipe(capacity: usize) -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();
    (
        MemoryTransport {
            tx: a_tx,
            rx: Mutex::new(a_rx),
            closed: closed.clone(),
        },
        MemoryTransport {
            tx: b_tx,
            rx: Mutex::new(b_rx),
            closed,
        },
    )
}

impl MemoryTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl MsgReadWriter for MemoryTransport {
    async fn read_msg(&self) -> Result<Msg> {
        let mut rx = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(ConsensusNetError::Disconnected),
            rx = self.rx.lock() => rx,
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(ConsensusNetError::Disconnected),
            msg = rx.recv() => msg.ok_or(ConsensusNetError::Disconnected),
        }
    }

    async fn write_msg(&self, msg: &Msg) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ConsensusNetError::Disconnected);
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(ConsensusNetError::Disconnected),
            res = self.tx.send(msg.clone()) => res.map_err(|_| ConsensusNetError::Disconnected),
        }
    }

    fn disconnect(&self) {
        self.closed.cancel();
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches, std::time::Duration, tokio::net::TcpListener};

    fn frame(code: u8, len: usize) -> Msg {
        Msg {
            code,
            payload: vec![code; len],
        }
    }

    #[tokio::test]
    async fn test_pipe_both_directions() {
        let (a, b) = msg_pipe(4);
        a.write_msg(&frame(1, 3)).await.unwrap();
        b.write_msg(&frame(2, 5)).await.unwrap();
        assert_eq!(b.read_msg().await.unwrap(), frame(1, 3));
        assert_eq!(a.read_msg().await.unwrap(), frame(2, 5));
    }

    #[tokio::test]
    async fn test_pipe_disconnect_closes_both_ends() {
        let (a, b) = msg_pipe(4);
        let reader = tokio::spawn(async move { b.read_msg().await });
        tokio::task::yield_now().await;
        a.disconnect();
        assert_matches!(reader.await.unwrap(), Err(ConsensusNetError::Disconnected));
        assert_matches!(
            a.write_msg(&frame(1, 1)).await,
            Err(ConsensusNetError::Disconnected)
        );
        assert!(a.is_closed());
    }

    #[tokio::test]
    async fn test_pipe_disconnect_wins_over_ready_ops() {
        for _ in 0..200 {
            let (a, b) = msg_pipe(4);
            b.write_msg(&frame(1, 1)).await.unwrap();
            a.disconnect();
            // Both the free send slot and the queued frame are ready.
            assert_matches!(
                a.write_msg(&frame(2, 1)).await,
                Err(ConsensusNetError::Disconnected)
            );
            assert_matches!(a.read_msg().await, Err(ConsensusNetError::Disconnected));
        }
    }

    async fn tcp_pair(max: usize) -> (FramedTransport, FramedTransport) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dialed, accepted) = tokio::join!(FramedTransport::connect(addr, max), async {
            let (stream, _) = listener.accept().await.unwrap();
            FramedTransport::new(stream, max)
        });
        (dialed.unwrap(), accepted.unwrap())
    }

    #[tokio::test]
    async fn test_tcp_roundtrip() {
        let (client, server) = tcp_pair(1024).await;
        client.write_msg(&frame(3, 100)).await.unwrap();
        client.write_msg(&frame(4, 0)).await.unwrap();
        assert_eq!(server.read_msg().await.unwrap(), frame(3, 100));
        assert_eq!(server.read_msg().await.unwrap(), frame(4, 0));
        assert_eq!(server.remote_addr(), client.writer.lock().await.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_tcp_rejects_oversized_write() {
        let (client, _server) = tcp_pair(16).await;
        assert_matches!(
            client.write_msg(&frame(1, 17)).await,
            Err(ConsensusNetError::MessageTooLarge { size: 17, max: 16 })
        );
    }

    #[tokio::test]
    async fn test_tcp_rejects_oversized_read() {
        let (client, server) = tcp_pair(16).await;
        // Write a frame the client accepts but the server refuses.
        let mut raw = client.writer.lock().await;
        raw.write_all(&frame(1, 32).to_frame(64).unwrap())
            .await
            .unwrap();
        drop(raw);
        assert_matches!(
            server.read_msg().await,
            Err(ConsensusNetError::MessageTooLarge { size: 32, max: 16 })
        );
    }

    #[tokio::test]
    async fn test_tcp_remote_close_is_disconnect() {
        let (client, server) = tcp_pair(1024).await;
        drop(client);
        let res = tokio::time::timeout(Duration::from_secs(2), server.read_msg())
            .await
            .unwrap();
        assert_matches!(res, Err(ConsensusNetError::Disconnected));
    }

    #[tokio::test]
    async fn test_tcp_disconnect_unblocks_reader() {
        let (_client, server) = tcp_pair(1024).await;
        let server = std::sync::Arc::new(server);
        let reader = {
            let server = server.clone();
            tokio::spawn(async move { server.read_msg().await })
        };
        tokio::task::yield_now().await;
        server.disconnect();
        assert_matches!(reader.await.unwrap(), Err(ConsensusNetError::Disconnected));
    }

    #[tokio::test]
    async fn test_tcp_disconnect_wins_over_buffered_frame() {
        let (client, server) = tcp_pair(1024).await;
        client.write_msg(&frame(5, 8)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.disconnect();
        assert_matches!(server.read_msg().await, Err(ConsensusNetError::Disconnected));
        assert_matches!(
            server.write_msg(&frame(6, 1)).await,
            Err(ConsensusNetError::Disconnected)
        );
    }
}
