//! Per-connection session state machine.
//!
//! A session owns one TCP connection to one peer and gates protocol
//! operations on its state, so a session handed back by the download
//! pool skips straight to issuing REQUESTs instead of re-running the
//! handshake sequence. Any I/O error, timeout, or protocol violation
//! closes the session; the scheduler recovers by leasing another one.
use super::handshake::{Handshake, HANDSHAKE_LEN};
use super::message::{Bitfield, Message, MessageId};
use super::{PeerError, PeerResult};
use std::net::SocketAddrV4;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Inbound frame cap. The largest expected frame is a 16 KiB PIECE block
/// plus its header; bitfields of very large torrents stay well under this.
const MAX_FRAME_LEN: u32 = 1 << 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// TCP connected, handshake not yet exchanged.
    Handshaking,
    /// Handshake done; bitfield/interest exchange pending.
    Idle,
    /// INTERESTED sent, waiting to be unchoked.
    Interested,
    /// Peer unchoked us; REQUESTs may be issued.
    Unchoked,
    /// Dead. Every operation fails until the session is dropped.
    Closed,
}

pub struct PeerSession {
    stream: TcpStream,
    addr: SocketAddrV4,
    state: SessionState,
    remote_peer_id: Option<[u8; 20]>,
    bitfield: Bitfield,
}

impl PeerSession {
    /// Dials the peer with a bounded timeout.
    #[tracing::instrument(level = "debug")]
    pub async fn connect(addr: SocketAddrV4) -> PeerResult<Self> {
        let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout("dial"))?
            .map_err(PeerError::Unreachable)?;
        Ok(Self {
            stream,
            addr,
            state: SessionState::Handshaking,
            remote_peer_id: None,
            bitfield: Bitfield::default(),
        })
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The peer-id learned at handshake.
    pub fn remote_peer_id(&self) -> Option<[u8; 20]> {
        self.remote_peer_id
    }

    pub fn has_piece(&self, index: usize) -> bool {
        self.bitfield.has_piece(index)
    }

    /// Exchanges the 68-byte handshake and validates the echoed info-hash.
    pub async fn handshake(
        &mut self,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> PeerResult<[u8; 20]> {
        if self.state != SessionState::Handshaking {
            return Err(PeerError::State("handshake already performed"));
        }
        let ours = Handshake::new(info_hash, peer_id);
        self.write_timed(&ours.serialize(), "handshake write").await?;

        let mut buf = [0u8; HANDSHAKE_LEN];
        self.read_timed(&mut buf, "handshake read").await?;
        let theirs = match Handshake::parse(&buf).and_then(|h| {
            h.validate(info_hash)?;
            Ok(h)
        }) {
            Ok(theirs) => theirs,
            Err(e) => {
                self.state = SessionState::Closed;
                return Err(e);
            }
        };

        tracing::debug!(addr = %self.addr, peer_id = %hex::encode(theirs.peer_id), "handshake complete");
        self.remote_peer_id = Some(theirs.peer_id);
        self.state = SessionState::Idle;
        Ok(theirs.peer_id)
    }

    /// Runs whatever remains of the pre-request sequence for the current
    /// state: receive BITFIELD, send INTERESTED, await UNCHOKE. A session
    /// that is already unchoked returns immediately, so pooled sessions
    /// pay this cost once per connection.
    pub async fn ensure_unchoked(&mut self) -> PeerResult<()> {
        loop {
            match self.state {
                SessionState::Unchoked => return Ok(()),
                SessionState::Handshaking => {
                    return Err(PeerError::State("handshake not performed"))
                }
                SessionState::Closed => return Err(PeerError::Closed),
                SessionState::Idle => {
                    let bitfield = self.wait_for(MessageId::Bitfield).await?;
                    self.bitfield = Bitfield::new(bitfield.payload);
                    self.send(&Message::interested()).await?;
                    self.state = SessionState::Interested;
                }
                SessionState::Interested => {
                    self.wait_for(MessageId::Unchoke).await?;
                    tracing::debug!(addr = %self.addr, "peer unchoked us");
                    self.state = SessionState::Unchoked;
                }
            }
        }
    }

    /// Writes one framed message.
    pub async fn send(&mut self, message: &Message) -> PeerResult<()> {
        if self.state == SessionState::Closed {
            return Err(PeerError::Closed);
        }
        self.write_timed(&message.encode(), "message write").await
    }

    /// Reads frames until a non-keep-alive message arrives, then requires
    /// it to carry `expected`'s id. Any other id is a protocol violation
    /// here; the scheduler retries the job on another session rather than
    /// this session buffering out-of-order traffic.
    pub async fn wait_for(&mut self, expected: MessageId) -> PeerResult<Message> {
        if self.state == SessionState::Closed {
            return Err(PeerError::Closed);
        }
        loop {
            let mut len_buf = [0u8; 4];
            self.read_timed(&mut len_buf, "length prefix").await?;
            let frame_len = u32::from_be_bytes(len_buf);
            if frame_len == 0 {
                // keep-alive
                continue;
            }
            if frame_len > MAX_FRAME_LEN {
                self.state = SessionState::Closed;
                return Err(PeerError::MalformedFrame("frame too large"));
            }

            let mut id_buf = [0u8; 1];
            self.read_timed(&mut id_buf, "message id").await?;
            let got = match MessageId::try_from(id_buf[0]) {
                Ok(id) => id,
                Err(e) => {
                    self.state = SessionState::Closed;
                    return Err(e);
                }
            };

            let mut payload = vec![0u8; frame_len as usize - 1];
            self.read_timed(&mut payload, "message payload").await?;

            if got != expected {
                self.state = SessionState::Closed;
                return Err(PeerError::UnexpectedMessage { got, expected });
            }
            return Ok(Message::new(got, payload));
        }
    }

    async fn read_timed(&mut self, buf: &mut [u8], what: &'static str) -> PeerResult<()> {
        match timeout(READ_TIMEOUT, self.stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                self.state = SessionState::Closed;
                Err(PeerError::Io(e))
            }
            Err(_) => {
                self.state = SessionState::Closed;
                Err(PeerError::Timeout(what))
            }
        }
    }

    async fn write_timed(&mut self, bytes: &[u8], what: &'static str) -> PeerResult<()> {
        match timeout(WRITE_TIMEOUT, self.stream.write_all(bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.state = SessionState::Closed;
                Err(PeerError::Io(e))
            }
            Err(_) => {
                self.state = SessionState::Closed;
                Err(PeerError::Timeout(what))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listen() -> (TcpListener, SocketAddrV4) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let std::net::SocketAddr::V4(addr) = listener.local_addr().unwrap() else {
            panic!("expected v4 listener");
        };
        (listener, addr)
    }

    #[tokio::test]
    async fn handshake_learns_remote_peer_id() {
        let (listener, addr) = listen().await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; HANDSHAKE_LEN];
            sock.read_exact(&mut buf).await.unwrap();
            let theirs = Handshake::parse(&buf).unwrap();
            assert_eq!(theirs.info_hash, [0x11; 20]);
            let reply = Handshake::new([0x11; 20], [0x99; 20]);
            sock.write_all(&reply.serialize()).await.unwrap();
        });

        let mut session = PeerSession::connect(addr).await.unwrap();
        assert_eq!(session.state(), SessionState::Handshaking);
        let peer_id = session.handshake([0x11; 20], [0x22; 20]).await.unwrap();
        assert_eq!(peer_id, [0x99; 20]);
        assert_eq!(session.remote_peer_id(), Some([0x99; 20]));
        assert_eq!(session.state(), SessionState::Idle);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_rejects_foreign_info_hash() {
        let (listener, addr) = listen().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; HANDSHAKE_LEN];
            sock.read_exact(&mut buf).await.unwrap();
            let reply = Handshake::new([0xee; 20], [0x99; 20]);
            sock.write_all(&reply.serialize()).await.unwrap();
        });

        let mut session = PeerSession::connect(addr).await.unwrap();
        assert!(matches!(
            session.handshake([0x11; 20], [0x22; 20]).await,
            Err(PeerError::HandshakeMismatch("info hash"))
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn ensure_unchoked_runs_the_sequence_once() {
        let (listener, addr) = listen().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; HANDSHAKE_LEN];
            sock.read_exact(&mut buf).await.unwrap();
            let reply = Handshake::new([0x11; 20], [0x99; 20]);
            sock.write_all(&reply.serialize()).await.unwrap();
            // bitfield: piece 0 only
            sock.write_all(&Message::new(MessageId::Bitfield, vec![0x80]).encode())
                .await
                .unwrap();
            let mut interested = [0u8; 5];
            sock.read_exact(&mut interested).await.unwrap();
            assert_eq!(interested, [0, 0, 0, 1, 2]);
            sock.write_all(&Message::new(MessageId::Unchoke, Vec::new()).encode())
                .await
                .unwrap();
            // Keep the socket open so a second (buggy) sequence would hang
            // rather than error.
            let mut extra = [0u8; 1];
            let _ = sock.read_exact(&mut extra).await;
        });

        let mut session = PeerSession::connect(addr).await.unwrap();
        session.handshake([0x11; 20], [0x22; 20]).await.unwrap();
        session.ensure_unchoked().await.unwrap();
        assert_eq!(session.state(), SessionState::Unchoked);
        assert!(session.has_piece(0));
        assert!(!session.has_piece(1));
        // Short-circuits without touching the socket.
        session.ensure_unchoked().await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_skips_keep_alives() {
        let (listener, addr) = listen().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&[0, 0, 0, 0]).await.unwrap(); // keep-alive
            sock.write_all(&Message::new(MessageId::Unchoke, Vec::new()).encode())
                .await
                .unwrap();
        });

        let mut session = PeerSession::connect(addr).await.unwrap();
        let message = session.wait_for(MessageId::Unchoke).await.unwrap();
        assert_eq!(message.id, MessageId::Unchoke);
        assert!(message.payload.is_empty());
    }

    #[tokio::test]
    async fn wait_for_fails_on_unexpected_id() {
        let (listener, addr) = listen().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(&Message::new(MessageId::Choke, Vec::new()).encode())
                .await
                .unwrap();
        });

        let mut session = PeerSession::connect(addr).await.unwrap();
        assert!(matches!(
            session.wait_for(MessageId::Unchoke).await,
            Err(PeerError::UnexpectedMessage {
                got: MessageId::Choke,
                expected: MessageId::Unchoke,
            })
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }
}
