//! A single ZooKeeper session over an already-established byte stream.

use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::proto::{self, ConnectRequest, ConnectResponse, ReplyHeader};
use super::{ErrorCode, ZkError};

/// Byte stream a session can run over (plain TCP or TLS).
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// An open ZooKeeper session.
///
/// The session is owned by whoever opened it. Call [`Session::close`] to end
/// it on the server; dropping it only closes the socket and leaves the server
/// to expire the session.
pub struct Session {
    transport: Box<dyn Transport>,
    session_id: i64,
    negotiated_timeout: Duration,
    request_timeout: Duration,
    next_xid: i32,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &format_args!("{:#x}", self.session_id))
            .field("negotiated_timeout", &self.negotiated_timeout)
            .finish()
    }
}

impl Session {
    /// Runs the connect handshake over `transport`.
    ///
    /// `timeout` is the requested session timeout; it also bounds every wait
    /// for a server reply.
    pub async fn handshake(
        transport: Box<dyn Transport>,
        timeout: Duration,
    ) -> Result<Self, ZkError> {
        let mut session = Self {
            transport,
            session_id: 0,
            negotiated_timeout: timeout,
            request_timeout: timeout,
            next_xid: 1,
        };

        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        session
            .write_frame(ConnectRequest { timeout_ms }.encode())
            .await?;
        let response = ConnectResponse::decode(session.read_frame().await?)?;
        if response.timeout_ms <= 0 {
            return Err(ZkError::Server(ErrorCode::SESSION_EXPIRED));
        }

        session.session_id = response.session_id;
        session.negotiated_timeout = Duration::from_millis(response.timeout_ms as u64);
        debug!(
            "ZooKeeper session {:#x} established, negotiated timeout {:?}",
            session.session_id, session.negotiated_timeout
        );
        Ok(session)
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn negotiated_timeout(&self) -> Duration {
        self.negotiated_timeout
    }

    /// Adds authentication info to the session (`addAuth`).
    pub async fn add_auth(&mut self, scheme: &str, credentials: &[u8]) -> Result<(), ZkError> {
        self.write_frame(proto::auth_request(scheme, credentials))
            .await?;
        self.await_reply(proto::xid::AUTH).await?;
        debug!("authenticated session {:#x} with scheme '{}'", self.session_id, scheme);
        Ok(())
    }

    /// Lists the children of `path`, optionally leaving a child watch behind.
    pub async fn children(&mut self, path: &str, watch: bool) -> Result<Vec<String>, ZkError> {
        let xid = self.allocate_xid();
        self.write_frame(proto::get_children_request(xid, path, watch))
            .await?;
        let mut body = self.await_reply(xid).await?;
        proto::get_string_vec(&mut body, "children")
    }

    /// Ends the session on the server and shuts the transport down.
    pub async fn close(mut self) -> Result<(), ZkError> {
        let xid = self.allocate_xid();
        self.write_frame(proto::close_request(xid)).await?;
        let reply = self.await_reply(xid).await;
        // The server may drop the socket right after acknowledging.
        let _ = self.transport.shutdown().await;
        match reply {
            Ok(_) | Err(ZkError::Closed) => {
                debug!("ZooKeeper session {:#x} closed", self.session_id);
                Ok(())
            },
            Err(err) => Err(err),
        }
    }

    fn allocate_xid(&mut self) -> i32 {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1).max(1);
        xid
    }

    async fn write_frame(&mut self, frame: BytesMut) -> Result<(), ZkError> {
        self.transport.write_all(&frame).await?;
        self.transport.flush().await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Bytes, ZkError> {
        let timeout = self.request_timeout;
        tokio::time::timeout(timeout, read_frame(&mut self.transport))
            .await
            .map_err(|_| ZkError::Timeout(timeout))?
    }

    /// Reads frames until the reply for `xid` arrives, skipping watch events
    /// and pings. Returns the reply body after the header.
    async fn await_reply(&mut self, xid: i32) -> Result<Bytes, ZkError> {
        loop {
            let mut frame = self.read_frame().await?;
            let header = ReplyHeader::decode(&mut frame)?;
            trace!(?header, "reply");

            match header.xid {
                x if x == xid => {
                    if header.err != 0 {
                        return Err(ZkError::Server(ErrorCode(header.err)));
                    }
                    return Ok(frame);
                },
                proto::xid::WATCH_EVENT | proto::xid::PING => continue,
                other => {
                    return Err(ZkError::Protocol(format!(
                        "expected reply for xid {xid}, got xid {other} (zxid {})",
                        header.zxid
                    )));
                },
            }
        }
    }
}

async fn read_frame(transport: &mut Box<dyn Transport>) -> Result<Bytes, ZkError> {
    let len = match transport.read_i32().await {
        Ok(len) => len,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ZkError::Closed)
        },
        Err(err) => return Err(err.into()),
    };
    if len < 0 || len as usize > proto::MAX_FRAME_LEN {
        return Err(ZkError::Protocol(format!("invalid frame length {len}")));
    }

    let mut buf = vec![0u8; len as usize];
    match transport.read_exact(&mut buf).await {
        Ok(_) => Ok(Bytes::from(buf)),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Err(ZkError::Closed),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Buf, BufMut};
    use tokio::io::DuplexStream;

    /// Reads one client frame from the server half.
    async fn server_read(stream: &mut DuplexStream) -> Bytes {
        let len = stream.read_i32().await.unwrap() as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        Bytes::from(buf)
    }

    async fn server_write(stream: &mut DuplexStream, body: impl FnOnce(&mut BytesMut)) {
        stream.write_all(&proto::frame(body)).await.unwrap();
    }

    async fn accept_session(stream: &mut DuplexStream, timeout_ms: i32) {
        let _connect = server_read(stream).await;
        server_write(stream, |buf| {
            buf.put_i32(0);
            buf.put_i32(timeout_ms);
            buf.put_i64(0x1234);
            proto::put_buffer(buf, &[0u8; 16]);
            buf.put_u8(0);
        })
        .await;
    }

    fn reply(buf: &mut BytesMut, xid: i32, err: i32) {
        buf.put_i32(xid);
        buf.put_i64(7);
        buf.put_i32(err);
    }

    #[tokio::test]
    async fn test_handshake_negotiates_timeout() {
        let (client, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            accept_session(&mut server, 6_000).await;
            server
        });

        let session = Session::handshake(Box::new(client), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(session.session_id(), 0x1234);
        assert_eq!(session.negotiated_timeout(), Duration::from_secs(6));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_handshake_is_rejected() {
        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            accept_session(&mut server, 0).await;
            server
        });

        let err = Session::handshake(Box::new(client), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ZkError::Server(code) if code == ErrorCode::SESSION_EXPIRED));
    }

    #[tokio::test]
    async fn test_children_skips_watch_events() {
        let (client, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            accept_session(&mut server, 10_000).await;

            let mut request = server_read(&mut server).await;
            let xid = request.get_i32();
            assert_eq!(request.get_i32(), proto::op::GET_CHILDREN);
            assert_eq!(proto::get_string(&mut request, "path").unwrap(), "/");
            assert_eq!(request.get_u8(), 1);

            server_write(&mut server, |buf| reply(buf, proto::xid::WATCH_EVENT, 0)).await;
            server_write(&mut server, |buf| {
                reply(buf, xid, 0);
                buf.put_i32(1);
                proto::put_string(buf, "zookeeper");
            })
            .await;
            server
        });

        let mut session = Session::handshake(Box::new(client), Duration::from_secs(10))
            .await
            .unwrap();
        let children = session.children("/", true).await.unwrap();
        assert_eq!(children, vec!["zookeeper".to_string()]);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_failure_maps_server_code() {
        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            accept_session(&mut server, 10_000).await;
            let _auth = server_read(&mut server).await;
            server_write(&mut server, |buf| {
                reply(buf, proto::xid::AUTH, ErrorCode::AUTH_FAILED.0)
            })
            .await;
        });

        let mut session = Session::handshake(Box::new(client), Duration::from_secs(10))
            .await
            .unwrap();
        let err = session.add_auth("digest", b"admin:wrong").await.unwrap_err();
        assert!(matches!(err, ZkError::Server(code) if code == ErrorCode::AUTH_FAILED));
    }

    #[tokio::test]
    async fn test_close_tolerates_dropped_socket() {
        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            accept_session(&mut server, 10_000).await;
            let _close = server_read(&mut server).await;
            drop(server);
        });

        let session = Session::handshake(Box::new(client), Duration::from_secs(10))
            .await
            .unwrap();
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (client, server) = tokio::io::duplex(4096);
        let err = Session::handshake(Box::new(client), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ZkError::Timeout(_)));
        drop(server);
    }
}
