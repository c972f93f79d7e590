//! Jute wire encoding for the handful of ZooKeeper requests the assistant issues.
//!
//! Every packet is a big-endian `i32` length followed by the payload. Strings
//! and buffers are themselves length-prefixed, with `-1` standing for null.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::ZkError;

/// Upper bound for a single inbound frame.
pub(crate) const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

const PROTOCOL_VERSION: i32 = 0;
const PASSWORD_LEN: usize = 16;

/// Reserved transaction ids.
pub(crate) mod xid {
    pub const WATCH_EVENT: i32 = -1;
    pub const PING: i32 = -2;
    pub const AUTH: i32 = -4;
}

/// Request opcodes.
pub(crate) mod op {
    pub const GET_CHILDREN: i32 = 8;
    pub const AUTH: i32 = 100;
    pub const CLOSE_SESSION: i32 = -11;
}

/// Builds a length-prefixed frame around whatever `body` writes.
pub(crate) fn frame(body: impl FnOnce(&mut BytesMut)) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_i32(0);
    body(&mut buf);
    let len = (buf.len() - 4) as i32;
    buf[..4].copy_from_slice(&len.to_be_bytes());
    buf
}

pub(crate) fn put_string(buf: &mut BytesMut, value: &str) {
    put_buffer(buf, value.as_bytes());
}

pub(crate) fn put_buffer(buf: &mut BytesMut, value: &[u8]) {
    buf.put_i32(value.len() as i32);
    buf.put_slice(value);
}

fn ensure(buf: &Bytes, needed: usize, what: &str) -> Result<(), ZkError> {
    if buf.remaining() < needed {
        return Err(ZkError::Protocol(format!(
            "truncated {what}: need {needed} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

pub(crate) fn get_i32(buf: &mut Bytes, what: &str) -> Result<i32, ZkError> {
    ensure(buf, 4, what)?;
    Ok(buf.get_i32())
}

pub(crate) fn get_i64(buf: &mut Bytes, what: &str) -> Result<i64, ZkError> {
    ensure(buf, 8, what)?;
    Ok(buf.get_i64())
}

pub(crate) fn get_buffer(buf: &mut Bytes, what: &str) -> Result<Bytes, ZkError> {
    let len = get_i32(buf, what)?;
    if len < 0 {
        return Ok(Bytes::new());
    }
    let len = len as usize;
    ensure(buf, len, what)?;
    Ok(buf.split_to(len))
}

pub(crate) fn get_string(buf: &mut Bytes, what: &str) -> Result<String, ZkError> {
    let raw = get_buffer(buf, what)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| ZkError::Protocol(format!("{what} is not valid UTF-8")))
}

pub(crate) fn get_string_vec(buf: &mut Bytes, what: &str) -> Result<Vec<String>, ZkError> {
    let count = get_i32(buf, what)?;
    if count < 0 {
        return Ok(Vec::new());
    }
    // Each element carries at least its own length prefix.
    ensure(buf, count as usize * 4, what)?;
    (0..count).map(|_| get_string(buf, what)).collect()
}

/// Opening handshake sent by a client without a previous session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectRequest {
    pub timeout_ms: i32,
}

impl ConnectRequest {
    pub(crate) fn encode(&self) -> BytesMut {
        frame(|buf| {
            buf.put_i32(PROTOCOL_VERSION);
            buf.put_i64(0); // last zxid seen
            buf.put_i32(self.timeout_ms);
            buf.put_i64(0); // session id
            put_buffer(buf, &[0u8; PASSWORD_LEN]);
            buf.put_u8(0); // read-only not requested
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ConnectResponse {
    pub timeout_ms: i32,
    pub session_id: i64,
}

impl ConnectResponse {
    pub(crate) fn decode(mut buf: Bytes) -> Result<Self, ZkError> {
        let _protocol_version = get_i32(&mut buf, "connect response")?;
        let timeout_ms = get_i32(&mut buf, "connect response")?;
        let session_id = get_i64(&mut buf, "connect response")?;
        let _password = get_buffer(&mut buf, "connect response")?;
        // Older servers omit the trailing read-only flag.
        Ok(Self {
            timeout_ms,
            session_id,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestHeader {
    pub xid: i32,
    pub op: i32,
}

impl RequestHeader {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.xid);
        buf.put_i32(self.op);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReplyHeader {
    pub xid: i32,
    pub zxid: i64,
    pub err: i32,
}

impl ReplyHeader {
    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self, ZkError> {
        Ok(Self {
            xid: get_i32(buf, "reply header")?,
            zxid: get_i64(buf, "reply header")?,
            err: get_i32(buf, "reply header")?,
        })
    }
}

/// Digest (or any other scheme) credentials, always sent with the auth xid.
pub(crate) fn auth_request(scheme: &str, credentials: &[u8]) -> BytesMut {
    frame(|buf| {
        RequestHeader {
            xid: xid::AUTH,
            op: op::AUTH,
        }
        .encode(buf);
        buf.put_i32(0); // auth type
        put_string(buf, scheme);
        put_buffer(buf, credentials);
    })
}

pub(crate) fn get_children_request(xid: i32, path: &str, watch: bool) -> BytesMut {
    frame(|buf| {
        RequestHeader {
            xid,
            op: op::GET_CHILDREN,
        }
        .encode(buf);
        put_string(buf, path);
        buf.put_u8(u8::from(watch));
    })
}

pub(crate) fn close_request(xid: i32) -> BytesMut {
    frame(|buf| {
        RequestHeader {
            xid,
            op: op::CLOSE_SESSION,
        }
        .encode(buf);
    })
}
