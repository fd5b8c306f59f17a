//! The length-prefixed wire framing for the Unix-domain-socket transport.
//!
//! Stands in for the "IPC/RPC transport" the design document keeps outside
//! the core (§1, §6): a minimal, private protocol so the request surface has
//! something concrete to bind to. Every frame is `u32` big-endian length
//! (payload only, not including itself) followed by a one-byte opcode and
//! opcode-specific fields, mirroring the frame-header-plus-payload shape the
//! teacher's own wire crate uses for its TCP protocol.

use bytes::{Buf, BufMut, BytesMut};

use nsm_types::{ClientId, ErrorStatus, NodeState, ShutdownKind};

/// Requests a client sends to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    SetNodeState { state: u8 },
    RegisterClient { client_id: ClientId, kinds: u32, timeout_ms: u32 },
    UnregisterClient { client_id: ClientId, kinds: u32 },
    Acknowledge { client_id: ClientId },
    QueryNodeState,
    SetExternalBlocked { blocked: bool },
}

/// Replies the daemon sends back in answer to a [`Request`], or an
/// unsolicited lifecycle notification pushed to a registered client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Status(ErrorStatus),
    NodeState(NodeState),
    Notify(ShutdownKind),
}

const OP_SET_NODE_STATE: u8 = 0x01;
const OP_REGISTER_CLIENT: u8 = 0x02;
const OP_UNREGISTER_CLIENT: u8 = 0x03;
const OP_ACKNOWLEDGE: u8 = 0x04;
const OP_QUERY_NODE_STATE: u8 = 0x05;
const OP_SET_EXTERNAL_BLOCKED: u8 = 0x06;

const OP_STATUS: u8 = 0x80;
const OP_NODE_STATE_REPLY: u8 = 0x81;
const OP_NOTIFY: u8 = 0x90;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame too short")]
    Truncated,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("frame exceeds maximum size")]
    TooLarge,
}

/// Maximum accepted frame payload, guarding against a misbehaving peer
/// claiming an unreasonable length prefix.
const MAX_FRAME_LEN: u32 = 1 << 20;

/// Attempts to decode one length-prefixed frame from `buf`, advancing past
/// it on success. Returns `Ok(None)` if a full frame is not yet buffered.
pub fn decode_request(buf: &mut BytesMut) -> Result<Option<Request>, ProtocolError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes(buf[..4].try_into().unwrap());
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::TooLarge);
    }
    let total = 4 + len as usize;
    if buf.len() < total {
        return Ok(None);
    }

    buf.advance(4);
    let mut payload = buf.split_to(len as usize);
    if payload.is_empty() {
        return Err(ProtocolError::Truncated);
    }
    let opcode = payload.get_u8();
    let request = match opcode {
        OP_SET_NODE_STATE => {
            require(&payload, 1)?;
            Request::SetNodeState { state: payload.get_u8() }
        }
        OP_REGISTER_CLIENT => {
            require(&payload, 16)?;
            Request::RegisterClient {
                client_id: ClientId::new(payload.get_u64()),
                kinds: payload.get_u32(),
                timeout_ms: payload.get_u32(),
            }
        }
        OP_UNREGISTER_CLIENT => {
            require(&payload, 12)?;
            Request::UnregisterClient {
                client_id: ClientId::new(payload.get_u64()),
                kinds: payload.get_u32(),
            }
        }
        OP_ACKNOWLEDGE => {
            require(&payload, 8)?;
            Request::Acknowledge { client_id: ClientId::new(payload.get_u64()) }
        }
        OP_QUERY_NODE_STATE => Request::QueryNodeState,
        OP_SET_EXTERNAL_BLOCKED => {
            require(&payload, 1)?;
            Request::SetExternalBlocked { blocked: payload.get_u8() != 0 }
        }
        other => return Err(ProtocolError::UnknownOpcode(other)),
    };
    Ok(Some(request))
}

fn require(payload: &BytesMut, n: usize) -> Result<(), ProtocolError> {
    if payload.len() < n {
        Err(ProtocolError::Truncated)
    } else {
        Ok(())
    }
}

/// Encodes a reply or notification as a length-prefixed frame appended to
/// `out`.
pub fn encode_reply(reply: Reply, out: &mut BytesMut) {
    let mut payload = BytesMut::new();
    match reply {
        Reply::Status(status) => {
            payload.put_u8(OP_STATUS);
            payload.put_u8(status.code());
        }
        Reply::NodeState(state) => {
            payload.put_u8(OP_NODE_STATE_REPLY);
            payload.put_u8(state as u8);
        }
        Reply::Notify(kind) => {
            payload.put_u8(OP_NOTIFY);
            payload.put_u32(kind.bits());
        }
    }
    out.put_u32(payload.len() as u32);
    out.extend_from_slice(&payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_register_client() {
        let mut framed = BytesMut::new();
        framed.put_u32(17);
        framed.put_u8(OP_REGISTER_CLIENT);
        framed.put_u64(42);
        framed.put_u32(0x01);
        framed.put_u32(500);

        let request = decode_request(&mut framed).unwrap().unwrap();
        assert_eq!(
            request,
            Request::RegisterClient {
                client_id: ClientId::new(42),
                kinds: 0x01,
                timeout_ms: 500,
            }
        );
        assert!(framed.is_empty());
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let mut framed = BytesMut::new();
        framed.put_u32(100);
        framed.put_u8(OP_QUERY_NODE_STATE);
        assert_eq!(decode_request(&mut framed).unwrap(), None);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let mut framed = BytesMut::new();
        framed.put_u32(1);
        framed.put_u8(0xee);
        assert!(matches!(
            decode_request(&mut framed),
            Err(ProtocolError::UnknownOpcode(0xee))
        ));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut framed = BytesMut::new();
        framed.put_u32(MAX_FRAME_LEN + 1);
        assert!(matches!(decode_request(&mut framed), Err(ProtocolError::TooLarge)));
    }

    #[test]
    fn encodes_status_reply() {
        let mut out = BytesMut::new();
        encode_reply(Reply::Status(ErrorStatus::Ok), &mut out);
        assert_eq!(&out[..], &[0, 0, 0, 2, OP_STATUS, ErrorStatus::Ok.code()]);
    }
}
