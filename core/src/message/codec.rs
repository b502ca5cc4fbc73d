// Wire codec: bincode framing with size limits to prevent abuse

use super::types::MeshMessage;
use crate::broadcast::EmergencyBroadcast;
use crate::node::NodeId;
use crate::{MeshError, Result};
use serde::{Deserialize, Serialize};

/// Maximum encoded frame size: 256 KB
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Maximum message payload: 64 KB
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Everything one node sends another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireFrame {
    Message(MeshMessage),
    /// `hops_left` counts transmissions still allowed, this one included.
    Broadcast {
        broadcast: EmergencyBroadcast,
        hops_left: u32,
    },
    /// `node_id` received the broadcast; routed back towards `sender`.
    BroadcastAck {
        broadcast_id: String,
        node_id: NodeId,
        sender: NodeId,
        hops_left: u32,
    },
    BroadcastCancel {
        broadcast_id: String,
        requester: NodeId,
    },
    Heartbeat {
        node_id: NodeId,
        timestamp: u64,
    },
}

/// Serialize a frame to bytes (bincode)
pub fn encode_frame(frame: &WireFrame) -> Result<Vec<u8>> {
    if let WireFrame::Message(msg) = frame {
        if msg.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(MeshError::Invalid(format!(
                "Payload too large: {} bytes (max {})",
                msg.payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
    }

    let bytes = bincode::serialize(frame).map_err(|e| MeshError::Serialization(e.to_string()))?;

    if bytes.len() > MAX_FRAME_SIZE {
        return Err(MeshError::Invalid(format!(
            "Encoded frame too large: {} bytes (max {})",
            bytes.len(),
            MAX_FRAME_SIZE
        )));
    }

    Ok(bytes)
}

/// Deserialize bytes to a frame
pub fn decode_frame(bytes: &[u8]) -> Result<WireFrame> {
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(MeshError::Invalid(format!(
            "Frame too large: {} bytes (max {})",
            bytes.len(),
            MAX_FRAME_SIZE
        )));
    }

    bincode::deserialize(bytes).map_err(|e| MeshError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_frame_roundtrip() {
        let mut msg = MeshMessage::unicast("sender", "recipient", b"hello world".to_vec(), 5, 42);
        msg.route = vec!["sender".into(), "relay".into()];
        let frame = WireFrame::Message(msg);
        let bytes = encode_frame(&frame).unwrap();
        assert_eq!(decode_frame(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_ack_frame_keeps_hop_budget() {
        let frame = WireFrame::BroadcastAck {
            broadcast_id: "broadcast_1".into(),
            node_id: "c".into(),
            sender: "z".into(),
            hops_left: 5,
        };
        let bytes = encode_frame(&frame).unwrap();
        assert_eq!(decode_frame(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_reject_oversized_payload() {
        let msg = MeshMessage::unicast("a", "b", vec![0u8; MAX_PAYLOAD_SIZE + 1], 5, 0);
        assert!(encode_frame(&WireFrame::Message(msg)).is_err());
    }

    #[test]
    fn test_reject_oversized_decode() {
        let big_bytes = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(decode_frame(&big_bytes), Err(MeshError::Invalid(_))));
    }

    #[test]
    fn test_garbage_is_a_serialization_error() {
        assert!(matches!(
            decode_frame(&[0xff, 0xff, 0xff, 0xff, 0x01]),
            Err(MeshError::Serialization(_))
        ));
    }
}
