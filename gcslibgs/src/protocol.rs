//! Frame definitions for the ground/vehicle link
//!
//! A frame is one message tagged with the identity of its sender. Frames
//! are encoded as JSON; floats travel as their IEEE-754 bit patterns so that
//! NaN sentinels survive the trip unchanged.

use serde::{Deserialize, Serialize};

use crate::error::{GcsError, GcsResult};
use crate::messages::{Message, MessageType};
use crate::types::PeerIdentity;

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 2;

/// Maximum encoded frame size in bytes
pub const MAX_FRAME_SIZE: usize = 65535;

/// A message plus the identity of its sender
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub version: u8,
    pub sender: PeerIdentity,
    pub message: Message,
}

impl Frame {
    pub fn new(sender: PeerIdentity, message: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sender,
            message,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }

    /// Serialize the frame to bytes
    pub fn to_bytes(&self) -> GcsResult<Vec<u8>> {
        let data = serde_json::to_vec(self)?;
        if data.len() > MAX_FRAME_SIZE {
            return Err(GcsError::Protocol(format!(
                "Frame of {} bytes exceeds {}",
                data.len(),
                MAX_FRAME_SIZE
            )));
        }
        Ok(data)
    }

    /// Deserialize a frame from bytes
    pub fn from_bytes(data: &[u8]) -> GcsResult<Self> {
        let frame: Frame = serde_json::from_slice(data)?;
        if frame.version != PROTOCOL_VERSION {
            return Err(GcsError::Protocol(format!(
                "Unsupported protocol version {}",
                frame.version
            )));
        }
        Ok(frame)
    }
}

/// Serialize an `f32` as its bit pattern
pub mod float_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        Ok(f32::from_bits(u32::deserialize(deserializer)?))
    }
}

/// Serialize an `[f32; 7]` as bit patterns
pub mod float_array_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f32; 7], serializer: S) -> Result<S::Ok, S::Error> {
        let bits = (*values).map(f32::to_bits);
        serializer.collect_seq(bits.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[f32; 7], D::Error> {
        let bits = <[u32; 7]>::deserialize(deserializer)?;
        Ok(bits.map(f32::from_bits))
    }
}
