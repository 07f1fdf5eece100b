//! Wire message definitions
//!
//! Messages exchanged between ground and vehicle. The numeric identifiers
//! follow the MAVLink common message set.

use serde::{Deserialize, Serialize};

use crate::mission::{MissionItem, MissionSignature};
use crate::protocol::float_array_bits;
use crate::types::{MissionType, PeerIdentity};

/// MAV_AUTOPILOT_INVALID: the sender is not a flight controller
pub const MAV_AUTOPILOT_INVALID: u8 = 8;

/// MAV_AUTOPILOT_GENERIC
pub const MAV_AUTOPILOT_GENERIC: u8 = 0;

/// Message types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageType {
    Heartbeat,
    MissionCurrent,
    MissionRequestList,
    MissionCount,
    MissionClearAll,
    MissionAck,
    MissionRequestInt,
    MissionItemInt,
    CommandLong,
    CommandAck,
}

impl MessageType {
    pub fn id(&self) -> u32 {
        match self {
            MessageType::Heartbeat => 0,
            MessageType::MissionCurrent => 42,
            MessageType::MissionRequestList => 43,
            MessageType::MissionCount => 44,
            MessageType::MissionClearAll => 45,
            MessageType::MissionAck => 47,
            MessageType::MissionRequestInt => 51,
            MessageType::MissionItemInt => 73,
            MessageType::CommandLong => 76,
            MessageType::CommandAck => 77,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(MessageType::Heartbeat),
            42 => Some(MessageType::MissionCurrent),
            43 => Some(MessageType::MissionRequestList),
            44 => Some(MessageType::MissionCount),
            45 => Some(MessageType::MissionClearAll),
            47 => Some(MessageType::MissionAck),
            51 => Some(MessageType::MissionRequestInt),
            73 => Some(MessageType::MissionItemInt),
            76 => Some(MessageType::CommandLong),
            77 => Some(MessageType::CommandAck),
            _ => None,
        }
    }
}

/// Result codes carried by COMMAND_ACK
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MavResult {
    Accepted,
    TemporarilyRejected,
    Denied,
    Unsupported,
    Failed,
    InProgress,
    Cancelled,
}

impl MavResult {
    pub fn to_u8(&self) -> u8 {
        match self {
            MavResult::Accepted => 0,
            MavResult::TemporarilyRejected => 1,
            MavResult::Denied => 2,
            MavResult::Unsupported => 3,
            MavResult::Failed => 4,
            MavResult::InProgress => 5,
            MavResult::Cancelled => 6,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MavResult::Accepted),
            1 => Some(MavResult::TemporarilyRejected),
            2 => Some(MavResult::Denied),
            3 => Some(MavResult::Unsupported),
            4 => Some(MavResult::Failed),
            5 => Some(MavResult::InProgress),
            6 => Some(MavResult::Cancelled),
            _ => None,
        }
    }
}

/// Result codes carried by MISSION_ACK
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MavMissionResult {
    Accepted,
    Error,
    UnsupportedFrame,
    Unsupported,
    NoSpace,
    Invalid,
    InvalidSequence,
    Denied,
    OperationCancelled,
}

impl MavMissionResult {
    pub fn to_u8(&self) -> u8 {
        match self {
            MavMissionResult::Accepted => 0,
            MavMissionResult::Error => 1,
            MavMissionResult::UnsupportedFrame => 2,
            MavMissionResult::Unsupported => 3,
            MavMissionResult::NoSpace => 4,
            MavMissionResult::Invalid => 5,
            MavMissionResult::InvalidSequence => 13,
            MavMissionResult::Denied => 14,
            MavMissionResult::OperationCancelled => 15,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MavMissionResult::Accepted),
            1 => Some(MavMissionResult::Error),
            2 => Some(MavMissionResult::UnsupportedFrame),
            3 => Some(MavMissionResult::Unsupported),
            4 => Some(MavMissionResult::NoSpace),
            5 => Some(MavMissionResult::Invalid),
            13 => Some(MavMissionResult::InvalidSequence),
            14 => Some(MavMissionResult::Denied),
            15 => Some(MavMissionResult::OperationCancelled),
            _ => None,
        }
    }
}

/// HEARTBEAT - presence announcement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Heartbeat {
    /// Autopilot type, MAV_AUTOPILOT_INVALID for non-flight-controllers
    pub autopilot: u8,
}

impl Heartbeat {
    pub fn autopilot() -> Self {
        Self {
            autopilot: MAV_AUTOPILOT_GENERIC,
        }
    }

    pub fn has_autopilot(&self) -> bool {
        self.autopilot != MAV_AUTOPILOT_INVALID
    }
}

/// COMMAND_LONG - a vehicle command with seven parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CommandLong {
    pub target: PeerIdentity,
    pub command: u16,
    /// Zero on first transmission, incremented on every retransmission
    pub confirmation: u8,
    #[serde(with = "float_array_bits")]
    pub params: [f32; 7],
}

/// COMMAND_ACK - vehicle response to COMMAND_LONG
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandAck {
    pub target: PeerIdentity,
    pub command: u16,
    pub result: MavResult,
    /// Completion percentage for in-progress results
    pub progress: u8,
}

/// MISSION_REQUEST_LIST - ask the vehicle for its item count
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissionRequestList {
    pub target: PeerIdentity,
    pub mission_type: MissionType,
}

/// MISSION_COUNT - number of items about to be transferred
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissionCount {
    pub target: PeerIdentity,
    pub count: u16,
    pub mission_type: MissionType,
}

/// MISSION_REQUEST_INT - ask for the item at `seq`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissionRequestInt {
    pub target: PeerIdentity,
    pub seq: u16,
    pub mission_type: MissionType,
}

/// MISSION_ITEM_INT - one mission item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissionItemInt {
    pub target: PeerIdentity,
    pub item: MissionItem,
}

/// MISSION_ACK - terminal response of a transfer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissionAck {
    pub target: PeerIdentity,
    pub result: MavMissionResult,
    pub mission_type: MissionType,
}

/// MISSION_CLEAR_ALL - delete a list on the vehicle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissionClearAll {
    pub target: PeerIdentity,
    pub mission_type: MissionType,
}

/// MISSION_CURRENT - periodic mission status broadcast by the vehicle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissionCurrent {
    /// Active item
    pub seq: u16,
    /// Number of items on board
    pub total: u16,
    /// Checksum identifying the mission on board
    pub mission_id: u32,
}

impl MissionCurrent {
    pub fn signature(&self) -> MissionSignature {
        MissionSignature {
            count: self.total,
            checksum: self.mission_id,
        }
    }
}

/// Union of all message types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Heartbeat(Heartbeat),
    MissionCurrent(MissionCurrent),
    MissionRequestList(MissionRequestList),
    MissionCount(MissionCount),
    MissionClearAll(MissionClearAll),
    MissionAck(MissionAck),
    MissionRequestInt(MissionRequestInt),
    MissionItemInt(MissionItemInt),
    CommandLong(CommandLong),
    CommandAck(CommandAck),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Heartbeat(_) => MessageType::Heartbeat,
            Message::MissionCurrent(_) => MessageType::MissionCurrent,
            Message::MissionRequestList(_) => MessageType::MissionRequestList,
            Message::MissionCount(_) => MessageType::MissionCount,
            Message::MissionClearAll(_) => MessageType::MissionClearAll,
            Message::MissionAck(_) => MessageType::MissionAck,
            Message::MissionRequestInt(_) => MessageType::MissionRequestInt,
            Message::MissionItemInt(_) => MessageType::MissionItemInt,
            Message::CommandLong(_) => MessageType::CommandLong,
            Message::CommandAck(_) => MessageType::CommandAck,
        }
    }

    /// Addressee of the message; broadcasts have none
    pub fn target(&self) -> Option<PeerIdentity> {
        match self {
            Message::Heartbeat(_) | Message::MissionCurrent(_) => None,
            Message::MissionRequestList(m) => Some(m.target),
            Message::MissionCount(m) => Some(m.target),
            Message::MissionClearAll(m) => Some(m.target),
            Message::MissionAck(m) => Some(m.target),
            Message::MissionRequestInt(m) => Some(m.target),
            Message::MissionItemInt(m) => Some(m.target),
            Message::CommandLong(m) => Some(m.target),
            Message::CommandAck(m) => Some(m.target),
        }
    }
}
