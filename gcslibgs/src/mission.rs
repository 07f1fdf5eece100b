//! Mission item definitions
//!
//! A mission is an ordered list of items (waypoints and commands) executed
//! by the vehicle. Items travel one per message during a transfer and must
//! come back bit-identical, including NaN "don't care" parameters.

use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};

use crate::protocol::float_bits;
use crate::types::MissionType;

/// MAV_CMD_NAV_WAYPOINT
pub const MAV_CMD_NAV_WAYPOINT: u16 = 16;

/// MAV_CMD_NAV_RETURN_TO_LAUNCH
pub const MAV_CMD_NAV_RETURN_TO_LAUNCH: u16 = 20;

/// MAV_CMD_NAV_LAND
pub const MAV_CMD_NAV_LAND: u16 = 21;

/// MAV_CMD_NAV_TAKEOFF
pub const MAV_CMD_NAV_TAKEOFF: u16 = 22;

/// Highest command code in the navigation range
pub const MAV_CMD_NAV_LAST: u16 = 95;

/// MAV_CMD_DO_CHANGE_SPEED
pub const MAV_CMD_DO_CHANGE_SPEED: u16 = 178;

/// MAV_FRAME_MISSION
pub const MAV_FRAME_MISSION: u8 = 2;

/// MAV_FRAME_GLOBAL_RELATIVE_ALT_INT
pub const MAV_FRAME_GLOBAL_RELATIVE_ALT_INT: u8 = 6;

/// Scale between degrees and the integer x/y fields
pub const DEGREES_SCALE: f64 = 1e7;

/// Length of the little-endian item encoding used for signatures:
/// seq, frame, command, current, autocontinue, param1..4, x, y, z, type
pub const ITEM_WIRE_LEN: usize = 2 + 1 + 2 + 1 + 1 + 4 * 4 + 4 + 4 + 4 + 1;

const MISSION_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// One waypoint or command of a mission (MISSION_ITEM_INT layout)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MissionItem {
    /// Sequence index within the list
    pub seq: u16,
    /// Coordinate frame
    pub frame: u8,
    /// Command code
    pub command: u16,
    /// Non-zero marks the item the vehicle starts from
    pub current: u8,
    /// Non-zero continues to the next item automatically
    pub autocontinue: u8,
    #[serde(with = "float_bits")]
    pub param1: f32,
    #[serde(with = "float_bits")]
    pub param2: f32,
    #[serde(with = "float_bits")]
    pub param3: f32,
    #[serde(with = "float_bits")]
    pub param4: f32,
    /// Latitude in degrees * 1e7, or a local x position
    pub x: i32,
    /// Longitude in degrees * 1e7, or a local y position
    pub y: i32,
    #[serde(with = "float_bits")]
    pub z: f32,
    /// List this item belongs to
    pub mission_type: MissionType,
}

impl MissionItem {
    /// A global waypoint at the given position (altitude relative to home)
    pub fn waypoint(seq: u16, latitude_deg: f64, longitude_deg: f64, altitude_m: f32) -> Self {
        Self {
            seq,
            frame: MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
            command: MAV_CMD_NAV_WAYPOINT,
            current: 0,
            autocontinue: 1,
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            param4: f32::NAN,
            x: scale_degrees(latitude_deg),
            y: scale_degrees(longitude_deg),
            z: altitude_m,
            mission_type: MissionType::Mission,
        }
    }

    /// A ground speed change taking effect at this point of the mission
    pub fn change_speed(seq: u16, speed_m_s: f32) -> Self {
        Self {
            seq,
            frame: MAV_FRAME_MISSION,
            command: MAV_CMD_DO_CHANGE_SPEED,
            current: 0,
            autocontinue: 1,
            param1: 1.0,
            param2: speed_m_s,
            param3: -1.0,
            param4: 0.0,
            x: 0,
            y: 0,
            z: f32::NAN,
            mission_type: MissionType::Mission,
        }
    }

    pub fn with_current(mut self, current: bool) -> Self {
        self.current = u8::from(current);
        self
    }

    pub fn with_mission_type(mut self, mission_type: MissionType) -> Self {
        self.mission_type = mission_type;
        self
    }

    pub fn is_current(&self) -> bool {
        self.current != 0
    }

    pub fn is_navigation(&self) -> bool {
        self.command <= MAV_CMD_NAV_LAST
    }

    pub fn latitude_deg(&self) -> f64 {
        self.x as f64 / DEGREES_SCALE
    }

    pub fn longitude_deg(&self) -> f64 {
        self.y as f64 / DEGREES_SCALE
    }

    /// Little-endian encoding of every wire field
    pub fn to_wire_bytes(&self) -> [u8; ITEM_WIRE_LEN] {
        let mut out = [0u8; ITEM_WIRE_LEN];
        let mut at = 0;
        let mut put = |bytes: &[u8]| {
            out[at..at + bytes.len()].copy_from_slice(bytes);
            at += bytes.len();
        };
        put(&self.seq.to_le_bytes());
        put(&[self.frame]);
        put(&self.command.to_le_bytes());
        put(&[self.current, self.autocontinue]);
        put(&self.param1.to_bits().to_le_bytes());
        put(&self.param2.to_bits().to_le_bytes());
        put(&self.param3.to_bits().to_le_bytes());
        put(&self.param4.to_bits().to_le_bytes());
        put(&self.x.to_le_bytes());
        put(&self.y.to_le_bytes());
        put(&self.z.to_bits().to_le_bytes());
        put(&[self.mission_type.to_u8()]);
        debug_assert_eq!(at, ITEM_WIRE_LEN);
        out
    }
}

// Bit-exact so that NaN parameters compare equal to themselves.
impl PartialEq for MissionItem {
    fn eq(&self, other: &Self) -> bool {
        self.to_wire_bytes() == other.to_wire_bytes()
    }
}

impl Eq for MissionItem {}

/// Convert degrees to the scaled integer representation
pub fn scale_degrees(degrees: f64) -> i32 {
    (degrees * DEGREES_SCALE).round() as i32
}

/// Item count plus CRC-32 over the item list
///
/// The vehicle advertises the same checksum as the mission id in
/// MISSION_CURRENT, which lets the ground side tell whether the mission on
/// board is still the one it last saw.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MissionSignature {
    pub count: u16,
    pub checksum: u32,
}

impl MissionSignature {
    pub fn of(items: &[MissionItem]) -> Self {
        let mut digest = MISSION_CRC.digest();
        for item in items {
            digest.update(&item.to_wire_bytes());
        }
        Self {
            count: u16::try_from(items.len()).unwrap_or(u16::MAX),
            checksum: digest.finalize(),
        }
    }

    pub fn empty() -> Self {
        Self::of(&[])
    }
}
