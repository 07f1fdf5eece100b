//! Type definitions shared between ground and vehicle software

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a link endpoint (system id, component id)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIdentity {
    pub system_id: u8,
    pub component_id: u8,
}

impl PeerIdentity {
    pub const fn new(system_id: u8, component_id: u8) -> Self {
        Self {
            system_id,
            component_id,
        }
    }

    /// Whether a message addressed to `target` is meant for this endpoint.
    ///
    /// System id 0 is broadcast; component id 0 addresses every component
    /// of the system.
    pub fn is_addressed_by(&self, target: PeerIdentity) -> bool {
        (target.system_id == 0 || target.system_id == self.system_id)
            && (target.component_id == 0 || target.component_id == self.component_id)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.system_id, self.component_id)
    }
}

/// Which item list a mission transfer operates on
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MissionType {
    #[default]
    Mission,
    Fence,
    Rally,
}

impl MissionType {
    pub fn to_u8(&self) -> u8 {
        match self {
            MissionType::Mission => 0,
            MissionType::Fence => 1,
            MissionType::Rally => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MissionType::Mission),
            1 => Some(MissionType::Fence),
            2 => Some(MissionType::Rally),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_addressing() {
        let vehicle = PeerIdentity::new(1, 1);
        assert!(vehicle.is_addressed_by(PeerIdentity::new(1, 1)));
        assert!(vehicle.is_addressed_by(PeerIdentity::new(0, 0)));
        assert!(vehicle.is_addressed_by(PeerIdentity::new(1, 0)));
        assert!(!vehicle.is_addressed_by(PeerIdentity::new(2, 1)));
        assert!(!vehicle.is_addressed_by(PeerIdentity::new(1, 190)));
    }

    #[test]
    fn test_mission_type_conversion() {
        assert_eq!(MissionType::Fence.to_u8(), 1);
        assert_eq!(MissionType::from_u8(2), Some(MissionType::Rally));
        assert_eq!(MissionType::from_u8(9), None);
    }

    #[test]
    fn test_peer_display() {
        assert_eq!(PeerIdentity::new(245, 190).to_string(), "245/190");
    }
}
