mod manager;

pub use manager::PortConnectionsManager;

use crate::port::{OwnerType, PortIdentifier};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_MULTIPLIER: f32 = 0.0;
pub const MAX_MULTIPLIER: f32 = 2.0;

/// A directed, weighted edge from an output port to an input port.
///
/// `==` compares every field. Whether two connections describe the same
/// edge is [`PortConnection::connects`], which only looks at the
/// endpoints; the registry never holds two connections with equal
/// endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortConnection {
    pub src: PortIdentifier,
    pub dest: PortIdentifier,
    pub multiplier: f32,
    /// Locked connections are managed by the engine and not offered to the
    /// user for removal.
    #[serde(default)]
    pub locked: bool,
    pub enabled: bool,
}

impl PortConnection {
    pub fn new(
        src: PortIdentifier,
        dest: PortIdentifier,
        multiplier: f32,
        locked: bool,
        enabled: bool,
    ) -> Self {
        Self {
            src,
            dest,
            multiplier,
            locked,
            enabled,
        }
    }

    pub fn update(&mut self, multiplier: f32, locked: bool, enabled: bool) {
        self.multiplier = multiplier;
        self.locked = locked;
        self.enabled = enabled;
    }

    pub fn connects(&self, src: &PortIdentifier, dest: &PortIdentifier) -> bool {
        self.src == *src && self.dest == *dest
    }

    pub fn touches(&self, port: &PortIdentifier) -> bool {
        self.src == *port || self.dest == *port
    }

    pub fn is_send(&self) -> bool {
        self.src.owner_type == OwnerType::ChannelSend
    }
}

impl fmt::Display for PortConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} x{:.3}", self.src, self.dest, self.multiplier)?;
        if !self.enabled {
            write!(f, " (disabled)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortFlow, PortType};

    #[test]
    fn equality_covers_attributes_but_edges_match_on_endpoints() {
        let src = PortIdentifier::new(OwnerType::Track, PortType::Audio, PortFlow::Output, "out");
        let dest = PortIdentifier::new(OwnerType::Fader, PortType::Audio, PortFlow::Input, "in");
        let unity = PortConnection::new(src.clone(), dest.clone(), 1.0, false, true);
        let mut half = unity.clone();
        half.update(0.5, false, true);

        assert_ne!(unity, half);
        assert!(unity.connects(&src, &dest) && half.connects(&src, &dest));
        half.update(1.0, false, true);
        assert_eq!(unity, half);
    }
}
