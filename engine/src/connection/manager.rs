use super::{MAX_MULTIPLIER, MIN_MULTIPLIER, PortConnection};
use crate::{
    error::{ConnectionError, SessionError},
    port::PortIdentifier,
};
use serde::{Deserialize, Serialize};

/// Registry of every connection in a session.
///
/// Only the control thread touches it. The render thread sees connections
/// through the source links of the published graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortConnectionsManager {
    connections: Vec<PortConnection>,
}

impl PortConnectionsManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(
        src: &PortIdentifier,
        dest: &PortIdentifier,
        multiplier: f32,
    ) -> Result<(), ConnectionError> {
        if !multiplier.is_finite() || !(MIN_MULTIPLIER..=MAX_MULTIPLIER).contains(&multiplier) {
            return Err(ConnectionError::InvalidMultiplier {
                src: src.to_string(),
                dest: dest.to_string(),
                multiplier,
            });
        }
        if !src.is_output() || !dest.is_input() {
            return Err(ConnectionError::FlowMismatch {
                src: src.to_string(),
                dest: dest.to_string(),
            });
        }
        if !src.port_type.can_feed(dest.port_type) {
            return Err(ConnectionError::TypeMismatch {
                src: src.to_string(),
                dest: dest.to_string(),
                src_type: src.port_type,
                dest_type: dest.port_type,
            });
        }
        Ok(())
    }

    /// Creates the connection or updates the existing one for the same
    /// endpoints.
    pub fn ensure_connect(
        &mut self,
        src: &PortIdentifier,
        dest: &PortIdentifier,
        multiplier: f32,
        locked: bool,
        enabled: bool,
    ) -> Result<&PortConnection, ConnectionError> {
        Self::validate(src, dest, multiplier)?;
        let index = match self.connections.iter().position(|c| c.connects(src, dest)) {
            Some(index) => {
                self.connections[index].update(multiplier, locked, enabled);
                index
            }
            None => {
                self.connections.push(PortConnection::new(
                    src.clone(),
                    dest.clone(),
                    multiplier,
                    locked,
                    enabled,
                ));
                self.connections.len() - 1
            }
        };
        Ok(&self.connections[index])
    }

    pub fn ensure_disconnect(&mut self, src: &PortIdentifier, dest: &PortIdentifier) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| !c.connects(src, dest));
        self.connections.len() != before
    }

    /// Removes every connection touching `port` and returns how many.
    pub fn ensure_disconnect_all(&mut self, port: &PortIdentifier) -> usize {
        let before = self.connections.len();
        self.connections.retain(|c| !c.touches(port));
        before - self.connections.len()
    }

    pub fn find(&self, src: &PortIdentifier, dest: &PortIdentifier) -> Option<&PortConnection> {
        self.connections.iter().find(|c| c.connects(src, dest))
    }

    pub fn find_mut(
        &mut self,
        src: &PortIdentifier,
        dest: &PortIdentifier,
    ) -> Option<&mut PortConnection> {
        self.connections.iter_mut().find(|c| c.connects(src, dest))
    }

    pub fn contains(&self, src: &PortIdentifier, dest: &PortIdentifier) -> bool {
        self.find(src, dest).is_some()
    }

    pub fn sources_of<'a>(
        &'a self,
        dest: &'a PortIdentifier,
    ) -> impl Iterator<Item = &'a PortConnection> + 'a {
        self.connections.iter().filter(move |c| c.dest == *dest)
    }

    pub fn dests_of<'a>(
        &'a self,
        src: &'a PortIdentifier,
    ) -> impl Iterator<Item = &'a PortConnection> + 'a {
        self.connections.iter().filter(move |c| c.src == *src)
    }

    /// Connections the user may remove: the unlocked sources of `port`
    /// when `sources` is set, its unlocked destinations otherwise.
    pub fn unlocked_sources_or_dests(
        &self,
        port: &PortIdentifier,
        sources: bool,
    ) -> Vec<&PortConnection> {
        self.connections
            .iter()
            .filter(|c| !c.locked)
            .filter(|c| if sources { c.dest == *port } else { c.src == *port })
            .collect()
    }

    pub fn sends(&self) -> impl Iterator<Item = &PortConnection> {
        self.connections.iter().filter(|c| c.is_send())
    }

    pub fn connections(&self) -> &[PortConnection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn clear(&mut self) {
        self.connections.clear();
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Loads connections saved by [`PortConnectionsManager::to_json`].
    /// Every entry is validated again; the first invalid one fails the load.
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let loaded: Self = serde_json::from_str(json)?;
        let mut manager = Self::new();
        for c in loaded.connections {
            manager.ensure_connect(&c.src, &c.dest, c.multiplier, c.locked, c.enabled)?;
        }
        Ok(manager)
    }
}
