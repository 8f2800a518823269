use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::ops::{BitOr, BitOrAssign};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerType {
    Track,
    TrackProcessor,
    Plugin,
    Fader,
    ChannelSend,
    HardwareProcessor,
    Engine,
    ModulatorMacroProcessor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    Audio,
    /// MIDI events.
    Event,
    Cv,
    Control,
}

impl PortType {
    /// Whether a connection from `self` into `dest` is meaningful.
    pub fn can_feed(self, dest: PortType) -> bool {
        self == dest || (self == PortType::Cv && dest == PortType::Control)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortFlow {
    Input,
    Output,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortFlags(u32);

impl PortFlags {
    pub const NONE: Self = Self(0);
    pub const AUTOMATABLE: Self = Self(1 << 0);
    pub const MODULATOR_MACRO: Self = Self(1 << 1);
    pub const TOGGLE: Self = Self(1 << 2);
    pub const INTEGER: Self = Self(1 << 3);
    pub const STEREO: Self = Self(1 << 4);
    pub const STEREO_L: Self = Self(1 << 5);
    pub const STEREO_R: Self = Self(1 << 6);
    pub const PLUGIN_ENABLED: Self = Self(1 << 7);
    pub const SEND_RECEIVABLE: Self = Self(1 << 8);
    pub const HW: Self = Self(1 << 9);
    pub const FREEWHEEL: Self = Self(1 << 10);
    pub const NOT_ON_GUI: Self = Self(1 << 11);
    pub const CHANNEL_FADER: Self = Self(1 << 12);
    pub const SIDECHAIN: Self = Self(1 << 13);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for PortFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PortFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for PortFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortFlags({:#06x})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginSlotType {
    Insert,
    MidiFx,
    Instrument,
    Modulator,
}

/// Stable address of a plugin slot inside a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginAddress {
    pub track_hash: u32,
    pub slot_type: PluginSlotType,
    pub slot: usize,
}

/// Identity and addressing of a port.
///
/// This is the persistent identity of a port: connections are stored
/// against identifiers, never against runtime handles, so a serializer can
/// reconnect everything after a reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortIdentifier {
    pub owner_type: OwnerType,
    pub port_type: PortType,
    pub flow: PortFlow,
    #[serde(default)]
    pub flags: PortFlags,
    /// Hash of the owning track, 0 when not owned by a track.
    #[serde(default)]
    pub track_hash: u32,
    #[serde(default)]
    pub plugin_id: Option<PluginAddress>,
    #[serde(default)]
    pub port_index: usize,
    pub label: String,
    /// Stable symbol for externally addressed ports (plugin ports).
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub port_group: Option<String>,
    #[serde(default)]
    pub ext_id: Option<String>,
    /// Free text, not part of the identity.
    #[serde(default)]
    pub comment: Option<String>,
}

impl PortIdentifier {
    pub fn new(
        owner_type: OwnerType,
        port_type: PortType,
        flow: PortFlow,
        label: impl Into<String>,
    ) -> Self {
        Self {
            owner_type,
            port_type,
            flow,
            flags: PortFlags::NONE,
            track_hash: 0,
            plugin_id: None,
            port_index: 0,
            label: label.into(),
            symbol: None,
            uri: None,
            port_group: None,
            ext_id: None,
            comment: None,
        }
    }

    pub fn with_track(mut self, track_hash: u32) -> Self {
        self.track_hash = track_hash;
        self
    }

    pub fn with_index(mut self, port_index: usize) -> Self {
        self.port_index = port_index;
        self
    }

    pub fn with_flags(mut self, flags: PortFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_plugin(mut self, plugin_id: PluginAddress) -> Self {
        self.plugin_id = Some(plugin_id);
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn is_input(&self) -> bool {
        self.flow == PortFlow::Input
    }

    pub fn is_output(&self) -> bool {
        self.flow == PortFlow::Output
    }

    pub fn is_send(&self) -> bool {
        self.owner_type == OwnerType::ChannelSend
    }

    pub fn is_control(&self) -> bool {
        self.port_type == PortType::Control
    }

    /// Ports addressed by symbol compare by symbol, all others by
    /// index and label.
    fn address_eq(&self, other: &Self) -> bool {
        match (&self.symbol, &other.symbol) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.port_index == other.port_index && self.label == other.label,
            _ => false,
        }
    }

    fn field_hash<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    /// XOR of the hashes of every field that takes part in equality.
    pub fn identity_hash(&self) -> u64 {
        let mut h = Self::field_hash(&self.owner_type)
            ^ Self::field_hash(&(self.port_type, 1_u8))
            ^ Self::field_hash(&(self.flow, 2_u8))
            ^ Self::field_hash(&(self.flags, 3_u8))
            ^ Self::field_hash(&(self.track_hash, 4_u8))
            ^ Self::field_hash(&(self.plugin_id, 5_u8))
            ^ Self::field_hash(&(&self.uri, 6_u8))
            ^ Self::field_hash(&(&self.port_group, 7_u8))
            ^ Self::field_hash(&(&self.ext_id, 8_u8));
        match &self.symbol {
            Some(symbol) => h ^= Self::field_hash(&(symbol, 9_u8)),
            None => {
                h ^= Self::field_hash(&(self.port_index, 10_u8));
                h ^= Self::field_hash(&(&self.label, 11_u8));
            }
        }
        h
    }
}

impl PartialEq for PortIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.owner_type == other.owner_type
            && self.port_type == other.port_type
            && self.flow == other.flow
            && self.flags == other.flags
            && self.track_hash == other.track_hash
            && self.plugin_id == other.plugin_id
            && self.address_eq(other)
            && self.uri == other.uri
            && self.port_group == other.port_group
            && self.ext_id == other.ext_id
    }
}

impl Eq for PortIdentifier {}

impl Hash for PortIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.identity_hash());
    }
}

impl fmt::Display for PortIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flow = match self.flow {
            PortFlow::Input => "in",
            PortFlow::Output => "out",
        };
        match &self.symbol {
            Some(symbol) => write!(
                f,
                "{:?}[{:08x}]:{}:{} ({flow})",
                self.owner_type, self.track_hash, symbol, self.label
            ),
            None => write!(
                f,
                "{:?}[{:08x}]:{}#{} ({flow})",
                self.owner_type, self.track_hash, self.label, self.port_index
            ),
        }
    }
}

/// Hash of a track name, used as the owner key of its ports.
pub fn track_name_hash(name: &str) -> u32 {
    // FNV-1a, stable across runs so identifiers survive a reload.
    let mut h: u32 = 0x811c_9dc5;
    for b in name.as_bytes() {
        h ^= *b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn audio_out(label: &str, index: usize) -> PortIdentifier {
        PortIdentifier::new(OwnerType::Track, PortType::Audio, PortFlow::Output, label)
            .with_track(track_name_hash("Bass"))
            .with_index(index)
    }

    #[test]
    fn comment_is_not_significant() {
        let a = audio_out("Stereo Out L", 0);
        let mut b = a.clone();
        b.comment = Some("left side".to_string());
        assert_eq!(a, b);
        assert_eq!(a.identity_hash(), b.identity_hash());
    }

    #[test]
    fn indexed_ports_compare_index_and_label() {
        let a = audio_out("Stereo Out L", 0);
        assert_ne!(a, audio_out("Stereo Out L", 1));
        assert_ne!(a, audio_out("Stereo Out R", 0));
    }

    #[test]
    fn symbol_ports_ignore_index_and_label() {
        let a = audio_out("Cutoff", 3).with_symbol("cutoff");
        let mut b = audio_out("Filter Cutoff", 7).with_symbol("cutoff");
        assert_eq!(a, b);
        assert_eq!(a.identity_hash(), b.identity_hash());
        b.symbol = Some("resonance".to_string());
        assert_ne!(a, b);
    }

    #[test]
    fn symbol_and_indexed_are_distinct() {
        let a = audio_out("Cutoff", 0).with_symbol("cutoff");
        let b = audio_out("Cutoff", 0);
        assert_ne!(a, b);
    }

    #[test]
    fn flow_and_flags_participate() {
        let a = audio_out("Out", 0);
        let mut b = a.clone();
        b.flow = PortFlow::Input;
        assert_ne!(a, b);
        let c = a.clone().with_flags(PortFlags::STEREO_L);
        assert_ne!(a, c);
    }

    #[test]
    fn usable_as_hash_key() {
        let mut set = HashSet::new();
        set.insert(audio_out("Out", 0));
        let mut dup = audio_out("Out", 0);
        dup.comment = Some("dup".into());
        assert!(!set.insert(dup));
        assert!(set.insert(audio_out("Out", 1)));
    }

    #[test]
    fn serde_keeps_identity() {
        let id = audio_out("Out", 2)
            .with_flags(PortFlags::STEREO | PortFlags::STEREO_R)
            .with_plugin(PluginAddress {
                track_hash: 7,
                slot_type: PluginSlotType::Insert,
                slot: 1,
            });
        let json = serde_json::to_string(&id).unwrap();
        let back: PortIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
        assert!(back.flags.contains(PortFlags::STEREO_R));
    }

    #[test]
    fn flags_insert_remove() {
        let mut flags = PortFlags::AUTOMATABLE | PortFlags::TOGGLE;
        assert!(flags.contains(PortFlags::TOGGLE));
        flags.remove(PortFlags::TOGGLE);
        assert!(!flags.contains(PortFlags::TOGGLE));
        flags.insert(PortFlags::INTEGER);
        assert_eq!(
            flags.bits(),
            (PortFlags::AUTOMATABLE | PortFlags::INTEGER).bits()
        );
    }

    #[test]
    fn track_hash_is_stable() {
        assert_eq!(track_name_hash("Drums"), track_name_hash("Drums"));
        assert_ne!(track_name_hash("Drums"), track_name_hash("Bass"));
    }

    #[test]
    fn cv_feeds_control() {
        assert!(PortType::Cv.can_feed(PortType::Control));
        assert!(!PortType::Audio.can_feed(PortType::Event));
        assert!(PortType::Event.can_feed(PortType::Event));
    }
}
