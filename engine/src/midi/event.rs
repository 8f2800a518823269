use midly::{
    MidiMessage,
    live::{LiveEvent, SystemCommon, SystemRealtime},
};
use std::cmp::Ordering;

/// Frame offset of an event inside the current cycle.
pub type MidiTime = u32;

pub const MIDI_CH1_NOTE_OFF: u8 = 0x80;
pub const MIDI_CH1_NOTE_ON: u8 = 0x90;
pub const MIDI_CH1_POLY_AFTERTOUCH: u8 = 0xA0;
pub const MIDI_CH1_CTRL_CHANGE: u8 = 0xB0;
pub const MIDI_CH1_PROG_CHANGE: u8 = 0xC0;
pub const MIDI_CH1_CHAN_AFTERTOUCH: u8 = 0xD0;
pub const MIDI_CH1_PITCH_WHEEL: u8 = 0xE0;
pub const MIDI_SONG_POSITION: u8 = 0xF2;
pub const MIDI_CLOCK_BEAT: u8 = 0xF8;
pub const MIDI_CLOCK_START: u8 = 0xFA;
pub const MIDI_CLOCK_CONTINUE: u8 = 0xFB;
pub const MIDI_CLOCK_STOP: u8 = 0xFC;
pub const MIDI_ACTIVE_SENSING: u8 = 0xFE;
pub const MIDI_ALL_NOTES_OFF: u8 = 0x7B;
pub const NOTE_OFF_VELOCITY: u8 = 90;
pub const PITCHBEND_CENTER: u16 = 0x2000;

/// Event kinds, declared in tie-break precedence: when two events share a
/// frame, the one whose type is declared first is scheduled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MidiEventType {
    NoteOn,
    NoteOff,
    AllNotesOff,
    Controller,
    Pitchbend,
    ChannelPressure,
    PolyPressure,
    ProgramChange,
    SongPosition,
    Start,
    Continue,
    Clock,
    Stop,
    Raw,
}

impl MidiEventType {
    /// Classifies a raw message from its status byte (and, for controllers,
    /// the controller number).
    pub fn classify(raw: &[u8]) -> Self {
        let Some(&status) = raw.first() else {
            return Self::Raw;
        };
        match status & 0xF0 {
            MIDI_CH1_NOTE_OFF => Self::NoteOff,
            MIDI_CH1_NOTE_ON => {
                if raw.get(2).copied().unwrap_or(0) == 0 {
                    Self::NoteOff
                } else {
                    Self::NoteOn
                }
            }
            MIDI_CH1_CTRL_CHANGE => {
                if raw.get(1) == Some(&MIDI_ALL_NOTES_OFF) {
                    Self::AllNotesOff
                } else {
                    Self::Controller
                }
            }
            MIDI_CH1_PITCH_WHEEL => Self::Pitchbend,
            MIDI_CH1_CHAN_AFTERTOUCH => Self::ChannelPressure,
            MIDI_CH1_POLY_AFTERTOUCH => Self::PolyPressure,
            MIDI_CH1_PROG_CHANGE => Self::ProgramChange,
            0xF0 => match status {
                MIDI_SONG_POSITION => Self::SongPosition,
                MIDI_CLOCK_BEAT => Self::Clock,
                MIDI_CLOCK_START => Self::Start,
                MIDI_CLOCK_CONTINUE => Self::Continue,
                MIDI_CLOCK_STOP => Self::Stop,
                _ => Self::Raw,
            },
            _ => Self::Raw,
        }
    }

    pub fn has_channel(self) -> bool {
        matches!(
            self,
            Self::NoteOn
                | Self::NoteOff
                | Self::AllNotesOff
                | Self::Controller
                | Self::Pitchbend
                | Self::ChannelPressure
                | Self::PolyPressure
                | Self::ProgramChange
        )
    }
}

/// A timestamped MIDI message.
///
/// The raw bytes and the decoded fields are always written together, so
/// the two views never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    event_type: MidiEventType,
    channel: u8,
    note_pitch: u8,
    velocity: u8,
    controller: u8,
    control: u8,
    pitchbend: u16,
    time: MidiTime,
    raw: [u8; 3],
    raw_len: u8,
}

impl Default for MidiEvent {
    fn default() -> Self {
        Self {
            event_type: MidiEventType::Raw,
            channel: 0,
            note_pitch: 0,
            velocity: 0,
            controller: 0,
            control: 0,
            pitchbend: 0,
            time: 0,
            raw: [0; 3],
            raw_len: 0,
        }
    }
}

fn channel_nibble(channel: u8) -> u8 {
    debug_assert!((1..=16).contains(&channel), "MIDI channel {channel}");
    channel.clamp(1, 16) - 1
}

impl MidiEvent {
    /// `channel` starts from 1.
    pub fn note_on(channel: u8, note_pitch: u8, velocity: u8, time: MidiTime) -> Self {
        debug_assert!(velocity > 0, "note on with zero velocity");
        Self::decode(
            [
                MIDI_CH1_NOTE_ON | channel_nibble(channel),
                note_pitch & 0x7F,
                velocity.clamp(1, 0x7F),
            ],
            3,
            time,
        )
    }

    pub fn note_off(channel: u8, note_pitch: u8, time: MidiTime) -> Self {
        Self::decode(
            [
                MIDI_CH1_NOTE_OFF | channel_nibble(channel),
                note_pitch & 0x7F,
                NOTE_OFF_VELOCITY,
            ],
            3,
            time,
        )
    }

    pub fn control_change(channel: u8, controller: u8, control: u8, time: MidiTime) -> Self {
        Self::decode(
            [
                MIDI_CH1_CTRL_CHANGE | channel_nibble(channel),
                controller & 0x7F,
                control & 0x7F,
            ],
            3,
            time,
        )
    }

    pub fn all_notes_off(channel: u8, time: MidiTime) -> Self {
        Self::control_change(channel, MIDI_ALL_NOTES_OFF, 0, time)
    }

    /// `pitchbend` is the 14-bit value, 0x2000 being the center.
    pub fn pitchbend(channel: u8, pitchbend: u16, time: MidiTime) -> Self {
        debug_assert!(pitchbend < 0x4000, "pitchbend {pitchbend:#x}");
        let value = pitchbend.min(0x3FFF);
        Self::decode(
            [
                MIDI_CH1_PITCH_WHEEL | channel_nibble(channel),
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ],
            3,
            time,
        )
    }

    pub fn channel_pressure(channel: u8, value: u8, time: MidiTime) -> Self {
        Self::decode(
            [
                MIDI_CH1_CHAN_AFTERTOUCH | channel_nibble(channel),
                value & 0x7F,
                0,
            ],
            2,
            time,
        )
    }

    pub fn poly_pressure(channel: u8, note_pitch: u8, value: u8, time: MidiTime) -> Self {
        Self::decode(
            [
                MIDI_CH1_POLY_AFTERTOUCH | channel_nibble(channel),
                note_pitch & 0x7F,
                value & 0x7F,
            ],
            3,
            time,
        )
    }

    pub fn program_change(channel: u8, program: u8, time: MidiTime) -> Self {
        Self::decode(
            [MIDI_CH1_PROG_CHANGE | channel_nibble(channel), program & 0x7F, 0],
            2,
            time,
        )
    }

    pub fn song_position(total_sixteenths: u16, time: MidiTime) -> Self {
        Self::decode(
            [
                MIDI_SONG_POSITION,
                (total_sixteenths & 0x7F) as u8,
                ((total_sixteenths >> 7) & 0x7F) as u8,
            ],
            3,
            time,
        )
    }

    /// Any message of up to three bytes, stored as is.
    pub fn raw(bytes: &[u8], time: MidiTime) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > 3 {
            return None;
        }
        let mut raw = [0_u8; 3];
        raw[..bytes.len()].copy_from_slice(bytes);
        Some(Self::decode(raw, bytes.len() as u8, time))
    }

    /// Parses one complete wire message. Running status must already be
    /// resolved by the caller. Active sensing yields `None`, as does any
    /// message longer than three bytes.
    pub fn from_bytes(bytes: &[u8], time: MidiTime) -> Option<Self> {
        let live = LiveEvent::parse(bytes).ok()?;
        match live {
            LiveEvent::Midi { channel, message } => {
                let ch = channel.as_int() + 1;
                Some(match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        Self::note_on(ch, key.as_int(), vel.as_int(), time)
                    }
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        Self::note_off(ch, key.as_int(), time)
                    }
                    MidiMessage::Controller { controller, value } => {
                        Self::control_change(ch, controller.as_int(), value.as_int(), time)
                    }
                    MidiMessage::PitchBend { bend } => Self::pitchbend(ch, bend.0.as_int(), time),
                    MidiMessage::ChannelAftertouch { vel } => {
                        Self::channel_pressure(ch, vel.as_int(), time)
                    }
                    MidiMessage::Aftertouch { key, vel } => {
                        Self::poly_pressure(ch, key.as_int(), vel.as_int(), time)
                    }
                    MidiMessage::ProgramChange { program } => {
                        Self::program_change(ch, program.as_int(), time)
                    }
                })
            }
            LiveEvent::Realtime(SystemRealtime::ActiveSensing) => None,
            LiveEvent::Realtime(_) => Self::raw(&bytes[..1], time),
            LiveEvent::Common(SystemCommon::SongPosition(pos)) => {
                Some(Self::song_position(pos.as_int(), time))
            }
            LiveEvent::Common(_) => Self::raw(bytes, time),
        }
    }

    fn decode(raw: [u8; 3], raw_len: u8, time: MidiTime) -> Self {
        let event_type = MidiEventType::classify(&raw[..raw_len as usize]);
        let mut ev = Self {
            event_type,
            raw,
            raw_len,
            time,
            ..Self::default()
        };
        if event_type.has_channel() {
            ev.channel = (raw[0] & 0x0F) + 1;
        }
        match event_type {
            MidiEventType::NoteOn | MidiEventType::NoteOff => {
                ev.note_pitch = raw[1];
                ev.velocity = raw[2];
            }
            MidiEventType::Controller | MidiEventType::AllNotesOff => {
                ev.controller = raw[1];
                ev.control = raw[2];
            }
            MidiEventType::Pitchbend => {
                ev.pitchbend = (raw[1] as u16 & 0x7F) | ((raw[2] as u16 & 0x7F) << 7);
            }
            MidiEventType::ChannelPressure | MidiEventType::ProgramChange => {
                ev.control = raw[1];
            }
            MidiEventType::PolyPressure => {
                ev.note_pitch = raw[1];
                ev.control = raw[2];
            }
            _ => {}
        }
        ev
    }

    pub fn event_type(&self) -> MidiEventType {
        self.event_type
    }

    /// Channel starting from 1, 0 for system messages.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn note_pitch(&self) -> u8 {
        self.note_pitch
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn controller(&self) -> u8 {
        self.controller
    }

    pub fn control(&self) -> u8 {
        self.control
    }

    pub fn pitchbend_value(&self) -> u16 {
        self.pitchbend
    }

    pub fn time(&self) -> MidiTime {
        self.time
    }

    pub fn set_time(&mut self, time: MidiTime) {
        self.time = time;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw[..self.raw_len as usize]
    }

    pub fn raw_bytes(&self) -> [u8; 3] {
        self.raw
    }

    pub fn is_note_on(&self) -> bool {
        self.event_type == MidiEventType::NoteOn
    }

    pub fn is_note_off(&self) -> bool {
        self.event_type == MidiEventType::NoteOff
    }

    /// Rewrites the velocity of a note event.
    pub fn set_velocity(&mut self, velocity: u8) {
        if matches!(
            self.event_type,
            MidiEventType::NoteOn | MidiEventType::NoteOff
        ) {
            let velocity = velocity & 0x7F;
            if self.event_type == MidiEventType::NoteOn && velocity == 0 {
                return;
            }
            self.raw[2] = velocity;
            self.velocity = velocity;
        }
    }

    /// Moves a channel voice message to another channel (1-16). System
    /// messages are left alone.
    pub fn set_channel(&mut self, channel: u8) {
        if self.event_type.has_channel() {
            self.raw[0] = (self.raw[0] & 0xF0) | channel_nibble(channel);
            self.channel = (self.raw[0] & 0x0F) + 1;
        }
    }

    /// Scheduling order: ascending time, ties broken by type precedence.
    pub fn schedule_cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then(self.event_type.cmp(&other.event_type))
    }

    /// Structural identity used to detect duplicates. Velocity only counts
    /// for note-ons.
    pub fn same_as(&self, other: &Self) -> bool {
        self.event_type == other.event_type
            && self.channel == other.channel
            && self.note_pitch == other.note_pitch
            && (self.event_type != MidiEventType::NoteOn || self.velocity == other.velocity)
            && self.controller == other.controller
            && self.control == other.control
            && self.pitchbend == other.pitchbend
            && self.time == other.time
            && self.raw == other.raw
    }
}
