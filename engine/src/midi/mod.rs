pub mod cc;
pub mod event;
pub mod events;

pub use event::{MidiEvent, MidiEventType, MidiTime};
pub use events::{EventBuffer, MAX_MIDI_EVENTS, MidiEvents, MidiQueue};
