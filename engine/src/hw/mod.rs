mod backend;
mod processor;
mod ring;

pub use backend::{DummyBackend, HwBackend, HwEndpoints, RenderHandle, bridge, spread_event_frames};
pub use processor::{HW_INPUT_NAME, HW_OUTPUT_NAME, HardwareInput, HardwareOutput, MidiPlayback};
pub use ring::{RingReader, RingStats, RingWriteGuard, RingWriter, hw_ring};
