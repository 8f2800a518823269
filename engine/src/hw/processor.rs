use super::ring::{RingReader, RingWriter};
use crate::{
    error::ProcessFault,
    midi::{MidiEvent, MidiQueue},
    node::{NodeKind, Processable, ProcessTimeInfo, samples_in, samples_out},
    port::{
        OwnerType, Port, PortFlags, PortFlow, PortHandle, PortIdentifier, PortType,
        track_name_hash,
    },
};
use rtrb::Producer;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

pub const HW_INPUT_NAME: &str = "hw:capture";
pub const HW_OUTPUT_NAME: &str = "hw:playback";

fn hw_port(
    name: &str,
    port_type: PortType,
    flow: PortFlow,
    label: String,
    index: usize,
    block_length: usize,
) -> PortHandle {
    Port::new(
        PortIdentifier::new(OwnerType::HardwareProcessor, port_type, flow, label)
            .with_track(track_name_hash(name))
            .with_index(index)
            .with_flags(PortFlags::HW),
        block_length,
    )
    .into_handle()
}

/// Capture side of the backend: audio from the capture rings and events
/// from the hardware MIDI input, exposed as output ports.
pub struct HardwareInput {
    name: String,
    outputs: Vec<PortHandle>,
    capture: Vec<RingReader>,
}

impl HardwareInput {
    pub fn new(capture: Vec<RingReader>, block_length: usize) -> Self {
        let name = HW_INPUT_NAME.to_string();
        let mut outputs: Vec<PortHandle> = (0..capture.len())
            .map(|i| {
                hw_port(
                    &name,
                    PortType::Audio,
                    PortFlow::Output,
                    format!("Capture {}", i + 1),
                    i,
                    block_length,
                )
            })
            .collect();
        outputs.push(hw_port(
            &name,
            PortType::Event,
            PortFlow::Output,
            "MIDI Capture".to_string(),
            0,
            block_length,
        ));
        Self {
            name,
            outputs,
            capture,
        }
    }

    /// Producer handle for events arriving from hardware MIDI inputs. They
    /// show up on the MIDI capture port at the next cycle.
    pub fn midi_queue(&self) -> Option<MidiQueue> {
        self.outputs
            .last()
            .and_then(|p| p.get().events().map(|e| e.queue()))
    }
}

impl Processable for HardwareInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::HardwareInput
    }

    fn inputs(&self) -> &[PortHandle] {
        &[]
    }

    fn outputs(&self) -> &[PortHandle] {
        &self.outputs
    }

    fn process(&mut self, time: &ProcessTimeInfo) -> Result<(), ProcessFault> {
        // The MIDI capture port took over its queued events during
        // preparation; only audio needs copying.
        for (ring, port) in self.capture.iter_mut().zip(&self.outputs) {
            let out = samples_out(port.lock(), time)?;
            ring.read_into(out);
        }
        Ok(())
    }
}

/// Events leaving through the hardware MIDI output.
pub struct MidiPlayback {
    producer: Producer<MidiEvent>,
    dropped: Arc<AtomicU64>,
}

impl MidiPlayback {
    pub fn new(producer: Producer<MidiEvent>) -> Self {
        Self {
            producer,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dropped(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }

    fn push(&mut self, event: MidiEvent) {
        if self.producer.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Playback side of the backend: input ports copied into the playback
/// rings and the hardware MIDI output.
pub struct HardwareOutput {
    name: String,
    inputs: Vec<PortHandle>,
    playback: Vec<RingWriter>,
    midi: MidiPlayback,
}

impl HardwareOutput {
    pub fn new(playback: Vec<RingWriter>, midi: MidiPlayback, block_length: usize) -> Self {
        let name = HW_OUTPUT_NAME.to_string();
        let mut inputs: Vec<PortHandle> = (0..playback.len())
            .map(|i| {
                hw_port(
                    &name,
                    PortType::Audio,
                    PortFlow::Input,
                    format!("Playback {}", i + 1),
                    i,
                    block_length,
                )
            })
            .collect();
        inputs.push(hw_port(
            &name,
            PortType::Event,
            PortFlow::Input,
            "MIDI Playback".to_string(),
            0,
            block_length,
        ));
        Self {
            name,
            inputs,
            playback,
            midi,
        }
    }
}

impl Processable for HardwareOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::HardwareOutput
    }

    fn inputs(&self) -> &[PortHandle] {
        &self.inputs
    }

    fn outputs(&self) -> &[PortHandle] {
        &[]
    }

    fn process(&mut self, time: &ProcessTimeInfo) -> Result<(), ProcessFault> {
        for (ring, port) in self.playback.iter().zip(&self.inputs) {
            ring.try_write(samples_in(port.get(), time)?);
        }
        if let Some(events) = self.inputs.last().and_then(|p| p.get().events()) {
            let window = time.local_offset..time.local_offset + time.nframes;
            for event in events.iter().filter(|e| window.contains(&e.time())) {
                self.midi.push(*event);
            }
        }
        Ok(())
    }
}
