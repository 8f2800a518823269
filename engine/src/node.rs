use crate::{
    error::ProcessFault,
    mutex::UnsafeMutex,
    port::{Port, PortHandle},
};
use std::ops::Range;
use std::sync::Arc;

pub type NodeId = usize;

/// Position of the current processing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessTimeInfo {
    /// Frame position of the cycle start since the engine started.
    pub g_start_frame: u64,
    /// Offset of the window inside the cycle.
    pub local_offset: u32,
    pub nframes: u32,
}

impl ProcessTimeInfo {
    pub fn window(&self) -> Range<usize> {
        let start = self.local_offset as usize;
        start..start + self.nframes as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Track,
    Fader,
    ChannelSend,
    Plugin,
    HardwareInput,
    HardwareOutput,
}

/// Anything the graph can run once per cycle.
///
/// Input ports are already mixed from their sources when `process` runs;
/// the node only writes its own output ports.
pub trait Processable: Send {
    fn name(&self) -> &str;
    fn kind(&self) -> NodeKind;
    fn inputs(&self) -> &[PortHandle];
    fn outputs(&self) -> &[PortHandle];
    fn process(&mut self, time: &ProcessTimeInfo) -> Result<(), ProcessFault>;

    /// Processing delay in frames.
    fn latency(&self) -> usize {
        0
    }
}

pub type ProcessorHandle = Arc<UnsafeMutex<Box<dyn Processable>>>;

/// A node as seen by the scheduler. Rebuilt on every recalculation.
#[derive(Clone)]
pub struct GraphNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub inputs: Vec<PortHandle>,
    pub outputs: Vec<PortHandle>,
    /// Processing delay of this node alone, in frames.
    pub latency: usize,
    pub processor: ProcessorHandle,
}

impl GraphNode {
    pub fn new(id: NodeId, processor: ProcessorHandle) -> Self {
        let p = processor.get();
        Self {
            id,
            name: p.name().to_string(),
            kind: p.kind(),
            inputs: p.inputs().to_vec(),
            outputs: p.outputs().to_vec(),
            latency: p.latency(),
            processor: processor.clone(),
        }
    }
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("latency", &self.latency)
            .finish()
    }
}

pub(crate) fn samples_in<'a>(
    port: &'a Port,
    time: &ProcessTimeInfo,
) -> Result<&'a [f32], ProcessFault> {
    port.samples()
        .ok_or(ProcessFault::WrongBufferKind)?
        .get(time.window())
        .ok_or(ProcessFault::BufferTooShort)
}

pub(crate) fn samples_out<'a>(
    port: &'a mut Port,
    time: &ProcessTimeInfo,
) -> Result<&'a mut [f32], ProcessFault> {
    port.samples_mut()
        .ok_or(ProcessFault::WrongBufferKind)?
        .get_mut(time.window())
        .ok_or(ProcessFault::BufferTooShort)
}

/// Writes `src * gain` into `dest` for the window.
pub(crate) fn copy_scaled(
    src: &Port,
    dest: &mut Port,
    time: &ProcessTimeInfo,
    gain: f32,
) -> Result<(), ProcessFault> {
    let input = samples_in(src, time)?;
    let output = samples_out(dest, time)?;
    output
        .iter_mut()
        .zip(input)
        .for_each(|(o, i)| *o = *i * gain);
    Ok(())
}

/// Appends the window's events of `src` to `dest`.
pub(crate) fn copy_events(
    src: &Port,
    dest: &mut Port,
    time: &ProcessTimeInfo,
) -> Result<(), ProcessFault> {
    let input = src.events().ok_or(ProcessFault::WrongBufferKind)?;
    let output = dest.events_mut().ok_or(ProcessFault::WrongBufferKind)?;
    output.append(input, time.local_offset, time.nframes, false);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{OwnerType, PortFlow, PortIdentifier, PortType};

    fn audio(flow: PortFlow, len: usize) -> Port {
        Port::new(
            PortIdentifier::new(OwnerType::Track, PortType::Audio, flow, "a"),
            len,
        )
    }

    #[test]
    fn copy_scaled_respects_window() {
        let mut src = audio(PortFlow::Input, 8);
        src.samples_mut().unwrap().fill(1.0);
        let mut dest = audio(PortFlow::Output, 8);
        let time = ProcessTimeInfo {
            g_start_frame: 0,
            local_offset: 2,
            nframes: 4,
        };
        copy_scaled(&src, &mut dest, &time, 0.5).unwrap();
        assert_eq!(
            dest.samples().unwrap(),
            &[0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]
        );
    }

    #[test]
    fn short_buffers_fault() {
        let src = audio(PortFlow::Input, 4);
        let mut dest = audio(PortFlow::Output, 4);
        let time = ProcessTimeInfo {
            g_start_frame: 0,
            local_offset: 0,
            nframes: 8,
        };
        assert_eq!(
            copy_scaled(&src, &mut dest, &time, 1.0),
            Err(ProcessFault::BufferTooShort)
        );
    }
}
