use crate::{
    error::ProcessFault,
    midi::MidiEvents,
    node::{NodeKind, Processable, ProcessTimeInfo, samples_in, samples_out},
    port::{
        OwnerType, PluginAddress, PluginSlotType, Port, PortFlow, PortHandle, PortIdentifier,
        PortType, track_name_hash,
    },
};

/// Port access handed to a plugin for one processing window.
pub struct PluginIo<'a> {
    inputs: &'a [PortHandle],
    outputs: &'a [PortHandle],
    time: &'a ProcessTimeInfo,
}

impl<'a> PluginIo<'a> {
    pub fn time(&self) -> &ProcessTimeInfo {
        self.time
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input(&self, index: usize) -> Result<&'a [f32], ProcessFault> {
        let inputs: &'a [PortHandle] = self.inputs;
        let port = inputs.get(index).ok_or(ProcessFault::WrongBufferKind)?;
        samples_in(port.get(), self.time)
    }

    /// Each output port is handed out to the plugin only; the render pool
    /// never touches it while the plugin runs. The slice borrows `self`, so
    /// at most one output is writable at a time:
    ///
    /// ```compile_fail
    /// use patchbay_engine::{error::ProcessFault, plugin::PluginIo};
    ///
    /// fn alias(io: &mut PluginIo<'_>) -> Result<(), ProcessFault> {
    ///     let a = io.output(0)?;
    ///     let b = io.output(0)?;
    ///     a[0] = b[0];
    ///     Ok(())
    /// }
    /// ```
    pub fn output(&mut self, index: usize) -> Result<&mut [f32], ProcessFault> {
        let port = self
            .outputs
            .get(index)
            .ok_or(ProcessFault::WrongBufferKind)?;
        samples_out(port.lock(), self.time)
    }

    pub fn input_events(&self, index: usize) -> Result<&'a MidiEvents, ProcessFault> {
        let inputs: &'a [PortHandle] = self.inputs;
        inputs
            .get(index)
            .and_then(|p| p.get().events())
            .ok_or(ProcessFault::WrongBufferKind)
    }

    pub fn output_events(&mut self, index: usize) -> Result<&mut MidiEvents, ProcessFault> {
        self.outputs
            .get(index)
            .and_then(|p| p.lock().events_mut())
            .ok_or(ProcessFault::WrongBufferKind)
    }

    pub fn control(&self, index: usize) -> Option<f32> {
        self.inputs.get(index).map(|p| p.get().control_value())
    }
}

/// Processing provided by a plugin host. Closures work too.
pub trait PluginProcess: Send {
    fn process(&mut self, io: &mut PluginIo<'_>) -> Result<(), ProcessFault>;

    fn latency(&self) -> usize {
        0
    }
}

impl<F> PluginProcess for F
where
    F: FnMut(&mut PluginIo<'_>) -> Result<(), ProcessFault> + Send,
{
    fn process(&mut self, io: &mut PluginIo<'_>) -> Result<(), ProcessFault> {
        self(io)
    }
}

/// Describes one plugin port.
#[derive(Debug, Clone)]
pub struct PluginPortSpec {
    pub port_type: PortType,
    pub symbol: String,
    pub label: String,
    /// Range for control ports: min, max, default.
    pub range: Option<(f32, f32, f32)>,
}

impl PluginPortSpec {
    pub fn new(port_type: PortType, symbol: &str, label: &str) -> Self {
        Self {
            port_type,
            symbol: symbol.to_string(),
            label: label.to_string(),
            range: None,
        }
    }

    pub fn control(symbol: &str, label: &str, min: f32, max: f32, default: f32) -> Self {
        Self {
            range: Some((min, max, default)),
            ..Self::new(PortType::Control, symbol, label)
        }
    }
}

/// Graph node around an externally hosted plugin. Its ports are addressed
/// by symbol, like any other externally described port.
pub struct PluginNode {
    name: String,
    inputs: Vec<PortHandle>,
    outputs: Vec<PortHandle>,
    plugin: Box<dyn PluginProcess>,
    check_outputs: bool,
}

impl PluginNode {
    pub fn new(
        name: String,
        slot: usize,
        inputs: &[PluginPortSpec],
        outputs: &[PluginPortSpec],
        block_length: usize,
        plugin: Box<dyn PluginProcess>,
    ) -> Self {
        let hash = track_name_hash(&name);
        let address = PluginAddress {
            track_hash: hash,
            slot_type: PluginSlotType::Insert,
            slot,
        };
        let build = |flow, specs: &[PluginPortSpec]| {
            specs
                .iter()
                .enumerate()
                .map(|(i, spec)| {
                    let id = PortIdentifier::new(OwnerType::Plugin, spec.port_type, flow, &spec.label)
                        .with_track(hash)
                        .with_index(i)
                        .with_plugin(address)
                        .with_symbol(&spec.symbol);
                    let port = Port::new(id, block_length);
                    let port = match spec.range {
                        Some((min, max, default)) if spec.port_type == PortType::Control => {
                            port.with_range(min, max, min, default)
                        }
                        _ => port,
                    };
                    port.into_handle()
                })
                .collect::<Vec<_>>()
        };
        Self {
            name,
            inputs: build(PortFlow::Input, inputs),
            outputs: build(PortFlow::Output, outputs),
            plugin,
            check_outputs: true,
        }
    }

    /// Skips the non-finite sample check on outputs.
    pub fn trusted(mut self) -> Self {
        self.check_outputs = false;
        self
    }
}

impl Processable for PluginNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Plugin
    }

    fn inputs(&self) -> &[PortHandle] {
        &self.inputs
    }

    fn outputs(&self) -> &[PortHandle] {
        &self.outputs
    }

    fn process(&mut self, time: &ProcessTimeInfo) -> Result<(), ProcessFault> {
        let mut io = PluginIo {
            inputs: &self.inputs,
            outputs: &self.outputs,
            time,
        };
        self.plugin.process(&mut io)?;
        if self.check_outputs {
            for out in &self.outputs {
                let port = out.get();
                let window = port.samples().and_then(|s| s.get(time.window()));
                if window.is_some_and(|buf| buf.iter().any(|s| !s.is_finite())) {
                    return Err(ProcessFault::NonFiniteOutput);
                }
            }
        }
        Ok(())
    }

    fn latency(&self) -> usize {
        self.plugin.latency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time() -> ProcessTimeInfo {
        ProcessTimeInfo {
            g_start_frame: 0,
            local_offset: 0,
            nframes: 4,
        }
    }

    fn gain_plugin() -> PluginNode {
        PluginNode::new(
            "gain".to_string(),
            0,
            &[
                PluginPortSpec::new(PortType::Audio, "in", "In"),
                PluginPortSpec::control("gain", "Gain", 0.0, 4.0, 2.0),
            ],
            &[PluginPortSpec::new(PortType::Audio, "out", "Out")],
            4,
            Box::new(|io: &mut PluginIo<'_>| -> Result<(), ProcessFault> {
                let gain = io.control(1).unwrap_or(1.0);
                let input = io.input(0)?;
                let output = io.output(0)?;
                output
                    .iter_mut()
                    .zip(input)
                    .for_each(|(o, i)| *o = *i * gain);
                Ok(())
            }),
        )
    }

    #[test]
    fn closure_plugin_processes_ports() {
        let mut node = gain_plugin();
        node.inputs()[0].lock().samples_mut().unwrap().fill(0.25);
        node.process(&time()).unwrap();
        assert_eq!(node.outputs()[0].get().samples().unwrap(), &[0.5; 4]);
    }

    #[test]
    fn ports_carry_symbol_and_slot() {
        let node = gain_plugin();
        let id = node.inputs()[1].get().id().clone();
        assert_eq!(id.symbol.as_deref(), Some("gain"));
        assert_eq!(id.plugin_id.map(|p| p.slot), Some(0));
        assert_eq!(node.inputs()[1].get().control_value(), 2.0);
    }

    #[test]
    fn outputs_are_written_one_after_another() {
        let mut node = PluginNode::new(
            "split".to_string(),
            0,
            &[
                PluginPortSpec::new(PortType::Audio, "in", "In"),
                PluginPortSpec::new(PortType::Event, "midi_in", "MIDI In"),
            ],
            &[
                PluginPortSpec::new(PortType::Audio, "left", "Left"),
                PluginPortSpec::new(PortType::Audio, "right", "Right"),
                PluginPortSpec::new(PortType::Event, "midi_out", "MIDI Out"),
            ],
            4,
            Box::new(|io: &mut PluginIo<'_>| -> Result<(), ProcessFault> {
                let input = io.input(0)?;
                io.output(0)?.copy_from_slice(input);
                for (o, i) in io.output(1)?.iter_mut().zip(input) {
                    *o = -*i;
                }
                let notes = io.input_events(1)?;
                io.output_events(2)?.append(notes, 0, 4, false);
                Ok(())
            }),
        );
        node.inputs()[0].lock().samples_mut().unwrap().fill(0.5);
        node.inputs()[1]
            .lock()
            .events_mut()
            .unwrap()
            .add_note_on(1, 60, 100, 2, false);
        node.process(&time()).unwrap();
        assert_eq!(node.outputs()[0].get().samples().unwrap(), &[0.5; 4]);
        assert_eq!(node.outputs()[1].get().samples().unwrap(), &[-0.5; 4]);
        assert_eq!(node.outputs()[2].get().events().unwrap().events().len(), 1);
    }

    #[test]
    fn non_finite_output_faults() {
        let mut node = PluginNode::new(
            "broken".to_string(),
            0,
            &[],
            &[PluginPortSpec::new(PortType::Audio, "out", "Out")],
            4,
            Box::new(|io: &mut PluginIo<'_>| -> Result<(), ProcessFault> {
                io.output(0)?.fill(f32::NAN);
                Ok(())
            }),
        );
        assert_eq!(node.process(&time()), Err(ProcessFault::NonFiniteOutput));
    }
}
