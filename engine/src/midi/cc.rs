/// MIDI 1.0 controller display names.
const CONTROLLER_NAMES: [&str; 128] = [
    "Bank Select",
    "Modulation Wheel",
    "Breath Controller",
    "Undefined",
    "Foot Controller",
    "Portamento Time",
    "Data Entry MSB",
    "Channel Volume",
    "Balance",
    "Undefined",
    "Pan",
    "Expression Controller",
    "Effect Control 1",
    "Effect Control 2",
    "Undefined",
    "Undefined",
    "General Purpose Controller 1",
    "General Purpose Controller 2",
    "General Purpose Controller 3",
    "General Purpose Controller 4",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "LSB for Bank Select",
    "LSB for Modulation Wheel",
    "LSB for Breath Controller",
    "LSB for Control 3 (Undefined)",
    "LSB for Foot Controller",
    "LSB for Portamento Time",
    "LSB for Data Entry",
    "LSB for Channel Volume",
    "LSB for Balance",
    "LSB for Control 9 (Undefined)",
    "LSB for Pan",
    "LSB for Expression Controller",
    "LSB for Effect Control 1",
    "LSB for Effect Control 2",
    "LSB for Control 14 (Undefined)",
    "LSB for Control 15 (Undefined)",
    "LSB for General Purpose Controller 1",
    "LSB for General Purpose Controller 2",
    "LSB for General Purpose Controller 3",
    "LSB for General Purpose Controller 4",
    "LSB for Control 20 (Undefined)",
    "LSB for Control 21 (Undefined)",
    "LSB for Control 22 (Undefined)",
    "LSB for Control 23 (Undefined)",
    "LSB for Control 24 (Undefined)",
    "LSB for Control 25 (Undefined)",
    "LSB for Control 26 (Undefined)",
    "LSB for Control 27 (Undefined)",
    "LSB for Control 28 (Undefined)",
    "LSB for Control 29 (Undefined)",
    "LSB for Control 30 (Undefined)",
    "LSB for Control 31 (Undefined)",
    "Damper Pedal on/off (Sustain)",
    "Portamento On/Off",
    "Sostenuto On/Off",
    "Soft Pedal On/Off",
    "Legato Footswitch",
    "Hold 2",
    "Sound Controller 1 (Sound Variation)",
    "Sound Controller 2 (Timbre)",
    "Sound Controller 3 (Release Time)",
    "Sound Controller 4 (Attack Time)",
    "Sound Controller 5 (Brightness)",
    "Sound Controller 6 (Decay Time)",
    "Sound Controller 7 (Vibrato Rate)",
    "Sound Controller 8 (Vibrato Depth)",
    "Sound Controller 9 (Vibrato Delay)",
    "Sound Controller 10",
    "General Purpose Controller 5",
    "General Purpose Controller 6",
    "General Purpose Controller 7",
    "General Purpose Controller 8",
    "Portamento Control",
    "Undefined",
    "Undefined",
    "Undefined",
    "High Resolution Velocity Prefix",
    "Undefined",
    "Undefined",
    "Effects 1 Depth (Reverb)",
    "Effects 2 Depth (Tremolo)",
    "Effects 3 Depth (Chorus)",
    "Effects 4 Depth (Detune)",
    "Effects 5 Depth (Phaser)",
    "Data Increment",
    "Data Decrement",
    "NRPN LSB",
    "NRPN MSB",
    "RPN LSB",
    "RPN MSB",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "Undefined",
    "All Sound Off",
    "Reset All Controllers",
    "Local Control On/Off",
    "All Notes Off",
    "Omni Mode Off",
    "Omni Mode On",
    "Mono Mode On",
    "Poly Mode On",
];

pub const MIDI_CC_SUSTAIN: u8 = 64;
pub const MIDI_CC_ALL_SOUND_OFF: u8 = 120;
pub const MIDI_CC_ALL_NOTES_OFF: u8 = 123;

pub fn controller_name(controller: u8) -> &'static str {
    CONTROLLER_NAMES
        .get(controller as usize)
        .copied()
        .unwrap_or("Undefined")
}

/// Controllers 120-127 select channel modes rather than parameters.
pub fn is_channel_mode(controller: u8) -> bool {
    (120..=127).contains(&controller)
}
