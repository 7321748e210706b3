//! Native-shaped VST3 types and interface traits.
//!
//! The event and bus buffer structs mirror the C++ ABI layout, untagged
//! unions included. The COM-style interfaces a host passes through
//! `ProcessData` are modelled as plain traits; out-of-range indices are
//! reported through [`InvalidArgument`] the way the native interfaces
//! report `kInvalidArgument`.

use serde::{Deserialize, Serialize};

use crate::error::InvalidArgument;

/// `SymbolicSampleSizes`: 32-bit float processing.
pub const K_SAMPLE32: i32 = 0;
/// `SymbolicSampleSizes`: 64-bit float processing.
pub const K_SAMPLE64: i32 = 1;

pub const EVENT_NOTE_ON: u16 = 0;
pub const EVENT_NOTE_OFF: u16 = 1;
pub const EVENT_DATA: u16 = 2;
pub const EVENT_POLY_PRESSURE: u16 = 3;
pub const EVENT_NOTE_EXPRESSION_VALUE: u16 = 4;
pub const EVENT_NOTE_EXPRESSION_TEXT: u16 = 5;
pub const EVENT_CHORD: u16 = 6;
pub const EVENT_SCALE: u16 = 7;
pub const EVENT_LEGACY_MIDI_CC_OUT: u16 = 65535;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NoteOnEvent {
    pub channel: i16,
    pub pitch: i16,
    pub tuning: f32,
    pub velocity: f32,
    pub length: i32,
    pub note_id: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NoteOffEvent {
    pub channel: i16,
    pub pitch: i16,
    pub velocity: f32,
    pub note_id: i32,
    pub tuning: f32,
}

/// Carries a heap buffer (sysex dumps, mostly). The pointer side of this is
/// only used natively; the serializable counterpart owns the bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DataEvent {
    pub size: u32,
    pub kind: u32,
    pub bytes: *const u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PolyPressureEvent {
    pub channel: i16,
    pub pitch: i16,
    pub pressure: f32,
    pub note_id: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NoteExpressionValueEvent {
    pub type_id: u32,
    pub note_id: i32,
    pub value: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NoteExpressionTextEvent {
    pub type_id: u32,
    pub note_id: i32,
    pub text_len: u32,
    pub text: *const u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ChordEvent {
    pub root: i16,
    pub bass_note: i16,
    pub mask: i16,
    pub text_len: u16,
    pub text: *const u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ScaleEvent {
    pub root: i16,
    pub mask: i16,
    pub text_len: u16,
    pub text: *const u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LegacyMidiCcOutEvent {
    pub control_number: u8,
    pub channel: i8,
    pub value: i8,
    pub value2: i8,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union EventData {
    pub note_on: NoteOnEvent,
    pub note_off: NoteOffEvent,
    pub data: DataEvent,
    pub poly_pressure: PolyPressureEvent,
    pub note_expression_value: NoteExpressionValueEvent,
    pub note_expression_text: NoteExpressionTextEvent,
    pub chord: ChordEvent,
    pub scale: ScaleEvent,
    pub legacy_midi_cc_out: LegacyMidiCcOutEvent,
}

/// The native event struct: shared header fields, a type tag, and the
/// untagged payload union.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Event {
    pub bus_index: i32,
    pub sample_offset: i32,
    pub ppq_position: f64,
    pub flags: u16,
    pub kind: u16,
    pub event: EventData,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union ChannelBuffers {
    pub channels_buffer32: *mut *mut f32,
    pub channels_buffer64: *mut *mut f64,
}

/// One audio bus. Which union side is live is determined by the owning
/// process data's `symbolic_sample_size`, not by the buffers themselves.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct AudioBusBuffers {
    pub num_channels: i32,
    pub silence_flags: u64,
    pub buffers: ChannelBuffers,
}

impl Default for AudioBusBuffers {
    fn default() -> Self {
        Self {
            num_channels: 0,
            silence_flags: 0,
            buffers: ChannelBuffers {
                channels_buffer32: std::ptr::null_mut(),
            },
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChordContext {
    pub key_note: u8,
    pub root_note: u8,
    pub chord_mask: i16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameRate {
    pub frames_per_second: u32,
    pub flags: u32,
}

/// Transport and project state snapshot, prefetched once per cycle.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessContext {
    pub state: u32,
    pub sample_rate: f64,
    pub project_time_samples: i64,
    pub system_time: i64,
    pub continuous_time_samples: i64,
    pub project_time_music: f64,
    pub bar_position_music: f64,
    pub cycle_start_music: f64,
    pub cycle_end_music: f64,
    pub tempo: f64,
    pub time_sig_numerator: i32,
    pub time_sig_denominator: i32,
    pub chord: ChordContext,
    pub smpte_offset_subframes: i32,
    pub frame_rate: FrameRate,
    pub samples_to_next_clock: i32,
}

/// `IEventList`. `get_event` hands the event out by value; any pointers
/// inside remain owned by the list and must not outlive it.
pub trait IEventList {
    fn get_event_count(&self) -> i32;
    fn get_event(&mut self, index: i32) -> Result<Event, InvalidArgument>;
    fn add_event(&mut self, event: &Event) -> Result<(), InvalidArgument>;
}

/// `IParamValueQueue`: ordered `(sample_offset, value)` automation points
/// for one parameter within the current cycle.
pub trait IParamValueQueue {
    fn get_parameter_id(&self) -> u32;
    fn get_point_count(&self) -> i32;
    fn get_point(&self, index: i32) -> Result<(i32, f64), InvalidArgument>;
    /// Returns the index of the newly added point.
    fn add_point(&mut self, sample_offset: i32, value: f64) -> Result<i32, InvalidArgument>;
}

/// `IParameterChanges`: one queue per changed parameter.
pub trait IParameterChanges {
    fn get_parameter_count(&self) -> i32;
    fn get_parameter_data(&mut self, index: i32) -> Option<&mut dyn IParamValueQueue>;
    /// Returns the queue's index along with the queue itself.
    fn add_parameter_data(&mut self, parameter_id: u32) -> (i32, &mut dyn IParamValueQueue);
}

/// The borrowed equivalent of `ProcessData`: what a host hands to
/// `IAudioProcessor::process()`. Null interface pointers become `None`.
pub struct ProcessData<'a> {
    pub process_mode: i32,
    pub symbolic_sample_size: i32,
    pub num_samples: i32,
    pub inputs: &'a [AudioBusBuffers],
    pub outputs: &'a mut [AudioBusBuffers],
    pub input_parameter_changes: Option<&'a mut dyn IParameterChanges>,
    pub output_parameter_changes: Option<&'a mut dyn IParameterChanges>,
    pub input_events: Option<&'a mut dyn IEventList>,
    pub output_events: Option<&'a mut dyn IEventList>,
    pub process_context: Option<&'a ProcessContext>,
}
