//! Native-shaped VST2 types.
//!
//! The event structs follow the reverse-engineered `vestige` layout. An
//! event blob is typed by its leading `event_type` field; the two known
//! shapes are plain MIDI and sysex.

use std::ffi::c_void;

use serde::{Deserialize, Serialize};

pub const K_VST_MIDI_TYPE: i32 = 1;
pub const K_VST_SYSEX_TYPE: i32 = 6;

pub const K_VST_TRANSPORT_CHANGED: i32 = 1;
pub const K_VST_TRANSPORT_PLAYING: i32 = 1 << 1;
pub const K_VST_TRANSPORT_CYCLE_ACTIVE: i32 = 1 << 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VstMidiEvent {
    pub event_type: i32,
    pub byte_size: i32,
    pub delta_frames: i32,
    pub flags: i32,
    pub note_length: i32,
    pub note_offset: i32,
    pub midi_data: [u8; 4],
    pub detune: i8,
    pub note_off_velocity: u8,
    pub reserved1: u8,
    pub reserved2: u8,
}

/// Carries a heap pointer to the sysex dump; the serializable counterpart
/// owns the bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VstMidiSysexEvent {
    pub event_type: i32,
    pub byte_size: i32,
    pub delta_frames: i32,
    pub flags: i32,
    pub dump_bytes: i32,
    pub reserved1: *mut c_void,
    pub sysex_dump: *const u8,
    pub reserved2: *mut c_void,
}

/// An event blob as it appears in a host's `VstEvents` array. Both
/// members start with the same four header fields, so `event_type` can be
/// read through either side to pick the live one.
#[repr(C)]
#[derive(Clone, Copy)]
pub union VstEvent {
    pub midi: VstMidiEvent,
    pub sysex: VstMidiSysexEvent,
}

/// Transport snapshot answered by `audioMasterGetTime`, prefetched once
/// per process cycle.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VstTimeInfo {
    pub sample_pos: f64,
    pub sample_rate: f64,
    pub nano_seconds: f64,
    pub ppq_pos: f64,
    pub tempo: f64,
    pub bar_start_pos: f64,
    pub cycle_start_pos: f64,
    pub cycle_end_pos: f64,
    pub time_sig_numerator: i32,
    pub time_sig_denominator: i32,
    pub smpte_offset: i32,
    pub smpte_frame_rate: i32,
    pub samples_to_next_clock: i32,
    pub flags: i32,
}

/// Receives reconstructed output events. Implementations must only read
/// the union side named by the event's type field; any pointers inside
/// are owned by the caller and valid only for the duration of the call.
pub trait EventSink {
    /// Returns whether the event was accepted.
    fn accept(&mut self, event: &VstEvent) -> bool;
}
