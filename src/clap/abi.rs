//! Native-shaped CLAP types the host/plugin contract is written against.
//!
//! These mirror the C ABI event and buffer structs byte for byte so events
//! can be parsed from and reconstructed into the exact shape a plugin
//! expects. The vtable-based event list interfaces are modelled as plain
//! traits.

#![allow(non_camel_case_types)]

use std::ffi::c_void;

use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec::next_field;

pub const CLAP_CORE_EVENT_SPACE_ID: u16 = 0;

pub const CLAP_EVENT_NOTE_ON: u16 = 0;
pub const CLAP_EVENT_NOTE_OFF: u16 = 1;
pub const CLAP_EVENT_NOTE_CHOKE: u16 = 2;
pub const CLAP_EVENT_NOTE_END: u16 = 3;
pub const CLAP_EVENT_NOTE_EXPRESSION: u16 = 4;
pub const CLAP_EVENT_PARAM_VALUE: u16 = 5;
pub const CLAP_EVENT_PARAM_MOD: u16 = 6;
pub const CLAP_EVENT_PARAM_GESTURE_BEGIN: u16 = 7;
pub const CLAP_EVENT_PARAM_GESTURE_END: u16 = 8;
pub const CLAP_EVENT_TRANSPORT: u16 = 9;
pub const CLAP_EVENT_MIDI: u16 = 10;
pub const CLAP_EVENT_MIDI_SYSEX: u16 = 11;
pub const CLAP_EVENT_MIDI2: u16 = 12;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct clap_event_header {
    pub size: u32,
    pub time: u32,
    pub space_id: u16,
    pub type_: u16,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct clap_event_note {
    pub header: clap_event_header,
    pub note_id: i32,
    pub port_index: i16,
    pub channel: i16,
    pub key: i16,
    pub velocity: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct clap_event_note_expression {
    pub header: clap_event_header,
    pub expression_id: i32,
    pub note_id: i32,
    pub port_index: i16,
    pub channel: i16,
    pub key: i16,
    pub value: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct clap_event_param_value {
    pub header: clap_event_header,
    pub param_id: u32,
    pub cookie: *mut c_void,
    pub note_id: i32,
    pub port_index: i16,
    pub channel: i16,
    pub key: i16,
    pub value: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct clap_event_param_mod {
    pub header: clap_event_header,
    pub param_id: u32,
    pub cookie: *mut c_void,
    pub note_id: i32,
    pub port_index: i16,
    pub channel: i16,
    pub key: i16,
    pub amount: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct clap_event_param_gesture {
    pub header: clap_event_header,
    pub param_id: u32,
}

/// The transport snapshot also travels outside of event lists as part of
/// the process envelope, so unlike the other event structs it is fully
/// serializable.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct clap_event_transport {
    pub header: clap_event_header,
    pub flags: u32,
    pub song_pos_beats: i64,
    pub song_pos_seconds: i64,
    pub tempo: f64,
    pub tempo_inc: f64,
    pub loop_start_beats: i64,
    pub loop_end_beats: i64,
    pub loop_start_seconds: i64,
    pub loop_end_seconds: i64,
    pub bar_start: i64,
    pub bar_number: i32,
    pub tsig_num: u16,
    pub tsig_denom: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct clap_event_midi {
    pub header: clap_event_header,
    pub port_index: u16,
    pub data: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct clap_event_midi_sysex {
    pub header: clap_event_header,
    pub port_index: u16,
    pub buffer: *const u8,
    pub size: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct clap_event_midi2 {
    pub header: clap_event_header,
    pub port_index: u16,
    pub data: [u32; 4],
}

/// Storage wide enough for any core event, used for the reconstructed
/// native event caches. Every member starts with `clap_event_header`, so a
/// pointer to the union doubles as a pointer to the header.
#[repr(C)]
#[derive(Clone, Copy)]
pub union clap_event_any {
    pub header: clap_event_header,
    pub note: clap_event_note,
    pub note_expression: clap_event_note_expression,
    pub param_value: clap_event_param_value,
    pub param_mod: clap_event_param_mod,
    pub param_gesture: clap_event_param_gesture,
    pub transport: clap_event_transport,
    pub midi: clap_event_midi,
    pub midi_sysex: clap_event_midi_sysex,
    pub midi2: clap_event_midi2,
}

/// Per-port audio buffer metadata. The sample precision is signalled by
/// which of `data32`/`data64` is non-null; a port with neither pointer set
/// is only valid when it has zero channels.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct clap_audio_buffer {
    pub data32: *mut *mut f32,
    pub data64: *mut *mut f64,
    pub channel_count: u32,
    pub latency: u32,
    pub constant_mask: u64,
}

impl Default for clap_audio_buffer {
    fn default() -> Self {
        Self {
            data32: std::ptr::null_mut(),
            data64: std::ptr::null_mut(),
            channel_count: 0,
            latency: 0,
            constant_mask: 0,
        }
    }
}

// Only the metadata crosses the wire. The channel pointers are
// reconstructed against the shared audio region on the other side, so
// decoding zeroes them rather than leaving uninitialized garbage.
impl Serialize for clap_audio_buffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.channel_count)?;
        tuple.serialize_element(&self.latency)?;
        tuple.serialize_element(&self.constant_mask)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for clap_audio_buffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BufferVisitor;

        impl<'de> Visitor<'de> for BufferVisitor {
            type Value = clap_audio_buffer;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("audio buffer metadata")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<clap_audio_buffer, A::Error> {
                Ok(clap_audio_buffer {
                    data32: std::ptr::null_mut(),
                    data64: std::ptr::null_mut(),
                    channel_count: next_field(&mut seq, "channel_count")?,
                    latency: next_field(&mut seq, "latency")?,
                    constant_mask: next_field(&mut seq, "constant_mask")?,
                })
            }
        }

        deserializer.deserialize_tuple(3, BufferVisitor)
    }
}

/// Host-side view of an input event list.
///
/// `get` hands out a reference to the header of a complete event struct:
/// the bytes behind it are valid for the full event indicated by
/// `header.size`/`header.type_`. Consumers rely on that to read the rest of
/// the event.
pub trait InputEvents {
    fn size(&self) -> u32;
    fn get(&mut self, index: u32) -> Option<&clap_event_header>;
}

/// Receiving end of an output event list. `try_push` returns whether the
/// event was accepted; the same complete-event contract as
/// [`InputEvents::get`] applies to the passed header.
pub trait OutputEvents {
    fn try_push(&mut self, event: &clap_event_header) -> bool;
}

/// The borrowed equivalent of `clap_process_t`: what a host hands to
/// `clap_plugin::process()`, with the vtable interfaces replaced by trait
/// objects.
pub struct Process<'a> {
    pub steady_time: i64,
    pub frames_count: u32,
    pub transport: Option<&'a clap_event_transport>,
    pub audio_inputs: &'a [clap_audio_buffer],
    pub audio_outputs: &'a mut [clap_audio_buffer],
    pub in_events: &'a mut dyn InputEvents,
    pub out_events: &'a mut dyn OutputEvents,
}
