//! The per-cycle CLAP process envelope.
//!
//! At the start of a process cycle the host side copies the input audio
//! into the shared memory region and everything else (events, transport,
//! buffer metadata) into a [`Process`] that goes over the wire. The other
//! side reconstructs a native-shaped process view over its own mapping of
//! the region, runs the plugin, and sends back only the output fields
//! through a [`Response`].

use std::ffi::c_void;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::abi::{self, clap_audio_buffer, clap_event_transport};
use super::events::EventList;
use crate::codec::{next_field, next_field_in_place, DeserializeInPlace, VecInPlace};
use crate::error::Result;
use crate::shm::AudioShmBuffer;

/// Maximum number of audio ports per direction.
pub const MAX_AUDIO_PORTS: usize = 1 << 14;

/// Explicit per-port precision tag. Natively this is encoded by which of
/// the two channel pointers is set, which cannot survive serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferKind {
    #[default]
    Float32,
    Float64,
}

crate::codec::impl_in_place_pod!(BufferKind, clap_event_transport, clap_audio_buffer);

/// Serializable snapshot of one `clap_plugin::process()` call. A bridge
/// keeps one of these per plugin instance and refills it every cycle.
#[derive(Debug, Default)]
pub struct Process {
    pub steady_time: i64,
    pub frames_count: u32,
    pub transport: Option<clap_event_transport>,

    /// Audio port metadata only; the samples live in the shared region.
    pub audio_inputs: Vec<clap_audio_buffer>,
    pub audio_inputs_kind: Vec<BufferKind>,
    pub audio_outputs: Vec<clap_audio_buffer>,
    pub audio_outputs_kind: Vec<BufferKind>,

    pub in_events: EventList,
    /// Filled by the plugin, returned through the [`Response`]. Never
    /// serialized as part of the request.
    pub out_events: EventList,
}

impl Process {
    /// Copies everything except the audio samples out of a host-provided
    /// process view; the input audio goes into `shared_audio_buffers`.
    /// Channel counts are clamped to what the shared region can hold.
    pub fn repopulate(
        &mut self,
        process: &mut abi::Process<'_>,
        shared_audio_buffers: &AudioShmBuffer,
    ) -> Result<()> {
        self.steady_time = process.steady_time;
        self.frames_count = process.frames_count;
        self.transport = process.transport.copied();

        let frames = process.frames_count as usize;

        self.audio_inputs
            .resize(process.audio_inputs.len(), clap_audio_buffer::default());
        self.audio_inputs_kind
            .resize(process.audio_inputs.len(), BufferKind::default());
        for (port, host_buffer) in process.audio_inputs.iter().enumerate() {
            // Hosts sometimes provide more (or fewer) channels than were
            // negotiated, so account for both
            let channels = (shared_audio_buffers.num_input_channels(port) as u32)
                .min(host_buffer.channel_count);
            self.audio_inputs[port] = clap_audio_buffer {
                channel_count: channels,
                latency: host_buffer.latency,
                constant_mask: host_buffer.constant_mask,
                ..clap_audio_buffer::default()
            };

            if !host_buffer.data32.is_null() {
                self.audio_inputs_kind[port] = BufferKind::Float32;
                for channel in 0..channels as usize {
                    // SAFETY: the host guarantees channel_count valid
                    // channel pointers with frames_count samples each
                    let samples = unsafe {
                        std::slice::from_raw_parts(*host_buffer.data32.add(channel), frames)
                    };
                    shared_audio_buffers.write_input_channel(port, channel, samples)?;
                }
            } else if !host_buffer.data64.is_null() {
                self.audio_inputs_kind[port] = BufferKind::Float64;
                for channel in 0..channels as usize {
                    let samples = unsafe {
                        std::slice::from_raw_parts(*host_buffer.data64.add(channel), frames)
                    };
                    shared_audio_buffers.write_input_channel(port, channel, samples)?;
                }
            } else {
                // The only time neither pointer is set is a port without
                // channels
                debug_assert_eq!(host_buffer.channel_count, 0);
                self.audio_inputs_kind[port] = BufferKind::default();
            }
        }

        self.audio_outputs
            .resize(process.audio_outputs.len(), clap_audio_buffer::default());
        self.audio_outputs_kind
            .resize(process.audio_outputs.len(), BufferKind::default());
        for (port, host_buffer) in process.audio_outputs.iter().enumerate() {
            let channels = (shared_audio_buffers.num_output_channels(port) as u32)
                .min(host_buffer.channel_count);
            self.audio_outputs[port] = clap_audio_buffer {
                channel_count: channels,
                latency: host_buffer.latency,
                constant_mask: host_buffer.constant_mask,
                ..clap_audio_buffer::default()
            };

            self.audio_outputs_kind[port] = if !host_buffer.data32.is_null() {
                BufferKind::Float32
            } else if !host_buffer.data64.is_null() {
                BufferKind::Float64
            } else {
                debug_assert_eq!(host_buffer.channel_count, 0);
                BufferKind::default()
            };
        }

        self.in_events.repopulate(process.in_events);

        Ok(())
    }

    /// Rebuilds the native-shaped process view on the plugin side. The
    /// caller supplies per-port channel pointer tables targeting its own
    /// mapping of the shared region; each port's pointers are installed
    /// strictly on the side of the union the recorded precision tag names,
    /// the other pointer stays null.
    pub fn reconstruct<'a>(
        &'a mut self,
        input_pointers: &'a [Vec<*mut c_void>],
        output_pointers: &'a [Vec<*mut c_void>],
    ) -> abi::Process<'a> {
        assert!(self.audio_inputs.len() <= input_pointers.len());
        assert!(self.audio_outputs.len() <= output_pointers.len());
        assert_eq!(self.audio_inputs.len(), self.audio_inputs_kind.len());
        assert_eq!(self.audio_outputs.len(), self.audio_outputs_kind.len());

        for (port, buffer) in self.audio_inputs.iter_mut().enumerate() {
            // A port without channels natively has neither pointer set
            if buffer.channel_count == 0 {
                continue;
            }
            match self.audio_inputs_kind[port] {
                BufferKind::Float32 => {
                    buffer.data32 = input_pointers[port].as_ptr() as *mut *mut f32;
                }
                BufferKind::Float64 => {
                    buffer.data64 = input_pointers[port].as_ptr() as *mut *mut f64;
                }
            }
        }
        for (port, buffer) in self.audio_outputs.iter_mut().enumerate() {
            if buffer.channel_count == 0 {
                continue;
            }
            match self.audio_outputs_kind[port] {
                BufferKind::Float32 => {
                    buffer.data32 = output_pointers[port].as_ptr() as *mut *mut f32;
                }
                BufferKind::Float64 => {
                    buffer.data64 = output_pointers[port].as_ptr() as *mut *mut f64;
                }
            }
        }

        self.out_events.clear();

        abi::Process {
            steady_time: self.steady_time,
            frames_count: self.frames_count,
            transport: self.transport.as_ref(),
            audio_inputs: &self.audio_inputs,
            audio_outputs: &mut self.audio_outputs,
            in_events: &mut self.in_events,
            out_events: &mut self.out_events,
        }
    }

    /// Borrows the output fields as a [`Response`]. On the plugin host
    /// side this is serialized after the plugin ran; on the native side it
    /// must be deserialized into, so the data lands directly in this
    /// object's output fields.
    pub fn create_response(&mut self) -> Response<'_> {
        Response {
            audio_outputs: &mut self.audio_outputs,
            out_events: &mut self.out_events,
        }
    }

    /// Writes the received outputs back to the host: audio from the shared
    /// region into the host's buffers, events into the host's sink, and
    /// the per-port metadata onto the host's buffer structs.
    pub fn write_back_outputs(
        &mut self,
        process: &mut abi::Process<'_>,
        shared_audio_buffers: &AudioShmBuffer,
    ) -> Result<()> {
        assert_eq!(self.audio_outputs.len(), process.audio_outputs.len());

        let frames = process.frames_count as usize;
        for (port, buffer) in self.audio_outputs.iter().enumerate() {
            let host_buffer = &mut process.audio_outputs[port];
            host_buffer.constant_mask = buffer.constant_mask;
            host_buffer.latency = buffer.latency;

            // channel_count is already the clamped minimum of the host's
            // and the region's counts
            for channel in 0..buffer.channel_count as usize {
                match self.audio_outputs_kind[port] {
                    BufferKind::Float32 => {
                        let samples = unsafe {
                            std::slice::from_raw_parts_mut(
                                *host_buffer.data32.add(channel),
                                frames,
                            )
                        };
                        shared_audio_buffers.read_output_channel_into(port, channel, samples)?;
                    }
                    BufferKind::Float64 => {
                        let samples = unsafe {
                            std::slice::from_raw_parts_mut(
                                *host_buffer.data64.add(channel),
                                frames,
                            )
                        };
                        shared_audio_buffers.read_output_channel_into(port, channel, samples)?;
                    }
                }
            }
        }

        self.out_events.write_back_outputs(process.out_events);

        Ok(())
    }
}

// The output event list never carries request data, so it stays out of the
// request encoding; it comes back through the Response.
impl Serialize for Process {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(8)?;
        tuple.serialize_element(&self.steady_time)?;
        tuple.serialize_element(&self.frames_count)?;
        tuple.serialize_element(&self.transport)?;
        tuple.serialize_element(&self.audio_inputs)?;
        tuple.serialize_element(&self.audio_inputs_kind)?;
        tuple.serialize_element(&self.audio_outputs)?;
        tuple.serialize_element(&self.audio_outputs_kind)?;
        tuple.serialize_element(&self.in_events)?;
        tuple.end()
    }
}

impl DeserializeInPlace for Process {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> std::result::Result<(), D::Error> {
        struct ProcessVisitor<'a>(&'a mut Process);

        impl<'de> Visitor<'de> for ProcessVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("process data")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
                self.0.steady_time = next_field(&mut seq, "steady_time")?;
                self.0.frames_count = next_field(&mut seq, "frames_count")?;
                next_field_in_place(&mut seq, &mut self.0.transport, "transport")?;
                seq.next_element_seed(VecInPlace {
                    vec: &mut self.0.audio_inputs,
                    max: MAX_AUDIO_PORTS,
                })?
                .ok_or_else(|| de::Error::custom("missing field `audio_inputs`"))?;
                seq.next_element_seed(VecInPlace {
                    vec: &mut self.0.audio_inputs_kind,
                    max: MAX_AUDIO_PORTS,
                })?
                .ok_or_else(|| de::Error::custom("missing field `audio_inputs_kind`"))?;
                seq.next_element_seed(VecInPlace {
                    vec: &mut self.0.audio_outputs,
                    max: MAX_AUDIO_PORTS,
                })?
                .ok_or_else(|| de::Error::custom("missing field `audio_outputs`"))?;
                seq.next_element_seed(VecInPlace {
                    vec: &mut self.0.audio_outputs_kind,
                    max: MAX_AUDIO_PORTS,
                })?
                .ok_or_else(|| de::Error::custom("missing field `audio_outputs_kind`"))?;
                next_field_in_place(&mut seq, &mut self.0.in_events, "in_events")
            }
        }

        deserializer.deserialize_tuple(8, ProcessVisitor(self))
    }
}

/// The output half of a process cycle. This type only borrows fields of a
/// [`Process`], so it can neither be default-constructed nor outlive its
/// owner: receiving a response always lands the data in an existing
/// process object.
pub struct Response<'a> {
    pub audio_outputs: &'a mut Vec<clap_audio_buffer>,
    pub out_events: &'a mut EventList,
}

impl Serialize for Response<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&*self.audio_outputs)?;
        tuple.serialize_element(&*self.out_events)?;
        tuple.end()
    }
}

impl DeserializeInPlace for Response<'_> {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> std::result::Result<(), D::Error> {
        struct ResponseVisitor<'a, 'b>(&'a mut Response<'b>);

        impl<'de> Visitor<'de> for ResponseVisitor<'_, '_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a process response")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
                seq.next_element_seed(VecInPlace {
                    vec: self.0.audio_outputs,
                    max: MAX_AUDIO_PORTS,
                })?
                .ok_or_else(|| de::Error::custom("missing field `audio_outputs`"))?;
                next_field_in_place(&mut seq, self.0.out_events, "out_events")
            }
        }

        deserializer.deserialize_tuple(2, ResponseVisitor(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clap::abi::{
        clap_event_any, clap_event_header, clap_event_midi_sysex, clap_event_note, InputEvents,
        OutputEvents,
    };
    use crate::clap::events::{Event, EventPayload};
    use crate::codec::{read_in_place, to_bytes};
    use crate::shm::ShmConfig;

    struct RawEventList(Vec<clap_event_any>);

    impl InputEvents for RawEventList {
        fn size(&self) -> u32 {
            self.0.len() as u32
        }

        fn get(&mut self, index: u32) -> Option<&clap_event_header> {
            self.0
                .get(index as usize)
                .map(|event| unsafe { &event.header })
        }
    }

    fn raw_note_on(time: u32, key: i16) -> clap_event_any {
        clap_event_any {
            note: clap_event_note {
                header: clap_event_header {
                    size: std::mem::size_of::<clap_event_note>() as u32,
                    time,
                    space_id: abi::CLAP_CORE_EVENT_SPACE_ID,
                    type_: abi::CLAP_EVENT_NOTE_ON,
                    flags: 0,
                },
                note_id: -1,
                port_index: 0,
                channel: 0,
                key,
                velocity: 1.0,
            },
        }
    }

    fn raw_sysex(time: u32, buffer: &[u8]) -> clap_event_any {
        clap_event_any {
            midi_sysex: clap_event_midi_sysex {
                header: clap_event_header {
                    size: std::mem::size_of::<clap_event_midi_sysex>() as u32,
                    time,
                    space_id: abi::CLAP_CORE_EVENT_SPACE_ID,
                    type_: abi::CLAP_EVENT_MIDI_SYSEX,
                    flags: 0,
                },
                port_index: 0,
                buffer: buffer.as_ptr(),
                size: buffer.len() as u32,
            },
        }
    }

    fn raw_unknown(time: u32) -> clap_event_any {
        clap_event_any {
            header: clap_event_header {
                size: std::mem::size_of::<clap_event_header>() as u32,
                time,
                space_id: abi::CLAP_CORE_EVENT_SPACE_ID,
                type_: 0x7fff,
                flags: 0,
            },
        }
    }

    fn channel_pointers(shm: &crate::shm::AudioShmBuffer, output: bool) -> Vec<Vec<*mut c_void>> {
        let ports = if output {
            shm.num_output_ports()
        } else {
            shm.num_input_ports()
        };
        (0..ports)
            .map(|port| {
                let channels = if output {
                    shm.num_output_channels(port)
                } else {
                    shm.num_input_channels(port)
                };
                (0..channels)
                    .map(|channel| {
                        if output {
                            shm.output_channel_ptr::<f32>(port, channel) as *mut c_void
                        } else {
                            shm.input_channel_ptr::<f32>(port, channel) as *mut c_void
                        }
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_channel_count_clamped_to_shared_region() {
        let frames = 16;
        let name = format!("clap_clamp_{}", std::process::id());
        let config = ShmConfig::for_layout(name, &[2], &[2], frames).unwrap();
        let shm = AudioShmBuffer::create(config).unwrap();

        // The host claims four channels, the region only holds two
        let channels: Vec<Vec<f32>> = (0..4).map(|c| vec![c as f32; frames]).collect();
        let pointers: Vec<*mut f32> = channels.iter().map(|c| c.as_ptr() as *mut f32).collect();
        let audio_inputs = [clap_audio_buffer {
            data32: pointers.as_ptr() as *mut *mut f32,
            channel_count: 4,
            ..clap_audio_buffer::default()
        }];
        let mut audio_outputs = [];
        let mut in_events = RawEventList(Vec::new());
        let mut out_events = EventList::default();
        let mut view = abi::Process {
            steady_time: 0,
            frames_count: frames as u32,
            transport: None,
            audio_inputs: &audio_inputs,
            audio_outputs: &mut audio_outputs,
            in_events: &mut in_events,
            out_events: &mut out_events,
        };

        let mut data = Process::default();
        data.repopulate(&mut view, &shm).unwrap();

        assert_eq!(data.audio_inputs.len(), 1);
        assert_eq!(data.audio_inputs[0].channel_count, 2);
    }

    #[test]
    fn test_precision_tag_recorded_and_reconstructed() {
        let frames = 16;
        let name = format!("clap_precision_{}", std::process::id());
        let config = ShmConfig::for_layout(name, &[1], &[], frames).unwrap();
        let shm = AudioShmBuffer::create(config).unwrap();

        let samples = vec![0.5f64; frames];
        let pointers = [samples.as_ptr() as *mut f64];
        let audio_inputs = [clap_audio_buffer {
            data64: pointers.as_ptr() as *mut *mut f64,
            channel_count: 1,
            ..clap_audio_buffer::default()
        }];
        let mut audio_outputs = [];
        let mut in_events = RawEventList(Vec::new());
        let mut out_events = EventList::default();
        let mut view = abi::Process {
            steady_time: 0,
            frames_count: frames as u32,
            transport: None,
            audio_inputs: &audio_inputs,
            audio_outputs: &mut audio_outputs,
            in_events: &mut in_events,
            out_events: &mut out_events,
        };

        let mut data = Process::default();
        data.repopulate(&mut view, &shm).unwrap();
        assert_eq!(data.audio_inputs_kind, vec![BufferKind::Float64]);

        let bytes = to_bytes(&data).unwrap();
        let mut decoded = Process::default();
        read_in_place(&bytes, &mut decoded).unwrap();
        assert_eq!(decoded.audio_inputs_kind, vec![BufferKind::Float64]);

        let input_pointers = channel_pointers(&shm, false);
        let output_pointers = channel_pointers(&shm, true);
        let reconstructed = decoded.reconstruct(&input_pointers, &output_pointers);

        // Only the f64 side of the union is populated
        assert!(reconstructed.audio_inputs[0].data32.is_null());
        assert!(!reconstructed.audio_inputs[0].data64.is_null());
        let through = unsafe {
            std::slice::from_raw_parts(*reconstructed.audio_inputs[0].data64, frames)
        };
        assert_eq!(through, samples.as_slice());
    }

    #[test]
    fn test_process_cycle_end_to_end() {
        let frames = 32;
        let name = format!("clap_cycle_{}", std::process::id());
        let config = ShmConfig::for_layout(name, &[2, 1], &[2], frames).unwrap();
        let host_shm = AudioShmBuffer::create(config.clone()).unwrap();
        let plugin_shm = AudioShmBuffer::open(config).unwrap();

        // Host buffers: stereo f32 input port, mono f64 input port, stereo
        // f32 output port
        let in_left: Vec<f32> = (0..frames).map(|i| i as f32 * 0.01).collect();
        let in_right: Vec<f32> = (0..frames).map(|i| i as f32 * -0.01).collect();
        let in_mono: Vec<f64> = (0..frames).map(|i| i as f64 * 0.5).collect();
        let in0_pointers = [in_left.as_ptr() as *mut f32, in_right.as_ptr() as *mut f32];
        let in1_pointers = [in_mono.as_ptr() as *mut f64];

        let mut out_left = vec![0.0f32; frames];
        let mut out_right = vec![0.0f32; frames];
        let out0_pointers = [out_left.as_mut_ptr(), out_right.as_mut_ptr()];

        let audio_inputs = [
            clap_audio_buffer {
                data32: in0_pointers.as_ptr() as *mut *mut f32,
                channel_count: 2,
                ..clap_audio_buffer::default()
            },
            clap_audio_buffer {
                data64: in1_pointers.as_ptr() as *mut *mut f64,
                channel_count: 1,
                ..clap_audio_buffer::default()
            },
        ];
        let mut audio_outputs = [clap_audio_buffer {
            data32: out0_pointers.as_ptr() as *mut *mut f32,
            channel_count: 2,
            ..clap_audio_buffer::default()
        }];

        let sysex_payload = [0xf0u8, 0x7e, 0x7f, 0x09, 0xf7];
        let mut in_events = RawEventList(vec![
            raw_note_on(0, 60),
            raw_sysex(4, &sysex_payload),
            raw_unknown(8),
        ]);
        let mut out_sink = EventList::default();

        let transport = clap_event_transport {
            tempo: 133.0,
            ..clap_event_transport::default()
        };
        let mut host_view = abi::Process {
            steady_time: 4800,
            frames_count: frames as u32,
            transport: Some(&transport),
            audio_inputs: &audio_inputs,
            audio_outputs: &mut audio_outputs,
            in_events: &mut in_events,
            out_events: &mut out_sink,
        };

        // Host side: snapshot and encode the request
        let mut host_data = Process::default();
        host_data.repopulate(&mut host_view, &host_shm).unwrap();
        let request = to_bytes(&host_data).unwrap();

        // Plugin side: decode, reconstruct, run the "plugin"
        let mut plugin_data = Process::default();
        read_in_place(&request, &mut plugin_data).unwrap();
        assert_eq!(plugin_data.steady_time, 4800);
        assert_eq!(plugin_data.transport.map(|t| t.tempo), Some(133.0));
        // The unknown event was dropped during repopulate
        assert_eq!(plugin_data.in_events.len(), 2);
        assert_eq!(
            plugin_data.audio_inputs_kind,
            vec![BufferKind::Float32, BufferKind::Float64]
        );

        let input_pointers = channel_pointers(&plugin_shm, false);
        let output_pointers = channel_pointers(&plugin_shm, true);
        let response = {
            let mut view = plugin_data.reconstruct(&input_pointers, &output_pointers);

            unsafe {
                let left = std::slice::from_raw_parts(*view.audio_inputs[0].data32, frames);
                assert_eq!(left, in_left.as_slice());

                // Write the doubled left input to both output channels
                for channel in 0..2 {
                    let out = std::slice::from_raw_parts_mut(
                        *view.audio_outputs[0].data32.add(channel),
                        frames,
                    );
                    for (out, sample) in out.iter_mut().zip(left) {
                        *out = sample * 2.0;
                    }
                }
            }
            view.audio_outputs[0].constant_mask = 0b10;

            // Echo the input events back, plus an unknown one that must be
            // dropped without failing
            let note = raw_note_on(1, 72);
            assert!(view.out_events.try_push(unsafe { &note.header }));
            let echo = raw_sysex(4, &sysex_payload);
            assert!(view.out_events.try_push(unsafe { &echo.header }));
            let unknown = raw_unknown(9);
            assert!(view.out_events.try_push(unsafe { &unknown.header }));
            drop(view);

            to_bytes(&plugin_data.create_response()).unwrap()
        };

        // Host side: receive the response into the same process object and
        // write everything back to the host's buffers
        {
            let mut target = host_data.create_response();
            read_in_place(&response, &mut target).unwrap();
        }
        host_data
            .write_back_outputs(&mut host_view, &host_shm)
            .unwrap();
        drop(host_view);

        let expected: Vec<f32> = in_left.iter().map(|s| s * 2.0).collect();
        assert_eq!(out_left, expected);
        assert_eq!(out_right, expected);
        assert_eq!(audio_outputs[0].constant_mask, 0b10);

        // Exactly two events came back, and the sysex dump is byte-identical
        assert_eq!(out_sink.len(), 2);
        match &out_sink.events()[1].payload {
            EventPayload::MidiSysex(event) => {
                assert_eq!(event.buffer.as_slice(), &sysex_payload);
            }
            other => panic!("expected a sysex event, got {other:?}"),
        }
        match &out_sink.events()[0].payload {
            EventPayload::Note(note) => assert_eq!(note.key, 72),
            other => panic!("expected a note event, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_channel_port_keeps_null_pointers() {
        let mut data = Process::default();
        data.frames_count = 8;
        data.audio_inputs = vec![clap_audio_buffer::default()];
        data.audio_inputs_kind = vec![BufferKind::default()];

        // The pointer table for a channel-less port is empty, and an empty
        // table must not end up in either side of the union
        let input_pointers = vec![Vec::new()];
        let output_pointers = Vec::new();
        let view = data.reconstruct(&input_pointers, &output_pointers);

        assert!(view.audio_inputs[0].data32.is_null());
        assert!(view.audio_inputs[0].data64.is_null());
    }

    #[test]
    fn test_repopulate_is_idempotent() {
        let frames = 8;
        let name = format!("clap_idem_{}", std::process::id());
        let config = ShmConfig::for_layout(name, &[1], &[], frames).unwrap();
        let shm = AudioShmBuffer::create(config).unwrap();

        let samples = vec![1.0f32; frames];
        let pointers = [samples.as_ptr() as *mut f32];
        let audio_inputs = [clap_audio_buffer {
            data32: pointers.as_ptr() as *mut *mut f32,
            channel_count: 1,
            ..clap_audio_buffer::default()
        }];
        let mut audio_outputs = [];
        let mut in_events = RawEventList(vec![raw_note_on(0, 60)]);
        let mut out_events = EventList::default();
        let mut view = abi::Process {
            steady_time: 0,
            frames_count: frames as u32,
            transport: None,
            audio_inputs: &audio_inputs,
            audio_outputs: &mut audio_outputs,
            in_events: &mut in_events,
            out_events: &mut out_events,
        };

        let mut data = Process::default();
        data.repopulate(&mut view, &shm).unwrap();
        let first = to_bytes(&data).unwrap();
        data.repopulate(&mut view, &shm).unwrap();
        let second = to_bytes(&data).unwrap();
        assert_eq!(first, second);

        // Events did not accumulate across cycles
        assert_eq!(data.in_events.len(), 1);

        let decoded_event = {
            let mut decoded = Process::default();
            read_in_place(&second, &mut decoded).unwrap();
            decoded.in_events.events()[0].clone()
        };
        match decoded_event {
            Event {
                time: 0,
                payload: EventPayload::Note(_),
                ..
            } => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
}
