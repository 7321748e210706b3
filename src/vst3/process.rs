//! The per-cycle VST3 process envelope.
//!
//! Mirrors the CLAP side: input audio goes into the shared region, the
//! rest of `ProcessData` travels over the wire, and the plugin side
//! reconstructs a native-shaped view over its own mapping. Which union
//! side of the bus buffers is live follows `symbolic_sample_size` rather
//! than a per-bus tag.

use std::ffi::c_void;

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::abi::{self, AudioBusBuffers, ChannelBuffers, K_SAMPLE64};
use super::events::EventList;
use super::params::ParameterChanges;
use crate::codec::{next_field, next_field_in_place, DeserializeInPlace, VecInPlace};
use crate::error::Result;
use crate::shm::AudioShmBuffer;

/// Maximum number of audio buses per direction.
pub const MAX_AUDIO_BUSES: usize = 1 << 14;

/// The serializable part of one audio bus. Channel pointers are rebuilt
/// on the receiving side from the shared region layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BusMetadata {
    pub num_channels: i32,
    pub silence_flags: u64,
}

crate::codec::impl_in_place_pod!(BusMetadata, abi::ProcessContext);

/// Serializable snapshot of one `IAudioProcessor::process()` call. A
/// bridge keeps one of these per plugin instance and refills it every
/// cycle.
#[derive(Default)]
pub struct ProcessData {
    pub process_mode: i32,
    /// `kSample32` or `kSample64`; decides which union side of every bus
    /// buffer is live.
    pub symbolic_sample_size: i32,
    pub num_samples: i32,

    pub inputs: Vec<BusMetadata>,
    pub outputs: Vec<BusMetadata>,

    pub input_parameter_changes: ParameterChanges,
    /// Whether the host passed an output parameter changes object. The
    /// plugin side only collects output changes when it did.
    pub output_parameter_changes_supported: bool,
    pub input_events: Option<EventList>,
    pub output_events_supported: bool,
    pub process_context: Option<abi::ProcessContext>,

    // Plugin-side output state, returned through the Response. Never part
    // of the request encoding.
    output_parameter_changes: ParameterChanges,
    output_events: EventList,
    reconstructed_inputs: Vec<AudioBusBuffers>,
    reconstructed_outputs: Vec<AudioBusBuffers>,
}

impl std::fmt::Debug for ProcessData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessData")
            .field("process_mode", &self.process_mode)
            .field("symbolic_sample_size", &self.symbolic_sample_size)
            .field("num_samples", &self.num_samples)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("input_parameter_changes", &self.input_parameter_changes)
            .field(
                "output_parameter_changes_supported",
                &self.output_parameter_changes_supported,
            )
            .field("input_events", &self.input_events)
            .field("output_events_supported", &self.output_events_supported)
            .field("process_context", &self.process_context)
            .finish()
    }
}

impl ProcessData {
    /// Copies everything except the audio samples out of a host-provided
    /// process view; the input audio goes into `shared_audio_buffers`.
    /// Channel counts are clamped to what the shared region can hold.
    pub fn repopulate(
        &mut self,
        process: &mut abi::ProcessData<'_>,
        shared_audio_buffers: &AudioShmBuffer,
    ) -> Result<()> {
        self.process_mode = process.process_mode;
        self.symbolic_sample_size = process.symbolic_sample_size;
        self.num_samples = process.num_samples;

        let frames = process.num_samples as usize;

        self.inputs
            .resize(process.inputs.len(), BusMetadata::default());
        for (port, bus) in process.inputs.iter().enumerate() {
            // Hosts sometimes provide more (or fewer) channels than were
            // negotiated, so account for both
            let channels = (shared_audio_buffers.num_input_channels(port) as i32)
                .min(bus.num_channels)
                .max(0);
            self.inputs[port] = BusMetadata {
                num_channels: channels,
                silence_flags: bus.silence_flags,
            };

            for channel in 0..channels as usize {
                // SAFETY: the host guarantees num_channels valid channel
                // pointers with num_samples samples each, on the union
                // side symbolic_sample_size names
                if process.symbolic_sample_size == K_SAMPLE64 {
                    let samples = unsafe {
                        std::slice::from_raw_parts(*bus.buffers.channels_buffer64.add(channel), frames)
                    };
                    shared_audio_buffers.write_input_channel(port, channel, samples)?;
                } else {
                    let samples = unsafe {
                        std::slice::from_raw_parts(*bus.buffers.channels_buffer32.add(channel), frames)
                    };
                    shared_audio_buffers.write_input_channel(port, channel, samples)?;
                }
            }
        }

        self.outputs
            .resize(process.outputs.len(), BusMetadata::default());
        for (port, bus) in process.outputs.iter().enumerate() {
            let channels = (shared_audio_buffers.num_output_channels(port) as i32)
                .min(bus.num_channels)
                .max(0);
            self.outputs[port] = BusMetadata {
                num_channels: channels,
                silence_flags: bus.silence_flags,
            };
        }

        match &mut process.input_parameter_changes {
            Some(changes) => self.input_parameter_changes.repopulate(&mut **changes),
            None => self.input_parameter_changes.clear(),
        }
        self.output_parameter_changes_supported = process.output_parameter_changes.is_some();

        match &mut process.input_events {
            Some(events) => self
                .input_events
                .get_or_insert_with(EventList::default)
                .repopulate(&mut **events),
            None => self.input_events = None,
        }
        self.output_events_supported = process.output_events.is_some();

        self.process_context = process.process_context.copied();

        Ok(())
    }

    /// Rebuilds the native-shaped process view on the plugin side. The
    /// caller supplies per-bus channel pointer tables targeting its own
    /// mapping of the shared region; the pointers land on the union side
    /// `symbolic_sample_size` names.
    pub fn reconstruct<'a>(
        &'a mut self,
        input_pointers: &'a [Vec<*mut c_void>],
        output_pointers: &'a [Vec<*mut c_void>],
    ) -> abi::ProcessData<'a> {
        assert!(self.inputs.len() <= input_pointers.len());
        assert!(self.outputs.len() <= output_pointers.len());

        let double_precision = self.symbolic_sample_size == K_SAMPLE64;
        rebuild_buses(
            double_precision,
            &self.inputs,
            input_pointers,
            &mut self.reconstructed_inputs,
        );
        rebuild_buses(
            double_precision,
            &self.outputs,
            output_pointers,
            &mut self.reconstructed_outputs,
        );

        self.output_parameter_changes.clear();
        self.output_events.clear();

        let output_parameter_changes = if self.output_parameter_changes_supported {
            Some(&mut self.output_parameter_changes as &mut dyn abi::IParameterChanges)
        } else {
            None
        };
        let output_events = if self.output_events_supported {
            Some(&mut self.output_events as &mut dyn abi::IEventList)
        } else {
            None
        };

        abi::ProcessData {
            process_mode: self.process_mode,
            symbolic_sample_size: self.symbolic_sample_size,
            num_samples: self.num_samples,
            inputs: &self.reconstructed_inputs,
            outputs: &mut self.reconstructed_outputs,
            input_parameter_changes: Some(&mut self.input_parameter_changes),
            output_parameter_changes,
            input_events: self
                .input_events
                .as_mut()
                .map(|events| events as &mut dyn abi::IEventList),
            output_events,
            process_context: self.process_context.as_ref(),
        }
    }

    /// Borrows the output fields as a [`Response`]. On the plugin host
    /// side silence flags the plugin set on the reconstructed buses are
    /// folded back into the metadata first.
    pub fn create_response(&mut self) -> Response<'_> {
        for (metadata, bus) in self.outputs.iter_mut().zip(&self.reconstructed_outputs) {
            metadata.silence_flags = bus.silence_flags;
        }

        Response {
            outputs: &mut self.outputs,
            output_parameter_changes: &mut self.output_parameter_changes,
            output_events: &mut self.output_events,
        }
    }

    /// Writes the received outputs back to the host: audio from the
    /// shared region into the host's buffers, parameter changes and
    /// events into the host's sinks, silence flags onto the host's buses.
    pub fn write_back_outputs(
        &mut self,
        process: &mut abi::ProcessData<'_>,
        shared_audio_buffers: &AudioShmBuffer,
    ) -> Result<()> {
        assert_eq!(self.outputs.len(), process.outputs.len());

        let frames = self.num_samples as usize;
        for (port, metadata) in self.outputs.iter().enumerate() {
            let host_bus = &mut process.outputs[port];
            host_bus.silence_flags = metadata.silence_flags;

            // num_channels is already the clamped minimum of the host's
            // and the region's counts
            for channel in 0..metadata.num_channels as usize {
                if self.symbolic_sample_size == K_SAMPLE64 {
                    let samples = unsafe {
                        std::slice::from_raw_parts_mut(
                            *host_bus.buffers.channels_buffer64.add(channel),
                            frames,
                        )
                    };
                    shared_audio_buffers.read_output_channel_into(port, channel, samples)?;
                } else {
                    let samples = unsafe {
                        std::slice::from_raw_parts_mut(
                            *host_bus.buffers.channels_buffer32.add(channel),
                            frames,
                        )
                    };
                    shared_audio_buffers.read_output_channel_into(port, channel, samples)?;
                }
            }
        }

        if let Some(changes) = &mut process.output_parameter_changes {
            self.output_parameter_changes.write_back_outputs(&mut **changes);
        }
        if let Some(events) = &mut process.output_events {
            self.output_events.write_back_outputs(&mut **events);
        }

        Ok(())
    }
}

/// Refills a retained native bus vector from the wire metadata, keeping
/// its allocation across cycles.
fn rebuild_buses(
    double_precision: bool,
    metadata: &[BusMetadata],
    pointers: &[Vec<*mut c_void>],
    buses: &mut Vec<AudioBusBuffers>,
) {
    buses.clear();
    buses.extend(
        metadata
            .iter()
            .enumerate()
            .map(|(port, bus)| AudioBusBuffers {
                num_channels: bus.num_channels,
                silence_flags: bus.silence_flags,
                buffers: if double_precision {
                    ChannelBuffers {
                        channels_buffer64: pointers[port].as_ptr() as *mut *mut f64,
                    }
                } else {
                    ChannelBuffers {
                        channels_buffer32: pointers[port].as_ptr() as *mut *mut f32,
                    }
                },
            }),
    );
}

// The plugin-side output containers never carry request data, so they
// stay out of the request encoding; they come back through the Response.
impl Serialize for ProcessData {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(10)?;
        tuple.serialize_element(&self.process_mode)?;
        tuple.serialize_element(&self.symbolic_sample_size)?;
        tuple.serialize_element(&self.num_samples)?;
        tuple.serialize_element(&self.inputs)?;
        tuple.serialize_element(&self.outputs)?;
        tuple.serialize_element(&self.input_parameter_changes)?;
        tuple.serialize_element(&self.output_parameter_changes_supported)?;
        tuple.serialize_element(&self.input_events)?;
        tuple.serialize_element(&self.output_events_supported)?;
        tuple.serialize_element(&self.process_context)?;
        tuple.end()
    }
}

impl DeserializeInPlace for ProcessData {
    fn deserialize_in_place<'de, D: Deserializer<'de>>(
        &mut self,
        deserializer: D,
    ) -> std::result::Result<(), D::Error> {
        struct ProcessVisitor<'a>(&'a mut ProcessData);

        impl<'de> Visitor<'de> for ProcessVisitor<'_> {
            type Value = ();

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("process data")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
                self.0.process_mode = next_field(&mut seq, "process_mode")?;
                self.0.symbolic_sample_size = next_field(&mut seq, "symbolic_sample_size")?;
                self.0.num_samples = next_field(&mut seq, "num_samples")?;
                seq.next_element_seed(VecInPlace {
                    vec: &mut self.0.inputs,
                    max: MAX_AUDIO_BUSES,
                })?
                .ok_or_else(|| de::Error::custom("missing field `inputs`"))?;
                seq.next_element_seed(VecInPlace {
                    vec: &mut self.0.outputs,
                    max: MAX_AUDIO_BUSES,
                })?
                .ok_or_else(|| de::Error::custom("missing field `outputs`"))?;
                next_field_in_place(
                    &mut seq,
                    &mut self.0.input_parameter_changes,
                    "input_parameter_changes",
                )?;
                self.0.output_parameter_changes_supported =
                    next_field(&mut seq, "output_parameter_changes_supported")?;
                next_field_in_place(&mut seq, &mut self.0.input_events, "input_events")?;
                self.0.output_events_supported =
                    next_field(&mut seq, "output_events_supported")?;
                next_field_in_place(&mut seq, &mut self.0.process_context, "process_context")
            }
        }

        deserializer.deserialize_tuple(10, ProcessVisitor(self))
    }
}

/// The output half of a process cycle. Only borrows fields of a
/// [`ProcessData`], so receiving a response always lands the data in an
/// existing process object.
pub struct Response<'a> {
    pub outputs: &'a mut Vec<BusMetadata>,
    pub output_parameter_changes: &'a mut ParameterChanges,
    pub output_events: &'a mut EventList,
}

impl Serialize for Response<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&*self.outputs)?;
        tuple.serialize_element(&*self.output_parameter_changes)?;
        tuple.serialize_element(&*self.output_events)?;
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
                    vec: self.0.outputs,
                    max: MAX_AUDIO_BUSES,
                })?
                .ok_or_else(|| de::Error::custom("missing field `outputs`"))?;
                next_field_in_place(
                    &mut seq,
                    self.0.output_parameter_changes,
                    "output_parameter_changes",
                )?;
                next_field_in_place(&mut seq, self.0.output_events, "output_events")
            }
        }

        deserializer.deserialize_tuple(3, ResponseVisitor(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_in_place, to_bytes};
    use crate::error::InvalidArgument;
    use crate::shm::ShmConfig;
    use crate::vst3::abi::{IEventList, IParamValueQueue, IParameterChanges, K_SAMPLE32};
    use crate::vst3::events::{DataEvent, Event, EventPayload};

    struct RawEventList(Vec<abi::Event>);

    impl IEventList for RawEventList {
        fn get_event_count(&self) -> i32 {
            self.0.len() as i32
        }

        fn get_event(&mut self, index: i32) -> std::result::Result<abi::Event, InvalidArgument> {
            self.0.get(index as usize).copied().ok_or(InvalidArgument)
        }

        fn add_event(&mut self, event: &abi::Event) -> std::result::Result<(), InvalidArgument> {
            self.0.push(*event);
            Ok(())
        }
    }

    fn raw_note_on(sample_offset: i32, pitch: i16) -> abi::Event {
        Event {
            sample_offset,
            payload: EventPayload::NoteOn(abi::NoteOnEvent {
                pitch,
                velocity: 1.0,
                note_id: -1,
                ..abi::NoteOnEvent::default()
            }),
            ..Event::default()
        }
        .to_native()
    }

    fn bus_pointers(shm: &AudioShmBuffer, output: bool) -> Vec<Vec<*mut c_void>> {
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
        let name = format!("vst3_clamp_{}", std::process::id());
        let config = ShmConfig::for_layout(name, &[2], &[], frames).unwrap();
        let shm = AudioShmBuffer::create(config).unwrap();

        // The host claims four channels, the region only holds two
        let channels: Vec<Vec<f32>> = (0..4).map(|c| vec![c as f32; frames]).collect();
        let pointers: Vec<*mut f32> = channels.iter().map(|c| c.as_ptr() as *mut f32).collect();
        let inputs = [AudioBusBuffers {
            num_channels: 4,
            silence_flags: 0,
            buffers: ChannelBuffers {
                channels_buffer32: pointers.as_ptr() as *mut *mut f32,
            },
        }];
        let mut outputs = [];
        let mut view = abi::ProcessData {
            process_mode: 0,
            symbolic_sample_size: K_SAMPLE32,
            num_samples: frames as i32,
            inputs: &inputs,
            outputs: &mut outputs,
            input_parameter_changes: None,
            output_parameter_changes: None,
            input_events: None,
            output_events: None,
            process_context: None,
        };

        let mut data = ProcessData::default();
        data.repopulate(&mut view, &shm).unwrap();

        assert_eq!(data.inputs.len(), 1);
        assert_eq!(data.inputs[0].num_channels, 2);
        assert!(data.input_events.is_none());
        assert!(!data.output_events_supported);
    }

    #[test]
    fn test_double_precision_cycle() {
        let frames = 16;
        let name = format!("vst3_f64_{}", std::process::id());
        let config = ShmConfig::for_layout(name, &[1], &[1], frames).unwrap();
        let shm = AudioShmBuffer::create(config).unwrap();

        let samples: Vec<f64> = (0..frames).map(|i| i as f64 * 0.25).collect();
        let in_pointers = [samples.as_ptr() as *mut f64];
        let inputs = [AudioBusBuffers {
            num_channels: 1,
            silence_flags: 0,
            buffers: ChannelBuffers {
                channels_buffer64: in_pointers.as_ptr() as *mut *mut f64,
            },
        }];
        let mut out_samples = vec![0.0f64; frames];
        let out_pointers = [out_samples.as_mut_ptr()];
        let mut outputs = [AudioBusBuffers {
            num_channels: 1,
            silence_flags: 0,
            buffers: ChannelBuffers {
                channels_buffer64: out_pointers.as_ptr() as *mut *mut f64,
            },
        }];
        let mut view = abi::ProcessData {
            process_mode: 0,
            symbolic_sample_size: K_SAMPLE64,
            num_samples: frames as i32,
            inputs: &inputs,
            outputs: &mut outputs,
            input_parameter_changes: None,
            output_parameter_changes: None,
            input_events: None,
            output_events: None,
            process_context: None,
        };

        let mut data = ProcessData::default();
        data.repopulate(&mut view, &shm).unwrap();
        assert_eq!(data.symbolic_sample_size, K_SAMPLE64);

        let bytes = to_bytes(&data).unwrap();
        let mut decoded = ProcessData::default();
        read_in_place(&bytes, &mut decoded).unwrap();
        assert_eq!(decoded.symbolic_sample_size, K_SAMPLE64);

        // f64 pointer tables on the plugin side
        let input_pointers = vec![vec![shm.input_channel_ptr::<f64>(0, 0) as *mut c_void]];
        let output_pointers = vec![vec![shm.output_channel_ptr::<f64>(0, 0) as *mut c_void]];
        let reconstructed = decoded.reconstruct(&input_pointers, &output_pointers);

        let through = unsafe {
            std::slice::from_raw_parts(*reconstructed.inputs[0].buffers.channels_buffer64, frames)
        };
        assert_eq!(through, samples.as_slice());
    }

    #[test]
    fn test_process_cycle_end_to_end() {
        let frames = 32;
        let name = format!("vst3_cycle_{}", std::process::id());
        let config = ShmConfig::for_layout(name, &[2], &[2], frames).unwrap();
        let host_shm = AudioShmBuffer::create(config.clone()).unwrap();
        let plugin_shm = AudioShmBuffer::open(config).unwrap();

        let in_left: Vec<f32> = (0..frames).map(|i| i as f32 * 0.01).collect();
        let in_right: Vec<f32> = (0..frames).map(|i| i as f32 * -0.01).collect();
        let in_pointers = [in_left.as_ptr() as *mut f32, in_right.as_ptr() as *mut f32];
        let inputs = [AudioBusBuffers {
            num_channels: 2,
            silence_flags: 0,
            buffers: ChannelBuffers {
                channels_buffer32: in_pointers.as_ptr() as *mut *mut f32,
            },
        }];

        let mut out_left = vec![0.0f32; frames];
        let mut out_right = vec![0.0f32; frames];
        let out_pointers = [out_left.as_mut_ptr(), out_right.as_mut_ptr()];
        let mut outputs = [AudioBusBuffers {
            num_channels: 2,
            silence_flags: 0,
            buffers: ChannelBuffers {
                channels_buffer32: out_pointers.as_ptr() as *mut *mut f32,
            },
        }];

        let sysex_payload = [0xf0u8, 0x7e, 0x7f, 0x09, 0xf7];
        let sysex = Event {
            sample_offset: 4,
            payload: EventPayload::Data(DataEvent {
                kind: 0,
                buffer: sysex_payload.to_vec(),
            }),
            ..Event::default()
        };
        let mut unknown = raw_note_on(8, 0);
        unknown.kind = 42;
        let mut input_events =
            RawEventList(vec![raw_note_on(0, 60), sysex.to_native(), unknown]);
        let mut output_events = EventList::default();

        let mut input_changes = ParameterChanges::default();
        let (_, queue) = input_changes.add_parameter_data(17);
        queue.add_point(0, 0.25).unwrap();
        queue.add_point(16, 0.75).unwrap();
        let mut output_changes = ParameterChanges::default();

        let context = abi::ProcessContext {
            tempo: 120.0,
            sample_rate: 48_000.0,
            ..abi::ProcessContext::default()
        };

        let mut host_view = abi::ProcessData {
            process_mode: 0,
            symbolic_sample_size: K_SAMPLE32,
            num_samples: frames as i32,
            inputs: &inputs,
            outputs: &mut outputs,
            input_parameter_changes: Some(&mut input_changes),
            output_parameter_changes: Some(&mut output_changes),
            input_events: Some(&mut input_events),
            output_events: Some(&mut output_events),
            process_context: Some(&context),
        };

        // Host side: snapshot and encode the request
        let mut host_data = ProcessData::default();
        host_data.repopulate(&mut host_view, &host_shm).unwrap();
        let request = to_bytes(&host_data).unwrap();

        // Plugin side: decode, reconstruct, run the "plugin"
        let mut plugin_data = ProcessData::default();
        read_in_place(&request, &mut plugin_data).unwrap();
        assert_eq!(plugin_data.process_context.map(|c| c.tempo), Some(120.0));
        // The unknown event was dropped during repopulate
        assert_eq!(
            plugin_data.input_events.as_ref().map(EventList::num_events),
            Some(2)
        );
        assert_eq!(plugin_data.input_parameter_changes.num_parameters(), 1);

        let input_pointers = bus_pointers(&plugin_shm, false);
        let output_pointers = bus_pointers(&plugin_shm, true);
        let response = {
            let mut view = plugin_data.reconstruct(&input_pointers, &output_pointers);

            let in_queue = view
                .input_parameter_changes
                .as_mut()
                .unwrap()
                .get_parameter_data(0)
                .unwrap();
            assert_eq!(in_queue.get_parameter_id(), 17);
            assert_eq!(in_queue.get_point(1).unwrap(), (16, 0.75));

            unsafe {
                let left =
                    std::slice::from_raw_parts(*view.inputs[0].buffers.channels_buffer32, frames);
                assert_eq!(left, in_left.as_slice());

                // Write the doubled left input to both output channels
                for channel in 0..2 {
                    let out = std::slice::from_raw_parts_mut(
                        *view.outputs[0].buffers.channels_buffer32.add(channel),
                        frames,
                    );
                    for (out, sample) in out.iter_mut().zip(left) {
                        *out = sample * 2.0;
                    }
                }
            }
            view.outputs[0].silence_flags = 0b10;

            // Echo the events back, plus an unknown one that must be
            // dropped without failing
            let events = view.output_events.as_mut().unwrap();
            events.add_event(&raw_note_on(1, 72)).unwrap();
            events.add_event(&sysex.to_native()).unwrap();
            events.add_event(&unknown).unwrap();

            let (_, out_queue) = view
                .output_parameter_changes
                .as_mut()
                .unwrap()
                .add_parameter_data(99);
            out_queue.add_point(8, 0.5).unwrap();
            drop(view);

            to_bytes(&plugin_data.create_response()).unwrap()
        };

        // Host side: receive the response into the same process object and
        // write everything back
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
        assert_eq!(outputs[0].silence_flags, 0b10);

        // Exactly two events came back, and the data dump is byte-identical
        assert_eq!(output_events.num_events(), 2);
        match &output_events.events()[1].payload {
            EventPayload::Data(event) => assert_eq!(event.buffer.as_slice(), &sysex_payload),
            other => panic!("expected a data event, got {other:?}"),
        }
        match &output_events.events()[0].payload {
            EventPayload::NoteOn(note) => assert_eq!(note.pitch, 72),
            other => panic!("expected a note on event, got {other:?}"),
        }

        assert_eq!(output_changes.num_parameters(), 1);
        assert_eq!(output_changes.queues()[0].parameter_id, 99);
        assert_eq!(output_changes.queues()[0].points, vec![(8, 0.5)]);
    }

    #[test]
    fn test_debug_render_covers_wire_fields() {
        let data = ProcessData::default();
        let rendered = format!("{data:?}");
        assert!(rendered.contains("symbolic_sample_size"));
        assert!(!rendered.contains("reconstructed"));
    }

    #[test]
    fn test_reconstruct_reuses_native_bus_vectors() {
        let frames = 8;
        let name = format!("vst3_rebuild_{}", std::process::id());
        let shm =
            AudioShmBuffer::create(ShmConfig::for_layout(name, &[1], &[1], frames).unwrap())
                .unwrap();

        let mut data = ProcessData::default();
        data.symbolic_sample_size = K_SAMPLE32;
        data.num_samples = frames as i32;
        data.inputs = vec![BusMetadata {
            num_channels: 1,
            silence_flags: 0,
        }];
        data.outputs = vec![BusMetadata {
            num_channels: 1,
            silence_flags: 0,
        }];

        let input_pointers = bus_pointers(&shm, false);
        let output_pointers = bus_pointers(&shm, true);
        let _ = data.reconstruct(&input_pointers, &output_pointers);
        let inputs_ptr = data.reconstructed_inputs.as_ptr();
        let outputs_ptr = data.reconstructed_outputs.as_ptr();
        let _ = data.reconstruct(&input_pointers, &output_pointers);
        assert_eq!(data.reconstructed_inputs.as_ptr(), inputs_ptr);
        assert_eq!(data.reconstructed_outputs.as_ptr(), outputs_ptr);
    }

    #[test]
    fn test_repopulate_is_idempotent() {
        let frames = 8;
        let name = format!("vst3_idem_{}", std::process::id());
        let config = ShmConfig::for_layout(name, &[1], &[], frames).unwrap();
        let shm = AudioShmBuffer::create(config).unwrap();

        let samples = vec![1.0f32; frames];
        let pointers = [samples.as_ptr() as *mut f32];
        let inputs = [AudioBusBuffers {
            num_channels: 1,
            silence_flags: 0,
            buffers: ChannelBuffers {
                channels_buffer32: pointers.as_ptr() as *mut *mut f32,
            },
        }];
        let mut outputs = [];
        let mut input_events = RawEventList(vec![raw_note_on(0, 60)]);
        let mut input_changes = ParameterChanges::default();
        let (_, queue) = input_changes.add_parameter_data(3);
        queue.add_point(0, 1.0).unwrap();

        let mut view = abi::ProcessData {
            process_mode: 0,
            symbolic_sample_size: K_SAMPLE32,
            num_samples: frames as i32,
            inputs: &inputs,
            outputs: &mut outputs,
            input_parameter_changes: Some(&mut input_changes),
            output_parameter_changes: None,
            input_events: Some(&mut input_events),
            output_events: None,
            process_context: None,
        };

        let mut data = ProcessData::default();
        data.repopulate(&mut view, &shm).unwrap();
        let first = to_bytes(&data).unwrap();
        data.repopulate(&mut view, &shm).unwrap();
        let second = to_bytes(&data).unwrap();
        assert_eq!(first, second);

        // Neither events nor queues accumulated across cycles
        assert_eq!(
            data.input_events.as_ref().map(EventList::num_events),
            Some(1)
        );
        assert_eq!(data.input_parameter_changes.num_parameters(), 1);
    }
}
