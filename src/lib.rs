//! # plugbridge - Plugin Bridge Serialization Core
//!
//! Marshals audio plugin process cycles between two processes: a native
//! host side and a remote side actually running the plugin. Everything a
//! process call carries except the audio samples (events, parameter
//! automation, transport state, buffer metadata) is serialized into
//! compact bincode messages; the samples themselves go through a shared
//! memory region both sides map.
//!
//! ## Architecture
//!
//! - **codec** - Wire encoding plus in-place deserialization, so
//!   per-cycle messages land in preallocated buffers without allocating
//! - **shm** - The shared audio region and its negotiated layout
//! - **clap** / **vst3** / **vst2** - One module per plugin dialect, each
//!   with native-shaped `abi` types, owned serializable events, and a
//!   process envelope with `repopulate` / `reconstruct` /
//!   `write_back_outputs` cycle operations
//!
//! ## Quick Start
//!
//! ```ignore
//! use plugbridge::shm::{AudioShmBuffer, ShmConfig};
//! use plugbridge::{clap, codec};
//!
//! // Negotiated once: both sides map the same region
//! let config = ShmConfig::for_layout("instance".into(), &[2], &[2], 1024)?;
//! let shm = AudioShmBuffer::create(config)?;
//!
//! // Every cycle: snapshot the host's process call and send it over
//! let mut data = clap::process::Process::default();
//! data.repopulate(&mut host_view, &shm)?;
//! let request = codec::to_bytes(&data)?;
//! ```

pub mod clap;
pub mod codec;
pub mod error;
pub mod shm;
pub mod vst2;
pub mod vst3;

pub use codec::{from_bytes, read_in_place, to_bytes, write_to_vec, DeserializeInPlace};
pub use error::{BridgeError, InvalidArgument, Result};
pub use shm::{AudioShmBuffer, Sample, ShmConfig};
