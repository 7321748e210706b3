//! VST2 dialect: event and process serialization.

pub mod abi;
pub mod events;
pub mod process;
