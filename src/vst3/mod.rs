//! VST3 dialect: event, parameter change, and process serialization.

pub mod abi;
pub mod events;
pub mod params;
pub mod process;
