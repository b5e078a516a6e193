//! Typed requests resolved by the core. The HTTP layer deserializes
//! into these and maps [serror::Error] onto response codes.

pub mod execute;
pub mod read;
pub mod write;
