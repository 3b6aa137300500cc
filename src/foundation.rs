//! Shared value types: errors, time, color, hashing.

pub mod color;
pub mod error;
pub mod hash;
pub mod time;
