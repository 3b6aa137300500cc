//! Execution: the injected device capability, the reference CPU device, the ingestion
//! boundary, the decode look-ahead queue, and the instruction-list executor.

pub mod cpu;
pub mod device;
pub mod engine;
pub mod prefetch;
pub mod source;
