//! Compilation: timeline + manifests + registry in, a flat deterministic instruction
//! list out.

pub mod compiler;
pub mod instruction;
