//! Weft is a deterministic render-graph compiler and executor for non-linear video
//! compositing.
//!
//! The pipeline turns an editorial timeline into a reproducible sequence of device
//! operations:
//!
//! - Expand the timeline at one timestamp into a DAG of processing nodes, inserting the
//!   mandatory color-space boundary conversions and transition composites.
//! - Resolve declarative multi-kernel features into deterministically ordered passes.
//! - Linearize the graph into a flat [`CompiledProgram`] — the sole contract between
//!   compiler and executor, serializable and inspectable.
//! - Execute the program against an injected [`RenderDevice`], with every intermediate
//!   buffer drawn from a keyed [`TexturePool`].
//!
//! Compiling and executing identical inputs twice yields a byte-identical instruction
//! list and a pixel-identical frame, run after run, machine after machine.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod compile;
pub mod exec;
pub mod foundation;
pub mod graph;
pub mod kernel;
pub mod manifest;
pub mod pool;
pub mod session;
pub mod timeline;

pub use crate::compile::compiler::compile_frame;
pub use crate::compile::instruction::{CompiledInstruction, CompiledProgram, InputBinding};
pub use crate::exec::cpu::CpuDevice;
pub use crate::exec::device::{PipelineHandle, RenderDevice, TextureId};
pub use crate::exec::engine::{FrameBuffer, RenderMetadata, RenderWarning, RenderedFrame, execute};
pub use crate::exec::source::{ImageData, ResolvedSource, SourcePixels, SourceResolver};
pub use crate::foundation::color::ColorEncoding;
pub use crate::foundation::error::{WeftError, WeftResult};
pub use crate::foundation::time::{Fps, FrameIndex, TimeRange};
pub use crate::kernel::KernelRegistry;
pub use crate::manifest::{FeatureManifest, ManifestSet, PassDecl};
pub use crate::pool::{TextureFormat, TextureKey, TexturePool, TexturePoolOpts, TextureUsage};
pub use crate::session::{RenderSession, RenderStats, SessionOpts};
pub use crate::timeline::{
    AssetRef, Canvas, Clip, Ease, EffectCall, SourceKind, Timeline, Track, TransitionDescriptor,
    TransitionKind, WipeDir,
};
