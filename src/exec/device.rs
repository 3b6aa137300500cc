//! The injected device capability.

use crate::foundation::error::WeftResult;
use crate::graph::Params;
use crate::pool::TextureKey;

/// Opaque handle to a device-resident texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TextureId(pub u32);

/// Opaque handle to a compiled kernel pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u32);

/// The injected device capability: command dispatch, pipeline compilation, and resource
/// allocation.
///
/// The compiler and scheduler never touch this trait; only the texture pool (allocation)
/// and the executor (dispatch) do. That keeps all graph logic unit-testable against the
/// software reference device ([`crate::exec::cpu::CpuDevice`]), with a real GPU backend
/// swapped in behind the same seam.
///
/// Dispatch contract: every kernel fully overwrites its output texture before any pixel
/// of it is read, so pooled-texture reuse is never observable in output pixels.
pub trait RenderDevice: Send {
    /// Allocate a texture. Contents are unspecified until first dispatch or upload.
    fn create_texture(&mut self, key: TextureKey) -> WeftResult<TextureId>;

    /// Release a texture. Only the pool calls this; nodes never own textures.
    fn destroy_texture(&mut self, id: TextureId) -> WeftResult<()>;

    /// CPU-staged upload of tightly packed RGBA32F pixels into `id`.
    fn upload(&mut self, id: TextureId, pixels: &[f32]) -> WeftResult<()>;

    /// Compile the concrete kernel `name` into a dispatchable pipeline.
    ///
    /// A name absent from the loaded kernel library is a hard
    /// [`crate::WeftError::MissingKernel`] error, never a silent no-op.
    fn compile_pipeline(&mut self, name: &str) -> WeftResult<PipelineHandle>;

    /// Dispatch one kernel: bind `inputs` in order, write `output`, honoring `params`.
    fn dispatch(
        &mut self,
        pipeline: PipelineHandle,
        inputs: &[TextureId],
        output: TextureId,
        params: &Params,
    ) -> WeftResult<()>;

    /// Read a texture back into tightly packed RGBA32F pixels.
    fn read_back(&self, id: TextureId) -> WeftResult<Vec<f32>>;

    /// The key a texture was created with.
    fn key_of(&self, id: TextureId) -> WeftResult<TextureKey>;
}
