//! Logical kernel registry: stable operation names mapped to concrete kernels.
//!
//! Projects persist logical names ("blur.horizontal"), never implementation details.
//! Renaming or replacing an underlying kernel updates this table and never invalidates
//! saved state. Resolution is a pure function of the logical name and the registered
//! table; the executor additionally compiles each concrete kernel at most once through
//! [`KernelRegistry::load_pipeline`].

use std::collections::{BTreeMap, HashMap};

use crate::exec::device::{PipelineHandle, RenderDevice};
use crate::foundation::error::{WeftError, WeftResult};

/// Logical-to-concrete kernel mapping with a pipeline-compilation cache.
#[derive(Debug, Default)]
pub struct KernelRegistry {
    /// Logical name -> concrete kernel name. Many-to-one. `BTreeMap` keeps the
    /// registered-name listing in error messages deterministic.
    logical: BTreeMap<String, String>,
    /// Concrete name -> compiled pipeline, filled lazily, at most once per name.
    pipelines: HashMap<String, PipelineHandle>,
}

impl KernelRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the stock logical->concrete table the compiler emits
    /// against: color transforms, separable blur, grading, alpha-over, and the
    /// transition composites.
    pub fn with_builtin_kernels() -> Self {
        let mut r = Self::new();
        r.register("color.srgb_to_working", "cs_srgb_decode");
        r.register("color.rec709_to_working", "cs_rec709_decode");
        r.register("color.working_to_srgb", "cs_srgb_encode");
        r.register("color.working_to_rec709", "cs_rec709_encode");
        r.register("blur.horizontal", "fx_blur_h");
        r.register("blur.vertical", "fx_blur_v");
        r.register("grade.exposure", "fx_exposure");
        r.register("grade.invert", "fx_invert");
        r.register("composite.over", "comp_over");
        r.register("transition.crossfade", "xf_crossfade");
        r.register("transition.dip_to_color", "xf_dip");
        r.register("transition.wipe", "xf_wipe");
        r
    }

    /// Map `logical` to `concrete`. Re-registering a logical name replaces its mapping
    /// (that is the point: kernels get renamed, projects do not).
    pub fn register(&mut self, logical: impl Into<String>, concrete: impl Into<String>) {
        self.logical.insert(logical.into(), concrete.into());
    }

    /// Resolve a logical name to the concrete kernel currently shipped.
    pub fn resolve(&self, logical: &str) -> WeftResult<&str> {
        self.logical
            .get(logical)
            .map(String::as_str)
            .ok_or_else(|| WeftError::UnknownLogicalName {
                name: logical.to_owned(),
                registered: self.logical.keys().cloned().collect(),
            })
    }

    /// Iterate registered logical names, sorted.
    pub fn logical_names(&self) -> impl Iterator<Item = &str> {
        self.logical.keys().map(String::as_str)
    }

    /// Compile (or fetch the cached) pipeline for a concrete kernel name.
    ///
    /// Each concrete name is compiled at most once per registry lifetime; a kernel the
    /// device cannot compile is a hard error.
    pub fn load_pipeline(
        &mut self,
        device: &mut dyn RenderDevice,
        concrete: &str,
    ) -> WeftResult<PipelineHandle> {
        if let Some(&h) = self.pipelines.get(concrete) {
            return Ok(h);
        }
        let h = device.compile_pipeline(concrete)?;
        self.pipelines.insert(concrete.to_owned(), h);
        Ok(h)
    }

    /// Number of pipelines compiled so far (diagnostics).
    pub fn compiled_pipelines(&self) -> usize {
        self.pipelines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::cpu::CpuDevice;

    #[test]
    fn resolve_follows_reregistration() {
        let mut r = KernelRegistry::new();
        r.register("blur.horizontal", "fx_blur_h");
        assert_eq!(r.resolve("blur.horizontal").unwrap(), "fx_blur_h");
        r.register("blur.horizontal", "fx_blur_h_v2");
        assert_eq!(r.resolve("blur.horizontal").unwrap(), "fx_blur_h_v2");
    }

    #[test]
    fn unknown_logical_name_error_lists_all_registered() {
        let r = KernelRegistry::with_builtin_kernels();
        let err = r.resolve("blur.diagonal").unwrap_err();
        let WeftError::UnknownLogicalName { name, registered } = err else {
            panic!("expected UnknownLogicalName");
        };
        assert_eq!(name, "blur.diagonal");
        assert!(registered.contains(&"blur.horizontal".to_owned()));
        // BTreeMap keys iterate sorted.
        let mut sorted = registered.clone();
        sorted.sort();
        assert_eq!(registered, sorted);
    }

    #[test]
    fn load_pipeline_compiles_each_concrete_name_once() {
        let mut device = CpuDevice::new(8, 8);
        let mut r = KernelRegistry::with_builtin_kernels();

        let a = r.load_pipeline(&mut device, "fx_blur_h").unwrap();
        let b = r.load_pipeline(&mut device, "fx_blur_h").unwrap();
        assert_eq!(a, b);
        assert_eq!(r.compiled_pipelines(), 1);
        assert_eq!(device.pipelines_compiled(), 1);
    }

    #[test]
    fn missing_concrete_kernel_is_a_hard_error() {
        let mut device = CpuDevice::new(8, 8);
        let mut r = KernelRegistry::new();
        r.register("grade.sepia", "fx_sepia_tone");
        let err = r.load_pipeline(&mut device, "fx_sepia_tone").unwrap_err();
        assert!(matches!(err, WeftError::MissingKernel { .. }));
    }
}
