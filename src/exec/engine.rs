//! The instruction-list executor.
//!
//! Walks a [`CompiledProgram`] front to back against an injected device, drawing every
//! intermediate from the texture pool and releasing it as soon as its last consumer has
//! dispatched. Recoverable faults (a missing asset) degrade to black with a warning;
//! device loss and dispatch failures abort the frame.

use std::collections::HashMap;

use crate::compile::instruction::{CompiledInstruction, CompiledProgram};
use crate::exec::device::{RenderDevice, TextureId};
use crate::exec::source::{ImageData, SourcePixels, SourceResolver};
use crate::foundation::color::ColorEncoding;
use crate::foundation::error::{WeftError, WeftResult};
use crate::graph::{NodeId, PropValue};
use crate::kernel::KernelRegistry;
use crate::pool::{PooledTexture, TextureFormat, TextureKey, TexturePool, TextureUsage};
use crate::timeline::SourceKind;

/// A non-fatal event observed while rendering. Warnings never change pixels fatally;
/// they explain why a frame may not look as authored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderWarning {
    /// An asset could not be resolved; its clip rendered as opaque black.
    MissingAsset {
        /// The unresolved asset.
        asset: String,
        /// The source node that degraded.
        node: NodeId,
    },
    /// A source arrived as CPU pixels and took the staged-upload path.
    CpuStagedUpload {
        /// The uploaded asset.
        asset: String,
    },
    /// Resolved media is stored in a different encoding than its clip declares.
    /// The declared encoding still drives the decode, so colors may shift.
    EncodingMismatch {
        /// The mismatched asset.
        asset: String,
        /// What the clip declared.
        declared: ColorEncoding,
        /// What the resolver reported.
        native: ColorEncoding,
    },
    /// The pool destroyed textures to stay under its byte budget during this frame.
    PoolEviction {
        /// Number of textures evicted.
        evicted: u64,
    },
}

impl std::fmt::Display for RenderWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingAsset { asset, node } => {
                write!(f, "asset '{asset}' unavailable; {node} rendered black")
            }
            Self::CpuStagedUpload { asset } => {
                write!(f, "asset '{asset}' staged through a CPU upload")
            }
            Self::EncodingMismatch {
                asset,
                declared,
                native,
            } => write!(
                f,
                "asset '{asset}' declared {declared:?} but resolved as {native:?}"
            ),
            Self::PoolEviction { evicted } => {
                write!(f, "texture pool evicted {evicted} texture(s) under budget pressure")
            }
        }
    }
}

/// Execution metadata delivered alongside the pixels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderMetadata {
    /// Warnings in the order they occurred.
    pub warnings: Vec<RenderWarning>,
}

/// A delivered frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameBuffer {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Tightly packed RGBA32F pixels.
    pub pixels: Vec<f32>,
    /// Encoding of the pixels.
    pub encoding: ColorEncoding,
}

/// Frame plus metadata.
#[derive(Clone, Debug)]
pub struct RenderedFrame {
    /// The pixels.
    pub frame: FrameBuffer,
    /// What happened while rendering them.
    pub metadata: RenderMetadata,
}

/// A produced value: the texture plus, when pool-owned, the handle to return.
struct Produced {
    texture: TextureId,
    pooled: Option<PooledTexture>,
}

/// Execute `program` against `device`. All intermediates come from `pool`; kernels are
/// resolved through `registry`'s compile-once cache; sources come from `resolver`.
#[tracing::instrument(skip_all, fields(instructions = program.instructions.len()))]
pub fn execute(
    program: &CompiledProgram,
    device: &mut dyn RenderDevice,
    pool: &mut TexturePool,
    registry: &mut KernelRegistry,
    resolver: &dyn SourceResolver,
) -> WeftResult<RenderedFrame> {
    let evictions_before = pool.stats().evictions;
    let mut warnings = Vec::new();

    // Remaining reads per producing node; a produced texture is returned to the pool
    // the moment this hits zero.
    let mut refcount: HashMap<NodeId, u32> = HashMap::new();
    for inst in &program.instructions {
        for read in inst.reads() {
            *refcount.entry(read).or_insert(0) += 1;
        }
    }

    let key = |usage: TextureUsage| TextureKey {
        width: program.width,
        height: program.height,
        format: TextureFormat::Rgba32F,
        usage,
    };

    let mut produced: HashMap<NodeId, Produced> = HashMap::new();
    let mut delivered: Option<FrameBuffer> = None;

    let result = (|| -> WeftResult<()> {
        for inst in &program.instructions {
            match inst {
                CompiledInstruction::LoadSource {
                    node,
                    asset,
                    kind,
                    time_s,
                    declared_encoding,
                } => {
                    let resolved = if *kind == SourceKind::Procedural {
                        None
                    } else {
                        resolver.resolve(asset, *time_s)
                    };
                    if let Some(source) = &resolved
                        && source.native_encoding != *declared_encoding
                    {
                        tracing::warn!(
                            asset = %asset.0,
                            declared = ?declared_encoding,
                            native = ?source.native_encoding,
                            "clip encoding does not match resolved media"
                        );
                        warnings.push(RenderWarning::EncodingMismatch {
                            asset: asset.0.clone(),
                            declared: *declared_encoding,
                            native: source.native_encoding,
                        });
                    }
                    let value = match resolved.map(|r| r.pixels) {
                        Some(SourcePixels::Gpu(texture)) => {
                            // A device-resident source must already match the frame;
                            // there is no staging pass to resize it through.
                            let key = device.key_of(texture)?;
                            if key.width != program.width || key.height != program.height {
                                return Err(WeftError::execution(format!(
                                    "resident source '{}' is {}x{}, frame is {}x{}",
                                    asset.0, key.width, key.height, program.width, program.height,
                                )));
                            }
                            Produced {
                                texture,
                                pooled: None,
                            }
                        }
                        Some(SourcePixels::Cpu(image)) => {
                            warnings.push(RenderWarning::CpuStagedUpload {
                                asset: asset.0.clone(),
                            });
                            upload_image(device, pool, key(TextureUsage::Source), &image)?
                        }
                        None => {
                            if *kind != SourceKind::Procedural {
                                tracing::warn!(asset = %asset.0, "asset unavailable, rendering black");
                                warnings.push(RenderWarning::MissingAsset {
                                    asset: asset.0.clone(),
                                    node: *node,
                                });
                            }
                            let black = ImageData::solid(
                                program.width,
                                program.height,
                                [0.0, 0.0, 0.0, 1.0],
                            );
                            upload_image(device, pool, key(TextureUsage::Source), &black)?
                        }
                    };
                    produced.insert(*node, value);
                }

                CompiledInstruction::Process {
                    node,
                    kernel,
                    inputs,
                    params,
                    ..
                } => {
                    let bound: Vec<TextureId> = inputs
                        .iter()
                        .map(|b| texture_of(&produced, b.node))
                        .collect::<WeftResult<_>>()?;
                    let out = pool.checkout(device, key(TextureUsage::Intermediate))?;
                    let pipeline = registry.load_pipeline(device, kernel)?;
                    device.dispatch(pipeline, &bound, out.texture, params)?;
                    produced.insert(
                        *node,
                        Produced {
                            texture: out.texture,
                            pooled: Some(out),
                        },
                    );
                    release_reads(inst, &mut refcount, &mut produced, device, pool)?;
                }

                CompiledInstruction::CompositeTransition {
                    node,
                    kernel,
                    a,
                    b,
                    progress,
                    params,
                } => {
                    let bound = [texture_of(&produced, *a)?, texture_of(&produced, *b)?];
                    let out = pool.checkout(device, key(TextureUsage::Intermediate))?;
                    let pipeline = registry.load_pipeline(device, kernel)?;
                    let mut params = params.clone();
                    params.insert("progress".to_owned(), PropValue::F64(*progress));
                    device.dispatch(pipeline, &bound, out.texture, &params)?;
                    produced.insert(
                        *node,
                        Produced {
                            texture: out.texture,
                            pooled: Some(out),
                        },
                    );
                    release_reads(inst, &mut refcount, &mut produced, device, pool)?;
                }

                CompiledInstruction::Present { input, .. } => {
                    let texture = texture_of(&produced, *input)?;
                    let pixels = device.read_back(texture)?;
                    delivered = Some(FrameBuffer {
                        width: program.width,
                        height: program.height,
                        pixels,
                        encoding: program.output_encoding,
                    });
                    release_reads(inst, &mut refcount, &mut produced, device, pool)?;
                }
            }
        }
        Ok(())
    })();

    // Whatever happened, return outstanding textures to the pool.
    for (_, value) in produced.drain() {
        if let Some(handle) = value.pooled {
            pool.checkin(device, handle)?;
        }
    }
    result?;

    let frame = delivered
        .ok_or_else(|| WeftError::execution("program terminated without a present step"))?;

    let evicted = pool.stats().evictions - evictions_before;
    if evicted > 0 {
        warnings.push(RenderWarning::PoolEviction { evicted });
    }
    Ok(RenderedFrame {
        frame,
        metadata: RenderMetadata { warnings },
    })
}

fn texture_of(produced: &HashMap<NodeId, Produced>, node: NodeId) -> WeftResult<TextureId> {
    produced
        .get(&node)
        .map(|p| p.texture)
        .ok_or_else(|| WeftError::execution(format!("{node} read before it was produced")))
}

fn upload_image(
    device: &mut dyn RenderDevice,
    pool: &mut TexturePool,
    key: TextureKey,
    image: &ImageData,
) -> WeftResult<Produced> {
    let out = pool.checkout(device, key)?;
    if image.width == key.width && image.height == key.height {
        device.upload(out.texture, &image.pixels)?;
    } else {
        // Sources at a different resolution get pillarboxed onto black, top-left
        // aligned. A real scaler is a kernel concern, not an upload concern.
        let mut canvas =
            ImageData::solid(key.width, key.height, [0.0, 0.0, 0.0, 1.0]);
        let w = image.width.min(key.width) as usize;
        let h = image.height.min(key.height) as usize;
        for y in 0..h {
            let src = (y * image.width as usize) * 4;
            let dst = (y * key.width as usize) * 4;
            canvas.pixels[dst..dst + w * 4].copy_from_slice(&image.pixels[src..src + w * 4]);
        }
        device.upload(out.texture, &canvas.pixels)?;
    }
    Ok(Produced {
        texture: out.texture,
        pooled: Some(out),
    })
}

/// Decrement the refcount of everything `inst` read; check fully-consumed pool-owned
/// textures back in.
fn release_reads(
    inst: &CompiledInstruction,
    refcount: &mut HashMap<NodeId, u32>,
    produced: &mut HashMap<NodeId, Produced>,
    device: &mut dyn RenderDevice,
    pool: &mut TexturePool,
) -> WeftResult<()> {
    for read in inst.reads() {
        let Some(count) = refcount.get_mut(&read) else {
            continue;
        };
        *count = count.saturating_sub(1);
        if *count == 0
            && let Some(value) = produced.remove(&read)
            && let Some(handle) = value.pooled
        {
            pool.checkin(device, handle)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compiler::compile_frame;
    use crate::exec::cpu::CpuDevice;
    use crate::exec::source::{NullResolver, SolidResolver};
    use crate::foundation::time::TimeRange;
    use crate::kernel::KernelRegistry;
    use crate::manifest::ManifestSet;
    use crate::pool::TexturePoolOpts;
    use crate::timeline::{
        AssetRef, Canvas, Clip, SourceKind, Timeline, Track,
    };

    fn clip(id: &str, start: f64, dur: f64) -> Clip {
        Clip {
            id: id.to_owned(),
            asset: AssetRef(format!("asset://{id}")),
            source: SourceKind::Video,
            encoding: ColorEncoding::Srgb,
            range: TimeRange::new(start, dur).unwrap(),
            opacity: 1.0,
            effects: Vec::new(),
            transition_out: None,
        }
    }

    fn timeline() -> Timeline {
        Timeline {
            canvas: Canvas {
                width: 16,
                height: 16,
            },
            output_encoding: ColorEncoding::Srgb,
            tracks: vec![Track {
                name: "v1".into(),
                clips: vec![clip("a", 0.0, 4.0)],
            }],
        }
    }

    #[test]
    fn missing_asset_degrades_to_black_with_a_warning() {
        let tl = timeline();
        let program = compile_frame(
            &tl,
            1.0,
            &ManifestSet::with_builtin_features(),
            &KernelRegistry::with_builtin_kernels(),
        )
        .unwrap();

        let mut device = CpuDevice::new(16, 16);
        let mut pool = TexturePool::new(TexturePoolOpts::default());
        let mut registry = KernelRegistry::with_builtin_kernels();
        let rendered = execute(
            &program,
            &mut device,
            &mut pool,
            &mut registry,
            &NullResolver,
        )
        .unwrap();

        assert!(rendered.metadata.warnings.iter().any(|w| matches!(
            w,
            RenderWarning::MissingAsset { asset, .. } if asset == "asset://a"
        )));
        // Black survives the sRGB decode/encode round trip untouched.
        for px in rendered.frame.pixels.chunks(4) {
            assert_eq!(&px[..3], &[0.0, 0.0, 0.0]);
            assert_eq!(px[3], 1.0);
        }
    }

    #[test]
    fn resolved_solid_color_arrives_in_the_output() {
        let tl = timeline();
        let program = compile_frame(
            &tl,
            1.0,
            &ManifestSet::with_builtin_features(),
            &KernelRegistry::with_builtin_kernels(),
        )
        .unwrap();

        let mut resolver = SolidResolver::new(16, 16);
        resolver.insert(
            AssetRef("asset://a".into()),
            [0.5, 0.5, 0.5, 1.0],
            ColorEncoding::Srgb,
        );
        let mut device = CpuDevice::new(16, 16);
        let mut pool = TexturePool::new(TexturePoolOpts::default());
        let mut registry = KernelRegistry::with_builtin_kernels();
        let rendered = execute(&program, &mut device, &mut pool, &mut registry, &resolver).unwrap();

        // Decode then encode returns the stored value.
        assert!((rendered.frame.pixels[0] - 0.5).abs() < 1e-5);
        assert!(rendered
            .metadata
            .warnings
            .iter()
            .any(|w| matches!(w, RenderWarning::CpuStagedUpload { .. })));
    }

    #[test]
    fn mismatched_media_encoding_is_reported() {
        let tl = timeline();
        let program = compile_frame(
            &tl,
            1.0,
            &ManifestSet::with_builtin_features(),
            &KernelRegistry::with_builtin_kernels(),
        )
        .unwrap();

        // The clip declares sRGB but the resolver says the media is Rec.709.
        let mut resolver = SolidResolver::new(16, 16);
        resolver.insert(
            AssetRef("asset://a".into()),
            [0.5, 0.5, 0.5, 1.0],
            ColorEncoding::Rec709,
        );
        let mut device = CpuDevice::new(16, 16);
        let mut pool = TexturePool::new(TexturePoolOpts::default());
        let mut registry = KernelRegistry::with_builtin_kernels();
        let rendered = execute(&program, &mut device, &mut pool, &mut registry, &resolver).unwrap();

        assert!(rendered.metadata.warnings.iter().any(|w| matches!(
            w,
            RenderWarning::EncodingMismatch {
                asset,
                declared: ColorEncoding::Srgb,
                native: ColorEncoding::Rec709,
            } if asset == "asset://a"
        )));
    }

    #[test]
    fn wrong_size_resident_source_aborts_the_frame() {
        use crate::exec::source::ResolvedSource;

        struct ResidentResolver {
            texture: TextureId,
        }
        impl SourceResolver for ResidentResolver {
            fn resolve(&self, _asset: &AssetRef, _time_s: f64) -> Option<ResolvedSource> {
                Some(ResolvedSource {
                    pixels: SourcePixels::Gpu(self.texture),
                    native_encoding: ColorEncoding::Srgb,
                })
            }
        }

        let tl = timeline();
        let program = compile_frame(
            &tl,
            1.0,
            &ManifestSet::with_builtin_features(),
            &KernelRegistry::with_builtin_kernels(),
        )
        .unwrap();

        let mut device = CpuDevice::new(16, 16);
        let texture = device
            .create_texture(TextureKey {
                width: 8,
                height: 8,
                format: TextureFormat::Rgba32F,
                usage: TextureUsage::Source,
            })
            .unwrap();
        let mut pool = TexturePool::new(TexturePoolOpts::default());
        let mut registry = KernelRegistry::with_builtin_kernels();
        let err = execute(
            &program,
            &mut device,
            &mut pool,
            &mut registry,
            &ResidentResolver { texture },
        )
        .unwrap_err();
        assert!(err.to_string().contains("8x8"));
    }

    #[test]
    fn second_frame_reuses_pooled_textures() {
        let tl = timeline();
        let program = compile_frame(
            &tl,
            1.0,
            &ManifestSet::with_builtin_features(),
            &KernelRegistry::with_builtin_kernels(),
        )
        .unwrap();

        let mut device = CpuDevice::new(16, 16);
        let mut pool = TexturePool::new(TexturePoolOpts::default());
        let mut registry = KernelRegistry::with_builtin_kernels();
        execute(&program, &mut device, &mut pool, &mut registry, &NullResolver).unwrap();
        let after_first = pool.stats().allocations;
        execute(&program, &mut device, &mut pool, &mut registry, &NullResolver).unwrap();
        assert_eq!(pool.stats().allocations, after_first);
        assert!(pool.stats().reuses > 0);
    }

    #[test]
    fn pipelines_compile_once_across_frames() {
        let tl = timeline();
        let program = compile_frame(
            &tl,
            1.0,
            &ManifestSet::with_builtin_features(),
            &KernelRegistry::with_builtin_kernels(),
        )
        .unwrap();

        let mut device = CpuDevice::new(16, 16);
        let mut pool = TexturePool::new(TexturePoolOpts::default());
        let mut registry = KernelRegistry::with_builtin_kernels();
        execute(&program, &mut device, &mut pool, &mut registry, &NullResolver).unwrap();
        let compiled = device.pipelines_compiled();
        execute(&program, &mut device, &mut pool, &mut registry, &NullResolver).unwrap();
        assert_eq!(device.pipelines_compiled(), compiled);
    }

    #[test]
    fn lost_device_aborts_the_frame() {
        let tl = timeline();
        let program = compile_frame(
            &tl,
            1.0,
            &ManifestSet::with_builtin_features(),
            &KernelRegistry::with_builtin_kernels(),
        )
        .unwrap();

        let mut device = CpuDevice::new(16, 16);
        device.lose_device();
        let mut pool = TexturePool::new(TexturePoolOpts::default());
        let mut registry = KernelRegistry::with_builtin_kernels();
        let err = execute(&program, &mut device, &mut pool, &mut registry, &NullResolver);
        assert!(matches!(err, Err(WeftError::DeviceLost(_))));
    }
}
