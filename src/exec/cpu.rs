//! Software reference device.
//!
//! Implements every built-in concrete kernel in plain f32 arithmetic so the whole
//! pipeline runs and is hashable without a GPU. A hardware backend plugs in behind the
//! same [`RenderDevice`] seam; this device is also the semantic baseline its output is
//! compared against.

use std::collections::HashMap;

use crate::exec::device::{PipelineHandle, RenderDevice, TextureId};
use crate::foundation::color;
use crate::foundation::error::{WeftError, WeftResult};
use crate::graph::Params;
use crate::pool::TextureKey;

/// Built-in concrete kernels, parsed from the persisted kernel names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CpuKernel {
    SrgbDecode,
    Rec709Decode,
    SrgbEncode,
    Rec709Encode,
    BlurH,
    BlurV,
    Exposure,
    Invert,
    CompOver,
    Crossfade,
    DipToColor,
    Wipe,
}

impl CpuKernel {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "cs_srgb_decode" => Self::SrgbDecode,
            "cs_rec709_decode" => Self::Rec709Decode,
            "cs_srgb_encode" => Self::SrgbEncode,
            "cs_rec709_encode" => Self::Rec709Encode,
            "fx_blur_h" => Self::BlurH,
            "fx_blur_v" => Self::BlurV,
            "fx_exposure" => Self::Exposure,
            "fx_invert" => Self::Invert,
            "comp_over" => Self::CompOver,
            "xf_crossfade" => Self::Crossfade,
            "xf_dip" => Self::DipToColor,
            "xf_wipe" => Self::Wipe,
            _ => return None,
        })
    }
}

#[derive(Debug)]
struct CpuTexture {
    key: TextureKey,
    pixels: Vec<f32>,
}

/// CPU implementation of [`RenderDevice`].
#[derive(Debug)]
pub struct CpuDevice {
    /// Output surface dimensions; informational, textures carry their own keys.
    width: u32,
    height: u32,
    textures: HashMap<TextureId, CpuTexture>,
    pipelines: Vec<CpuKernel>,
    next_texture: u32,
    lost: bool,
}

impl CpuDevice {
    /// Create a device for an output surface of the given dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            textures: HashMap::new(),
            pipelines: Vec::new(),
            next_texture: 0,
            lost: false,
        }
    }

    /// Output surface width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Output surface height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of pipelines compiled so far. Stable across repeated renders of the same
    /// program thanks to the registry's compile-once cache.
    pub fn pipelines_compiled(&self) -> usize {
        self.pipelines.len()
    }

    /// Poison the device so every subsequent call fails with
    /// [`WeftError::DeviceLost`]. Test hook for the fatal error path.
    pub fn lose_device(&mut self) {
        self.lost = true;
    }

    fn check_lost(&self) -> WeftResult<()> {
        if self.lost {
            return Err(WeftError::device_lost("cpu device poisoned"));
        }
        Ok(())
    }

    fn texture(&self, id: TextureId) -> WeftResult<&CpuTexture> {
        self.textures
            .get(&id)
            .ok_or_else(|| WeftError::execution(format!("unknown texture {}", id.0)))
    }

    fn run_kernel(
        &self,
        kernel: CpuKernel,
        inputs: &[&CpuTexture],
        out_key: TextureKey,
        out: &mut [f32],
        params: &Params,
    ) -> WeftResult<()> {
        let need = |n: usize| -> WeftResult<()> {
            if inputs.len() < n {
                return Err(WeftError::execution(format!(
                    "kernel {kernel:?} needs {n} inputs, got {}",
                    inputs.len()
                )));
            }
            Ok(())
        };

        match kernel {
            CpuKernel::SrgbDecode => {
                need(1)?;
                map_rgb(&inputs[0].pixels, out, color::srgb_to_linear);
            }
            CpuKernel::Rec709Decode => {
                need(1)?;
                map_rgb(&inputs[0].pixels, out, color::rec709_to_linear);
            }
            CpuKernel::SrgbEncode => {
                need(1)?;
                map_rgb(&inputs[0].pixels, out, color::linear_to_srgb);
            }
            CpuKernel::Rec709Encode => {
                need(1)?;
                map_rgb(&inputs[0].pixels, out, color::linear_to_rec709);
            }
            CpuKernel::BlurH => {
                need(1)?;
                let radius = param_f64(params, "radius_px").unwrap_or(4.0).max(0.0) as usize;
                blur_axis(&inputs[0].pixels, out, out_key, radius, true);
            }
            CpuKernel::BlurV => {
                need(1)?;
                let radius = param_f64(params, "radius_px").unwrap_or(4.0).max(0.0) as usize;
                blur_axis(&inputs[0].pixels, out, out_key, radius, false);
            }
            CpuKernel::Exposure => {
                need(1)?;
                let gain = (param_f64(params, "stops").unwrap_or(0.0) as f32).exp2();
                map_rgb(&inputs[0].pixels, out, |v| v * gain);
            }
            CpuKernel::Invert => {
                need(1)?;
                map_rgb(&inputs[0].pixels, out, |v| 1.0 - v);
            }
            CpuKernel::CompOver => {
                need(2)?;
                let opacity = param_f64(params, "opacity").unwrap_or(1.0).clamp(0.0, 1.0) as f32;
                comp_over(&inputs[0].pixels, &inputs[1].pixels, out, opacity);
            }
            CpuKernel::Crossfade => {
                need(2)?;
                let p = param_f64(params, "progress").unwrap_or(0.0).clamp(0.0, 1.0) as f32;
                for (i, o) in out.iter_mut().enumerate() {
                    let a = inputs[0].pixels.get(i).copied().unwrap_or(0.0);
                    let b = inputs[1].pixels.get(i).copied().unwrap_or(0.0);
                    *o = a + (b - a) * p;
                }
            }
            CpuKernel::DipToColor => {
                need(2)?;
                let p = param_f64(params, "progress").unwrap_or(0.0).clamp(0.0, 1.0) as f32;
                let dip = param_color(params, "color").unwrap_or([0.0, 0.0, 0.0, 1.0]);
                dip_to_color(&inputs[0].pixels, &inputs[1].pixels, out, p, dip);
            }
            CpuKernel::Wipe => {
                need(2)?;
                let p = param_f64(params, "progress").unwrap_or(0.0).clamp(0.0, 1.0) as f32;
                let dir = params
                    .get("direction")
                    .and_then(|v| v.as_str())
                    .unwrap_or("left_to_right")
                    .to_owned();
                wipe(&inputs[0].pixels, &inputs[1].pixels, out, out_key, p, &dir);
            }
        }
        Ok(())
    }
}

impl RenderDevice for CpuDevice {
    fn create_texture(&mut self, key: TextureKey) -> WeftResult<TextureId> {
        self.check_lost()?;
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        let len = (key.width as usize) * (key.height as usize) * 4;
        self.textures.insert(
            id,
            CpuTexture {
                key,
                pixels: vec![0.0; len],
            },
        );
        Ok(id)
    }

    fn destroy_texture(&mut self, id: TextureId) -> WeftResult<()> {
        self.check_lost()?;
        if self.textures.remove(&id).is_none() {
            return Err(WeftError::execution(format!(
                "destroy of unknown texture {}",
                id.0
            )));
        }
        Ok(())
    }

    fn upload(&mut self, id: TextureId, pixels: &[f32]) -> WeftResult<()> {
        self.check_lost()?;
        let tex = self
            .textures
            .get_mut(&id)
            .ok_or_else(|| WeftError::execution(format!("upload to unknown texture {}", id.0)))?;
        if pixels.len() != tex.pixels.len() {
            return Err(WeftError::execution(format!(
                "upload size mismatch: got {} floats, texture holds {}",
                pixels.len(),
                tex.pixels.len()
            )));
        }
        tex.pixels.copy_from_slice(pixels);
        Ok(())
    }

    fn compile_pipeline(&mut self, name: &str) -> WeftResult<PipelineHandle> {
        self.check_lost()?;
        let kernel = CpuKernel::parse(name).ok_or_else(|| WeftError::MissingKernel {
            name: name.to_owned(),
        })?;
        let handle = PipelineHandle(self.pipelines.len() as u32);
        self.pipelines.push(kernel);
        Ok(handle)
    }

    fn dispatch(
        &mut self,
        pipeline: PipelineHandle,
        inputs: &[TextureId],
        output: TextureId,
        params: &Params,
    ) -> WeftResult<()> {
        self.check_lost()?;
        let kernel = *self
            .pipelines
            .get(pipeline.0 as usize)
            .ok_or_else(|| WeftError::execution(format!("unknown pipeline {}", pipeline.0)))?;

        // Take the output buffer so inputs can be borrowed immutably; an input aliasing
        // the output is a scheduling bug upstream.
        let mut out_tex = self.textures.remove(&output).ok_or_else(|| {
            WeftError::execution(format!("dispatch to unknown output texture {}", output.0))
        })?;
        let result = (|| {
            let mut bound = Vec::with_capacity(inputs.len());
            for id in inputs {
                bound.push(self.texture(*id)?);
            }
            self.run_kernel(kernel, &bound, out_tex.key, &mut out_tex.pixels, params)
        })();
        self.textures.insert(output, out_tex);
        result
    }

    fn read_back(&self, id: TextureId) -> WeftResult<Vec<f32>> {
        self.check_lost()?;
        Ok(self.texture(id)?.pixels.clone())
    }

    fn key_of(&self, id: TextureId) -> WeftResult<TextureKey> {
        Ok(self.texture(id)?.key)
    }
}

fn param_f64(params: &Params, key: &str) -> Option<f64> {
    params.get(key).and_then(|v| v.as_f64())
}

fn param_color(params: &Params, key: &str) -> Option<[f32; 4]> {
    params.get(key).and_then(|v| v.as_color())
}

/// Apply `f` to R, G, B of every pixel; alpha passes through.
fn map_rgb(src: &[f32], out: &mut [f32], f: impl Fn(f32) -> f32) {
    let n = src.len().min(out.len());
    for i in (0..n).step_by(4) {
        out[i] = f(src[i]);
        out[i + 1] = f(src[i + 1]);
        out[i + 2] = f(src[i + 2]);
        out[i + 3] = src[i + 3];
    }
}

/// One axis of a separable gaussian blur, edge-clamped.
fn blur_axis(src: &[f32], out: &mut [f32], key: TextureKey, radius: usize, horizontal: bool) {
    let w = key.width as usize;
    let h = key.height as usize;
    if radius == 0 {
        let n = src.len().min(out.len());
        out[..n].copy_from_slice(&src[..n]);
        return;
    }

    let sigma = (radius as f32 / 3.0).max(0.1);
    let mut weights = Vec::with_capacity(2 * radius + 1);
    let mut total = 0.0f32;
    for i in 0..=2 * radius {
        let d = i as f32 - radius as f32;
        let wgt = (-(d * d) / (2.0 * sigma * sigma)).exp();
        weights.push(wgt);
        total += wgt;
    }
    for wgt in &mut weights {
        *wgt /= total;
    }

    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            for (i, wgt) in weights.iter().enumerate() {
                let off = i as isize - radius as isize;
                let (sx, sy) = if horizontal {
                    ((x as isize + off).clamp(0, w as isize - 1) as usize, y)
                } else {
                    (x, (y as isize + off).clamp(0, h as isize - 1) as usize)
                };
                let base = (sy * w + sx) * 4;
                for c in 0..4 {
                    acc[c] += src[base + c] * wgt;
                }
            }
            let base = (y * w + x) * 4;
            out[base..base + 4].copy_from_slice(&acc);
        }
    }
}

/// Premultiplied source-over: `out = src * opacity + dst * (1 - src.a * opacity)`.
fn comp_over(dst: &[f32], src: &[f32], out: &mut [f32], opacity: f32) {
    let n = out.len();
    for i in (0..n).step_by(4) {
        let sa = src.get(i + 3).copied().unwrap_or(0.0) * opacity;
        for c in 0..4 {
            let s = src.get(i + c).copied().unwrap_or(0.0) * opacity;
            let d = dst.get(i + c).copied().unwrap_or(0.0);
            out[i + c] = s + d * (1.0 - sa);
        }
    }
}

/// First half fades A into the dip color, second half fades the dip color into B.
fn dip_to_color(a: &[f32], b: &[f32], out: &mut [f32], p: f32, dip: [f32; 4]) {
    let n = out.len();
    for i in (0..n).step_by(4) {
        for c in 0..4 {
            let av = a.get(i + c).copied().unwrap_or(0.0);
            let bv = b.get(i + c).copied().unwrap_or(0.0);
            out[i + c] = if p < 0.5 {
                let t = (2.0 * p).min(1.0);
                av + (dip[c] - av) * t
            } else {
                let t = 2.0 * p - 1.0;
                dip[c] + (bv - dip[c]) * t
            };
        }
    }
}

/// Hard spatial threshold: pixels behind the wipe front show B, ahead show A.
fn wipe(a: &[f32], b: &[f32], out: &mut [f32], key: TextureKey, p: f32, dir: &str) {
    let w = key.width as usize;
    let h = key.height as usize;
    for y in 0..h {
        for x in 0..w {
            let t = match dir {
                "right_to_left" => 1.0 - (x as f32 + 0.5) / w as f32,
                "top_to_bottom" => (y as f32 + 0.5) / h as f32,
                "bottom_to_top" => 1.0 - (y as f32 + 0.5) / h as f32,
                _ => (x as f32 + 0.5) / w as f32,
            };
            let src = if t < p { b } else { a };
            let base = (y * w + x) * 4;
            for c in 0..4 {
                out[base + c] = src.get(base + c).copied().unwrap_or(0.0);
            }
        }
    }
}
