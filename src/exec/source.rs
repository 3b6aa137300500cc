//! Media ingestion boundary.
//!
//! The executor asks a [`SourceResolver`] for pixels; decoding, caching, and I/O all
//! live behind this trait. Resolution is allowed to fail — a missing asset degrades to
//! a black frame with a warning, it never aborts the render.

use crate::exec::device::TextureId;
use crate::foundation::color::ColorEncoding;
use crate::timeline::AssetRef;

/// CPU-resident RGBA32F pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageData {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Tightly packed RGBA, `width * height * 4` floats.
    pub pixels: Vec<f32>,
}

impl ImageData {
    /// A solid-color image.
    pub fn solid(width: u32, height: u32, rgba: [f32; 4]) -> Self {
        let n = (width as usize) * (height as usize);
        let mut pixels = Vec::with_capacity(n * 4);
        for _ in 0..n {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            pixels,
        }
    }
}

/// Where resolved pixels live.
#[derive(Clone, Debug)]
pub enum SourcePixels {
    /// Already device-resident (a zero-copy decoder path).
    Gpu(TextureId),
    /// CPU pixels needing a staged upload.
    Cpu(ImageData),
}

/// A resolved source frame.
#[derive(Clone, Debug)]
pub struct ResolvedSource {
    /// The pixels.
    pub pixels: SourcePixels,
    /// The encoding the media is actually stored in.
    pub native_encoding: ColorEncoding,
}

/// Resolves an asset reference at a media-local time to pixels.
pub trait SourceResolver: Send + Sync {
    /// Resolve `asset` at `time_s` seconds into the media. `None` means the asset is
    /// unavailable; the executor substitutes black and records a warning.
    fn resolve(&self, asset: &AssetRef, time_s: f64) -> Option<ResolvedSource>;
}

/// Resolver that serves a fixed solid color per asset. Test and preview workhorse.
#[derive(Debug, Default)]
pub struct SolidResolver {
    colors: std::collections::HashMap<AssetRef, ([f32; 4], ColorEncoding)>,
    width: u32,
    height: u32,
}

impl SolidResolver {
    /// Resolver producing `width`x`height` frames.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            colors: std::collections::HashMap::new(),
            width,
            height,
        }
    }

    /// Serve `rgba` (stored in `encoding`) for `asset`.
    pub fn insert(&mut self, asset: AssetRef, rgba: [f32; 4], encoding: ColorEncoding) {
        self.colors.insert(asset, (rgba, encoding));
    }
}

impl SourceResolver for SolidResolver {
    fn resolve(&self, asset: &AssetRef, _time_s: f64) -> Option<ResolvedSource> {
        let (rgba, encoding) = self.colors.get(asset)?;
        Some(ResolvedSource {
            pixels: SourcePixels::Cpu(ImageData::solid(self.width, self.height, *rgba)),
            native_encoding: *encoding,
        })
    }
}

/// Resolver that never resolves anything. Every clip degrades to black.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullResolver;

impl SourceResolver for NullResolver {
    fn resolve(&self, _asset: &AssetRef, _time_s: f64) -> Option<ResolvedSource> {
        None
    }
}
