//! Keyed pool of reusable device textures.
//!
//! Per-frame rendering performs no uncontrolled allocation: a node's output buffer is
//! checked out of the pool by exact key, and checked back in once its last downstream
//! consumer has been dispatched. The pool exclusively owns allocation and deallocation;
//! nodes hold only a checkout handle. Reuse is an optimization that must never be
//! observable in output pixels — every kernel fully overwrites its output before any
//! read (see [`crate::exec::device::RenderDevice`] dispatch contract).

use std::collections::HashMap;

use crate::exec::device::{RenderDevice, TextureId};
use crate::foundation::error::WeftResult;

/// Supported texture pixel formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    /// 32-bit float RGBA, premultiplied alpha.
    Rgba32F,
}

impl TextureFormat {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba32F => 16,
        }
    }
}

/// Usage/residency class a texture is allocated for; part of the pool key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureUsage {
    /// Decoded source frames.
    Source,
    /// Intermediate kernel outputs.
    Intermediate,
    /// Final frame written to the output surface.
    Output,
}

/// Exact-match pool key: dimensions, pixel format, and usage class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TextureKey {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: TextureFormat,
    /// Usage class.
    pub usage: TextureUsage,
}

impl TextureKey {
    /// Byte size of one texture with this key.
    pub fn byte_len(self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(self.format.bytes_per_pixel())
    }
}

/// Pool configuration.
#[derive(Clone, Copy, Debug)]
pub struct TexturePoolOpts {
    /// Soft budget for bytes retained on the free lists. Checkins past the budget evict
    /// oldest-unused textures first.
    pub soft_budget_bytes: usize,
    /// Maximum retained textures per key.
    pub max_free_per_key: usize,
}

impl Default for TexturePoolOpts {
    fn default() -> Self {
        Self {
            soft_budget_bytes: 512 * 1024 * 1024,
            max_free_per_key: 8,
        }
    }
}

/// Pool counters. `allocations` not increasing across a checkout proves reuse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TexturePoolStats {
    /// Device allocations performed.
    pub allocations: u64,
    /// Checkouts satisfied from the free list.
    pub reuses: u64,
    /// Textures destroyed to stay under the soft budget (or per-key cap).
    pub evictions: u64,
    /// Bytes currently retained on free lists.
    pub retained_bytes: usize,
    /// Textures currently retained on free lists.
    pub retained_textures: usize,
}

/// Checkout handle: the device texture plus the key it must be returned under.
#[derive(Clone, Copy, Debug)]
pub struct PooledTexture {
    /// Device texture id.
    pub texture: TextureId,
    /// Pool key this texture belongs to.
    pub key: TextureKey,
}

#[derive(Debug)]
struct FreeEntry {
    texture: TextureId,
    /// Monotonic checkin tick; smallest = oldest-unused, evicted first.
    age: u64,
}

/// Keyed cache of device textures.
#[derive(Debug)]
pub struct TexturePool {
    opts: TexturePoolOpts,
    stats: TexturePoolStats,
    free: HashMap<TextureKey, Vec<FreeEntry>>,
    clock: u64,
}

impl TexturePool {
    /// Create a pool with the given options.
    pub fn new(opts: TexturePoolOpts) -> Self {
        Self {
            opts,
            stats: TexturePoolStats::default(),
            free: HashMap::new(),
            clock: 0,
        }
    }

    /// Current counters.
    pub fn stats(&self) -> TexturePoolStats {
        self.stats
    }

    /// Check out a texture for `key`: exact free-list match when available, otherwise a
    /// lazy device allocation.
    pub fn checkout(
        &mut self,
        device: &mut dyn RenderDevice,
        key: TextureKey,
    ) -> WeftResult<PooledTexture> {
        if let Some(list) = self.free.get_mut(&key)
            && let Some(entry) = list.pop()
        {
            self.stats.reuses += 1;
            self.stats.retained_textures = self.stats.retained_textures.saturating_sub(1);
            self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(key.byte_len());
            return Ok(PooledTexture {
                texture: entry.texture,
                key,
            });
        }

        let texture = device.create_texture(key)?;
        self.stats.allocations += 1;
        Ok(PooledTexture { texture, key })
    }

    /// Return a texture to the free list (not freed), evicting oldest-unused textures
    /// while the retained set exceeds the soft budget.
    pub fn checkin(
        &mut self,
        device: &mut dyn RenderDevice,
        handle: PooledTexture,
    ) -> WeftResult<()> {
        let bytes = handle.key.byte_len();
        let list = self.free.entry(handle.key).or_default();
        if list.len() >= self.opts.max_free_per_key {
            device.destroy_texture(handle.texture)?;
            self.stats.evictions += 1;
            return Ok(());
        }

        self.clock += 1;
        list.push(FreeEntry {
            texture: handle.texture,
            age: self.clock,
        });
        self.stats.retained_textures += 1;
        self.stats.retained_bytes += bytes;

        while self.stats.retained_bytes > self.opts.soft_budget_bytes {
            if !self.evict_oldest(device)? {
                break;
            }
        }
        Ok(())
    }

    /// Destroy every retained texture (e.g. after device loss the caller rebuilds and
    /// the old handles are meaningless).
    pub fn drain(&mut self, device: &mut dyn RenderDevice) -> WeftResult<()> {
        for (key, list) in self.free.drain() {
            for entry in list {
                // Best effort: a lost device may reject destroys.
                let _ = device.destroy_texture(entry.texture);
                self.stats.evictions += 1;
                self.stats.retained_bytes =
                    self.stats.retained_bytes.saturating_sub(key.byte_len());
                self.stats.retained_textures = self.stats.retained_textures.saturating_sub(1);
            }
        }
        Ok(())
    }

    fn evict_oldest(&mut self, device: &mut dyn RenderDevice) -> WeftResult<bool> {
        let mut oldest: Option<(TextureKey, u64)> = None;
        for (key, list) in &self.free {
            for e in list {
                if oldest.is_none_or(|(_, age)| e.age < age) {
                    oldest = Some((*key, e.age));
                }
            }
        }
        let Some((key, age)) = oldest else {
            return Ok(false);
        };
        let Some(list) = self.free.get_mut(&key) else {
            return Ok(false);
        };
        let Some(idx) = list.iter().position(|e| e.age == age) else {
            return Ok(false);
        };
        let entry = list.remove(idx);
        device.destroy_texture(entry.texture)?;
        self.stats.evictions += 1;
        self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(key.byte_len());
        self.stats.retained_textures = self.stats.retained_textures.saturating_sub(1);
        Ok(true)
    }
}
