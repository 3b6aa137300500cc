//! Render session: one place that owns the device, the pool, the registry, and the
//! manifest set, and drives compile-then-execute per frame.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::compile::compiler::compile_frame;
use crate::exec::device::RenderDevice;
use crate::exec::engine::{RenderedFrame, execute};
use crate::exec::prefetch::Prefetcher;
use crate::exec::source::SourceResolver;
use crate::foundation::error::{WeftError, WeftResult};
use crate::foundation::time::{Fps, FrameIndex};
use crate::kernel::KernelRegistry;
use crate::manifest::ManifestSet;
use crate::pool::{TexturePool, TexturePoolOpts, TexturePoolStats};
use crate::timeline::{SourceKind, Timeline};

/// Session configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionOpts {
    /// Texture pool limits.
    pub pool: TexturePoolOpts,
    /// Frames of decode look-ahead during sequential rendering. 0 disables prefetch.
    pub look_ahead: usize,
}

/// Counters accumulated across a session's lifetime.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderStats {
    /// Frames delivered.
    pub frames: u64,
    /// Warnings raised across all frames.
    pub warnings: u64,
    /// Pool counters at the time of the query.
    pub pool: TexturePoolStats,
    /// Distinct pipelines compiled so far.
    pub pipelines_compiled: usize,
}

/// Owns the mutable rendering state and serializes access to it.
pub struct RenderSession {
    device: Mutex<Box<dyn RenderDevice>>,
    pool: Mutex<TexturePool>,
    registry: Mutex<KernelRegistry>,
    manifests: ManifestSet,
    resolver: Arc<dyn SourceResolver>,
    opts: SessionOpts,
    frames: Mutex<u64>,
    warnings: Mutex<u64>,
}

fn lock<T>(m: &Mutex<T>) -> WeftResult<MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| WeftError::execution("render session lock poisoned"))
}

impl RenderSession {
    /// Create a session over `device` and `resolver` with the stock kernel table and
    /// built-in features.
    pub fn new(
        device: Box<dyn RenderDevice>,
        resolver: Arc<dyn SourceResolver>,
        opts: SessionOpts,
    ) -> Self {
        Self {
            device: Mutex::new(device),
            pool: Mutex::new(TexturePool::new(opts.pool)),
            registry: Mutex::new(KernelRegistry::with_builtin_kernels()),
            manifests: ManifestSet::with_builtin_features(),
            resolver,
            opts,
            frames: Mutex::new(0),
            warnings: Mutex::new(0),
        }
    }

    /// Merge user manifests over the built-ins.
    pub fn merge_manifests(&mut self, json: &str) -> WeftResult<()> {
        self.manifests.merge_json(json)
    }

    /// Compile and execute one frame of `timeline` at `t` seconds.
    pub fn render_frame(&self, timeline: &Timeline, t: f64) -> WeftResult<RenderedFrame> {
        self.render_frame_with(timeline, t, self.resolver.as_ref())
    }

    fn render_frame_with(
        &self,
        timeline: &Timeline,
        t: f64,
        resolver: &dyn SourceResolver,
    ) -> WeftResult<RenderedFrame> {
        let registry_guard = lock(&self.registry)?;
        let program = compile_frame(timeline, t, &self.manifests, &registry_guard)?;
        drop(registry_guard);

        let rendered = {
            let mut device = lock(&self.device)?;
            let mut pool = lock(&self.pool)?;
            let mut registry = lock(&self.registry)?;
            execute(
                &program,
                device.as_mut(),
                &mut pool,
                &mut registry,
                resolver,
            )?
        };
        // Counter locks are only taken after the execute guards drop; combined with
        // stats() holding at most one lock at a time, no two threads can ever wait on
        // each other's guards.
        *lock(&self.frames)? += 1;
        *lock(&self.warnings)? += rendered.metadata.warnings.len() as u64;
        Ok(rendered)
    }

    /// Render frames `[first, last)` of `timeline` at `fps`, invoking `on_frame` for
    /// each. With look-ahead enabled, the next frame's sources decode while the current
    /// frame renders.
    pub fn render_range(
        &self,
        timeline: &Timeline,
        fps: Fps,
        frames: std::ops::Range<u64>,
        mut on_frame: impl FnMut(FrameIndex, RenderedFrame) -> WeftResult<()>,
    ) -> WeftResult<()> {
        let prefetcher = if self.opts.look_ahead > 0 {
            Some(Prefetcher::new(
                Arc::clone(&self.resolver),
                self.opts.look_ahead,
            ))
        } else {
            None
        };

        for f in frames.clone() {
            let idx = FrameIndex(f);
            let t = fps.frame_to_secs(idx);

            if let Some(pre) = &prefetcher {
                let next = f + 1;
                if frames.contains(&next) {
                    request_sources(pre, timeline, fps.frame_to_secs(FrameIndex(next)));
                }
            }

            let rendered = match &prefetcher {
                Some(pre) => self.render_frame_with(timeline, t, pre)?,
                None => self.render_frame(timeline, t)?,
            };
            on_frame(idx, rendered)?;
        }
        Ok(())
    }

    /// Snapshot the session counters.
    ///
    /// Each counter is copied out under its own short-lived guard, one statement at a
    /// time; holding several guards across the struct literal would wait on a
    /// concurrent `render_frame` while it waits on us.
    pub fn stats(&self) -> WeftResult<RenderStats> {
        let frames = *lock(&self.frames)?;
        let warnings = *lock(&self.warnings)?;
        let pool = lock(&self.pool)?.stats();
        let pipelines_compiled = lock(&self.registry)?.compiled_pipelines();
        Ok(RenderStats {
            frames,
            warnings,
            pool,
            pipelines_compiled,
        })
    }
}

/// Queue every non-procedural source active at `t` on the prefetcher.
fn request_sources(pre: &Prefetcher, timeline: &Timeline, t: f64) {
    for track in &timeline.tracks {
        for clip in track.active_at(t) {
            if clip.source != SourceKind::Procedural {
                pre.request(&clip.asset, t - clip.range.start_s);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::cpu::CpuDevice;
    use crate::exec::source::SolidResolver;
    use crate::foundation::color::ColorEncoding;
    use crate::foundation::time::TimeRange;
    use crate::timeline::{AssetRef, Canvas, Clip, Track};

    fn timeline() -> Timeline {
        Timeline {
            canvas: Canvas {
                width: 8,
                height: 8,
            },
            output_encoding: ColorEncoding::Srgb,
            tracks: vec![Track {
                name: "v1".into(),
                clips: vec![Clip {
                    id: "a".into(),
                    asset: AssetRef("asset://a".into()),
                    source: crate::timeline::SourceKind::Video,
                    encoding: ColorEncoding::Srgb,
                    range: TimeRange::new(0.0, 10.0).unwrap(),
                    opacity: 1.0,
                    effects: Vec::new(),
                    transition_out: None,
                }],
            }],
        }
    }

    fn session(look_ahead: usize) -> RenderSession {
        let mut resolver = SolidResolver::new(8, 8);
        resolver.insert(
            AssetRef("asset://a".into()),
            [0.25, 0.5, 0.75, 1.0],
            ColorEncoding::Srgb,
        );
        RenderSession::new(
            Box::new(CpuDevice::new(8, 8)),
            Arc::new(resolver),
            SessionOpts {
                pool: TexturePoolOpts::default(),
                look_ahead,
            },
        )
    }

    #[test]
    fn render_frame_is_reproducible() {
        let s = session(0);
        let tl = timeline();
        let a = s.render_frame(&tl, 1.0).unwrap();
        let b = s.render_frame(&tl, 1.0).unwrap();
        assert_eq!(
            crate::foundation::hash::hash_pixels(&a.frame.pixels),
            crate::foundation::hash::hash_pixels(&b.frame.pixels)
        );
    }

    #[test]
    fn render_range_walks_frames_in_order() {
        let s = session(2);
        let tl = timeline();
        let fps = Fps::new(24, 1).unwrap();
        let mut seen = Vec::new();
        s.render_range(&tl, fps, 0..5, |idx, _| {
            seen.push(idx.0);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        let stats = s.stats().unwrap();
        assert_eq!(stats.frames, 5);
        assert!(stats.pipelines_compiled > 0);
    }

    #[test]
    fn concurrent_stats_and_render_do_not_deadlock() {
        use std::time::Duration;

        let s = Arc::new(session(0));
        let tl = Arc::new(timeline());
        let (tx, rx) = crossbeam_channel::bounded(2);

        let render = {
            let (s, tl, tx) = (Arc::clone(&s), Arc::clone(&tl), tx.clone());
            std::thread::spawn(move || {
                for i in 0..50 {
                    s.render_frame(&tl, f64::from(i) * 0.01).unwrap();
                }
                tx.send(()).unwrap();
            })
        };
        let stats = std::thread::spawn(move || {
            for _ in 0..500 {
                s.stats().unwrap();
            }
            tx.send(()).unwrap();
        });

        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(30))
                .expect("render_frame and stats() stopped making progress");
        }
        render.join().unwrap();
        stats.join().unwrap();
    }

    #[test]
    fn stats_track_pool_reuse_across_frames() {
        let s = session(0);
        let tl = timeline();
        s.render_frame(&tl, 0.0).unwrap();
        let allocations = s.stats().unwrap().pool.allocations;
        s.render_frame(&tl, 0.5).unwrap();
        assert_eq!(s.stats().unwrap().pool.allocations, allocations);
        assert!(s.stats().unwrap().pool.reuses > 0);
    }
}
