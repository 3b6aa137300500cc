//! End-to-end pipeline tests: compile a timeline, execute it on the reference device,
//! and pin down the determinism and color-management contracts.

use std::sync::Arc;

use weft::exec::source::{NullResolver, SolidResolver};
use weft::foundation::color::mean_luminance;
use weft::foundation::hash::{hash_bytes, hash_pixels};
use weft::{
    AssetRef, Canvas, Clip, ColorEncoding, CompiledInstruction, CpuDevice, Ease, EffectCall, Fps,
    KernelRegistry, ManifestSet, RenderSession, SessionOpts, SourceKind, TexturePool,
    TexturePoolOpts, TimeRange, Timeline, Track, TransitionDescriptor, TransitionKind, WipeDir,
    compile_frame, execute,
};

const W: u32 = 16;
const H: u32 = 16;

fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

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

fn timeline(tracks: Vec<Track>) -> Timeline {
    Timeline {
        canvas: Canvas {
            width: W,
            height: H,
        },
        output_encoding: ColorEncoding::Srgb,
        tracks,
    }
}

fn track(clips: Vec<Clip>) -> Track {
    Track {
        name: "v1".into(),
        clips,
    }
}

fn solids(entries: &[(&str, [f32; 4])]) -> SolidResolver {
    let mut r = SolidResolver::new(W, H);
    for (id, rgba) in entries {
        r.insert(
            AssetRef(format!("asset://{id}")),
            *rgba,
            ColorEncoding::Srgb,
        );
    }
    r
}

fn render(tl: &Timeline, t: f64, resolver: &SolidResolver) -> Vec<f32> {
    init_tracing();
    let manifests = ManifestSet::with_builtin_features();
    let mut registry = KernelRegistry::with_builtin_kernels();
    let program = compile_frame(tl, t, &manifests, &registry).unwrap();
    let mut device = CpuDevice::new(W, H);
    let mut pool = TexturePool::new(TexturePoolOpts::default());
    execute(&program, &mut device, &mut pool, &mut registry, resolver)
        .unwrap()
        .frame
        .pixels
}

#[test]
fn compile_and_render_twice_is_byte_and_pixel_identical() {
    let mut c = clip("a", 0.0, 4.0);
    c.effects.push(EffectCall {
        feature: "blur".into(),
        params: weft::graph::Params::new(),
    });
    let tl = timeline(vec![track(vec![c]), track(vec![clip("b", 0.0, 4.0)])]);
    let manifests = ManifestSet::with_builtin_features();
    let registry = KernelRegistry::with_builtin_kernels();

    let p1 = compile_frame(&tl, 1.5, &manifests, &registry).unwrap();
    let p2 = compile_frame(&tl, 1.5, &manifests, &registry).unwrap();
    assert_eq!(p1.dump(), p2.dump());
    assert_eq!(
        hash_bytes(p1.dump().as_bytes()),
        hash_bytes(p2.dump().as_bytes())
    );

    let resolver = solids(&[
        ("a", [0.8, 0.2, 0.1, 1.0]),
        ("b", [0.1, 0.9, 0.3, 0.5]),
    ]);
    let f1 = render(&tl, 1.5, &resolver);
    let f2 = render(&tl, 1.5, &resolver);
    assert_eq!(hash_pixels(&f1), hash_pixels(&f2));
}

#[test]
fn every_intermediate_step_stays_in_the_working_space() {
    let mut c = clip("a", 0.0, 4.0);
    c.effects.push(EffectCall {
        feature: "exposure".into(),
        params: weft::graph::Params::new(),
    });
    c.transition_out = Some(TransitionDescriptor {
        kind: TransitionKind::Crossfade,
        window: TimeRange::new(3.0, 1.0).unwrap(),
        ease: Ease::Linear,
    });
    let tl = timeline(vec![track(vec![c, clip("b", 3.0, 3.0)])]);
    let program = compile_frame(
        &tl,
        3.5,
        &ManifestSet::with_builtin_features(),
        &KernelRegistry::with_builtin_kernels(),
    )
    .unwrap();

    program.verify_working_space().unwrap();
    for inst in &program.instructions {
        if let CompiledInstruction::Process {
            out_encoding,
            boundary: false,
            ..
        } = inst
        {
            assert!(out_encoding.is_working());
        }
    }
}

#[test]
fn dip_to_black_midpoint_is_a_dark_frame() {
    let mut a = clip("a", 0.0, 3.0);
    a.transition_out = Some(TransitionDescriptor {
        kind: TransitionKind::DipToColor {
            color: [0.0, 0.0, 0.0, 1.0],
        },
        window: TimeRange::new(2.0, 1.0).unwrap(),
        ease: Ease::Linear,
    });
    let tl = timeline(vec![track(vec![a, clip("b", 2.0, 3.0)])]);
    let resolver = solids(&[("a", [1.0, 1.0, 1.0, 1.0]), ("b", [1.0, 0.8, 0.6, 1.0])]);

    let midpoint = render(&tl, 2.5, &resolver);
    assert!(mean_luminance(&midpoint) < 0.05);
    // Just outside the window both sides are bright again.
    assert!(mean_luminance(&render(&tl, 1.9, &resolver)) > 0.5);
    assert!(mean_luminance(&render(&tl, 3.1, &resolver)) > 0.5);
}

#[test]
fn wipe_at_half_progress_splits_the_frame() {
    let mut a = clip("a", 0.0, 3.0);
    a.transition_out = Some(TransitionDescriptor {
        kind: TransitionKind::Wipe {
            dir: WipeDir::LeftToRight,
        },
        window: TimeRange::new(2.0, 1.0).unwrap(),
        ease: Ease::Linear,
    });
    let tl = timeline(vec![track(vec![a, clip("b", 2.0, 3.0)])]);
    let resolver = solids(&[("a", [1.0, 1.0, 1.0, 1.0]), ("b", [0.0, 0.0, 0.0, 1.0])]);

    let px = render(&tl, 2.5, &resolver);
    let row = |x: u32| {
        let base = ((H / 2 * W + x) * 4) as usize;
        &px[base..base + 3]
    };
    // Left half is behind the front: the incoming black clip. Right half is still white.
    assert!(row(1).iter().all(|&v| v < 0.01));
    assert!(row(W - 2).iter().all(|&v| v > 0.99));
}

#[test]
fn crossfade_holds_the_outgoing_clip_until_its_window_opens() {
    // Clips overlap on [2, 3) but the crossfade window covers only [2.5, 2.9).
    let mut a = clip("a", 0.0, 3.0);
    a.transition_out = Some(TransitionDescriptor {
        kind: TransitionKind::Crossfade,
        window: TimeRange::new(2.5, 0.4).unwrap(),
        ease: Ease::Linear,
    });
    let tl = timeline(vec![track(vec![a, clip("b", 2.0, 3.0)])]);
    let resolver = solids(&[("a", [1.0, 1.0, 1.0, 1.0]), ("b", [0.0, 0.0, 0.0, 1.0])]);

    // Before the window the outgoing white clip still owns the frame, and after
    // it the incoming black clip does, even though both clips are active.
    assert!(mean_luminance(&render(&tl, 2.1, &resolver)) > 0.99);
    assert!(mean_luminance(&render(&tl, 2.95, &resolver)) < 0.01);
}

#[test]
fn cut_never_blends_frames() {
    let mut a = clip("a", 0.0, 3.0);
    a.transition_out = Some(TransitionDescriptor {
        kind: TransitionKind::Cut,
        window: TimeRange::new(2.0, 1.0).unwrap(),
        ease: Ease::Linear,
    });
    let tl = timeline(vec![track(vec![a, clip("b", 2.0, 3.0)])]);
    let resolver = solids(&[("a", [1.0, 1.0, 1.0, 1.0]), ("b", [0.0, 0.0, 0.0, 1.0])]);

    assert!(mean_luminance(&render(&tl, 2.4, &resolver)) > 0.9);
    assert!(mean_luminance(&render(&tl, 2.6, &resolver)) < 0.1);
}

#[test]
fn steady_state_playback_allocates_nothing_new() {
    let mut c = clip("a", 0.0, 10.0);
    c.effects.push(EffectCall {
        feature: "blur".into(),
        params: weft::graph::Params::new(),
    });
    let tl = timeline(vec![track(vec![c])]);

    let session = RenderSession::new(
        Box::new(CpuDevice::new(W, H)),
        Arc::new(NullResolver),
        SessionOpts::default(),
    );
    let fps = Fps::new(24, 1).unwrap();
    session
        .render_range(&tl, fps, 0..3, |_, _| Ok(()))
        .unwrap();
    let warm = session.stats().unwrap().pool.allocations;
    session
        .render_range(&tl, fps, 3..10, |_, _| Ok(()))
        .unwrap();
    let stats = session.stats().unwrap();
    assert_eq!(stats.pool.allocations, warm);
    assert!(stats.pool.reuses > 0);
}

#[test]
fn user_manifest_overrides_and_extends_builtins() {
    let manifests = {
        let mut m = ManifestSet::with_builtin_features();
        m.merge_json(
            r#"[{ "feature": "soften", "category": "filter",
                  "params": { "radius_px": 2.0 },
                  "passes": [
                      { "name": "h", "kernel": "blur.horizontal",
                        "inputs": ["source"], "output": "tmp" },
                      { "name": "v", "kernel": "blur.vertical",
                        "inputs": ["tmp"], "output": "output" }
                  ]}]"#,
        )
        .unwrap();
        m
    };
    let mut c = clip("a", 0.0, 4.0);
    c.effects.push(EffectCall {
        feature: "soften".into(),
        params: weft::graph::Params::new(),
    });
    let tl = timeline(vec![track(vec![c])]);
    let program = compile_frame(&tl, 1.0, &manifests, &KernelRegistry::with_builtin_kernels())
        .unwrap();
    let blur_passes = program
        .instructions
        .iter()
        .filter(|i| {
            matches!(i, CompiledInstruction::Process { kernel, .. }
                if kernel == "fx_blur_h" || kernel == "fx_blur_v")
        })
        .count();
    assert_eq!(blur_passes, 2);
}
