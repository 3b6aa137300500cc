//! The frame compiler: timeline at one timestamp in, [`CompiledProgram`] out.
//!
//! Construction is deterministic end to end. Nodes are created in a fixed traversal
//! order (tracks bottom-up, clips in declaration order, feature passes in dataflow
//! order), linearization uses the graph's insertion-order tie-break, and every
//! data-dependent value (transition progress, source sample time) is resolved here, so
//! identical inputs always produce a byte-identical instruction list.

use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;

use crate::compile::instruction::{CompiledInstruction, CompiledProgram, InputBinding};
use crate::foundation::color::ColorEncoding;
use crate::foundation::error::{WeftError, WeftResult};
use crate::graph::{Node, NodeGraph, NodeId, Params, PropValue};
use crate::kernel::KernelRegistry;
use crate::manifest::ManifestSet;
use crate::manifest::scheduler::expand_feature;
use crate::timeline::{AssetRef, Clip, SourceKind, Timeline, TransitionKind};

/// Per-node compile metadata that never belongs in persisted node props.
#[derive(Default)]
struct SideTables {
    sources: HashMap<NodeId, SourceMeta>,
    transitions: HashMap<NodeId, TransitionMeta>,
    boundaries: HashSet<NodeId>,
    /// Encoding produced by boundary conversions (IDT -> working, ODT -> delivery).
    boundary_out: HashMap<NodeId, ColorEncoding>,
}

struct SourceMeta {
    asset: AssetRef,
    kind: SourceKind,
    time_s: f64,
    declared_encoding: ColorEncoding,
}

struct TransitionMeta {
    logical_kernel: String,
    progress: f64,
    params: Params,
}

/// Compile one frame of `timeline` at evaluation time `t` (seconds).
#[tracing::instrument(skip(timeline, manifests, registry))]
pub fn compile_frame(
    timeline: &Timeline,
    t: f64,
    manifests: &ManifestSet,
    registry: &KernelRegistry,
) -> WeftResult<CompiledProgram> {
    timeline.validate()?;

    let mut graph = NodeGraph::new();
    let mut side = SideTables::default();
    let mut notes = Vec::new();

    // Tracks bottom-up; each yields one image stream, stacked with alpha-over.
    let mut stack: Option<NodeId> = None;
    for track in &timeline.tracks {
        let (top, opacity) = build_track(&mut graph, &mut side, track, t, manifests, &mut notes)?;
        stack = Some(match stack {
            None if (opacity - 1.0).abs() < f64::EPSILON => top,
            None => {
                let black = black_source(&mut graph, &mut side);
                over(&mut graph, black, top, opacity)?
            }
            Some(below) => over(&mut graph, below, top, opacity)?,
        });
    }
    let mut cur = match stack {
        Some(id) => id,
        None => black_source(&mut graph, &mut side),
    };

    // ODT: the only place delivery encoding is applied.
    if !timeline.output_encoding.is_working() {
        let logical = match timeline.output_encoding {
            ColorEncoding::Srgb => "color.working_to_srgb",
            ColorEncoding::Rec709 => "color.working_to_rec709",
            ColorEncoding::Linear => unreachable!("working space needs no ODT"),
        };
        let odt = graph.add_node(
            Node::new("color.odt")
                .with_input("in")
                .with_output("out")
                .with_prop("kernel", PropValue::Str(logical.to_owned())),
        );
        side.boundaries.insert(odt);
        side.boundary_out.insert(odt, timeline.output_encoding);
        graph.connect(cur, "out", odt, "in")?;
        cur = odt;
    }

    let present = graph.add_node(Node::new("output").with_input("in"));
    graph.connect(cur, "out", present, "in")?;

    let instructions = linearize(&graph, &side, registry)?;
    let program = CompiledProgram {
        width: timeline.canvas.width,
        height: timeline.canvas.height,
        output_encoding: timeline.output_encoding,
        instructions,
        notes,
    };
    program.verify_working_space()?;
    tracing::debug!(
        instructions = program.instructions.len(),
        nodes = graph.len(),
        "frame compiled"
    );
    Ok(program)
}

/// Build one track's stream at `t`. Returns the producing node and the opacity to
/// composite it with when stacking tracks.
fn build_track(
    graph: &mut NodeGraph,
    side: &mut SideTables,
    track: &crate::timeline::Track,
    t: f64,
    manifests: &ManifestSet,
    notes: &mut Vec<String>,
) -> WeftResult<(NodeId, f64)> {
    let active = track.active_at(t);
    match active.len() {
        0 => Ok((black_source(graph, side), 1.0)),
        1 => {
            let id = build_clip_chain(graph, side, active[0], t, manifests)?;
            Ok((id, active[0].opacity))
        }
        2 => {
            let (a, b) = (active[0], active[1]);
            if let Some(tr) = &a.transition_out {
                // The declared transition governs the full overlap: progress
                // clamps to 0 before the window opens and 1 after it closes.
                if let TransitionKind::Cut = tr.kind {
                    // A cut never blends: pick one side at the window midpoint.
                    let chosen = if t < tr.window.midpoint_s() { a } else { b };
                    let id = build_clip_chain(graph, side, chosen, t, manifests)?;
                    return Ok((id, chosen.opacity));
                }
                let id = build_transition(graph, side, a, b, tr, t, manifests)?;
                return Ok((id, 1.0));
            }
            let id = over_fallback(graph, side, &active, t, manifests, notes, &track.name, false)?;
            Ok((id, 1.0))
        }
        _ => {
            let id = over_fallback(graph, side, &active, t, manifests, notes, &track.name, true)?;
            Ok((id, 1.0))
        }
    }
}

/// Source -> IDT -> effect chain for one clip. Returns the chain's terminal node.
fn build_clip_chain(
    graph: &mut NodeGraph,
    side: &mut SideTables,
    clip: &Clip,
    t: f64,
    manifests: &ManifestSet,
) -> WeftResult<NodeId> {
    let node_type = match clip.source {
        SourceKind::Video => "source.video",
        SourceKind::Image => "source.image",
        SourceKind::Procedural => "source.procedural",
    };
    let src = graph.add_node(Node::new(node_type).with_output("out"));
    side.sources.insert(
        src,
        SourceMeta {
            asset: clip.asset.clone(),
            kind: clip.source,
            time_s: t - clip.range.start_s,
            declared_encoding: clip.encoding,
        },
    );

    let mut cur = src;
    if !clip.encoding.is_working() {
        let logical = match clip.encoding {
            ColorEncoding::Srgb => "color.srgb_to_working",
            ColorEncoding::Rec709 => "color.rec709_to_working",
            ColorEncoding::Linear => unreachable!("working sources skip the IDT"),
        };
        let idt = graph.add_node(
            Node::new("color.idt")
                .with_input("in")
                .with_output("out")
                .with_prop("kernel", PropValue::Str(logical.to_owned())),
        );
        side.boundaries.insert(idt);
        side.boundary_out.insert(idt, ColorEncoding::WORKING);
        graph.connect(cur, "out", idt, "in")?;
        cur = idt;
    }

    for call in &clip.effects {
        let manifest = manifests.get(&call.feature).ok_or_else(|| {
            WeftError::validation(format!(
                "clip '{}' references unknown feature '{}'",
                clip.id, call.feature
            ))
        })?;
        let expanded = expand_feature(graph, manifest, &call.params)?;
        if let Some(consumers) = expanded.bindings.get("source") {
            for (node, port) in consumers {
                graph.connect(cur, "out", *node, port)?;
            }
        }
        cur = expanded.output.0;
    }
    Ok(cur)
}

/// Resolve a transition between the chains of `a` and `b`.
fn build_transition(
    graph: &mut NodeGraph,
    side: &mut SideTables,
    a: &Clip,
    b: &Clip,
    tr: &crate::timeline::TransitionDescriptor,
    t: f64,
    manifests: &ManifestSet,
) -> WeftResult<NodeId> {
    let chain_a = build_clip_chain(graph, side, a, t, manifests)?;
    let chain_b = build_clip_chain(graph, side, b, t, manifests)?;

    let mut params = Params::new();
    let logical = match &tr.kind {
        TransitionKind::Cut => unreachable!("cuts are resolved before blending"),
        TransitionKind::Crossfade => "transition.crossfade",
        TransitionKind::DipToColor { color } => {
            params.insert("color".to_owned(), PropValue::Color(*color));
            "transition.dip_to_color"
        }
        TransitionKind::Wipe { dir } => {
            params.insert(
                "direction".to_owned(),
                PropValue::Str(dir.as_str().to_owned()),
            );
            "transition.wipe"
        }
    };

    let node = graph.add_node(
        Node::new("transition.composite")
            .with_input("a")
            .with_input("b")
            .with_output("out"),
    );
    graph.connect(chain_a, "out", node, "a")?;
    graph.connect(chain_b, "out", node, "b")?;
    side.transitions.insert(
        node,
        TransitionMeta {
            logical_kernel: logical.to_owned(),
            progress: tr.progress(t),
            params,
        },
    );
    Ok(node)
}

/// Alpha-over fold of the active clips in declaration order.
#[allow(clippy::too_many_arguments)]
fn over_fallback(
    graph: &mut NodeGraph,
    side: &mut SideTables,
    active: &[&Clip],
    t: f64,
    manifests: &ManifestSet,
    notes: &mut Vec<String>,
    track_name: &str,
    crowded: bool,
) -> WeftResult<NodeId> {
    if crowded {
        notes.push(format!(
            "track '{track_name}': {} clips overlap at t={t}; transitions disabled, \
             alpha-over in declaration order",
            active.len()
        ));
    }
    let mut cur = build_clip_chain(graph, side, active[0], t, manifests)?;
    for clip in &active[1..] {
        let top = build_clip_chain(graph, side, clip, t, manifests)?;
        cur = over(graph, cur, top, clip.opacity)?;
    }
    Ok(cur)
}

/// Insert one alpha-over node compositing `src` over `dst`.
fn over(graph: &mut NodeGraph, dst: NodeId, src: NodeId, opacity: f64) -> WeftResult<NodeId> {
    let node = graph.add_node(
        Node::new("composite.over")
            .with_input("dst")
            .with_input("src")
            .with_output("out")
            .with_prop("kernel", PropValue::Str("composite.over".to_owned()))
            .with_prop("opacity", PropValue::F64(opacity)),
    );
    graph.connect(dst, "out", node, "dst")?;
    graph.connect(src, "out", node, "src")?;
    Ok(node)
}

/// A generated opaque-black source in the working space.
fn black_source(graph: &mut NodeGraph, side: &mut SideTables) -> NodeId {
    let id = graph.add_node(Node::new("source.procedural").with_output("out"));
    side.sources.insert(
        id,
        SourceMeta {
            asset: AssetRef("procedural://black".to_owned()),
            kind: SourceKind::Procedural,
            time_s: 0.0,
            declared_encoding: ColorEncoding::WORKING,
        },
    );
    id
}

/// Flatten the graph into instructions in deterministic topological order.
fn linearize(
    graph: &NodeGraph,
    side: &SideTables,
    registry: &KernelRegistry,
) -> WeftResult<Vec<CompiledInstruction>> {
    let mut out = Vec::with_capacity(graph.len());
    for id in graph.topo_order() {
        let node = graph.node(id);

        if let Some(meta) = side.sources.get(&id) {
            out.push(CompiledInstruction::LoadSource {
                node: id,
                asset: meta.asset.clone(),
                kind: meta.kind,
                time_s: meta.time_s,
                declared_encoding: meta.declared_encoding,
            });
            continue;
        }

        if let Some(meta) = side.transitions.get(&id) {
            let a = bound_input(graph, id, "a")?;
            let b = bound_input(graph, id, "b")?;
            out.push(CompiledInstruction::CompositeTransition {
                node: id,
                kernel: registry.resolve(&meta.logical_kernel)?.to_owned(),
                a,
                b,
                progress: meta.progress,
                params: meta.params.clone(),
            });
            continue;
        }

        if node.node_type == "output" {
            let input = bound_input(graph, id, "in")?;
            out.push(CompiledInstruction::Present { node: id, input });
            continue;
        }

        let logical = node
            .props
            .get("kernel")
            .and_then(PropValue::as_str)
            .ok_or_else(|| {
                WeftError::validation(format!(
                    "node {} ({}) carries no kernel",
                    graph.label(id),
                    node.node_type
                ))
            })?;
        let mut inputs: SmallVec<[InputBinding; 4]> = SmallVec::new();
        for port in &node.inputs {
            inputs.push(InputBinding {
                name: port.name.clone(),
                node: bound_input(graph, id, &port.name)?,
            });
        }
        let mut params = node.props.clone();
        params.remove("kernel");
        let boundary = side.boundaries.contains(&id);
        let out_encoding = side
            .boundary_out
            .get(&id)
            .copied()
            .unwrap_or(ColorEncoding::WORKING);
        out.push(CompiledInstruction::Process {
            node: id,
            kernel: registry.resolve(logical)?.to_owned(),
            inputs,
            params,
            out_encoding,
            boundary,
        });
    }
    Ok(out)
}

fn bound_input(graph: &NodeGraph, to: NodeId, port: &str) -> WeftResult<NodeId> {
    graph
        .incoming(to, port)
        .map(|c| c.from)
        .ok_or_else(|| WeftError::DanglingPort {
            node: graph.label(to),
            dir: "input",
            port: port.to_owned(),
        })
}
