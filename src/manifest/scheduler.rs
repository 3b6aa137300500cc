//! Pass scheduling: expand a feature manifest into graph nodes.
//!
//! Pass order is derived purely from the named-intermediate dataflow, so declaration
//! order in the manifest never changes the result — except as the tie-break between
//! passes that become ready simultaneously, which keeps expansion deterministic.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use crate::foundation::error::{WeftError, WeftResult};
use crate::graph::{Node, NodeGraph, NodeId, Params, PropValue};
use crate::manifest::{FeatureManifest, ManifestBody};

/// Result of expanding one feature call into the graph.
#[derive(Clone, Debug)]
pub struct ExpandedFeature {
    /// For each external input name, the (node, input port) pairs that consume it.
    pub bindings: BTreeMap<String, Vec<(NodeId, String)>>,
    /// The (node, output port) producing the feature's final image.
    pub output: (NodeId, String),
}

/// Expand `manifest` into nodes in `graph`, merging `call_params` over the manifest's
/// defaults. Pass-level params override both.
pub fn expand_feature(
    graph: &mut NodeGraph,
    manifest: &FeatureManifest,
    call_params: &Params,
) -> WeftResult<ExpandedFeature> {
    manifest.validate()?;

    let mut merged = manifest.params.clone();
    for (k, v) in call_params {
        merged.insert(k.clone(), v.clone());
    }

    match &manifest.body {
        ManifestBody::Kernel { kernel } => {
            expand_single_kernel(graph, manifest, kernel, &merged)
        }
        ManifestBody::Passes { passes } => expand_passes(graph, manifest, passes, &merged),
    }
}

fn expand_single_kernel(
    graph: &mut NodeGraph,
    manifest: &FeatureManifest,
    kernel: &str,
    merged: &Params,
) -> WeftResult<ExpandedFeature> {
    let mut node = Node::new(format!("{}.main", manifest.feature))
        .with_output("out")
        .with_prop("kernel", PropValue::Str(kernel.to_owned()))
        .with_prop("feature", PropValue::Str(manifest.feature.clone()));
    for name in &manifest.external_inputs {
        node = node.with_input(name.clone());
    }
    for (k, v) in merged {
        node = node.with_prop(k.clone(), v.clone());
    }
    let id = graph.add_node(node);

    let mut bindings = BTreeMap::new();
    for name in &manifest.external_inputs {
        bindings.insert(name.clone(), vec![(id, name.clone())]);
    }
    Ok(ExpandedFeature {
        bindings,
        output: (id, "out".to_owned()),
    })
}

fn expand_passes(
    graph: &mut NodeGraph,
    manifest: &FeatureManifest,
    passes: &[crate::manifest::PassDecl],
    merged: &Params,
) -> WeftResult<ExpandedFeature> {
    // Which pass (by declaration index) produces each intermediate.
    let mut producer: HashMap<&str, usize> = HashMap::new();
    for (i, pass) in passes.iter().enumerate() {
        producer.insert(pass.output.as_str(), i);
    }

    // Kahn over the intermediate dataflow; the ready heap is keyed by declaration index.
    let mut indegree = vec![0usize; passes.len()];
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); passes.len()];
    for (i, pass) in passes.iter().enumerate() {
        for input in &pass.inputs {
            if manifest.external_inputs.iter().any(|e| e == input) {
                continue;
            }
            let Some(&from) = producer.get(input.as_str()) else {
                return Err(WeftError::UnresolvedIntermediate {
                    feature: manifest.feature.clone(),
                    pass: pass.name.clone(),
                    input: input.clone(),
                });
            };
            indegree[i] += 1;
            downstream[from].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..passes.len())
        .filter(|&i| indegree[i] == 0)
        .map(Reverse)
        .collect();

    let mut node_of: Vec<Option<NodeId>> = vec![None; passes.len()];
    let mut bindings: BTreeMap<String, Vec<(NodeId, String)>> = BTreeMap::new();
    let mut output = None;
    let mut scheduled = 0usize;

    while let Some(Reverse(i)) = ready.pop() {
        let pass = &passes[i];
        let mut node = Node::new(format!("{}.{}", manifest.feature, pass.name))
            .with_output("out")
            .with_prop("kernel", PropValue::Str(pass.kernel.clone()))
            .with_prop("feature", PropValue::Str(manifest.feature.clone()))
            .with_prop("pass", PropValue::Str(pass.name.clone()));
        for input in &pass.inputs {
            node = node.with_input(input.clone());
        }
        for (k, v) in merged {
            node = node.with_prop(k.clone(), v.clone());
        }
        for (k, v) in &pass.params {
            node = node.with_prop(k.clone(), v.clone());
        }
        let id = graph.add_node(node);
        node_of[i] = Some(id);

        for input in &pass.inputs {
            if manifest.external_inputs.iter().any(|e| e == input) {
                bindings
                    .entry(input.clone())
                    .or_default()
                    .push((id, input.clone()));
                continue;
            }
            // Producer index was resolved above and, in an acyclic schedule, already
            // instantiated.
            if let Some(&from) = producer.get(input.as_str())
                && let Some(from_id) = node_of[from]
            {
                graph.connect(from_id, "out", id, input)?;
            }
        }

        if pass.output == "output" {
            output = Some((id, "out".to_owned()));
        }
        scheduled += 1;
        for &next in &downstream[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if scheduled != passes.len() {
        let stuck: Vec<String> = passes
            .iter()
            .enumerate()
            .filter(|(i, _)| node_of[*i].is_none())
            .map(|(_, p)| p.name.clone())
            .collect();
        return Err(WeftError::CyclicPassDependency {
            feature: manifest.feature.clone(),
            passes: stuck,
        });
    }

    // validate() guarantees exactly one producer of "output".
    let output = output.ok_or_else(|| {
        WeftError::validation(format!("feature '{}' produced no output", manifest.feature))
    })?;
    Ok(ExpandedFeature { bindings, output })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestSet;

    fn manifest_from(json: &str) -> FeatureManifest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn blur_expands_to_two_wired_nodes() {
        let set = ManifestSet::with_builtin_features();
        let mut graph = NodeGraph::new();
        let expanded =
            expand_feature(&mut graph, set.get("blur").unwrap(), &Params::new()).unwrap();

        assert_eq!(graph.nodes().count(), 2);
        assert_eq!(graph.connections().len(), 1);
        let consumers = &expanded.bindings["source"];
        assert_eq!(consumers.len(), 1);
        assert_eq!(graph.node(expanded.output.0).node_type, "blur.vertical");
    }

    #[test]
    fn declaration_order_does_not_beat_dataflow_order() {
        // "vertical" declared first but consumes "tmp", so "horizontal" schedules first.
        let m = manifest_from(
            r#"{ "feature": "blur2", "passes": [
                { "name": "vertical", "kernel": "blur.vertical",
                  "inputs": ["tmp"], "output": "output" },
                { "name": "horizontal", "kernel": "blur.horizontal",
                  "inputs": ["source"], "output": "tmp" }
            ]}"#,
        );
        let mut graph = NodeGraph::new();
        let expanded = expand_feature(&mut graph, &m, &Params::new()).unwrap();
        let types: Vec<_> = graph.nodes().map(|(_, n)| n.node_type.as_str()).collect();
        assert_eq!(types, vec!["blur2.horizontal", "blur2.vertical"]);
        assert_eq!(graph.node(expanded.output.0).node_type, "blur2.vertical");
    }

    #[test]
    fn call_params_override_defaults_and_pass_params_override_both() {
        let m = manifest_from(
            r#"{ "feature": "f", "params": { "radius_px": 4.0, "mode": "a" }, "passes": [
                { "name": "only", "kernel": "blur.horizontal",
                  "inputs": ["source"], "output": "output",
                  "params": { "mode": "b" } }
            ]}"#,
        );
        let mut graph = NodeGraph::new();
        let mut call = Params::new();
        call.insert("radius_px".into(), PropValue::F64(9.0));
        let expanded = expand_feature(&mut graph, &m, &call).unwrap();
        let node = graph.node(expanded.output.0);
        assert_eq!(node.props["radius_px"].as_f64(), Some(9.0));
        assert_eq!(node.props["mode"].as_str(), Some("b"));
    }

    #[test]
    fn cyclic_passes_are_rejected() {
        let m = manifest_from(
            r#"{ "feature": "loopy", "passes": [
                { "name": "a", "kernel": "grade.invert", "inputs": ["b_out"], "output": "output" },
                { "name": "b", "kernel": "grade.invert", "inputs": ["output"], "output": "b_out" }
            ]}"#,
        );
        let mut graph = NodeGraph::new();
        let err = expand_feature(&mut graph, &m, &Params::new()).unwrap_err();
        assert!(matches!(err, WeftError::CyclicPassDependency { .. }));
    }

    #[test]
    fn unknown_intermediate_is_rejected() {
        let m = manifest_from(
            r#"{ "feature": "dangling", "passes": [
                { "name": "a", "kernel": "grade.invert", "inputs": ["missing"], "output": "output" }
            ]}"#,
        );
        let mut graph = NodeGraph::new();
        let err = expand_feature(&mut graph, &m, &Params::new()).unwrap_err();
        assert!(matches!(
            err,
            WeftError::UnresolvedIntermediate { input, .. } if input == "missing"
        ));
    }
}
