//! The compiled program: the sole contract between compiler and executor.
//!
//! Instructions are flat, serializable, and already fully resolved: concrete kernel
//! names, explicit input bindings, and the color encoding produced at every step. The
//! executor never consults the timeline or the graph.

use smallvec::SmallVec;

use crate::foundation::color::ColorEncoding;
use crate::foundation::error::{WeftError, WeftResult};
use crate::graph::{NodeId, Params};
use crate::timeline::{AssetRef, SourceKind};

/// One named input of a processing instruction, bound to a producing node.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputBinding {
    /// The consuming port name.
    pub name: String,
    /// The node whose output feeds it.
    pub node: NodeId,
}

/// One step of a compiled program.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CompiledInstruction {
    /// Materialize a source frame.
    LoadSource {
        /// Producing node id.
        node: NodeId,
        /// Asset to resolve.
        asset: AssetRef,
        /// Media kind.
        kind: SourceKind,
        /// Media-local time to sample, seconds.
        time_s: f64,
        /// Encoding the source claims its pixels are in.
        declared_encoding: ColorEncoding,
    },
    /// Dispatch one kernel over its bound inputs.
    Process {
        /// Producing node id.
        node: NodeId,
        /// Concrete kernel name, resolved at compile time.
        kernel: String,
        /// Inputs in the node's declared port order.
        inputs: SmallVec<[InputBinding; 4]>,
        /// Dispatch parameters.
        params: Params,
        /// Encoding of the produced pixels.
        out_encoding: ColorEncoding,
        /// True for IDT/ODT boundary conversions, the only steps allowed to change
        /// encoding.
        boundary: bool,
    },
    /// Blend two streams under a resolved transition progress.
    CompositeTransition {
        /// Producing node id.
        node: NodeId,
        /// Concrete transition kernel.
        kernel: String,
        /// Outgoing stream.
        a: NodeId,
        /// Incoming stream.
        b: NodeId,
        /// Eased progress in `[0, 1]`, resolved at compile time.
        progress: f64,
        /// Extra kernel parameters (dip color, wipe direction).
        params: Params,
    },
    /// Read the final image back for delivery.
    Present {
        /// The terminal node id.
        node: NodeId,
        /// The node producing the delivered image.
        input: NodeId,
    },
}

impl CompiledInstruction {
    /// The node this instruction produces (the terminal node for `Present`).
    pub fn node(&self) -> NodeId {
        match self {
            Self::LoadSource { node, .. }
            | Self::Process { node, .. }
            | Self::CompositeTransition { node, .. }
            | Self::Present { node, .. } => *node,
        }
    }

    /// Node ids this instruction reads.
    pub fn reads(&self) -> SmallVec<[NodeId; 4]> {
        match self {
            Self::LoadSource { .. } => SmallVec::new(),
            Self::Process { inputs, .. } => inputs.iter().map(|b| b.node).collect(),
            Self::CompositeTransition { a, b, .. } => SmallVec::from_slice(&[*a, *b]),
            Self::Present { input, .. } => SmallVec::from_slice(&[*input]),
        }
    }

    /// Encoding of the pixels this instruction produces, if it produces any.
    pub fn out_encoding(&self) -> Option<ColorEncoding> {
        match self {
            Self::LoadSource {
                declared_encoding, ..
            } => Some(*declared_encoding),
            Self::Process { out_encoding, .. } => Some(*out_encoding),
            Self::CompositeTransition { .. } => Some(ColorEncoding::WORKING),
            Self::Present { .. } => None,
        }
    }
}

/// A fully compiled frame program.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CompiledProgram {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Encoding of the delivered frame.
    pub output_encoding: ColorEncoding,
    /// Instructions in execution order.
    pub instructions: Vec<CompiledInstruction>,
    /// Human-readable compile notes (e.g. overlap fallbacks). Never affect pixels.
    pub notes: Vec<String>,
}

impl CompiledProgram {
    /// Stable textual form of the program. Identical inputs compile to byte-identical
    /// dumps, which is the determinism contract tests pin down.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "program {}x{} -> {:?}\n",
            self.width, self.height, self.output_encoding
        ));
        for (i, inst) in self.instructions.iter().enumerate() {
            // Params are BTreeMap-backed, so serialization order is stable.
            let line = serde_json::to_string(inst).unwrap_or_default();
            out.push_str(&format!("{i:04} {line}\n"));
        }
        for note in &self.notes {
            out.push_str(&format!("note: {note}\n"));
        }
        out
    }

    /// Verify the golden thread: every non-boundary instruction consumes and produces
    /// working-space pixels, and encoding only changes at instructions marked as
    /// boundaries.
    pub fn verify_working_space(&self) -> WeftResult<()> {
        use std::collections::HashMap;
        let mut produced: HashMap<NodeId, ColorEncoding> = HashMap::new();

        for inst in &self.instructions {
            let boundary = matches!(inst, CompiledInstruction::Process { boundary: true, .. });
            if !boundary {
                for read in inst.reads() {
                    let enc = produced.get(&read).copied().ok_or_else(|| {
                        WeftError::validation(format!(
                            "instruction for {} reads {} before it is produced",
                            inst.node(),
                            read
                        ))
                    })?;
                    // The final Present may read ODT output in the delivery encoding.
                    let deliverable = matches!(inst, CompiledInstruction::Present { .. })
                        && enc == self.output_encoding;
                    if !enc.is_working() && !deliverable {
                        return Err(WeftError::validation(format!(
                            "node {} consumes {:?} pixels outside a boundary conversion",
                            inst.node(),
                            enc
                        )));
                    }
                }
            } else {
                for read in inst.reads() {
                    if !produced.contains_key(&read) {
                        return Err(WeftError::validation(format!(
                            "boundary at {} reads {} before it is produced",
                            inst.node(),
                            read
                        )));
                    }
                }
            }
            if let Some(enc) = inst.out_encoding() {
                produced.insert(inst.node(), enc);
            }
        }
        Ok(())
    }
}
