//! Node records: ids, typed ports, and property values.

use std::collections::BTreeMap;

/// Stable identifier of a node inside one [`crate::graph::NodeGraph`] arena.
///
/// Ids are assigned in insertion order and double as the deterministic tie-break key for
/// every topological ordering.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Port direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDir {
    /// Consumes data from one incoming connection.
    Input,
    /// Produces data for any number of consumers.
    Output,
}

/// Semantic payload type carried by a port.
///
/// The core consumes only `Image` concretely; the other kinds exist so collaborator
/// subgraphs (masks, depth, audio) wire through the same model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    /// RGBA image data.
    Image,
    /// Single-channel mask.
    Mask,
    /// Depth buffer.
    Depth,
    /// Audio samples.
    Audio,
}

/// A named, typed connection point on a node. Names are unique per direction per node.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Port {
    /// Name, unique within the node's ports of this direction.
    pub name: String,
    /// Payload type.
    pub kind: PortKind,
    /// Direction.
    pub dir: PortDir,
}

/// A typed property value on a node (also used as kernel dispatch parameters).
///
/// Untagged so manifest JSON reads naturally (`"radius_px": 4.0`). A bare string always
/// deserializes as `Str`; `Reference` is only constructed programmatically.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    /// String value.
    Str(String),
    /// Floating-point value.
    F64(f64),
    /// Boolean value.
    Bool(bool),
    /// Straight RGBA color.
    Color([f32; 4]),
    /// Reference to an external entity by id.
    Reference(String),
}

impl PropValue {
    /// Numeric value, if this is an `F64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// String value, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Color value, if this is a `Color`.
    pub fn as_color(&self) -> Option<[f32; 4]> {
        match self {
            Self::Color(v) => Some(*v),
            _ => None,
        }
    }
}

/// Named parameter bundle attached to nodes and compiled instructions.
///
/// `BTreeMap` keeps iteration (and therefore serialization and `dump`) deterministic.
pub type Params = BTreeMap<String, PropValue>;

/// A processing node: type tag, properties, and ordered ports.
///
/// Nodes are immutable once placed in a compiled graph for a given frame; all graph
/// algorithms operate over id-indexed tables rather than object references.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Node {
    /// Namespaced type tag, e.g. `"source.video"`, `"kernel.pass"`, `"output"`.
    pub node_type: String,
    /// Named properties.
    pub props: Params,
    /// Input ports, in declaration order (the order instruction inputs bind in).
    pub inputs: Vec<Port>,
    /// Output ports, in declaration order.
    pub outputs: Vec<Port>,
}

impl Node {
    /// Create an empty node of the given type.
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            props: Params::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Append an image input port.
    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(Port {
            name: name.into(),
            kind: PortKind::Image,
            dir: PortDir::Input,
        });
        self
    }

    /// Append an image output port.
    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(Port {
            name: name.into(),
            kind: PortKind::Image,
            dir: PortDir::Output,
        });
        self
    }

    /// Set a property.
    pub fn with_prop(mut self, key: impl Into<String>, value: PropValue) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    /// Find an input port by name.
    pub fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Find an output port by name.
    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_orders_ports_by_declaration() {
        let n = Node::new("kernel.pass")
            .with_input("a")
            .with_input("b")
            .with_output("out");
        assert_eq!(n.inputs[0].name, "a");
        assert_eq!(n.inputs[1].name, "b");
        assert!(n.input("b").is_some());
        assert!(n.input("c").is_none());
        assert_eq!(n.outputs.len(), 1);
    }

    #[test]
    fn node_id_displays_compactly() {
        assert_eq!(NodeId(7).to_string(), "n7");
    }
}
