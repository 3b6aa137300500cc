//! The graph arena: nodes, validated connections, and deterministic orderings.

use std::collections::HashMap;

use crate::foundation::error::{WeftError, WeftResult};
use crate::graph::node::{Node, NodeId, PortDir};

/// A directed edge `(from, from_port) -> (to, to_port)`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Connection {
    /// Producing node.
    pub from: NodeId,
    /// Output port on `from`.
    pub from_port: String,
    /// Consuming node.
    pub to: NodeId,
    /// Input port on `to`.
    pub to_port: String,
}

/// Arena-style processing graph, validated acyclic at edit time.
///
/// Nodes are stored in insertion order and referenced by [`NodeId`]; insertion order is
/// the deterministic tie-break everywhere a topological sort is otherwise ambiguous.
#[derive(Clone, Debug, Default)]
pub struct NodeGraph {
    nodes: Vec<Node>,
    connections: Vec<Connection>,
    /// Adjacency over node ids, for reachability and topo sort.
    outs: Vec<Vec<NodeId>>,
    /// Input-port occupancy: `(to.0, to_port) -> index into connections`.
    bound_inputs: HashMap<(u32, String), usize>,
}

impl NodeGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` when the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a node, returning its id. Ids are dense and insertion-ordered.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("node arena exceeds u32"));
        self.nodes.push(node);
        self.outs.push(Vec::new());
        id
    }

    /// Borrow a node by id.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    /// Iterate `(id, node)` in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    /// All connections, in insertion order.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Human-readable node label for error messages: `type#id`.
    pub fn label(&self, id: NodeId) -> String {
        format!("{}#{}", self.node(id).node_type, id.0)
    }

    /// Connect `(from, from_port)` to `(to, to_port)`.
    ///
    /// Fails with [`WeftError::DanglingPort`] when either port does not exist,
    /// [`WeftError::PortAlreadyBound`] when the destination input already has an incoming
    /// connection, and [`WeftError::CycleDetected`] when the edge would make the graph
    /// cyclic. Cycle checking is incremental reachability over existing edges only (can
    /// `from` be reached from `to`?), not a full re-traversal. A failed connect leaves
    /// the graph unmodified.
    pub fn connect(
        &mut self,
        from: NodeId,
        from_port: &str,
        to: NodeId,
        to_port: &str,
    ) -> WeftResult<()> {
        let from_node = self
            .nodes
            .get(from.0 as usize)
            .ok_or_else(|| WeftError::validation(format!("unknown node id {from}")))?;
        let to_node = self
            .nodes
            .get(to.0 as usize)
            .ok_or_else(|| WeftError::validation(format!("unknown node id {to}")))?;

        let out_port = from_node.output(from_port).ok_or_else(|| {
            WeftError::DanglingPort {
                node: self.label(from),
                dir: "output",
                port: from_port.to_owned(),
            }
        })?;
        let in_port = to_node.input(to_port).ok_or_else(|| WeftError::DanglingPort {
            node: self.label(to),
            dir: "input",
            port: to_port.to_owned(),
        })?;
        debug_assert_eq!(out_port.dir, PortDir::Output);
        debug_assert_eq!(in_port.dir, PortDir::Input);
        if out_port.kind != in_port.kind {
            return Err(WeftError::validation(format!(
                "port kind mismatch: {}:{from_port} is {:?}, {}:{to_port} is {:?}",
                self.label(from),
                out_port.kind,
                self.label(to),
                in_port.kind
            )));
        }

        let key = (to.0, to_port.to_owned());
        if self.bound_inputs.contains_key(&key) {
            return Err(WeftError::PortAlreadyBound {
                node: self.label(to),
                port: to_port.to_owned(),
            });
        }

        if from == to || self.reachable(to, from) {
            return Err(WeftError::CycleDetected {
                from: self.label(from),
                to: self.label(to),
            });
        }

        self.bound_inputs.insert(key, self.connections.len());
        self.connections.push(Connection {
            from,
            from_port: from_port.to_owned(),
            to,
            to_port: to_port.to_owned(),
        });
        self.outs[from.0 as usize].push(to);
        Ok(())
    }

    /// The connection feeding `(to, to_port)`, if bound.
    pub fn incoming(&self, to: NodeId, to_port: &str) -> Option<&Connection> {
        self.bound_inputs
            .get(&(to.0, to_port.to_owned()))
            .map(|&i| &self.connections[i])
    }

    /// Number of downstream consumers of each node (count of outgoing connections).
    pub fn consumer_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.nodes.len()];
        for c in &self.connections {
            counts[c.from.0 as usize] += 1;
        }
        counts
    }

    /// Deterministic topological order: Kahn's algorithm with a min-heap over [`NodeId`],
    /// so ties always break toward the earliest-inserted node.
    pub fn topo_order(&self) -> Vec<NodeId> {
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        let n = self.nodes.len();
        let mut indeg = vec![0u32; n];
        for c in &self.connections {
            indeg[c.to.0 as usize] += 1;
        }

        let mut ready = BinaryHeap::<Reverse<u32>>::new();
        for (i, &d) in indeg.iter().enumerate() {
            if d == 0 {
                ready.push(Reverse(i as u32));
            }
        }

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            order.push(NodeId(i));
            for &next in &self.outs[i as usize] {
                let d = &mut indeg[next.0 as usize];
                *d -= 1;
                if *d == 0 {
                    ready.push(Reverse(next.0));
                }
            }
        }

        // `connect` rejects cycles, so the order always covers the whole arena.
        debug_assert_eq!(order.len(), n);
        order
    }

    /// Is `target` reachable from `start` over existing edges?
    fn reachable(&self, start: NodeId, target: NodeId) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            let i = id.0 as usize;
            if visited[i] {
                continue;
            }
            visited[i] = true;
            stack.extend(self.outs[i].iter().copied());
        }
        false
    }
}
