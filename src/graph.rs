//! Arena-style node graph: processing nodes with typed ports, validated acyclic
//! connections, and deterministic orderings.

pub mod model;
pub mod node;

pub use model::{Connection, NodeGraph};
pub use node::{Node, NodeId, Params, Port, PortDir, PortKind, PropValue};
