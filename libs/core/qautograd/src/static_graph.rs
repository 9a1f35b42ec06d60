mod graph;
mod node;
mod registry;

pub use graph::Graph;
pub use node::Node;
