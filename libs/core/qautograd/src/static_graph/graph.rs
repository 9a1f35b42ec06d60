use std::{cell::RefCell, rc::Rc};

use crate::{Error, Operation};

use super::{registry::_Registry, Node};

// -----------------------------------------------------------------------------
// Graph
// -----------------------------------------------------------------------------
/// Persistent computation graph.
///
/// Nodes are declared once and evaluated by repeated forward and backward passes.
/// This is a cheap handle; clones share the same registry,
/// which is dropped together with the last handle.
#[derive(Debug)]
pub struct Graph(pub(super) Rc<RefCell<_Registry>>);

impl Clone for Graph {
    #[inline]
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

//
// ctor
//
impl Default for Graph {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    #[inline]
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(_Registry::default())))
    }
}

//
// methods
//
impl Graph {
    /// Declare a leaf node.
    ///
    /// Leaves with `requires_grad = false` are frozen inputs.
    #[inline]
    pub fn variable(&self, value: f64, requires_grad: bool) -> Node {
        let index = self.0.borrow_mut()._reg_leaf(value, requires_grad);
        Node::_new(self.clone(), index)
    }

    /// Declare a node combining two nodes of this graph.
    ///
    /// The value is computed by the next forward pass.
    pub fn binary(&self, op: Operation, lhs: &Node, rhs: &Node) -> Result<Node, Error> {
        if op.is_leaf() {
            return Err(Error::UnsupportedOperation(op.to_string()));
        }
        if !Graph::ptr_eq(self, lhs.graph()) || !Graph::ptr_eq(self, rhs.graph()) {
            return Err(Error::DifferentGraphs(op.into()));
        }
        let index = self
            .0
            .borrow_mut()
            ._reg_binary(op, lhs._index(), rhs._index());
        Ok(Node::_new(self.clone(), index))
    }

    /// Designate the node seeded by [Graph::backward].
    ///
    /// A node previously designated loses its designation.
    pub fn set_output(&self, node: &Node) -> Result<(), Error> {
        if !Graph::ptr_eq(self, node.graph()) {
            return Err(Error::DifferentGraphs("set_output"));
        }
        self.0.borrow_mut()._set_output(node._index());
        Ok(())
    }

    #[inline]
    pub fn output(&self) -> Option<Node> {
        let index = self.0.borrow()._output()?;
        Some(Node::_new(self.clone(), index))
    }

    /// Compute `target` and every node it depends on.
    ///
    /// Nodes computed already since the last [Graph::zero_grad] are reused as they are.
    pub fn forward(&self, target: &Node) -> Result<f64, Error> {
        if !Graph::ptr_eq(self, target.graph()) {
            return Err(Error::DifferentGraphs("forward"));
        }
        self.0.borrow_mut()._forward(target._index())
    }

    /// Accumulate gradients of the output into every node.
    pub fn backward(&self) -> Result<(), Error> {
        let mut internal = self.0.borrow_mut();
        log::debug!("backward over {} nodes", internal._len());
        internal._backward()
    }

    /// Clear gradients and forward/backward states of every node.
    #[inline]
    pub fn zero_grad(&self) {
        self.0.borrow_mut()._zero_grad();
    }

    /// All nodes in declaration order.
    pub fn nodes(&self) -> Vec<Node> {
        let len = self.len();
        (0..len).map(|idx| Node::_new(self.clone(), idx)).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.borrow()._len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that two graphs are the same instance.
    ///
    /// Note that this comparison is not based on the contents of the graphs.
    #[inline]
    pub fn ptr_eq(lhs: &Self, rhs: &Self) -> bool {
        Rc::ptr_eq(&lhs.0, &rhs.0)
    }
}

// impls
impl Graph {
    /// Gradient descent step over every trainable leaf.
    #[inline]
    pub(crate) fn _descend(&self, learning_rate: f64) -> Result<usize, Error> {
        self.0.borrow_mut()._descend(learning_rate)
    }

    #[inline]
    pub(super) fn _debug_ptr(&self) -> impl std::fmt::Debug {
        self.0.as_ptr()
    }
}
