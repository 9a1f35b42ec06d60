use crate::{Error, Operation};

use super::{registry::_Origin, Graph};

// -----------------------------------------------------------------------------
// Node
// -----------------------------------------------------------------------------
/// Handle to a node declared on a [Graph].
///
/// The node itself is owned by the graph; handles only refer to it.
///
/// # Example
/// ```
/// use qautograd::Graph;
///
/// let graph = Graph::new();
/// let x = graph.variable(3.0, true);
/// let y = &(&x * &x) + &x;
/// graph.set_output(&y).unwrap();
///
/// assert_eq!(y.forward().unwrap(), 12.0);
/// graph.backward().unwrap();
/// assert_eq!(x.grad(), Some(7.0));
/// ```
#[derive(Debug)]
pub struct Node {
    graph: Graph,
    index: usize,
}

impl Clone for Node {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            index: self.index,
        }
    }
}

impl PartialEq for Node {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Graph::ptr_eq(&self.graph, &other.graph) && self.index == other.index
    }
}

impl Eq for Node {}

//
// ctor
//
impl Node {
    #[inline]
    pub(super) fn _new(graph: Graph, index: usize) -> Self {
        Self { graph, index }
    }
}

//
// methods
//
impl Node {
    /// Position of this node in declaration order.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Current value, `None` for derived nodes which are never forwarded.
    #[inline]
    pub fn value(&self) -> Option<f64> {
        self.graph.0.borrow()._slot(self.index).value
    }

    #[inline]
    pub fn grad(&self) -> Option<f64> {
        self.graph.0.borrow()._slot(self.index).grad
    }

    #[inline]
    pub fn requires_grad(&self) -> bool {
        self.graph.0.borrow()._slot(self.index).requires_grad
    }

    #[inline]
    pub fn op(&self) -> Operation {
        self.graph.0.borrow()._slot(self.index).origin.op()
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.op().is_leaf()
    }

    #[inline]
    pub fn is_output(&self) -> bool {
        self.graph.0.borrow()._slot(self.index).is_output
    }

    #[inline]
    pub fn is_forwarded(&self) -> bool {
        self.graph.0.borrow()._slot(self.index).forwarded
    }

    #[inline]
    pub fn is_backwarded(&self) -> bool {
        self.graph.0.borrow()._slot(self.index).backwarded
    }

    /// Operands `(lhs, rhs)`, `None` for leaves.
    pub fn operands(&self) -> Option<(Node, Node)> {
        match self.graph.0.borrow()._slot(self.index).origin {
            _Origin::Leaf => None,
            _Origin::Binary { lhs, rhs, .. } => Some((
                Node::_new(self.graph.clone(), lhs),
                Node::_new(self.graph.clone(), rhs),
            )),
        }
    }

    /// Nodes using this node as an operand, once per use.
    pub fn consumers(&self) -> Vec<Node> {
        self.graph
            .0
            .borrow()
            ._slot(self.index)
            .consumers
            .iter()
            .map(|idx| Node::_new(self.graph.clone(), *idx))
            .collect()
    }

    /// Overwrite the value.
    ///
    /// Meant for leaves, e.g. to feed the next sample.
    /// Derived nodes are overwritten again by the next forward pass after a reset.
    #[inline]
    pub fn set_value(&self, value: f64) {
        self.graph.0.borrow_mut()._slot_mut(self.index).value = Some(value);
    }

    #[inline]
    pub fn forward(&self) -> Result<f64, Error> {
        self.graph.forward(self)
    }

    #[inline]
    pub fn binary(&self, op: Operation, rhs: &Node) -> Result<Node, Error> {
        self.graph.binary(op, self, rhs)
    }
}

// impls
impl Node {
    #[inline]
    pub(super) fn _index(&self) -> usize {
        self.index
    }
}

//
// arithmetic operations
//
macro_rules! _define_arithmetic_binary {
    ($tr:ident, $fn:ident, $op:ident) => {
        impl std::ops::$tr<&Node> for &Node {
            type Output = Node;

            #[inline]
            fn $fn(self, rhs: &Node) -> Self::Output {
                if !Graph::ptr_eq(&self.graph, &rhs.graph) {
                    panic!(
                        "Cannot {} nodes from different graphs: lhs.graph={:?}, rhs.graph={:?}",
                        stringify!($tr),
                        self.graph._debug_ptr(),
                        rhs.graph._debug_ptr()
                    );
                }
                let index = self
                    .graph
                    .0
                    .borrow_mut()
                    ._reg_binary(Operation::$op, self.index, rhs.index);
                Node::_new(self.graph.clone(), index)
            }
        }
        impl std::ops::$tr<Node> for &Node {
            type Output = Node;

            #[inline]
            fn $fn(self, rhs: Node) -> Self::Output {
                std::ops::$tr::$fn(self, &rhs)
            }
        }
        impl std::ops::$tr<&Node> for Node {
            type Output = Node;

            #[inline]
            fn $fn(self, rhs: &Node) -> Self::Output {
                std::ops::$tr::$fn(&self, rhs)
            }
        }
        impl std::ops::$tr<Node> for Node {
            type Output = Node;

            #[inline]
            fn $fn(self, rhs: Node) -> Self::Output {
                std::ops::$tr::$fn(&self, &rhs)
            }
        }
    };
}

_define_arithmetic_binary!(Add, add, Add);
_define_arithmetic_binary!(Sub, sub, Sub);
_define_arithmetic_binary!(Mul, mul, Mul);
// the divisor is checked when the quotient is forwarded
_define_arithmetic_binary!(Div, div, Div);
