//! Scalar reverse-mode automatic differentiation.
//!
//! Two ways to build computation graphs are provided:
//!
//! * [Tape] and [Tensor]: dynamic expressions built by operators on every evaluation,
//!   differentiated once and freed when no longer referred.
//! * [Graph] and [Node]: persistent graphs declared once and evaluated repeatedly
//!   by forward/backward passes, e.g. in a training loop driven by [Sgd].
mod dynamic_graph;
mod error;
mod op;
mod optim;
mod static_graph;

pub use dynamic_graph::{Tape, Tensor};
pub use error::Error;
pub use op::{Operation, DIV_EPSILON};
pub use optim::{Sgd, SgdConfig};
pub use static_graph::{Graph, Node};

#[cfg(test)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    // graphs are shared by reference-counted handles without locking
    assert_not_impl_any!(Tape: Send, Sync);
    assert_not_impl_any!(Tensor: Send, Sync);
    assert_not_impl_any!(Graph: Send, Sync);
    assert_not_impl_any!(Node: Send, Sync);
    assert_not_impl_any!(Sgd: Send, Sync);

    assert_impl_all!(Error: std::error::Error, Clone, PartialEq, Send, Sync);
    assert_impl_all!(Operation: Copy, Eq, std::hash::Hash, std::str::FromStr);
    assert_impl_all!(SgdConfig: Copy, Default, serde::Serialize, serde::de::DeserializeOwned);
}
