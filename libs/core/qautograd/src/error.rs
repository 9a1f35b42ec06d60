// -----------------------------------------------------------------------------
// Error
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Division by zero: |{0:e}| is less than {:e}", crate::op::DIV_EPSILON)]
    DivisionByZero(f64),
    #[error("Operation '{0}' is not supported")]
    UnsupportedOperation(String),
    #[error("Gradient of node {0} is used before backward pass of the current cycle")]
    StaleGradient(usize),
    #[error("Different graphs are used for an operation '{0}'")]
    DifferentGraphs(&'static str),
    #[error("Output node is not designated")]
    MissingOutput,
    #[error("Node {0} is not forwarded yet")]
    NotForwarded(usize),
}
