use crate::{Error, Graph, Node};

// -----------------------------------------------------------------------------
// SgdConfig
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
pub struct SgdConfig {
    /// Step size multiplied to gradients.
    pub learning_rate: f64,
}

impl Default for SgdConfig {
    #[inline]
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
        }
    }
}

// -----------------------------------------------------------------------------
// Sgd
// -----------------------------------------------------------------------------
/// Plain gradient descent over a [Graph].
///
/// One training step consists of three phases which must be called in order:
/// [Sgd::reset], [Sgd::compute_gradients] and [Sgd::apply].
/// [Sgd::step] runs them all with the configured learning rate.
///
/// # Example
/// ```
/// use qautograd::{Graph, Sgd, SgdConfig};
///
/// let graph = Graph::new();
/// let w = graph.variable(0.0, true);
/// let y = graph.variable(3.0, false);
/// let d = &w - &y;
/// let loss = &d * &d;
///
/// let sgd = Sgd::new(&graph, &loss, SgdConfig { learning_rate: 0.1 }).unwrap();
/// for _ in 0..100 {
///     sgd.step().unwrap();
/// }
/// assert!((w.value().unwrap() - 3.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct Sgd {
    graph: Graph,
    output: Node,
    config: SgdConfig,
}

//
// ctor
//
impl Sgd {
    /// Bind to `graph` and designate `output` as its output node.
    pub fn new(graph: &Graph, output: &Node, config: SgdConfig) -> Result<Self, Error> {
        graph.set_output(output)?;
        Ok(Self {
            graph: graph.clone(),
            output: output.clone(),
            config,
        })
    }
}

//
// methods
//
impl Sgd {
    #[inline]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    #[inline]
    pub fn output(&self) -> &Node {
        &self.output
    }

    #[inline]
    pub fn config(&self) -> &SgdConfig {
        &self.config
    }

    /// Clear gradients and pass states of the whole graph.
    #[inline]
    pub fn reset(&self) {
        self.graph.zero_grad();
    }

    /// Forward the output and back-propagate from it. Returns the output value.
    ///
    /// The bound output is designated again,
    /// since [Graph::set_output] may have moved the designation since [Sgd::new].
    pub fn compute_gradients(&self) -> Result<f64, Error> {
        self.graph.set_output(&self.output)?;
        let value = self.graph.forward(&self.output)?;
        self.graph.backward()?;
        Ok(value)
    }

    /// Update every trainable leaf by `value -= learning_rate * grad`.
    ///
    /// Fails with [Error::StaleGradient] without touching any value
    /// when gradients are not computed since the last [Sgd::reset].
    pub fn apply(&self, learning_rate: f64) -> Result<(), Error> {
        let updated = self.graph._descend(learning_rate)?;
        log::debug!(
            "updated {} trainable leaves with learning rate {}",
            updated,
            learning_rate
        );
        Ok(())
    }

    /// Run a whole training step and return the output value before the update.
    pub fn step(&self) -> Result<f64, Error> {
        self.reset();
        let value = self.compute_gradients()?;
        self.apply(self.config.learning_rate)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    use super::*;

    /// loss = (w * x + b - y)^2
    fn _linear(w: f64, b: f64, x: f64, y: f64) -> (Graph, [Node; 5]) {
        let graph = Graph::new();
        let x = graph.variable(x, false);
        let y = graph.variable(y, false);
        let w = graph.variable(w, true);
        let b = graph.variable(b, true);
        let d = &(&(&w * &x) + &b) - &y;
        let loss = &d * &d;
        (graph, [w, b, x, y, loss])
    }

    #[test]
    fn test_new_marks_output() {
        let (graph, [.., loss]) = _linear(2.0, 1.0, 1.0, 2.0);

        let sgd = Sgd::new(&graph, &loss, SgdConfig::default()).unwrap();

        assert!(loss.is_output());
        assert_eq!(sgd.output(), &loss);
        assert_eq!(sgd.config().learning_rate, 0.01);
    }

    #[test]
    fn test_new_err_different_graphs() {
        let (_, [.., loss]) = _linear(2.0, 1.0, 1.0, 2.0);
        let other = Graph::new();

        let res = Sgd::new(&other, &loss, SgdConfig::default());

        assert_eq!(res.unwrap_err(), Error::DifferentGraphs("set_output"));
    }

    #[test]
    fn test_one_step() {
        let (graph, [w, b, x, y, loss]) = _linear(2.0, 1.0, 1.0, 2.0);
        let sgd = Sgd::new(&graph, &loss, SgdConfig::default()).unwrap();

        sgd.reset();
        let value = sgd.compute_gradients().unwrap();
        sgd.apply(0.01).unwrap();

        assert_eq!(value, 1.0);
        assert_eq!(w.grad(), Some(2.0));
        assert_eq!(b.grad(), Some(2.0));
        assert_abs_diff_eq!(w.value().unwrap(), 1.98, epsilon = 1e-12);
        assert_abs_diff_eq!(b.value().unwrap(), 0.98, epsilon = 1e-12);
        assert_eq!(x.value(), Some(1.0));
        assert_eq!(y.value(), Some(2.0));
    }

    #[test]
    fn test_compute_gradients_keeps_bound_output() {
        let graph = Graph::new();
        let w = graph.variable(2.0, true);
        let y = graph.variable(3.0, false);
        let d = &w - &y;
        let loss = &d * &d;
        let sgd = Sgd::new(&graph, &loss, SgdConfig::default()).unwrap();
        graph.set_output(&d).unwrap();

        sgd.reset();
        let value = sgd.compute_gradients().unwrap();

        assert_eq!(value, 1.0);
        assert!(loss.is_output());
        assert!(!d.is_output());
        assert_eq!(w.grad(), Some(-2.0));
    }

    #[test]
    fn test_apply_err_backward_without_forward() {
        let (graph, [w, b, .., loss]) = _linear(2.0, 1.0, 1.0, 2.0);
        let sgd = Sgd::new(&graph, &loss, SgdConfig::default()).unwrap();
        sgd.step().unwrap();
        let (w0, b0) = (w.value(), b.value());

        sgd.reset();
        assert!(matches!(graph.backward(), Err(Error::NotForwarded(_))));
        let res = sgd.apply(0.01);

        assert!(matches!(res, Err(Error::StaleGradient(_))));
        assert_eq!(w.value(), w0);
        assert_eq!(b.value(), b0);
    }

    #[test]
    fn test_apply_err_stale() {
        let (graph, [w, b, .., loss]) = _linear(2.0, 1.0, 1.0, 2.0);
        let sgd = Sgd::new(&graph, &loss, SgdConfig::default()).unwrap();
        sgd.step().unwrap();
        let (w0, b0) = (w.value(), b.value());

        sgd.reset();
        let res = sgd.apply(0.01);

        assert_eq!(res, Err(Error::StaleGradient(w.index())));
        assert_eq!(w.value(), w0);
        assert_eq!(b.value(), b0);
    }

    #[test]
    fn test_apply_err_before_any_pass() {
        let (graph, [.., loss]) = _linear(2.0, 1.0, 1.0, 2.0);
        let sgd = Sgd::new(&graph, &loss, SgdConfig::default()).unwrap();

        assert!(matches!(sgd.apply(0.01), Err(Error::StaleGradient(_))));
    }

    #[test]
    fn test_compute_gradients_err_division_by_zero() {
        let graph = Graph::new();
        let w = graph.variable(1.0, true);
        let z = graph.variable(0.0, false);
        let loss = &w / &z;
        let sgd = Sgd::new(&graph, &loss, SgdConfig::default()).unwrap();

        let res = sgd.step();

        assert_eq!(res, Err(Error::DivisionByZero(0.0)));
        assert_eq!(w.value(), Some(1.0));
    }

    #[test]
    fn test_unconnected_leaf_is_kept() {
        let (graph, [.., loss]) = _linear(2.0, 1.0, 1.0, 2.0);
        let unused = graph.variable(5.0, true);
        let sgd = Sgd::new(&graph, &loss, SgdConfig::default()).unwrap();

        sgd.step().unwrap();

        assert_eq!(unused.grad(), None);
        assert_eq!(unused.value(), Some(5.0));
    }

    #[rstest]
    #[case(0.01, 2000)]
    #[case(0.05, 500)]
    fn test_converges(#[case] learning_rate: f64, #[case] steps: usize) {
        let (graph, [w, b, .., loss]) = _linear(2.0, 3.0, 1.0, 2.0);
        let sgd = Sgd::new(&graph, &loss, SgdConfig { learning_rate }).unwrap();

        let mut last = f64::INFINITY;
        for _ in 0..steps {
            let value = sgd.step().unwrap();
            assert!(value <= last);
            last = value;
        }

        let fitted = w.value().unwrap() * 1.0 + b.value().unwrap();
        assert_abs_diff_eq!(fitted, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_config_serde() {
        let config: SgdConfig = serde_json::from_str(r#"{"learning_rate": 0.02}"#).unwrap();
        let json = serde_json::to_value(config).unwrap();

        assert_eq!(config, SgdConfig { learning_rate: 0.02 });
        assert_eq!(json, serde_json::json!({"learning_rate": 0.02}));
    }

    #[test]
    fn test_config_schema() {
        let schema = serde_json::to_value(schemars::schema_for!(SgdConfig)).unwrap();

        assert_eq!(schema["title"], "SgdConfig");
        assert_eq!(schema["properties"]["learning_rate"]["type"], "number");
    }
}
