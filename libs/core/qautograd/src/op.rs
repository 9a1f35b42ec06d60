use std::str::FromStr;

use crate::Error;

/// Divisors smaller than this in magnitude are rejected by [Operation::Div].
pub const DIV_EPSILON: f64 = 1e-9;

// -----------------------------------------------------------------------------
// Operation
// -----------------------------------------------------------------------------
/// Tag of the operation which derives the value of a node.
///
/// [Operation::Leaf] marks a source node, which has no operands.
/// The others are binary and carry a fixed rule table:
///
/// | op  | forward | d/d(lhs) | d/d(rhs)  |
/// |-----|---------|----------|-----------|
/// | add | l + r   | 1        | 1         |
/// | sub | l - r   | 1        | -1        |
/// | mul | l * r   | r        | l         |
/// | div | l / r   | 1 / r    | -l / r^2  |
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Leaf,
    Add,
    Sub,
    Mul,
    Div,
}

//
// ctor
//
impl Operation {
    /// Parse a binary operation from its name, e.g. `"mul"`.
    ///
    /// `"leaf"` and unknown names are rejected because they have no rule.
    pub fn from_name(name: &str) -> Result<Self, Error> {
        match Operation::from_str(name) {
            Ok(Operation::Leaf) | Err(_) => Err(Error::UnsupportedOperation(name.to_string())),
            Ok(op) => Ok(op),
        }
    }
}

//
// methods
//
impl Operation {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Operation::Leaf)
    }

    /// Infix symbol used in debug output.
    #[inline]
    pub fn symbol(&self) -> &'static str {
        match self {
            Operation::Leaf => "",
            Operation::Add => "+",
            Operation::Sub => "-",
            Operation::Mul => "*",
            Operation::Div => "/",
        }
    }

    /// Evaluate the operation on operand values.
    ///
    /// Division checks its divisor before the quotient is computed.
    pub fn eval(&self, lhs: f64, rhs: f64) -> Result<f64, Error> {
        match self {
            Operation::Leaf => Err(self._unsupported()),
            Operation::Add => Ok(lhs + rhs),
            Operation::Sub => Ok(lhs - rhs),
            Operation::Mul => Ok(lhs * rhs),
            Operation::Div => {
                if rhs.is_nan() || rhs.abs() < DIV_EPSILON {
                    return Err(Error::DivisionByZero(rhs));
                }
                Ok(lhs / rhs)
            }
        }
    }

    /// Local gradients `(d(out)/d(lhs), d(out)/d(rhs))` at the given operand values.
    pub fn local_grads(&self, lhs: f64, rhs: f64) -> Result<(f64, f64), Error> {
        match self {
            Operation::Leaf => Err(self._unsupported()),
            Operation::Add => Ok((1.0, 1.0)),
            Operation::Sub => Ok((1.0, -1.0)),
            Operation::Mul => Ok((rhs, lhs)),
            Operation::Div => Ok((1.0 / rhs, -lhs / (rhs * rhs))),
        }
    }

    #[inline]
    fn _unsupported(&self) -> Error {
        let name: &'static str = self.into();
        Error::UnsupportedOperation(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("add", Operation::Add)]
    #[case("sub", Operation::Sub)]
    #[case("mul", Operation::Mul)]
    #[case("div", Operation::Div)]
    fn test_from_name(#[case] name: &str, #[case] expected: Operation) {
        let op = Operation::from_name(name).unwrap();

        assert_eq!(op, expected);
        assert_eq!(op.to_string(), name);
    }

    #[rstest]
    #[case("leaf")]
    #[case("pow")]
    #[case("Add")]
    #[case("")]
    fn test_from_name_err_unsupported(#[case] name: &str) {
        let err = Operation::from_name(name);

        assert_eq!(err, Err(Error::UnsupportedOperation(name.to_string())));
    }

    #[rstest]
    #[case(Operation::Add, 3.0, 2.0, 5.0)]
    #[case(Operation::Sub, 3.0, 2.0, 1.0)]
    #[case(Operation::Mul, 3.0, 2.0, 6.0)]
    #[case(Operation::Div, 3.0, 2.0, 1.5)]
    #[case(Operation::Div, -3.0, -0.5, 6.0)]
    fn test_eval(#[case] op: Operation, #[case] lhs: f64, #[case] rhs: f64, #[case] expected: f64) {
        assert_eq!(op.eval(lhs, rhs).unwrap(), expected);
    }

    #[rstest]
    #[case(0.0)]
    #[case(1e-10)]
    #[case(-1e-10)]
    fn test_eval_err_division_by_zero(#[case] rhs: f64) {
        let res = Operation::Div.eval(1.0, rhs);

        assert_eq!(res, Err(Error::DivisionByZero(rhs)));
    }

    #[test]
    fn test_eval_err_division_by_nan() {
        let res = Operation::Div.eval(1.0, f64::NAN);

        assert!(matches!(res, Err(Error::DivisionByZero(d)) if d.is_nan()));
    }

    #[test]
    fn test_eval_err_leaf() {
        let res = Operation::Leaf.eval(1.0, 2.0);

        assert_eq!(res, Err(Error::UnsupportedOperation("leaf".to_string())));
    }

    #[rstest]
    #[case(Operation::Add, 3.0, 2.0, (1.0, 1.0))]
    #[case(Operation::Sub, 3.0, 2.0, (1.0, -1.0))]
    #[case(Operation::Mul, 3.0, 2.0, (2.0, 3.0))]
    #[case(Operation::Div, 3.0, 2.0, (0.5, -0.75))]
    fn test_local_grads(
        #[case] op: Operation,
        #[case] lhs: f64,
        #[case] rhs: f64,
        #[case] expected: (f64, f64),
    ) {
        let (dl, dr) = op.local_grads(lhs, rhs).unwrap();

        assert_abs_diff_eq!(dl, expected.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dr, expected.1, epsilon = 1e-12);
    }

    #[rstest]
    #[case(Operation::Add)]
    #[case(Operation::Sub)]
    #[case(Operation::Mul)]
    #[case(Operation::Div)]
    fn test_local_grads_match_finite_difference(#[case] op: Operation) {
        let (lhs, rhs, h) = (1.7, -2.3, 1e-6);

        let (dl, dr) = op.local_grads(lhs, rhs).unwrap();
        let fd_l = (op.eval(lhs + h, rhs).unwrap() - op.eval(lhs - h, rhs).unwrap()) / (2. * h);
        let fd_r = (op.eval(lhs, rhs + h).unwrap() - op.eval(lhs, rhs - h).unwrap()) / (2. * h);

        assert_abs_diff_eq!(dl, fd_l, epsilon = 1e-6);
        assert_abs_diff_eq!(dr, fd_r, epsilon = 1e-6);
    }

    #[test]
    fn test_local_grads_err_leaf() {
        let res = Operation::Leaf.local_grads(1.0, 2.0);

        assert_eq!(res, Err(Error::UnsupportedOperation("leaf".to_string())));
    }
}
