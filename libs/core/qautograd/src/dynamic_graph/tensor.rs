use crate::{Error, Operation};

use super::{cells::_Origin, Tape};

// -----------------------------------------------------------------------------
// Tensor
// -----------------------------------------------------------------------------
/// Scalar node of a dynamic expression.
///
/// Operators build a new node from the current values of their operands.
/// The expression lives as long as some tensor refers to it
/// and [Tensor::detach] cuts it off explicitly.
///
/// # Example
/// ```
/// use qautograd::Tape;
///
/// let tape = Tape::new();
/// let x = tape.leaf(3.0, true);
/// let y = &x * &x + &x;
///
/// y.backward().unwrap();
/// assert_eq!(y.value(), 12.0);
/// assert_eq!(x.grad(), Some(7.0));
/// ```
#[derive(Debug)]
pub struct Tensor {
    tape: Tape,
    index: usize,
}

impl Clone for Tensor {
    #[inline]
    fn clone(&self) -> Self {
        self.tape.0.borrow_mut().cells._incl_refcnt(self.index);
        Self {
            tape: self.tape.clone(),
            index: self.index,
        }
    }
}

impl Drop for Tensor {
    #[inline]
    fn drop(&mut self) {
        self.tape.0.borrow_mut().cells._decl_refcnt(self.index);
    }
}

//
// ctor
//
impl Tensor {
    /// Wrap a freshly registered cell whose reference is owned by the new handle.
    #[inline]
    pub(super) fn _new(tape: Tape, index: usize) -> Self {
        Self { tape, index }
    }
}

//
// methods
//
impl Tensor {
    #[inline]
    pub fn value(&self) -> f64 {
        self.tape.0.borrow().cells._cell(self.index).value
    }

    /// Accumulated gradient.
    ///
    /// `None` means no backward pass has reached this tensor since the last reset.
    #[inline]
    pub fn grad(&self) -> Option<f64> {
        self.tape.0.borrow().cells._cell(self.index).grad
    }

    #[inline]
    pub fn requires_grad(&self) -> bool {
        self.tape.0.borrow().cells._cell(self.index).requires_grad
    }

    #[inline]
    pub fn op(&self) -> Operation {
        self.tape.0.borrow().cells._cell(self.index).origin.op()
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.op().is_leaf()
    }

    /// Operands `(lhs, rhs)` of this tensor, `None` for leaves.
    pub fn operands(&self) -> Option<(Tensor, Tensor)> {
        let mut internal = self.tape.0.borrow_mut();
        let _Origin::Binary { lhs, rhs, .. } = internal.cells._cell(self.index).origin else {
            return None;
        };
        internal.cells._incl_refcnt(lhs.idx);
        internal.cells._incl_refcnt(rhs.idx);
        Some((
            Tensor::_new(self.tape.clone(), lhs.idx),
            Tensor::_new(self.tape.clone(), rhs.idx),
        ))
    }

    #[inline]
    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    /// Overwrite the value in place.
    ///
    /// Tensors already built from this one keep the values they were built with.
    #[inline]
    pub fn set_value(&self, value: f64) {
        self.tape.0.borrow_mut().cells._cell_mut(self.index).value = value;
    }

    /// Combine with `rhs` by a binary operation.
    #[inline]
    pub fn binary(&self, op: Operation, rhs: &Tensor) -> Result<Tensor, Error> {
        self.tape.binary(op, self, rhs)
    }

    /// Back-propagate the unit seed from this tensor.
    #[inline]
    pub fn backward(&self) -> Result<(), Error> {
        self.backward_with(1.0)
    }

    /// Back-propagate `seed` from this tensor.
    ///
    /// Gradients of every tensor this one depends on are accumulated,
    /// so call [Tensor::zero_grad] between independent passes.
    pub fn backward_with(&self, seed: f64) -> Result<(), Error> {
        let mut internal = self.tape.0.borrow_mut();
        let internal = &mut *internal;
        internal
            .workspace
            ._back_prop(&mut internal.cells, self.index, seed)
    }

    /// Clear the gradients of this tensor and every tensor it depends on.
    pub fn zero_grad(&self) {
        let mut internal = self.tape.0.borrow_mut();
        let internal = &mut *internal;
        internal
            .workspace
            ._zero_grad(&mut internal.cells, self.index);
    }

    /// Sever the links to the operands.
    ///
    /// This tensor becomes a leaf with its current value and gradient
    /// and the expression below it is freed unless referenced elsewhere.
    #[inline]
    pub fn detach(&self) {
        self.tape.0.borrow_mut().cells._detach(self.index);
    }
}

// impls
impl Tensor {
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
        impl std::ops::$tr<&Tensor> for &Tensor {
            type Output = Tensor;

            #[inline]
            fn $fn(self, rhs: &Tensor) -> Self::Output {
                if !Tape::ptr_eq(&self.tape, &rhs.tape) {
                    panic!(
                        "Cannot {} tensors from different tapes: lhs.tape={:?}, rhs.tape={:?}",
                        stringify!($tr),
                        self.tape._debug_ptr(),
                        rhs.tape._debug_ptr()
                    );
                }
                let index = self
                    .tape
                    .0
                    .borrow_mut()
                    .cells
                    ._reg_binary(Operation::$op, self.index, rhs.index);
                match index {
                    Ok(index) => Tensor::_new(self.tape.clone(), index),
                    Err(e) => unreachable!("{} is infallible: {}", stringify!($tr), e),
                }
            }
        }
        impl std::ops::$tr<Tensor> for &Tensor {
            type Output = Tensor;

            #[inline]
            fn $fn(self, rhs: Tensor) -> Self::Output {
                std::ops::$tr::$fn(self, &rhs)
            }
        }
        impl std::ops::$tr<&Tensor> for Tensor {
            type Output = Tensor;

            #[inline]
            fn $fn(self, rhs: &Tensor) -> Self::Output {
                std::ops::$tr::$fn(&self, rhs)
            }
        }
        impl std::ops::$tr<Tensor> for Tensor {
            type Output = Tensor;

            #[inline]
            fn $fn(self, rhs: Tensor) -> Self::Output {
                std::ops::$tr::$fn(&self, &rhs)
            }
        }
    };
}

_define_arithmetic_binary!(Add, add, Add);
_define_arithmetic_binary!(Sub, sub, Sub);
_define_arithmetic_binary!(Mul, mul, Mul);

// Division may fail on a vanishing divisor.
impl std::ops::Div<&Tensor> for &Tensor {
    type Output = Result<Tensor, Error>;

    #[inline]
    fn div(self, rhs: &Tensor) -> Self::Output {
        self.binary(Operation::Div, rhs)
    }
}
impl std::ops::Div<Tensor> for &Tensor {
    type Output = Result<Tensor, Error>;

    #[inline]
    fn div(self, rhs: Tensor) -> Self::Output {
        self.binary(Operation::Div, &rhs)
    }
}
impl std::ops::Div<&Tensor> for Tensor {
    type Output = Result<Tensor, Error>;

    #[inline]
    fn div(self, rhs: &Tensor) -> Self::Output {
        self.binary(Operation::Div, rhs)
    }
}
impl std::ops::Div<Tensor> for Tensor {
    type Output = Result<Tensor, Error>;

    #[inline]
    fn div(self, rhs: Tensor) -> Self::Output {
        self.binary(Operation::Div, &rhs)
    }
}
