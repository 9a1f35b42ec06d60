use std::{cell::RefCell, rc::Rc};

use crate::{Error, Operation};

use super::{
    cells::{_BackPropWorkSpace, _Cells},
    Tensor,
};

// -----------------------------------------------------------------------------
// _Tape
// Tape
// -----------------------------------------------------------------------------
#[derive(Debug, Default)]
pub(super) struct _Tape {
    pub(super) cells: _Cells,
    pub(super) workspace: _BackPropWorkSpace,
}

/// Owner of dynamic expressions.
///
/// This is a cheap handle; clones share the same storage.
/// Expressions are freed as soon as no [Tensor] refers to them.
#[derive(Debug)]
pub struct Tape(pub(super) Rc<RefCell<_Tape>>);

impl Clone for Tape {
    #[inline]
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

//
// ctor
//
impl Default for Tape {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tape {
    #[inline]
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(_Tape::default())))
    }
}

//
// methods
//
impl Tape {
    /// Create a leaf tensor.
    #[inline]
    pub fn leaf(&self, value: f64, requires_grad: bool) -> Tensor {
        let index = self.0.borrow_mut().cells._reg_leaf(value, requires_grad);
        Tensor::_new(self.clone(), index)
    }

    /// Create a frozen leaf tensor.
    #[inline]
    pub fn constant(&self, value: f64) -> Tensor {
        self.leaf(value, false)
    }

    /// Combine two tensors of this tape with a binary operation.
    #[inline]
    pub fn binary(&self, op: Operation, lhs: &Tensor, rhs: &Tensor) -> Result<Tensor, Error> {
        if !Tape::ptr_eq(self, lhs.tape()) || !Tape::ptr_eq(self, rhs.tape()) {
            return Err(Error::DifferentGraphs(op.into()));
        }
        let index = self
            .0
            .borrow_mut()
            .cells
            ._reg_binary(op, lhs._index(), rhs._index())?;
        Ok(Tensor::_new(self.clone(), index))
    }

    /// Number of tensors alive on this tape, including operands kept alive by other tensors.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.borrow().cells._live()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that two tapes are the same instance.
    ///
    /// Note that this comparison is not based on the contents of the tapes.
    #[inline]
    pub fn ptr_eq(lhs: &Self, rhs: &Self) -> bool {
        Rc::ptr_eq(&lhs.0, &rhs.0)
    }
}

// impls
impl Tape {
    #[inline]
    pub(super) fn _debug_ptr(&self) -> impl std::fmt::Debug {
        self.0.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf() {
        let tape = Tape::new();

        let x = tape.leaf(4.2, true);
        let c = tape.constant(1.5);

        assert_eq!(x.value(), 4.2);
        assert!(x.requires_grad());
        assert_eq!(c.value(), 1.5);
        assert!(!c.requires_grad());
        assert_eq!(tape.len(), 2);
    }

    #[test]
    fn test_binary() {
        let tape = Tape::new();
        let x = tape.leaf(4.0, true);
        let y = tape.leaf(2.0, false);

        let z = tape.binary(Operation::Div, &x, &y).unwrap();

        assert_eq!(z.value(), 2.0);
        assert_eq!(z.op(), Operation::Div);
        assert!(z.requires_grad());
    }

    #[test]
    fn test_binary_err_different_graphs() {
        let tape1 = Tape::new();
        let tape2 = Tape::new();
        let x = tape1.leaf(4.0, true);
        let y = tape2.leaf(2.0, true);

        let res = tape1.binary(Operation::Add, &x, &y);

        assert_eq!(res.unwrap_err(), Error::DifferentGraphs("add"));
    }

    #[test]
    fn test_len_after_drop() {
        let tape = Tape::new();
        let x = tape.leaf(4.0, true);
        {
            let y = &x * &x;
            let _z = &y + &x;
            assert_eq!(tape.len(), 3);
        }

        assert_eq!(tape.len(), 1);
        drop(x);
        assert!(tape.is_empty());
    }

    #[test]
    fn test_ptr_eq() {
        let tape1 = Tape::new();
        let tape2 = tape1.clone();
        let tape3 = Tape::new();

        assert!(Tape::ptr_eq(&tape1, &tape2));
        assert!(!Tape::ptr_eq(&tape1, &tape3));
    }
}
