use crate::{Error, Operation};

// -----------------------------------------------------------------------------
// _Operand
// _Origin
// -----------------------------------------------------------------------------
/// Link to an operand together with its value at construction time.
///
/// Local gradients are evaluated against `value`, so later updates of the operand
/// (e.g. an optimizer step on a parameter) do not leak into this node's rule.
#[derive(Debug, Clone, Copy)]
pub(super) struct _Operand {
    pub(super) idx: usize,
    pub(super) value: f64,
}

#[derive(Debug, Clone, Copy)]
pub(super) enum _Origin {
    Leaf,
    Binary {
        op: Operation,
        lhs: _Operand,
        rhs: _Operand,
    },
}

impl _Origin {
    #[inline]
    pub(super) fn op(&self) -> Operation {
        match self {
            _Origin::Leaf => Operation::Leaf,
            _Origin::Binary { op, .. } => *op,
        }
    }
}

// -----------------------------------------------------------------------------
// _Cell
// _Cells
// -----------------------------------------------------------------------------
#[derive(Debug)]
pub(super) struct _Cell {
    pub(super) value: f64,
    pub(super) grad: Option<f64>,
    pub(super) requires_grad: bool,
    pub(super) origin: _Origin,
    refcnt: usize,
}

/// Storage of the cells of dynamic expressions.
///
/// Each cell is referred by [crate::Tensor] handles and by the cells which use it as an operand.
/// The number of these references is counted in the cell itself.
/// When the count drops to zero, the cell is released together with
/// the operands which are referred only by the released cell,
/// and its slot is recorded in `vacancy` to be overwritten by the next registration.
///
/// Indices of live cells never change, so random access by index stays O(1)
/// and the memory used by a training loop is bounded by the largest expression
/// alive at once, as long as the loop detaches its parameters.
#[derive(Debug, Default)]
pub(super) struct _Cells {
    cells: Vec<_Cell>,
    vacancy: Vec<usize>,
    next_nodes: Vec<usize>,
}

impl _Cells {
    #[inline]
    pub(super) fn _cell(&self, idx: usize) -> &_Cell {
        self.cells.get(idx).expect("Tape must manage this cell")
    }

    #[inline]
    pub(super) fn _cell_mut(&mut self, idx: usize) -> &mut _Cell {
        self.cells.get_mut(idx).expect("Tape must manage this cell")
    }

    #[inline]
    pub(super) fn _capacity(&self) -> usize {
        self.cells.len()
    }

    /// Number of live cells.
    #[inline]
    pub(super) fn _live(&self) -> usize {
        self.cells.len() - self.vacancy.len()
    }

    pub(super) fn _reg_leaf(&mut self, value: f64, requires_grad: bool) -> usize {
        self._reg_cell(_Cell {
            value,
            grad: None,
            requires_grad,
            origin: _Origin::Leaf,
            refcnt: 1,
        })
    }

    pub(super) fn _reg_binary(
        &mut self,
        op: Operation,
        lhs: usize,
        rhs: usize,
    ) -> Result<usize, Error> {
        let (lhs_val, lhs_req) = {
            let cell = self._cell(lhs);
            (cell.value, cell.requires_grad)
        };
        let (rhs_val, rhs_req) = {
            let cell = self._cell(rhs);
            (cell.value, cell.requires_grad)
        };
        // fails before any reference is taken
        let value = op.eval(lhs_val, rhs_val)?;

        self._incl_refcnt(lhs);
        self._incl_refcnt(rhs);
        Ok(self._reg_cell(_Cell {
            value,
            grad: None,
            requires_grad: lhs_req || rhs_req,
            origin: _Origin::Binary {
                op,
                lhs: _Operand {
                    idx: lhs,
                    value: lhs_val,
                },
                rhs: _Operand {
                    idx: rhs,
                    value: rhs_val,
                },
            },
            refcnt: 1,
        }))
    }

    #[inline]
    fn _reg_cell(&mut self, cell: _Cell) -> usize {
        if let Some(idx) = self.vacancy.pop() {
            *self._cell_mut(idx) = cell;
            idx
        } else {
            self.cells.push(cell);
            self.cells.len() - 1
        }
    }

    #[inline]
    pub(super) fn _incl_refcnt(&mut self, idx: usize) {
        self._cell_mut(idx).refcnt += 1;
    }

    pub(super) fn _decl_refcnt(&mut self, idx: usize) {
        // iterative rather than recursive to survive long chains
        let stack = &mut self.next_nodes;
        stack.clear();
        stack.push(idx);

        while let Some(idx) = stack.pop() {
            let Some(cell) = self.cells.get_mut(idx) else {
                continue;
            };
            if cell.refcnt == 0 {
                continue;
            }
            cell.refcnt -= 1;
            if cell.refcnt != 0 {
                continue;
            }

            self.vacancy.push(idx);
            if let _Origin::Binary { lhs, rhs, .. } = cell.origin {
                stack.push(lhs.idx);
                stack.push(rhs.idx);
            }
        }
    }

    /// Turn the cell into a leaf, keeping its value and gradient,
    /// and release the references to its operands.
    pub(super) fn _detach(&mut self, idx: usize) {
        let origin = std::mem::replace(&mut self._cell_mut(idx).origin, _Origin::Leaf);
        if let _Origin::Binary { lhs, rhs, .. } = origin {
            self._decl_refcnt(lhs.idx);
            self._decl_refcnt(rhs.idx);
        }
    }
}

// -----------------------------------------------------------------------------
// _BackPropWorkSpace
// -----------------------------------------------------------------------------
/// Buffers reused across backward passes and gradient resets.
#[derive(Debug, Default)]
pub(super) struct _BackPropWorkSpace {
    refcount: Vec<usize>,
    visited: Vec<bool>,
    grads_memo: Vec<f64>,
    next_nodes: Vec<usize>,
}

impl _BackPropWorkSpace {
    /// Collect cells reachable from `root` and count, for each of them,
    /// the number of edges coming from reachable consumers.
    /// Returns the number of reachable cells.
    fn _count_ref(&mut self, cells: &_Cells, root: usize) -> usize {
        let refcount = &mut self.refcount;
        refcount.clear();
        refcount.resize(cells._capacity(), 0);

        let visited = &mut self.visited;
        visited.clear();
        visited.resize(cells._capacity(), false);

        let stack = &mut self.next_nodes;
        stack.clear();
        stack.push(root);

        let mut reachable = 0;
        while let Some(idx) = stack.pop() {
            // A cell shared by several consumers is expanded only once,
            // otherwise the edges below it would be counted twice.
            // For `y = x0 * x1; z = y + x0; w = y * z`, the counts are
            // x0=2, x1=1, y=2, z=1, w=1.
            refcount[idx] += 1;
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            reachable += 1;

            if let _Origin::Binary { lhs, rhs, .. } = cells._cell(idx).origin {
                stack.push(lhs.idx);
                stack.push(rhs.idx);
            }
        }
        reachable
    }

    /// Propagate `seed` from `root` and add the resulting gradients
    /// to the `grad` of every reachable cell.
    pub(super) fn _back_prop(
        &mut self,
        cells: &mut _Cells,
        root: usize,
        seed: f64,
    ) -> Result<(), Error> {
        // A cell distributes its gradient to its operands only after
        // every reachable consumer has contributed to it.
        // This is a reverse topological order without explicit sorting:
        // the remaining number of contributions is tracked in `refcount`
        // and a cell is scheduled when it drops to zero.
        //
        // For `y = x0 * x1; z = y + x0; w = y * z`, `w` first contributes to `y` and `z`.
        // `z` is ready then (count 0) and contributes to `y` and `x0`.
        // Only now `y` is ready and distributes its total gradient to `x0` and `x1`.
        let reachable = self._count_ref(cells, root);
        log::debug!(
            "back propagation from cell {} over {} reachable cells",
            root,
            reachable
        );

        let refcount = &mut self.refcount;
        let stack = &mut self.next_nodes;
        stack.clear();
        stack.push(root);

        let grads_memo = &mut self.grads_memo;
        grads_memo.clear();
        grads_memo.resize(cells._capacity(), 0.0);
        grads_memo[root] = seed;

        let _decl_refcnt = |idx: usize, rc: &mut Vec<usize>, next: &mut Vec<usize>| {
            rc[idx] -= 1;
            if rc[idx] == 0 {
                next.push(idx);
            }
        };

        while let Some(tgt) = stack.pop() {
            let _Origin::Binary { op, lhs, rhs } = cells._cell(tgt).origin else {
                continue;
            };
            let grad = grads_memo[tgt];
            let (dl, dr) = op.local_grads(lhs.value, rhs.value)?;
            log::trace!(
                "cell {} = {} {} {} distributes {}",
                tgt,
                lhs.idx,
                op.symbol(),
                rhs.idx,
                grad
            );
            grads_memo[lhs.idx] += grad * dl;
            grads_memo[rhs.idx] += grad * dr;
            _decl_refcnt(lhs.idx, refcount, stack);
            _decl_refcnt(rhs.idx, refcount, stack);
        }

        // commit only after the whole pass succeeded
        for (idx, visited) in self.visited.iter().enumerate() {
            if *visited {
                let cell = cells._cell_mut(idx);
                cell.grad = Some(cell.grad.unwrap_or(0.0) + grads_memo[idx]);
            }
        }
        Ok(())
    }

    /// Clear `grad` of every cell reachable from `root`.
    pub(super) fn _zero_grad(&mut self, cells: &mut _Cells, root: usize) {
        let visited = &mut self.visited;
        visited.clear();
        visited.resize(cells._capacity(), false);

        let stack = &mut self.next_nodes;
        stack.clear();
        stack.push(root);

        while let Some(idx) = stack.pop() {
            if visited[idx] {
                continue;
            }
            visited[idx] = true;

            let cell = cells._cell_mut(idx);
            cell.grad = None;
            if let _Origin::Binary { lhs, rhs, .. } = cell.origin {
                stack.push(lhs.idx);
                stack.push(rhs.idx);
            }
        }
    }
}
