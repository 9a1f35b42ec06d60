use crate::{Error, Operation};

// -----------------------------------------------------------------------------
// _Origin
// _Slot
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy)]
pub(super) enum _Origin {
    Leaf,
    Binary {
        op: Operation,
        lhs: usize,
        rhs: usize,
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

#[derive(Debug)]
pub(super) struct _Slot {
    /// `None` until the first forward pass for derived nodes.
    pub(super) value: Option<f64>,
    pub(super) grad: Option<f64>,
    pub(super) requires_grad: bool,
    pub(super) origin: _Origin,
    pub(super) consumers: Vec<usize>,
    pub(super) forwarded: bool,
    pub(super) backwarded: bool,
    pub(super) is_output: bool,
}

impl _Slot {
    #[inline]
    pub(super) fn is_trainable_leaf(&self) -> bool {
        self.requires_grad && matches!(self.origin, _Origin::Leaf)
    }
}

// -----------------------------------------------------------------------------
// _Registry
// -----------------------------------------------------------------------------
/// Every node ever declared on a graph, in declaration order.
///
/// Nodes refer to each other by their position:
/// operands point to producers and `consumers` point back to the nodes using them.
/// Nothing is removed until the registry itself is dropped.
#[derive(Debug, Default)]
pub(super) struct _Registry {
    slots: Vec<_Slot>,
    stack: Vec<(usize, bool)>,
}

impl _Registry {
    #[inline]
    pub(super) fn _slot(&self, idx: usize) -> &_Slot {
        self.slots.get(idx).expect("Graph must manage this node")
    }

    #[inline]
    pub(super) fn _slot_mut(&mut self, idx: usize) -> &mut _Slot {
        self.slots.get_mut(idx).expect("Graph must manage this node")
    }

    #[inline]
    pub(super) fn _slots(&self) -> &[_Slot] {
        &self.slots
    }

    #[inline]
    pub(super) fn _len(&self) -> usize {
        self.slots.len()
    }

    pub(super) fn _reg_leaf(&mut self, value: f64, requires_grad: bool) -> usize {
        self.slots.push(_Slot {
            value: Some(value),
            grad: None,
            requires_grad,
            origin: _Origin::Leaf,
            consumers: Vec::new(),
            forwarded: false,
            backwarded: false,
            is_output: false,
        });
        self.slots.len() - 1
    }

    pub(super) fn _reg_binary(&mut self, op: Operation, lhs: usize, rhs: usize) -> usize {
        let requires_grad = self._slot(lhs).requires_grad || self._slot(rhs).requires_grad;
        let idx = self.slots.len();
        self._slot_mut(lhs).consumers.push(idx);
        self._slot_mut(rhs).consumers.push(idx);
        self.slots.push(_Slot {
            value: None,
            grad: None,
            requires_grad,
            origin: _Origin::Binary { op, lhs, rhs },
            consumers: Vec::new(),
            forwarded: false,
            backwarded: false,
            is_output: false,
        });
        idx
    }

    /// Mark `idx` as the only output.
    pub(super) fn _set_output(&mut self, idx: usize) {
        for slot in self.slots.iter_mut() {
            slot.is_output = false;
        }
        self._slot_mut(idx).is_output = true;
    }

    #[inline]
    pub(super) fn _output(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.is_output)
    }

    /// Pull values from the producers of `target` and compute it.
    /// Nodes forwarded already in this pass are not recomputed.
    pub(super) fn _forward(&mut self, target: usize) -> Result<f64, Error> {
        let stack = &mut self.stack;
        stack.clear();
        stack.push((target, false));

        while let Some((idx, expanded)) = stack.pop() {
            let slot = self.slots.get(idx).expect("Graph must manage this node");
            if slot.forwarded {
                continue;
            }
            if expanded {
                Self::_forward_single(&mut self.slots, idx)?;
                continue;
            }
            stack.push((idx, true));
            if let _Origin::Binary { lhs, rhs, .. } = slot.origin {
                for operand in [rhs, lhs] {
                    if !self.slots[operand].forwarded {
                        stack.push((operand, false));
                    }
                }
            }
        }
        self._slot(target).value.ok_or(Error::NotForwarded(target))
    }

    fn _forward_single(slots: &mut [_Slot], idx: usize) -> Result<(), Error> {
        if let _Origin::Binary { op, lhs, rhs } = slots[idx].origin {
            let lhs_val = slots[lhs].value.ok_or(Error::NotForwarded(lhs))?;
            let rhs_val = slots[rhs].value.ok_or(Error::NotForwarded(rhs))?;
            let value = op.eval(lhs_val, rhs_val)?;
            log::trace!("node {} = {} {} {} = {}", idx, lhs, op.symbol(), rhs, value);
            slots[idx].value = Some(value);
        }
        slots[idx].forwarded = true;
        Ok(())
    }

    /// Push gradients through every node in declaration order.
    ///
    /// Before a node distributes its gradient, all of its consumers are backwarded,
    /// so the gradient is complete when it is passed on to the operands.
    pub(super) fn _backward(&mut self) -> Result<(), Error> {
        if self._output().is_none() {
            return Err(Error::MissingOutput);
        }
        for idx in 0..self.slots.len() {
            if !self.slots[idx].backwarded {
                self._backward_from(idx)?;
            }
        }
        Ok(())
    }

    fn _backward_from(&mut self, start: usize) -> Result<(), Error> {
        let stack = &mut self.stack;
        stack.clear();
        stack.push((start, false));

        while let Some((idx, expanded)) = stack.pop() {
            let slot = self.slots.get(idx).expect("Graph must manage this node");
            if slot.backwarded {
                continue;
            }
            if expanded {
                Self::_backward_single(&mut self.slots, idx)?;
                continue;
            }
            stack.push((idx, true));
            for &consumer in slot.consumers.iter() {
                if !self.slots[consumer].backwarded {
                    stack.push((consumer, false));
                }
            }
        }
        Ok(())
    }

    fn _backward_single(slots: &mut [_Slot], idx: usize) -> Result<(), Error> {
        if slots[idx].is_output {
            slots[idx].grad = Some(1.0);
        }
        // nodes not upstream of the output have nothing to distribute
        if let (_Origin::Binary { op, lhs, rhs }, Some(grad)) = (slots[idx].origin, slots[idx].grad)
        {
            // values left from the previous cycle must not be used
            let lhs_val = Self::_forwarded_value(slots, lhs)?;
            let rhs_val = Self::_forwarded_value(slots, rhs)?;
            let (dl, dr) = op.local_grads(lhs_val, rhs_val)?;
            log::trace!("node {} distributes {} to {} and {}", idx, grad, lhs, rhs);
            *slots[lhs].grad.get_or_insert(0.0) += grad * dl;
            *slots[rhs].grad.get_or_insert(0.0) += grad * dr;
        }
        slots[idx].backwarded = true;
        Ok(())
    }

    #[inline]
    fn _forwarded_value(slots: &[_Slot], idx: usize) -> Result<f64, Error> {
        match slots[idx] {
            _Slot {
                forwarded: true,
                value: Some(value),
                ..
            } => Ok(value),
            _ => Err(Error::NotForwarded(idx)),
        }
    }

    /// Move every trainable leaf against its gradient and return the number of moved leaves.
    ///
    /// Nothing is updated if some trainable leaf is not backwarded in the current cycle.
    pub(super) fn _descend(&mut self, learning_rate: f64) -> Result<usize, Error> {
        let stale = self
            .slots
            .iter()
            .position(|slot| slot.is_trainable_leaf() && !slot.backwarded);
        if let Some(idx) = stale {
            return Err(Error::StaleGradient(idx));
        }

        let mut updated = 0;
        for (idx, slot) in self
            .slots
            .iter_mut()
            .enumerate()
            .filter(|(_, slot)| slot.is_trainable_leaf())
        {
            // no gradient after a backward pass means no path to the output
            let grad = slot.grad.unwrap_or_else(|| {
                log::warn!("trainable node {} is not connected to the output", idx);
                0.0
            });
            if let Some(value) = slot.value.as_mut() {
                *value -= learning_rate * grad;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Reset gradients and pass states of every node.
    pub(super) fn _zero_grad(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.grad = None;
            slot.forwarded = false;
            slot.backwarded = false;
        }
    }
}
