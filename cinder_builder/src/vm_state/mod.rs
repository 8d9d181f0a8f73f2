//! Simulated virtual-machine state.
//!
//! A bytecode builder carries a model of the interpreted machine's
//! registers and operand stack as IL values. The model is only written
//! back to real storage on `commit` and read back on `reload`, so most
//! bytecode never touches memory for its operands.
//!
//! When two paths meet at a bytecode builder their models must agree. The
//! first path to arrive fixes the target's initial state; every later one
//! is rewritten to produce its values into the initial state's values
//! with `StoreOver` (see [`VirtualMachineState::merge_into`]).

use cinder_il::Value;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::builder::{ArithmeticBuilder, IlBuilder};

pub mod operand_array;
pub mod operand_stack;
pub mod register;

pub use operand_array::VirtualMachineOperandArray;
pub use operand_stack::VirtualMachineOperandStack;
pub use register::{VirtualMachineRegister, VirtualMachineRegisterInStruct};

// =============================================================================
// State Trait
// =============================================================================

/// One component of the simulated machine.
pub trait VirtualMachineState: Clone {
    /// Write the modelled values back to the machine's real storage.
    fn commit(&self, b: &mut IlBuilder<'_>);

    /// Re-read the modelled values from real storage.
    fn reload(&mut self, b: &mut IlBuilder<'_>);

    /// An independent copy for a successor path.
    fn make_copy(&self) -> Self {
        self.clone()
    }

    /// Emit into `b` the operations that make `other`'s values hold this
    /// state's values.
    fn merge_into(&self, other: &Self, b: &mut IlBuilder<'_>);

    /// Whether both states have the same shape and storage, so one can be
    /// merged into the other.
    fn state_eq(&self, other: &Self) -> bool;
}

// =============================================================================
// Composite State
// =============================================================================

/// The VM state a bytecode builder carries.
#[derive(Debug, Clone, PartialEq)]
pub enum VmState {
    Register(VirtualMachineRegister),
    RegisterInStruct(VirtualMachineRegisterInStruct),
    OperandStack(VirtualMachineOperandStack),
    OperandArray(VirtualMachineOperandArray),
    /// Components committed, reloaded and merged in order.
    Composite(Vec<VmState>),
}

impl VmState {
    /// A state with no components.
    pub fn empty() -> Self {
        VmState::Composite(Vec::new())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VmState::Register(_) => "register",
            VmState::RegisterInStruct(_) => "register in struct",
            VmState::OperandStack(_) => "operand stack",
            VmState::OperandArray(_) => "operand array",
            VmState::Composite(_) => "composite",
        }
    }

    /// The first operand stack in this state.
    pub fn operand_stack(&self) -> Option<&VirtualMachineOperandStack> {
        match self {
            VmState::OperandStack(stack) => Some(stack),
            VmState::Composite(parts) => parts.iter().find_map(VmState::operand_stack),
            _ => None,
        }
    }

    pub fn operand_stack_mut(&mut self) -> Option<&mut VirtualMachineOperandStack> {
        match self {
            VmState::OperandStack(stack) => Some(stack),
            VmState::Composite(parts) => parts.iter_mut().find_map(VmState::operand_stack_mut),
            _ => None,
        }
    }

    /// The first operand array in this state.
    pub fn operand_array(&self) -> Option<&VirtualMachineOperandArray> {
        match self {
            VmState::OperandArray(array) => Some(array),
            VmState::Composite(parts) => parts.iter().find_map(VmState::operand_array),
            _ => None,
        }
    }

    pub fn operand_array_mut(&mut self) -> Option<&mut VirtualMachineOperandArray> {
        match self {
            VmState::OperandArray(array) => Some(array),
            VmState::Composite(parts) => parts.iter_mut().find_map(VmState::operand_array_mut),
            _ => None,
        }
    }

    /// Give every slot its own value: a value already held by an earlier
    /// slot (after a `dup`, say) is replaced by a copy emitted into `b`.
    ///
    /// A state that becomes a bytecode builder's initial state is merged
    /// into slot by slot, so no two of its slots may share a value.
    pub fn dealias(&mut self, b: &mut IlBuilder<'_>) {
        let mut seen = FxHashSet::default();
        let mut copies = 0usize;
        self.dealias_with(b, &mut seen, &mut copies);
        if copies > 0 && b.mb.config.trace_vm_state {
            tracing::debug!(builder = %b.id(), copies, "dealias vm state");
        }
    }

    fn dealias_with(
        &mut self,
        b: &mut IlBuilder<'_>,
        seen: &mut FxHashSet<Value>,
        copies: &mut usize,
    ) {
        let slots = match self {
            VmState::OperandStack(stack) => stack.values_mut(),
            VmState::OperandArray(array) => array.values_mut(),
            VmState::Composite(parts) => {
                for part in parts {
                    part.dealias_with(b, seen, copies);
                }
                return;
            }
            VmState::Register(_) | VmState::RegisterInStruct(_) => return,
        };
        for slot in slots {
            if !seen.insert(*slot) {
                let ty = b.value_type(*slot);
                *slot = b.convert_to(ty, *slot);
                seen.insert(*slot);
                *copies += 1;
            }
        }
    }
}

impl From<VirtualMachineRegister> for VmState {
    fn from(register: VirtualMachineRegister) -> Self {
        VmState::Register(register)
    }
}

impl From<VirtualMachineRegisterInStruct> for VmState {
    fn from(register: VirtualMachineRegisterInStruct) -> Self {
        VmState::RegisterInStruct(register)
    }
}

impl From<VirtualMachineOperandStack> for VmState {
    fn from(stack: VirtualMachineOperandStack) -> Self {
        VmState::OperandStack(stack)
    }
}

impl From<VirtualMachineOperandArray> for VmState {
    fn from(array: VirtualMachineOperandArray) -> Self {
        VmState::OperandArray(array)
    }
}

impl VirtualMachineState for VmState {
    fn commit(&self, b: &mut IlBuilder<'_>) {
        match self {
            VmState::Register(r) => r.commit(b),
            VmState::RegisterInStruct(r) => r.commit(b),
            VmState::OperandStack(s) => s.commit(b),
            VmState::OperandArray(a) => a.commit(b),
            VmState::Composite(parts) => parts.iter().for_each(|part| part.commit(b)),
        }
    }

    fn reload(&mut self, b: &mut IlBuilder<'_>) {
        match self {
            VmState::Register(r) => r.reload(b),
            VmState::RegisterInStruct(r) => r.reload(b),
            VmState::OperandStack(s) => s.reload(b),
            VmState::OperandArray(a) => a.reload(b),
            VmState::Composite(parts) => parts.iter_mut().for_each(|part| part.reload(b)),
        }
    }

    /// # Panics
    ///
    /// Panics if the two states differ in shape.
    fn merge_into(&self, other: &Self, b: &mut IlBuilder<'_>) {
        match (self, other) {
            (VmState::Register(from), VmState::Register(into)) => from.merge_into(into, b),
            (VmState::RegisterInStruct(from), VmState::RegisterInStruct(into)) => {
                from.merge_into(into, b)
            }
            (VmState::OperandStack(from), VmState::OperandStack(into)) => {
                from.merge_into(into, b)
            }
            (VmState::OperandArray(from), VmState::OperandArray(into)) => {
                from.merge_into(into, b)
            }
            (VmState::Composite(from), VmState::Composite(into)) => {
                assert_eq!(
                    from.len(),
                    into.len(),
                    "merging composite states of {} and {} components",
                    from.len(),
                    into.len()
                );
                for (from, into) in from.iter().zip(into) {
                    from.merge_into(into, b);
                }
            }
            _ => panic!("cannot merge {} state into {} state", self.kind(), other.kind()),
        }
    }

    fn state_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (VmState::Register(a), VmState::Register(b)) => a.state_eq(b),
            (VmState::RegisterInStruct(a), VmState::RegisterInStruct(b)) => a.state_eq(b),
            (VmState::OperandStack(a), VmState::OperandStack(b)) => a.state_eq(b),
            (VmState::OperandArray(a), VmState::OperandArray(b)) => a.state_eq(b),
            (VmState::Composite(a), VmState::Composite(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.state_eq(b))
            }
            _ => false,
        }
    }
}

// =============================================================================
// Value Merging
// =============================================================================

/// Make each `into[i]` hold `from[i]` on the current path.
///
/// The stores form a parallel copy: when a value being overwritten is
/// also read by a later store, every source is first copied to a fresh
/// value so no store observes an earlier one.
///
/// # Panics
///
/// Panics if one `into` value is paired with two different sources: a
/// single value cannot hold both.
pub(crate) fn merge_values(b: &mut IlBuilder<'_>, from: &[Value], into: &[Value]) {
    debug_assert_eq!(from.len(), into.len());
    let mut wanted: FxHashMap<Value, Value> = FxHashMap::default();
    for (&from, &into) in from.iter().zip(into) {
        let previous = *wanted.entry(into).or_insert(from);
        assert_eq!(
            previous, from,
            "merge target {} is shared by slots receiving {} and {}",
            into, previous, from
        );
    }

    let pairs: Vec<(Value, Value)> = from
        .iter()
        .zip(into)
        .filter(|(from, into)| from != into)
        .map(|(&from, &into)| (from, into))
        .collect();
    if pairs.is_empty() {
        return;
    }

    let overlaps = pairs
        .iter()
        .any(|&(_, into)| pairs.iter().any(|&(from, _)| from == into));
    let sources: Vec<Value> = if overlaps {
        pairs
            .iter()
            .map(|&(from, _)| {
                let ty = b.value_type(from);
                b.convert_to(ty, from)
            })
            .collect()
    } else {
        pairs.iter().map(|&(from, _)| from).collect()
    };

    for (&(_, into), &source) in pairs.iter().zip(&sources) {
        b.store_over(into, source);
    }

    if b.mb.config.trace_vm_state {
        tracing::debug!(
            builder = %b.id(),
            stores = pairs.len(),
            copied = overlaps,
            "merge values"
        );
    }
}
