//! Bytecode builders.
//!
//! A bytecode builder is a builder keyed by a bytecode index of the method
//! being compiled. It records the builders control leaves it for and
//! carries the simulated VM state along those edges.
//!
//! State crosses an edge when the edge is registered, which is always
//! before the transfer itself is emitted:
//! - the first predecessor to reach a target hands it a copy of its state,
//!   which becomes the target's initial state. Slots sharing a value are
//!   first given copies in the predecessor, so later merges can store
//!   into each slot separately;
//! - every later predecessor gets an intermediate builder that stores its
//!   values over the target's initial values and then jumps to the
//!   target. The caller's target is rewritten to that intermediate, so the
//!   transfer emitted afterwards lands there instead.

use cinder_il::{CmpOp, Value};

use crate::builder::{BuilderData, BuilderId, ControlBuilder, IlBuilder};
use crate::vm_state::{VirtualMachineOperandStack, VirtualMachineState, VmState};

// =============================================================================
// Bytecode State
// =============================================================================

/// Per-builder bytecode data.
#[derive(Debug, Clone)]
pub struct BytecodeState {
    pub(crate) bc_index: i32,
    pub(crate) name: Option<String>,
    pub(crate) fallthrough: Option<BuilderId>,
    pub(crate) successors: Vec<BuilderId>,
    pub(crate) initial_vm_state: Option<VmState>,
    pub(crate) vm_state: Option<VmState>,
}

impl BytecodeState {
    pub(crate) fn new(bc_index: i32, name: Option<&str>) -> Self {
        BytecodeState {
            bc_index,
            name: name.map(str::to_owned),
            fallthrough: None,
            successors: Vec::new(),
            initial_vm_state: None,
            vm_state: None,
        }
    }
}

impl BuilderData {
    fn bytecode_state(&self, id: BuilderId) -> &BytecodeState {
        self.bytecode
            .as_deref()
            .unwrap_or_else(|| panic!("builder {} is not a bytecode builder", id))
    }

    fn bytecode_state_mut(&mut self, id: BuilderId) -> &mut BytecodeState {
        self.bytecode
            .as_deref_mut()
            .unwrap_or_else(|| panic!("builder {} is not a bytecode builder", id))
    }
}

// =============================================================================
// Bytecode Builder
// =============================================================================

/// Builder trait for bytecode builders.
///
/// Every method panics when the cursor's builder is not a bytecode
/// builder.
pub trait BytecodeBuilder {
    // Identity
    fn bc_index(&self) -> i32;
    fn bc_name(&self) -> Option<&str>;

    // VM State
    fn vm_state(&self) -> Option<&VmState>;
    fn vm_state_mut(&mut self) -> Option<&mut VmState>;
    /// State on entry, fixed by the first predecessor to arrive.
    fn initial_vm_state(&self) -> Option<&VmState>;
    fn commit_vm_state(&mut self);
    fn reload_vm_state(&mut self);

    // Successors
    fn successors(&self) -> &[BuilderId];
    fn fall_through(&self) -> Option<BuilderId>;

    /// Register `target` as a successor and move this builder's VM state
    /// across the edge. Must precede the transfer to `target`, which must
    /// then use the rewritten `*target`. Returns the rewritten target.
    ///
    /// # Panics
    ///
    /// Panics if this builder has no VM state, or if the state cannot be
    /// merged into the target's initial state.
    fn add_successor_builder(&mut self, target: &mut BuilderId) -> BuilderId;

    /// Register `target` as where control falls out of this builder and
    /// emit the jump to it.
    ///
    /// # Panics
    ///
    /// Panics if control cannot reach the end of this builder.
    fn add_fall_through_builder(&mut self, target: &mut BuilderId) -> BuilderId;

    // Transfers
    fn bc_goto(&mut self, target: &mut BuilderId);
    fn bc_if_cmp(&mut self, op: CmpOp, target: &mut BuilderId, lhs: Value, rhs: Value);
    fn bc_if_cmp_equal_zero(&mut self, target: &mut BuilderId, value: Value);
    fn bc_if_cmp_not_equal_zero(&mut self, target: &mut BuilderId, value: Value);

    // Operand Stack
    fn stack_push(&mut self, value: Value);
    fn stack_pop(&mut self) -> Value;
    fn stack_top(&self) -> Value;
    fn stack_pick(&self, depth: usize) -> Value;
    fn stack_drop(&mut self, count: usize);
    fn stack_dup(&mut self);
}

impl IlBuilder<'_> {
    fn bytecode(&self) -> &BytecodeState {
        self.data().bytecode_state(self.id)
    }

    fn bytecode_mut(&mut self) -> &mut BytecodeState {
        let id = self.id;
        self.data_mut().bytecode_state_mut(id)
    }

    fn trace_vm_state(&self) -> bool {
        self.mb.config.trace_vm_state
    }

    /// Start this builder from `state`.
    pub(crate) fn propagate_vm_state(&mut self, state: VmState) {
        let bc = self.bytecode_mut();
        bc.initial_vm_state = Some(state.make_copy());
        bc.vm_state = Some(state);
    }

    /// Move this builder's VM state along the edge to `*target`,
    /// rewriting `*target` to an intermediate builder if the target has
    /// already been reached.
    fn transfer_vm_state(&mut self, target: &mut BuilderId) {
        let source = self.id;
        let original = *target;
        let mut state = self
            .bytecode_mut()
            .vm_state
            .take()
            .unwrap_or_else(|| panic!("bytecode builder {} has no VM state", source));

        let target_bc = self.mb.builders[original].bytecode_state(original);
        let initial = target_bc.initial_vm_state.clone();
        let (bc_index, name) = (target_bc.bc_index, target_bc.name.clone());

        match initial {
            None => {
                state.dealias(self);
                let bc = self.mb.builders[original].bytecode_state_mut(original);
                bc.initial_vm_state = Some(state.make_copy());
                bc.vm_state = Some(state.make_copy());
                if self.trace_vm_state() {
                    tracing::debug!(from = %source, to = %original, "propagate vm state");
                }
            }
            Some(initial) => {
                let intermediate = self.mb.orphan_bytecode_builder(bc_index, name.as_deref());
                {
                    let mut ib = self.at(intermediate);
                    state.merge_into(&initial, &mut ib);
                    ib.goto_builder(original);
                }
                let bc = self.mb.builders[intermediate].bytecode_state_mut(intermediate);
                bc.initial_vm_state = Some(state.make_copy());
                bc.vm_state = Some(initial);
                bc.fallthrough = Some(original);
                *target = intermediate;
                if self.trace_vm_state() {
                    tracing::debug!(
                        from = %source,
                        to = %original,
                        intermediate = %intermediate,
                        "merge vm state"
                    );
                }
            }
        }

        self.bytecode_mut().vm_state = Some(state);
    }

    fn operand_stack(&self) -> &VirtualMachineOperandStack {
        self.bytecode()
            .vm_state
            .as_ref()
            .and_then(VmState::operand_stack)
            .unwrap_or_else(|| panic!("builder {} has no operand stack", self.id))
    }

    fn operand_stack_mut(&mut self) -> &mut VirtualMachineOperandStack {
        let id = self.id;
        self.bytecode_mut()
            .vm_state
            .as_mut()
            .and_then(VmState::operand_stack_mut)
            .unwrap_or_else(|| panic!("builder {} has no operand stack", id))
    }
}

impl BytecodeBuilder for IlBuilder<'_> {
    fn bc_index(&self) -> i32 {
        self.bytecode().bc_index
    }

    fn bc_name(&self) -> Option<&str> {
        self.bytecode().name.as_deref()
    }

    fn vm_state(&self) -> Option<&VmState> {
        self.bytecode().vm_state.as_ref()
    }

    fn vm_state_mut(&mut self) -> Option<&mut VmState> {
        self.bytecode_mut().vm_state.as_mut()
    }

    fn initial_vm_state(&self) -> Option<&VmState> {
        self.bytecode().initial_vm_state.as_ref()
    }

    fn commit_vm_state(&mut self) {
        if let Some(state) = self.bytecode_mut().vm_state.take() {
            state.commit(self);
            self.bytecode_mut().vm_state = Some(state);
        }
    }

    fn reload_vm_state(&mut self) {
        if let Some(mut state) = self.bytecode_mut().vm_state.take() {
            state.reload(self);
            self.bytecode_mut().vm_state = Some(state);
        }
    }

    fn successors(&self) -> &[BuilderId] {
        &self.bytecode().successors
    }

    fn fall_through(&self) -> Option<BuilderId> {
        self.bytecode().fallthrough
    }

    fn add_successor_builder(&mut self, target: &mut BuilderId) -> BuilderId {
        let original = *target;
        self.transfer_vm_state(target);

        let from = self.bc_index();
        let to = self.mb.builders[original].bytecode_state(original).bc_index;
        // A backward index or an edge to itself closes a cycle.
        if to < from || original == self.id {
            self.mb.set_may_have_loops();
        }
        let effective = *target;
        self.bytecode_mut().successors.push(effective);
        self.mb.add_to_worklist(original);

        if self.trace() {
            tracing::debug!(
                builder = %self.id,
                bc_index = from,
                successor = %effective,
                successor_bc_index = to,
                "add successor"
            );
        }
        effective
    }

    fn add_fall_through_builder(&mut self, target: &mut BuilderId) -> BuilderId {
        assert!(
            self.comes_back(),
            "builder {} cannot fall through: control never reaches its end",
            self.id
        );
        let effective = self.add_successor_builder(target);
        self.bytecode_mut().fallthrough = Some(effective);
        self.goto_builder(effective);
        effective
    }

    fn bc_goto(&mut self, target: &mut BuilderId) {
        let effective = self.add_successor_builder(target);
        self.goto_builder(effective);
    }

    fn bc_if_cmp(&mut self, op: CmpOp, target: &mut BuilderId, lhs: Value, rhs: Value) {
        let effective = self.add_successor_builder(target);
        self.if_cmp(op, &mut Some(effective), lhs, rhs);
    }

    fn bc_if_cmp_equal_zero(&mut self, target: &mut BuilderId, value: Value) {
        let effective = self.add_successor_builder(target);
        self.if_cmp_equal_zero(&mut Some(effective), value);
    }

    fn bc_if_cmp_not_equal_zero(&mut self, target: &mut BuilderId, value: Value) {
        let effective = self.add_successor_builder(target);
        self.if_cmp_not_equal_zero(&mut Some(effective), value);
    }

    fn stack_push(&mut self, value: Value) {
        self.operand_stack_mut().push(value);
    }

    fn stack_pop(&mut self) -> Value {
        self.operand_stack_mut().pop()
    }

    fn stack_top(&self) -> Value {
        self.operand_stack().top()
    }

    fn stack_pick(&self, depth: usize) -> Value {
        self.operand_stack().pick(depth)
    }

    fn stack_drop(&mut self, count: usize) {
        self.operand_stack_mut().drop(count);
    }

    fn stack_dup(&mut self) {
        self.operand_stack_mut().dup();
    }
}
