//! Simulated operand stack.
//!
//! Pushes and pops only move values on a build-time stack; nothing is
//! emitted until the stack is committed. Slot `i` (0 is the bottom) lives
//! at `base + i` elements for a stack that grows up, `base - i` for one
//! that grows down. The stack pointer register addresses slot
//! `depth + offset`: with the default offset of -1 it points at the top
//! element, with 0 at the first free slot.

use cinder_il::{DataType, SymbolId, Value};
use smallvec::SmallVec;

use super::{merge_values, VirtualMachineRegister, VirtualMachineState};
use crate::builder::{ArithmeticBuilder, IlBuilder, MemoryBuilder};
use crate::error::BuildResult;

/// Operand stack backed by memory addressed through a stack pointer
/// register.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachineOperandStack {
    stack: SmallVec<[Value; 8]>,
    element: DataType,
    top: VirtualMachineRegister,
    /// Local holding the address of slot 0.
    base: SymbolId,
    grows_up: bool,
    offset: i32,
}

impl VirtualMachineOperandStack {
    /// An empty stack whose pointer is `top`. Records the current stack
    /// pointer as the stack's base.
    pub fn new(
        b: &mut IlBuilder<'_>,
        top: VirtualMachineRegister,
        element: DataType,
        grows_up: bool,
        offset: i32,
    ) -> BuildResult<Self> {
        let base_name = format!("{}.base", b.method().function().symbol(top.local()).name);
        let base = b.local_symbol(&base_name, DataType::Address)?;

        let sp = top.load(b);
        let back = if grows_up { -offset } else { offset };
        let back = b.const_i64(back as i64);
        let base_address = b.index_at(element, sp, back);
        b.store_symbol(base, base_address);

        Ok(VirtualMachineOperandStack {
            stack: SmallVec::new(),
            element,
            top,
            base,
            grows_up,
            offset,
        })
    }

    /// Stack whose pointer addresses the top element, growing up.
    pub fn growing_up(
        b: &mut IlBuilder<'_>,
        top: VirtualMachineRegister,
        element: DataType,
    ) -> BuildResult<Self> {
        Self::new(b, top, element, true, -1)
    }

    // =========================================================================
    // Stack Operations
    // =========================================================================

    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    #[inline]
    pub fn element(&self) -> DataType {
        self.element
    }

    pub fn stack_pointer(&self) -> &VirtualMachineRegister {
        &self.top
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// # Panics
    ///
    /// Panics on an empty stack.
    pub fn pop(&mut self) -> Value {
        self.stack
            .pop()
            .unwrap_or_else(|| panic!("pop from an empty operand stack"))
    }

    /// # Panics
    ///
    /// Panics on an empty stack.
    pub fn top(&self) -> Value {
        self.pick(0)
    }

    /// The value `depth` entries below the top.
    ///
    /// # Panics
    ///
    /// Panics if the stack is not deep enough.
    pub fn pick(&self, depth: usize) -> Value {
        assert!(
            depth < self.stack.len(),
            "pick {} from an operand stack of depth {}",
            depth,
            self.stack.len()
        );
        self.stack[self.stack.len() - 1 - depth]
    }

    /// Discard the top `count` values.
    pub fn drop(&mut self, count: usize) {
        assert!(
            count <= self.stack.len(),
            "drop {} from an operand stack of depth {}",
            count,
            self.stack.len()
        );
        let depth = self.stack.len() - count;
        self.stack.truncate(depth);
    }

    pub fn dup(&mut self) {
        let top = self.top();
        self.stack.push(top);
    }

    /// Values from the bottom up.
    pub fn values(&self) -> &[Value] {
        &self.stack
    }

    pub(crate) fn values_mut(&mut self) -> &mut [Value] {
        &mut self.stack
    }

    fn slot_address(&self, b: &mut IlBuilder<'_>, base: Value, slot: i64) -> Value {
        let index = if self.grows_up { slot } else { -slot };
        let index = b.const_i64(index);
        b.index_at(self.element, base, index)
    }
}

impl VirtualMachineState for VirtualMachineOperandStack {
    fn commit(&self, b: &mut IlBuilder<'_>) {
        let base = b.load_symbol(self.base);
        for (slot, &value) in self.stack.iter().enumerate() {
            let address = self.slot_address(b, base, slot as i64);
            b.store_at(address, value);
        }
        let sp = self.slot_address(b, base, self.stack.len() as i64 + self.offset as i64);
        self.top.store(b, sp);
        self.top.commit(b);
    }

    fn reload(&mut self, b: &mut IlBuilder<'_>) {
        self.top.reload(b);
        let base = b.load_symbol(self.base);
        for slot in 0..self.stack.len() {
            let address = self.slot_address(b, base, slot as i64);
            self.stack[slot] = b.load_at(self.element, address);
        }
    }

    /// # Panics
    ///
    /// Panics if the stacks differ in depth or storage.
    fn merge_into(&self, other: &Self, b: &mut IlBuilder<'_>) {
        assert!(
            self.state_eq(other),
            "merging operand stacks of depth {} and {}",
            self.depth(),
            other.depth()
        );
        merge_values(b, &self.stack, &other.stack);
    }

    fn state_eq(&self, other: &Self) -> bool {
        self.stack.len() == other.stack.len()
            && self.element == other.element
            && self.base == other.base
            && self.top.state_eq(&other.top)
    }
}
