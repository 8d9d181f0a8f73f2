//! The builder engine.
//!
//! A builder is a sequence of entries, each either a block or a nested
//! builder, bracketed by a distinguished entry block and exit block. All
//! builders of a method live in the [`MethodBuilder`]'s arena and are
//! addressed by [`BuilderId`]; an [`IlBuilder`] is a short-lived cursor that
//! pairs an id with mutable access to the method.
//!
//! Content is produced in two phases:
//! - **build**: operations are appended to the builder's current block,
//!   nested builders are appended to its sequence, and CFG edges are added
//!   as transfers are emitted;
//! - **connect** (`connect.rs`): blocks are counted and every builder's
//!   blocks are spliced into one flat layout.
//!
//! Blocks open lazily. A transfer closes the current block, and the next
//! operation opens a fresh one (with a fallthrough edge only if the closed
//! block can fall through). Appending a nested builder also closes the
//! current block, so content emitted afterwards never spills into the
//! child's blocks.
//!
//! Operation emission is split into traits by concern, in the same way the
//! method surface is documented: [`ArithmeticBuilder`], [`MemoryBuilder`],
//! [`CallBuilder`], [`ControlBuilder`] and [`HandlerBuilder`].

use cinder_il::{Arena, BlockId, DataType, Id, IlFunction, OpCode, Operation, Value};

use crate::bytecode::BytecodeState;
use crate::method::MethodBuilder;

pub mod arithmetic;
pub mod calls;
pub mod connect;
pub mod control;
pub mod handlers;
pub mod memory;


pub use arithmetic::ArithmeticBuilder;
pub use calls::{CallBuilder, FunctionSignature, HostFn};
pub use control::{Case, ControlBuilder, LoopTargets};
pub use handlers::HandlerBuilder;
pub use memory::MemoryBuilder;

// =============================================================================
// Builder Data
// =============================================================================

/// Builder identifier.
pub type BuilderId = Id<BuilderData>;

/// One entry in a builder's sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SequenceEntry {
    Block(BlockId),
    Builder(BuilderId),
}

/// Memoized block count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CountState {
    NotCounted,
    /// Counting has started but not finished; re-entrant visits see 0.
    InProgress,
    Counted(u32),
}

/// Per-builder state stored in the method's builder arena.
#[derive(Debug)]
pub struct BuilderData {
    pub(crate) name: Option<String>,
    pub(crate) sequence: Vec<SequenceEntry>,
    pub(crate) entry_block: BlockId,
    pub(crate) exit_block: BlockId,

    /// Block receiving operations, if one is open.
    pub(crate) current: Option<BlockId>,

    /// Closed block that still owes a fallthrough edge to whatever opens next.
    pub(crate) pending: Option<BlockId>,

    pub(crate) part_of_sequence: bool,
    pub(crate) is_handler: bool,
    pub(crate) connected: bool,
    pub(crate) count: CountState,

    /// This builder's slice of the final layout, exit block included.
    pub(crate) blocks: Vec<BlockId>,

    /// Derived when the builder is connected.
    pub(crate) comes_back: Option<bool>,

    pub(crate) bytecode: Option<Box<BytecodeState>>,
}

impl BuilderData {
    pub(crate) fn new(entry_block: BlockId, exit_block: BlockId) -> Self {
        BuilderData {
            name: None,
            sequence: vec![SequenceEntry::Block(entry_block)],
            entry_block,
            exit_block,
            current: Some(entry_block),
            pending: None,
            part_of_sequence: false,
            is_handler: false,
            connected: false,
            count: CountState::NotCounted,
            blocks: Vec::new(),
            comes_back: None,
            bytecode: None,
        }
    }

    /// Control can still leave through the end of the sequence.
    #[inline]
    pub(crate) fn falls_out(&self) -> bool {
        self.current.is_some() || self.pending.is_some()
    }

    #[inline]
    pub fn is_bytecode(&self) -> bool {
        self.bytecode.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Allocate a builder with fresh entry and exit blocks.
pub(crate) fn new_builder(
    builders: &mut Arena<BuilderData>,
    func: &mut IlFunction,
) -> BuilderId {
    let entry = func.new_block();
    let exit = func.new_block();
    builders.alloc(BuilderData::new(entry, exit))
}

// =============================================================================
// Builder Cursor
// =============================================================================

/// Cursor for emitting into one builder of a method.
pub struct IlBuilder<'m> {
    pub(crate) mb: &'m mut MethodBuilder,
    pub(crate) id: BuilderId,
}

impl<'m> IlBuilder<'m> {
    pub(crate) fn new(mb: &'m mut MethodBuilder, id: BuilderId) -> Self {
        IlBuilder { mb, id }
    }

    #[inline]
    pub fn id(&self) -> BuilderId {
        self.id
    }

    /// Cursor for another builder of the same method.
    pub fn at(&mut self, other: BuilderId) -> IlBuilder<'_> {
        IlBuilder::new(&mut *self.mb, other)
    }

    /// The method this builder belongs to.
    pub fn method(&mut self) -> &mut MethodBuilder {
        &mut *self.mb
    }

    pub fn entry_block(&self) -> BlockId {
        self.data().entry_block
    }

    pub fn exit_block(&self) -> BlockId {
        self.data().exit_block
    }

    /// Whether control reaches this builder's exit.
    ///
    /// Once connected this is the derived answer (a live path reaches the
    /// end of the builder); before that it only reports whether the last
    /// emitted operation leaves the end of the sequence open.
    pub fn comes_back(&self) -> bool {
        let data = self.data();
        data.comes_back.unwrap_or_else(|| data.falls_out())
    }

    /// Allocate a new builder that is not yet part of any sequence.
    pub fn orphan_builder(&mut self) -> BuilderId {
        self.mb.orphan_builder()
    }

    // =========================================================================
    // Internal Accessors
    // =========================================================================

    #[inline]
    pub(crate) fn data(&self) -> &BuilderData {
        &self.mb.builders[self.id]
    }

    #[inline]
    pub(crate) fn data_mut(&mut self) -> &mut BuilderData {
        &mut self.mb.builders[self.id]
    }

    #[inline]
    pub(crate) fn func(&mut self) -> &mut IlFunction {
        &mut self.mb.func
    }

    #[inline]
    pub(crate) fn trace(&self) -> bool {
        self.mb.config.trace_il
    }

    #[inline]
    pub(crate) fn value_type(&self, value: Value) -> DataType {
        self.mb.func.value_type(value)
    }

    // =========================================================================
    // Block Management
    // =========================================================================

    /// The open block, creating one (with any owed fallthrough edge) if
    /// the previous one was closed.
    pub(crate) fn ensure_open(&mut self) -> BlockId {
        if let Some(current) = self.data().current {
            return current;
        }
        let block = self.mb.func.new_block();
        self.append_block(block);
        block
    }

    /// Make `block` the next entry of the sequence and the open block.
    pub(crate) fn append_block(&mut self, block: BlockId) {
        let id = self.id;
        let data = &mut self.mb.builders[id];
        assert!(!data.connected, "builder {} is already connected", id);

        let from = data.current.take().or(data.pending.take());
        data.sequence.push(SequenceEntry::Block(block));
        data.current = Some(block);
        if let Some(from) = from {
            self.mb.func.add_edge(from, block);
        }
        if self.trace() {
            tracing::trace!(builder = %id, block = %block, "open block");
        }
    }

    /// Close the open block. `falls_through` records that the next
    /// opened block must receive a fallthrough edge from it.
    pub(crate) fn close_block(&mut self, falls_through: bool) {
        let data = self.data_mut();
        let closed = data.current.take();
        data.pending = if falls_through { closed } else { None };
    }

    // =========================================================================
    // Emission
    // =========================================================================

    /// Append a non-transfer operation.
    pub(crate) fn emit(&mut self, op: Operation) {
        debug_assert!(!op.is_terminator(), "use emit_transfer for {}", op.opcode);
        let block = self.ensure_open();
        self.mb.func.push_op(block, op);
    }

    /// Append an operation producing a value of type `ty`.
    pub(crate) fn emit_value(&mut self, opcode: OpCode, operands: &[Value], ty: DataType) -> Value {
        let result = self.mb.func.new_value(ty);
        self.emit(Operation::new(opcode, operands).with_result(result));
        result
    }

    /// Append a transfer, add an edge to every target, and close the block.
    ///
    /// Conditional transfers leave the closed block pending so the next
    /// opened block becomes its fallthrough.
    pub(crate) fn emit_transfer(&mut self, opcode: OpCode, operands: &[Value], targets: &[BlockId]) {
        let conditional = !opcode.is_unconditional_transfer();
        let block = self.ensure_open();
        self.mb
            .func
            .push_op(block, Operation::new(opcode, operands).with_targets(targets));
        for &target in targets {
            self.mb.func.add_edge(block, target);
        }
        self.close_block(conditional);
    }

    // =========================================================================
    // Sequencing
    // =========================================================================

    /// Append `child` to this builder's sequence.
    ///
    /// Control falls from the open (or pending) block into the child's
    /// entry; operations emitted afterwards go to a new block that the
    /// child's exit falls into.
    ///
    /// # Panics
    ///
    /// Panics if `child` is already part of a sequence, is this builder,
    /// or is the method body.
    pub fn append_builder(&mut self, child: BuilderId) {
        let id = self.id;
        assert_ne!(child, id, "builder {} appended to itself", id);
        assert_ne!(
            child, self.mb.root,
            "the method body cannot be appended to builder {}",
            id
        );
        {
            let data = &mut self.mb.builders[child];
            assert!(
                !data.part_of_sequence,
                "builder {} is already part of a sequence",
                child
            );
            data.part_of_sequence = true;
        }
        let child_entry = self.mb.builders[child].entry_block;
        let child_exit = self.mb.builders[child].exit_block;

        let data = &mut self.mb.builders[id];
        assert!(!data.connected, "builder {} is already connected", id);
        let from = data.current.take().or(data.pending.take());
        data.sequence.push(SequenceEntry::Builder(child));
        data.pending = Some(child_exit);
        if let Some(from) = from {
            self.mb.func.add_edge(from, child_entry);
        }

        if self.mb.builders[child].is_handler {
            self.mb.func.block_mut(child_entry).is_handler = true;
        }
        if self.trace() {
            tracing::debug!(builder = %id, child = %child, "append builder");
        }
    }

    /// Resolve an optional transfer target, allocating an orphan builder
    /// when none was supplied. The returned id must be used for the
    /// transfer itself.
    pub fn prepare_target(&mut self, target: &mut Option<BuilderId>) -> BuilderId {
        match *target {
            Some(id) => id,
            None => {
                let id = self.mb.orphan_builder();
                *target = Some(id);
                id
            }
        }
    }

    /// Mark a builder as an exception handler. Its entry block is cold.
    pub(crate) fn mark_handler(&mut self, handler: BuilderId) {
        self.mb.builders[handler].is_handler = true;
        let entry = self.mb.builders[handler].entry_block;
        let block = self.mb.func.block_mut(entry);
        block.is_handler = true;
        block.is_cold = true;
    }

    /// Mark the entry block of `id` as rarely executed.
    pub fn mark_cold(&mut self, id: BuilderId) {
        let entry = self.mb.builders[id].entry_block;
        self.mb.func.block_mut(entry).is_cold = true;
    }
}
