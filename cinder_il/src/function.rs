//! The per-method IL container.
//!
//! An [`IlFunction`] owns every block, value and symbol created while a
//! method is built. Builders refer to these through typed IDs. Once the
//! builder tree is connected the function also carries a linear block
//! layout, which is what the verifier, the listing and the evaluator walk.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::arena::{Arena, BitSet, Id};
use crate::block::{Block, BlockId};
use crate::operation::{Operation, Value, ValueData};
use crate::types::DataType;

// =============================================================================
// Symbols
// =============================================================================

/// How a symbol receives its initial value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// The n-th method argument.
    Parameter(u32),
    /// A local variable (zero-initialized).
    Local,
}

/// A named storage location in the method frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub ty: DataType,
    pub kind: SymbolKind,
}

/// Symbol identifier.
pub type SymbolId = Id<Symbol>;

// =============================================================================
// IL Function
// =============================================================================

/// Blocks, values and symbols of one method.
#[derive(Clone)]
pub struct IlFunction {
    name: String,
    blocks: Arena<Block>,
    values: Arena<ValueData>,
    symbols: Arena<Symbol>,
    symbols_by_name: FxHashMap<String, SymbolId>,
    parameters: Vec<SymbolId>,
    return_type: DataType,

    /// Entry block of the method.
    pub entry: BlockId,

    /// Method exit block; always laid out last.
    pub exit: BlockId,

    layout: Vec<BlockId>,
}

impl IlFunction {
    /// Create a function with fresh entry and exit blocks.
    pub fn new(name: impl Into<String>) -> Self {
        let mut blocks = Arena::with_capacity(64);
        let entry = blocks.alloc(Block::new());
        let exit = blocks.alloc(Block::new());
        IlFunction {
            name: name.into(),
            blocks,
            values: Arena::with_capacity(256),
            symbols: Arena::new(),
            symbols_by_name: FxHashMap::default(),
            parameters: Vec::new(),
            return_type: DataType::NoType,
            entry,
            exit,
            layout: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[inline]
    pub fn return_type(&self) -> DataType {
        self.return_type
    }

    pub fn set_return_type(&mut self, ty: DataType) {
        self.return_type = ty;
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Allocate an empty, unplaced block.
    pub fn new_block(&mut self) -> BlockId {
        self.blocks.alloc(Block::new())
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id]
    }

    /// Number of blocks allocated, placed or not.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks.iter()
    }

    /// Append an operation to a block.
    pub fn push_op(&mut self, block: BlockId, op: Operation) {
        self.blocks[block].operations.push(op);
    }

    /// Add a normal CFG edge. Duplicate edges are ignored.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        if !self.blocks[from].successors.contains(&to) {
            self.blocks[from].successors.push(to);
        }
        if !self.blocks[to].predecessors.contains(&from) {
            self.blocks[to].predecessors.push(from);
        }
    }

    /// Add an exceptional CFG edge from a block with a throwing operation.
    pub fn add_exception_edge(&mut self, from: BlockId, handler: BlockId) {
        if !self.blocks[from].exception_successors.contains(&handler) {
            self.blocks[from].exception_successors.push(handler);
        }
        if !self.blocks[handler].predecessors.contains(&from) {
            self.blocks[handler].predecessors.push(from);
        }
    }

    pub fn has_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.blocks[from].successors.contains(&to)
    }

    // =========================================================================
    // Values
    // =========================================================================

    pub fn new_value(&mut self, ty: DataType) -> Value {
        self.values.alloc(ValueData { ty })
    }

    #[inline]
    pub fn value_type(&self, value: Value) -> DataType {
        self.values[value].ty
    }

    #[inline]
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    // =========================================================================
    // Symbols
    // =========================================================================

    /// Define a symbol, or return the existing one with that name.
    pub fn define_symbol(&mut self, name: &str, ty: DataType, kind: SymbolKind) -> SymbolId {
        if let Some(&id) = self.symbols_by_name.get(name) {
            return id;
        }
        let id = self.symbols.alloc(Symbol {
            name: name.to_owned(),
            ty,
            kind,
        });
        self.symbols_by_name.insert(name.to_owned(), id);
        if let SymbolKind::Parameter(_) = kind {
            self.parameters.push(id);
        }
        id
    }

    #[inline]
    pub fn lookup_symbol(&self, name: &str) -> Option<SymbolId> {
        self.symbols_by_name.get(name).copied()
    }

    #[inline]
    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }

    pub fn symbols(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols.iter()
    }

    /// Parameters in definition order.
    #[inline]
    pub fn parameters(&self) -> &[SymbolId] {
        &self.parameters
    }

    // =========================================================================
    // Layout
    // =========================================================================

    /// Fix the linear block order and thread `layout_next` through it.
    pub fn set_layout(&mut self, layout: Vec<BlockId>) {
        for (i, &block) in layout.iter().enumerate() {
            self.blocks[block].layout_next = layout.get(i + 1).copied();
        }
        self.layout = layout;
    }

    /// Blocks in layout order. Empty until the method is connected.
    #[inline]
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    /// Blocks reachable from the entry over normal and exceptional edges.
    pub fn reachable(&self) -> BitSet {
        let mut seen = BitSet::with_capacity(self.blocks.len());
        let mut stack = vec![self.entry];
        seen.insert(self.entry.as_usize());
        while let Some(block) = stack.pop() {
            for succ in self.blocks[block].all_successors() {
                if seen.insert(succ.as_usize()) {
                    stack.push(succ);
                }
            }
        }
        seen
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Check structural consistency of a connected function.
    pub fn verify(&self) -> Result<(), String> {
        if self.layout.first() != Some(&self.entry) {
            return Err(format!("layout does not start at entry B{}", self.entry));
        }
        if self.layout.last() != Some(&self.exit) {
            return Err(format!("layout does not end at exit B{}", self.exit));
        }

        let mut placed = FxHashSet::default();
        for &block in &self.layout {
            if !placed.insert(block) {
                return Err(format!("B{} placed more than once", block));
            }
        }

        let terminated = self
            .layout
            .iter()
            .filter(|&&b| self.blocks[b].layout_next.is_none())
            .count();
        if terminated != 1 {
            return Err(format!("layout chain terminated {} times", terminated));
        }

        let reachable = self.reachable();
        for &id in &self.layout {
            let block = &self.blocks[id];
            for succ in block.all_successors() {
                if !placed.contains(&succ) {
                    return Err(format!("B{} has an edge to unplaced B{}", id, succ));
                }
            }
            for (i, op) in block.operations.iter().enumerate() {
                if op.is_terminator() && i + 1 != block.operations.len() {
                    return Err(format!("B{} has a terminator before its end", id));
                }
                for target in &op.targets {
                    if !block.successors.contains(target) {
                        return Err(format!("B{} branches to B{} without an edge", id, target));
                    }
                }
                if op.opcode.can_throw() && block.exception_successors.is_empty() {
                    return Err(format!("B{} can throw but has no handler", id));
                }
            }
            if id != self.exit && reachable.contains(id.as_usize()) && block.falls_through() {
                match block.layout_next {
                    Some(next) if block.successors.contains(&next) => {}
                    Some(next) => {
                        return Err(format!("B{} falls into B{} without an edge", id, next));
                    }
                    None => return Err(format!("B{} falls off the end of the layout", id)),
                }
            }
        }

        for block in self.blocks.ids() {
            if reachable.contains(block.as_usize()) && !placed.contains(&block) {
                return Err(format!("reachable B{} was never placed", block));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for IlFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for IlFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method {}(", self.name)?;
        for (i, &param) in self.parameters.iter().enumerate() {
            let sym = &self.symbols[param];
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "%{} {}: {}", param, sym.name, sym.ty)?;
        }
        writeln!(f, ") -> {}", self.return_type)?;

        for (id, sym) in self.symbols.iter() {
            if sym.kind == SymbolKind::Local {
                writeln!(f, "  local %{} {}: {}", id, sym.name, sym.ty)?;
            }
        }

        let order: Vec<BlockId> = if self.layout.is_empty() {
            self.blocks.ids().collect()
        } else {
            self.layout.clone()
        };
        for id in order {
            let block = &self.blocks[id];
            write!(f, "B{}", id)?;
            if id == self.entry {
                f.write_str(" (entry)")?;
            }
            if id == self.exit {
                f.write_str(" (exit)")?;
            }
            if block.is_handler {
                f.write_str(" (handler)")?;
            }
            if block.is_cold {
                f.write_str(" (cold)")?;
            }
            f.write_str(":")?;
            if !block.successors.is_empty() {
                f.write_str("  succs:")?;
                for succ in &block.successors {
                    write!(f, " B{}", succ)?;
                }
            }
            if !block.exception_successors.is_empty() {
                f.write_str("  catch:")?;
                for succ in &block.exception_successors {
                    write!(f, " B{}", succ)?;
                }
            }
            writeln!(f)?;
            for op in &block.operations {
                writeln!(f, "    {}", op)?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
