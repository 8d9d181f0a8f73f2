//! Basic blocks.

use smallvec::SmallVec;

use crate::arena::Id;
use crate::operation::Operation;

/// Block identifier.
pub type BlockId = Id<Block>;

/// Edge list of a block.
pub type Edges = SmallVec<[BlockId; 2]>;

/// A basic block: a straight-line operation list with explicit edges.
///
/// Edges are added by the builder engine, never inferred from operations.
/// `layout_next` is assigned when the function is connected and gives the
/// block control falls into when the last operation is not an
/// unconditional transfer.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub operations: Vec<Operation>,
    pub successors: Edges,
    pub predecessors: Edges,
    /// Handlers reached when an operation in this block throws.
    pub exception_successors: Edges,
    /// Rarely executed: handler entries and transaction failure paths.
    pub is_cold: bool,
    /// Entry block of an exception handler.
    pub is_handler: bool,
    pub layout_next: Option<BlockId>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// The last operation if it ends the block.
    pub fn terminator(&self) -> Option<&Operation> {
        self.operations.last().filter(|op| op.is_terminator())
    }

    /// Control can continue to `layout_next` after the last operation.
    pub fn falls_through(&self) -> bool {
        self.operations
            .last()
            .map_or(true, |op| !op.is_unconditional_transfer())
    }

    /// Normal and exceptional successors.
    pub fn all_successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.successors
            .iter()
            .chain(self.exception_successors.iter())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::OpCode;

    #[test]
    fn test_empty_block_falls_through() {
        let block = Block::new();
        assert!(block.is_empty());
        assert!(block.falls_through());
        assert!(block.terminator().is_none());
    }

    #[test]
    fn test_goto_block_does_not_fall_through() {
        let mut block = Block::new();
        block
            .operations
            .push(Operation::new(OpCode::Goto, &[]).with_targets(&[BlockId::new(3)]));
        assert!(!block.falls_through());
        assert_eq!(block.terminator().map(|op| op.targets[0]), Some(BlockId::new(3)));
    }
}
