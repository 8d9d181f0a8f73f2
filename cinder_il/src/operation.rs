//! Operations and values.
//!
//! An [`Operation`] is one entry in a block's operation list. Values are
//! handles to temporaries owned by the function; a value is produced by
//! exactly one operation, but its backing storage can be overwritten by
//! `StoreOver`, which is how diverging VM states are resynchronized at
//! merge points.

use std::fmt;

use smallvec::SmallVec;

use crate::arena::Id;
use crate::block::BlockId;
use crate::operators::OpCode;
use crate::types::DataType;

// =============================================================================
// Values
// =============================================================================

/// Per-value data stored in the function's value arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueData {
    pub ty: DataType,
}

/// Handle to a value computed within one method.
pub type Value = Id<ValueData>;

// =============================================================================
// Operation
// =============================================================================

/// Operand list; most operations have at most four operands.
pub type Operands = SmallVec<[Value; 4]>;

/// Transfer targets of an operation.
pub type Targets = SmallVec<[BlockId; 2]>;

/// A single IL operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub opcode: OpCode,
    pub operands: Operands,
    pub result: Option<Value>,
    pub targets: Targets,
}

impl Operation {
    /// An operation with operands and no result.
    pub fn new(opcode: OpCode, operands: &[Value]) -> Self {
        Operation {
            opcode,
            operands: SmallVec::from_slice(operands),
            result: None,
            targets: SmallVec::new(),
        }
    }

    /// Attach a result value.
    #[inline]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Attach transfer targets.
    #[inline]
    pub fn with_targets(mut self, targets: &[BlockId]) -> Self {
        self.targets = SmallVec::from_slice(targets);
        self
    }

    #[inline]
    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }

    #[inline]
    pub fn is_unconditional_transfer(&self) -> bool {
        self.opcode.is_unconditional_transfer()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(result) = self.result {
            write!(f, "v{} = ", result)?;
        }
        write!(f, "{}", self.opcode)?;
        for (i, operand) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}v{}", sep, operand)?;
        }
        if !self.targets.is_empty() {
            f.write_str(" ->")?;
            for target in &self.targets {
                write!(f, " B{}", target)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::CmpOp;

    #[test]
    fn test_operation_display() {
        let lhs = Value::new(1);
        let rhs = Value::new(2);
        let op = Operation::new(OpCode::Branch(CmpOp::Lt), &[lhs, rhs])
            .with_targets(&[BlockId::new(4)]);
        assert_eq!(op.to_string(), "if.lt v1, v2 -> B4");
        assert!(op.is_terminator());
        assert!(!op.is_unconditional_transfer());

        let konst = Operation::new(OpCode::ConstInt(7), &[]).with_result(Value::new(0));
        assert_eq!(konst.to_string(), "v0 = const 7");
    }
}
