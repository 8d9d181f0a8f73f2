//! IL opcodes.
//!
//! Opcodes are grouped the way builders emit them:
//! - **Constants**: integer and floating-point literals
//! - **Locals**: named symbol loads/stores, plus `StoreOver` which rewrites
//!   the storage behind an existing value
//! - **Arithmetic / comparison / conversion**
//! - **Memory**: address computation, loads, stores, stack allocation
//! - **Calls** and **atomics**
//! - **Transfers**: goto, conditional branch, return, switch
//! - **Transactions**: hardware transactional memory regions
//!
//! Transfer opcodes carry their targets on the [`Operation`](crate::Operation)
//! rather than in the opcode, so the engine can rewrite CFG edges without
//! touching opcode payloads.

use std::fmt;

use smallvec::SmallVec;

use crate::function::SymbolId;

// =============================================================================
// Arithmetic Operators
// =============================================================================

/// Arithmetic and bitwise operator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArithOp {
    // Binary operations
    /// Addition: a + b
    Add = 0,
    /// Subtraction: a - b
    Sub = 1,
    /// Multiplication: a * b
    Mul = 2,
    /// Signed division: a / b
    Div = 3,
    /// Signed remainder: a % b
    Rem = 4,
    /// Bitwise AND: a & b
    And = 5,
    /// Bitwise OR: a | b
    Or = 6,
    /// Bitwise XOR: a ^ b
    Xor = 7,
    /// Left shift: a << b
    ShiftL = 8,
    /// Arithmetic right shift: a >> b
    ShiftR = 9,
    /// Logical right shift: a >>> b
    UnsignedShiftR = 10,

    // Unary operations
    /// Negation: -a
    Neg = 16,
}

impl ArithOp {
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            ArithOp::Add | ArithOp::Mul | ArithOp::And | ArithOp::Or | ArithOp::Xor
        )
    }

    #[inline]
    pub const fn is_unary(self) -> bool {
        (self as u8) >= 16
    }

    /// Bitwise and shift operators only accept integer operands.
    #[inline]
    pub const fn is_integer_only(self) -> bool {
        matches!(
            self,
            ArithOp::And
                | ArithOp::Or
                | ArithOp::Xor
                | ArithOp::ShiftL
                | ArithOp::ShiftR
                | ArithOp::UnsignedShiftR
        )
    }

    /// Operators that have an overflow-checked form.
    #[inline]
    pub const fn can_overflow(self) -> bool {
        matches!(self, ArithOp::Add | ArithOp::Sub | ArithOp::Mul)
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "rem",
            ArithOp::And => "and",
            ArithOp::Or => "or",
            ArithOp::Xor => "xor",
            ArithOp::ShiftL => "shl",
            ArithOp::ShiftR => "shr",
            ArithOp::UnsignedShiftR => "ushr",
            ArithOp::Neg => "neg",
        }
    }
}

// =============================================================================
// Comparison Operators
// =============================================================================

/// Comparison operator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CmpOp {
    /// Equal: a == b
    Eq = 0,
    /// Not equal: a != b
    Ne = 1,
    /// Less than: a < b
    Lt = 2,
    /// Less than or equal: a <= b
    Le = 3,
    /// Greater than: a > b
    Gt = 4,
    /// Greater than or equal: a >= b
    Ge = 5,
    /// Unsigned less than
    ULt = 6,
    /// Unsigned less than or equal
    ULe = 7,
    /// Unsigned greater than
    UGt = 8,
    /// Unsigned greater than or equal
    UGe = 9,
}

impl CmpOp {
    /// The comparison that holds exactly when this one does not.
    #[inline]
    pub const fn inverse(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::ULt => CmpOp::UGe,
            CmpOp::ULe => CmpOp::UGt,
            CmpOp::UGt => CmpOp::ULe,
            CmpOp::UGe => CmpOp::ULt,
        }
    }

    /// The comparison to use when the operands are swapped.
    #[inline]
    pub const fn swap(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            CmpOp::ULt => CmpOp::UGt,
            CmpOp::ULe => CmpOp::UGe,
            CmpOp::UGt => CmpOp::ULt,
            CmpOp::UGe => CmpOp::ULe,
        }
    }

    #[inline]
    pub const fn is_unsigned(self) -> bool {
        (self as u8) >= 6
    }

    /// Evaluate on signed 64-bit operands (unsigned forms reinterpret the bits).
    pub const fn eval_int(self, a: i64, b: i64) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::ULt => (a as u64) < (b as u64),
            CmpOp::ULe => (a as u64) <= (b as u64),
            CmpOp::UGt => (a as u64) > (b as u64),
            CmpOp::UGe => (a as u64) >= (b as u64),
        }
    }

    /// Evaluate on floating-point operands. Unsigned forms behave as signed.
    pub fn eval_float(self, a: f64, b: f64) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt | CmpOp::ULt => a < b,
            CmpOp::Le | CmpOp::ULe => a <= b,
            CmpOp::Gt | CmpOp::UGt => a > b,
            CmpOp::Ge | CmpOp::UGe => a >= b,
        }
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
            CmpOp::ULt => "ult",
            CmpOp::ULe => "ule",
            CmpOp::UGt => "ugt",
            CmpOp::UGe => "uge",
        }
    }
}

// =============================================================================
// Opcodes
// =============================================================================

/// The operation an [`Operation`](crate::Operation) performs.
///
/// Operand conventions are listed per variant; the result type is carried
/// by the result value, not the opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum OpCode {
    // Constants
    /// Integer (or address) literal.
    ConstInt(i64),
    /// Floating-point literal.
    ConstFloat(f64),

    // Locals
    /// Read a named symbol.
    Load(SymbolId),
    /// `[value]`: write a named symbol.
    Store(SymbolId),
    /// `[dest, src]`: overwrite the storage backing `dest` with `src`.
    StoreOver,

    // Arithmetic
    /// `[lhs, rhs]` or `[operand]` for unary operators.
    Arith(ArithOp),
    /// `[lhs, rhs]` producing an `Int32` 0/1.
    Compare(CmpOp),
    /// `[value]` converted to the result type.
    Convert { unsigned: bool },
    /// `[lhs, rhs]`; on overflow control leaves through the block's
    /// exception successor instead of continuing.
    CheckedArith(ArithOp),

    // Memory
    /// `[address]`: load a value of the result type.
    LoadAt,
    /// `[address, value]`: store a value.
    StoreAt,
    /// `[base, index]`: `base + index * element_size`.
    IndexAt { element_size: u32 },
    /// `[base]`: `base + offset`.
    OffsetAt { offset: u32 },
    /// Reserve `size` bytes of frame storage and produce its address.
    LocalAlloc { size: u32 },
    /// `[address, value]`: atomically add, producing the previous value.
    AtomicAdd,

    // Calls
    /// `[args...]`: call a resolved function by name.
    Call { name: Box<str> },

    // Transfers
    /// Unconditional jump to `targets[0]`.
    Goto,
    /// `[lhs, rhs]`: jump to `targets[0]` if the comparison holds,
    /// otherwise fall through.
    Branch(CmpOp),
    /// `[]` or `[value]`: leave the method.
    Return,
    /// `[selector]`: jump to `targets[i + 1]` when the selector equals
    /// `cases[i]`, otherwise to `targets[0]`.
    Switch { cases: SmallVec<[i64; 4]> },

    // Transactions
    /// Start a transaction. `targets` are `[persistent_failure,
    /// transient_failure]`; the transaction body is the fallthrough.
    TransactionBegin,
    /// Commit the innermost transaction.
    TransactionEnd,
    /// Abort the innermost transaction.
    TransactionAbort,
}

impl OpCode {
    /// Ends a block with no fallthrough.
    #[inline]
    pub fn is_unconditional_transfer(&self) -> bool {
        matches!(
            self,
            OpCode::Goto | OpCode::Return | OpCode::Switch { .. } | OpCode::TransactionAbort
        )
    }

    /// Ends a block (with or without fallthrough).
    #[inline]
    pub fn is_terminator(&self) -> bool {
        self.is_unconditional_transfer()
            || matches!(self, OpCode::Branch(_) | OpCode::TransactionBegin)
    }

    /// Has an exceptional successor.
    #[inline]
    pub fn can_throw(&self) -> bool {
        matches!(self, OpCode::CheckedArith(_))
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpCode::ConstInt(v) => write!(f, "const {}", v),
            OpCode::ConstFloat(v) => write!(f, "const {:?}", v),
            OpCode::Load(sym) => write!(f, "load %{}", sym),
            OpCode::Store(sym) => write!(f, "store %{}", sym),
            OpCode::StoreOver => f.write_str("storeover"),
            OpCode::Arith(op) => f.write_str(op.mnemonic()),
            OpCode::Compare(op) => write!(f, "cmp.{}", op.mnemonic()),
            OpCode::Convert { unsigned: false } => f.write_str("convert"),
            OpCode::Convert { unsigned: true } => f.write_str("convert.u"),
            OpCode::CheckedArith(op) => write!(f, "{}.ovf", op.mnemonic()),
            OpCode::LoadAt => f.write_str("loadat"),
            OpCode::StoreAt => f.write_str("storeat"),
            OpCode::IndexAt { element_size } => write!(f, "indexat x{}", element_size),
            OpCode::OffsetAt { offset } => write!(f, "offsetat +{}", offset),
            OpCode::LocalAlloc { size } => write!(f, "localalloc {}", size),
            OpCode::AtomicAdd => f.write_str("atomicadd"),
            OpCode::Call { name } => write!(f, "call {}", name),
            OpCode::Goto => f.write_str("goto"),
            OpCode::Branch(op) => write!(f, "if.{}", op.mnemonic()),
            OpCode::Return => f.write_str("return"),
            OpCode::Switch { cases } => write!(f, "switch {:?}", cases.as_slice()),
            OpCode::TransactionBegin => f.write_str("tbegin"),
            OpCode::TransactionEnd => f.write_str("tend"),
            OpCode::TransactionAbort => f.write_str("tabort"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmp_inverse_is_involution() {
        for op in [
            CmpOp::Eq,
            CmpOp::Ne,
            CmpOp::Lt,
            CmpOp::Le,
            CmpOp::Gt,
            CmpOp::Ge,
            CmpOp::ULt,
            CmpOp::ULe,
            CmpOp::UGt,
            CmpOp::UGe,
        ] {
            assert_eq!(op.inverse().inverse(), op);
            assert_eq!(op.swap().swap(), op);
            for (a, b) in [(-1i64, 2i64), (3, 3), (7, -7)] {
                assert_ne!(op.eval_int(a, b), op.inverse().eval_int(a, b));
                assert_eq!(op.eval_int(a, b), op.swap().eval_int(b, a));
            }
        }
    }

    #[test]
    fn test_unsigned_compare_reinterprets_bits() {
        assert!(CmpOp::Lt.eval_int(-1, 0));
        assert!(!CmpOp::ULt.eval_int(-1, 0));
        assert!(CmpOp::UGt.eval_int(-1, 0));
    }

    #[test]
    fn test_transfer_classification() {
        assert!(OpCode::Goto.is_unconditional_transfer());
        assert!(OpCode::Return.is_terminator());
        assert!(!OpCode::Branch(CmpOp::Eq).is_unconditional_transfer());
        assert!(OpCode::Branch(CmpOp::Eq).is_terminator());
        assert!(OpCode::TransactionBegin.is_terminator());
        assert!(!OpCode::Arith(ArithOp::Add).is_terminator());
        assert!(OpCode::CheckedArith(ArithOp::Mul).can_throw());
    }

    #[test]
    fn test_arith_classification() {
        assert!(ArithOp::Neg.is_unary());
        assert!(!ArithOp::Sub.is_unary());
        assert!(ArithOp::Xor.is_integer_only());
        assert!(ArithOp::Mul.can_overflow());
        assert!(!ArithOp::Div.can_overflow());
    }
}
