//! Reference evaluator for connected IL.
//!
//! Executes an [`IlFunction`] directly over its block layout and explicit
//! edges. It is deliberately simple: every value is an `i64` or `f64`
//! [`Scalar`], memory is a flat little-endian byte array, and calls go to
//! host closures registered by name. Tests use it to check that a built
//! graph computes what the builder calls describe.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::block::BlockId;
use crate::function::{IlFunction, SymbolId, SymbolKind};
use crate::operation::{Operation, Value};
use crate::operators::{ArithOp, OpCode};
use crate::types::DataType;

// =============================================================================
// Scalars
// =============================================================================

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// Integers and addresses, sign-extended to 64 bits.
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn as_int(self) -> i64 {
        match self {
            Scalar::Int(v) => v,
            Scalar::Float(v) => v as i64,
        }
    }

    pub fn as_float(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }

    /// The zero value of a type.
    pub fn zero(ty: DataType) -> Scalar {
        if ty.element().is_floating_point() {
            Scalar::Float(0.0)
        } else {
            Scalar::Int(0)
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

/// Truncate and sign-extend an integer to the width of `ty`.
pub fn wrap_int(ty: DataType, v: i64) -> i64 {
    match ty {
        DataType::Int8 => v as i8 as i64,
        DataType::Int16 => v as i16 as i64,
        DataType::Int32 => v as i32 as i64,
        _ => v,
    }
}

/// Zero-extend an integer of width `ty`.
fn zero_extend(ty: DataType, v: i64) -> i64 {
    match ty {
        DataType::Int8 => v as u8 as i64,
        DataType::Int16 => v as u16 as i64,
        DataType::Int32 => v as u32 as i64,
        _ => v,
    }
}

fn int_range(ty: DataType) -> (i128, i128) {
    match ty {
        DataType::Int8 => (i8::MIN as i128, i8::MAX as i128),
        DataType::Int16 => (i16::MIN as i128, i16::MAX as i128),
        DataType::Int32 => (i32::MIN as i128, i32::MAX as i128),
        _ => (i64::MIN as i128, i64::MAX as i128),
    }
}

fn round_float(ty: DataType, v: f64) -> f64 {
    if ty == DataType::Float {
        v as f32 as f64
    } else {
        v
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failure while evaluating IL.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("function {0} has not been connected")]
    NotConnected(String),

    #[error("expected {expected} arguments, got {got}")]
    ArgumentCount { expected: usize, got: usize },

    #[error("value v{0} read before it was computed")]
    UndefinedValue(u32),

    #[error("memory access of {size} bytes out of bounds at {address:#x}")]
    OutOfBounds { address: i64, size: u32 },

    #[error("integer division by zero")]
    DivisionByZero,

    #[error("no host implementation registered for {0}")]
    UnknownCallee(String),

    #[error("step limit of {0} blocks exceeded")]
    StepLimit(u64),

    #[error("overflow in B{0} with no handler")]
    UnhandledOverflow(u32),

    #[error("{0} outside of a transaction")]
    NoTransaction(&'static str),

    #[error("B{0} falls off the end of the layout")]
    FellOffLayout(u32),
}

// =============================================================================
// Memory
// =============================================================================

/// Flat byte-addressed memory. Address 0 is never handed out.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
}

const MEMORY_BASE: i64 = 0x1000;

impl Memory {
    pub fn new() -> Self {
        Memory { bytes: Vec::new() }
    }

    /// Reserve `size` zeroed bytes aligned to 8 and return their address.
    pub fn alloc(&mut self, size: u32) -> i64 {
        let start = self.bytes.len().next_multiple_of(8);
        self.bytes.resize(start + size.max(1) as usize, 0);
        MEMORY_BASE + start as i64
    }

    fn range(&self, address: i64, size: u32) -> Result<std::ops::Range<usize>, EvalError> {
        let oob = EvalError::OutOfBounds { address, size };
        let start = address.checked_sub(MEMORY_BASE).ok_or(oob.clone())?;
        let start = usize::try_from(start).map_err(|_| oob.clone())?;
        let end = start + size as usize;
        if end > self.bytes.len() {
            return Err(oob);
        }
        Ok(start..end)
    }

    pub fn load(&self, address: i64, ty: DataType) -> Result<Scalar, EvalError> {
        let range = self.range(address, ty.size())?;
        let mut raw = [0u8; 8];
        raw[..range.len()].copy_from_slice(&self.bytes[range]);
        let bits = u64::from_le_bytes(raw);
        Ok(match ty {
            DataType::Float => Scalar::Float(f32::from_bits(bits as u32) as f64),
            DataType::Double => Scalar::Float(f64::from_bits(bits)),
            _ => Scalar::Int(wrap_int(ty, bits as i64)),
        })
    }

    pub fn store(&mut self, address: i64, ty: DataType, value: Scalar) -> Result<(), EvalError> {
        let range = self.range(address, ty.size())?;
        let bits = match ty {
            DataType::Float => (value.as_float() as f32).to_bits() as u64,
            DataType::Double => value.as_float().to_bits(),
            _ => value.as_int() as u64,
        };
        let len = range.len();
        self.bytes[range].copy_from_slice(&bits.to_le_bytes()[..len]);
        Ok(())
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Evaluator
// =============================================================================

/// Host implementation of a called function.
pub type HostFn = Box<dyn FnMut(&mut Memory, &[Scalar]) -> Scalar>;

enum Flow {
    Next,
    Jump(BlockId),
    Return(Option<Scalar>),
}

struct Transaction {
    snapshot: Memory,
    persistent_failure: BlockId,
}

/// Executes a connected function.
pub struct Evaluator<'f> {
    func: &'f IlFunction,
    memory: Memory,
    host: FxHashMap<String, HostFn>,
    step_limit: u64,
}

impl<'f> Evaluator<'f> {
    pub fn new(func: &'f IlFunction) -> Self {
        Evaluator {
            func,
            memory: Memory::new(),
            host: FxHashMap::default(),
            step_limit: 1_000_000,
        }
    }

    /// Register a host implementation for calls to `name`.
    pub fn register(
        &mut self,
        name: &str,
        f: impl FnMut(&mut Memory, &[Scalar]) -> Scalar + 'static,
    ) -> &mut Self {
        self.host.insert(name.to_owned(), Box::new(f));
        self
    }

    /// Maximum number of blocks executed before giving up.
    pub fn set_step_limit(&mut self, limit: u64) -> &mut Self {
        self.step_limit = limit;
        self
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Run the function with `args` bound to its parameters in order.
    pub fn run(&mut self, args: &[Scalar]) -> Result<Option<Scalar>, EvalError> {
        let func = self.func;
        if func.layout().is_empty() {
            return Err(EvalError::NotConnected(func.name().to_owned()));
        }
        if args.len() != func.parameters().len() {
            return Err(EvalError::ArgumentCount {
                expected: func.parameters().len(),
                got: args.len(),
            });
        }

        let mut frame = Frame {
            values: vec![None; func.num_values()],
            locals: FxHashMap::default(),
            allocations: FxHashMap::default(),
            transactions: Vec::new(),
        };
        for (id, sym) in func.symbols() {
            let initial = match sym.kind {
                SymbolKind::Parameter(n) => args[n as usize],
                SymbolKind::Local => Scalar::zero(sym.ty),
            };
            frame.locals.insert(id, initial);
        }

        let mut block = func.entry;
        let mut steps = 0u64;
        loop {
            steps += 1;
            if steps > self.step_limit {
                return Err(EvalError::StepLimit(self.step_limit));
            }
            if block == func.exit {
                return Ok(None);
            }

            let mut flow = Flow::Next;
            for (index, op) in func.block(block).operations.iter().enumerate() {
                flow = self.execute(&mut frame, block, index, op)?;
                if !matches!(flow, Flow::Next) {
                    break;
                }
            }

            block = match flow {
                Flow::Return(value) => return Ok(value),
                Flow::Jump(target) => target,
                Flow::Next => func
                    .block(block)
                    .layout_next
                    .ok_or(EvalError::FellOffLayout(block.index()))?,
            };
        }
    }

    fn execute(
        &mut self,
        frame: &mut Frame,
        block: BlockId,
        index: usize,
        op: &Operation,
    ) -> Result<Flow, EvalError> {
        let func = self.func;
        let result_ty = op.result.map_or(DataType::NoType, |r| func.value_type(r));

        let value = match &op.opcode {
            OpCode::ConstInt(v) => Some(Scalar::Int(wrap_int(result_ty, *v))),
            OpCode::ConstFloat(v) => Some(Scalar::Float(round_float(result_ty, *v))),
            OpCode::Load(sym) => Some(frame.local(*sym)),
            OpCode::Store(sym) => {
                let v = frame.get(op.operands[0])?;
                frame.locals.insert(*sym, v);
                None
            }
            OpCode::StoreOver => {
                let v = frame.get(op.operands[1])?;
                frame.values[op.operands[0].as_usize()] = Some(v);
                None
            }
            OpCode::Arith(arith) => Some(self.arith(frame, *arith, op, result_ty)?),
            OpCode::CheckedArith(arith) => {
                let lhs = frame.get(op.operands[0])?.as_int();
                let rhs = frame.get(op.operands[1])?.as_int();
                let wide = match arith {
                    ArithOp::Add => lhs as i128 + rhs as i128,
                    ArithOp::Sub => lhs as i128 - rhs as i128,
                    _ => lhs as i128 * rhs as i128,
                };
                let (min, max) = int_range(result_ty);
                if wide < min || wide > max {
                    let handler = func
                        .block(block)
                        .exception_successors
                        .first()
                        .copied()
                        .ok_or(EvalError::UnhandledOverflow(block.index()))?;
                    return Ok(Flow::Jump(handler));
                }
                Some(Scalar::Int(wide as i64))
            }
            OpCode::Compare(cmp) => {
                let lhs = frame.get(op.operands[0])?;
                let rhs = frame.get(op.operands[1])?;
                let holds = if func.value_type(op.operands[0]).is_floating_point() {
                    cmp.eval_float(lhs.as_float(), rhs.as_float())
                } else {
                    cmp.eval_int(lhs.as_int(), rhs.as_int())
                };
                Some(Scalar::Int(holds as i64))
            }
            OpCode::Convert { unsigned } => {
                let source_ty = func.value_type(op.operands[0]);
                let v = frame.get(op.operands[0])?;
                Some(convert(v, source_ty, result_ty, *unsigned))
            }
            OpCode::LoadAt => {
                let address = frame.get(op.operands[0])?.as_int();
                Some(self.memory.load(address, result_ty)?)
            }
            OpCode::StoreAt => {
                let address = frame.get(op.operands[0])?.as_int();
                let v = frame.get(op.operands[1])?;
                let ty = func.value_type(op.operands[1]);
                self.memory.store(address, ty, v)?;
                None
            }
            OpCode::IndexAt { element_size } => {
                let base = frame.get(op.operands[0])?.as_int();
                let index = frame.get(op.operands[1])?.as_int();
                Some(Scalar::Int(
                    base.wrapping_add(index.wrapping_mul(*element_size as i64)),
                ))
            }
            OpCode::OffsetAt { offset } => {
                let base = frame.get(op.operands[0])?.as_int();
                Some(Scalar::Int(base.wrapping_add(*offset as i64)))
            }
            OpCode::LocalAlloc { size } => {
                let memory = &mut self.memory;
                let address = *frame
                    .allocations
                    .entry((block, index))
                    .or_insert_with(|| memory.alloc(*size));
                Some(Scalar::Int(address))
            }
            OpCode::AtomicAdd => {
                let address = frame.get(op.operands[0])?.as_int();
                let delta = frame.get(op.operands[1])?;
                let ty = func.value_type(op.operands[1]);
                let old = self.memory.load(address, ty)?;
                let new = match old {
                    Scalar::Float(f) => Scalar::Float(f + delta.as_float()),
                    Scalar::Int(i) => Scalar::Int(wrap_int(ty, i.wrapping_add(delta.as_int()))),
                };
                self.memory.store(address, ty, new)?;
                Some(old)
            }
            OpCode::Call { name } => {
                let args = op
                    .operands
                    .iter()
                    .map(|&v| frame.get(v))
                    .collect::<Result<Vec<_>, _>>()?;
                let host = self
                    .host
                    .get_mut(&**name)
                    .ok_or_else(|| EvalError::UnknownCallee(name.to_string()))?;
                Some(host(&mut self.memory, &args))
            }
            OpCode::Goto => return Ok(Flow::Jump(op.targets[0])),
            OpCode::Branch(cmp) => {
                let lhs = frame.get(op.operands[0])?;
                let rhs = frame.get(op.operands[1])?;
                let taken = if func.value_type(op.operands[0]).is_floating_point() {
                    cmp.eval_float(lhs.as_float(), rhs.as_float())
                } else {
                    cmp.eval_int(lhs.as_int(), rhs.as_int())
                };
                return Ok(if taken {
                    Flow::Jump(op.targets[0])
                } else {
                    Flow::Next
                });
            }
            OpCode::Return => {
                let value = match op.operands.first() {
                    Some(&v) => Some(frame.get(v)?),
                    None => None,
                };
                return Ok(Flow::Return(value));
            }
            OpCode::Switch { cases } => {
                let selector = frame.get(op.operands[0])?.as_int();
                let target = cases
                    .iter()
                    .position(|&c| c == selector)
                    .map_or(op.targets[0], |i| op.targets[i + 1]);
                return Ok(Flow::Jump(target));
            }
            OpCode::TransactionBegin => {
                frame.transactions.push(Transaction {
                    snapshot: self.memory.clone(),
                    persistent_failure: op.targets[0],
                });
                None
            }
            OpCode::TransactionEnd => {
                frame
                    .transactions
                    .pop()
                    .ok_or(EvalError::NoTransaction("transaction end"))?;
                None
            }
            OpCode::TransactionAbort => {
                let txn = frame
                    .transactions
                    .pop()
                    .ok_or(EvalError::NoTransaction("transaction abort"))?;
                self.memory = txn.snapshot;
                return Ok(Flow::Jump(txn.persistent_failure));
            }
        };

        if let (Some(result), Some(value)) = (op.result, value) {
            frame.values[result.as_usize()] = Some(value);
        }
        Ok(Flow::Next)
    }

    fn arith(
        &self,
        frame: &Frame,
        arith: ArithOp,
        op: &Operation,
        ty: DataType,
    ) -> Result<Scalar, EvalError> {
        let lhs = frame.get(op.operands[0])?;
        if arith.is_unary() {
            return Ok(match lhs {
                Scalar::Float(f) => Scalar::Float(-f),
                Scalar::Int(i) => Scalar::Int(wrap_int(ty, i.wrapping_neg())),
            });
        }
        let rhs = frame.get(op.operands[1])?;

        if ty.is_floating_point() {
            let (a, b) = (lhs.as_float(), rhs.as_float());
            let r = match arith {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
                ArithOp::Rem => a % b,
                _ => unreachable!("{:?} on floating-point operands", arith),
            };
            return Ok(Scalar::Float(round_float(ty, r)));
        }

        let (a, b) = (lhs.as_int(), rhs.as_int());
        let bits = (ty.size().max(1) * 8) as u32;
        let shift = (b as u32) & (bits - 1);
        let r = match arith {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div if b == 0 => return Err(EvalError::DivisionByZero),
            ArithOp::Div => a.wrapping_div(b),
            ArithOp::Rem if b == 0 => return Err(EvalError::DivisionByZero),
            ArithOp::Rem => a.wrapping_rem(b),
            ArithOp::And => a & b,
            ArithOp::Or => a | b,
            ArithOp::Xor => a ^ b,
            ArithOp::ShiftL => a.wrapping_shl(shift),
            ArithOp::ShiftR => a.wrapping_shr(shift),
            ArithOp::UnsignedShiftR => ((zero_extend(ty, a) as u64) >> shift) as i64,
            ArithOp::Neg => a.wrapping_neg(),
        };
        Ok(Scalar::Int(wrap_int(ty, r)))
    }
}

fn convert(v: Scalar, from: DataType, to: DataType, unsigned: bool) -> Scalar {
    if to.is_floating_point() {
        let f = match v {
            Scalar::Float(f) => f,
            Scalar::Int(i) if unsigned => zero_extend(from, i) as u64 as f64,
            Scalar::Int(i) => i as f64,
        };
        return Scalar::Float(round_float(to, f));
    }
    let i = match v {
        Scalar::Float(f) => f as i64,
        Scalar::Int(i) if unsigned => zero_extend(from, i),
        Scalar::Int(i) => i,
    };
    Scalar::Int(wrap_int(to, i))
}

struct Frame {
    values: Vec<Option<Scalar>>,
    locals: FxHashMap<SymbolId, Scalar>,
    allocations: FxHashMap<(BlockId, usize), i64>,
    transactions: Vec<Transaction>,
}

impl Frame {
    #[inline]
    fn get(&self, value: Value) -> Result<Scalar, EvalError> {
        self.values
            .get(value.as_usize())
            .copied()
            .flatten()
            .ok_or(EvalError::UndefinedValue(value.index()))
    }

    #[inline]
    fn local(&self, sym: SymbolId) -> Scalar {
        self.locals.get(&sym).copied().unwrap_or(Scalar::Int(0))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::CmpOp;

    /// `return x + 1`
    fn add_one() -> IlFunction {
        let mut func = IlFunction::new("add_one");
        let x = func.define_symbol("x", DataType::Int32, SymbolKind::Parameter(0));
        let (entry, exit) = (func.entry, func.exit);
        let a = func.new_value(DataType::Int32);
        let one = func.new_value(DataType::Int32);
        let sum = func.new_value(DataType::Int32);
        func.push_op(entry, Operation::new(OpCode::Load(x), &[]).with_result(a));
        func.push_op(entry, Operation::new(OpCode::ConstInt(1), &[]).with_result(one));
        func.push_op(
            entry,
            Operation::new(OpCode::Arith(ArithOp::Add), &[a, one]).with_result(sum),
        );
        func.push_op(entry, Operation::new(OpCode::Return, &[sum]));
        func.add_edge(entry, exit);
        func.set_layout(vec![entry, exit]);
        func
    }

    #[test]
    fn test_add_one() {
        let func = add_one();
        let mut eval = Evaluator::new(&func);
        assert_eq!(eval.run(&[Scalar::Int(5)]), Ok(Some(Scalar::Int(6))));
        assert_eq!(
            eval.run(&[Scalar::Int(i32::MAX as i64)]),
            Ok(Some(Scalar::Int(i32::MIN as i64)))
        );
    }

    #[test]
    fn test_argument_count_is_checked() {
        let func = add_one();
        let mut eval = Evaluator::new(&func);
        assert_eq!(
            eval.run(&[]),
            Err(EvalError::ArgumentCount {
                expected: 1,
                got: 0
            })
        );
    }

    #[test]
    fn test_unconnected_function_is_rejected() {
        let func = IlFunction::new("empty");
        assert!(matches!(
            Evaluator::new(&func).run(&[]),
            Err(EvalError::NotConnected(_))
        ));
    }

    #[test]
    fn test_branch_and_fallthrough() {
        // entry: if x < 0 goto neg; (fall) pos: return 1; neg: return -1
        let mut func = IlFunction::new("sign");
        let x = func.define_symbol("x", DataType::Int64, SymbolKind::Parameter(0));
        let (entry, exit) = (func.entry, func.exit);
        let pos = func.new_block();
        let neg = func.new_block();
        let xv = func.new_value(DataType::Int64);
        let zero = func.new_value(DataType::Int64);
        let one = func.new_value(DataType::Int64);
        let minus = func.new_value(DataType::Int64);

        func.push_op(entry, Operation::new(OpCode::Load(x), &[]).with_result(xv));
        func.push_op(entry, Operation::new(OpCode::ConstInt(0), &[]).with_result(zero));
        func.push_op(
            entry,
            Operation::new(OpCode::Branch(CmpOp::Lt), &[xv, zero]).with_targets(&[neg]),
        );
        func.add_edge(entry, neg);
        func.add_edge(entry, pos);
        func.push_op(pos, Operation::new(OpCode::ConstInt(1), &[]).with_result(one));
        func.push_op(pos, Operation::new(OpCode::Return, &[one]));
        func.add_edge(pos, exit);
        func.push_op(neg, Operation::new(OpCode::ConstInt(-1), &[]).with_result(minus));
        func.push_op(neg, Operation::new(OpCode::Return, &[minus]));
        func.add_edge(neg, exit);
        func.set_layout(vec![entry, pos, neg, exit]);
        assert_eq!(func.verify(), Ok(()));

        let mut eval = Evaluator::new(&func);
        assert_eq!(eval.run(&[Scalar::Int(9)]), Ok(Some(Scalar::Int(1))));
        assert_eq!(eval.run(&[Scalar::Int(-9)]), Ok(Some(Scalar::Int(-1))));
    }

    #[test]
    fn test_memory_round_trip() {
        let mut memory = Memory::new();
        let a = memory.alloc(16);
        assert_ne!(a, 0);
        memory.store(a, DataType::Int16, Scalar::Int(-2)).unwrap();
        memory.store(a + 8, DataType::Double, Scalar::Float(1.5)).unwrap();
        assert_eq!(memory.load(a, DataType::Int16), Ok(Scalar::Int(-2)));
        assert_eq!(memory.load(a, DataType::Int8), Ok(Scalar::Int(-2)));
        assert_eq!(memory.load(a + 8, DataType::Double), Ok(Scalar::Float(1.5)));
        assert!(memory.load(a + 16, DataType::Int64).is_err());
        assert!(memory.load(0, DataType::Int8).is_err());
    }

    #[test]
    fn test_step_limit() {
        let mut func = IlFunction::new("spin");
        let entry = func.entry;
        func.push_op(entry, Operation::new(OpCode::Goto, &[]).with_targets(&[entry]));
        func.add_edge(entry, entry);
        let exit = func.exit;
        func.set_layout(vec![entry, exit]);

        let mut eval = Evaluator::new(&func);
        eval.set_step_limit(100);
        assert_eq!(eval.run(&[]), Err(EvalError::StepLimit(100)));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(
            convert(Scalar::Int(-1), DataType::Int32, DataType::Int64, false),
            Scalar::Int(-1)
        );
        assert_eq!(
            convert(Scalar::Int(-1), DataType::Int32, DataType::Int64, true),
            Scalar::Int(u32::MAX as i64)
        );
        assert_eq!(
            convert(Scalar::Float(2.75), DataType::Double, DataType::Int32, false),
            Scalar::Int(2)
        );
        assert_eq!(
            convert(Scalar::Int(3), DataType::Int8, DataType::Float, false),
            Scalar::Float(3.0)
        );
    }
}
