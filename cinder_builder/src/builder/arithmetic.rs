use cinder_il::{ArithOp, CmpOp, DataType, OpCode, Operation, SymbolId, SymbolKind, Value};

use super::IlBuilder;
use crate::error::{BuildError, BuildResult};

/// Builder trait for constants, locals, arithmetic and comparisons.
pub trait ArithmeticBuilder {
    // Constants
    fn const_i8(&mut self, value: i8) -> Value;
    fn const_i16(&mut self, value: i16) -> Value;
    fn const_i32(&mut self, value: i32) -> Value;
    fn const_i64(&mut self, value: i64) -> Value;
    fn const_float(&mut self, value: f32) -> Value;
    fn const_double(&mut self, value: f64) -> Value;
    fn const_address(&mut self, value: i64) -> Value;
    fn const_int(&mut self, ty: DataType, value: i64) -> Value;
    fn zero(&mut self, ty: DataType) -> Value;

    // Locals
    fn load(&mut self, name: &str) -> BuildResult<Value>;
    /// Store to a local, declaring it with the value's type on first use
    /// unless all locals have been declared up front.
    fn store(&mut self, name: &str, value: Value) -> BuildResult<()>;
    /// Overwrite the storage backing `dest` with `value`.
    fn store_over(&mut self, dest: Value, value: Value);

    // Arithmetic
    fn add(&mut self, lhs: Value, rhs: Value) -> Value;
    fn sub(&mut self, lhs: Value, rhs: Value) -> Value;
    fn mul(&mut self, lhs: Value, rhs: Value) -> Value;
    fn div(&mut self, lhs: Value, rhs: Value) -> Value;
    fn rem(&mut self, lhs: Value, rhs: Value) -> Value;
    fn negate(&mut self, value: Value) -> Value;

    // Bitwise
    fn and(&mut self, lhs: Value, rhs: Value) -> Value;
    fn or(&mut self, lhs: Value, rhs: Value) -> Value;
    fn xor(&mut self, lhs: Value, rhs: Value) -> Value;
    fn shift_l(&mut self, value: Value, amount: Value) -> Value;
    fn shift_r(&mut self, value: Value, amount: Value) -> Value;
    fn unsigned_shift_r(&mut self, value: Value, amount: Value) -> Value;

    // Comparisons
    fn equal_to(&mut self, lhs: Value, rhs: Value) -> Value;
    fn not_equal_to(&mut self, lhs: Value, rhs: Value) -> Value;
    fn less_than(&mut self, lhs: Value, rhs: Value) -> Value;
    fn less_or_equal_to(&mut self, lhs: Value, rhs: Value) -> Value;
    fn greater_than(&mut self, lhs: Value, rhs: Value) -> Value;
    fn greater_or_equal_to(&mut self, lhs: Value, rhs: Value) -> Value;
    fn unsigned_less_than(&mut self, lhs: Value, rhs: Value) -> Value;
    fn unsigned_less_or_equal_to(&mut self, lhs: Value, rhs: Value) -> Value;
    fn unsigned_greater_than(&mut self, lhs: Value, rhs: Value) -> Value;
    fn unsigned_greater_or_equal_to(&mut self, lhs: Value, rhs: Value) -> Value;

    // Conversions
    fn convert_to(&mut self, ty: DataType, value: Value) -> Value;
    fn unsigned_convert_to(&mut self, ty: DataType, value: Value) -> Value;
}

impl IlBuilder<'_> {
    pub(crate) fn load_symbol(&mut self, symbol: SymbolId) -> Value {
        let ty = self.mb.func.symbol(symbol).ty;
        self.emit_value(OpCode::Load(symbol), &[], ty)
    }

    pub(crate) fn store_symbol(&mut self, symbol: SymbolId, value: Value) {
        self.emit(Operation::new(OpCode::Store(symbol), &[value]));
    }

    /// Symbol for a local, declaring it on first use.
    pub(crate) fn local_symbol(&mut self, name: &str, ty: DataType) -> BuildResult<SymbolId> {
        if let Some(symbol) = self.mb.func.lookup_symbol(name) {
            return Ok(symbol);
        }
        if self.mb.locals_defined {
            return Err(BuildError::undefined_local(name));
        }
        if self.trace() {
            tracing::trace!(builder = %self.id, local = name, ty = %ty, "define local");
        }
        Ok(self.mb.func.define_symbol(name, ty, SymbolKind::Local))
    }

    fn binary(&mut self, op: ArithOp, lhs: Value, rhs: Value) -> Value {
        let (lt, rt) = (self.value_type(lhs), self.value_type(rhs));
        let ty = match op {
            ArithOp::ShiftL | ArithOp::ShiftR | ArithOp::UnsignedShiftR => {
                assert!(rt.is_integer(), "shift amount must be an integer, got {}", rt);
                lt
            }
            _ => lt
                .arith_result(rt)
                .unwrap_or_else(|| panic!("cannot {} {} and {}", op.mnemonic(), lt, rt)),
        };
        assert!(
            !op.is_integer_only() || !ty.element().is_floating_point(),
            "{} needs integer operands, got {}",
            op.mnemonic(),
            ty
        );
        self.emit_value(OpCode::Arith(op), &[lhs, rhs], ty)
    }

    fn compare(&mut self, op: CmpOp, lhs: Value, rhs: Value) -> Value {
        self.emit_value(OpCode::Compare(op), &[lhs, rhs], DataType::Int32)
    }
}

impl ArithmeticBuilder for IlBuilder<'_> {
    fn const_i8(&mut self, value: i8) -> Value {
        self.const_int(DataType::Int8, value as i64)
    }

    fn const_i16(&mut self, value: i16) -> Value {
        self.const_int(DataType::Int16, value as i64)
    }

    fn const_i32(&mut self, value: i32) -> Value {
        self.const_int(DataType::Int32, value as i64)
    }

    fn const_i64(&mut self, value: i64) -> Value {
        self.const_int(DataType::Int64, value)
    }

    fn const_float(&mut self, value: f32) -> Value {
        self.emit_value(OpCode::ConstFloat(value as f64), &[], DataType::Float)
    }

    fn const_double(&mut self, value: f64) -> Value {
        self.emit_value(OpCode::ConstFloat(value), &[], DataType::Double)
    }

    fn const_address(&mut self, value: i64) -> Value {
        self.const_int(DataType::Address, value)
    }

    fn const_int(&mut self, ty: DataType, value: i64) -> Value {
        self.emit_value(OpCode::ConstInt(value), &[], ty)
    }

    fn zero(&mut self, ty: DataType) -> Value {
        if ty.is_floating_point() {
            self.emit_value(OpCode::ConstFloat(0.0), &[], ty)
        } else {
            self.const_int(ty, 0)
        }
    }

    fn load(&mut self, name: &str) -> BuildResult<Value> {
        let symbol = self
            .mb
            .func
            .lookup_symbol(name)
            .ok_or_else(|| BuildError::undefined_local(name))?;
        Ok(self.load_symbol(symbol))
    }

    fn store(&mut self, name: &str, value: Value) -> BuildResult<()> {
        let ty = self.value_type(value);
        let symbol = self.local_symbol(name, ty)?;
        self.store_symbol(symbol, value);
        Ok(())
    }

    fn store_over(&mut self, dest: Value, value: Value) {
        let (dt, vt) = (self.value_type(dest), self.value_type(value));
        assert_eq!(dt, vt, "store over a {} value with a {} value", dt, vt);
        self.emit(Operation::new(OpCode::StoreOver, &[dest, value]));
    }

    fn add(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(ArithOp::Add, lhs, rhs)
    }

    fn sub(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(ArithOp::Sub, lhs, rhs)
    }

    fn mul(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(ArithOp::Mul, lhs, rhs)
    }

    fn div(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(ArithOp::Div, lhs, rhs)
    }

    fn rem(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(ArithOp::Rem, lhs, rhs)
    }

    fn negate(&mut self, value: Value) -> Value {
        let ty = self.value_type(value);
        self.emit_value(OpCode::Arith(ArithOp::Neg), &[value], ty)
    }

    fn and(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(ArithOp::And, lhs, rhs)
    }

    fn or(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(ArithOp::Or, lhs, rhs)
    }

    fn xor(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(ArithOp::Xor, lhs, rhs)
    }

    fn shift_l(&mut self, value: Value, amount: Value) -> Value {
        self.binary(ArithOp::ShiftL, value, amount)
    }

    fn shift_r(&mut self, value: Value, amount: Value) -> Value {
        self.binary(ArithOp::ShiftR, value, amount)
    }

    fn unsigned_shift_r(&mut self, value: Value, amount: Value) -> Value {
        self.binary(ArithOp::UnsignedShiftR, value, amount)
    }

    fn equal_to(&mut self, lhs: Value, rhs: Value) -> Value {
        self.compare(CmpOp::Eq, lhs, rhs)
    }

    fn not_equal_to(&mut self, lhs: Value, rhs: Value) -> Value {
        self.compare(CmpOp::Ne, lhs, rhs)
    }

    fn less_than(&mut self, lhs: Value, rhs: Value) -> Value {
        self.compare(CmpOp::Lt, lhs, rhs)
    }

    fn less_or_equal_to(&mut self, lhs: Value, rhs: Value) -> Value {
        self.compare(CmpOp::Le, lhs, rhs)
    }

    fn greater_than(&mut self, lhs: Value, rhs: Value) -> Value {
        self.compare(CmpOp::Gt, lhs, rhs)
    }

    fn greater_or_equal_to(&mut self, lhs: Value, rhs: Value) -> Value {
        self.compare(CmpOp::Ge, lhs, rhs)
    }

    fn unsigned_less_than(&mut self, lhs: Value, rhs: Value) -> Value {
        self.compare(CmpOp::ULt, lhs, rhs)
    }

    fn unsigned_less_or_equal_to(&mut self, lhs: Value, rhs: Value) -> Value {
        self.compare(CmpOp::ULe, lhs, rhs)
    }

    fn unsigned_greater_than(&mut self, lhs: Value, rhs: Value) -> Value {
        self.compare(CmpOp::UGt, lhs, rhs)
    }

    fn unsigned_greater_or_equal_to(&mut self, lhs: Value, rhs: Value) -> Value {
        self.compare(CmpOp::UGe, lhs, rhs)
    }

    fn convert_to(&mut self, ty: DataType, value: Value) -> Value {
        self.emit_value(OpCode::Convert { unsigned: false }, &[value], ty)
    }

    fn unsigned_convert_to(&mut self, ty: DataType, value: Value) -> Value {
        self.emit_value(OpCode::Convert { unsigned: true }, &[value], ty)
    }
}
