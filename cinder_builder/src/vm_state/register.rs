//! Registers of the simulated machine.
//!
//! A register is mirrored in a local. Code reads and writes the local;
//! `commit` copies it to the register's real storage and `reload` copies
//! it back. Merging is free: every path already keeps the value in the
//! same local.

use cinder_il::{DataType, FieldRef, SymbolId, Value};

use super::VirtualMachineState;
use crate::builder::{ArithmeticBuilder, IlBuilder, MemoryBuilder};
use crate::error::{BuildError, BuildResult};

/// Add `amount` to the value mirrored in `local`.
fn adjust(b: &mut IlBuilder<'_>, local: SymbolId, ty: DataType, amount: i64) {
    let delta_ty = if ty == DataType::Address {
        DataType::Int64
    } else {
        ty
    };
    let current = b.load_symbol(local);
    let delta = b.const_int(delta_ty, amount);
    let next = b.add(current, delta);
    b.store_symbol(local, next);
}

// =============================================================================
// Register
// =============================================================================

/// A register whose storage is at a fixed address.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachineRegister {
    local: SymbolId,
    address: Value,
    ty: DataType,
    /// Bytes one `adjust` unit moves the register by.
    step: i64,
}

impl VirtualMachineRegister {
    /// Mirror the register stored at `address` in `local` and load its
    /// current value.
    pub fn new(
        b: &mut IlBuilder<'_>,
        local: &str,
        ty: DataType,
        step: i64,
        address: Value,
    ) -> BuildResult<Self> {
        let local = b.local_symbol(local, ty)?;
        let mut register = VirtualMachineRegister {
            local,
            address,
            ty,
            step,
        };
        register.reload(b);
        Ok(register)
    }

    #[inline]
    pub fn local(&self) -> SymbolId {
        self.local
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.ty
    }

    pub fn load(&self, b: &mut IlBuilder<'_>) -> Value {
        b.load_symbol(self.local)
    }

    pub fn store(&self, b: &mut IlBuilder<'_>, value: Value) {
        b.store_symbol(self.local, value);
    }

    /// Move the register by `amount` steps.
    pub fn adjust(&self, b: &mut IlBuilder<'_>, amount: i64) {
        adjust(b, self.local, self.ty, amount * self.step);
    }
}

impl VirtualMachineState for VirtualMachineRegister {
    fn commit(&self, b: &mut IlBuilder<'_>) {
        let value = self.load(b);
        b.store_at(self.address, value);
    }

    fn reload(&mut self, b: &mut IlBuilder<'_>) {
        let value = b.load_at(self.ty, self.address);
        self.store(b, value);
    }

    fn merge_into(&self, other: &Self, _b: &mut IlBuilder<'_>) {
        assert!(
            self.state_eq(other),
            "merging registers mirrored in different locals"
        );
    }

    fn state_eq(&self, other: &Self) -> bool {
        self.local == other.local && self.address == other.address
    }
}

// =============================================================================
// Register In Struct
// =============================================================================

/// A register stored in a field of a structure whose address is held in a
/// local.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachineRegisterInStruct {
    local: SymbolId,
    object: SymbolId,
    field: FieldRef,
}

impl VirtualMachineRegisterInStruct {
    /// Mirror `aggregate.field` of the structure addressed by the local
    /// `object` in `local`, and load its current value.
    pub fn new(
        b: &mut IlBuilder<'_>,
        aggregate: &str,
        object: &str,
        field: &str,
        local: &str,
    ) -> BuildResult<Self> {
        let object = b
            .method()
            .function()
            .lookup_symbol(object)
            .ok_or_else(|| BuildError::undefined_local(object))?;
        let types = b.method().types();
        if types.lookup(aggregate).is_none() {
            return Err(BuildError::unknown_type(aggregate));
        }
        let field = types
            .field_reference(aggregate, field)
            .ok_or_else(|| BuildError::unknown_field(aggregate, field))?;
        let local = b.local_symbol(local, field.data_type)?;

        let mut register = VirtualMachineRegisterInStruct {
            local,
            object,
            field,
        };
        register.reload(b);
        Ok(register)
    }

    #[inline]
    pub fn local(&self) -> SymbolId {
        self.local
    }

    pub fn load(&self, b: &mut IlBuilder<'_>) -> Value {
        b.load_symbol(self.local)
    }

    pub fn store(&self, b: &mut IlBuilder<'_>, value: Value) {
        b.store_symbol(self.local, value);
    }

    pub fn adjust(&self, b: &mut IlBuilder<'_>, amount: i64) {
        adjust(b, self.local, self.field.data_type, amount);
    }

    fn field_address(&self, b: &mut IlBuilder<'_>) -> Value {
        let object = b.load_symbol(self.object);
        b.offset_at(object, self.field.offset)
    }
}

impl VirtualMachineState for VirtualMachineRegisterInStruct {
    fn commit(&self, b: &mut IlBuilder<'_>) {
        let value = self.load(b);
        let address = self.field_address(b);
        b.store_at(address, value);
    }

    fn reload(&mut self, b: &mut IlBuilder<'_>) {
        let address = self.field_address(b);
        let value = b.load_at(self.field.data_type, address);
        self.store(b, value);
    }

    fn merge_into(&self, other: &Self, _b: &mut IlBuilder<'_>) {
        assert!(
            self.state_eq(other),
            "merging registers mirrored in different locals"
        );
    }

    fn state_eq(&self, other: &Self) -> bool {
        self.local == other.local && self.object == other.object && self.field == other.field
    }
}
