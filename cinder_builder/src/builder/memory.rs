use cinder_il::{DataType, FieldRef, OpCode, Operation, TypeRef, Value};

use super::IlBuilder;
use crate::error::{BuildError, BuildResult};

/// Builder trait for memory access and frame storage.
pub trait MemoryBuilder {
    // Raw Access
    fn load_at(&mut self, ty: DataType, address: Value) -> Value;
    fn store_at(&mut self, address: Value, value: Value);
    /// Address of element `index` of an array of `element` starting at `base`.
    fn index_at(&mut self, element: DataType, base: Value, index: Value) -> Value;

    // Aggregates
    fn load_indirect(&mut self, aggregate: &str, field: &str, object: Value) -> BuildResult<Value>;
    fn store_indirect(
        &mut self,
        aggregate: &str,
        field: &str,
        object: Value,
        value: Value,
    ) -> BuildResult<()>;
    fn struct_field_instance_address(
        &mut self,
        aggregate: &str,
        field: &str,
        object: Value,
    ) -> BuildResult<Value>;

    // Frame Storage
    fn create_local_array(&mut self, count: u32, element: DataType) -> Value;
    fn create_local_struct(&mut self, ty: TypeRef) -> Value;

    // Atomics
    /// Atomically add `value` to the location at `address`, producing the
    /// previous contents. Fails when the target has no atomic add.
    fn atomic_add(&mut self, address: Value, value: Value) -> BuildResult<Value>;
}

impl IlBuilder<'_> {
    fn field(&self, aggregate: &str, field: &str) -> BuildResult<FieldRef> {
        let types = self.mb.types();
        if types.lookup(aggregate).is_none() {
            return Err(BuildError::unknown_type(aggregate));
        }
        types
            .field_reference(aggregate, field)
            .ok_or_else(|| BuildError::unknown_field(aggregate, field))
    }

    pub(crate) fn offset_at(&mut self, base: Value, offset: u32) -> Value {
        self.emit_value(OpCode::OffsetAt { offset }, &[base], DataType::Address)
    }
}

impl MemoryBuilder for IlBuilder<'_> {
    fn load_at(&mut self, ty: DataType, address: Value) -> Value {
        self.emit_value(OpCode::LoadAt, &[address], ty)
    }

    fn store_at(&mut self, address: Value, value: Value) {
        self.emit(Operation::new(OpCode::StoreAt, &[address, value]));
    }

    fn index_at(&mut self, element: DataType, base: Value, index: Value) -> Value {
        self.emit_value(
            OpCode::IndexAt {
                element_size: element.size(),
            },
            &[base, index],
            DataType::Address,
        )
    }

    fn load_indirect(&mut self, aggregate: &str, field: &str, object: Value) -> BuildResult<Value> {
        let field = self.field(aggregate, field)?;
        let address = self.offset_at(object, field.offset);
        Ok(self.load_at(field.data_type, address))
    }

    fn store_indirect(
        &mut self,
        aggregate: &str,
        field: &str,
        object: Value,
        value: Value,
    ) -> BuildResult<()> {
        let field = self.field(aggregate, field)?;
        let address = self.offset_at(object, field.offset);
        self.store_at(address, value);
        Ok(())
    }

    fn struct_field_instance_address(
        &mut self,
        aggregate: &str,
        field: &str,
        object: Value,
    ) -> BuildResult<Value> {
        let field = self.field(aggregate, field)?;
        Ok(self.offset_at(object, field.offset))
    }

    fn create_local_array(&mut self, count: u32, element: DataType) -> Value {
        let size = count * element.size();
        self.emit_value(OpCode::LocalAlloc { size }, &[], DataType::Address)
    }

    fn create_local_struct(&mut self, ty: TypeRef) -> Value {
        let size = self.mb.types().size_of(ty);
        self.emit_value(OpCode::LocalAlloc { size }, &[], DataType::Address)
    }

    fn atomic_add(&mut self, address: Value, value: Value) -> BuildResult<Value> {
        if !self.mb.config.capabilities.atomic_add {
            return Err(BuildError::UnsupportedCapability {
                feature: "atomic add",
            });
        }
        let ty = self.value_type(value);
        Ok(self.emit_value(OpCode::AtomicAdd, &[address, value], ty))
    }
}
