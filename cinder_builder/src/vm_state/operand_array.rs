use cinder_il::{DataType, SymbolId, Value};

use super::{merge_values, VirtualMachineState};
use crate::builder::{ArithmeticBuilder, IlBuilder, MemoryBuilder};
use crate::error::{BuildError, BuildResult};

/// Fixed-size array of operands (a register file or a local-variable
/// area) whose elements are held as values between commits.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachineOperandArray {
    values: Vec<Value>,
    element: DataType,
    /// Local holding the address of element 0.
    base: SymbolId,
}

impl VirtualMachineOperandArray {
    /// Mirror `count` elements of the array addressed by the local `base`
    /// and load them.
    pub fn new(
        b: &mut IlBuilder<'_>,
        count: usize,
        element: DataType,
        base: &str,
    ) -> BuildResult<Self> {
        let base = b
            .method()
            .function()
            .lookup_symbol(base)
            .ok_or_else(|| BuildError::undefined_local(base))?;

        let mut array = VirtualMachineOperandArray {
            values: Vec::with_capacity(count),
            element,
            base,
        };
        let base = b.load_symbol(array.base);
        for index in 0..count {
            let value = array.load_element(b, base, index);
            array.values.push(value);
        }
        Ok(array)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Value {
        self.values[index]
    }

    pub fn set(&mut self, index: usize, value: Value) {
        self.values[index] = value;
    }

    /// Copy element `src` into element `dst`.
    pub fn move_element(&mut self, dst: usize, src: usize) {
        self.values[dst] = self.values[src];
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }

    fn element_address(&self, b: &mut IlBuilder<'_>, base: Value, index: usize) -> Value {
        let index = b.const_i64(index as i64);
        b.index_at(self.element, base, index)
    }

    fn load_element(&self, b: &mut IlBuilder<'_>, base: Value, index: usize) -> Value {
        let address = self.element_address(b, base, index);
        b.load_at(self.element, address)
    }
}

impl VirtualMachineState for VirtualMachineOperandArray {
    fn commit(&self, b: &mut IlBuilder<'_>) {
        let base = b.load_symbol(self.base);
        for (index, &value) in self.values.iter().enumerate() {
            let address = self.element_address(b, base, index);
            b.store_at(address, value);
        }
    }

    fn reload(&mut self, b: &mut IlBuilder<'_>) {
        let base = b.load_symbol(self.base);
        for index in 0..self.values.len() {
            self.values[index] = self.load_element(b, base, index);
        }
    }

    /// # Panics
    ///
    /// Panics if the arrays differ in size or storage.
    fn merge_into(&self, other: &Self, b: &mut IlBuilder<'_>) {
        assert!(
            self.state_eq(other),
            "merging operand arrays of {} and {} elements",
            self.len(),
            other.len()
        );
        merge_values(b, &self.values, &other.values);
    }

    fn state_eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self.element == other.element
            && self.base == other.base
    }
}
