use std::fmt;
use std::rc::Rc;

use cinder_il::{DataType, Memory, OpCode, Operation, Scalar, Value};

use super::IlBuilder;
use crate::error::BuildResult;

/// Host implementation of a function, run by the reference evaluator.
pub type HostFn = Rc<dyn Fn(&mut Memory, &[Scalar]) -> Scalar>;

/// Hook offered each unknown call target once.
pub type FunctionResolver = Box<dyn FnMut(&str) -> Option<FunctionSignature>>;

/// A callable function known to the method.
#[derive(Clone)]
pub struct FunctionSignature {
    pub name: String,
    pub return_type: DataType,
    pub params: Vec<DataType>,
    pub implementation: Option<HostFn>,
}

impl FunctionSignature {
    pub fn new(
        name: &str,
        return_type: DataType,
        params: &[DataType],
        implementation: Option<HostFn>,
    ) -> Self {
        FunctionSignature {
            name: name.to_owned(),
            return_type,
            params: params.to_vec(),
            implementation,
        }
    }
}

impl fmt::Debug for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSignature")
            .field("name", &self.name)
            .field("return_type", &self.return_type)
            .field("params", &self.params)
            .field("host", &self.implementation.is_some())
            .finish()
    }
}

/// Builder trait for calls.
pub trait CallBuilder {
    /// Call `name` with `args`. Produces a value unless the function
    /// returns `NoType`.
    ///
    /// # Panics
    ///
    /// Panics if the argument count does not match the signature.
    fn call(&mut self, name: &str, args: &[Value]) -> BuildResult<Option<Value>>;
}

impl CallBuilder for IlBuilder<'_> {
    fn call(&mut self, name: &str, args: &[Value]) -> BuildResult<Option<Value>> {
        let (return_type, arity) = self.mb.resolve_function(name)?;
        assert_eq!(
            args.len(),
            arity,
            "`{}` takes {} arguments, got {}",
            name,
            arity,
            args.len()
        );

        let opcode = OpCode::Call { name: name.into() };
        if return_type == DataType::NoType {
            self.emit(Operation::new(opcode, args));
            return Ok(None);
        }
        Ok(Some(self.emit_value(opcode, args, return_type)))
    }
}
