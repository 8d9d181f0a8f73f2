//! Builder graph construction and VM-state propagation for the Cinder JIT.
//!
//! # Core Components
//!
//! - **Builder engine** (`builder/`): nested builder sequences, lazy blocks,
//!   block counting and tree connection, plus the operation and control
//!   construct traits
//! - **Bytecode builders** (`bytecode.rs`): successor and fallthrough
//!   registration with VM-state transfer and intermediate builders
//! - **VM state** (`vm_state/`): simulated registers, operand stacks and
//!   operand arrays
//! - **Method builder** (`method.rs`): definitions, bytecode worklist,
//!   function resolution and the compile driver
//! - **Configuration** (`config.rs`) and **errors** (`error.rs`)

pub mod builder;
pub mod bytecode;
pub mod config;
pub mod error;
pub mod method;
pub mod vm_state;

pub use builder::{
    ArithmeticBuilder, BuilderId, CallBuilder, Case, ControlBuilder, FunctionSignature,
    HandlerBuilder, HostFn, IlBuilder, LoopTargets, MemoryBuilder,
};
pub use bytecode::BytecodeBuilder;
pub use config::{BuilderConfig, Capabilities};
pub use error::{BuildError, BuildResult};
pub use method::{CompiledMethod, MethodBody, MethodBuilder};
pub use vm_state::{
    VirtualMachineOperandArray, VirtualMachineOperandStack, VirtualMachineRegister,
    VirtualMachineRegisterInStruct, VirtualMachineState, VmState,
};

/// The builder traits, for glob import.
pub mod prelude {
    pub use crate::builder::{
        ArithmeticBuilder, CallBuilder, ControlBuilder, HandlerBuilder, MemoryBuilder,
    };
    pub use crate::bytecode::BytecodeBuilder;
    pub use crate::vm_state::VirtualMachineState;
}
