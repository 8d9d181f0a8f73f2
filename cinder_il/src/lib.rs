//! IL substrate for the Cinder JIT builder.
//!
//! # Core Components
//!
//! - **Arena** (`arena.rs`): typed IDs, arenas, side tables, bit sets
//! - **Types** (`types.rs`): primitive and vector data types
//! - **Operators** (`operators.rs`): arithmetic, comparison and opcode definitions
//! - **Operation / Block** (`operation.rs`, `block.rs`): operation lists and explicit edges
//! - **Function** (`function.rs`): the per-method container, layout and verifier
//! - **CFG** (`cfg.rs`): reverse postorder, dominators, natural loops
//! - **Type dictionary** (`typedict.rs`): struct, union and pointer layouts
//! - **Evaluator** (`eval.rs`): reference interpreter used to check built graphs
//!
//! Nothing here decides control flow: the builder engine in `cinder_builder`
//! creates the blocks and adds every edge.

pub mod arena;
pub mod block;
pub mod cfg;
pub mod eval;
pub mod function;
pub mod operation;
pub mod operators;
pub mod typedict;
pub mod types;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use block::{Block, BlockId};
pub use cfg::{Cfg, DominatorTree, Loop, LoopAnalysis};
pub use eval::{EvalError, Evaluator, Memory, Scalar};
pub use function::{IlFunction, Symbol, SymbolId, SymbolKind};
pub use operation::{Operation, Value, ValueData};
pub use operators::{ArithOp, CmpOp, OpCode};
pub use typedict::{FieldRef, TypeDictionary, TypeRef};
pub use types::DataType;
