//! End-to-end method construction scenarios.
//!
//! Each test builds a method, connects it, checks the shape of the
//! resulting graph and runs it on the reference evaluator.

use cinder_builder::prelude::*;
use cinder_builder::{
    BuildResult, BuilderConfig, BuilderId, Capabilities, Case, CompiledMethod, IlBuilder,
    MethodBody, MethodBuilder, VirtualMachineOperandStack, VirtualMachineRegister, VmState,
};
use cinder_il::{Cfg, CmpOp, DataType, DominatorTree, LoopAnalysis, Memory, OpCode, Scalar, Value};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn method(name: &str) -> MethodBuilder {
    init_tracing();
    MethodBuilder::new(name, BuilderConfig::for_testing())
}

fn run(compiled: &CompiledMethod, args: &[i64]) -> i64 {
    let args: Vec<Scalar> = args.iter().map(|&a| Scalar::Int(a)).collect();
    compiled
        .invoke(&args)
        .expect("evaluation failed")
        .expect("method returned no value")
        .as_int()
}

fn unary_int_method(name: &str) -> MethodBuilder {
    let mut mb = method(name);
    mb.define_parameter("x", DataType::Int32)
        .define_return_type(DataType::Int32);
    mb
}

// =============================================================================
// Method Bodies
// =============================================================================

/// `if x > 0 { r = 1 } else { r = 2 }; return r`
struct Sign;

impl MethodBody for Sign {
    fn build_il(&mut self, mb: &mut MethodBuilder) -> BuildResult<bool> {
        let (mut then_path, mut else_path) = (None, None);
        {
            let mut b = mb.root();
            let x = b.load("x")?;
            let zero = b.const_i32(0);
            let positive = b.greater_than(x, zero);
            b.if_then_else(Some(&mut then_path), Some(&mut else_path), positive);
            let r = b.load("r")?;
            b.return_value(r);
        }
        for (path, value) in [(then_path, 1), (else_path, 2)] {
            let Some(path) = path else {
                return Ok(false);
            };
            let mut b = mb.at(path);
            let v = b.const_i32(value);
            b.store("r", v)?;
        }
        Ok(true)
    }
}

#[test]
fn test_if_then_else_single_merge() {
    let mut mb = unary_int_method("sign");
    mb.define_local("r", DataType::Int32);
    let compiled = mb.compile(&mut Sign).unwrap();
    let func = compiled.function();

    let merges: Vec<_> = func
        .layout()
        .iter()
        .filter(|&&b| func.block(b).predecessors.len() == 2)
        .collect();
    assert_eq!(merges.len(), 1);

    assert_eq!(run(&compiled, &[5]), 1);
    assert_eq!(run(&compiled, &[-5]), 2);
    assert_eq!(run(&compiled, &[0]), 2);
}

#[test]
fn test_then_path_comes_back() {
    let mut mb = unary_int_method("then_only");
    let mut then_path = None;
    {
        let mut b = mb.root();
        let zero = b.const_i32(0);
        b.store("r", zero).unwrap();
        let x = b.load("x").unwrap();
        let negative = b.less_than(x, zero);
        b.if_then(&mut then_path, negative);
        let r = b.load("r").unwrap();
        b.return_value(r);
    }
    let then_path = then_path.unwrap();
    {
        let mut t = mb.at(then_path);
        let one = t.const_i32(1);
        t.store("r", one).unwrap();
    }
    mb.connect().unwrap();
    assert!(mb.comes_back(then_path));
    assert!(!mb.comes_back(mb.root_id()));

    let compiled = mb.finish().unwrap();
    assert_eq!(run(&compiled, &[-3]), 1);
    assert_eq!(run(&compiled, &[3]), 0);
}

// =============================================================================
// Short-circuit Conditions
// =============================================================================

fn term(
    mb: &mut MethodBuilder,
    cmp: fn(&mut IlBuilder<'_>, Value, Value) -> Value,
    bound: i32,
) -> (BuilderId, Value) {
    let id = mb.orphan_builder();
    let mut t = mb.at(id);
    let x = t.load("x").unwrap();
    let bound = t.const_i32(bound);
    let condition = cmp(&mut t, x, bound);
    (id, condition)
}

fn fill_flag(mb: &mut MethodBuilder, path: Option<BuilderId>, value: i32) {
    let mut b = mb.at(path.unwrap());
    let v = b.const_i32(value);
    b.store("r", v).unwrap();
}

#[test]
fn test_if_and() {
    let mut mb = unary_int_method("in_range");
    mb.define_local("r", DataType::Int32);
    let lower = term(&mut mb, |b, x, y| b.greater_than(x, y), 0);
    let upper = term(&mut mb, |b, x, y| b.less_than(x, y), 10);
    let (mut all_true, mut any_false) = (None, None);
    {
        let mut b = mb.root();
        b.if_and(&mut all_true, &mut any_false, &[lower, upper]);
        let r = b.load("r").unwrap();
        b.return_value(r);
    }
    fill_flag(&mut mb, all_true, 1);
    fill_flag(&mut mb, any_false, 0);

    let compiled = mb.finish().unwrap();
    assert_eq!(run(&compiled, &[5]), 1);
    assert_eq!(run(&compiled, &[0]), 0);
    assert_eq!(run(&compiled, &[10]), 0);
}

#[test]
fn test_if_or() {
    let mut mb = unary_int_method("out_of_range");
    mb.define_local("r", DataType::Int32);
    let below = term(&mut mb, |b, x, y| b.less_than(x, y), 0);
    let above = term(&mut mb, |b, x, y| b.greater_than(x, y), 10);
    let (mut any_true, mut all_false) = (None, None);
    {
        let mut b = mb.root();
        b.if_or(&mut any_true, &mut all_false, &[below, above]);
        let r = b.load("r").unwrap();
        b.return_value(r);
    }
    fill_flag(&mut mb, any_true, 1);
    fill_flag(&mut mb, all_false, 0);

    let compiled = mb.finish().unwrap();
    assert_eq!(run(&compiled, &[-1]), 1);
    assert_eq!(run(&compiled, &[11]), 1);
    assert_eq!(run(&compiled, &[4]), 0);
}

// =============================================================================
// Loops
// =============================================================================

#[test]
fn test_for_loop_has_one_back_edge() {
    let mut mb = unary_int_method("triangle");
    let mut body = None;
    {
        let mut b = mb.root();
        let zero = b.const_i32(0);
        b.store("sum", zero).unwrap();
        let end = b.load("x").unwrap();
        let one = b.const_i32(1);
        b.for_loop_up("i", &mut body, zero, end, one).unwrap();
        let sum = b.load("sum").unwrap();
        b.return_value(sum);
    }
    {
        let mut b = mb.at(body.unwrap());
        let sum = b.load("sum").unwrap();
        let i = b.load("i").unwrap();
        let next = b.add(sum, i);
        b.store("sum", next).unwrap();
    }

    let compiled = mb.finish().unwrap();
    assert!(compiled.may_have_loops());

    let func = compiled.function();
    let cfg = Cfg::build(func);
    let dom = DominatorTree::build(func, &cfg);
    let loops = LoopAnalysis::compute(func, &cfg, &dom);
    assert_eq!(loops.back_edge_count(), 1);

    assert_eq!(run(&compiled, &[5]), 10);
    assert_eq!(run(&compiled, &[1]), 0);
    assert_eq!(run(&compiled, &[0]), 0);
}

#[test]
fn test_while_do_loop() {
    let mut mb = unary_int_method("double");
    let mut body = None;
    {
        let mut b = mb.root();
        let zero = b.const_i32(0);
        b.store("acc", zero).unwrap();
        let x = b.load("x").unwrap();
        b.store("count", x).unwrap();
        let more = b.greater_than(x, zero);
        b.store("more", more).unwrap();
        b.while_do_loop("more", &mut body).unwrap();
        let acc = b.load("acc").unwrap();
        b.return_value(acc);
    }
    {
        let mut b = mb.at(body.unwrap());
        let one = b.const_i32(1);
        let two = b.const_i32(2);
        let zero = b.const_i32(0);
        let count = b.load("count").unwrap();
        let count = b.sub(count, one);
        b.store("count", count).unwrap();
        let acc = b.load("acc").unwrap();
        let acc = b.add(acc, two);
        b.store("acc", acc).unwrap();
        let more = b.greater_than(count, zero);
        b.store("more", more).unwrap();
    }

    let compiled = mb.finish().unwrap();
    assert_eq!(run(&compiled, &[3]), 6);
    assert_eq!(run(&compiled, &[0]), 0);
}

#[test]
fn test_do_while_loop_runs_once() {
    let mut mb = unary_int_method("at_least_once");
    let mut body = None;
    {
        let mut b = mb.root();
        let zero = b.const_i32(0);
        b.store("n", zero).unwrap();
        b.store("more", zero).unwrap();
        b.do_while_loop("more", &mut body).unwrap();
        let n = b.load("n").unwrap();
        b.return_value(n);
    }
    {
        let mut b = mb.at(body.unwrap());
        let one = b.const_i32(1);
        let n = b.load("n").unwrap();
        let n = b.add(n, one);
        b.store("n", n).unwrap();
        let x = b.load("x").unwrap();
        let more = b.less_than(n, x);
        b.store("more", more).unwrap();
    }

    let compiled = mb.finish().unwrap();
    assert!(compiled.may_have_loops());
    assert_eq!(run(&compiled, &[0]), 1);
    assert_eq!(run(&compiled, &[4]), 4);
}

// =============================================================================
// Switch
// =============================================================================

#[test]
fn test_switch_fallthrough_has_no_goto() {
    let mut mb = unary_int_method("dispatch");
    let mut default = None;
    let mut cases = [Case::new(1, true), Case::new(2, false)];
    {
        let mut b = mb.root();
        let zero = b.const_i32(0);
        b.store("r", zero).unwrap();
        let x = b.load("x").unwrap();
        b.switch(x, &mut default, &mut cases);
        let r = b.load("r").unwrap();
        b.return_value(r);
    }
    let first = cases[0].builder.unwrap();
    let second = cases[1].builder.unwrap();
    {
        let mut b = mb.at(first);
        let one = b.const_i32(1);
        b.store("r", one).unwrap();
    }
    {
        let mut b = mb.at(second);
        let r = b.load("r").unwrap();
        let two = b.const_i32(2);
        let r = b.add(r, two);
        b.store("r", r).unwrap();
    }
    {
        let mut b = mb.at(default.unwrap());
        let v = b.const_i32(100);
        b.store("r", v).unwrap();
    }
    mb.connect().unwrap();

    let first_exit = mb.at(first).exit_block();
    let second_entry = mb.at(second).entry_block();
    let func = mb.function();
    let mut block = first_exit;
    while block != second_entry {
        let data = func.block(block);
        assert!(
            data.operations.is_empty(),
            "B{} sits between the arms with {} operations",
            block,
            data.operations.len()
        );
        block = data.layout_next.expect("second arm follows the first");
    }

    let compiled = mb.finish().unwrap();
    assert_eq!(run(&compiled, &[1]), 3);
    assert_eq!(run(&compiled, &[2]), 2);
    assert_eq!(run(&compiled, &[7]), 100);
}

// =============================================================================
// Bytecode Builders
// =============================================================================

/// Operand stack of `Int32` slots in frame memory, with the stack pointer
/// stored in a separate cell and addressing the top element.
fn operand_stack(mb: &mut MethodBuilder) -> VmState {
    let mut b = mb.root();
    let memory = b.create_local_array(16, DataType::Int32);
    let cell = b.create_local_array(1, DataType::Address);
    let minus_one = b.const_i64(-1);
    let empty = b.index_at(DataType::Int32, memory, minus_one);
    b.store_at(cell, empty);

    let sp = VirtualMachineRegister::new(&mut b, "sp", DataType::Address, 4, cell).unwrap();
    VirtualMachineOperandStack::growing_up(&mut b, sp, DataType::Int32)
        .unwrap()
        .into()
}

#[test]
fn test_merge_conflict_inserts_one_intermediate() {
    let mut mb = unary_int_method("merge");
    let state = operand_stack(&mut mb);
    mb.set_vm_state(state);

    let b0 = mb.bytecode_builder(0);
    let b1 = mb.bytecode_builder(1);
    let b2 = mb.bytecode_builder(2);
    mb.append_bytecode_builder(b0);

    while let Some(index) = mb.get_next_bytecode_from_worklist() {
        match index {
            // push x; if x > 0 goto 2
            0 => {
                let mut b = mb.at(b0);
                let x = b.load("x").unwrap();
                b.stack_push(x);
                let zero = b.const_i32(0);
                let mut taken = b2;
                b.bc_if_cmp(CmpOp::Gt, &mut taken, x, zero);
                assert_eq!(taken, b2, "first arrival needs no intermediate");
                let mut next = b1;
                b.add_fall_through_builder(&mut next);
                assert_eq!(next, b1);
            }
            // push pop + 10
            1 => {
                let mut b = mb.at(b1);
                let top = b.stack_pop();
                let ten = b.const_i32(10);
                let sum = b.add(top, ten);
                b.stack_push(sum);
                let mut next = b2;
                b.add_fall_through_builder(&mut next);
                assert_ne!(next, b2, "second arrival goes through an intermediate");
            }
            // return pop
            2 => {
                let mut b = mb.at(b2);
                let top = b.stack_pop();
                b.return_value(top);
            }
            other => panic!("unexpected bytecode index {}", other),
        }
    }

    assert_eq!(mb.bytecode_builders().len(), 4);
    let intermediate = mb.bytecode_builders()[3];
    assert_eq!(mb.at(intermediate).bc_index(), 2);
    assert_eq!(mb.at(intermediate).fall_through(), Some(b2));
    assert_eq!(mb.at(b0).successors(), &[b2, b1]);
    assert_eq!(mb.at(b1).successors(), &[intermediate]);

    let entry = mb.at(intermediate).entry_block();
    let stores = mb
        .function()
        .block(entry)
        .operations
        .iter()
        .filter(|op| op.opcode == OpCode::StoreOver)
        .count();
    assert_eq!(stores, 1);
    assert!(!mb.may_have_loops());

    let compiled = mb.finish().unwrap();
    assert_eq!(run(&compiled, &[5]), 5);
    assert_eq!(run(&compiled, &[-3]), 7);
    assert_eq!(run(&compiled, &[0]), 10);
}

#[test]
fn test_merge_into_duplicated_slots() {
    // 0: push x; dup; if x > 0 goto 2
    // 1: pop; pop; push 7; push 8
    // 2: a = pop; b = pop; return a * 10 + b
    let mut mb = unary_int_method("dup_merge");
    let state = operand_stack(&mut mb);
    mb.set_vm_state(state);

    let b0 = mb.bytecode_builder(0);
    let b1 = mb.bytecode_builder(1);
    let b2 = mb.bytecode_builder(2);
    mb.append_bytecode_builder(b0);

    while let Some(index) = mb.get_next_bytecode_from_worklist() {
        match index {
            0 => {
                let mut b = mb.at(b0);
                let x = b.load("x").unwrap();
                b.stack_push(x);
                b.stack_dup();
                let zero = b.const_i32(0);
                let mut taken = b2;
                b.bc_if_cmp(CmpOp::Gt, &mut taken, x, zero);
                let mut next = b1;
                b.add_fall_through_builder(&mut next);
            }
            1 => {
                let mut b = mb.at(b1);
                b.stack_drop(2);
                let seven = b.const_i32(7);
                let eight = b.const_i32(8);
                b.stack_push(seven);
                b.stack_push(eight);
                let mut next = b2;
                b.add_fall_through_builder(&mut next);
            }
            2 => {
                let mut b = mb.at(b2);
                let a = b.stack_pop();
                let below = b.stack_pop();
                let ten = b.const_i32(10);
                let scaled = b.mul(a, ten);
                let result = b.add(scaled, below);
                b.return_value(result);
            }
            other => panic!("unexpected bytecode index {}", other),
        }
    }

    let initial = mb.at(b2).initial_vm_state().cloned().unwrap();
    let slots = initial.operand_stack().unwrap().values().to_vec();
    assert_eq!(slots.len(), 2);
    assert_ne!(slots[0], slots[1], "initial state slots must not share a value");

    let compiled = mb.finish().unwrap();
    assert_eq!(run(&compiled, &[3]), 33);
    assert_eq!(run(&compiled, &[-1]), 87);
}

#[test]
fn test_bytecode_loop_counts_down() {
    // 0: push x
    // 1: if top == 0 goto 3
    // 2: push pop - 1; goto 1
    // 3: return pop
    let mut mb = unary_int_method("countdown");
    let state = operand_stack(&mut mb);
    mb.set_vm_state(state);
    let builders: Vec<BuilderId> = (0..4).map(|i| mb.bytecode_builder(i)).collect();
    let target = |index: usize| builders[index];
    mb.append_bytecode_builder(builders[0]);

    while let Some(index) = mb.get_next_bytecode_from_worklist() {
        let mut b = mb.at(builders[index as usize]);
        match index {
            0 => {
                let x = b.load("x").unwrap();
                b.stack_push(x);
                b.add_fall_through_builder(&mut target(1));
            }
            1 => {
                let top = b.stack_top();
                b.bc_if_cmp_equal_zero(&mut target(3), top);
                b.add_fall_through_builder(&mut target(2));
            }
            2 => {
                let top = b.stack_pop();
                let one = b.const_i32(1);
                let next = b.sub(top, one);
                b.stack_push(next);
                b.bc_goto(&mut target(1));
            }
            _ => {
                let top = b.stack_pop();
                b.return_value(top);
            }
        }
    }

    let compiled = mb.finish().unwrap();
    assert!(compiled.may_have_loops());
    assert_eq!(run(&compiled, &[3]), 0);
    assert_eq!(run(&compiled, &[0]), 0);
}

// =============================================================================
// Handlers and Transactions
// =============================================================================

#[test]
fn test_overflow_handler() {
    let mut mb = method("checked_add");
    mb.define_parameter("a", DataType::Int32)
        .define_parameter("b", DataType::Int32)
        .define_return_type(DataType::Int32);

    let (mut handler, mut overflowed) = (None, None);
    {
        let mut b = mb.root();
        let zero = b.const_i32(0);
        b.store("ov", zero).unwrap();
        let lhs = b.load("a").unwrap();
        let rhs = b.load("b").unwrap();
        let sum = b.add_with_overflow(&mut handler, lhs, rhs);
        let ov = b.load("ov").unwrap();
        b.if_then(&mut overflowed, ov);
        b.return_value(sum);
    }
    {
        let mut h = mb.at(handler.unwrap());
        let one = h.const_i32(1);
        h.store("ov", one).unwrap();
    }
    {
        let mut o = mb.at(overflowed.unwrap());
        let minus_one = o.const_i32(-1);
        o.return_value(minus_one);
    }

    let handler_entry = mb.at(handler.unwrap()).entry_block();
    let compiled = mb.finish().unwrap();
    let func = compiled.function();
    assert!(func.block(handler_entry).is_handler);
    assert!(func.block(handler_entry).is_cold);
    assert!(func
        .layout()
        .iter()
        .any(|&b| func.block(b).exception_successors.contains(&handler_entry)));

    assert_eq!(run(&compiled, &[1, 2]), 3);
    assert_eq!(run(&compiled, &[i32::MAX as i64, 1]), -1);
}

fn transaction_method(config: BuilderConfig, abort: bool) -> CompiledMethod {
    init_tracing();
    let mut mb = MethodBuilder::new("txn", config);
    mb.define_return_type(DataType::Int32)
        .define_local("r", DataType::Int32);
    let (mut persistent, mut transient, mut body) = (None, None, None);
    {
        let mut b = mb.root();
        b.transaction(&mut persistent, &mut transient, &mut body);
        let r = b.load("r").unwrap();
        b.return_value(r);
    }
    for (path, value) in [(body, 1), (persistent, 2), (transient, 3)] {
        let mut b = mb.at(path.unwrap());
        let v = b.const_i32(value);
        b.store("r", v).unwrap();
    }
    if abort {
        mb.at(body.unwrap()).transaction_abort();
    }
    mb.finish().unwrap()
}

#[test]
fn test_transaction_with_memory_support() {
    let compiled = transaction_method(BuilderConfig::for_testing(), false);
    assert_eq!(run(&compiled, &[]), 1);

    let aborted = transaction_method(BuilderConfig::for_testing(), true);
    assert_eq!(run(&aborted, &[]), 2);
}

#[test]
fn test_transaction_without_memory_support() {
    let config = BuilderConfig::for_testing().with_capabilities(Capabilities {
        transactional_memory: false,
        atomic_add: true,
    });
    let compiled = transaction_method(config, false);
    assert!(!compiled
        .function()
        .layout()
        .iter()
        .any(|&b| compiled.function().block(b).operations.iter().any(|op| {
            matches!(op.opcode, OpCode::TransactionBegin | OpCode::TransactionEnd)
        })));
    assert_eq!(run(&compiled, &[]), 2);
}

// =============================================================================
// Calls and Listings
// =============================================================================

#[test]
fn test_call_host_function() {
    let mut mb = unary_int_method("twice");
    mb.define_function(
        "double",
        DataType::Int32,
        &[DataType::Int32],
        Some(std::rc::Rc::new(|_: &mut Memory, args: &[Scalar]| {
            Scalar::Int(args[0].as_int() * 2)
        })),
    );
    {
        let mut b = mb.root();
        let x = b.load("x").unwrap();
        let doubled = b.call("double", &[x]).unwrap().unwrap();
        b.return_value(doubled);
    }
    let compiled = mb.finish().unwrap();
    assert_eq!(run(&compiled, &[21]), 42);
}

#[test]
fn test_listing_is_dumped() {
    let dir = tempfile::tempdir().unwrap();
    let mut mb = MethodBuilder::new(
        "dumped",
        BuilderConfig::for_testing().with_dump_dir(dir.path()),
    );
    mb.root().return_void();
    let compiled = mb.finish().unwrap();

    let listing = std::fs::read_to_string(dir.path().join("dumped.il")).unwrap();
    assert_eq!(listing, compiled.listing());
    assert!(listing.starts_with("method dumped("));
}

#[test]
fn test_listing_stays_in_dump_dir() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("dumps");
    let mut mb = MethodBuilder::new(
        "../outside/m",
        BuilderConfig::for_testing().with_dump_dir(&dir),
    );
    mb.root().return_void();
    mb.finish().unwrap();

    let files: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(files, vec![std::ffi::OsString::from(".._outside_m.il")]);
    assert!(!root.path().join("outside").exists());
}
