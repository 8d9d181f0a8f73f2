//! Control transfers and structured control-flow constructs.
//!
//! Every construct here is expressed with the engine primitives alone:
//! appending builders and blocks, and emitting transfers whose edges the
//! engine records. Targets are taken as `&mut Option<BuilderId>`; a `None`
//! target is replaced by a fresh orphan builder that the caller fills in
//! afterwards.

use cinder_il::{BlockId, CmpOp, DataType, OpCode, Value};
use smallvec::{smallvec, SmallVec};

use super::{ArithmeticBuilder, BuilderId, IlBuilder};
use crate::error::BuildResult;

/// One arm of a [`ControlBuilder::switch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Case {
    pub value: i64,
    /// Code for the arm; allocated by `switch` when `None`.
    pub builder: Option<BuilderId>,
    /// Continue into the next arm instead of leaving the switch.
    pub falls_through: bool,
}

impl Case {
    pub fn new(value: i64, falls_through: bool) -> Self {
        Case {
            value,
            builder: None,
            falls_through,
        }
    }

    pub fn with_builder(value: i64, builder: BuilderId, falls_through: bool) -> Self {
        Case {
            value,
            builder: Some(builder),
            falls_through,
        }
    }
}

/// Builders a loop body can transfer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTargets {
    /// Placed after the loop; jumping here leaves it.
    pub break_builder: BuilderId,
    /// Runs the update and re-test; jumping here starts the next iteration.
    pub continue_builder: BuilderId,
}

/// Builder trait for control flow.
pub trait ControlBuilder {
    // Transfers
    fn goto(&mut self, target: &mut Option<BuilderId>) -> BuilderId;
    fn goto_builder(&mut self, target: BuilderId);
    fn return_void(&mut self);
    fn return_value(&mut self, value: Value);

    // Conditional Transfers
    fn if_cmp(
        &mut self,
        op: CmpOp,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId;
    fn if_cmp_equal(&mut self, target: &mut Option<BuilderId>, lhs: Value, rhs: Value) -> BuilderId;
    fn if_cmp_not_equal(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId;
    fn if_cmp_less_than(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId;
    fn if_cmp_less_or_equal(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId;
    fn if_cmp_greater_than(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId;
    fn if_cmp_greater_or_equal(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId;
    fn if_cmp_unsigned_less_than(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId;
    fn if_cmp_unsigned_greater_than(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId;
    fn if_cmp_equal_zero(&mut self, target: &mut Option<BuilderId>, value: Value) -> BuilderId;
    fn if_cmp_not_equal_zero(&mut self, target: &mut Option<BuilderId>, value: Value) -> BuilderId;

    // Structured Control Flow
    fn if_then(&mut self, then_path: &mut Option<BuilderId>, condition: Value);
    fn if_then_else(
        &mut self,
        then_path: Option<&mut Option<BuilderId>>,
        else_path: Option<&mut Option<BuilderId>>,
        condition: Value,
    );
    fn if_and(
        &mut self,
        all_true: &mut Option<BuilderId>,
        any_false: &mut Option<BuilderId>,
        terms: &[(BuilderId, Value)],
    );
    fn if_or(
        &mut self,
        any_true: &mut Option<BuilderId>,
        all_false: &mut Option<BuilderId>,
        terms: &[(BuilderId, Value)],
    );

    // Loops
    fn for_loop(
        &mut self,
        counts_up: bool,
        index: &str,
        body: &mut Option<BuilderId>,
        initial: Value,
        end: Value,
        increment: Value,
    ) -> BuildResult<LoopTargets>;
    fn for_loop_up(
        &mut self,
        index: &str,
        body: &mut Option<BuilderId>,
        initial: Value,
        end: Value,
        increment: Value,
    ) -> BuildResult<LoopTargets>;
    fn while_do_loop(
        &mut self,
        condition: &str,
        body: &mut Option<BuilderId>,
    ) -> BuildResult<LoopTargets>;
    fn do_while_loop(
        &mut self,
        condition: &str,
        body: &mut Option<BuilderId>,
    ) -> BuildResult<LoopTargets>;

    // Multi-way Dispatch
    fn switch(&mut self, selector: Value, default: &mut Option<BuilderId>, cases: &mut [Case]);
}

impl IlBuilder<'_> {
    /// Jump to a block of this method.
    pub(crate) fn goto_block(&mut self, target: BlockId) {
        self.emit_transfer(OpCode::Goto, &[], &[target]);
    }

    fn entry_of(&self, id: BuilderId) -> BlockId {
        self.mb.builders[id].entry_block
    }

    fn is_placed(&self, id: BuilderId) -> bool {
        self.mb.builders[id].part_of_sequence
    }

    /// Put a conditional path inline, or jump to it when it already lives
    /// in another sequence.
    fn append_path(&mut self, path: BuilderId) {
        if self.is_placed(path) {
            self.goto_builder(path);
        } else {
            self.append_builder(path);
        }
    }

    fn trace_construct(&self, construct: &'static str) {
        if self.trace() {
            tracing::debug!(builder = %self.id, construct, "control construct");
        }
    }
}

impl ControlBuilder for IlBuilder<'_> {
    fn goto(&mut self, target: &mut Option<BuilderId>) -> BuilderId {
        let target = self.prepare_target(target);
        self.goto_builder(target);
        target
    }

    fn goto_builder(&mut self, target: BuilderId) {
        let entry = self.entry_of(target);
        self.goto_block(entry);
    }

    fn return_void(&mut self) {
        self.emit_transfer(OpCode::Return, &[], &[]);
    }

    fn return_value(&mut self, value: Value) {
        debug_assert_eq!(
            self.value_type(value),
            self.mb.func.return_type(),
            "return value type does not match the method"
        );
        self.emit_transfer(OpCode::Return, &[value], &[]);
    }

    fn if_cmp(
        &mut self,
        op: CmpOp,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId {
        let target = self.prepare_target(target);
        let entry = self.entry_of(target);
        self.emit_transfer(OpCode::Branch(op), &[lhs, rhs], &[entry]);
        target
    }

    fn if_cmp_equal(&mut self, target: &mut Option<BuilderId>, lhs: Value, rhs: Value) -> BuilderId {
        self.if_cmp(CmpOp::Eq, target, lhs, rhs)
    }

    fn if_cmp_not_equal(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId {
        self.if_cmp(CmpOp::Ne, target, lhs, rhs)
    }

    fn if_cmp_less_than(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId {
        self.if_cmp(CmpOp::Lt, target, lhs, rhs)
    }

    fn if_cmp_less_or_equal(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId {
        self.if_cmp(CmpOp::Le, target, lhs, rhs)
    }

    fn if_cmp_greater_than(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId {
        self.if_cmp(CmpOp::Gt, target, lhs, rhs)
    }

    fn if_cmp_greater_or_equal(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId {
        self.if_cmp(CmpOp::Ge, target, lhs, rhs)
    }

    fn if_cmp_unsigned_less_than(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId {
        self.if_cmp(CmpOp::ULt, target, lhs, rhs)
    }

    fn if_cmp_unsigned_greater_than(
        &mut self,
        target: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> BuilderId {
        self.if_cmp(CmpOp::UGt, target, lhs, rhs)
    }

    fn if_cmp_equal_zero(&mut self, target: &mut Option<BuilderId>, value: Value) -> BuilderId {
        let ty = self.value_type(value);
        let zero = self.zero(ty);
        self.if_cmp(CmpOp::Eq, target, value, zero)
    }

    fn if_cmp_not_equal_zero(&mut self, target: &mut Option<BuilderId>, value: Value) -> BuilderId {
        let ty = self.value_type(value);
        let zero = self.zero(ty);
        self.if_cmp(CmpOp::Ne, target, value, zero)
    }

    fn if_then(&mut self, then_path: &mut Option<BuilderId>, condition: Value) {
        self.if_then_else(Some(then_path), None, condition);
    }

    /// # Panics
    ///
    /// Panics if neither path is supplied.
    fn if_then_else(
        &mut self,
        then_path: Option<&mut Option<BuilderId>>,
        else_path: Option<&mut Option<BuilderId>>,
        condition: Value,
    ) {
        let ty = self.value_type(condition);
        let zero = self.zero(ty);
        let merge = self.mb.func.new_block();

        match (then_path, else_path) {
            (Some(then_path), None) => {
                let then_b = self.prepare_target(then_path);
                self.emit_transfer(OpCode::Branch(CmpOp::Eq), &[condition, zero], &[merge]);
                self.append_path(then_b);
            }
            (None, Some(else_path)) => {
                let else_b = self.prepare_target(else_path);
                self.emit_transfer(OpCode::Branch(CmpOp::Ne), &[condition, zero], &[merge]);
                self.append_path(else_b);
            }
            (Some(then_path), Some(else_path)) => {
                let then_b = self.prepare_target(then_path);
                let else_b = self.prepare_target(else_path);
                let then_entry = self.entry_of(then_b);
                self.emit_transfer(OpCode::Branch(CmpOp::Ne), &[condition, zero], &[then_entry]);
                self.append_path(else_b);
                self.goto_block(merge);
                if !self.is_placed(then_b) {
                    self.append_builder(then_b);
                }
            }
            (None, None) => panic!("if_then_else needs at least one path"),
        }

        self.append_block(merge);
        self.trace_construct("if_then_else");
    }

    /// # Panics
    ///
    /// Panics if `terms` is empty.
    fn if_and(
        &mut self,
        all_true: &mut Option<BuilderId>,
        any_false: &mut Option<BuilderId>,
        terms: &[(BuilderId, Value)],
    ) {
        assert!(!terms.is_empty(), "if_and needs at least one term");
        let all_true = self.prepare_target(all_true);
        let any_false = self.prepare_target(any_false);
        let merge = self.orphan_builder();

        for &(term, condition) in terms {
            self.append_builder(term);
            self.at(term).if_cmp_equal_zero(&mut Some(any_false), condition);
        }

        self.append_builder(all_true);
        self.goto_builder(merge);
        self.append_builder(any_false);
        self.append_builder(merge);
        self.trace_construct("if_and");
    }

    /// The last term is tested inverted so that success falls straight
    /// into `any_true`.
    ///
    /// # Panics
    ///
    /// Panics if `terms` is empty.
    fn if_or(
        &mut self,
        any_true: &mut Option<BuilderId>,
        all_false: &mut Option<BuilderId>,
        terms: &[(BuilderId, Value)],
    ) {
        assert!(!terms.is_empty(), "if_or needs at least one term");
        let any_true = self.prepare_target(any_true);
        let all_false = self.prepare_target(all_false);
        let merge = self.orphan_builder();

        let last = terms.len() - 1;
        for (i, &(term, condition)) in terms.iter().enumerate() {
            self.append_builder(term);
            let mut t = self.at(term);
            if i < last {
                t.if_cmp_not_equal_zero(&mut Some(any_true), condition);
            } else {
                t.if_cmp_equal_zero(&mut Some(all_false), condition);
            }
        }

        self.append_builder(any_true);
        self.goto_builder(merge);
        self.append_builder(all_false);
        self.append_builder(merge);
        self.trace_construct("if_or");
    }

    fn for_loop(
        &mut self,
        counts_up: bool,
        index: &str,
        body: &mut Option<BuilderId>,
        initial: Value,
        end: Value,
        increment: Value,
    ) -> BuildResult<LoopTargets> {
        self.mb.set_may_have_loops();
        let body = self.prepare_target(body);
        self.store(index, initial)?;

        let loop_body = self.orphan_builder();
        let current = self.load(index)?;
        let enter = if counts_up {
            self.less_than(current, end)
        } else {
            self.greater_than(current, end)
        };
        self.if_then(&mut Some(loop_body), enter);

        let loop_continue = self.orphan_builder();
        {
            let mut lb = self.at(loop_body);
            lb.append_builder(body);
            lb.append_builder(loop_continue);
        }
        {
            let mut lc = self.at(loop_continue);
            let current = lc.load(index)?;
            let next = if counts_up {
                lc.add(current, increment)
            } else {
                lc.sub(current, increment)
            };
            lc.store(index, next)?;
            let current = lc.load(index)?;
            if counts_up {
                lc.if_cmp_less_than(&mut Some(loop_body), current, end);
            } else {
                lc.if_cmp_greater_than(&mut Some(loop_body), current, end);
            }
        }

        let done = self.orphan_builder();
        self.append_builder(done);
        self.trace_construct("for_loop");
        Ok(LoopTargets {
            break_builder: done,
            continue_builder: loop_continue,
        })
    }

    fn for_loop_up(
        &mut self,
        index: &str,
        body: &mut Option<BuilderId>,
        initial: Value,
        end: Value,
        increment: Value,
    ) -> BuildResult<LoopTargets> {
        self.for_loop(true, index, body, initial, end, increment)
    }

    /// Runs `body` while the `Int32` local `condition` is non-zero, testing
    /// before each iteration.
    fn while_do_loop(
        &mut self,
        condition: &str,
        body: &mut Option<BuilderId>,
    ) -> BuildResult<LoopTargets> {
        self.mb.set_may_have_loops();
        let body = self.prepare_target(body);
        let condition = self.local_symbol(condition, DataType::Int32)?;

        let done = self.orphan_builder();
        let loop_continue = self.orphan_builder();
        self.append_builder(loop_continue);
        {
            let mut lc = self.at(loop_continue);
            let value = lc.load_symbol(condition);
            lc.if_cmp_equal_zero(&mut Some(done), value);
        }

        self.append_builder(body);
        self.goto_builder(loop_continue);
        self.append_builder(done);
        self.trace_construct("while_do_loop");
        Ok(LoopTargets {
            break_builder: done,
            continue_builder: loop_continue,
        })
    }

    /// Runs `body` once, then again while the `Int32` local `condition`
    /// is non-zero.
    fn do_while_loop(
        &mut self,
        condition: &str,
        body: &mut Option<BuilderId>,
    ) -> BuildResult<LoopTargets> {
        self.mb.set_may_have_loops();
        let body = self.prepare_target(body);
        let condition = self.local_symbol(condition, DataType::Int32)?;

        self.append_builder(body);
        let loop_continue = self.orphan_builder();
        self.append_builder(loop_continue);
        {
            let mut lc = self.at(loop_continue);
            let value = lc.load_symbol(condition);
            lc.if_cmp_not_equal_zero(&mut Some(body), value);
        }

        let done = self.orphan_builder();
        self.append_builder(done);
        self.trace_construct("do_while_loop");
        Ok(LoopTargets {
            break_builder: done,
            continue_builder: loop_continue,
        })
    }

    /// Dispatch on `selector`. Arms that do not fall through are wrapped
    /// so that they leave through a shared break builder; the default arm
    /// is placed last and falls into it.
    fn switch(&mut self, selector: Value, default: &mut Option<BuilderId>, cases: &mut [Case]) {
        let default = self.prepare_target(default);
        let done = self.orphan_builder();

        let mut values: SmallVec<[i64; 4]> = SmallVec::with_capacity(cases.len());
        let mut targets: SmallVec<[BlockId; 8]> = smallvec![self.entry_of(default)];
        let mut arms: SmallVec<[BuilderId; 8]> = SmallVec::with_capacity(cases.len());
        for case in cases.iter_mut() {
            let code = self.prepare_target(&mut case.builder);
            let arm = if case.falls_through {
                code
            } else {
                let wrapper = self.orphan_builder();
                let mut w = self.at(wrapper);
                w.append_builder(code);
                w.goto_builder(done);
                wrapper
            };
            values.push(case.value);
            targets.push(self.entry_of(arm));
            arms.push(arm);
        }

        self.emit_transfer(OpCode::Switch { cases: values }, &[selector], &targets);
        for arm in arms {
            self.append_builder(arm);
        }
        self.append_builder(default);
        self.append_builder(done);
        self.trace_construct("switch");
    }
}
