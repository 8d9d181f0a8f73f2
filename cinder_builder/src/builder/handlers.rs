//! Exception handlers, overflow-checked arithmetic and transactional
//! regions.

use cinder_il::{ArithOp, BlockId, OpCode, Operation, Value};

use super::{BuilderId, ControlBuilder, IlBuilder};

/// Builder trait for exceptional and transactional control flow.
pub trait HandlerBuilder {
    /// Attach `handler` to the operation that ends `risky`.
    ///
    /// The current block is split after the risky operation and jumps
    /// over the handler; the handler, entered only through the exception
    /// edge, falls into the same continuation.
    fn append_exception_handler(&mut self, risky: BlockId, handler: &mut Option<BuilderId>);

    // Overflow-checked Arithmetic
    fn add_with_overflow(
        &mut self,
        handler: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> Value;
    fn sub_with_overflow(
        &mut self,
        handler: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> Value;
    fn mul_with_overflow(
        &mut self,
        handler: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> Value;

    // Transactions
    /// Run `body` as a hardware transaction.
    ///
    /// Without transactional memory the region always takes the
    /// persistent-failure path; the body and transient-failure path are
    /// still placed, unreachable.
    fn transaction(
        &mut self,
        persistent_failure: &mut Option<BuilderId>,
        transient_failure: &mut Option<BuilderId>,
        body: &mut Option<BuilderId>,
    );
    fn transaction_abort(&mut self);
}

impl IlBuilder<'_> {
    fn checked(
        &mut self,
        op: ArithOp,
        handler: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> Value {
        let (lt, rt) = (self.value_type(lhs), self.value_type(rhs));
        assert!(
            lt.is_integer() && lt == rt,
            "{} with overflow needs matching integer operands, got {} and {}",
            op.mnemonic(),
            lt,
            rt
        );
        let result = self.emit_value(OpCode::CheckedArith(op), &[lhs, rhs], lt);
        let risky = self.ensure_open();
        self.append_exception_handler(risky, handler);
        result
    }
}

impl HandlerBuilder for IlBuilder<'_> {
    fn append_exception_handler(&mut self, risky: BlockId, handler: &mut Option<BuilderId>) {
        let handler = self.prepare_target(handler);
        let after = self.orphan_builder();

        self.close_block(true);
        self.goto_builder(after);

        self.mark_handler(handler);
        let handler_entry = self.mb.builders[handler].entry_block;
        self.mb.func.add_exception_edge(risky, handler_entry);
        self.append_builder(handler);
        self.append_builder(after);

        if self.trace() {
            tracing::debug!(
                builder = %self.id,
                risky = %risky,
                handler = %handler,
                "append exception handler"
            );
        }
    }

    fn add_with_overflow(
        &mut self,
        handler: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> Value {
        self.checked(ArithOp::Add, handler, lhs, rhs)
    }

    fn sub_with_overflow(
        &mut self,
        handler: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> Value {
        self.checked(ArithOp::Sub, handler, lhs, rhs)
    }

    fn mul_with_overflow(
        &mut self,
        handler: &mut Option<BuilderId>,
        lhs: Value,
        rhs: Value,
    ) -> Value {
        self.checked(ArithOp::Mul, handler, lhs, rhs)
    }

    fn transaction(
        &mut self,
        persistent_failure: &mut Option<BuilderId>,
        transient_failure: &mut Option<BuilderId>,
        body: &mut Option<BuilderId>,
    ) {
        let persistent = self.prepare_target(persistent_failure);
        let transient = self.prepare_target(transient_failure);
        let body = self.prepare_target(body);
        let merge = self.mb.func.new_block();
        let supported = self.mb.config.capabilities.transactional_memory;
        if supported {
            self.mark_cold(persistent);
        }

        if supported {
            let targets = [
                self.mb.builders[persistent].entry_block,
                self.mb.builders[transient].entry_block,
            ];
            self.emit_transfer(OpCode::TransactionBegin, &[], &targets);
            self.append_builder(body);
            self.emit(Operation::new(OpCode::TransactionEnd, &[]));
        } else {
            self.goto_builder(persistent);
            self.append_builder(body);
        }
        self.goto_block(merge);
        self.append_builder(transient);
        self.goto_block(merge);
        self.append_builder(persistent);
        self.append_block(merge);

        if self.trace() {
            tracing::debug!(builder = %self.id, supported, "transaction");
        }
    }

    fn transaction_abort(&mut self) {
        self.emit_transfer(OpCode::TransactionAbort, &[], &[]);
    }
}
