//! Method builder and compile driver.
//!
//! A [`MethodBuilder`] owns everything one method compile produces: the
//! [`IlFunction`] being filled, the arena of builders, the type dictionary,
//! the function table and the bytecode worklist. Its root builder is the
//! method body; [`MethodBuilder::root`] hands out a cursor for it.
//!
//! The compile pipeline is:
//!
//! 1. the client's [`MethodBody::build_il`] appends content,
//! 2. [`MethodBuilder::connect`] places detached builders, counts and
//!    connects every builder, and fixes the layout,
//! 3. the verifier runs (when enabled) and the listing is dumped (when
//!    configured),
//! 4. the result is a [`CompiledMethod`].

use std::fs;

use cinder_il::{
    Arena, BitSet, BlockId, DataType, EvalError, Evaluator, IlFunction, OpCode, Operation, Scalar,
    SymbolKind, TypeDictionary,
};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::builder::calls::FunctionResolver;
use crate::builder::{
    new_builder, BuilderData, BuilderId, CountState, FunctionSignature, HostFn, IlBuilder,
};
use crate::bytecode::BytecodeState;
use crate::config::BuilderConfig;
use crate::error::{BuildError, BuildResult};
use crate::vm_state::VmState;

// =============================================================================
// Method Body
// =============================================================================

/// Client-supplied IL generation for one method.
pub trait MethodBody {
    /// Append the method's content. Returning `Ok(false)` reports failure.
    fn build_il(&mut self, mb: &mut MethodBuilder) -> BuildResult<bool>;
}

impl<F> MethodBody for F
where
    F: FnMut(&mut MethodBuilder) -> BuildResult<bool>,
{
    fn build_il(&mut self, mb: &mut MethodBuilder) -> BuildResult<bool> {
        self(mb)
    }
}

// =============================================================================
// Method Builder
// =============================================================================

/// Builds one method.
pub struct MethodBuilder {
    pub(crate) config: BuilderConfig,
    pub(crate) func: IlFunction,
    pub(crate) builders: Arena<BuilderData>,
    pub(crate) root: BuilderId,
    types: TypeDictionary,

    functions: FxHashMap<String, FunctionSignature>,
    resolver: Option<FunctionResolver>,
    /// Names already offered to the resolver.
    requested: FxHashSet<String>,

    /// Bytecode indices pending processing.
    worklist: BitSet,
    /// Bytecode indices that have ever been queued.
    ever_in_worklist: BitSet,
    bytecode_builders: Vec<BuilderId>,
    by_index: FxHashMap<i32, BuilderId>,

    may_have_loops: bool,
    vm_state: Option<VmState>,
    file: Option<String>,
    line: Option<String>,
    pub(crate) locals_defined: bool,
    connected: bool,
}

impl MethodBuilder {
    pub fn new(name: &str, config: BuilderConfig) -> Self {
        let func = IlFunction::new(name);
        let mut builders = Arena::with_capacity(32);
        let root = builders.alloc(BuilderData::new(func.entry, func.exit));
        MethodBuilder {
            config,
            func,
            builders,
            root,
            types: TypeDictionary::new(),
            functions: FxHashMap::default(),
            resolver: None,
            requested: FxHashSet::default(),
            worklist: BitSet::new(),
            ever_in_worklist: BitSet::new(),
            bytecode_builders: Vec::new(),
            by_index: FxHashMap::default(),
            may_have_loops: false,
            vm_state: None,
            file: None,
            line: None,
            locals_defined: false,
            connected: false,
        }
    }

    // =========================================================================
    // Definitions
    // =========================================================================

    pub fn define_name(&mut self, name: &str) -> &mut Self {
        self.func.set_name(name);
        self
    }

    pub fn define_file(&mut self, file: &str) -> &mut Self {
        self.file = Some(file.to_owned());
        self
    }

    pub fn define_line(&mut self, line: &str) -> &mut Self {
        self.line = Some(line.to_owned());
        self
    }

    /// Declare the next parameter. Parameters bind to call arguments in
    /// declaration order.
    pub fn define_parameter(&mut self, name: &str, ty: DataType) -> &mut Self {
        let index = self.func.parameters().len() as u32;
        self.func.define_symbol(name, ty, SymbolKind::Parameter(index));
        self
    }

    pub fn define_local(&mut self, name: &str, ty: DataType) -> &mut Self {
        self.func.define_symbol(name, ty, SymbolKind::Local);
        self
    }

    pub fn define_return_type(&mut self, ty: DataType) -> &mut Self {
        self.func.set_return_type(ty);
        self
    }

    /// Register a callable function. `implementation` is what the
    /// reference evaluator runs for calls to it.
    pub fn define_function(
        &mut self,
        name: &str,
        return_type: DataType,
        params: &[DataType],
        implementation: Option<HostFn>,
    ) -> &mut Self {
        self.functions.insert(
            name.to_owned(),
            FunctionSignature::new(name, return_type, params, implementation),
        );
        self
    }

    /// After this, storing to an undeclared local is an error instead of
    /// declaring it.
    pub fn all_locals_have_been_defined(&mut self) -> &mut Self {
        self.locals_defined = true;
        self
    }

    /// Install the hook consulted, once per name, for unknown call targets.
    pub fn set_function_resolver(
        &mut self,
        resolver: impl FnMut(&str) -> Option<FunctionSignature> + 'static,
    ) -> &mut Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// VM state every appended bytecode builder starts from.
    pub fn set_vm_state(&mut self, state: VmState) -> &mut Self {
        self.vm_state = Some(state);
        self
    }

    pub fn vm_state(&self) -> Option<&VmState> {
        self.vm_state.as_ref()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        self.func.name()
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn line(&self) -> Option<&str> {
        self.line.as_deref()
    }

    #[inline]
    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    #[inline]
    pub fn types(&self) -> &TypeDictionary {
        &self.types
    }

    #[inline]
    pub fn types_mut(&mut self) -> &mut TypeDictionary {
        &mut self.types
    }

    #[inline]
    pub fn function(&self) -> &IlFunction {
        &self.func
    }

    #[inline]
    pub fn root_id(&self) -> BuilderId {
        self.root
    }

    /// Cursor for the method body.
    pub fn root(&mut self) -> IlBuilder<'_> {
        let root = self.root;
        IlBuilder::new(self, root)
    }

    /// Cursor for any builder of this method.
    pub fn at(&mut self, id: BuilderId) -> IlBuilder<'_> {
        IlBuilder::new(self, id)
    }

    #[inline]
    pub fn may_have_loops(&self) -> bool {
        self.may_have_loops
    }

    pub(crate) fn set_may_have_loops(&mut self) {
        self.may_have_loops = true;
    }

    /// Number of builders allocated, the root included.
    pub fn num_builders(&self) -> usize {
        self.builders.len()
    }

    /// Cached block count, once counted.
    pub fn block_count(&self, id: BuilderId) -> Option<u32> {
        match self.builders[id].count {
            CountState::Counted(n) => Some(n),
            _ => None,
        }
    }

    /// Whether control reaches the end of `id`. Derived at connection.
    pub fn comes_back(&self, id: BuilderId) -> bool {
        let data = &self.builders[id];
        data.comes_back.unwrap_or_else(|| data.falls_out())
    }

    /// The blocks `id` was connected into, its exit block last.
    pub fn blocks_of(&self, id: BuilderId) -> &[BlockId] {
        &self.builders[id].blocks
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    // =========================================================================
    // Builder Allocation
    // =========================================================================

    /// A new builder that is not part of any sequence yet.
    pub fn orphan_builder(&mut self) -> BuilderId {
        let id = new_builder(&mut self.builders, &mut self.func);
        if self.config.trace_il {
            tracing::trace!(builder = %id, "orphan builder");
        }
        id
    }

    /// A new bytecode builder for `bc_index`.
    ///
    /// The first builder created for an index is the one
    /// [`bytecode_builder`](Self::bytecode_builder) returns for it.
    ///
    /// # Panics
    ///
    /// Panics if `bc_index` is negative.
    pub fn orphan_bytecode_builder(&mut self, bc_index: i32, name: Option<&str>) -> BuilderId {
        assert!(bc_index >= 0, "bytecode index {} is negative", bc_index);
        let id = new_builder(&mut self.builders, &mut self.func);
        let data = &mut self.builders[id];
        data.name = name.map(str::to_owned);
        data.bytecode = Some(Box::new(BytecodeState::new(bc_index, name)));
        self.bytecode_builders.push(id);
        self.by_index.entry(bc_index).or_insert(id);
        if self.config.trace_il {
            tracing::trace!(builder = %id, bc_index, "orphan bytecode builder");
        }
        id
    }

    /// The bytecode builder for `bc_index`, created on first request.
    pub fn bytecode_builder(&mut self, bc_index: i32) -> BuilderId {
        match self.by_index.get(&bc_index) {
            Some(&id) => id,
            None => self.orphan_bytecode_builder(bc_index, None),
        }
    }

    /// Every bytecode builder, in creation order.
    pub fn bytecode_builders(&self) -> &[BuilderId] {
        &self.bytecode_builders
    }

    /// Append a builder to the method body.
    pub fn append_builder(&mut self, child: BuilderId) {
        self.root().append_builder(child);
    }

    /// Append the entry bytecode builder: it starts from the method's VM
    /// state and seeds the worklist.
    pub fn append_bytecode_builder(&mut self, builder: BuilderId) {
        let mut state = self.vm_state.clone().unwrap_or_else(VmState::empty);
        state.dealias(&mut self.root());
        self.at(builder).propagate_vm_state(state);
        self.append_builder(builder);
        self.add_to_worklist(builder);
    }

    // =========================================================================
    // Worklist
    // =========================================================================

    /// Queue the bytecode index of `builder` unless it has been queued
    /// before.
    pub(crate) fn add_to_worklist(&mut self, builder: BuilderId) {
        let Some(bc) = self.builders[builder].bytecode.as_deref() else {
            return;
        };
        let bc_index = bc.bc_index;
        if self.ever_in_worklist.insert(bc_index as usize) {
            self.worklist.insert(bc_index as usize);
            if self.config.trace_il {
                tracing::trace!(builder = %builder, bc_index, "add to worklist");
            }
        }
    }

    /// Remove and return the lowest pending bytecode index.
    pub fn get_next_bytecode_from_worklist(&mut self) -> Option<i32> {
        let next = self.worklist.first()?;
        self.worklist.remove(next);
        Some(next as i32)
    }

    // =========================================================================
    // Function Resolution
    // =========================================================================

    /// Return type and arity of `name`, offering it to the resolver once if
    /// it is not known yet.
    pub(crate) fn resolve_function(&mut self, name: &str) -> BuildResult<(DataType, usize)> {
        if !self.functions.contains_key(name) && self.requested.insert(name.to_owned()) {
            if let Some(resolver) = self.resolver.as_mut() {
                if let Some(sig) = resolver(name) {
                    if self.config.trace_il {
                        tracing::debug!(function = name, "resolved on request");
                    }
                    self.functions.insert(name.to_owned(), sig);
                }
            }
        }
        self.functions
            .get(name)
            .map(|sig| (sig.return_type, sig.params.len()))
            .ok_or_else(|| BuildError::UnresolvedFunction {
                name: name.to_owned(),
            })
    }

    pub fn lookup_function(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions.get(name)
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect every builder into the final layout.
    ///
    /// Builders that were never appended anywhere (transfer targets,
    /// bytecode successors, intermediate builders) are placed after the
    /// method body in creation order. Nothing falls into them; a detached
    /// builder that comes back continues at the method exit. Calling this
    /// again does nothing.
    pub fn connect(&mut self) -> BuildResult<()> {
        if self.connected {
            return Ok(());
        }

        let detached: Vec<BuilderId> = self
            .builders
            .iter()
            .filter(|(id, data)| *id != self.root && !data.part_of_sequence)
            .map(|(id, _)| id)
            .collect();

        let exit = self.func.exit;
        if !detached.is_empty() && self.builders[self.root].falls_out() {
            self.root().emit_transfer(OpCode::Goto, &[], &[exit]);
        }
        for &id in &detached {
            self.builders[id].part_of_sequence = true;
        }

        let root = self.root;
        let mut total = self.count_blocks(root);
        for &id in &detached {
            total += self.count_blocks(id);
        }

        self.connect_trees(root);
        let mut layout = Vec::with_capacity(total as usize + 1);
        layout.extend_from_slice(&self.builders[root].blocks);
        for &id in &detached {
            self.connect_trees(id);
            let data = &self.builders[id];
            if data.comes_back == Some(true) {
                let exit_block = data.exit_block;
                self.func.push_op(
                    exit_block,
                    Operation::new(OpCode::Goto, &[]).with_targets(&[exit]),
                );
                self.func.add_edge(exit_block, exit);
            }
            layout.extend_from_slice(&self.builders[id].blocks);
        }
        layout.push(exit);
        debug_assert_eq!(layout.len(), total as usize + 1, "block count mismatch");

        if self.config.trace_il {
            tracing::debug!(
                method = self.func.name(),
                blocks = layout.len(),
                detached = detached.len(),
                "connected method"
            );
        }
        self.func.set_layout(layout);
        self.connected = true;

        if self.config.verify {
            self.func.verify().map_err(BuildError::MalformedGraph)?;
        }
        if let Some(dir) = &self.config.dump_dir {
            fs::create_dir_all(dir)?;
            let path = dir.join(listing_file_name(self.func.name()));
            fs::write(&path, self.func.to_string())?;
            tracing::info!(path = %path.display(), "wrote IL listing");
        }
        Ok(())
    }

    // =========================================================================
    // Compilation
    // =========================================================================

    /// Run `body`, connect, and hand back the compiled method.
    pub fn compile(mut self, body: &mut impl MethodBody) -> BuildResult<CompiledMethod> {
        if self.config.trace_il {
            tracing::debug!(method = self.func.name(), "build il");
        }
        if !body.build_il(&mut self)? {
            return Err(BuildError::BodyFailed {
                method: self.func.name().to_owned(),
            });
        }
        self.finish()
    }

    /// Connect content appended directly and hand back the compiled method.
    pub fn finish(mut self) -> BuildResult<CompiledMethod> {
        self.connect()?;
        let host = self
            .functions
            .into_iter()
            .filter_map(|(name, sig)| sig.implementation.map(|f| (name, f)))
            .collect();
        Ok(CompiledMethod {
            func: self.func,
            may_have_loops: self.may_have_loops,
            host,
        })
    }
}

/// File name for a method's listing. Path separators and other characters
/// outside `[A-Za-z0-9_.-]` become `_`, so the file always lands directly
/// in the dump directory.
fn listing_file_name(method: &str) -> String {
    let stem: String = method
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.il", stem)
}

// =============================================================================
// Compiled Method
// =============================================================================

/// A connected, verified method.
pub struct CompiledMethod {
    func: IlFunction,
    may_have_loops: bool,
    host: FxHashMap<String, HostFn>,
}

impl CompiledMethod {
    pub fn function(&self) -> &IlFunction {
        &self.func
    }

    pub fn may_have_loops(&self) -> bool {
        self.may_have_loops
    }

    /// Run the method on the reference evaluator.
    pub fn invoke(&self, args: &[Scalar]) -> Result<Option<Scalar>, EvalError> {
        let mut eval = Evaluator::new(&self.func);
        for (name, f) in &self.host {
            let f = f.clone();
            eval.register(name, move |memory, args| f(memory, args));
        }
        eval.run(args)
    }

    /// Textual IL listing.
    pub fn listing(&self) -> String {
        self.func.to_string()
    }
}
