//! Control flow analyses over a connected [`IlFunction`].
//!
//! The builder engine wires explicit edges, so these analyses read the
//! block graph directly:
//! - **Reverse postorder**: iteration order for forward dataflow
//! - **Dominator tree**: Cooper-Harvey-Kennedy iteration over RPO
//! - **Loop analysis**: natural loops from back edges (target dominates source)
//!
//! Only blocks reachable from the entry participate.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::arena::{BitSet, SecondaryMap};
use crate::block::{Block, BlockId};
use crate::function::IlFunction;

// =============================================================================
// CFG
// =============================================================================

/// Traversal orders over the reachable part of a function.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub entry: BlockId,

    /// Reverse postorder over reachable blocks.
    pub rpo: Vec<BlockId>,

    /// Postorder number of each reachable block.
    postorder: SecondaryMap<Block, u32>,

    reachable: BitSet,
}

impl Cfg {
    pub fn build(func: &IlFunction) -> Self {
        let mut cfg = Cfg {
            entry: func.entry,
            rpo: Vec::with_capacity(func.num_blocks()),
            postorder: SecondaryMap::with_capacity(func.num_blocks()),
            reachable: BitSet::with_capacity(func.num_blocks()),
        };
        cfg.compute_rpo(func);
        cfg
    }

    /// Iterative DFS; deep nests of loops must not exhaust the stack.
    fn compute_rpo(&mut self, func: &IlFunction) {
        let mut postorder = Vec::with_capacity(func.num_blocks());
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry, 0)];
        self.reachable.insert(self.entry.as_usize());

        while let Some(&mut (block, ref mut next)) = stack.last_mut() {
            let succ = func.block(block).all_successors().nth(*next);
            *next += 1;
            match succ {
                Some(succ) => {
                    if self.reachable.insert(succ.as_usize()) {
                        stack.push((succ, 0));
                    }
                }
                None => {
                    postorder.push(block);
                    stack.pop();
                }
            }
        }

        for (i, &block) in postorder.iter().enumerate() {
            self.postorder.set(block, i as u32);
        }
        postorder.reverse();
        self.rpo = postorder;
    }

    #[inline]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.reachable.contains(block.as_usize())
    }

    #[inline]
    pub fn postorder_number(&self, block: BlockId) -> Option<u32> {
        if self.is_reachable(block) {
            self.postorder.get(block).copied()
        } else {
            None
        }
    }

    /// Number of reachable blocks.
    #[inline]
    pub fn len(&self) -> usize {
        self.rpo.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rpo.is_empty()
    }
}

// =============================================================================
// Dominator Tree
// =============================================================================

/// Immediate dominators of reachable blocks.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    idom: FxHashMap<BlockId, BlockId>,
    entry: BlockId,
}

impl DominatorTree {
    pub fn build(func: &IlFunction, cfg: &Cfg) -> Self {
        let mut idom: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        idom.insert(cfg.entry, cfg.entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &cfg.rpo {
                if block == cfg.entry {
                    continue;
                }

                let mut new_idom: Option<BlockId> = None;
                for &pred in &func.block(block).predecessors {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => Self::intersect(&idom, cfg, pred, current),
                    });
                }

                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        DominatorTree {
            idom,
            entry: cfg.entry,
        }
    }

    fn intersect(
        idom: &FxHashMap<BlockId, BlockId>,
        cfg: &Cfg,
        mut a: BlockId,
        mut b: BlockId,
    ) -> BlockId {
        let po = |block: BlockId| cfg.postorder_number(block).unwrap_or(0);
        while a != b {
            while po(a) < po(b) {
                a = idom[&a];
            }
            while po(b) < po(a) {
                b = idom[&b];
            }
        }
        a
    }

    /// Immediate dominator; `None` for the entry and unreachable blocks.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        if block == self.entry {
            return None;
        }
        self.idom.get(&block).copied()
    }

    /// Check if `a` dominates `b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return self.idom.contains_key(&a);
        }
        let mut current = b;
        while let Some(idom) = self.idom(current) {
            if idom == a {
                return true;
            }
            current = idom;
        }
        false
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }
}

// =============================================================================
// Loop Analysis
// =============================================================================

/// A natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,

    /// Sources of edges back to the header.
    pub back_edges: Vec<BlockId>,

    /// All blocks in the loop, header included.
    pub body: Vec<BlockId>,

    /// Enclosing loop index, if nested.
    pub parent: Option<usize>,

    /// 1 = outermost.
    pub depth: u32,
}

/// Natural loops of a function.
#[derive(Debug, Clone, Default)]
pub struct LoopAnalysis {
    pub loops: Vec<Loop>,
    header_to_loop: FxHashMap<BlockId, usize>,
}

impl LoopAnalysis {
    pub fn compute(func: &IlFunction, cfg: &Cfg, dom: &DominatorTree) -> Self {
        let mut analysis = LoopAnalysis::default();

        for &block in &cfg.rpo {
            for &succ in &func.block(block).successors {
                if dom.dominates(succ, block) {
                    analysis.add_back_edge(func, succ, block);
                }
            }
        }

        analysis.compute_nesting();
        analysis
    }

    fn add_back_edge(&mut self, func: &IlFunction, header: BlockId, source: BlockId) {
        let index = match self.header_to_loop.get(&header) {
            Some(&index) => index,
            None => {
                let index = self.loops.len();
                self.loops.push(Loop {
                    header,
                    back_edges: Vec::new(),
                    body: vec![header],
                    parent: None,
                    depth: 1,
                });
                self.header_to_loop.insert(header, index);
                index
            }
        };

        let lp = &mut self.loops[index];
        if lp.back_edges.contains(&source) {
            return;
        }
        lp.back_edges.push(source);

        let mut in_body = BitSet::with_capacity(func.num_blocks());
        for &b in &lp.body {
            in_body.insert(b.as_usize());
        }
        let mut worklist = VecDeque::from([source]);
        while let Some(block) = worklist.pop_front() {
            if in_body.insert(block.as_usize()) {
                lp.body.push(block);
                worklist.extend(func.block(block).predecessors.iter().copied());
            }
        }
    }

    fn compute_nesting(&mut self) {
        let n = self.loops.len();
        for i in 0..n {
            let header = self.loops[i].header;
            let parent = (0..n)
                .filter(|&j| j != i && self.loops[j].body.contains(&header))
                .min_by_key(|&j| self.loops[j].body.len());
            self.loops[i].parent = parent;
        }
        for i in 0..n {
            let mut depth = 1;
            let mut current = self.loops[i].parent;
            while let Some(parent) = current {
                depth += 1;
                current = self.loops[parent].parent;
            }
            self.loops[i].depth = depth;
        }
    }

    pub fn loop_with_header(&self, header: BlockId) -> Option<&Loop> {
        self.header_to_loop.get(&header).map(|&i| &self.loops[i])
    }

    /// Total number of back edges across all loops.
    pub fn back_edge_count(&self) -> usize {
        self.loops.iter().map(|l| l.back_edges.len()).sum()
    }

    /// Innermost loop depth of a block (0 if not in a loop).
    pub fn loop_depth(&self, block: BlockId) -> u32 {
        self.loops
            .iter()
            .filter(|l| l.body.contains(&block))
            .map(|l| l.depth)
            .max()
            .unwrap_or(0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use crate::operators::{CmpOp, OpCode};
    use crate::types::DataType;

    /// entry -> header -> body -> header (back edge); header -> exit
    fn simple_loop() -> (IlFunction, BlockId, BlockId) {
        let mut func = IlFunction::new("loop");
        let (entry, exit) = (func.entry, func.exit);
        let header = func.new_block();
        let body = func.new_block();
        let v = func.new_value(DataType::Int32);

        func.add_edge(entry, header);
        func.push_op(
            header,
            Operation::new(OpCode::Branch(CmpOp::Eq), &[v, v]).with_targets(&[exit]),
        );
        func.add_edge(header, exit);
        func.add_edge(header, body);
        func.push_op(body, Operation::new(OpCode::Goto, &[]).with_targets(&[header]));
        func.add_edge(body, header);
        func.set_layout(vec![entry, header, body, exit]);
        (func, header, body)
    }

    #[test]
    fn test_rpo_starts_at_entry() {
        let (func, header, _) = simple_loop();
        let cfg = Cfg::build(&func);
        assert_eq!(cfg.rpo[0], func.entry);
        assert_eq!(cfg.rpo[1], header);
        assert_eq!(cfg.len(), 4);
    }

    #[test]
    fn test_unreachable_blocks_are_excluded() {
        let (mut func, _, _) = simple_loop();
        let dead = func.new_block();
        let cfg = Cfg::build(&func);
        assert!(!cfg.is_reachable(dead));
        assert_eq!(cfg.postorder_number(dead), None);
    }

    #[test]
    fn test_dominators() {
        let (func, header, body) = simple_loop();
        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&func, &cfg);

        assert!(dom.dominates(func.entry, body));
        assert!(dom.dominates(header, body));
        assert!(dom.dominates(header, func.exit));
        assert!(!dom.dominates(body, func.exit));
        assert_eq!(dom.idom(body), Some(header));
        assert_eq!(dom.idom(func.entry), None);
        assert!(dom.strictly_dominates(func.entry, header));
    }

    #[test]
    fn test_loop_detection() {
        let (func, header, body) = simple_loop();
        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&func, &cfg);
        let loops = LoopAnalysis::compute(&func, &cfg, &dom);

        assert_eq!(loops.loops.len(), 1);
        assert_eq!(loops.back_edge_count(), 1);
        let lp = loops.loop_with_header(header).unwrap();
        assert_eq!(lp.back_edges, vec![body]);
        assert_eq!(lp.body.len(), 2);
        assert_eq!(loops.loop_depth(body), 1);
        assert_eq!(loops.loop_depth(func.exit), 0);
    }
}
