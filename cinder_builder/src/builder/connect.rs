//! Block counting and tree connection.
//!
//! Both passes walk the nested builder structure with an explicit stack.
//! Counting memoizes per builder and marks a builder `InProgress` before
//! descending, so a re-entrant visit contributes nothing instead of
//! recursing. Connection is a post-order walk: every child is connected
//! before the parent splices the child's blocks into its own list.

use cinder_il::{BitSet, BlockId};
use rustc_hash::FxHashSet;

use super::{BuilderData, BuilderId, CountState, SequenceEntry};
use crate::method::MethodBuilder;

impl MethodBuilder {
    // =========================================================================
    // Counting
    // =========================================================================

    /// Number of blocks `id` contributes to the layout.
    ///
    /// One per block entry, the counts of nested builders, and one for the
    /// builder's own exit block. The method's root builder does not count
    /// its exit: that is the method exit, placed once at the very end.
    pub(crate) fn count_blocks(&mut self, id: BuilderId) -> u32 {
        if let CountState::Counted(n) = self.builders[id].count {
            return n;
        }

        // (builder, next sequence index, blocks so far)
        let mut stack: Vec<(BuilderId, usize, u32)> = vec![(id, 0, 0)];
        self.builders[id].count = CountState::InProgress;

        while let Some(&(current, next, acc)) = stack.last() {
            let top = stack.len() - 1;
            if let Some(&entry) = self.builders[current].sequence.get(next) {
                stack[top].1 += 1;
                match entry {
                    SequenceEntry::Block(_) => stack[top].2 += 1,
                    SequenceEntry::Builder(child) => match self.builders[child].count {
                        CountState::Counted(n) => stack[top].2 += n,
                        CountState::InProgress => {}
                        CountState::NotCounted => {
                            self.builders[child].count = CountState::InProgress;
                            stack.push((child, 0, 0));
                        }
                    },
                }
                continue;
            }

            let total = if current == self.root { acc } else { acc + 1 };
            self.builders[current].count = CountState::Counted(total);
            stack.pop();
            if let Some(parent) = stack.last_mut() {
                parent.2 += total;
            }
            if self.config.trace_il {
                tracing::trace!(builder = %current, count = total, "count blocks");
            }
        }

        match self.builders[id].count {
            CountState::Counted(n) => n,
            _ => 0,
        }
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect `id` and every builder nested in it. Connecting an already
    /// connected builder does nothing.
    pub(crate) fn connect_trees(&mut self, id: BuilderId) {
        if self.builders[id].connected {
            return;
        }

        let mut visiting = BitSet::with_capacity(self.builders.len());
        let mut stack = vec![(id, false)];
        visiting.insert(id.as_usize());

        while let Some((current, expanded)) = stack.pop() {
            if self.builders[current].connected {
                continue;
            }
            if expanded {
                self.connect_one(current);
                continue;
            }
            stack.push((current, true));
            for entry in self.builders[current].sequence.iter().rev() {
                if let SequenceEntry::Builder(child) = *entry {
                    if !self.builders[child].connected && visiting.insert(child.as_usize()) {
                        stack.push((child, false));
                    }
                }
            }
        }
    }

    /// Splice the blocks of one builder whose children are all connected.
    fn connect_one(&mut self, id: BuilderId) {
        let data = &self.builders[id];
        let mut blocks: Vec<BlockId> = Vec::with_capacity(match data.count {
            CountState::Counted(n) => n as usize,
            _ => data.sequence.len() + 1,
        });
        for entry in &data.sequence {
            match *entry {
                SequenceEntry::Block(block) => blocks.push(block),
                SequenceEntry::Builder(child) => {
                    blocks.extend_from_slice(&self.builders[child].blocks)
                }
            }
        }

        let comes_back = self.derive_comes_back(data, &blocks);
        let exit = if id == self.root {
            self.func.exit
        } else {
            data.exit_block
        };
        if comes_back {
            if let Some(&tail) = blocks.last() {
                self.func.add_edge(tail, exit);
            }
        }
        if id != self.root {
            blocks.push(exit);
        }

        for pair in blocks.windows(2) {
            self.func.block_mut(pair[0]).layout_next = Some(pair[1]);
        }
        if let Some(&last) = blocks.last() {
            self.func.block_mut(last).layout_next = None;
        }

        if self.config.trace_il {
            tracing::debug!(
                builder = %id,
                blocks = blocks.len(),
                comes_back,
                "connect trees"
            );
        }

        let data = &mut self.builders[id];
        data.blocks = blocks;
        data.comes_back = Some(comes_back);
        data.connected = true;
    }

    /// Control reaches the end of a builder when its sequence is left open
    /// and the last block is reachable from a way into the builder: its
    /// entry, or any member block with a predecessor outside the builder.
    fn derive_comes_back(&self, data: &BuilderData, members: &[BlockId]) -> bool {
        if !data.falls_out() {
            return false;
        }
        let Some(&tail) = members.last() else {
            return false;
        };

        let inside: FxHashSet<BlockId> = members.iter().copied().collect();
        let mut seen = FxHashSet::default();
        let mut work = Vec::new();
        for &block in members {
            let entered = block == data.entry_block
                || self
                    .func
                    .block(block)
                    .predecessors
                    .iter()
                    .any(|pred| !inside.contains(pred));
            if entered && seen.insert(block) {
                work.push(block);
            }
        }

        while let Some(block) = work.pop() {
            if block == tail {
                return true;
            }
            for succ in self.func.block(block).all_successors() {
                if inside.contains(&succ) && seen.insert(succ) {
                    work.push(succ);
                }
            }
        }
        false
    }
}
