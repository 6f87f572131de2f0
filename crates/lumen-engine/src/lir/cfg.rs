//! Control-flow graph over LIR basic blocks
//!
//! Invariants validated here: exactly one entry block, every non-terminal
//! block ends with a terminator, every edge references an existing block,
//! and all blocks except the entry are reachable through predecessors.

use super::instr::{LirInst, LirOp};
use thiserror::Error;

/// A basic block: a maximal run of non-branching instructions ended by one
/// control-flow instruction
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Block id
    pub id: u32,
    /// Optional label for debugging
    pub label: String,
    /// Instructions in order
    pub instructions: Vec<LirInst>,
    /// Successor block ids
    pub successors: Vec<u32>,
    /// Predecessor block ids
    pub predecessors: Vec<u32>,
    /// Whether this is the entry block
    pub is_entry: bool,
    /// Whether this is an exit block
    pub is_exit: bool,
    /// Explicitly marked as terminated
    pub terminated: bool,
}

impl BasicBlock {
    /// Create an empty block
    pub fn new(id: u32, label: impl Into<String>) -> Self {
        BasicBlock {
            id,
            label: label.into(),
            instructions: Vec::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            is_entry: false,
            is_exit: false,
            terminated: false,
        }
    }

    /// Append an instruction
    pub fn push(&mut self, inst: LirInst) {
        self.instructions.push(inst);
    }

    /// A block is terminated iff its last instruction is a jump,
    /// conditional jump, or return
    pub fn has_terminator(&self) -> bool {
        if self.terminated {
            return true;
        }
        self.instructions
            .last()
            .map(|inst| inst.op.is_terminator())
            .unwrap_or(false)
    }
}

/// CFG invariant violations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CfgError {
    /// Not exactly one entry block
    #[error("expected exactly one entry block, found {0}")]
    EntryCount(usize),

    /// A non-terminal block without a terminator
    #[error("block {0} does not end with a terminator")]
    MissingTerminator(u32),

    /// An edge to a nonexistent block
    #[error("block {from} has an edge to nonexistent block {to}")]
    DanglingEdge {
        /// Edge source
        from: u32,
        /// Missing target
        to: u32,
    },

    /// A non-entry block with no predecessors
    #[error("block {0} is unreachable (no predecessors)")]
    Unreachable(u32),
}

/// The control-flow graph of one function
#[derive(Debug, Clone, Default)]
pub struct Cfg {
    /// Blocks indexed by id
    pub blocks: Vec<BasicBlock>,
    /// Entry block id
    pub entry_block: u32,
}

impl Cfg {
    /// Create an empty CFG
    pub fn new() -> Self {
        Cfg { blocks: Vec::new(), entry_block: 0 }
    }

    /// Create a new block and return its id
    pub fn create_block(&mut self, label: impl Into<String>) -> u32 {
        let id = self.blocks.len() as u32;
        let mut block = BasicBlock::new(id, label);
        if id == 0 {
            block.is_entry = true;
        }
        self.blocks.push(block);
        id
    }

    /// Get a block by id
    pub fn block(&self, id: u32) -> Option<&BasicBlock> {
        self.blocks.get(id as usize)
    }

    /// Get a mutable block by id
    pub fn block_mut(&mut self, id: u32) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(id as usize)
    }

    /// Record an edge between two blocks
    pub fn add_edge(&mut self, from: u32, to: u32) {
        if let Some(block) = self.blocks.get_mut(from as usize) {
            if !block.successors.contains(&to) {
                block.successors.push(to);
            }
        }
        if let Some(block) = self.blocks.get_mut(to as usize) {
            if !block.predecessors.contains(&from) {
                block.predecessors.push(from);
            }
        }
    }

    /// Validate the CFG invariants; returns every violation found
    pub fn validate(&self) -> Vec<CfgError> {
        let mut errors = Vec::new();
        if self.blocks.is_empty() {
            return errors;
        }

        let entries = self.blocks.iter().filter(|b| b.is_entry).count();
        if entries != 1 {
            errors.push(CfgError::EntryCount(entries));
        }

        for block in &self.blocks {
            let is_last = block.id as usize == self.blocks.len() - 1;
            if !block.has_terminator() && !block.instructions.is_empty() && !is_last {
                errors.push(CfgError::MissingTerminator(block.id));
            }
            for &succ in &block.successors {
                if succ as usize >= self.blocks.len() {
                    errors.push(CfgError::DanglingEdge { from: block.id, to: succ });
                }
            }
            if !block.is_entry && block.predecessors.is_empty() {
                errors.push(CfgError::Unreachable(block.id));
            }
        }
        errors
    }

    /// Reconstruct a CFG from a linear instruction vector.
    ///
    /// A new block starts at every `Label` and after every terminator.
    /// Used after optimization passes rewrite the linear stream.
    pub fn from_instructions(instructions: &[LirInst]) -> Self {
        use rustc_hash::FxHashMap;

        let mut cfg = Cfg::new();
        if instructions.is_empty() {
            return cfg;
        }

        let mut label_blocks: FxHashMap<u32, u32> = FxHashMap::default();
        // None after a terminator: a new block opens lazily at the next
        // instruction, so no empty orphan blocks are created.
        let mut current: Option<u32> = Some(cfg.create_block("entry"));
        // (from block, target label) edges resolved once all labels are placed
        let mut pending: Vec<(u32, u32)> = Vec::new();

        for inst in instructions {
            if inst.op == LirOp::Label {
                let block = *label_blocks
                    .entry(inst.imm)
                    .or_insert_with(|| cfg.create_block(format!("L{}", inst.imm)));
                if let Some(prev) = current {
                    let fell_through = cfg
                        .block(prev)
                        .map(|b| !b.has_terminator())
                        .unwrap_or(false);
                    if fell_through && prev != block {
                        cfg.add_edge(prev, block);
                    }
                }
                current = Some(block);
            }
            let block_id = match current {
                Some(id) => id,
                None => {
                    let id = cfg.create_block("");
                    current = Some(id);
                    id
                }
            };
            if let Some(block) = cfg.block_mut(block_id) {
                block.push(inst.clone());
            }
            match inst.op {
                LirOp::Jump => {
                    pending.push((block_id, inst.imm));
                    current = None;
                }
                LirOp::JumpIfFalse | LirOp::JumpIf => {
                    pending.push((block_id, inst.imm));
                    let next = cfg.create_block("");
                    cfg.add_edge(block_id, next);
                    current = Some(next);
                }
                LirOp::Return | LirOp::Ret => {
                    current = None;
                }
                _ => {}
            }
        }

        for (from, label) in pending {
            let target = *label_blocks
                .entry(label)
                .or_insert_with(|| cfg.create_block(format!("L{}", label)));
            cfg.add_edge(from, target);
        }

        cfg.mark_exits();
        cfg
    }

    /// Mark blocks ending in returns as exits
    pub fn mark_exits(&mut self) {
        for block in &mut self.blocks {
            block.is_exit = block
                .instructions
                .last()
                .map(|inst| matches!(inst.op, LirOp::Return | LirOp::Ret))
                .unwrap_or(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::instr::{AbiType, LirInst, LirOp, NO_REG};

    fn jump(label: u32) -> LirInst {
        LirInst::with_imm(LirOp::Jump, AbiType::Void, NO_REG, label)
    }

    fn ret() -> LirInst {
        LirInst::new(LirOp::Return, AbiType::Void, NO_REG, NO_REG, NO_REG)
    }

    #[test]
    fn test_terminator_detection() {
        let mut block = BasicBlock::new(0, "entry");
        assert!(!block.has_terminator());
        block.push(jump(1));
        assert!(block.has_terminator());

        let mut marked = BasicBlock::new(1, "");
        marked.terminated = true;
        assert!(marked.has_terminator());
    }

    #[test]
    fn test_single_entry() {
        let mut cfg = Cfg::new();
        let entry = cfg.create_block("entry");
        let exit = cfg.create_block("exit");
        cfg.block_mut(entry).unwrap().push(jump(1));
        cfg.block_mut(exit).unwrap().push(ret());
        cfg.add_edge(entry, exit);
        assert!(cfg.validate().is_empty());
        assert!(cfg.block(entry).unwrap().is_entry);
        assert!(!cfg.block(exit).unwrap().is_entry);
    }

    #[test]
    fn test_missing_terminator_detected() {
        let mut cfg = Cfg::new();
        let entry = cfg.create_block("entry");
        let next = cfg.create_block("next");
        cfg.block_mut(entry)
            .unwrap()
            .push(LirInst::new(LirOp::Add, AbiType::I64, 0, 1, 2));
        cfg.block_mut(next).unwrap().push(ret());
        cfg.add_edge(entry, next);
        let errors = cfg.validate();
        assert!(errors.contains(&CfgError::MissingTerminator(entry)));
    }

    #[test]
    fn test_dangling_edge_detected() {
        let mut cfg = Cfg::new();
        let entry = cfg.create_block("entry");
        cfg.block_mut(entry).unwrap().push(jump(9));
        cfg.block_mut(entry).unwrap().successors.push(9);
        let errors = cfg.validate();
        assert!(errors
            .iter()
            .any(|e| matches!(e, CfgError::DanglingEdge { to: 9, .. })));
    }

    #[test]
    fn test_unreachable_block_detected() {
        let mut cfg = Cfg::new();
        let entry = cfg.create_block("entry");
        let orphan = cfg.create_block("orphan");
        cfg.block_mut(entry).unwrap().push(ret());
        cfg.block_mut(orphan).unwrap().push(ret());
        let errors = cfg.validate();
        assert!(errors.contains(&CfgError::Unreachable(orphan)));
    }

    #[test]
    fn test_mark_exits() {
        let mut cfg = Cfg::new();
        let entry = cfg.create_block("entry");
        cfg.block_mut(entry).unwrap().push(ret());
        cfg.mark_exits();
        assert!(cfg.block(entry).unwrap().is_exit);
    }
}
