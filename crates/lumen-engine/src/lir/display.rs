//! LIR disassembly
//!
//! Textual rendering of instructions, functions, and the CFG (Graphviz dot)
//! for debugging.

use super::function::LirFunction;
use super::instr::{LirInst, LirOp, NO_REG};
use std::fmt;
use std::fmt::Write as _;

impl fmt::Display for LirInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            LirOp::Label => write!(f, "L{}:", self.imm)?,
            LirOp::Jump => write!(f, "  jump L{}", self.imm)?,
            LirOp::JumpIfFalse => write!(f, "  jump_if_false r{}, L{}", self.a, self.imm)?,
            LirOp::JumpIf => write!(f, "  jump_if r{}, L{}", self.a, self.imm)?,
            LirOp::LoadConst => {
                write!(f, "  r{} = const.{} ", self.dst, self.ty)?;
                match &self.const_val {
                    Some(value) => write!(f, "{}", value)?,
                    None => write!(f, "?")?,
                }
            }
            LirOp::Ret => write!(f, "  ret r{}", self.a)?,
            LirOp::Return => write!(f, "  ret")?,
            LirOp::Call => write!(f, "  r{} = call #{}", self.dst, self.imm)?,
            LirOp::Param => {
                if self.dst != NO_REG {
                    write!(f, "  param r{}", self.dst)?
                } else {
                    write!(f, "  arg r{}", self.a)?
                }
            }
            _ => {
                let name = format!("{:?}", self.op).to_lowercase();
                if self.dst != NO_REG {
                    write!(f, "  r{} = {}", self.dst, name)?;
                } else {
                    write!(f, "  {}", name)?;
                }
                for src in self.sources() {
                    write!(f, " r{}", src)?;
                }
            }
        }
        if !self.comment.is_empty() {
            write!(f, "  ; {}", self.comment)?;
        }
        Ok(())
    }
}

/// Renders a function's linear stream and CFG
pub struct Disassembler<'a> {
    func: &'a LirFunction,
    show_debug_info: bool,
}

impl<'a> Disassembler<'a> {
    /// Create a disassembler for a function
    pub fn new(func: &'a LirFunction) -> Self {
        Disassembler { func, show_debug_info: false }
    }

    /// Include source locations in the listing
    pub fn with_debug_info(mut self) -> Self {
        self.show_debug_info = true;
        self
    }

    /// The full textual listing
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "fn {} (params: {}, regs: {})",
            self.func.name, self.func.param_count, self.func.register_count
        );
        for inst in &self.func.instructions {
            if self.show_debug_info && inst.loc.line > 0 {
                let _ = writeln!(out, "{}  @ {}", inst, inst.loc);
            } else {
                let _ = writeln!(out, "{}", inst);
            }
        }
        out
    }

    /// The CFG as Graphviz dot
    pub fn dump_dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", self.func.name);
        for block in &self.func.cfg.blocks {
            let label = if block.label.is_empty() {
                format!("bb{}", block.id)
            } else {
                block.label.clone()
            };
            let _ = writeln!(out, "  b{} [label=\"{}\"];", block.id, label);
            for succ in &block.successors {
                let _ = writeln!(out, "  b{} -> b{};", block.id, succ);
            }
        }
        let _ = writeln!(out, "}}");
        out
    }
}
