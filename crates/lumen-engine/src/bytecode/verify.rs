//! Bytecode well-formedness verification
//!
//! Checks the invariants every generated program must satisfy: jump targets
//! land on valid instruction indices, the structural `BEGIN_*`/`END_*`
//! delimiters pair up, the stream ends in `HALT`, and `BEGIN_SCOPE`/
//! `END_SCOPE` are balanced on every control-flow path (a scope may close
//! at different sites on different paths, so this check follows jumps
//! rather than textual nesting).

use super::instruction::Instruction;
use super::opcode::Opcode;
use rustc_hash::FxHashMap;
use thiserror::Error;

/// A violated bytecode invariant
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VerifyError {
    /// A jump lands outside the instruction stream
    #[error("jump at index {index} targets invalid index {target}")]
    JumpOutOfBounds {
        /// Index of the jump instruction
        index: usize,
        /// Computed absolute target
        target: i64,
    },

    /// An `END_*` with no matching opener
    #[error("{closer} at index {index} has no matching opener")]
    UnmatchedEnd {
        /// The closing opcode
        closer: Opcode,
        /// Instruction index
        index: usize,
    },

    /// A `BEGIN_*` left open at the end of the stream
    #[error("{opener} at index {index} is never closed")]
    UnclosedBegin {
        /// The opening opcode
        opener: Opcode,
        /// Instruction index
        index: usize,
    },

    /// Mismatched opener/closer pair
    #[error("{closer} at index {index} closes {opener}, which expects {expected}")]
    MismatchedPair {
        /// The opener found on the stack
        opener: Opcode,
        /// The closer encountered
        closer: Opcode,
        /// What the opener expects
        expected: Opcode,
        /// Instruction index of the closer
        index: usize,
    },

    /// An `END_SCOPE` on a path with no open scope
    #[error("END_SCOPE at index {index} closes a scope that is not open on this path")]
    ScopeUnderflow {
        /// Instruction index
        index: usize,
    },

    /// Paths reach an instruction with different scope depths, or HALT is
    /// reached with scopes still open
    #[error("unbalanced scopes at index {index}")]
    ScopeImbalance {
        /// Instruction index
        index: usize,
    },

    /// The stream does not end in HALT
    #[error("program does not end in HALT")]
    MissingHalt,

    /// The stream is empty
    #[error("program is empty")]
    Empty,
}

/// Verify a generated program against the bytecode invariants.
///
/// Returns every violation found, empty when the program is well-formed.
pub fn verify_program(program: &[Instruction]) -> Vec<VerifyError> {
    let mut errors = Vec::new();

    if program.is_empty() {
        return vec![VerifyError::Empty];
    }

    if program.last().map(|i| i.opcode) != Some(Opcode::Halt) {
        errors.push(VerifyError::MissingHalt);
    }

    // Jump targets: offsets are relative to the following instruction.
    for (index, inst) in program.iter().enumerate() {
        if inst.opcode.is_jump() {
            let target = index as i64 + 1 + inst.imm;
            if target < 0 || target > program.len() as i64 {
                errors.push(VerifyError::JumpOutOfBounds { index, target });
            }
        }
    }

    check_structural_pairs(program, &mut errors);
    check_scope_balance(program, &mut errors);

    errors
}

/// Structural delimiters (functions, classes, enums, concurrency blocks)
/// must nest textually.
fn check_structural_pairs(program: &[Instruction], errors: &mut Vec<VerifyError>) {
    let mut stack: Vec<(Opcode, usize)> = Vec::new();
    for (index, inst) in program.iter().enumerate() {
        if is_structural_opener(inst.opcode) {
            stack.push((inst.opcode, index));
        } else if is_structural_closer(inst.opcode) {
            match stack.pop() {
                Some((opener, _)) => {
                    if !inst.opcode.closes(opener) {
                        let expected = opener.matching_end().unwrap_or(inst.opcode);
                        errors.push(VerifyError::MismatchedPair {
                            opener,
                            closer: inst.opcode,
                            expected,
                            index,
                        });
                    }
                }
                None => {
                    errors.push(VerifyError::UnmatchedEnd { closer: inst.opcode, index });
                }
            }
        }
    }
    for (opener, index) in stack {
        errors.push(VerifyError::UnclosedBegin { opener, index });
    }
}

/// Follow control flow and check that scope depth is consistent at every
/// instruction, never negative, and zero when HALT is reached. Function
/// bodies only execute when called, so each body is analysed as its own
/// entry at depth zero and skipped over in the enclosing flow.
fn check_scope_balance(program: &[Instruction], errors: &mut Vec<VerifyError>) {
    let mut entries = vec![0usize];
    for (index, inst) in program.iter().enumerate() {
        if inst.opcode == Opcode::BeginFunction {
            entries.push(index + 1);
        }
    }

    let mut depth_at: FxHashMap<usize, i64> = FxHashMap::default();
    for entry in entries {
        let mut work = vec![(entry, 0i64)];
        while let Some((index, depth)) = work.pop() {
            if index >= program.len() {
                continue;
            }
            if let Some(&seen) = depth_at.get(&index) {
                if seen != depth {
                    errors.push(VerifyError::ScopeImbalance { index });
                }
                continue;
            }
            depth_at.insert(index, depth);

            let inst = &program[index];
            match inst.opcode {
                Opcode::BeginScope => work.push((index + 1, depth + 1)),
                Opcode::EndScope => {
                    if depth == 0 {
                        errors.push(VerifyError::ScopeUnderflow { index });
                    } else {
                        work.push((index + 1, depth - 1));
                    }
                }
                Opcode::BeginFunction => {
                    // The body runs only when called; continue past it.
                    if let Some(end) = matching_end_function(program, index) {
                        work.push((end + 1, depth));
                    }
                }
                // A return unwinds the frame along with its open scopes.
                Opcode::EndFunction | Opcode::Return => {}
                Opcode::Halt => {
                    if depth != 0 {
                        errors.push(VerifyError::ScopeImbalance { index });
                    }
                }
                Opcode::Jump => {
                    let target = index as i64 + 1 + inst.imm;
                    if target >= 0 {
                        work.push((target as usize, depth));
                    }
                }
                Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
                    let target = index as i64 + 1 + inst.imm;
                    if target >= 0 {
                        work.push((target as usize, depth));
                    }
                    work.push((index + 1, depth));
                }
                _ => work.push((index + 1, depth)),
            }
        }
    }
}

fn matching_end_function(program: &[Instruction], begin: usize) -> Option<usize> {
    let mut nesting = 0usize;
    for (index, inst) in program.iter().enumerate().skip(begin) {
        match inst.opcode {
            Opcode::BeginFunction => nesting += 1,
            Opcode::EndFunction => {
                nesting -= 1;
                if nesting == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_structural_opener(op: Opcode) -> bool {
    op != Opcode::BeginScope && op.matching_end().is_some()
}

fn is_structural_closer(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::EndFunction
            | Opcode::EndClass
            | Opcode::EndEnum
            | Opcode::EndParallel
            | Opcode::EndConcurrent
            | Opcode::EndTask
            | Opcode::EndWorker
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn halt() -> Instruction {
        Instruction::new(Opcode::Halt, 0)
    }

    #[test]
    fn test_empty_program() {
        assert_eq!(verify_program(&[]), vec![VerifyError::Empty]);
    }

    #[test]
    fn test_missing_halt() {
        let program = vec![Instruction::with_int(Opcode::PushInt, 1, 1)];
        assert!(verify_program(&program).contains(&VerifyError::MissingHalt));
    }

    #[test]
    fn test_valid_program() {
        let program = vec![
            Instruction::new(Opcode::BeginScope, 1),
            Instruction::with_int(Opcode::PushInt, 1, 1),
            Instruction::new(Opcode::Pop, 1),
            Instruction::new(Opcode::EndScope, 1),
            halt(),
        ];
        assert!(verify_program(&program).is_empty());
    }

    #[test]
    fn test_jump_out_of_bounds() {
        let program = vec![
            Instruction::with_int(Opcode::Jump, 1, 100),
            halt(),
        ];
        let errors = verify_program(&program);
        assert!(matches!(
            errors[0],
            VerifyError::JumpOutOfBounds { index: 0, target: 101 }
        ));
    }

    #[test]
    fn test_backward_jump_in_bounds() {
        // An infinite loop is flow-valid: PUSH, JUMP back, (unreachable) HALT.
        let program = vec![
            Instruction::with_int(Opcode::PushInt, 1, 1),
            Instruction::with_int(Opcode::Jump, 1, -2),
            halt(),
        ];
        assert!(verify_program(&program).is_empty());
    }

    #[test]
    fn test_unclosed_function() {
        let program = vec![
            Instruction::with_str(Opcode::BeginFunction, 1, "f"),
            halt(),
        ];
        let errors = verify_program(&program);
        assert!(errors
            .iter()
            .any(|e| matches!(e, VerifyError::UnclosedBegin { opener: Opcode::BeginFunction, .. })));
    }

    #[test]
    fn test_mismatched_structural_pair() {
        let program = vec![
            Instruction::with_str(Opcode::BeginFunction, 1, "f"),
            Instruction::new(Opcode::EndClass, 1),
            halt(),
        ];
        let errors = verify_program(&program);
        assert!(errors
            .iter()
            .any(|e| matches!(e, VerifyError::MismatchedPair { .. })));
    }

    #[test]
    fn test_scope_underflow() {
        let program = vec![Instruction::new(Opcode::EndScope, 1), halt()];
        let errors = verify_program(&program);
        assert!(errors
            .iter()
            .any(|e| matches!(e, VerifyError::ScopeUnderflow { index: 0 })));
    }

    #[test]
    fn test_open_scope_at_halt() {
        let program = vec![Instruction::new(Opcode::BeginScope, 1), halt()];
        let errors = verify_program(&program);
        assert!(errors
            .iter()
            .any(|e| matches!(e, VerifyError::ScopeImbalance { .. })));
    }

    #[test]
    fn test_scope_closed_at_different_sites_per_path() {
        // Both paths close the scope before converging; valid.
        //   0 BEGIN_SCOPE
        //   1 JUMP_IF_FALSE -> 4
        //   2 END_SCOPE
        //   3 JUMP -> 5
        //   4 END_SCOPE
        //   5 HALT
        let program = vec![
            Instruction::new(Opcode::BeginScope, 1),
            Instruction::with_int(Opcode::JumpIfFalse, 1, 2),
            Instruction::new(Opcode::EndScope, 1),
            Instruction::with_int(Opcode::Jump, 1, 1),
            Instruction::new(Opcode::EndScope, 1),
            halt(),
        ];
        assert!(verify_program(&program).is_empty());
    }

    #[test]
    fn test_path_leaking_a_scope_is_flagged() {
        // One path reaches HALT with the scope still open.
        //   0 BEGIN_SCOPE
        //   1 JUMP_IF_FALSE -> 3   (false path skips the close)
        //   2 END_SCOPE
        //   3 HALT
        let program = vec![
            Instruction::new(Opcode::BeginScope, 1),
            Instruction::with_int(Opcode::JumpIfFalse, 1, 1),
            Instruction::new(Opcode::EndScope, 1),
            halt(),
        ];
        let errors = verify_program(&program);
        assert!(errors
            .iter()
            .any(|e| matches!(e, VerifyError::ScopeImbalance { index: 3 })));
    }

    #[test]
    fn test_function_bodies_are_separate_entries() {
        // The function body's scope balances internally; the surrounding
        // flow skips the body entirely.
        let program = vec![
            Instruction::with_str(Opcode::BeginFunction, 1, "f"),
            Instruction::new(Opcode::BeginScope, 1),
            Instruction::new(Opcode::EndScope, 1),
            Instruction::new(Opcode::PushNull, 1),
            Instruction::new(Opcode::Return, 1),
            Instruction::new(Opcode::EndFunction, 1),
            halt(),
        ];
        assert!(verify_program(&program).is_empty());
    }
}
