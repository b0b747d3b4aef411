//! Per-comparator compare-and-branch emission.
//!
//! The machine has no comparator: everything is truncated subtraction
//! followed by `JPOS`/`JZERO` on the accumulator. Each comparator has a
//! fixed instruction count — `condition_code_size` — which the code
//! generator uses to reserve line-number space before the branch targets
//! are known. [`prepare`](CondPlan) fixes which registers the condition
//! consumes; [`generate`] later fills in the two target lines.
//!
//! Every sequence falls through into the then-branch when the condition
//! holds and jumps to `next_line` (the else-branch or the continuation)
//! when it does not; `Neq` additionally jumps straight to `then_line` on
//! its early exit.

use super::instruction::{Instr, Reg};
use crate::ast::{Condition, Operand, RelOp};

/// Register demand of a condition: operands in load order (the last one
/// into the accumulator) plus scratch registers.
#[derive(Debug, Clone)]
pub struct CondPlan {
    pub operands: Vec<Operand>,
    pub scratch: usize,
}

/// Which registers `cond` consumes, fixed before any of its code exists.
pub fn prepare(cond: &Condition) -> CondPlan {
    match cond.rel {
        // both differences are needed, and a copy of the accumulated
        // operand survives the first subtraction
        RelOp::Eq | RelOp::Neq => CondPlan {
            operands: vec![cond.right.clone(), cond.left.clone()],
            scratch: 1,
        },
        // a > b  ⇔  !(b + 1 - a > 0); b sits in the accumulator
        RelOp::Gt => CondPlan {
            operands: vec![cond.left.clone(), cond.right.clone()],
            scratch: 0,
        },
        // a >= b  ⇔  a + 1 - b > 0; a sits in the accumulator
        RelOp::Ge => CondPlan {
            operands: vec![cond.right.clone(), cond.left.clone()],
            scratch: 0,
        },
    }
}

/// Exact emitted length of [`generate`] for this comparator.
pub fn condition_code_size(cond: &Condition) -> u64 {
    match cond.rel {
        RelOp::Eq | RelOp::Neq => 6,
        RelOp::Gt | RelOp::Ge => 3,
    }
}

/// Emit the compare-and-branch sequence. `regs` is the register list
/// fixed by [`prepare`]: operand registers first (the last is the
/// accumulator), scratch after.
pub fn generate(cond: &Condition, regs: &[Reg], then_line: u64, next_line: u64) -> Vec<Instr> {
    let a = Reg::A;
    let code = match cond.rel {
        RelOp::Eq => {
            // equal iff a-b and b-a both truncate to zero
            let (rb, copy) = (regs[0], regs[2]);
            vec![
                Instr::Put(copy),
                Instr::Sub(rb),
                Instr::Jpos(next_line),
                Instr::Get(rb),
                Instr::Sub(copy),
                Instr::Jpos(next_line),
            ]
        }
        RelOp::Neq => {
            let (rb, copy) = (regs[0], regs[2]);
            vec![
                Instr::Put(copy),
                Instr::Sub(rb),
                Instr::Jpos(then_line),
                Instr::Get(rb),
                Instr::Sub(copy),
                Instr::Jzero(next_line),
            ]
        }
        RelOp::Gt => {
            let rl = regs[0];
            vec![Instr::Inc(a), Instr::Sub(rl), Instr::Jpos(next_line)]
        }
        RelOp::Ge => {
            let rr = regs[0];
            vec![Instr::Inc(a), Instr::Sub(rr), Instr::Jzero(next_line)]
        }
    };
    debug_assert_eq!(code.len() as u64, condition_code_size(cond));
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(rel: RelOp) -> Condition {
        Condition {
            rel,
            left: Operand::Scalar("a".to_string()),
            right: Operand::Scalar("b".to_string()),
        }
    }

    #[test]
    fn code_sizes_are_fixed() {
        assert_eq!(condition_code_size(&cond(RelOp::Eq)), 6);
        assert_eq!(condition_code_size(&cond(RelOp::Neq)), 6);
        assert_eq!(condition_code_size(&cond(RelOp::Gt)), 3);
        assert_eq!(condition_code_size(&cond(RelOp::Ge)), 3);
    }

    #[test]
    fn generated_length_matches_the_declared_size() {
        let regs = [Reg::B, Reg::A, Reg::C];
        for rel in [RelOp::Eq, RelOp::Neq, RelOp::Gt, RelOp::Ge] {
            let c = cond(rel);
            assert_eq!(
                generate(&c, &regs, 50, 60).len() as u64,
                condition_code_size(&c)
            );
        }
    }

    #[test]
    fn only_neq_branches_to_the_then_line() {
        let regs = [Reg::B, Reg::A, Reg::C];
        for rel in [RelOp::Eq, RelOp::Gt, RelOp::Ge] {
            let code = generate(&cond(rel), &regs, 50, 60);
            assert!(code.iter().all(|i| i.jump_target() != Some(50)));
        }
        let code = generate(&cond(RelOp::Neq), &regs, 50, 60);
        assert!(code.iter().any(|i| i.jump_target() == Some(50)));
    }
}
