//! Per-operator expression code generation.
//!
//! Every operator declares which operands must be pre-loaded (in order —
//! the last one lives in the accumulator) and how many extra scratch
//! registers it consumes; [`generate`] then emits its instruction
//! sequence. Multiplication and division are loops whose internal branch
//! targets are `first_line` plus shape-constant offsets, which is why the
//! caller passes the absolute line the sequence will start at.
//!
//! Cheap algebraic forms short-circuit the general loops: zero operands
//! collapse to a reset, powers of two become shift chains, and a small
//! added constant becomes a run of increments when that costs less than
//! synthesizing it.

use super::instruction::{Instr, Reg};
use super::registers::RegisterFile;
use crate::ast::{Expression, Operand};

/// Register demand of an expression: operands to pre-load (last one into
/// the accumulator) plus a number of free scratch registers.
#[derive(Debug, Clone)]
pub struct ExprPlan {
    pub operands: Vec<Operand>,
    pub scratch: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// The (single) operand is the result; nothing to emit.
    Ready,
    /// The result is constantly zero.
    ConstZero,
    /// Accumulator plus a small constant via repeated `INC`.
    IncChain(u64),
    /// Multiplication by 2^k.
    ShlChain(u32),
    /// Division by 2^k.
    ShrChain(u32),
    /// Remainder modulo 2^k: subtract the value shifted down and back up.
    MaskMod(u32),
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

struct Scheme {
    shape: Shape,
    operands: Vec<Operand>,
    scratch: usize,
}

/// An immediate worth expanding into `INC`s instead of loading: the
/// increment run must not cost more than the bit ladder plus the `ADD`.
fn cheap_increment(v: u64) -> bool {
    v <= RegisterFile::synthesis_cost(v) + 1
}

fn power_of_two(op: &Operand) -> Option<u32> {
    match op {
        Operand::Imm(v) if v.is_power_of_two() => Some(v.trailing_zeros()),
        _ => None,
    }
}

fn is_zero(op: &Operand) -> bool {
    matches!(op, Operand::Imm(0))
}

fn scheme(expr: &Expression) -> Scheme {
    match expr {
        Expression::Value(op) => Scheme {
            shape: Shape::Ready,
            operands: vec![op.clone()],
            scratch: 0,
        },
        Expression::Add(l, r) => {
            if let Operand::Imm(v) = r {
                if *v == 0 {
                    return Scheme { shape: Shape::Ready, operands: vec![l.clone()], scratch: 0 };
                }
                if cheap_increment(*v) {
                    return Scheme {
                        shape: Shape::IncChain(*v),
                        operands: vec![l.clone()],
                        scratch: 0,
                    };
                }
            }
            if let Operand::Imm(v) = l {
                if *v == 0 {
                    return Scheme { shape: Shape::Ready, operands: vec![r.clone()], scratch: 0 };
                }
                if cheap_increment(*v) {
                    return Scheme {
                        shape: Shape::IncChain(*v),
                        operands: vec![r.clone()],
                        scratch: 0,
                    };
                }
            }
            Scheme {
                shape: Shape::Add,
                operands: vec![l.clone(), r.clone()],
                scratch: 0,
            }
        }
        Expression::Sub(l, r) => {
            if is_zero(r) {
                return Scheme { shape: Shape::Ready, operands: vec![l.clone()], scratch: 0 };
            }
            if is_zero(l) {
                return Scheme { shape: Shape::ConstZero, operands: vec![], scratch: 0 };
            }
            // the subtrahend loads into a register, the minuend into the
            // accumulator
            Scheme {
                shape: Shape::Sub,
                operands: vec![r.clone(), l.clone()],
                scratch: 0,
            }
        }
        Expression::Mul(l, r) => {
            if is_zero(l) || is_zero(r) {
                return Scheme { shape: Shape::ConstZero, operands: vec![], scratch: 0 };
            }
            if let Some(k) = power_of_two(r) {
                return Scheme { shape: Shape::ShlChain(k), operands: vec![l.clone()], scratch: 0 };
            }
            if let Some(k) = power_of_two(l) {
                return Scheme { shape: Shape::ShlChain(k), operands: vec![r.clone()], scratch: 0 };
            }
            // the multiplier drives the loop, one iteration per bit: when
            // both magnitudes are known, the smaller one drives
            let (multiplicand, multiplier) = match (l, r) {
                (Operand::Imm(a), Operand::Imm(b)) if a < b => (r.clone(), l.clone()),
                _ => (l.clone(), r.clone()),
            };
            Scheme {
                shape: Shape::Mul,
                operands: vec![multiplicand, multiplier],
                scratch: 3,
            }
        }
        Expression::Div(l, r) => {
            if is_zero(r) {
                // division by zero yields zero, detected at compile time
                // for a literal divisor
                return Scheme { shape: Shape::ConstZero, operands: vec![], scratch: 0 };
            }
            if let Some(k) = power_of_two(r) {
                return Scheme { shape: Shape::ShrChain(k), operands: vec![l.clone()], scratch: 0 };
            }
            Scheme {
                shape: Shape::Div,
                operands: vec![r.clone(), l.clone()],
                scratch: 3,
            }
        }
        Expression::Mod(l, r) => {
            if matches!(r, Operand::Imm(0) | Operand::Imm(1)) {
                return Scheme { shape: Shape::ConstZero, operands: vec![], scratch: 0 };
            }
            if let Some(k) = power_of_two(r) {
                return Scheme { shape: Shape::MaskMod(k), operands: vec![l.clone()], scratch: 1 };
            }
            Scheme {
                shape: Shape::Mod,
                operands: vec![r.clone(), l.clone()],
                scratch: 3,
            }
        }
    }
}

/// Register demand for `expr`.
pub fn plan(expr: &Expression) -> ExprPlan {
    let s = scheme(expr);
    ExprPlan {
        operands: s.operands,
        scratch: s.scratch,
    }
}

/// Emit the instruction sequence for `expr`. `regs` are the prepared
/// registers — operand registers first (the last of them is the
/// accumulator), scratch registers after — and `first_line` is the
/// absolute line of the sequence's first instruction. The result is left
/// in the accumulator.
pub fn generate(expr: &Expression, regs: &[Reg], first_line: u64) -> Vec<Instr> {
    let a = Reg::A;
    match scheme(expr).shape {
        Shape::Ready => vec![],
        Shape::ConstZero => vec![Instr::Rst(a)],
        Shape::IncChain(n) => (0..n).map(|_| Instr::Inc(a)).collect(),
        Shape::ShlChain(k) => (0..k).map(|_| Instr::Shl(a)).collect(),
        Shape::ShrChain(k) => (0..k).map(|_| Instr::Shr(a)).collect(),
        Shape::MaskMod(k) => {
            let s = regs[1];
            let mut out = vec![Instr::Put(s)];
            out.extend((0..k).map(|_| Instr::Shr(s)));
            out.extend((0..k).map(|_| Instr::Shl(s)));
            out.push(Instr::Sub(s));
            out
        }
        Shape::Add => vec![Instr::Add(regs[0])],
        Shape::Sub => vec![Instr::Sub(regs[0])],
        Shape::Mul => {
            // shift-and-add: the multiplier (accumulator) is consumed bit
            // by bit from the low end while the multiplicand doubles
            let (md, c, b, s) = (regs[0], regs[2], regs[3], regs[4]);
            let l = first_line;
            vec![
                Instr::Put(c),       // l+0   working copy of the multiplier
                Instr::Rst(s),       // l+1   running sum
                Instr::Get(c),       // l+2   loop head
                Instr::Jzero(l + 15),
                Instr::Put(b),       // l+4   isolate the low bit:
                Instr::Shr(b),       //       m - 2*(m >> 1)
                Instr::Shl(b),
                Instr::Sub(b),
                Instr::Jzero(l + 12),
                Instr::Get(s),       // l+9   bit set: sum += multiplicand
                Instr::Add(md),
                Instr::Put(s),
                Instr::Shl(md),      // l+12  next position
                Instr::Shr(c),
                Instr::Jump(l + 2),
                Instr::Get(s),       // l+15  result
            ]
        }
        Shape::Div => division(regs, first_line, false),
        Shape::Mod => division(regs, first_line, true),
    }
}

/// Restoring shift-subtract division. Doubles the divisor until it
/// exceeds the dividend, then walks the positions back down, subtracting
/// where the shifted divisor still fits and collecting quotient bits.
/// A zero divisor short-circuits to a zero result.
fn division(regs: &[Reg], first_line: u64, remainder: bool) -> Vec<Instr> {
    let (e, c, f, g) = (regs[0], regs[2], regs[3], regs[4]);
    let l = first_line;
    vec![
        Instr::Put(f),        // l+0   remainder ← dividend
        Instr::Rst(g),        // l+1   quotient ← 0
        Instr::Get(e),        // l+2
        Instr::Jzero(l + 25), //       divisor is zero: result is zero
        Instr::Put(c),        // l+4   shifting copy of the divisor
        Instr::Get(c),        // l+5   double while it still fits
        Instr::Sub(f),
        Instr::Jpos(l + 10),
        Instr::Shl(c),
        Instr::Jump(l + 5),
        Instr::Get(c),        // l+10  walk the positions back down
        Instr::Sub(e),
        Instr::Jzero(l + 23), //       back at the original divisor: done
        Instr::Shr(c),
        Instr::Shl(g),
        Instr::Get(c),        // l+15  does this position fit?
        Instr::Sub(f),
        Instr::Jpos(l + 10),
        Instr::Get(f),        // l+18  it fits: subtract, set the bit
        Instr::Sub(c),
        Instr::Put(f),
        Instr::Inc(g),
        Instr::Jump(l + 10),
        Instr::Get(if remainder { f } else { g }), // l+23
        Instr::Jump(l + 26),
        Instr::Rst(Reg::A),   // l+25  zero-divisor tail
    ]
}

/// Post-emission register-state update: release the scratch registers and
/// any operand register the sequence clobbered.
pub fn finish(expr: &Expression, regs: &[Reg], file: &mut RegisterFile) {
    let s = scheme(expr);
    let operands = s.operands.len();
    for r in &regs[operands..operands + s.scratch] {
        let slot = file.reg_mut(*r);
        slot.bound = None;
        slot.dirty = false;
    }
    if s.shape == Shape::Mul {
        // the multiplicand register was shifted in place
        let slot = file.reg_mut(regs[0]);
        slot.bound = None;
        slot.dirty = false;
    }
}
