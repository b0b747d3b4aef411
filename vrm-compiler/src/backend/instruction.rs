//! Machine instructions and registers of the target architecture.
//!
//! The machine has an accumulator `a` and seven general registers `b`–`h`.
//! There is no immediate-load instruction: literals and addresses are
//! synthesized bit by bit with `RST`/`SHL`/`INC` (see
//! [`RegisterFile::synthesize`](super::registers::RegisterFile::synthesize)).
//! Memory is reached through a single level of indirection: `LOAD r` reads
//! the cell whose address is held in `r` into the accumulator, `STORE r`
//! writes the accumulator to that cell.

use std::fmt;

/// A machine register. `A` is the accumulator; all arithmetic flows
/// through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
}

impl Reg {
    /// The seven general-purpose registers, in allocation order.
    pub const GENERAL: [Reg; 7] = [Reg::B, Reg::C, Reg::D, Reg::E, Reg::F, Reg::G, Reg::H];

    pub fn as_str(&self) -> &'static str {
        match self {
            Reg::A => "a",
            Reg::B => "b",
            Reg::C => "c",
            Reg::D => "d",
            Reg::E => "e",
            Reg::F => "f",
            Reg::G => "g",
            Reg::H => "h",
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed machine instruction.
///
/// Jump operands are absolute 1-based line numbers, concrete at
/// construction time: generation order guarantees every referenced line is
/// already resolved, so no placeholder/patching representation is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// `RST r` — r ← 0
    Rst(Reg),
    /// `INC r` — r ← r + 1
    Inc(Reg),
    /// `SHL r` — r ← 2·r
    Shl(Reg),
    /// `SHR r` — r ← ⌊r / 2⌋
    Shr(Reg),
    /// `ADD r` — a ← a + r
    Add(Reg),
    /// `SUB r` — a ← max(a − r, 0)
    Sub(Reg),
    /// `GET r` — a ← r
    Get(Reg),
    /// `PUT r` — r ← a
    Put(Reg),
    /// `LOAD r` — a ← mem[r]
    Load(Reg),
    /// `STORE r` — mem[r] ← a
    Store(Reg),
    /// `JUMP j` — unconditional jump to line j
    Jump(u64),
    /// `JPOS j` — jump to line j if a > 0
    Jpos(u64),
    /// `JZERO j` — jump to line j if a = 0
    Jzero(u64),
    /// `JUMPR r` — jump to the line held in r
    Jumpr(Reg),
    /// `STRK r` — r ← current line number
    Strk(Reg),
    /// `READ` — a ← next input value
    Read,
    /// `WRITE` — output a
    Write,
    Halt,
}

impl Instr {
    /// The jump target, for the three direct-jump forms.
    pub fn jump_target(&self) -> Option<u64> {
        match self {
            Instr::Jump(t) | Instr::Jpos(t) | Instr::Jzero(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Rst(r) => write!(f, "RST {r}"),
            Instr::Inc(r) => write!(f, "INC {r}"),
            Instr::Shl(r) => write!(f, "SHL {r}"),
            Instr::Shr(r) => write!(f, "SHR {r}"),
            Instr::Add(r) => write!(f, "ADD {r}"),
            Instr::Sub(r) => write!(f, "SUB {r}"),
            Instr::Get(r) => write!(f, "GET {r}"),
            Instr::Put(r) => write!(f, "PUT {r}"),
            Instr::Load(r) => write!(f, "LOAD {r}"),
            Instr::Store(r) => write!(f, "STORE {r}"),
            Instr::Jump(t) => write!(f, "JUMP {t}"),
            Instr::Jpos(t) => write!(f, "JPOS {t}"),
            Instr::Jzero(t) => write!(f, "JZERO {t}"),
            Instr::Jumpr(r) => write!(f, "JUMPR {r}"),
            Instr::Strk(r) => write!(f, "STRK {r}"),
            Instr::Read => write!(f, "READ"),
            Instr::Write => write!(f, "WRITE"),
            Instr::Halt => write!(f, "HALT"),
        }
    }
}
