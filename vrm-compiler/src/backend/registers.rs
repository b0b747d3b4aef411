//! The symbolic register file and allocation discipline.
//!
//! The machine has one accumulator and seven general registers, shared by
//! the whole compilation unit. Each register tracks which operand it
//! currently holds, whether that value has been persisted to its home
//! memory cell (`dirty`), and whether the register is reserved for an
//! in-flight multi-instruction emission (`busy`).
//!
//! Standing invariant: at every allocation point at least one non-busy
//! register is either free or clean, so allocation always terminates.
//! [`RegisterFile::move_accumulator_to_free_register`] maintains the
//! reserve proactively by spilling ahead of exhaustion. A state where no
//! register can be reclaimed is a compiler defect and panics.

use super::instruction::{Instr, Reg};
use crate::ast::Operand;
use crate::symbol_table::{SymbolKind, SymbolTable};

/// Bookkeeping for a single machine register.
#[derive(Debug, Clone)]
pub struct Register {
    pub name: Reg,
    /// The operand whose value this register holds, if any.
    pub bound: Option<Operand>,
    /// Value not yet persisted to its home memory cell.
    pub dirty: bool,
    /// Reserved mid-emission; must not be reassigned.
    pub busy: bool,
}

impl Register {
    fn new(name: Reg) -> Self {
        Register {
            name,
            bound: None,
            dirty: false,
            busy: false,
        }
    }

    fn release(&mut self) {
        self.bound = None;
        self.dirty = false;
    }
}

#[derive(Debug, Clone)]
pub struct RegisterFile {
    acc: Register,
    general: [Register; 7],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile {
            acc: Register::new(Reg::A),
            general: Reg::GENERAL.map(Register::new),
        }
    }

    pub fn reg(&self, r: Reg) -> &Register {
        match r {
            Reg::A => &self.acc,
            _ => &self.general[Self::index(r)],
        }
    }

    pub fn reg_mut(&mut self, r: Reg) -> &mut Register {
        match r {
            Reg::A => &mut self.acc,
            _ => &mut self.general[Self::index(r)],
        }
    }

    fn index(r: Reg) -> usize {
        Reg::GENERAL
            .iter()
            .position(|g| *g == r)
            .expect("accumulator has no general index")
    }

    /// All eight registers, accumulator last (the scan order of
    /// [`Self::already_loaded`]).
    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.general.iter().chain(std::iter::once(&self.acc))
    }

    pub fn set_busy(&mut self, r: Reg, busy: bool) {
        self.reg_mut(r).busy = busy;
    }

    /// Forget everything. Used at procedure boundaries and after call
    /// sites, where register contents are no longer trustworthy.
    pub fn reset(&mut self) {
        self.acc = Register::new(Reg::A);
        self.general = Reg::GENERAL.map(Register::new);
    }

    /// Copy of the whole bookkeeping state, taken around a condition test
    /// so the two successor paths can diverge independently.
    pub fn snapshot(&self) -> RegisterFile {
        self.clone()
    }

    pub fn restore(&mut self, snapshot: RegisterFile) {
        *self = snapshot;
    }

    // ── Literal / address synthesis ─────────────────────────────────────

    /// Emit the bit ladder constructing `value` in `reg`: reset, then one
    /// doubling per remaining bit position and one increment per set bit,
    /// scanning from the highest set bit down. The machine has no
    /// immediate load; this is the only way to materialize a constant.
    pub fn synthesize(value: u64, reg: Reg, out: &mut Vec<Instr>) {
        out.push(Instr::Rst(reg));
        if value == 0 {
            return;
        }
        let top = 63 - value.leading_zeros();
        for pos in (0..=top).rev() {
            if pos != top {
                out.push(Instr::Shl(reg));
            }
            if value & (1u64 << pos) != 0 {
                out.push(Instr::Inc(reg));
            }
        }
    }

    /// Instruction count of [`Self::synthesize`] for `value`.
    pub fn synthesis_cost(value: u64) -> u64 {
        if value == 0 {
            return 1;
        }
        let top = (63 - value.leading_zeros()) as u64;
        1 + top + u64::from(value.count_ones())
    }

    // ── Lookup ──────────────────────────────────────────────────────────

    /// Scan the general registers, then the accumulator, for a register
    /// already holding `operand`. Variable-indexed array cells never hit:
    /// their effective address depends on a runtime value.
    pub fn already_loaded(&self, operand: &Operand) -> Option<Reg> {
        if !operand.cacheable() {
            return None;
        }
        self.iter()
            .find(|slot| slot.bound.as_ref() == Some(operand))
            .map(|slot| slot.name)
    }

    // ── Allocation ──────────────────────────────────────────────────────

    /// A general register safe to clobber: preferably unbound, else clean,
    /// else a dirty one spilled first. Never returns a busy register; the
    /// returned register is unbound.
    pub fn find_free(&mut self, syms: &SymbolTable, out: &mut Vec<Instr>) -> Reg {
        if let Some(r) = self
            .general
            .iter()
            .find(|s| s.bound.is_none() && !s.busy)
            .map(|s| s.name)
        {
            self.reg_mut(r).release();
            return r;
        }
        if let Some(r) = self
            .general
            .iter()
            .find(|s| !s.dirty && !s.busy)
            .map(|s| s.name)
        {
            self.reg_mut(r).release();
            return r;
        }
        let victim = self
            .general
            .iter()
            .find(|s| !s.busy)
            .map(|s| s.name)
            .expect("register file exhausted: every register is busy");
        let helper = self.clean_helper(victim);
        self.save(victim, helper, syms, out);
        self.reg_mut(victim).release();
        victim
    }

    /// A clean general register other than `exclude`, for use as the
    /// address scratch of a spill. Non-busy registers are preferred; a
    /// busy clean one is acceptable because plain-variable spills never
    /// write through the helper. No clean register at all would violate
    /// the standing-reserve invariant.
    fn clean_helper(&self, exclude: Reg) -> Reg {
        self.general
            .iter()
            .find(|s| !s.dirty && !s.busy && s.name != exclude)
            .or_else(|| {
                self.general
                    .iter()
                    .find(|s| !s.dirty && s.name != exclude)
            })
            .map(|s| s.name)
            .expect("no clean register left to assist a spill")
    }

    // ── Spilling ────────────────────────────────────────────────────────

    /// Persist `r`'s value to its home cell, if it has one and is dirty.
    ///
    /// By-reference parameters store an address in their own cell, so the
    /// target address is fetched through `helper` first. Plain scalars and
    /// array cells store straight to their computed home address. After a
    /// store, every other register aliasing the same operand is
    /// invalidated. The accumulator is clobbered; callers relocate it
    /// beforehand.
    pub fn save(&mut self, r: Reg, helper: Reg, syms: &SymbolTable, out: &mut Vec<Instr>) {
        debug_assert!(r != Reg::A, "the accumulator is spilled via relocation");
        debug_assert!(r != helper);
        let slot = self.reg_mut(r);
        if !slot.dirty {
            slot.release();
            slot.busy = false;
            return;
        }
        let operand = match slot.bound.clone() {
            Some(op) => op,
            None => {
                slot.release();
                slot.busy = false;
                return;
            }
        };
        match &operand {
            // Immediates have no home cell; variable-indexed cells are
            // stored eagerly at assignment and are never dirty here.
            Operand::Imm(_) | Operand::ArrayVar { .. } => {
                let slot = self.reg_mut(r);
                slot.release();
                slot.busy = false;
                return;
            }
            Operand::Scalar(name) => {
                let sym = syms.expect(name);
                if sym.kind == SymbolKind::ProcArg {
                    Self::synthesize(sym.mem_start, helper, out);
                    out.push(Instr::Load(helper)); // a ← caller's address
                    out.push(Instr::Put(helper));
                    out.push(Instr::Get(r)); // a ← value
                    out.push(Instr::Store(helper));
                    self.reg_mut(helper).release();
                } else {
                    out.push(Instr::Get(r));
                    Self::synthesize(sym.mem_start, r, out);
                    out.push(Instr::Store(r));
                    out.push(Instr::Put(r)); // restore the value into r
                }
            }
            Operand::ArrayConst { name, index } => {
                let sym = syms.expect(name);
                if sym.kind == SymbolKind::ProcArrayArg {
                    Self::synthesize(sym.mem_start, helper, out);
                    out.push(Instr::Load(helper)); // a ← array base address
                    out.push(Instr::Put(helper));
                    Self::synthesize(*index, Reg::A, out);
                    out.push(Instr::Add(helper)); // a = base + index
                    out.push(Instr::Put(helper));
                    out.push(Instr::Get(r)); // a ← value
                    out.push(Instr::Store(helper));
                    self.reg_mut(helper).release();
                } else {
                    out.push(Instr::Get(r));
                    Self::synthesize(sym.mem_start + index, r, out);
                    out.push(Instr::Store(r));
                    out.push(Instr::Put(r));
                }
            }
        }
        self.reg_mut(r).dirty = false;
        // every other register caching this operand now aliases a value
        // that just changed owners; drop them
        for g in Reg::GENERAL {
            if g != r && self.reg(g).bound.as_ref() == Some(&operand) {
                self.reg_mut(g).release();
            }
        }
        if self.acc.bound.as_ref() == Some(&operand) {
            self.acc.release();
        }
    }

    /// Relocate the accumulator's value so the accumulator can be
    /// clobbered. A clean or unbound accumulator just drops its binding;
    /// a value mirrored in a general register transfers its dirtiness
    /// there; otherwise the value moves to a free or clean register. If
    /// the move would leave fewer than two reclaimable registers, one
    /// further dirty register is spilled to keep the standing reserve.
    pub fn move_accumulator_to_free_register(
        &mut self,
        syms: &SymbolTable,
        out: &mut Vec<Instr>,
    ) {
        if !self.acc.dirty || self.acc.bound.is_none() {
            self.acc.release();
            self.acc.busy = false;
            return;
        }
        let operand = self.acc.bound.clone().unwrap();
        if let Some(mirror) = self
            .general
            .iter()
            .find(|s| s.bound.as_ref() == Some(&operand))
            .map(|s| s.name)
        {
            self.reg_mut(mirror).dirty = true;
            self.acc.release();
            return;
        }
        let reclaimable = self.general.iter().filter(|s| !s.dirty).count();
        let chosen = self
            .general
            .iter()
            .find(|s| !s.dirty && !s.busy)
            .map(|s| s.name)
            .expect("no reclaimable register for the accumulator value");
        out.push(Instr::Put(chosen));
        let slot = self.reg_mut(chosen);
        slot.bound = Some(operand);
        slot.dirty = true;
        slot.busy = false;
        self.acc.release();
        if reclaimable <= 2 {
            let second = self.clean_helper(chosen);
            if let Some(victim) = self
                .general
                .iter()
                .find(|s| s.dirty && !s.busy && s.name != chosen && s.name != second)
                .map(|s| s.name)
            {
                self.save(victim, second, syms, out);
            }
        }
    }

    /// Spill every register, leaving the whole file unbound and clean.
    /// Run before a condition test so both successor paths start from the
    /// same persisted state, and at join points.
    pub fn spill_all(&mut self, syms: &SymbolTable, out: &mut Vec<Instr>) {
        self.move_accumulator_to_free_register(syms, out);
        self.acc.release();
        let helper = self.find_free(syms, out);
        self.reg_mut(helper).busy = true;
        for g in Reg::GENERAL {
            if g == helper {
                continue;
            }
            if !self.reg(g).busy {
                self.save(g, helper, syms, out);
                self.reg_mut(g).release();
            }
        }
        self.reg_mut(helper).busy = false;
    }

    // ── Loading ─────────────────────────────────────────────────────────

    /// Bring `operand` into a register and return it.
    ///
    /// A cache hit is relocated into `target` if one was requested (or
    /// moved out of the accumulator if not); a miss synthesizes the
    /// effective address and loads through it, with one extra indirection
    /// for by-reference parameters and index-then-add arithmetic for
    /// variable-indexed cells. With `allow_reuse`, a dirty hit is spilled
    /// first so the returned binding is persisted.
    pub fn load(
        &mut self,
        operand: &Operand,
        target: Option<Reg>,
        allow_reuse: bool,
        syms: &SymbolTable,
        out: &mut Vec<Instr>,
    ) -> Reg {
        if let Some(hit) = self.already_loaded(operand) {
            if allow_reuse && self.reg(hit).dirty {
                debug_assert!(hit != Reg::A, "dirty accumulator at a reuse load");
                let helper = self.clean_helper(hit);
                self.save(hit, helper, syms, out);
            }
            return match target {
                Some(t) if t == hit => t,
                Some(t) => {
                    if hit != Reg::A {
                        out.push(Instr::Get(hit));
                    }
                    if t != Reg::A {
                        out.push(Instr::Put(t));
                    }
                    let (bound, dirty) = {
                        let h = self.reg(hit);
                        (h.bound.clone(), h.dirty)
                    };
                    let slot = self.reg_mut(t);
                    slot.bound = bound;
                    slot.dirty = dirty;
                    t
                }
                None if hit == Reg::A => {
                    // unrequested values do not stay in the accumulator
                    let t = self.find_free(syms, out);
                    out.push(Instr::Put(t));
                    let (bound, dirty) = (self.acc.bound.clone(), self.acc.dirty);
                    let slot = self.reg_mut(t);
                    slot.bound = bound;
                    slot.dirty = dirty;
                    t
                }
                None => hit,
            };
        }

        let t = match target {
            Some(t) => t,
            None => self.find_free(syms, out),
        };
        self.reg_mut(t).busy = true;
        match operand {
            Operand::Imm(v) => {
                Self::synthesize(*v, t, out);
            }
            Operand::Scalar(name) => {
                let sym = syms.expect(name);
                Self::synthesize(sym.mem_start, t, out);
                out.push(Instr::Load(t));
                if sym.kind == SymbolKind::ProcArg {
                    // the cell holds the caller's address; dereference it
                    out.push(Instr::Load(Reg::A));
                }
                if t != Reg::A {
                    out.push(Instr::Put(t));
                }
            }
            Operand::ArrayConst { name, index } => {
                let sym = syms.expect(name);
                if sym.kind == SymbolKind::ProcArrayArg {
                    // base address lives in the parameter cell; the index
                    // is added on top before the final dereference
                    let w = if t == Reg::A {
                        self.find_free(syms, out)
                    } else {
                        t
                    };
                    Self::synthesize(sym.mem_start, w, out);
                    out.push(Instr::Load(w));
                    Self::synthesize(*index, w, out);
                    out.push(Instr::Add(w));
                    out.push(Instr::Load(Reg::A));
                    if t != Reg::A {
                        out.push(Instr::Put(t));
                    }
                } else {
                    Self::synthesize(sym.mem_start + index, t, out);
                    out.push(Instr::Load(t));
                    if t != Reg::A {
                        out.push(Instr::Put(t));
                    }
                }
            }
            Operand::ArrayVar { name, index } => {
                let idx_reg = self.load_index_variable(index, syms, out);
                self.reg_mut(idx_reg).busy = true;
                let sym = syms.expect(name);
                Self::synthesize(sym.mem_start, Reg::A, out);
                if sym.kind == SymbolKind::ProcArrayArg {
                    out.push(Instr::Load(Reg::A));
                }
                out.push(Instr::Add(idx_reg));
                out.push(Instr::Load(Reg::A));
                if t != Reg::A {
                    out.push(Instr::Put(t));
                }
                self.reg_mut(idx_reg).busy = false;
            }
        }
        let slot = self.reg_mut(t);
        slot.bound = Some(operand.clone());
        slot.dirty = false;
        slot.busy = false;
        t
    }

    /// The index variable of a variable-indexed access, cached in a
    /// general register (moved out of the accumulator if it was there:
    /// the address arithmetic needs the accumulator).
    fn load_index_variable(
        &mut self,
        index: &str,
        syms: &SymbolTable,
        out: &mut Vec<Instr>,
    ) -> Reg {
        let idx_op = Operand::Scalar(index.to_string());
        match self.already_loaded(&idx_op) {
            Some(Reg::A) => {
                let r = self.find_free(syms, out);
                out.push(Instr::Put(r));
                let (bound, dirty) = (self.acc.bound.clone(), self.acc.dirty);
                let slot = self.reg_mut(r);
                slot.bound = bound;
                slot.dirty = dirty;
                self.acc.release();
                r
            }
            Some(r) => r,
            None => {
                let r = self.find_free(syms, out);
                let sym = syms.expect(index);
                Self::synthesize(sym.mem_start, r, out);
                out.push(Instr::Load(r));
                if sym.kind == SymbolKind::ProcArg {
                    out.push(Instr::Load(Reg::A));
                }
                out.push(Instr::Put(r));
                let slot = self.reg_mut(r);
                slot.bound = Some(idx_op);
                slot.dirty = false;
                r
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol_table::Symbol;

    fn table() -> SymbolTable {
        let mut t = SymbolTable::new();
        for (i, name) in ["x", "y", "z", "u", "v", "w", "p", "q"].iter().enumerate() {
            t.declare(Symbol {
                name: name.to_string(),
                kind: SymbolKind::Var,
                mem_start: i as u64,
                length: 1,
                initialized: true,
            })
            .unwrap();
        }
        t
    }

    fn scalar(n: &str) -> Operand {
        Operand::Scalar(n.to_string())
    }

    #[test]
    fn synthesize_zero_is_a_single_reset() {
        let mut out = Vec::new();
        RegisterFile::synthesize(0, Reg::B, &mut out);
        assert_eq!(out, vec![Instr::Rst(Reg::B)]);
    }

    #[test]
    fn synthesize_builds_values_msb_first() {
        let mut out = Vec::new();
        RegisterFile::synthesize(5, Reg::C, &mut out);
        assert_eq!(
            out,
            vec![
                Instr::Rst(Reg::C),
                Instr::Inc(Reg::C),
                Instr::Shl(Reg::C),
                Instr::Shl(Reg::C),
                Instr::Inc(Reg::C),
            ]
        );
        assert_eq!(out.len() as u64, RegisterFile::synthesis_cost(5));
    }

    #[test]
    fn find_free_never_returns_a_busy_register() {
        let syms = table();
        let mut regs = RegisterFile::new();
        let mut out = Vec::new();
        for r in [Reg::B, Reg::C, Reg::D, Reg::E] {
            regs.set_busy(r, true);
        }
        for _ in 0..16 {
            let r = regs.find_free(&syms, &mut out);
            assert!(!regs.reg(r).busy);
        }
    }

    #[test]
    fn find_free_prefers_unbound_then_clean_then_spills() {
        let syms = table();
        let mut regs = RegisterFile::new();
        let mut out = Vec::new();

        assert_eq!(regs.find_free(&syms, &mut out), Reg::B);
        assert!(out.is_empty());

        // bind everything except H clean, H dirty
        for (i, r) in [Reg::B, Reg::C, Reg::D, Reg::E, Reg::F, Reg::G]
            .into_iter()
            .enumerate()
        {
            let slot = regs.reg_mut(r);
            slot.bound = Some(scalar(["x", "y", "z", "u", "v", "w"][i]));
        }
        let slot = regs.reg_mut(Reg::H);
        slot.bound = Some(scalar("p"));
        slot.dirty = true;

        // clean ones go first, without any spill code
        let r = regs.find_free(&syms, &mut out);
        assert_eq!(r, Reg::B);
        assert!(out.is_empty());

        // only the dirty register left non-busy: it must be spilled
        for r in [Reg::B, Reg::C, Reg::D, Reg::E, Reg::F] {
            regs.set_busy(r, true);
        }
        let slot = regs.reg_mut(Reg::G);
        slot.bound = Some(scalar("q"));
        slot.dirty = true;
        regs.set_busy(Reg::G, true);

        let r = regs.find_free(&syms, &mut out);
        assert_eq!(r, Reg::H);
        assert!(out.iter().any(|i| matches!(i, Instr::Store(_))));
    }

    #[test]
    fn save_invalidates_aliases_of_the_stored_operand() {
        let syms = table();
        let mut regs = RegisterFile::new();
        let mut out = Vec::new();
        let slot = regs.reg_mut(Reg::C);
        slot.bound = Some(scalar("x"));
        slot.dirty = true;
        let slot = regs.reg_mut(Reg::D);
        slot.bound = Some(scalar("x"));

        regs.save(Reg::C, Reg::B, &syms, &mut out);
        assert!(!regs.reg(Reg::C).dirty);
        assert_eq!(regs.reg(Reg::C).bound, Some(scalar("x")));
        assert_eq!(regs.reg(Reg::D).bound, None);
    }

    #[test]
    fn spill_all_leaves_the_file_unbound_and_clean() {
        let syms = table();
        let mut regs = RegisterFile::new();
        let mut out = Vec::new();
        regs.load(&scalar("x"), None, false, &syms, &mut out);
        let slot = regs.reg_mut(Reg::A);
        slot.bound = Some(scalar("y"));
        slot.dirty = true;

        regs.spill_all(&syms, &mut out);
        for slot in regs.iter() {
            assert!(slot.bound.is_none(), "{:?} still bound", slot.name);
            assert!(!slot.dirty);
        }
    }

    #[test]
    fn load_hits_the_cache_without_emitting_code() {
        let syms = table();
        let mut regs = RegisterFile::new();
        let mut out = Vec::new();
        let r = regs.load(&scalar("x"), None, false, &syms, &mut out);
        let before = out.len();
        let again = regs.load(&scalar("x"), None, false, &syms, &mut out);
        assert_eq!(r, again);
        assert_eq!(out.len(), before);
    }

    #[test]
    fn variable_indexed_cells_never_hit_the_cache() {
        let mut syms = table();
        syms.declare(Symbol {
            name: "t".to_string(),
            kind: SymbolKind::Array,
            mem_start: 100,
            length: 10,
            initialized: true,
        })
        .unwrap();
        let op = Operand::ArrayVar {
            name: "t".to_string(),
            index: "x".to_string(),
        };
        let mut regs = RegisterFile::new();
        let mut out = Vec::new();
        regs.load(&op, None, false, &syms, &mut out);
        assert_eq!(regs.already_loaded(&op), None);
    }
}
