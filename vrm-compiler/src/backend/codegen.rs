//! The code generator: a single preorder traversal per procedure that
//! drives the register file, the expression and condition emitters, and
//! the call sequencer, assigning absolute line numbers as it goes.
//!
//! Line discipline: `line` always holds the absolute 1-based line of the
//! next instruction to be appended. A block's `start_line` is stamped on
//! first visit, before any of its instructions exist, so anything visited
//! later may reference it. Condition code is the one place emission is
//! deferred: its exact size is known up front, so its lines are reserved
//! and the sequence is written into the reservation once the then-branch's
//! start line exists. Trailing block jumps are accounted during traversal
//! and materialized at serialization, when every target is resolved.

use super::condition;
use super::expression;
use super::flow_graph::{BlockArena, BlockId, FlowGraphBuilder};
use super::instruction::{Instr, Reg};
use super::registers::RegisterFile;
use crate::ast::{Command, Expression, Operand, Program};
use crate::symbol_table::{SymbolKind, SymbolTable};

struct ProcMeta {
    name: String,
    start_line: u64,
    /// Addresses of the parameter cells, in declaration order.
    param_slots: Vec<u64>,
    /// Address of the hidden return-line cell.
    return_slot: u64,
}

pub struct CodeGenerator<'p> {
    program: &'p Program,
    arena: BlockArena,
    regs: RegisterFile,
    /// Absolute line of the next instruction to be appended.
    line: u64,
    /// Index of the procedure being generated; `None` for main.
    current: Option<usize>,
    proc_roots: Vec<BlockId>,
    main_root: BlockId,
    procs: Vec<ProcMeta>,
}

fn scope<'a>(program: &'a Program, current: Option<usize>) -> &'a SymbolTable {
    match current {
        Some(i) => &program.procedures[i].symbols,
        None => &program.main.symbols,
    }
}

impl<'p> CodeGenerator<'p> {
    pub fn new(program: &'p Program) -> Self {
        let mut arena = BlockArena::new();
        let mut proc_roots = Vec::new();
        let mut procs = Vec::new();
        for p in &program.procedures {
            proc_roots.push(FlowGraphBuilder::new(&mut arena).build(&p.commands));
            procs.push(ProcMeta {
                name: p.name.clone(),
                start_line: 0,
                param_slots: p
                    .params
                    .iter()
                    .map(|n| p.symbols.expect(n).mem_start)
                    .collect(),
                return_slot: p.symbols.return_slot(),
            });
        }
        let main_root = FlowGraphBuilder::new(&mut arena).build(&program.main.commands);
        CodeGenerator {
            program,
            arena,
            regs: RegisterFile::new(),
            line: 1,
            current: None,
            proc_roots,
            main_root,
            procs,
        }
    }

    pub fn arena(&self) -> &BlockArena {
        &self.arena
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn main_root(&self) -> BlockId {
        self.main_root
    }

    pub fn proc_roots(&self) -> &[BlockId] {
        &self.proc_roots
    }

    /// Generate code for every procedure (in declaration order) and main,
    /// and return the serialized program.
    pub fn run(&mut self) -> Vec<Instr> {
        // line 1 is the jump over the procedures into main
        self.line = if self.program.procedures.is_empty() { 1 } else { 2 };
        for i in 0..self.program.procedures.len() {
            self.current = Some(i);
            self.regs.reset();
            self.emit_prologue(i);
            self.preorder(self.proc_roots[i]);
            self.emit_epilogue(i);
            self.regs.reset();
        }
        self.current = None;
        self.regs.reset();
        self.preorder(self.main_root);
        self.serialize()
    }

    // ── Emission plumbing ───────────────────────────────────────────────

    fn push_all(&mut self, b: BlockId, code: Vec<Instr>) {
        self.line += code.len() as u64;
        self.arena[b].code.extend(code);
    }

    /// Append code whose lines were already reserved.
    fn push_reserved(&mut self, b: BlockId, code: Vec<Instr>) {
        self.arena[b].code.extend(code);
    }

    // ── Traversal ───────────────────────────────────────────────────────

    fn preorder(&mut self, b: BlockId) {
        if self.arena[b].start_line.is_none() {
            self.arena[b].start_line = Some(self.line);
        }
        let commands = std::mem::take(&mut self.arena[b].commands);
        for command in &commands {
            self.handle_command(command, b);
        }
        self.arena[b].commands = commands;

        let mut snapshot = None;
        if self.arena[b].cond.is_some() {
            // both successor paths must start from identical persisted
            // state; back edges re-enter right after this spill
            let syms = scope(self.program, self.current);
            let mut out = Vec::new();
            self.regs.spill_all(syms, &mut out);
            self.push_all(b, out);
            self.arena[b].condition_start_line = Some(self.line);
            self.prepare_condition(b);
            let size = condition::condition_code_size(self.arena[b].cond.as_ref().unwrap());
            self.line += size;
            snapshot = Some(self.regs.snapshot());
        }

        if let Some(left) = self.arena[b].left {
            self.preorder(left);
            // whatever the branch kept in registers must be in memory
            // before it leaves: by jumping to the join, by looping back
            // to the test, or by falling through into the continuation
            let tail = self.arena.rightmost(left);
            let syms = scope(self.program, self.current);
            let mut out = Vec::new();
            self.regs.spill_all(syms, &mut out);
            self.push_all(tail, out);
            let leaves = self.arena[left].jump_to_block.is_some()
                || self.arena[left].jump_to_condition.is_some();
            if !leaves {
                // the then path falls straight into the right block, so
                // the only state both arrival paths share is "everything
                // persisted, nothing cached"
                snapshot = None;
            }
        }
        if self.arena[b].cond.is_some() {
            self.emit_condition(b);
        }
        if let Some(snap) = snapshot {
            self.regs.restore(snap);
        }
        if let Some(right) = self.arena[b].right {
            if self.arena[right].join_spill {
                // this path falls through into a merge point; persist its
                // state on its own side of the merge (the other path
                // jumps past these lines)
                let syms = scope(self.program, self.current);
                let mut out = Vec::new();
                self.regs.spill_all(syms, &mut out);
                self.push_all(b, out);
            }
            self.preorder(right);
        }
        if self.arena[b].jump_to_block.is_some() || self.arena[b].jump_to_condition.is_some() {
            // the trailing jump, materialized at serialization
            self.line += 1;
        }
    }

    // ── Conditions ──────────────────────────────────────────────────────

    fn prepare_condition(&mut self, b: BlockId) {
        let cond = self.arena[b].cond.clone().expect("prepare without a condition");
        let plan = condition::prepare(&cond);
        let syms = scope(self.program, self.current);
        let mut out = Vec::new();
        self.regs.move_accumulator_to_free_register(syms, &mut out);
        let mut prepared = Vec::new();
        let (last, firsts) = plan.operands.split_last().expect("conditions take two operands");
        for op in firsts {
            let r = self.regs.load(op, None, true, syms, &mut out);
            self.regs.set_busy(r, true);
            prepared.push(r);
        }
        self.regs.load(last, Some(Reg::A), true, syms, &mut out);
        prepared.push(Reg::A);
        for _ in 0..plan.scratch {
            let r = self.regs.find_free(syms, &mut out);
            self.regs.set_busy(r, true);
            prepared.push(r);
        }
        for r in &prepared {
            self.regs.set_busy(*r, false);
        }
        // the compare sequence funnels through the accumulator, so its
        // value does not survive into either path
        let acc = self.regs.reg_mut(Reg::A);
        acc.bound = None;
        acc.dirty = false;
        if plan.scratch == 1 {
            // the sequence's first instruction copies the accumulated
            // operand into the scratch register, where it does survive
            let copy = prepared[plan.operands.len()];
            let slot = self.regs.reg_mut(copy);
            slot.bound = if last.cacheable() { Some(last.clone()) } else { None };
            slot.dirty = false;
        }
        self.arena[b].prepared = prepared;
        self.push_all(b, out);
    }

    fn emit_condition(&mut self, b: BlockId) {
        let cond = self.arena[b].cond.clone().expect("emit without a condition");
        let left = self.arena[b].left.expect("a condition block has a then path");
        let then_line = self.arena[left]
            .start_line
            .expect("then branch visited before its condition is emitted");
        let next_line = self.line;
        let regs = self.arena[b].prepared.clone();
        let code = condition::generate(&cond, &regs, then_line, next_line);
        self.push_reserved(b, code);
    }

    // ── Straight-line commands ──────────────────────────────────────────

    fn handle_command(&mut self, command: &Command, b: BlockId) {
        match command {
            Command::Assign { target, value } => self.handle_assign(target, value, b),
            Command::Read(target) => self.handle_read(target, b),
            Command::Write(op) => self.handle_write(op, b),
            Command::Call { name, args } => self.handle_call(name, args, b),
            Command::IfElse { .. } | Command::While { .. } | Command::RepeatUntil { .. } => {
                unreachable!("structured command survived flow-graph construction")
            }
        }
    }

    fn handle_assign(&mut self, target: &Operand, value: &Expression, b: BlockId) {
        let plan = expression::plan(value);
        let syms = scope(self.program, self.current);
        let mut out = Vec::new();

        // pin registers that already hold needed operands
        let mut held = Vec::new();
        for op in &plan.operands {
            if let Some(r) = self.regs.already_loaded(op) {
                if !self.regs.reg(r).busy {
                    self.regs.set_busy(r, true);
                    held.push(r);
                }
            }
        }
        self.regs.move_accumulator_to_free_register(syms, &mut out);

        let mut prepared = Vec::new();
        if let Some((last, firsts)) = plan.operands.split_last() {
            for op in firsts {
                let r = self.regs.load(op, None, true, syms, &mut out);
                self.regs.set_busy(r, true);
                prepared.push(r);
            }
            self.regs.load(last, Some(Reg::A), true, syms, &mut out);
            prepared.push(Reg::A);
        }
        for _ in 0..plan.scratch {
            let r = self.regs.find_free(syms, &mut out);
            self.regs.set_busy(r, true);
            prepared.push(r);
        }

        let first_line = self.line + out.len() as u64;
        out.extend(expression::generate(value, &prepared, first_line));
        expression::finish(value, &prepared, &mut self.regs);
        for r in prepared.iter().copied().chain(held) {
            self.regs.set_busy(r, false);
        }

        if matches!(target, Operand::ArrayVar { .. }) {
            // a variable-indexed cell cannot be cached; store through the
            // computed address immediately
            self.store_indexed(target, syms, &mut out);
        } else {
            self.bind_result(target);
        }
        self.push_all(b, out);
    }

    fn handle_read(&mut self, target: &Operand, b: BlockId) {
        let syms = scope(self.program, self.current);
        let mut out = Vec::new();
        self.regs.move_accumulator_to_free_register(syms, &mut out);
        out.push(Instr::Read);
        if matches!(target, Operand::ArrayVar { .. }) {
            self.store_indexed(target, syms, &mut out);
        } else {
            self.bind_result(target);
        }
        self.push_all(b, out);
    }

    fn handle_write(&mut self, op: &Operand, b: BlockId) {
        let syms = scope(self.program, self.current);
        let mut out = Vec::new();
        match self.regs.already_loaded(op) {
            Some(Reg::A) => {}
            Some(r) => {
                self.regs.set_busy(r, true);
                self.regs.move_accumulator_to_free_register(syms, &mut out);
                out.push(Instr::Get(r));
                let bound = self.regs.reg(r).bound.clone();
                self.regs.set_busy(r, false);
                let acc = self.regs.reg_mut(Reg::A);
                acc.bound = bound;
                acc.dirty = false;
            }
            None => {
                self.regs.move_accumulator_to_free_register(syms, &mut out);
                self.regs.load(op, Some(Reg::A), false, syms, &mut out);
            }
        }
        out.push(Instr::Write);
        self.push_all(b, out);
    }

    // ── Procedure calls ─────────────────────────────────────────────────

    /// Arguments are passed by storing the actual's cell address (or the
    /// address such a cell itself stores, when the actual is already a
    /// by-reference parameter) into the callee's parameter cell. The
    /// return line rides in the accumulator via `STRK`.
    fn handle_call(&mut self, name: &str, args: &[String], b: BlockId) {
        let syms = scope(self.program, self.current);
        let mut out = Vec::new();
        self.regs.move_accumulator_to_free_register(syms, &mut out);
        let helper = self.regs.find_free(syms, &mut out);
        self.regs.set_busy(helper, true);
        for g in Reg::GENERAL {
            if g != helper {
                self.regs.save(g, helper, syms, &mut out);
            }
        }
        self.regs.set_busy(helper, false);

        let meta = self
            .procs
            .iter()
            .find(|m| m.name == name)
            .expect("call to an unknown procedure past semantic analysis");
        let (start_line, param_slots) = (meta.start_line, meta.param_slots.clone());
        for (arg, slot) in args.iter().zip(param_slots) {
            let sym = syms.expect(arg);
            RegisterFile::synthesize(sym.mem_start, helper, &mut out);
            out.push(Instr::Get(helper));
            if sym.kind.by_reference() {
                out.push(Instr::Load(Reg::A));
            }
            RegisterFile::synthesize(slot, helper, &mut out);
            out.push(Instr::Store(helper));
        }
        out.push(Instr::Strk(Reg::A));
        out.push(Instr::Jump(start_line));
        self.push_all(b, out);
        // the callee shares the register pool; nothing survives the call
        self.regs.reset();
    }

    /// Store the return line (left in the accumulator by the caller's
    /// `STRK`) into the procedure's hidden slot.
    fn emit_prologue(&mut self, i: usize) {
        let root = self.proc_roots[i];
        self.arena[root].start_line = Some(self.line);
        self.procs[i].start_line = self.line;
        let mut out = Vec::new();
        RegisterFile::synthesize(self.procs[i].return_slot, Reg::B, &mut out);
        out.push(Instr::Store(Reg::B));
        self.push_all(root, out);
    }

    /// Flush registers bound to by-reference parameters, reload the
    /// return line, step past the two-instruction call footprint, and
    /// jump back.
    fn emit_epilogue(&mut self, i: usize) {
        let tail = self.arena.rightmost(self.proc_roots[i]);
        let syms = scope(self.program, self.current);
        let mut out = Vec::new();
        self.regs.move_accumulator_to_free_register(syms, &mut out);
        let helper = self.regs.find_free(syms, &mut out);
        self.regs.set_busy(helper, true);
        for g in Reg::GENERAL {
            if g == helper {
                continue;
            }
            let by_ref = match &self.regs.reg(g).bound {
                Some(op) => op
                    .name()
                    .map(|n| syms.expect(n).kind.by_reference())
                    .unwrap_or(false),
                None => false,
            };
            if by_ref {
                self.regs.save(g, helper, syms, &mut out);
            }
        }
        self.regs.set_busy(helper, false);
        let r = self.regs.find_free(syms, &mut out);
        RegisterFile::synthesize(self.procs[i].return_slot, r, &mut out);
        out.push(Instr::Load(r));
        out.push(Instr::Inc(Reg::A));
        out.push(Instr::Inc(Reg::A));
        out.push(Instr::Jumpr(Reg::A));
        self.push_all(tail, out);
    }

    // ── Assignment plumbing ─────────────────────────────────────────────

    /// Write the accumulator into a variable-indexed array cell: park the
    /// value, materialize the effective address, store through it. The
    /// cell itself is never cached.
    fn store_indexed(&mut self, target: &Operand, syms: &SymbolTable, out: &mut Vec<Instr>) {
        let (name, index) = match target {
            Operand::ArrayVar { name, index } => (name, index),
            _ => unreachable!("store_indexed on a directly addressable operand"),
        };
        // the accumulator physically holds the value to store, not the
        // operand its bookkeeping last named; drop that binding before
        // anything can hit it
        let acc = self.regs.reg_mut(Reg::A);
        acc.bound = None;
        acc.dirty = false;
        let parked = self.regs.find_free(syms, out);
        self.regs.set_busy(parked, true);
        out.push(Instr::Put(parked));
        // pending writes to other cells of this array must reach memory
        // before this store, in program order
        for g in Reg::GENERAL {
            let pending = matches!(
                &self.regs.reg(g).bound,
                Some(Operand::ArrayConst { name: n, .. }) if n == name
            ) && self.regs.reg(g).dirty
                && !self.regs.reg(g).busy;
            if pending {
                let helper = self.regs.find_free(syms, out);
                self.regs.save(g, helper, syms, out);
            }
        }
        let idx_op = Operand::Scalar(index.clone());
        let idx_reg = self.regs.load(&idx_op, None, false, syms, out);
        self.regs.set_busy(idx_reg, true);
        let sym = syms.expect(name);
        RegisterFile::synthesize(sym.mem_start, Reg::A, out);
        if sym.kind == SymbolKind::ProcArrayArg {
            out.push(Instr::Load(Reg::A));
        }
        out.push(Instr::Add(idx_reg));
        out.push(Instr::Put(idx_reg)); // the index register now holds the address
        out.push(Instr::Get(parked));
        out.push(Instr::Store(idx_reg));
        // the store may have hit any cell of this array; cached cells of
        // it are no longer trustworthy
        self.invalidate_array_cells(name);
        let slot = self.regs.reg_mut(idx_reg);
        slot.bound = None;
        slot.dirty = false;
        slot.busy = false;
        let slot = self.regs.reg_mut(parked);
        slot.bound = Some(target.clone());
        slot.dirty = false;
        slot.busy = false;
        let acc = self.regs.reg_mut(Reg::A);
        acc.bound = Some(target.clone());
        acc.dirty = false;
    }

    /// Bind the accumulator to a freshly assigned target, invalidating
    /// stale cached copies — including variable-indexed cells addressed
    /// through a scalar that just changed.
    fn bind_result(&mut self, target: &Operand) {
        for g in Reg::GENERAL {
            if self.regs.reg(g).bound.as_ref() == Some(target) {
                let slot = self.regs.reg_mut(g);
                slot.bound = None;
                slot.dirty = false;
            }
        }
        match target {
            Operand::Scalar(name) => {
                // variable-indexed cells addressed through this scalar
                // point somewhere else now
                for g in Reg::GENERAL {
                    let stale = matches!(
                        &self.regs.reg(g).bound,
                        Some(Operand::ArrayVar { index, .. }) if index == name
                    );
                    if stale {
                        let slot = self.regs.reg_mut(g);
                        slot.bound = None;
                        slot.dirty = false;
                    }
                }
            }
            Operand::ArrayConst { name, .. } => {
                // a variable-indexed binding of the same array may denote
                // this very cell
                for g in Reg::GENERAL {
                    let stale = matches!(
                        &self.regs.reg(g).bound,
                        Some(Operand::ArrayVar { name: n, .. }) if n == name
                    );
                    if stale {
                        let slot = self.regs.reg_mut(g);
                        slot.bound = None;
                        slot.dirty = false;
                    }
                }
            }
            _ => {}
        }
        let acc = self.regs.reg_mut(Reg::A);
        acc.bound = Some(target.clone());
        acc.dirty = true;
    }

    /// Drop every binding that names a cell of `array`; used after a
    /// store whose exact cell is only known at runtime.
    fn invalidate_array_cells(&mut self, array: &str) {
        for g in Reg::GENERAL {
            let stale = match &self.regs.reg(g).bound {
                Some(Operand::ArrayConst { name, .. }) | Some(Operand::ArrayVar { name, .. }) => {
                    name == array
                }
                _ => false,
            };
            if stale {
                let slot = self.regs.reg_mut(g);
                slot.bound = None;
                slot.dirty = false;
            }
        }
        if let Some(Operand::ArrayConst { name, .. } | Operand::ArrayVar { name, .. }) =
            &self.regs.reg(Reg::A).bound
        {
            if name == array {
                let acc = self.regs.reg_mut(Reg::A);
                acc.bound = None;
                acc.dirty = false;
            }
        }
    }

    // ── Serialization ───────────────────────────────────────────────────

    /// Flatten the block graphs in generation order, materializing each
    /// trailing jump from its target's (now resolved) line. With
    /// procedures present, line 1 jumps over them into main. The program
    /// always ends with `HALT`.
    fn serialize(&self) -> Vec<Instr> {
        let mut lines = Vec::new();
        if !self.proc_roots.is_empty() {
            let main_start = self.arena[self.main_root]
                .start_line
                .expect("main generated before serialization");
            lines.push(Instr::Jump(main_start));
        }
        for root in &self.proc_roots {
            self.write_block(*root, &mut lines);
        }
        self.write_block(self.main_root, &mut lines);
        lines.push(Instr::Halt);
        lines
    }

    fn write_block(&self, b: BlockId, out: &mut Vec<Instr>) {
        out.extend(self.arena[b].code.iter().cloned());
        if let Some(left) = self.arena[b].left {
            self.write_block(left, out);
        }
        if let Some(right) = self.arena[b].right {
            self.write_block(right, out);
        }
        if let Some(t) = self.arena[b].jump_to_block {
            out.push(Instr::Jump(
                self.arena[t].start_line.expect("join resolved by traversal order"),
            ));
        } else if let Some(t) = self.arena[b].jump_to_condition {
            out.push(Instr::Jump(
                self.arena[t]
                    .condition_start_line
                    .expect("loop test resolved by traversal order"),
            ));
        }
    }
}
