//! Semantic analysis: turns the parsed source into the backend's
//! validated [`Program`], reporting line-numbered errors.
//!
//! This pass owns everything the code generators get to assume:
//! name resolution, scalar/array kind agreement, constant index bounds,
//! initialization-before-use, call arity and argument kinds, and the flat
//! memory layout (every symbol receives an absolute `mem_start`; each
//! procedure reserves one hidden cell for its return line).
//!
//! Initialization of by-reference parameters is tracked across calls: a
//! parameter read before any write requires an initialized actual at
//! every call site, and a call marks actuals bound to parameters the
//! callee writes.

use crate::ast::{Command, Condition, Expression, Operand, Procedure, Program};
use crate::frontend::parser::{
    ArithOp, Decl, SourceCommand, SourceCond, SourceExpr, SourceIdent, SourceMain,
    SourceProcedure, SourceProgram, SourceValue,
};
use crate::symbol_table::{Symbol, SymbolKind, SymbolTable};
use crate::{CompileError, SemanticErrorKind};

/// Addresses must stay below this bound.
const MAX_MEMORY: u64 = 1 << 62;

pub fn analyze(source: &SourceProgram) -> Result<Program, CompileError> {
    Analyzer::default().run(source)
}

/// Call-relevant facts about one parameter of an analyzed procedure.
#[derive(Debug, Clone)]
struct ParamSig {
    name: String,
    is_array: bool,
    /// Read in the body before any write: callers must pass an
    /// initialized actual.
    needs_init: bool,
    /// The body (or one of its callees) writes it.
    initializes: bool,
}

#[derive(Debug)]
struct ProcSig {
    name: String,
    params: Vec<ParamSig>,
}

/// Mutable state of the procedure currently being analyzed.
struct Scope {
    symbols: SymbolTable,
    params: Vec<ParamSig>,
    proc_name: Option<String>,
}

impl Scope {
    fn param_mut(&mut self, name: &str) -> Option<&mut ParamSig> {
        self.params.iter_mut().find(|p| p.name == name)
    }
}

#[derive(Default)]
struct Analyzer {
    next_addr: u64,
    sigs: Vec<ProcSig>,
}

fn err(kind: SemanticErrorKind, line: usize, message: impl Into<String>) -> CompileError {
    CompileError::Semantic {
        kind,
        line,
        message: message.into(),
    }
}

impl Analyzer {
    fn run(mut self, source: &SourceProgram) -> Result<Program, CompileError> {
        let mut procedures = Vec::new();
        for proc in &source.procedures {
            let converted = self.procedure(proc)?;
            procedures.push(converted);
        }
        let main = self.main(&source.main)?;
        Ok(Program { procedures, main })
    }

    fn alloc(&mut self, cells: u64, line: usize) -> Result<u64, CompileError> {
        let start = self.next_addr;
        let end = start.checked_add(cells).filter(|e| *e <= MAX_MEMORY);
        match end {
            Some(end) => {
                self.next_addr = end;
                Ok(start)
            }
            None => Err(err(
                SemanticErrorKind::OutOfMemory,
                line,
                "memory capacity reached",
            )),
        }
    }

    fn declare(
        &mut self,
        symbols: &mut SymbolTable,
        name: &str,
        kind: SymbolKind,
        length: u64,
        line: usize,
    ) -> Result<(), CompileError> {
        let mem_start = self.alloc(length, line)?;
        let symbol = Symbol {
            name: name.to_string(),
            kind,
            mem_start,
            length,
            initialized: false,
        };
        symbols.declare(symbol).map_err(|existing| {
            err(
                SemanticErrorKind::Redeclaration,
                line,
                format!("`{}` is already declared", existing.name),
            )
        })
    }

    fn declare_local(
        &mut self,
        symbols: &mut SymbolTable,
        decl: &Decl,
    ) -> Result<(), CompileError> {
        match decl.size {
            Some(0) => Err(err(
                SemanticErrorKind::BadArrayLength,
                decl.line,
                format!("array `{}` must have a positive length", decl.name),
            )),
            Some(n) => self.declare(symbols, &decl.name, SymbolKind::Array, n, decl.line),
            None => self.declare(symbols, &decl.name, SymbolKind::Var, 1, decl.line),
        }
    }

    fn procedure(&mut self, proc: &SourceProcedure) -> Result<Procedure, CompileError> {
        if self.sigs.iter().any(|s| s.name == proc.name) {
            return Err(err(
                SemanticErrorKind::Redeclaration,
                proc.line,
                format!("procedure `{}` is already declared", proc.name),
            ));
        }
        let mut symbols = SymbolTable::new();
        let mut params = Vec::new();
        for p in &proc.params {
            let kind = if p.is_array {
                SymbolKind::ProcArrayArg
            } else {
                SymbolKind::ProcArg
            };
            self.declare(&mut symbols, &p.name, kind, 1, p.line)?;
            params.push(ParamSig {
                name: p.name.clone(),
                is_array: p.is_array,
                needs_init: false,
                initializes: false,
            });
        }
        let slot = self.alloc(1, proc.line)?;
        symbols.set_return_slot(slot);
        for decl in &proc.decls {
            self.declare_local(&mut symbols, decl)?;
        }
        let mut scope = Scope {
            symbols,
            params,
            proc_name: Some(proc.name.clone()),
        };
        let commands = self.commands(&proc.commands, &mut scope)?;
        self.sigs.push(ProcSig {
            name: proc.name.clone(),
            params: scope.params,
        });
        Ok(Procedure {
            name: proc.name.clone(),
            params: proc.params.iter().map(|p| p.name.clone()).collect(),
            commands,
            symbols: scope.symbols,
        })
    }

    fn main(&mut self, main: &SourceMain) -> Result<Procedure, CompileError> {
        let mut symbols = SymbolTable::new();
        for decl in &main.decls {
            self.declare_local(&mut symbols, decl)?;
        }
        let mut scope = Scope {
            symbols,
            params: Vec::new(),
            proc_name: None,
        };
        let commands = self.commands(&main.commands, &mut scope)?;
        Ok(Procedure {
            name: "main".to_string(),
            params: Vec::new(),
            commands,
            symbols: scope.symbols,
        })
    }

    // ── Commands ────────────────────────────────────────────────────────

    fn commands(
        &mut self,
        commands: &[SourceCommand],
        scope: &mut Scope,
    ) -> Result<Vec<Command>, CompileError> {
        commands.iter().map(|c| self.command(c, scope)).collect()
    }

    fn command(
        &mut self,
        command: &SourceCommand,
        scope: &mut Scope,
    ) -> Result<Command, CompileError> {
        match command {
            SourceCommand::Assign { target, value, line } => {
                let value = self.expression(value, scope, *line)?;
                let target = self.target(target, scope, *line)?;
                Ok(Command::Assign { target, value })
            }
            SourceCommand::Read { target, line } => {
                let target = self.target(target, scope, *line)?;
                Ok(Command::Read(target))
            }
            SourceCommand::Write { value, line } => {
                let value = self.value_use(value, scope, *line)?;
                Ok(Command::Write(value))
            }
            SourceCommand::If {
                cond,
                then_branch,
                else_branch,
                line,
            } => Ok(Command::IfElse {
                cond: self.condition(cond, scope, *line)?,
                then_branch: self.commands(then_branch, scope)?,
                else_branch: self.commands(else_branch, scope)?,
            }),
            SourceCommand::While { cond, body, line } => Ok(Command::While {
                cond: self.condition(cond, scope, *line)?,
                body: self.commands(body, scope)?,
            }),
            SourceCommand::Repeat { body, cond, line } => Ok(Command::RepeatUntil {
                body: self.commands(body, scope)?,
                cond: self.condition(cond, scope, *line)?,
            }),
            SourceCommand::Call { name, args, line } => self.call(name, args, scope, *line),
        }
    }

    fn call(
        &mut self,
        name: &str,
        args: &[String],
        scope: &mut Scope,
        line: usize,
    ) -> Result<Command, CompileError> {
        if scope.proc_name.as_deref() == Some(name) {
            return Err(err(
                SemanticErrorKind::RecursiveCall,
                line,
                format!("procedure `{name}` cannot call itself"),
            ));
        }
        let sig = match self.sigs.iter().find(|s| s.name == name) {
            Some(sig) => sig,
            None => {
                return Err(err(
                    SemanticErrorKind::UndeclaredProcedure,
                    line,
                    format!("procedure `{name}` is not declared"),
                ))
            }
        };
        if args.len() != sig.params.len() {
            return Err(err(
                SemanticErrorKind::ArgumentCountMismatch,
                line,
                format!(
                    "procedure `{name}` expects {} arguments, {} were passed",
                    sig.params.len(),
                    args.len()
                ),
            ));
        }
        let params: Vec<ParamSig> = sig.params.clone();
        for (arg, param) in args.iter().zip(&params) {
            let sym = match scope.symbols.get(arg) {
                Some(sym) => sym.clone(),
                None => {
                    return Err(err(
                        SemanticErrorKind::UndeclaredVariable,
                        line,
                        format!("unknown variable `{arg}`"),
                    ))
                }
            };
            if param.is_array != sym.kind.is_array() {
                let (want, got) = if param.is_array {
                    ("an array", "a scalar")
                } else {
                    ("a scalar", "an array")
                };
                return Err(err(
                    SemanticErrorKind::ArgumentKindMismatch,
                    line,
                    format!("procedure `{name}` expects {want} for `{arg}`, {got} was passed"),
                ));
            }
            if param.needs_init && !sym.initialized {
                match sym.kind {
                    SymbolKind::Var => {
                        return Err(err(
                            SemanticErrorKind::UninitializedArgument,
                            line,
                            format!(
                                "procedure `{name}` reads `{}` before writing it, \
                                 but `{arg}` is uninitialized",
                                param.name
                            ),
                        ))
                    }
                    SymbolKind::ProcArg => {
                        // the requirement propagates to this procedure's
                        // own caller
                        if let Some(p) = scope.param_mut(arg) {
                            p.needs_init = true;
                        }
                    }
                    _ => {}
                }
            }
            if param.initializes {
                if let Some(sym) = scope.symbols.get_mut(arg) {
                    sym.initialized = true;
                }
                if let Some(p) = scope.param_mut(arg) {
                    p.initializes = true;
                }
            }
        }
        Ok(Command::Call {
            name: name.to_string(),
            args: args.to_vec(),
        })
    }

    // ── Values and identifiers ──────────────────────────────────────────

    fn expression(
        &mut self,
        expr: &SourceExpr,
        scope: &mut Scope,
        line: usize,
    ) -> Result<Expression, CompileError> {
        let left = self.value_use(&expr.left, scope, line)?;
        match &expr.rest {
            None => Ok(Expression::Value(left)),
            Some((op, right)) => {
                let right = self.value_use(right, scope, line)?;
                Ok(match op {
                    ArithOp::Add => Expression::Add(left, right),
                    ArithOp::Sub => Expression::Sub(left, right),
                    ArithOp::Mul => Expression::Mul(left, right),
                    ArithOp::Div => Expression::Div(left, right),
                    ArithOp::Mod => Expression::Mod(left, right),
                })
            }
        }
    }

    fn condition(
        &mut self,
        cond: &SourceCond,
        scope: &mut Scope,
        line: usize,
    ) -> Result<Condition, CompileError> {
        Ok(Condition {
            rel: cond.rel,
            left: self.value_use(&cond.left, scope, line)?,
            right: self.value_use(&cond.right, scope, line)?,
        })
    }

    fn value_use(
        &mut self,
        value: &SourceValue,
        scope: &mut Scope,
        line: usize,
    ) -> Result<Operand, CompileError> {
        match value {
            SourceValue::Num(n) => Ok(Operand::Imm(*n)),
            SourceValue::Ident(ident) => {
                let operand = self.resolve(ident, scope, line)?;
                if let Operand::Scalar(name) = &operand {
                    self.require_initialized(name, scope, line)?;
                }
                Ok(operand)
            }
        }
    }

    /// A read of a scalar must see an initialized value; a read of an
    /// uninitialized by-reference parameter instead obligates every
    /// caller to pass an initialized actual.
    fn require_initialized(
        &mut self,
        name: &str,
        scope: &mut Scope,
        line: usize,
    ) -> Result<(), CompileError> {
        let sym = scope.symbols.expect(name).clone();
        match sym.kind {
            SymbolKind::Var if !sym.initialized => Err(err(
                SemanticErrorKind::Uninitialized,
                line,
                format!("variable `{name}` is used before initialization"),
            )),
            SymbolKind::ProcArg if !sym.initialized => {
                if let Some(p) = scope.param_mut(name) {
                    p.needs_init = true;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Resolve an identifier occurrence, checking kind agreement and
    /// constant index bounds. Indices of variable-indexed accesses are
    /// reads and go through the initialization check.
    fn resolve(
        &mut self,
        ident: &SourceIdent,
        scope: &mut Scope,
        line: usize,
    ) -> Result<Operand, CompileError> {
        let name = ident.name();
        let sym = match scope.symbols.get(name) {
            Some(sym) => sym.clone(),
            None => {
                return Err(err(
                    SemanticErrorKind::UndeclaredVariable,
                    line,
                    format!("unknown variable `{name}`"),
                ))
            }
        };
        match ident {
            SourceIdent::Scalar { .. } => {
                if sym.kind.is_array() {
                    return Err(err(
                        SemanticErrorKind::NotAScalar,
                        line,
                        format!("`{name}` is an array, an index is required"),
                    ));
                }
                Ok(Operand::Scalar(name.to_string()))
            }
            SourceIdent::ArrayNum { index, .. } => {
                if !sym.kind.is_array() {
                    return Err(err(
                        SemanticErrorKind::NotAnArray,
                        line,
                        format!("`{name}` is a scalar and cannot be indexed"),
                    ));
                }
                if sym.kind == SymbolKind::Array && *index >= sym.length {
                    return Err(err(
                        SemanticErrorKind::IndexOutOfBounds,
                        line,
                        format!("index {index} is out of bounds for `{name}`"),
                    ));
                }
                Ok(Operand::ArrayConst {
                    name: name.to_string(),
                    index: *index,
                })
            }
            SourceIdent::ArrayVar { index, .. } => {
                if !sym.kind.is_array() {
                    return Err(err(
                        SemanticErrorKind::NotAnArray,
                        line,
                        format!("`{name}` is a scalar and cannot be indexed"),
                    ));
                }
                let idx_sym = match scope.symbols.get(index) {
                    Some(s) => s.clone(),
                    None => {
                        return Err(err(
                            SemanticErrorKind::UndeclaredVariable,
                            line,
                            format!("unknown variable `{index}`"),
                        ))
                    }
                };
                if idx_sym.kind.is_array() {
                    return Err(err(
                        SemanticErrorKind::ArrayIndexIsArray,
                        line,
                        format!("array `{index}` cannot be used as an index"),
                    ));
                }
                self.require_initialized(index, scope, line)?;
                Ok(Operand::ArrayVar {
                    name: name.to_string(),
                    index: index.to_string(),
                })
            }
        }
    }

    /// Resolve an assignment or `READ` target and record the
    /// initialization it performs. Only scalars are tracked; array cells
    /// are not followed individually.
    fn target(
        &mut self,
        ident: &SourceIdent,
        scope: &mut Scope,
        line: usize,
    ) -> Result<Operand, CompileError> {
        let operand = self.resolve(ident, scope, line)?;
        if let Operand::Scalar(name) = &operand {
            let kind = scope.symbols.expect(name).kind;
            if matches!(kind, SymbolKind::Var | SymbolKind::ProcArg) {
                scope.symbols.get_mut(name).unwrap().initialized = true;
            }
            if kind == SymbolKind::ProcArg {
                if let Some(p) = scope.param_mut(name) {
                    p.initializes = true;
                }
            }
        }
        Ok(operand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parser::parse;

    fn analyze_src(src: &str) -> Result<Program, CompileError> {
        analyze(&parse(src).unwrap())
    }

    fn kind_of(err: CompileError) -> SemanticErrorKind {
        match err {
            CompileError::Semantic { kind, .. } => kind,
            other => panic!("expected a semantic error, got {other}"),
        }
    }

    #[test]
    fn memory_layout_is_flat_and_disjoint() {
        let p = analyze_src(
            "PROCEDURE p(a) IS x IN x := a; END \
             PROGRAM IS y, t[3] IN y := 0; p(y); END",
        )
        .unwrap();
        let proc = &p.procedures[0];
        // parameter, return slot, local, then main's symbols
        assert_eq!(proc.symbols.expect("a").mem_start, 0);
        assert_eq!(proc.symbols.return_slot(), 1);
        assert_eq!(proc.symbols.expect("x").mem_start, 2);
        assert_eq!(p.main.symbols.expect("y").mem_start, 3);
        assert_eq!(p.main.symbols.expect("t").mem_start, 4);
        assert_eq!(p.main.symbols.expect("t").length, 3);
    }

    #[test]
    fn uninitialized_use_is_rejected() {
        let e = analyze_src("PROGRAM IS x, y IN y := x + 1; END").unwrap_err();
        assert_eq!(kind_of(e), SemanticErrorKind::Uninitialized);
    }

    #[test]
    fn read_initializes_its_target() {
        assert!(analyze_src("PROGRAM IS x IN READ x; WRITE x; END").is_ok());
    }

    #[test]
    fn unknown_names_are_rejected() {
        let e = analyze_src("PROGRAM IS x IN x := z; END").unwrap_err();
        assert_eq!(kind_of(e), SemanticErrorKind::UndeclaredVariable);
    }

    #[test]
    fn scalars_cannot_be_indexed() {
        let e = analyze_src("PROGRAM IS x IN x := 1; x[0] := 2; END").unwrap_err();
        assert_eq!(kind_of(e), SemanticErrorKind::NotAnArray);
    }

    #[test]
    fn arrays_need_an_index() {
        let e = analyze_src("PROGRAM IS t[4] IN t := 1; END").unwrap_err();
        assert_eq!(kind_of(e), SemanticErrorKind::NotAScalar);
    }

    #[test]
    fn constant_indices_are_bounds_checked() {
        let e = analyze_src("PROGRAM IS t[4] IN t[4] := 1; END").unwrap_err();
        assert_eq!(kind_of(e), SemanticErrorKind::IndexOutOfBounds);
    }

    #[test]
    fn recursion_is_rejected() {
        let e = analyze_src(
            "PROCEDURE p(a) IS IN p(a); END PROGRAM IS x IN x := 1; END",
        )
        .unwrap_err();
        assert_eq!(kind_of(e), SemanticErrorKind::RecursiveCall);
    }

    #[test]
    fn calls_check_arity() {
        let e = analyze_src(
            "PROCEDURE p(a, b) IS IN a := b; END PROGRAM IS x IN x := 1; p(x); END",
        )
        .unwrap_err();
        assert_eq!(kind_of(e), SemanticErrorKind::ArgumentCountMismatch);
    }

    #[test]
    fn calls_check_argument_kinds() {
        let e = analyze_src(
            "PROCEDURE p(T t) IS IN t[0] := 1; END PROGRAM IS x IN p(x); END",
        )
        .unwrap_err();
        assert_eq!(kind_of(e), SemanticErrorKind::ArgumentKindMismatch);
    }

    #[test]
    fn parameters_read_before_write_demand_initialized_actuals() {
        let e = analyze_src(
            "PROCEDURE p(a, b) IS IN b := a; END \
             PROGRAM IS x, y IN p(x, y); END",
        )
        .unwrap_err();
        assert_eq!(kind_of(e), SemanticErrorKind::UninitializedArgument);
    }

    #[test]
    fn calls_propagate_initialization_to_actuals() {
        assert!(analyze_src(
            "PROCEDURE init(a) IS IN a := 7; END \
             PROGRAM IS x IN init(x); WRITE x; END",
        )
        .is_ok());
    }

    #[test]
    fn calls_before_declaration_are_rejected() {
        let e = analyze_src(
            "PROCEDURE p(a) IS IN q(a); END \
             PROCEDURE q(a) IS IN a := 1; END \
             PROGRAM IS x IN x := 1; END",
        )
        .unwrap_err();
        assert_eq!(kind_of(e), SemanticErrorKind::UndeclaredProcedure);
    }

    #[test]
    fn duplicate_declarations_are_rejected() {
        let e = analyze_src("PROGRAM IS x, x IN x := 1; END").unwrap_err();
        assert_eq!(kind_of(e), SemanticErrorKind::Redeclaration);
    }

    #[test]
    fn zero_length_arrays_are_rejected() {
        let e = analyze_src("PROGRAM IS t[0] IN t[0] := 1; END").unwrap_err();
        assert_eq!(kind_of(e), SemanticErrorKind::BadArrayLength);
    }
}
