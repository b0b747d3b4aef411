//! Recursive-descent parser producing the source-level AST.
//!
//! Expressions carry at most one operator and conditions one comparator,
//! as the language defines them. `<` and `<=` are normalized here into
//! `>` and `>=` with swapped operands, so the backend only ever sees four
//! comparators.

use super::lexer::{self, SpannedToken, Token};
use crate::ast::RelOp;
use crate::CompileError;

// --- Source-level AST ---

#[derive(Debug, Clone)]
pub struct SourceProgram {
    pub procedures: Vec<SourceProcedure>,
    pub main: SourceMain,
}

#[derive(Debug, Clone)]
pub struct SourceProcedure {
    pub name: String,
    pub line: usize,
    pub params: Vec<Param>,
    pub decls: Vec<Decl>,
    pub commands: Vec<SourceCommand>,
}

#[derive(Debug, Clone)]
pub struct SourceMain {
    pub decls: Vec<Decl>,
    pub commands: Vec<SourceCommand>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub is_array: bool,
    pub line: usize,
}

/// A local declaration: a scalar, or an array with its length.
#[derive(Debug, Clone)]
pub struct Decl {
    pub name: String,
    pub size: Option<u64>,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub enum SourceCommand {
    Assign {
        target: SourceIdent,
        value: SourceExpr,
        line: usize,
    },
    If {
        cond: SourceCond,
        then_branch: Vec<SourceCommand>,
        else_branch: Vec<SourceCommand>,
        line: usize,
    },
    While {
        cond: SourceCond,
        body: Vec<SourceCommand>,
        line: usize,
    },
    Repeat {
        body: Vec<SourceCommand>,
        cond: SourceCond,
        line: usize,
    },
    Call {
        name: String,
        args: Vec<String>,
        line: usize,
    },
    Read {
        target: SourceIdent,
        line: usize,
    },
    Write {
        value: SourceValue,
        line: usize,
    },
}

#[derive(Debug, Clone)]
pub enum SourceIdent {
    Scalar { name: String },
    ArrayNum { name: String, index: u64 },
    ArrayVar { name: String, index: String },
}

impl SourceIdent {
    pub fn name(&self) -> &str {
        match self {
            SourceIdent::Scalar { name }
            | SourceIdent::ArrayNum { name, .. }
            | SourceIdent::ArrayVar { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SourceValue {
    Num(u64),
    Ident(SourceIdent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// `left`, or `left op right`.
#[derive(Debug, Clone)]
pub struct SourceExpr {
    pub left: SourceValue,
    pub rest: Option<(ArithOp, SourceValue)>,
}

/// A comparison, already normalized to the four backend comparators.
#[derive(Debug, Clone)]
pub struct SourceCond {
    pub rel: RelOp,
    pub left: SourceValue,
    pub right: SourceValue,
}

// --- Parser ---

pub fn parse(source: &str) -> Result<SourceProgram, CompileError> {
    let tokens = lexer::tokenize(source)?;
    Parser { tokens, pos: 0 }.program()
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    /// Line of the current token (or of the last one at end of input).
    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, l)| *l)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, CompileError> {
        Err(CompileError::Parse {
            line: self.line(),
            message: message.into(),
        })
    }

    fn expect(&mut self, token: Token) -> Result<(), CompileError> {
        match self.peek() {
            Some(t) if *t == token => {
                self.pos += 1;
                Ok(())
            }
            Some(t) => {
                let found = t.clone();
                self.error(format!("expected {token}, found {found}"))
            }
            None => self.error(format!("expected {token}, found end of input")),
        }
    }

    fn ident(&mut self) -> Result<String, CompileError> {
        match self.peek() {
            Some(Token::Ident(_)) => match self.advance() {
                Some(Token::Ident(name)) => Ok(name),
                _ => unreachable!(),
            },
            Some(t) => {
                let found = t.clone();
                self.error(format!("expected an identifier, found {found}"))
            }
            None => self.error("expected an identifier, found end of input"),
        }
    }

    fn number(&mut self) -> Result<u64, CompileError> {
        match self.peek() {
            Some(Token::Number(_)) => match self.advance() {
                Some(Token::Number(n)) => Ok(n),
                _ => unreachable!(),
            },
            Some(t) => {
                let found = t.clone();
                self.error(format!("expected a number, found {found}"))
            }
            None => self.error("expected a number, found end of input"),
        }
    }

    fn program(&mut self) -> Result<SourceProgram, CompileError> {
        let mut procedures = Vec::new();
        while self.peek() == Some(&Token::Procedure) {
            procedures.push(self.procedure()?);
        }
        self.expect(Token::Program)?;
        self.expect(Token::Is)?;
        let decls = self.declarations()?;
        self.expect(Token::In)?;
        let commands = self.commands()?;
        self.expect(Token::End)?;
        if let Some(t) = self.peek() {
            let found = t.clone();
            return self.error(format!("trailing input after the program end: {found}"));
        }
        Ok(SourceProgram {
            procedures,
            main: SourceMain { decls, commands },
        })
    }

    fn procedure(&mut self) -> Result<SourceProcedure, CompileError> {
        let line = self.line();
        self.expect(Token::Procedure)?;
        let name = self.ident()?;
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                let line = self.line();
                let is_array = if self.peek() == Some(&Token::ArrayMark) {
                    self.advance();
                    true
                } else {
                    false
                };
                let name = self.ident()?;
                params.push(Param { name, is_array, line });
                if self.peek() == Some(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        self.expect(Token::Is)?;
        let decls = self.declarations()?;
        self.expect(Token::In)?;
        let commands = self.commands()?;
        self.expect(Token::End)?;
        Ok(SourceProcedure {
            name,
            line,
            params,
            decls,
            commands,
        })
    }

    fn declarations(&mut self) -> Result<Vec<Decl>, CompileError> {
        let mut decls = Vec::new();
        if !matches!(self.peek(), Some(Token::Ident(_))) {
            return Ok(decls);
        }
        loop {
            let line = self.line();
            let name = self.ident()?;
            let size = if self.peek() == Some(&Token::LBracket) {
                self.advance();
                let n = self.number()?;
                self.expect(Token::RBracket)?;
                Some(n)
            } else {
                None
            };
            decls.push(Decl { name, size, line });
            if self.peek() == Some(&Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(decls)
    }

    fn commands(&mut self) -> Result<Vec<SourceCommand>, CompileError> {
        let mut commands = Vec::new();
        loop {
            match self.peek() {
                Some(Token::End)
                | Some(Token::Else)
                | Some(Token::EndIf)
                | Some(Token::EndWhile)
                | Some(Token::Until)
                | None => break,
                _ => commands.push(self.command()?),
            }
        }
        Ok(commands)
    }

    fn command(&mut self) -> Result<SourceCommand, CompileError> {
        let line = self.line();
        match self.peek() {
            Some(Token::If) => {
                self.advance();
                let cond = self.condition()?;
                self.expect(Token::Then)?;
                let then_branch = self.commands()?;
                let else_branch = if self.peek() == Some(&Token::Else) {
                    self.advance();
                    self.commands()?
                } else {
                    Vec::new()
                };
                self.expect(Token::EndIf)?;
                Ok(SourceCommand::If {
                    cond,
                    then_branch,
                    else_branch,
                    line,
                })
            }
            Some(Token::While) => {
                self.advance();
                let cond = self.condition()?;
                self.expect(Token::Do)?;
                let body = self.commands()?;
                self.expect(Token::EndWhile)?;
                Ok(SourceCommand::While { cond, body, line })
            }
            Some(Token::Repeat) => {
                self.advance();
                let body = self.commands()?;
                self.expect(Token::Until)?;
                let cond = self.condition()?;
                self.expect(Token::Semicolon)?;
                Ok(SourceCommand::Repeat { body, cond, line })
            }
            Some(Token::Read) => {
                self.advance();
                let target = self.identifier()?;
                self.expect(Token::Semicolon)?;
                Ok(SourceCommand::Read { target, line })
            }
            Some(Token::Write) => {
                self.advance();
                let value = self.value()?;
                self.expect(Token::Semicolon)?;
                Ok(SourceCommand::Write { value, line })
            }
            Some(Token::Ident(_)) => {
                let name = self.ident()?;
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.ident()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen)?;
                    self.expect(Token::Semicolon)?;
                    Ok(SourceCommand::Call { name, args, line })
                } else {
                    let target = self.index_suffix(name)?;
                    self.expect(Token::Assign)?;
                    let value = self.expression()?;
                    self.expect(Token::Semicolon)?;
                    Ok(SourceCommand::Assign { target, value, line })
                }
            }
            Some(t) => {
                let found = t.clone();
                self.error(format!("expected a command, found {found}"))
            }
            None => self.error("expected a command, found end of input"),
        }
    }

    fn identifier(&mut self) -> Result<SourceIdent, CompileError> {
        let name = self.ident()?;
        self.index_suffix(name)
    }

    fn index_suffix(&mut self, name: String) -> Result<SourceIdent, CompileError> {
        if self.peek() != Some(&Token::LBracket) {
            return Ok(SourceIdent::Scalar { name });
        }
        self.advance();
        let ident = match self.peek() {
            Some(Token::Number(_)) => {
                let index = self.number()?;
                SourceIdent::ArrayNum { name, index }
            }
            _ => {
                let index = self.ident()?;
                SourceIdent::ArrayVar { name, index }
            }
        };
        self.expect(Token::RBracket)?;
        Ok(ident)
    }

    fn value(&mut self) -> Result<SourceValue, CompileError> {
        match self.peek() {
            Some(Token::Number(_)) => Ok(SourceValue::Num(self.number()?)),
            _ => Ok(SourceValue::Ident(self.identifier()?)),
        }
    }

    fn expression(&mut self) -> Result<SourceExpr, CompileError> {
        let left = self.value()?;
        let op = match self.peek() {
            Some(Token::Plus) => Some(ArithOp::Add),
            Some(Token::Minus) => Some(ArithOp::Sub),
            Some(Token::Star) => Some(ArithOp::Mul),
            Some(Token::Slash) => Some(ArithOp::Div),
            Some(Token::Percent) => Some(ArithOp::Mod),
            _ => None,
        };
        let rest = match op {
            Some(op) => {
                self.advance();
                Some((op, self.value()?))
            }
            None => None,
        };
        Ok(SourceExpr { left, rest })
    }

    fn condition(&mut self) -> Result<SourceCond, CompileError> {
        let left = self.value()?;
        let rel = match self.peek() {
            Some(Token::Eq) => RelOp::Eq,
            Some(Token::Neq) => RelOp::Neq,
            Some(Token::Gt) => RelOp::Gt,
            Some(Token::Ge) => RelOp::Ge,
            Some(Token::Lt) => RelOp::Gt,
            Some(Token::Le) => RelOp::Ge,
            Some(t) => {
                let found = t.clone();
                return self.error(format!("expected a comparator, found {found}"));
            }
            None => return self.error("expected a comparator, found end of input"),
        };
        let swap = matches!(self.peek(), Some(Token::Lt) | Some(Token::Le));
        self.advance();
        let right = self.value()?;
        let (left, right) = if swap { (right, left) } else { (left, right) };
        Ok(SourceCond { rel, left, right })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_program() {
        let p = parse("PROGRAM IS x IN x := 1; WRITE x; END").unwrap();
        assert!(p.procedures.is_empty());
        assert_eq!(p.main.decls.len(), 1);
        assert_eq!(p.main.commands.len(), 2);
    }

    #[test]
    fn parses_procedures_with_array_params() {
        let p = parse(
            "PROCEDURE swap(T t, i, j) IS tmp IN tmp := t[i]; END \
             PROGRAM IS d[10] IN swap(d, a, b); END",
        )
        .unwrap();
        assert_eq!(p.procedures.len(), 1);
        let proc = &p.procedures[0];
        assert!(proc.params[0].is_array);
        assert!(!proc.params[1].is_array);
        assert_eq!(p.main.decls[0].size, Some(10));
    }

    #[test]
    fn less_than_normalizes_to_swapped_greater_than() {
        let p = parse("PROGRAM IS x IN WHILE x < 5 DO x := x + 1; ENDWHILE END").unwrap();
        match &p.main.commands[0] {
            SourceCommand::While { cond, .. } => {
                assert_eq!(cond.rel, RelOp::Gt);
                assert!(matches!(cond.left, SourceValue::Num(5)));
            }
            _ => panic!("expected a while loop"),
        }
    }

    #[test]
    fn missing_semicolon_is_a_parse_error() {
        let err = parse("PROGRAM IS x IN x := 1 END").unwrap_err();
        assert!(matches!(err, CompileError::Parse { .. }));
    }
}
