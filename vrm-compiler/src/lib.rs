//! Compiler for a small imperative language (scalar and array variables,
//! single-operator arithmetic, conditionals, loops, by-reference
//! procedures, `READ`/`WRITE`) targeting a minimal machine with an
//! accumulator, seven general registers and no immediate loads.
//!
//! Pipeline: `frontend` (lexer + parser) → `semantic` (validation and
//! memory layout) → `backend` (flow graphs, register allocation, code
//! generation) → a listing of absolute-addressed instructions. `vm` is a
//! reference interpreter for the emitted code.

pub mod ast;
pub mod backend;
pub mod frontend;
pub mod semantic;
pub mod symbol_table;
pub mod vm;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Lexical error: {0}")]
    Lexical(#[from] frontend::lexer::LexicalError),

    #[error("Error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Error at line {line}: {message}")]
    Semantic {
        kind: SemanticErrorKind,
        line: usize,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticErrorKind {
    UndeclaredVariable,
    UndeclaredProcedure,
    Redeclaration,
    NotAnArray,
    NotAScalar,
    IndexOutOfBounds,
    ArrayIndexIsArray,
    BadArrayLength,
    Uninitialized,
    UninitializedArgument,
    RecursiveCall,
    ArgumentCountMismatch,
    ArgumentKindMismatch,
    OutOfMemory,
}

impl std::fmt::Display for SemanticErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SemanticErrorKind::UndeclaredVariable => "UndeclaredVariable",
            SemanticErrorKind::UndeclaredProcedure => "UndeclaredProcedure",
            SemanticErrorKind::Redeclaration => "Redeclaration",
            SemanticErrorKind::NotAnArray => "NotAnArray",
            SemanticErrorKind::NotAScalar => "NotAScalar",
            SemanticErrorKind::IndexOutOfBounds => "IndexOutOfBounds",
            SemanticErrorKind::ArrayIndexIsArray => "ArrayIndexIsArray",
            SemanticErrorKind::BadArrayLength => "BadArrayLength",
            SemanticErrorKind::Uninitialized => "Uninitialized",
            SemanticErrorKind::UninitializedArgument => "UninitializedArgument",
            SemanticErrorKind::RecursiveCall => "RecursiveCall",
            SemanticErrorKind::ArgumentCountMismatch => "ArgumentCountMismatch",
            SemanticErrorKind::ArgumentKindMismatch => "ArgumentKindMismatch",
            SemanticErrorKind::OutOfMemory => "OutOfMemory",
        };
        write!(f, "{name}")
    }
}

/// Parse and validate source text into the backend's input form.
pub fn compile_to_program(source: &str) -> Result<ast::Program, CompileError> {
    let parsed = frontend::parser::parse(source)?;
    semantic::analyze(&parsed)
}

/// Compile source text to the instruction listing.
pub fn compile_to_code(source: &str) -> Result<Vec<backend::Instr>, CompileError> {
    Ok(backend::generate(&compile_to_program(source)?))
}

/// Compile source text directly to the textual listing, one instruction
/// per line.
pub fn compile_to_text(source: &str) -> Result<String, CompileError> {
    Ok(backend::to_text(&compile_to_code(source)?))
}
