//! Per-procedure symbol tables with absolute memory placement.
//!
//! Memory is a single flat address space shared by all procedures; the
//! semantic pass hands out `mem_start` offsets from one monotonically
//! increasing allocator. A procedure's table additionally reserves one
//! hidden cell for the return line stored by its prologue.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// A plain scalar variable.
    Var,
    /// A fixed-length array.
    Array,
    /// A scalar procedure parameter: its cell holds the caller's address,
    /// so every access pays one extra indirection.
    ProcArg,
    /// An array procedure parameter: its cell holds the address of the
    /// caller's array start.
    ProcArrayArg,
}

impl SymbolKind {
    /// Whether the symbol's cell stores an address rather than a value.
    pub fn by_reference(&self) -> bool {
        matches!(self, SymbolKind::ProcArg | SymbolKind::ProcArrayArg)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, SymbolKind::Array | SymbolKind::ProcArrayArg)
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Absolute address of the symbol's first memory cell.
    pub mem_start: u64,
    /// Number of cells (1 for scalars).
    pub length: u64,
    pub initialized: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
    /// Address of the hidden cell holding the procedure's return line.
    return_slot: Option<u64>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a symbol. On a name collision the existing symbol is
    /// returned unchanged as the error value.
    pub fn declare(&mut self, symbol: Symbol) -> Result<(), Symbol> {
        if let Some(existing) = self.symbols.get(&symbol.name) {
            return Err(existing.clone());
        }
        self.symbols.insert(symbol.name.clone(), symbol);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.symbols.get_mut(name)
    }

    /// The symbol, for callers that have already validated the name.
    /// A miss here is a compiler defect, not a user error.
    pub fn expect(&self, name: &str) -> &Symbol {
        self.symbols
            .get(name)
            .unwrap_or_else(|| panic!("unresolved symbol `{name}` past semantic analysis"))
    }

    pub fn set_return_slot(&mut self, addr: u64) {
        self.return_slot = Some(addr);
    }

    /// Address of the return-line cell. Only procedures have one.
    pub fn return_slot(&self) -> u64 {
        self.return_slot
            .expect("return slot requested for a table without one")
    }
}
