//! Static name resolution.
//!
//! Each function body being compiled gets its own table enclosed by the table
//! of the surrounding code. Resolving a name that lives in an enclosing
//! function (and is not global) turns it into a free variable of every table
//! between the use and the definition.
use std::collections::HashMap;

use lasso::Spur;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    /// The name of the function whose body is being compiled
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol {
    pub name: Spur,
    pub scope: SymbolScope,
    pub index: usize,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: HashMap<Spur, Symbol>,
    num_definitions: usize,
    /// Symbols of the enclosing table captured by this one, in capture order
    free_symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_enclosed(outer: SymbolTable) -> Self {
        Self {
            outer: Some(Box::new(outer)),
            ..Self::default()
        }
    }

    /// Detaches and returns the enclosing table, if any.
    pub fn take_outer(&mut self) -> Option<SymbolTable> {
        self.outer.take().map(|outer| *outer)
    }

    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }

    pub fn free_symbols(&self) -> &[Symbol] {
        &self.free_symbols
    }

    /// Binds `name` to the next slot, rebinding silently if it already exists here.
    pub fn define(&mut self, name: Spur) -> Symbol {
        let scope = if self.is_global() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };
        let symbol = Symbol {
            name,
            scope,
            index: self.num_definitions,
        };
        self.store.insert(name, symbol);
        self.num_definitions += 1;
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: Spur) -> Symbol {
        let symbol = Symbol {
            name,
            scope: SymbolScope::Builtin,
            index,
        };
        self.store.insert(name, symbol);
        symbol
    }

    pub fn define_function_name(&mut self, name: Spur) -> Symbol {
        let symbol = Symbol {
            name,
            scope: SymbolScope::Function,
            index: 0,
        };
        self.store.insert(name, symbol);
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        self.free_symbols.push(original);
        let symbol = Symbol {
            name: original.name,
            scope: SymbolScope::Free,
            index: self.free_symbols.len() - 1,
        };
        self.store.insert(original.name, symbol);
        symbol
    }

    /// Looks `name` up here and then outward.
    ///
    /// Takes `&mut self` because a hit in an enclosing function's scope is
    /// recorded as a free variable on the way back in.
    pub fn resolve(&mut self, name: Spur) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(&name) {
            return Some(*symbol);
        }

        let symbol = self.outer.as_mut()?.resolve(name)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            _ => Some(self.define_free(symbol)),
        }
    }
}
