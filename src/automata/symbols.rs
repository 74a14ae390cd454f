use std::num::{NonZeroU32, NonZeroU64};

use dashmap::DashMap;

/// Name partitions keeping the identifier spaces of the modelling language
/// apart: an action named like a channel must not collide with it.
pub const ACTIONS: u32 = 0;
pub const CHANNELS: u32 = 1;
pub const LOCATIONS: u32 = 2;
pub const TEMPLATES: u32 = 3;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(NonZeroU64);

impl Symbol {
    pub const fn new(partition: u32, symbol: NonZeroU32) -> Self {
        Self(NonZeroU64::new(((partition as u64) << 32) | (symbol.get() as u64)).unwrap())
    }

    pub const fn partition(&self) -> u32 {
        (self.0.get() >> 32) as u32
    }

    pub const fn symbol(&self) -> NonZeroU32 {
        NonZeroU32::new((self.0.get() & 0xFFFF_FFFF) as u32).unwrap()
    }
}

/// An interning table shared by a system and both sides of a check. Two
/// automata can only be compared meaningfully when their names were interned
/// through the same table.
pub struct SymbolTable {
    tables: DashMap<u32, symbol_table::SymbolTable>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    pub fn intern(&self, partition: u32, string: &str) -> Symbol {
        let table_entry = self
            .tables
            .entry(partition)
            .or_insert_with(symbol_table::SymbolTable::new);
        let symbol = table_entry.intern(string);
        Symbol::new(partition, symbol.into())
    }

    pub fn resolve(&self, symbol: Symbol) -> &str {
        let binding = self
            .tables
            .get(&symbol.partition())
            .expect("unknown symbol partition");
        let str = binding.resolve(symbol.symbol().into());
        // Interned strings are never freed for the lifetime of the table.
        unsafe { &*(str as *const str) }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
