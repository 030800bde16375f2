//! Scope-chained symbol tables for variable and function declarations.
//!
//! Each table is a separately-chained hash table keyed by FNV-1 of the symbol
//! name, growing by doubling. Tables stack up to form the scope chain; the
//! bottom table is the global scope and lookups walk inner to outer.

use crate::codegen::LLVMValue;
use crate::types::Type;

/// Default number of buckets in a new symbol table.
pub const SYMBOL_TABLE_DEFAULT_LENGTH: usize = 1024;

const FNV_OFFSET_BASIS: u64 = 0xCBF2_9CE4_8422_2325;
const FNV_PRIME: u64 = 0x100_0000_01B3;

/// FNV-1 string hash (64-bit).
pub fn fnv_1(s: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in s.bytes() {
        hash = hash.wrapping_mul(FNV_PRIME);
        hash ^= u64::from(byte);
    }
    hash
}

/// Data about one declared symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolTableEntry {
    pub name: String,
    pub ty: Type,
    /// Most recent IR value bound to this symbol. Only populated for locals
    /// (function parameters), which live in stack slots named after them.
    pub latest_value: Option<LLVMValue>,
}

/// Symbols declared within one scope.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    buckets: Vec<Vec<SymbolTableEntry>>,
    length: usize,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::with_capacity(SYMBOL_TABLE_DEFAULT_LENGTH)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        SymbolTable {
            buckets: vec![Vec::new(); capacity.max(1)],
            length: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn total_buckets(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_index(&self, name: &str) -> usize {
        (fnv_1(name) % self.buckets.len() as u64) as usize
    }

    /// Find the entry for `name` in this table, walking the bucket chain.
    pub fn find(&self, name: &str) -> Option<&SymbolTableEntry> {
        self.buckets[self.bucket_index(name)]
            .iter()
            .find(|e| e.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut SymbolTableEntry> {
        let index = self.bucket_index(name);
        self.buckets[index].iter_mut().find(|e| e.name == name)
    }

    /// Add a symbol to this table. Redeclaration within one table is an error;
    /// the message names the existing symbol.
    pub fn add(&mut self, name: &str, ty: Type) -> Result<(), String> {
        if self.find(name).is_some() {
            return Err(format!(
                "Identifier \"{}\" already exists in this scope",
                name
            ));
        }

        if self.length + 1 > self.buckets.len() {
            self.resize();
        }

        let index = self.bucket_index(name);
        self.buckets[index].push(SymbolTableEntry {
            name: name.to_string(),
            ty,
            latest_value: None,
        });
        self.length += 1;
        Ok(())
    }

    /// Double the bucket count and rehash every entry.
    pub fn resize(&mut self) {
        let new_capacity = self.buckets.len() * 2;
        let old_buckets = std::mem::replace(&mut self.buckets, vec![Vec::new(); new_capacity]);
        for entry in old_buckets.into_iter().flatten() {
            let index = self.bucket_index(&entry.name);
            self.buckets[index].push(entry);
        }
    }
}

/// Stack of symbol tables used for scoping.
///
/// Always non-empty during parsing; the bottom table is the global scope.
#[derive(Debug, Default)]
pub struct SymbolTableStack {
    tables: Vec<SymbolTable>,
}

impl SymbolTableStack {
    /// A stack with one empty table (the global scope) at the bottom.
    pub fn new_nonempty() -> Self {
        let mut stack = SymbolTableStack { tables: Vec::new() };
        stack.push();
        stack
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Push a new empty table onto the stack.
    pub fn push(&mut self) {
        self.push_existing(SymbolTable::new());
    }

    /// Push an existing table onto the stack.
    pub fn push_existing(&mut self, table: SymbolTable) {
        self.tables.push(table);
    }

    /// Remove the top table and return it.
    pub fn pop(&mut self) -> Option<SymbolTable> {
        self.tables.pop()
    }

    /// The innermost table.
    pub fn peek(&self) -> &SymbolTable {
        self.tables.last().expect("symbol table stack is empty")
    }

    pub fn peek_mut(&mut self) -> &mut SymbolTable {
        self.tables.last_mut().expect("symbol table stack is empty")
    }

    /// The bottom (global) table.
    pub fn global_mut(&mut self) -> &mut SymbolTable {
        self.tables.first_mut().expect("symbol table stack is empty")
    }

    /// Find `name` in the scope chain, innermost table first.
    pub fn find(&self, name: &str) -> Option<&SymbolTableEntry> {
        self.tables.iter().rev().find_map(|t| t.find(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut SymbolTableEntry> {
        self.tables.iter_mut().rev().find_map(|t| t.find_mut(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Number, NumberType};

    fn int_type() -> Type {
        Type::Number(Number::int32(0))
    }

    #[test]
    fn test_fnv_1_offset_basis() {
        assert_eq!(fnv_1(""), FNV_OFFSET_BASIS);
    }

    #[test]
    fn test_fnv_1_distinguishes_strings() {
        assert_ne!(fnv_1("x"), fnv_1("y"));
        assert_eq!(fnv_1("counter"), fnv_1("counter"));
    }

    #[test]
    fn test_add_and_find() {
        let mut table = SymbolTable::new();
        table.add("x", int_type()).unwrap();
        let entry = table.find("x").unwrap();
        assert_eq!(entry.name, "x");
        assert_eq!(entry.ty.as_number().unwrap().number_type, NumberType::Int32);
        assert!(table.find("y").is_none());
    }

    #[test]
    fn test_redeclaration_is_an_error() {
        let mut table = SymbolTable::new();
        table.add("x", int_type()).unwrap();
        assert!(table.add("x", int_type()).is_err());
    }

    #[test]
    fn test_chains_survive_collisions_and_resize() {
        // Tiny capacity forces every name into the same few buckets and an
        // early resize.
        let mut table = SymbolTable::with_capacity(2);
        for i in 0..64 {
            table.add(&format!("sym{}", i), int_type()).unwrap();
        }
        assert_eq!(table.len(), 64);
        assert!(table.total_buckets() >= 64);
        for i in 0..64 {
            assert!(table.find(&format!("sym{}", i)).is_some(), "sym{}", i);
        }
    }

    #[test]
    fn test_scope_lookup_is_inner_to_outer() {
        let mut stack = SymbolTableStack::new_nonempty();
        stack
            .global_mut()
            .add("x", Type::Number(Number::int32(0)))
            .unwrap();
        stack.push();
        stack
            .peek_mut()
            .add("x", Type::Number(Number::int64(0)))
            .unwrap();

        // Inner declaration shadows the global one
        let found = stack.find("x").unwrap();
        assert_eq!(found.ty.as_number().unwrap().number_type, NumberType::Int64);

        stack.pop();
        let found = stack.find("x").unwrap();
        assert_eq!(found.ty.as_number().unwrap().number_type, NumberType::Int32);
    }

    #[test]
    fn test_outer_scope_reachable_from_inner() {
        let mut stack = SymbolTableStack::new_nonempty();
        stack.global_mut().add("g", int_type()).unwrap();
        stack.push();
        assert!(stack.find("g").is_some());
        assert!(stack.peek().find("g").is_none());
    }
}
